//! Minimal RIFF/AVI muxer for MJPEG video with optional PCM audio.
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih
//!     LIST 'strl' (strh 'vids' 'MJPG', strf BITMAPINFOHEADER)
//!     LIST 'strl' (strh 'auds', strf WAVEFORMATEX)      optional
//!   LIST 'movi'
//!     00dc (one JPEG per frame), 01wb (PCM)
//!   idx1
//! ```
//!
//! Counts and sizes unknown up front are written as zero and patched in
//! place by [`AviWriter::finish`].

use std::io::{self, Seek, SeekFrom, Write};
use std::time::Duration;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const AVIH_LEN: u32 = 56;
const STRH_LEN: u32 = 56;
const BITMAPINFO_LEN: u32 = 40;
const WAVEFORMAT_LEN: u32 = 18;

/// Interleaved signed 16-bit PCM layout of the audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    fn block_align(self) -> u32 {
        u32::from(self.channels) * 2
    }
}

struct IndexEntry {
    fourcc: [u8; 4],
    offset: u32,
    size: u32,
}

/// Positions of header fields rewritten on finish.
#[derive(Default)]
struct Patches {
    avih: u64,
    video_strh: u64,
    audio_strh: Option<u64>,
    movi_list: u64,
}

pub struct AviWriter<W: Write + Seek> {
    out: W,
    width: u32,
    height: u32,
    fps: u32,
    audio: Option<AudioFormat>,
    patches: Patches,
    index: Vec<IndexEntry>,
    frames: u32,
    audio_bytes: u64,
    video_bytes: u64,
    max_chunk: u32,
}

fn le16(out: &mut impl Write, v: u16) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn le32(out: &mut impl Write, v: u32) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "AVI file exceeds 4 GiB")
}

impl<W: Write + Seek> AviWriter<W> {
    /// Write the headers and open the `movi` list.
    pub fn new(mut out: W, width: u32, height: u32, fps: u32, audio: Option<AudioFormat>) -> io::Result<Self> {
        let fps = fps.max(1);
        let mut patches = Patches::default();

        let strl_video = 4 + (8 + STRH_LEN) + (8 + BITMAPINFO_LEN);
        let strl_audio = 4 + (8 + STRH_LEN) + (8 + WAVEFORMAT_LEN);
        let hdrl = 4
            + (8 + AVIH_LEN)
            + (8 + strl_video)
            + audio.map_or(0, |_| 8 + strl_audio);

        out.write_all(b"RIFF")?;
        le32(&mut out, 0)?;
        out.write_all(b"AVI ")?;
        out.write_all(b"LIST")?;
        le32(&mut out, hdrl)?;
        out.write_all(b"hdrl")?;

        out.write_all(b"avih")?;
        le32(&mut out, AVIH_LEN)?;
        patches.avih = out.stream_position()?;
        le32(&mut out, 1_000_000 / fps)?; // dwMicroSecPerFrame
        le32(&mut out, 0)?; // dwMaxBytesPerSec
        le32(&mut out, 0)?; // dwPaddingGranularity
        le32(&mut out, AVIF_HASINDEX)?;
        le32(&mut out, 0)?; // dwTotalFrames
        le32(&mut out, 0)?; // dwInitialFrames
        le32(&mut out, if audio.is_some() { 2 } else { 1 })?;
        le32(&mut out, 0)?; // dwSuggestedBufferSize
        le32(&mut out, width)?;
        le32(&mut out, height)?;
        out.write_all(&[0u8; 16])?;

        out.write_all(b"LIST")?;
        le32(&mut out, strl_video)?;
        out.write_all(b"strl")?;
        out.write_all(b"strh")?;
        le32(&mut out, STRH_LEN)?;
        patches.video_strh = out.stream_position()?;
        out.write_all(b"vids")?;
        out.write_all(b"MJPG")?;
        le32(&mut out, 0)?; // dwFlags
        le16(&mut out, 0)?; // wPriority
        le16(&mut out, 0)?; // wLanguage
        le32(&mut out, 0)?; // dwInitialFrames
        le32(&mut out, 1)?; // dwScale
        le32(&mut out, fps)?; // dwRate
        le32(&mut out, 0)?; // dwStart
        le32(&mut out, 0)?; // dwLength
        le32(&mut out, 0)?; // dwSuggestedBufferSize
        le32(&mut out, u32::MAX)?; // dwQuality
        le32(&mut out, 0)?; // dwSampleSize
        for v in [0u16, 0, width.min(0xFFFF) as u16, height.min(0xFFFF) as u16] {
            le16(&mut out, v)?;
        }
        out.write_all(b"strf")?;
        le32(&mut out, BITMAPINFO_LEN)?;
        le32(&mut out, BITMAPINFO_LEN)?;
        le32(&mut out, width)?;
        le32(&mut out, height)?;
        le16(&mut out, 1)?; // biPlanes
        le16(&mut out, 24)?; // biBitCount
        out.write_all(b"MJPG")?;
        le32(&mut out, width * height * 3)?;
        out.write_all(&[0u8; 16])?;

        if let Some(fmt) = audio {
            let block = fmt.block_align();
            out.write_all(b"LIST")?;
            le32(&mut out, strl_audio)?;
            out.write_all(b"strl")?;
            out.write_all(b"strh")?;
            le32(&mut out, STRH_LEN)?;
            patches.audio_strh = Some(out.stream_position()?);
            out.write_all(b"auds")?;
            le32(&mut out, 0)?; // fccHandler
            le32(&mut out, 0)?;
            le16(&mut out, 0)?;
            le16(&mut out, 0)?;
            le32(&mut out, 0)?;
            le32(&mut out, block)?; // dwScale
            le32(&mut out, fmt.sample_rate * block)?; // dwRate
            le32(&mut out, 0)?;
            le32(&mut out, 0)?; // dwLength
            le32(&mut out, 0)?;
            le32(&mut out, u32::MAX)?;
            le32(&mut out, block)?; // dwSampleSize
            out.write_all(&[0u8; 8])?;
            out.write_all(b"strf")?;
            le32(&mut out, WAVEFORMAT_LEN)?;
            le16(&mut out, 1)?; // WAVE_FORMAT_PCM
            le16(&mut out, fmt.channels)?;
            le32(&mut out, fmt.sample_rate)?;
            le32(&mut out, fmt.sample_rate * block)?;
            le16(&mut out, block as u16)?;
            le16(&mut out, 16)?;
            le16(&mut out, 0)?; // cbSize
        }

        patches.movi_list = out.stream_position()?;
        out.write_all(b"LIST")?;
        le32(&mut out, 0)?;
        out.write_all(b"movi")?;

        Ok(Self {
            out,
            width,
            height,
            fps,
            audio,
            patches,
            index: Vec::new(),
            frames: 0,
            audio_bytes: 0,
            video_bytes: 0,
            max_chunk: 0,
        })
    }

    fn write_chunk(&mut self, fourcc: [u8; 4], data: &[u8]) -> io::Result<()> {
        let size = u32::try_from(data.len()).map_err(|_| too_large())?;
        let pos = self.out.stream_position()?;
        // Offsets are relative to the 'movi' fourcc.
        let offset = u32::try_from(pos - (self.patches.movi_list + 8)).map_err(|_| too_large())?;
        self.out.write_all(&fourcc)?;
        le32(&mut self.out, size)?;
        self.out.write_all(data)?;
        if size % 2 == 1 {
            self.out.write_all(&[0])?;
        }
        self.index.push(IndexEntry { fourcc, offset, size });
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    /// Append one JPEG-encoded frame.
    pub fn write_video_frame(&mut self, jpeg: &[u8]) -> io::Result<()> {
        self.write_chunk(*b"00dc", jpeg)?;
        self.frames += 1;
        self.video_bytes += jpeg.len() as u64;
        Ok(())
    }

    /// Append interleaved PCM samples. Ignored when the file has no audio.
    pub fn write_audio(&mut self, samples: &[i16]) -> io::Result<()> {
        if self.audio.is_none() || samples.is_empty() {
            return Ok(());
        }
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.write_chunk(*b"01wb", &bytes)?;
        self.audio_bytes += bytes.len() as u64;
        Ok(())
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn patch(&mut self, pos: u64, value: u32) -> io::Result<()> {
        self.out.seek(SeekFrom::Start(pos))?;
        le32(&mut self.out, value)
    }

    /// Write the index and fix up the headers. `duration` is the real span
    /// covered by the frames; the frame rate in the headers follows it so
    /// playback speed matches capture.
    pub fn finish(mut self, duration: Option<Duration>) -> io::Result<W> {
        let idx_len = u32::try_from(self.index.len() * 16).map_err(|_| too_large())?;
        let movi_end = self.out.stream_position()?;
        self.out.write_all(b"idx1")?;
        le32(&mut self.out, idx_len)?;
        for entry in std::mem::take(&mut self.index) {
            self.out.write_all(&entry.fourcc)?;
            le32(&mut self.out, AVIIF_KEYFRAME)?;
            le32(&mut self.out, entry.offset)?;
            le32(&mut self.out, entry.size)?;
        }
        let file_end = self.out.stream_position()?;

        // Frame rate as rate/scale with millisecond precision.
        let (rate, scale) = match duration {
            Some(d) if self.frames > 0 && d.as_micros() > 0 => {
                let millis_fps = (u128::from(self.frames) * 1_000_000_000 / d.as_micros()).max(1);
                (u32::try_from(millis_fps).unwrap_or(u32::MAX), 1000)
            }
            _ => (self.fps, 1),
        };
        let us_per_frame = (u64::from(scale) * 1_000_000 / u64::from(rate.max(1))) as u32;
        let seconds = duration
            .map(|d| d.as_secs_f64())
            .filter(|s| *s > 0.0)
            .unwrap_or(f64::from(self.frames) / f64::from(self.fps));
        let bytes_per_sec = if seconds > 0.0 {
            ((self.video_bytes + self.audio_bytes) as f64 / seconds) as u32
        } else {
            0
        };

        let riff_size = u32::try_from(file_end - 8).map_err(|_| too_large())?;
        let movi_size = u32::try_from(movi_end - self.patches.movi_list - 8).map_err(|_| too_large())?;

        self.patch(4, riff_size)?;
        let avih = self.patches.avih;
        self.patch(avih, us_per_frame)?;
        self.patch(avih + 4, bytes_per_sec)?;
        self.patch(avih + 16, self.frames)?;
        self.patch(avih + 28, self.max_chunk)?;
        let strh = self.patches.video_strh;
        self.patch(strh + 20, scale)?;
        self.patch(strh + 24, rate)?;
        self.patch(strh + 32, self.frames)?;
        self.patch(strh + 36, self.max_chunk)?;
        if let (Some(strh), Some(fmt)) = (self.patches.audio_strh, self.audio) {
            let blocks = (self.audio_bytes / u64::from(fmt.block_align())) as u32;
            self.patch(strh + 32, blocks)?;
        }
        self.patch(self.patches.movi_list + 4, movi_size)?;

        self.out.seek(SeekFrom::Start(file_end))?;
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u32_at(buf: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap())
    }

    fn find(buf: &[u8], needle: &[u8]) -> usize {
        buf.windows(needle.len()).position(|w| w == needle).unwrap()
    }

    #[test]
    fn video_only_layout() {
        let mut avi = AviWriter::new(Cursor::new(Vec::new()), 64, 48, 30, None).unwrap();
        avi.write_video_frame(&[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]).unwrap();
        avi.write_video_frame(&[0xFF, 0xD8, 3, 0xFF, 0xD9]).unwrap();
        let buf = avi.finish(None).unwrap().into_inner();

        assert_eq!(&buf[0..4], b"RIFF");
        assert_eq!(u32_at(&buf, 4) as usize, buf.len() - 8);
        assert_eq!(&buf[8..12], b"AVI ");
        assert_eq!(&buf[24..28], b"avih");
        assert_eq!(u32_at(&buf, 32), 1_000_000 / 30);
        assert_eq!(u32_at(&buf, 48), 2); // dwTotalFrames
        assert_eq!(u32_at(&buf, 56), 1); // dwStreams
        assert_eq!(u32_at(&buf, 64), 64);
        assert_eq!(u32_at(&buf, 68), 48);
        assert_eq!(&buf[108..112], b"vids");
        assert_eq!(&buf[112..116], b"MJPG");
        assert_eq!(u32_at(&buf, 132), 30); // dwRate
        assert_eq!(u32_at(&buf, 140), 2); // dwLength

        let movi = find(&buf, b"movi");
        let movi_size = u32_at(&buf, movi - 4) as usize;
        let idx = find(&buf, b"idx1");
        assert_eq!(movi + movi_size, idx);
        assert_eq!(u32_at(&buf, idx + 4), 32);
        // First index entry points at the first chunk, padded chunk follows.
        assert_eq!(&buf[idx + 8..idx + 12], b"00dc");
        let first = u32_at(&buf, idx + 16) as usize;
        assert_eq!(&buf[movi + first..movi + first + 4], b"00dc");
        let second = u32_at(&buf, idx + 32) as usize;
        assert_eq!(second, first + 8 + 6);
        assert_eq!(u32_at(&buf, idx + 36), 5);
        // Odd-sized chunk padded to even length.
        assert_eq!(buf.len() % 2, 0);
    }

    #[test]
    fn audio_stream_is_declared_and_indexed() {
        let fmt = AudioFormat {
            sample_rate: 44_100,
            channels: 1,
        };
        let mut avi = AviWriter::new(Cursor::new(Vec::new()), 32, 32, 30, Some(fmt)).unwrap();
        avi.write_video_frame(&[1, 2, 3, 4]).unwrap();
        avi.write_audio(&[0i16; 1470]).unwrap();
        let buf = avi.finish(Some(Duration::from_millis(33))).unwrap().into_inner();

        assert_eq!(u32_at(&buf, 56), 2);
        assert!(find(&buf, b"auds") > 0);
        let wb = find(&buf, b"01wb");
        assert_eq!(u32_at(&buf, wb + 4), 2940);
        let auds = find(&buf, b"auds");
        assert_eq!(u32_at(&buf, auds + 32), 1470); // dwLength in blocks
        let idx = find(&buf, b"idx1");
        assert_eq!(u32_at(&buf, idx + 4), 32);
    }

    #[test]
    fn duration_sets_effective_rate() {
        let mut avi = AviWriter::new(Cursor::new(Vec::new()), 8, 8, 30, None).unwrap();
        for _ in 0..10 {
            avi.write_video_frame(&[0; 4]).unwrap();
        }
        let buf = avi.finish(Some(Duration::from_secs(1))).unwrap().into_inner();
        assert_eq!(u32_at(&buf, 128), 1000); // dwScale
        assert_eq!(u32_at(&buf, 132), 10_000); // 10 fps
        assert_eq!(u32_at(&buf, 32), 100_000);
    }

    #[test]
    fn audio_is_ignored_without_audio_stream() {
        let mut avi = AviWriter::new(Cursor::new(Vec::new()), 8, 8, 30, None).unwrap();
        avi.write_audio(&[1, 2, 3]).unwrap();
        let buf = avi.finish(None).unwrap().into_inner();
        assert!(buf.windows(4).all(|w| w != b"01wb"));
    }
}
