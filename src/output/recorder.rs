use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::camera::backend::AudioCapture;
use crate::camera::types::Resolution;
use crate::effects::compositor::Stages;
use crate::frame::FrameBuffer;
use crate::output::avi::{AudioFormat, AviWriter};
use crate::output::compress::encode_jpeg;
use crate::output::error::{OutputError, Result};

/// Per-recording choices made at `startRecording`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordingOptions {
    pub stages: Stages,
    pub max_duration: Option<Duration>,
    pub path: Option<PathBuf>,
}

/// What `stopRecording` hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    pub path: String,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub has_audio: bool,
}

/// Streams composited frames into an MJPEG AVI file.
///
/// Writes go to `<path>.part`, renamed over `path` once finished.
pub struct Recorder {
    writer: AviWriter<BufWriter<File>>,
    path: PathBuf,
    part_path: PathBuf,
    resolution: Resolution,
    fps: u32,
    quality: u8,
    options: RecordingOptions,
    audio: Option<Box<dyn AudioCapture>>,
    has_audio: bool,
    audio_rate: u32,
    audio_channels: u16,
    audio_frames: u64,
    first_ts: Option<u64>,
    last_ts: u64,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("path", &self.path)
            .field("resolution", &self.resolution)
            .field("frames", &self.writer.frames())
            .finish_non_exhaustive()
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl Recorder {
    pub fn create(
        path: PathBuf,
        resolution: Resolution,
        fps: u32,
        quality: u8,
        audio: Option<Box<dyn AudioCapture>>,
        options: RecordingOptions,
    ) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| OutputError::io(parent, e))?;
        }
        let part_path = part_path(&path);
        let file = File::create(&part_path).map_err(|e| OutputError::io(&part_path, e))?;

        let format = audio.as_ref().map(|a| AudioFormat {
            sample_rate: a.sample_rate(),
            channels: a.channels().max(1),
        });
        let writer = AviWriter::new(
            BufWriter::new(file),
            resolution.width,
            resolution.height,
            fps,
            format,
        )
        .map_err(|e| OutputError::io(&part_path, e))?;

        info!(
            path = %path.display(),
            resolution = %resolution,
            fps,
            audio = format.is_some(),
            "recording started"
        );
        Ok(Self {
            writer,
            path,
            part_path,
            resolution,
            fps: fps.max(1),
            quality,
            options,
            has_audio: format.is_some(),
            audio_rate: format.map_or(0, |f| f.sample_rate),
            audio_channels: format.map_or(1, |f| f.channels),
            audio,
            audio_frames: 0,
            first_ts: None,
            last_ts: 0,
        })
    }

    pub fn stages(&self) -> Stages {
        self.options.stages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u32 {
        self.writer.frames()
    }

    /// Append a composited frame and the audio captured alongside it.
    pub fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()> {
        if frame.resolution() != self.resolution {
            warn!(
                expected = %self.resolution,
                actual = %frame.resolution(),
                "skipping frame with unexpected size"
            );
            return Ok(());
        }
        if frame.timestamp_us < self.last_ts {
            debug!(ts = frame.timestamp_us, last = self.last_ts, "skipping out-of-order frame");
            return Ok(());
        }

        let jpeg = encode_jpeg(frame, self.quality)?;
        self.writer
            .write_video_frame(&jpeg)
            .map_err(|e| OutputError::io(&self.part_path, e))?;
        let first = *self.first_ts.get_or_insert(frame.timestamp_us);
        self.last_ts = frame.timestamp_us;

        self.pull_audio(frame.timestamp_us - first + self.frame_period_us())
    }

    /// Read whatever audio is due up to `elapsed_us` into the file.
    fn pull_audio(&mut self, elapsed_us: u64) -> Result<()> {
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        let due = elapsed_us * u64::from(self.audio_rate) / 1_000_000;
        let wanted = due.saturating_sub(self.audio_frames) as usize;
        if wanted == 0 {
            return Ok(());
        }
        match audio.read_samples(wanted) {
            Ok(samples) => {
                self.audio_frames += (samples.len() / usize::from(self.audio_channels)) as u64;
                self.writer
                    .write_audio(&samples)
                    .map_err(|e| OutputError::io(&self.part_path, e))?;
            }
            Err(e) => {
                // The stream header stays; the track just ends early.
                warn!("audio capture failed, continuing without audio: {e}");
                self.audio = None;
            }
        }
        Ok(())
    }

    fn frame_period_us(&self) -> u64 {
        1_000_000 / u64::from(self.fps)
    }

    /// Time covered by the frames written so far.
    pub fn duration(&self) -> Duration {
        match self.first_ts {
            Some(first) => {
                Duration::from_micros(self.last_ts - first + self.frame_period_us())
            }
            None => Duration::ZERO,
        }
    }

    /// Whether the optional max duration has been reached.
    pub fn reached_limit(&self) -> bool {
        self.options
            .max_duration
            .is_some_and(|max| self.duration() >= max)
    }

    /// Finalize the container and move it into place.
    pub fn finish(self) -> Result<RecordingResult> {
        let duration = self.duration();
        let frames = self.writer.frames();
        let buffered = self
            .writer
            .finish((frames > 0).then_some(duration))
            .map_err(|e| OutputError::io(&self.part_path, e))?;
        let file = buffered
            .into_inner()
            .map_err(|e| OutputError::io(&self.part_path, e.into_error()))?;
        file.sync_all().map_err(|e| OutputError::io(&self.part_path, e))?;
        drop(file);
        std::fs::rename(&self.part_path, &self.path).map_err(|e| OutputError::io(&self.path, e))?;

        info!(
            path = %self.path.display(),
            frames,
            duration_ms = duration.as_millis() as u64,
            "recording finished"
        );
        Ok(RecordingResult {
            path: self.path.to_string_lossy().into_owned(),
            duration_ms: duration.as_millis() as u64,
            width: self.resolution.width,
            height: self.resolution.height,
            fps: self.fps,
            has_audio: self.has_audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::error::CameraError;
    use crate::frame::Rgba;
    use tempfile::TempDir;

    struct Silence;

    impl AudioCapture for Silence {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn read_samples(&mut self, frames: usize) -> crate::camera::error::Result<Vec<i16>> {
            Ok(vec![0; frames])
        }
    }

    struct BrokenMic;

    impl AudioCapture for BrokenMic {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn read_samples(&mut self, _frames: usize) -> crate::camera::error::Result<Vec<i16>> {
            Err(CameraError::Audio("unplugged".into()))
        }
    }

    fn frame(ts: u64) -> FrameBuffer {
        FrameBuffer::solid(32, 24, Rgba::opaque(10, 200, 10), ts)
    }

    fn create(dir: &TempDir, audio: Option<Box<dyn AudioCapture>>, options: RecordingOptions) -> Recorder {
        Recorder::create(
            dir.path().join("clip.avi"),
            Resolution::new(32, 24),
            10,
            80,
            audio,
            options,
        )
        .unwrap()
    }

    #[test]
    fn writes_finished_file() {
        let dir = TempDir::new().unwrap();
        let mut rec = create(&dir, Some(Box::new(Silence)), RecordingOptions::default());
        for i in 0..5 {
            rec.write_frame(&frame(i * 100_000)).unwrap();
        }
        let result = rec.finish().unwrap();
        assert_eq!(result.duration_ms, 500);
        assert_eq!((result.width, result.height, result.fps), (32, 24, 10));
        assert!(result.has_audio);

        let bytes = std::fs::read(dir.path().join("clip.avi")).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert!(!dir.path().join("clip.avi.part").exists());
    }

    #[test]
    fn empty_recording_has_zero_duration() {
        let dir = TempDir::new().unwrap();
        let rec = create(&dir, None, RecordingOptions::default());
        let result = rec.finish().unwrap();
        assert_eq!(result.duration_ms, 0);
        assert!(!result.has_audio);
    }

    #[test]
    fn max_duration_limit() {
        let dir = TempDir::new().unwrap();
        let options = RecordingOptions {
            max_duration: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        let mut rec = create(&dir, None, options);
        rec.write_frame(&frame(0)).unwrap();
        assert!(!rec.reached_limit());
        rec.write_frame(&frame(200_000)).unwrap();
        assert!(rec.reached_limit());
    }

    #[test]
    fn skips_mismatched_and_out_of_order_frames() {
        let dir = TempDir::new().unwrap();
        let mut rec = create(&dir, None, RecordingOptions::default());
        rec.write_frame(&frame(100_000)).unwrap();
        rec.write_frame(&frame(50_000)).unwrap();
        rec.write_frame(&FrameBuffer::solid(8, 8, Rgba::default(), 200_000))
            .unwrap();
        assert_eq!(rec.frames(), 1);
    }

    #[test]
    fn audio_failure_does_not_stop_video() {
        let dir = TempDir::new().unwrap();
        let mut rec = create(&dir, Some(Box::new(BrokenMic)), RecordingOptions::default());
        rec.write_frame(&frame(0)).unwrap();
        rec.write_frame(&frame(100_000)).unwrap();
        assert_eq!(rec.frames(), 2);
        assert!(rec.finish().unwrap().has_audio);
    }

    #[test]
    fn result_serialises_camel_case() {
        let result = RecordingResult {
            path: "/tmp/a.avi".into(),
            duration_ms: 1,
            width: 2,
            height: 3,
            fps: 30,
            has_audio: false,
        };
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["durationMs"], 1);
        assert_eq!(json["hasAudio"], false);
    }
}
