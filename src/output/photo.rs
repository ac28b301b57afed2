use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Serialize, Serializer};

use crate::effects::compositor::Stages;
use crate::frame::FrameBuffer;
use crate::output::compress::encode_jpeg;
use crate::output::error::Result;
use crate::output::gallery::MediaLibrary;
use crate::output::{media_file_name, write_atomic};

/// Per-capture choices for `takePhoto`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotoOptions {
    pub stages: Stages,
    pub save_to_gallery: bool,
    pub path: Option<PathBuf>,
}

/// An encoded photo. `path` is empty when it was not written anywhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub path: String,
    pub width: u32,
    pub height: u32,
    #[serde(serialize_with = "as_base64")]
    pub bytes: Vec<u8>,
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Encode a composited frame and store it where the options ask.
pub fn store_photo(
    frame: &FrameBuffer,
    options: &PhotoOptions,
    quality: u8,
    library: Option<&dyn MediaLibrary>,
) -> Result<CaptureResult> {
    let bytes = encode_jpeg(frame, quality)?;

    let mut path = String::new();
    if let Some(target) = &options.path {
        write_atomic(target, &bytes)?;
        path = target.to_string_lossy().into_owned();
    }
    if options.save_to_gallery {
        if let Some(library) = library {
            let saved = library.save_photo(&media_file_name("IMG", "jpg"), &bytes)?;
            if path.is_empty() {
                path = saved.to_string_lossy().into_owned();
            }
        }
    }

    tracing::debug!(
        width = frame.width(),
        height = frame.height(),
        bytes = bytes.len(),
        path = %path,
        "photo captured"
    );
    Ok(CaptureResult {
        path,
        width: frame.width(),
        height: frame.height(),
        bytes,
    })
}
