// Output sinks: preview surfaces, photos, recordings and the gallery.

pub mod avi;
pub mod compress;
pub mod error;
pub mod gallery;
pub mod photo;
pub mod preview;
pub mod recorder;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::output::error::{OutputError, Result};

/// Write `bytes` to `path` atomically (write .tmp then rename).
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| OutputError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes).map_err(|e| OutputError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| OutputError::io(path, e))?;
    Ok(())
}

/// `<prefix>_<unix millis>_<counter>.<ext>`, unique within the process.
pub(crate) fn media_file_name(prefix: &str, ext: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{millis}_{n}.{ext}")
}
