use std::path::{Path, PathBuf};

use tracing::info;

use crate::output::error::{OutputError, Result};
use crate::output::write_atomic;

/// Where finished photos and videos are published for the user.
pub trait MediaLibrary: Send + Sync {
    /// Store an encoded photo under `name`, returning where it landed.
    fn save_photo(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf>;

    /// Copy a finished recording into the library.
    fn save_video(&self, path: &Path) -> Result<PathBuf>;
}

/// A plain directory acting as the gallery.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl MediaLibrary for DirectoryLibrary {
    fn save_photo(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf> {
        let dest = self.root.join(name);
        write_atomic(&dest, jpeg)?;
        info!(path = %dest.display(), "photo saved to gallery");
        Ok(dest)
    }

    fn save_video(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| OutputError::Encode(format!("{} has no file name", path.display())))?;
        let dest = self.root.join(name);
        std::fs::create_dir_all(&self.root).map_err(|e| OutputError::io(&self.root, e))?;
        let tmp = dest.with_extension("tmp");
        std::fs::copy(path, &tmp).map_err(|e| OutputError::io(path, e))?;
        std::fs::rename(&tmp, &dest).map_err(|e| OutputError::io(&dest, e))?;
        info!(path = %dest.display(), "video saved to gallery");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn saves_photos_and_videos() {
        let dir = TempDir::new().unwrap();
        let library = DirectoryLibrary::new(dir.path().join("gallery"));

        let photo = library.save_photo("IMG_1.jpg", &[0xFF, 0xD8]).unwrap();
        assert_eq!(std::fs::read(&photo).unwrap(), vec![0xFF, 0xD8]);

        let clip = dir.path().join("clip.avi");
        std::fs::write(&clip, b"RIFF").unwrap();
        let saved = library.save_video(&clip).unwrap();
        assert_eq!(saved, dir.path().join("gallery").join("clip.avi"));
        assert!(clip.exists());
    }

    #[test]
    fn missing_video_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let library = DirectoryLibrary::new(dir.path());
        assert!(matches!(
            library.save_video(&dir.path().join("missing.avi")),
            Err(OutputError::Io { .. })
        ));
    }
}
