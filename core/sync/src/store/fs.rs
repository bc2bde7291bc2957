//! Image cache in a local directory.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use notesync_common::{Error, Result};

use super::ImageStore;

const PART_SUFFIX: &str = ".part";

/// Stores each image as `<root>/<filename>`.
pub struct DirImageStore {
    root: PathBuf,
}

impl DirImageStore {
    /// Use `root`, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// `<local data dir>/notesync/images` for the current user.
    pub fn default_location() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|dir| dir.join("notesync").join("images"))
            .ok_or_else(|| Error::Storage("No local data directory for this user".to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, filename: &str) -> Result<PathBuf> {
        let valid = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.ends_with(PART_SUFFIX)
            && !filename.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::InvalidInput(format!(
                "Invalid image file name: {:?}",
                filename
            )));
        }
        Ok(self.root.join(filename))
    }
}

fn map_io(err: std::io::Error, filename: &str) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound(format!("Image {} not found", filename)),
        _ => Error::Io(err),
    }
}

#[async_trait]
impl ImageStore for DirImageStore {
    async fn contains(&self, filename: &str) -> Result<bool> {
        let path = self.file_path(filename)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.file_path(filename)?;
        fs::read(&path).await.map_err(|e| map_io(e, filename))
    }

    async fn write(&self, filename: &str, data: Vec<u8>) -> Result<()> {
        let path = self.file_path(filename)?;
        let part = self.root.join(format!("{}{}", filename, PART_SUFFIX));
        fs::write(&part, &data).await?;
        fs::rename(&part, &path).await?;
        debug!("Stored image {} ({} bytes)", filename, data.len());
        Ok(())
    }

    async fn remove(&self, filename: &str) -> Result<()> {
        let path = self.file_path(filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let store = DirImageStore::new(dir.path().join("images")).unwrap();

        assert!(!store.contains("a.jpg").await.unwrap());
        store.write("a.jpg", b"jpeg".to_vec()).await.unwrap();
        assert!(store.contains("a.jpg").await.unwrap());
        assert_eq!(store.read("a.jpg").await.unwrap(), b"jpeg");
        assert!(!dir.path().join("images/a.jpg.part").exists());

        store.remove("a.jpg").await.unwrap();
        store.remove("a.jpg").await.unwrap();
        assert!(store.read("a.jpg").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let store = DirImageStore::new(dir.path()).unwrap();
        for name in ["", "..", "../x", "a/b", "x.part"] {
            assert!(
                matches!(store.write(name, vec![]).await, Err(Error::InvalidInput(_))),
                "{:?} accepted",
                name
            );
        }
    }
}
