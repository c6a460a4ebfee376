//! Local file system boundary.
//!
//! Data assets are read from and written to the local store through this
//! trait so hosts can substitute their own storage. `LocalFileSystem` keeps
//! every path under one root directory.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite};

pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Open a file for reading, returning the stream and its length.
    async fn open_read(&self, path: &Path) -> io::Result<(ReadStream, u64)>;

    /// Create (or truncate) a file for writing. Parent directories are created.
    async fn create(&self, path: &Path) -> io::Result<WriteStream>;

    async fn len(&self, path: &Path) -> io::Result<u64>;

    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Move a file, replacing the destination.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// File system rooted at a directory. Relative paths only.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path under the root, rejecting anything that could
    /// escape it.
    pub fn resolve(&self, relative: &Path) -> io::Result<PathBuf> {
        if relative.as_os_str().is_empty() {
            return Err(invalid("Empty path not allowed".to_string()));
        }
        if relative.is_absolute() {
            return Err(invalid(format!(
                "Absolute paths not allowed: {}",
                relative.display()
            )));
        }
        for component in relative.components() {
            match component {
                Component::ParentDir => {
                    return Err(invalid(format!(
                        "Path traversal not allowed: {}",
                        relative.display()
                    )));
                }
                Component::Prefix(_) | Component::RootDir => {
                    return Err(invalid(format!(
                        "Rooted paths not allowed: {}",
                        relative.display()
                    )));
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }
        Ok(self.root.join(relative))
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn open_read(&self, path: &Path) -> io::Result<(ReadStream, u64)> {
        let full = self.resolve(path)?;
        let file = File::open(&full).await?;
        let len = file.metadata().await?.len();
        Ok((Box::new(file), len))
    }

    async fn create(&self, path: &Path) -> io::Result<WriteStream> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&full).await?;
        Ok(Box::new(file))
    }

    async fn len(&self, path: &Path) -> io::Result<u64> {
        let full = self.resolve(path)?;
        Ok(fs::metadata(&full).await?.len())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from, &to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_resolve_rejects_escapes() {
        let fs = LocalFileSystem::new("/data");
        assert!(fs.resolve(Path::new("")).is_err());
        assert!(fs.resolve(Path::new("/etc/passwd")).is_err());
        assert!(fs.resolve(Path::new("../secret")).is_err());
        assert!(fs.resolve(Path::new("a/../../b")).is_err());
        assert_eq!(
            fs.resolve(Path::new("./a/b.bin")).unwrap(),
            PathBuf::from("/data/./a/b.bin")
        );
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new(temp.path());

        let mut writer = fs.create(Path::new("nested/dir/file.bin")).await.unwrap();
        writer.write_all(b"payload").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let (mut reader, len) = fs.open_read(Path::new("nested/dir/file.bin")).await.unwrap();
        assert_eq!(len, 7);
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"payload");
        assert_eq!(fs.len(Path::new("nested/dir/file.bin")).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_rename_and_remove() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new(temp.path());
        std::fs::write(temp.path().join("a.tmp"), b"x").unwrap();

        fs.rename(Path::new("a.tmp"), Path::new("out/a.bin"))
            .await
            .unwrap();
        assert!(temp.path().join("out/a.bin").exists());
        assert!(!temp.path().join("a.tmp").exists());

        fs.remove(Path::new("out/a.bin")).await.unwrap();
        assert!(!temp.path().join("out/a.bin").exists());
    }
}
