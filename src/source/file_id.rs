use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Identity of a file that survives renames: device + inode on Unix.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        // No inode available: use creation time as a proxy
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        if let Ok(created) = metadata.created() {
            created.hash(&mut hasher);
        }
        Self {
            dev: 0,
            ino: hasher.finish(),
        }
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_survives_rename() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&original, "line\n").unwrap();

        let before = FileId::from_path(&original).unwrap();
        std::fs::rename(&original, &rotated).unwrap();
        let after = FileId::from_path(&rotated).unwrap();
        assert_eq!(before, after);

        std::fs::write(&original, "new\n").unwrap();
        assert_ne!(FileId::from_path(&original).unwrap(), before);
    }
}
