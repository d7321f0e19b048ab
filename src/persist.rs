//! Reading and atomically publishing descriptors in block directories
//!
//! Readers never take locks. A save writes the new descriptor to a
//! temporary file next to the canonical one, fsyncs it, then renames it over
//! the canonical file, so a concurrent reader sees either the old or the new
//! descriptor in full. A writer that dies before the rename leaves only a
//! stray temporary file, which readers never open and
//! [`DescriptorStore::sweep_temp`] can remove later.
//!
//! At most one writer may target a given block directory at a time.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::codec;
use crate::config::{StoreConfig, TEMP_RAND_LEN};
use crate::error::{MetaError, Result};
use crate::schema::BlockDescriptor;

/// Reads and writes descriptors according to a [`StoreConfig`]
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    config: StoreConfig,
}

impl DescriptorStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the canonical descriptor inside `dir`
    pub fn path(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(&self.config.filename)
    }

    /// Load, decode and validate the descriptor stored in `dir`
    pub fn read(&self, dir: impl AsRef<Path>) -> Result<BlockDescriptor> {
        let path = self.path(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MetaError::NotFound { path });
            }
            Err(e) => return Err(MetaError::Io(e)),
        };

        let descriptor = codec::decode(&bytes)?;
        tracing::debug!(path = %path.display(), id = %descriptor.id(), "read block descriptor");
        Ok(descriptor)
    }

    /// Validate, encode and write a descriptor into `sink`
    pub fn write<W: Write>(&self, sink: W, descriptor: &BlockDescriptor) -> Result<()> {
        write(sink, descriptor)
    }

    /// Write a descriptor to a durable temporary file in `dir`
    ///
    /// Nothing is visible at the canonical path until
    /// [`StagedDescriptor::publish`] is called. Dropping the staged
    /// descriptor removes the temporary file.
    pub fn stage(&self, dir: impl AsRef<Path>, descriptor: &BlockDescriptor) -> Result<StagedDescriptor> {
        let dir = dir.as_ref();
        let bytes = codec::encode(descriptor)?;

        let mut temp = tempfile::Builder::new()
            .prefix(&self.config.temp_prefix())
            .suffix(&self.config.temp_suffix)
            .rand_bytes(TEMP_RAND_LEN)
            .tempfile_in(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Readers are usually other users' processes.
            temp.as_file().set_permissions(fs::Permissions::from_mode(0o644))?;
        }

        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;

        tracing::debug!(
            temp = %temp.path().display(),
            id = %descriptor.id(),
            bytes = bytes.len(),
            "staged block descriptor"
        );

        Ok(StagedDescriptor {
            temp: Some(temp),
            target: self.path(dir),
            dir: dir.to_path_buf(),
            sync_dir: self.config.sync_dir,
        })
    }

    /// Atomically replace the descriptor stored in `dir`
    ///
    /// On failure the previously published descriptor, if any, is left
    /// untouched and no temporary file remains.
    pub fn save(&self, dir: impl AsRef<Path>, descriptor: &BlockDescriptor) -> Result<()> {
        self.stage(dir, descriptor)?.publish()
    }

    /// Remove temporary files left behind by writers that crashed
    ///
    /// Must not run while a writer is staging into the same directory.
    pub fn sweep_temp(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.config.is_temp_name(name) || !entry.file_type()?.is_file() {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::warn!(path = %entry.path().display(), "removed stray descriptor temp file");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(MetaError::Io(e)),
            }
        }
        Ok(removed)
    }
}

/// A descriptor written and flushed to a temporary file, awaiting publish
#[derive(Debug)]
pub struct StagedDescriptor {
    temp: Option<NamedTempFile>,
    target: PathBuf,
    dir: PathBuf,
    sync_dir: bool,
}

impl StagedDescriptor {
    /// Path of the temporary file
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_ref().map(|t| t.path())
    }

    /// Canonical path this descriptor will be published to
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically rename the temporary file over the canonical path
    pub fn publish(mut self) -> Result<()> {
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };

        // On failure the returned handle is dropped, removing the temp file.
        temp.persist(&self.target).map_err(|e| MetaError::Io(e.error))?;

        if self.sync_dir {
            sync_dir(&self.dir)?;
        }

        tracing::debug!(path = %self.target.display(), "published block descriptor");
        Ok(())
    }
}

impl Drop for StagedDescriptor {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            tracing::warn!(
                temp = %temp.path().display(),
                target = %self.target.display(),
                "discarding unpublished block descriptor"
            );
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Read the descriptor in `dir` with the default configuration
pub fn read(dir: impl AsRef<Path>) -> Result<BlockDescriptor> {
    DescriptorStore::default().read(dir)
}

/// Validate, encode and write a descriptor into `sink`
///
/// The full encoding is produced before anything reaches the sink, so a
/// descriptor that fails validation writes nothing.
pub fn write<W: Write>(mut sink: W, descriptor: &BlockDescriptor) -> Result<()> {
    let bytes = codec::encode(descriptor)?;
    sink.write_all(&bytes)?;
    sink.flush()?;
    Ok(())
}

/// Atomically save a descriptor into `dir` with the default configuration
pub fn save(dir: impl AsRef<Path>, descriptor: &BlockDescriptor) -> Result<()> {
    DescriptorStore::default().save(dir, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BlockId;
    use crate::schema::{Extension, FileEntry};
    use tempfile::tempdir;

    fn descriptor(max_time: i64) -> BlockDescriptor {
        BlockDescriptor::new_leaf(
            BlockId::from_parts(42, 7),
            0,
            max_time,
            Extension::new("sidecar")
                .with_label("replica", "a")
                .with_file(FileEntry::new("index", 12))
                .with_file(FileEntry::unrecorded("meta.json")),
        )
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_read_missing() {
        let dir = tempdir().unwrap();
        let err = read(dir.path()).unwrap_err();
        assert!(matches!(err, MetaError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_save_then_read() {
        let dir = tempdir().unwrap();
        save(dir.path(), &descriptor(100)).unwrap();
        assert_eq!(read(dir.path()).unwrap(), descriptor(100));
        assert_eq!(entries(dir.path()), vec!["meta.json"]);
    }

    #[test]
    fn test_save_replaces() {
        let dir = tempdir().unwrap();
        save(dir.path(), &descriptor(100)).unwrap();
        save(dir.path(), &descriptor(200)).unwrap();
        assert_eq!(read(dir.path()).unwrap().block.max_time, 200);
        assert_eq!(entries(dir.path()), vec!["meta.json"]);
    }

    #[test]
    fn test_saved_bytes_are_canonical() {
        let dir = tempdir().unwrap();
        let d = descriptor(100);
        save(dir.path(), &d).unwrap();
        let on_disk = fs::read(dir.path().join("meta.json")).unwrap();
        assert_eq!(on_disk, codec::encode(&d).unwrap());
    }

    #[test]
    fn test_invalid_save_leaves_previous() {
        let dir = tempdir().unwrap();
        save(dir.path(), &descriptor(100)).unwrap();

        let mut bad = descriptor(100);
        bad.block.min_time = 500;
        let err = save(dir.path(), &bad).unwrap_err();
        assert!(matches!(err, MetaError::Validation { .. }));

        assert_eq!(read(dir.path()).unwrap(), descriptor(100));
        assert_eq!(entries(dir.path()), vec!["meta.json"]);
    }

    #[test]
    fn test_dropped_stage_is_discarded() {
        let dir = tempdir().unwrap();
        save(dir.path(), &descriptor(100)).unwrap();

        let store = DescriptorStore::default();
        let staged = store.stage(dir.path(), &descriptor(200)).unwrap();
        let temp = staged.temp_path().unwrap().to_path_buf();
        assert!(temp.exists());
        assert_eq!(staged.target(), dir.path().join("meta.json"));
        drop(staged);

        assert!(!temp.exists());
        assert_eq!(read(dir.path()).unwrap().block.max_time, 100);
    }

    #[test]
    fn test_save_into_missing_dir() {
        let dir = tempdir().unwrap();
        let err = save(dir.path().join("absent"), &descriptor(100)).unwrap_err();
        assert!(matches!(err, MetaError::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_read_corrupt_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("meta.json"), b"{\"ulid\": \"0000").unwrap();
        assert!(matches!(read(dir.path()), Err(MetaError::Parse(_))));
    }

    #[test]
    fn test_sweep_temp() {
        let dir = tempdir().unwrap();
        save(dir.path(), &descriptor(100)).unwrap();
        fs::write(dir.path().join("meta.json.abc123.tmp"), b"{\"ulid\"").unwrap();
        fs::write(dir.path().join("meta.json.tmp"), b"").unwrap();
        fs::write(dir.path().join("index"), b"data").unwrap();

        let store = DescriptorStore::default();
        assert_eq!(store.sweep_temp(dir.path()).unwrap(), 1);
        assert_eq!(entries(dir.path()), vec!["index", "meta.json", "meta.json.tmp"]);
        assert_eq!(store.sweep_temp(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_sweep_with_empty_suffix_keeps_backups() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(StoreConfig {
            temp_suffix: String::new(),
            ..StoreConfig::default()
        });
        store.save(dir.path(), &descriptor(100)).unwrap();
        fs::write(dir.path().join("meta.json.bak"), b"previous").unwrap();
        std::mem::forget(store.stage(dir.path(), &descriptor(200)).unwrap());

        assert_eq!(store.sweep_temp(dir.path()).unwrap(), 1);
        assert_eq!(entries(dir.path()), vec!["meta.json", "meta.json.bak"]);
        assert_eq!(fs::read(dir.path().join("meta.json.bak")).unwrap(), b"previous");
    }

    #[test]
    fn test_unreadable_descriptor_is_io() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("meta.json")).unwrap();

        let err = read(dir.path()).unwrap_err();
        assert!(matches!(err, MetaError::Io(_)), "{err}");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_custom_filename() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(StoreConfig {
            filename: "descriptor.json".to_string(),
            sync_dir: false,
            ..StoreConfig::default()
        });
        store.save(dir.path(), &descriptor(100)).unwrap();

        assert_eq!(entries(dir.path()), vec!["descriptor.json"]);
        assert_eq!(store.read(dir.path()).unwrap(), descriptor(100));
        assert!(matches!(read(dir.path()), Err(MetaError::NotFound { .. })));
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_errors() {
        assert!(matches!(write(FailingSink, &descriptor(100)), Err(MetaError::Io(_))));

        let mut buf = Vec::new();
        let mut bad = descriptor(100);
        bad.block.compaction.sources.clear();
        assert!(write(&mut buf, &bad).is_err());
        assert!(buf.is_empty());
    }
}
