//! Crash behaviour of the save protocol
//!
//! A crash between staging and publishing is simulated by leaking the staged
//! descriptor, which leaves its temporary file on disk exactly as a killed
//! process would.

use std::fs;
use std::path::Path;

use block_meta::{
    read, save, BlockDescriptor, BlockId, DescriptorStore, Extension, FileEntry, MetaError,
};

fn descriptor(ms: u64, max_time: i64) -> BlockDescriptor {
    BlockDescriptor::new_leaf(
        BlockId::from_parts(ms, 99),
        0,
        max_time,
        Extension::new("compactor")
            .with_label("tenant", "team-a")
            .with_file(FileEntry::new("chunks/000001", 1024))
            .with_file(FileEntry::unrecorded("meta.json")),
    )
}

fn count_temp_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            let name = e.as_ref().unwrap().file_name();
            name.to_string_lossy().ends_with(".tmp")
        })
        .count()
}

#[test]
fn test_crash_before_swap_keeps_previous() {
    let dir = tempfile::tempdir().unwrap();
    let store = DescriptorStore::default();
    let previous = descriptor(1, 100);
    save(dir.path(), &previous).unwrap();

    let staged = store.stage(dir.path(), &descriptor(2, 200)).unwrap();
    std::mem::forget(staged);

    assert_eq!(count_temp_files(dir.path()), 1);
    assert_eq!(read(dir.path()).unwrap(), previous);
}

#[test]
fn test_crash_before_first_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = DescriptorStore::default();

    let staged = store.stage(dir.path(), &descriptor(1, 100)).unwrap();
    std::mem::forget(staged);

    assert!(matches!(read(dir.path()), Err(MetaError::NotFound { .. })));
}

#[test]
fn test_truncated_temp_is_never_read() {
    let dir = tempfile::tempdir().unwrap();
    let previous = descriptor(1, 100);
    save(dir.path(), &previous).unwrap();

    let full = block_meta::encode(&descriptor(2, 200)).unwrap();
    fs::write(dir.path().join("meta.json.Xk2p9Q.tmp"), &full[..full.len() / 2]).unwrap();

    assert_eq!(read(dir.path()).unwrap(), previous);
}

#[test]
fn test_recovery_after_crash() {
    let dir = tempfile::tempdir().unwrap();
    let store = DescriptorStore::default();
    save(dir.path(), &descriptor(1, 100)).unwrap();

    std::mem::forget(store.stage(dir.path(), &descriptor(2, 200)).unwrap());
    assert_eq!(store.sweep_temp(dir.path()).unwrap(), 1);
    assert_eq!(count_temp_files(dir.path()), 0);

    let next = descriptor(3, 300);
    store.save(dir.path(), &next).unwrap();
    assert_eq!(read(dir.path()).unwrap(), next);
}

#[test]
fn test_publish_after_stage() {
    let dir = tempfile::tempdir().unwrap();
    let store = DescriptorStore::default();
    save(dir.path(), &descriptor(1, 100)).unwrap();

    let next = descriptor(2, 200);
    let staged = store.stage(dir.path(), &next).unwrap();
    assert_eq!(read(dir.path()).unwrap().block.max_time, 100);

    staged.publish().unwrap();
    assert_eq!(read(dir.path()).unwrap(), next);
    assert_eq!(count_temp_files(dir.path()), 0);
}
