use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "streamcrab-{prefix}-{}-{nanos}",
        std::process::id()
    ))
}

#[test]
fn test_in_memory_spill_roundtrip() {
    let storage = InMemorySpillStorage::new();
    let handle = storage.allocate_spill_target(ChannelId(3)).unwrap();
    assert_eq!(handle.channel_id(), ChannelId(3));

    storage.append_bytes(&handle, &[1, 2]).unwrap();
    storage.append_bytes(&handle, &[3]).unwrap();
    assert_eq!(storage.read_all(&handle).unwrap(), vec![1, 2, 3]);
    assert_eq!(storage.live_targets().unwrap(), 1);

    storage.release(handle).unwrap();
    assert_eq!(storage.live_targets().unwrap(), 0);
}

#[test]
fn test_in_memory_targets_are_isolated() {
    let storage = InMemorySpillStorage::new();
    let a = storage.allocate_spill_target(ChannelId(0)).unwrap();
    let b = storage.allocate_spill_target(ChannelId(1)).unwrap();
    assert_ne!(a.id(), b.id());

    storage.append_bytes(&a, b"aaa").unwrap();
    storage.append_bytes(&b, b"b").unwrap();
    assert_eq!(storage.read_all(&a).unwrap(), b"aaa".to_vec());
    assert_eq!(storage.read_all(&b).unwrap(), b"b".to_vec());
}

#[test]
fn test_in_memory_release_unknown_target_fails() {
    let storage = InMemorySpillStorage::new();
    let err = storage
        .release(SpillHandle::new(42, ChannelId(0)))
        .unwrap_err();
    assert!(err.to_string().contains("released twice"));
}

#[test]
fn test_fs_spill_roundtrip() {
    let path = unique_temp_dir("spill-storage");
    let storage = FsSpillStorage::new(&path).unwrap();

    let handle = storage.allocate_spill_target(ChannelId(1)).unwrap();
    storage.append_bytes(&handle, &[9, 8]).unwrap();
    storage.append_bytes(&handle, &[7]).unwrap();
    assert_eq!(storage.read_all(&handle).unwrap(), vec![9, 8, 7]);

    let file = path.join(format!("spill-1-{}.bin", handle.id()));
    assert!(file.exists());
    storage.release(handle).unwrap();
    assert!(!file.exists());

    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_fs_spill_skips_existing_files() {
    let path = unique_temp_dir("spill-collide");
    let first = FsSpillStorage::new(&path).unwrap();
    let second = FsSpillStorage::new(&path).unwrap();

    let a = first.allocate_spill_target(ChannelId(0)).unwrap();
    let b = second.allocate_spill_target(ChannelId(0)).unwrap();
    assert_ne!(a.id(), b.id());

    first.release(a).unwrap();
    second.release(b).unwrap();
    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_fs_read_missing_target_fails() {
    let path = unique_temp_dir("spill-missing");
    let storage = FsSpillStorage::new(&path).unwrap();
    let err = storage
        .read_all(&SpillHandle::new(5, ChannelId(2)))
        .unwrap_err();
    assert!(err.to_string().contains("failed to read"));
    fs::remove_dir_all(&path).unwrap();
}
