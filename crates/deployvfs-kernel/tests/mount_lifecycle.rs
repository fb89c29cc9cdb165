//! Mount, read and unmount through the facade.

mod common;

use std::path::Path;
use std::sync::Arc;

use deployvfs_kernel::vfs::{MemoryBackend, Vfs, VfsError, VfsOps};

#[tokio::test]
async fn test_archive_mount_read_unmount() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = scratch.path().join("app.jar");
    common::write_zip(
        &archive,
        &[
            ("META-INF/", b"".as_slice()),
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nMain-Class: app.Main\r\n".as_slice()),
            ("app/Main.class", b"\xca\xfe\xba\xbe".as_slice()),
        ],
    );
    let vfs = Vfs::new(&common::config(scratch.path())).unwrap();

    let handle = vfs.mount_zip(&archive, "/app").unwrap();
    let manifest = vfs.read_all(Path::new("/app/META-INF/MANIFEST.MF")).await.unwrap();
    assert!(manifest.starts_with(b"Manifest-Version: 1.0"));
    assert_eq!(
        vfs.manifest("/app").await.unwrap().unwrap().get("main-class"),
        Some("app.Main")
    );

    assert!(Arc::ptr_eq(&vfs.resolve("/app/META-INF").unwrap(), handle.mount()));

    handle.close();
    assert!(Arc::ptr_eq(&vfs.resolve("/app").unwrap(), vfs.table().root_mount()));
    let err = vfs.read_all(Path::new("/app/META-INF/MANIFEST.MF")).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(vfs.leaks().leaked_count(), 0);
}

#[tokio::test]
async fn test_expanded_and_direct_views_agree() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = scratch.path().join("site.zip");
    common::write_zip(
        &archive,
        &[("index.html", b"<html/>".as_slice()), ("css/site.css", b"body{}".as_slice())],
    );
    let vfs = Vfs::new(&common::config(scratch.path())).unwrap();

    let direct = vfs.mount_zip(&archive, "/direct").unwrap();
    let expanded = vfs.mount_zip_expanded(&archive, "/expanded").await.unwrap();

    for dir in ["", "css"] {
        let a = vfs.readdir(&Path::new("/direct").join(dir)).await.unwrap();
        let b = vfs.readdir(&Path::new("/expanded").join(dir)).await.unwrap();
        assert_eq!(a, b);
    }
    assert_eq!(
        vfs.read_all(Path::new("/direct/css/site.css")).await.unwrap(),
        vfs.read_all(Path::new("/expanded/css/site.css")).await.unwrap()
    );

    let points: Vec<String> = vfs.list_mounts().iter().map(|m| m.point.to_string()).collect();
    assert_eq!(points, vec!["/direct", "/expanded"]);

    direct.close();
    expanded.close();
    assert!(vfs.list_mounts().is_empty());
}

#[tokio::test]
async fn test_remount_after_close() {
    let scratch = tempfile::tempdir().unwrap();
    let vfs = Vfs::new(&common::config(scratch.path())).unwrap();

    let first = MemoryBackend::new();
    first.insert_file("v", "1").unwrap();
    let second = MemoryBackend::new();
    second.insert_file("v", "2").unwrap();

    let handle = vfs.mount("/data", Arc::new(first)).unwrap();
    assert!(matches!(
        vfs.mount("/data", Arc::new(MemoryBackend::new())),
        Err(VfsError::AlreadyMounted(_))
    ));
    let stale = Arc::clone(handle.mount());
    handle.close();

    let replacement = vfs.mount("/data", Arc::new(second)).unwrap();
    // Closing the old mount again must not detach its replacement.
    assert!(!stale.close());
    assert_eq!(vfs.read_all(Path::new("/data/v")).await.unwrap(), b"2");
    replacement.close();
}

#[tokio::test]
async fn test_unwritable_target_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = scratch.path().join("a.zip");
    common::write_zip(&archive, &[("a.txt", b"a".as_slice())]);
    let occupied = scratch.path().join("occupied");
    std::fs::write(&occupied, "file in the way").unwrap();

    let vfs = Vfs::new(&common::config(scratch.path())).unwrap();
    let err = vfs.extractor().extract(&archive, &occupied).unwrap_err();
    assert!(matches!(err, VfsError::NotADirectory(_)));
}
