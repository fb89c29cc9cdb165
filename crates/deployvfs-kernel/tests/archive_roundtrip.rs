//! Extraction and streaming against standard ZIP readers.

mod common;

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use deployvfs_kernel::archive::{ArchiveExtractor, NestedArchives, StreamState, VirtualArchiveStream};
use deployvfs_kernel::vfs::{Vfs, VfsOps};

#[tokio::test]
async fn test_stream_matches_tree() {
    let scratch = tempfile::tempdir().unwrap();
    let site = scratch.path().join("site");
    std::fs::create_dir_all(site.join("dir")).unwrap();
    std::fs::write(site.join("a.txt"), "A").unwrap();
    std::fs::write(site.join("dir/b.txt"), "BB").unwrap();

    let vfs = Arc::new(Vfs::new(&common::config(scratch.path())).unwrap());
    let handle = vfs.mount_real(&site, "/site").unwrap();

    let bytes = vfs.pack("/site").await.unwrap().read_to_end().await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut seen = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut data = String::new();
        entry.read_to_string(&mut data).unwrap();
        seen.push((entry.name().to_string(), data));
    }
    assert_eq!(
        seen,
        vec![
            ("a.txt".to_string(), "A".to_string()),
            ("dir/".to_string(), String::new()),
            ("dir/b.txt".to_string(), "BB".to_string()),
        ]
    );
    handle.close();
}

#[tokio::test]
async fn test_packed_archive_mounts_again() {
    let scratch = tempfile::tempdir().unwrap();
    let site = scratch.path().join("site");
    std::fs::create_dir_all(site.join("WEB-INF")).unwrap();
    std::fs::write(site.join("WEB-INF/web.xml"), "<web-app/>").unwrap();

    let dist = scratch.path().join("dist");
    std::fs::create_dir_all(&dist).unwrap();

    let vfs = Arc::new(Vfs::new(&common::config(scratch.path())).unwrap());
    let source = vfs.mount_real(&site, "/src").unwrap();
    let packed = dist.join("site.war");
    let mut out = std::fs::File::create(&packed).unwrap();
    vfs.pack("/src").await.unwrap().copy_to(&mut out).await.unwrap();
    drop(out);

    let mounted = vfs.mount_zip(&packed, "/war").unwrap();
    assert_eq!(
        vfs.read_all(Path::new("/war/WEB-INF/web.xml")).await.unwrap(),
        b"<web-app/>"
    );

    // An archive file in the namespace passes through byte for byte.
    let dist_mount = vfs.mount_real(&dist, "/dist").unwrap();
    let direct = vfs.pack("/dist/site.war").await.unwrap().read_to_end().await.unwrap();
    assert_eq!(direct, std::fs::read(&packed).unwrap());

    dist_mount.close();
    mounted.close();
    source.close();
}

#[tokio::test]
async fn test_stream_states_through_namespace() {
    let scratch = tempfile::tempdir().unwrap();
    let site = scratch.path().join("site");
    std::fs::create_dir_all(&site).unwrap();
    std::fs::write(site.join("only.txt"), "x").unwrap();

    let vfs = Arc::new(Vfs::new(&common::config(scratch.path())).unwrap());
    let handle = vfs.mount_real(&site, "/s").unwrap();

    let mut stream = VirtualArchiveStream::new(Arc::clone(&vfs) as Arc<dyn VfsOps>, "/s");
    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    let entry = stream.next_entry().await.unwrap().unwrap();
    assert_eq!(entry.name(), "only.txt");
    assert_eq!(stream.read(&mut buf).await.unwrap(), 1);
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    assert_eq!(stream.state(), StreamState::BetweenEntries);
    assert!(stream.next_entry().await.unwrap().is_none());
    assert_eq!(stream.state(), StreamState::Exhausted);
    handle.close();
}

#[test]
fn test_traversal_entries_stay_inside_target() {
    common::init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let archive = scratch.path().join("evil.zip");
    common::write_zip(
        &archive,
        &[("../evil", b"owned".as_slice()), ("ok/file.txt", b"fine".as_slice())],
    );
    let target = scratch.path().join("out");

    ArchiveExtractor::default().extract(&archive, &target).unwrap();
    assert!(!scratch.path().join("evil").exists());
    assert_eq!(std::fs::read(target.join("ok/file.txt")).unwrap(), b"fine");
}

#[test]
fn test_nested_archive_flattened() {
    common::init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let web = common::zip_bytes(&[("WEB-INF/web.xml", b"<web-app/>".as_slice())]);
    let lib = common::zip_bytes(&[("x.class", b"x".as_slice())]);
    let archive = scratch.path().join("app.ear");
    common::write_zip(
        &archive,
        &[("inner.war", web.as_slice()), ("lib/util.jar", lib.as_slice())],
    );

    let target = scratch.path().join("default");
    ArchiveExtractor::default().extract(&archive, &target).unwrap();
    assert!(target.join("inner.war").is_dir());
    assert_eq!(
        std::fs::read(target.join("inner.war/WEB-INF/web.xml")).unwrap(),
        b"<web-app/>"
    );
    assert!(target.join("lib/util.jar").is_file());

    let target = scratch.path().join("all");
    ArchiveExtractor::new(NestedArchives::all()).extract(&archive, &target).unwrap();
    assert!(target.join("lib/util.jar/x.class").is_file());
}
