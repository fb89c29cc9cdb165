//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use deployvfs_kernel::VfsConfig;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build an archive in memory. Names ending in `/` become directory entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

/// Route library logs to the test harness. `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with its temp root inside `scratch`.
pub fn config(scratch: &Path) -> VfsConfig {
    init_tracing();
    let mut config = VfsConfig::default().with_temp_root(scratch.join("temp-root"));
    config.track_leaks = true;
    config.delete_retry_ms = 50;
    config
}
