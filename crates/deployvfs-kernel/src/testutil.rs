//! Shared fixtures for unit tests.

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Build an archive in memory. Names ending in `/` become directory entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::from_date_and_time(2020, 2, 29, 10, 30, 0).unwrap());
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

/// Write an archive to `path`.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

/// Archive with one stored entry whose ZIP64 uncompressed size, in both the
/// local and the central header, claims `u64::MAX - 16` bytes.
pub fn zip_with_inflated_size(name: &str, data: &[u8]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);
    writer.start_file(name, options).unwrap();
    writer.write_all(data).unwrap();
    let mut bytes = writer.finish().unwrap().into_inner();

    // ZIP64 extra field: tag 0x0001, length 16, uncompressed size, compressed size.
    let mut needle = vec![0x01, 0x00, 0x10, 0x00];
    needle.extend_from_slice(&(data.len() as u64).to_le_bytes());
    let mut patched = 0;
    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if bytes[i..i + needle.len()] == needle[..] {
            bytes[i + 4..i + 12].copy_from_slice(&(u64::MAX - 16).to_le_bytes());
            patched += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    assert_eq!(patched, 2, "expected a local and a central ZIP64 field");

    // The central header only defers to the ZIP64 field when its own
    // 32-bit size is saturated.
    let central = bytes
        .windows(4)
        .rposition(|w| w == b"PK\x01\x02")
        .unwrap();
    bytes[central + 24..central + 28].copy_from_slice(&u32::MAX.to_le_bytes());
    bytes
}
