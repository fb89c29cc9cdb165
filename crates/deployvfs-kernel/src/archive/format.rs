//! ZIP framing.
//!
//! The streaming view writes archives with the STORED method: every local
//! header carries the final CRC and sizes, so there are no data descriptors
//! and any reader (including forward-only stream readers) can consume the
//! output. ZIP64 is not produced; anything that would need it is rejected.

use std::io::Read;
use std::time::SystemTime;

use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};

use crate::vfs::{VfsError, VfsResult};

/// Signature at the start of every local file header.
pub const LOCAL_HEADER_SIGNATURE: [u8; 4] = *b"PK\x03\x04";
/// End-of-central-directory signature, the first bytes of an empty archive.
const EMPTY_ARCHIVE_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x0605_4b50;

/// Version 2.0: directories and STORED entries.
const VERSION_NEEDED: u16 = 20;
/// Made by: Unix host, ZIP format version 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// General purpose flag bit 11: names are UTF-8.
const FLAG_UTF8: u16 = 1 << 11;
const METHOD_STORED: u16 = 0;
/// MS-DOS directory attribute.
const DOS_DIRECTORY: u32 = 0x10;

const LIMIT_32: u64 = u32::MAX as u64;
const LIMIT_16: usize = u16::MAX as usize;

/// Upper bound on the buffer reserved from a declared entry size.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Normalize an archive entry name to a relative `/`-separated path.
///
/// Leading and duplicate separators are dropped. Returns `None` if any
/// segment is `.` or `..`; such entries are never materialized. The empty
/// string means the archive root.
pub fn clean_entry_name(raw: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

/// Encode a timestamp as MS-DOS `(time, date)` in local time.
///
/// Times outside the representable range (1980..=2107) are clamped.
pub fn dos_datetime(time: SystemTime) -> (u16, u16) {
    let local: chrono::DateTime<Local> = time.into();
    let year = local.year();
    if year < 1980 {
        return (0, (1 << 5) | 1);
    }
    if year > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }
    let date = (((year - 1980) as u16) << 9) | ((local.month() as u16) << 5) | local.day() as u16;
    let time = ((local.hour() as u16) << 11) | ((local.minute() as u16) << 5) | (local.second() as u16 / 2);
    (time, date)
}

/// Decode an archive timestamp, interpreted in local time.
pub fn from_zip_datetime(dt: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}

/// True if `bytes` starts like a ZIP archive (a local header, or the
/// directory end record of an empty archive).
pub fn has_archive_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(&LOCAL_HEADER_SIGNATURE) || bytes.starts_with(&EMPTY_ARCHIVE_SIGNATURE)
}

/// Decompress an entry to the end.
///
/// `declared` is the size from the archive header. It only sizes the first
/// allocation, capped at [`PREALLOC_LIMIT`]. Corrupt data is `ArchiveMalformed`.
pub fn read_entry<R: Read + ?Sized>(reader: &mut R, name: &str, declared: u64) -> VfsResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
    reader
        .read_to_end(&mut buffer)
        .map_err(|e| VfsError::entry_read(name, e))?;
    Ok(buffer)
}

struct CentralRecord {
    name: String,
    is_dir: bool,
    crc: u32,
    size: u32,
    time: u16,
    date: u16,
    offset: u32,
}

/// Incremental writer for local headers and the trailing directory index.
///
/// The caller emits each header returned by [`local_header`](Self::local_header)
/// followed by exactly `size` bytes of entry data, then the bytes returned
/// by [`finish`](Self::finish).
#[derive(Default)]
pub struct ZipEncoder {
    offset: u64,
    records: Vec<CentralRecord>,
}

impl ZipEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes accounted for so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Build the local header for the next entry.
    ///
    /// Directory names get a trailing `/`.
    pub fn local_header(
        &mut self,
        name: &str,
        is_dir: bool,
        size: u64,
        crc: u32,
        mtime: SystemTime,
    ) -> VfsResult<Vec<u8>> {
        let mut name = name.to_string();
        if is_dir && !name.ends_with('/') {
            name.push('/');
        }
        if name.len() > LIMIT_16 {
            return Err(VfsError::archive_malformed(format!("entry name too long: {}", name)));
        }
        if size > LIMIT_32 || self.offset > LIMIT_32 {
            return Err(VfsError::archive_malformed(format!(
                "{} exceeds the 4 GiB limit of non-ZIP64 archives",
                name
            )));
        }
        if self.records.len() >= LIMIT_16 {
            return Err(VfsError::archive_malformed("too many entries for a non-ZIP64 archive"));
        }

        let (time, date) = dos_datetime(mtime);
        let mut out = Vec::with_capacity(30 + name.len());
        out.extend_from_slice(&LOCAL_HEADER_SIGNATURE);
        put_u16(&mut out, VERSION_NEEDED);
        put_u16(&mut out, FLAG_UTF8);
        put_u16(&mut out, METHOD_STORED);
        put_u16(&mut out, time);
        put_u16(&mut out, date);
        put_u32(&mut out, crc);
        put_u32(&mut out, size as u32);
        put_u32(&mut out, size as u32);
        put_u16(&mut out, name.len() as u16);
        put_u16(&mut out, 0);
        out.extend_from_slice(name.as_bytes());

        self.records.push(CentralRecord {
            name,
            is_dir,
            crc,
            size: size as u32,
            time,
            date,
            offset: self.offset as u32,
        });
        self.offset += out.len() as u64 + size;
        Ok(out)
    }

    /// Central directory and end-of-central-directory record.
    pub fn finish(self) -> VfsResult<Vec<u8>> {
        let cd_offset = self.offset;
        if cd_offset > LIMIT_32 {
            return Err(VfsError::archive_malformed(
                "archive exceeds the 4 GiB limit of non-ZIP64 archives",
            ));
        }

        let mut out = Vec::new();
        for record in &self.records {
            let mode: u32 = if record.is_dir { 0o40755 } else { 0o100644 };
            let external = (mode << 16) | if record.is_dir { DOS_DIRECTORY } else { 0 };

            put_u32(&mut out, CENTRAL_HEADER_SIGNATURE);
            put_u16(&mut out, VERSION_MADE_BY);
            put_u16(&mut out, VERSION_NEEDED);
            put_u16(&mut out, FLAG_UTF8);
            put_u16(&mut out, METHOD_STORED);
            put_u16(&mut out, record.time);
            put_u16(&mut out, record.date);
            put_u32(&mut out, record.crc);
            put_u32(&mut out, record.size);
            put_u32(&mut out, record.size);
            put_u16(&mut out, record.name.len() as u16);
            put_u16(&mut out, 0); // extra
            put_u16(&mut out, 0); // comment
            put_u16(&mut out, 0); // disk
            put_u16(&mut out, 0); // internal attributes
            put_u32(&mut out, external);
            put_u32(&mut out, record.offset);
            out.extend_from_slice(record.name.as_bytes());
        }
        let cd_size = out.len() as u64;
        if cd_offset + cd_size > LIMIT_32 {
            return Err(VfsError::archive_malformed(
                "archive exceeds the 4 GiB limit of non-ZIP64 archives",
            ));
        }

        let count = self.records.len() as u16;
        put_u32(&mut out, END_OF_CENTRAL_DIR_SIGNATURE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, count);
        put_u16(&mut out, count);
        put_u32(&mut out, cd_size as u32);
        put_u32(&mut out, cd_offset as u32);
        put_u16(&mut out, 0);
        Ok(out)
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_clean_entry_name() {
        assert_eq!(clean_entry_name("a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(clean_entry_name("/a//b/").as_deref(), Some("a/b"));
        assert_eq!(clean_entry_name("/").as_deref(), Some(""));
        assert_eq!(clean_entry_name("../evil"), None);
        assert_eq!(clean_entry_name("a/./b"), None);
        assert_eq!(clean_entry_name(".."), None);
        assert_eq!(clean_entry_name(".hidden/..x").as_deref(), Some(".hidden/..x"));
    }

    #[test]
    fn test_dos_datetime_clamps() {
        let (time, date) = dos_datetime(UNIX_EPOCH);
        assert_eq!((time, date), (0, (1 << 5) | 1));
    }

    #[test]
    fn test_dos_datetime_round_trip_seconds() {
        // 2021-06-15 12:34:56 local, even seconds survive the 2s resolution.
        let naive = NaiveDate::from_ymd_opt(2021, 6, 15)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap();
        let t: SystemTime = Local.from_local_datetime(&naive).earliest().unwrap().into();
        let (time, date) = dos_datetime(t);
        assert_eq!(date >> 9, 41);
        assert_eq!((date >> 5) & 0xf, 6);
        assert_eq!(date & 0x1f, 15);
        assert_eq!(time >> 11, 12);
        assert_eq!((time >> 5) & 0x3f, 34);
        assert_eq!((time & 0x1f) * 2, 56);

        let dt = zip::DateTime::from_date_and_time(2021, 6, 15, 12, 34, 56).unwrap();
        assert_eq!(from_zip_datetime(dt), Some(t));
    }

    #[test]
    fn test_encoder_output_is_readable() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let data = b"hello zip";
        let mut encoder = ZipEncoder::new();
        let mut out = Vec::new();

        out.extend(encoder.local_header("dir", true, 0, 0, mtime).unwrap());
        out.extend(
            encoder
                .local_header("dir/a.txt", false, data.len() as u64, crc32fast::hash(data), mtime)
                .unwrap(),
        );
        out.extend_from_slice(data);
        assert_eq!(encoder.offset(), out.len() as u64);
        out.extend(encoder.finish().unwrap());

        let mut archive = zip::ZipArchive::new(Cursor::new(out)).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_index(0).unwrap().is_dir());
        let mut file = archive.by_name("dir/a.txt").unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        assert_eq!(content, data);
    }

    #[test]
    fn test_encoder_rejects_oversize() {
        let mut encoder = ZipEncoder::new();
        let err = encoder
            .local_header("big", false, 5 * 1024 * 1024 * 1024, 0, UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, VfsError::ArchiveMalformed(_)));
    }

    #[test]
    fn test_read_entry_ignores_declared_size() {
        let mut reader = Cursor::new(b"small".to_vec());
        assert_eq!(read_entry(&mut reader, "a", u64::MAX - 16).unwrap(), b"small");
    }

    #[test]
    fn test_archive_signature() {
        assert!(has_archive_signature(b"PK\x03\x04rest"));
        assert!(has_archive_signature(b"PK\x05\x06"));
        assert!(!has_archive_signature(b"just text"));
        assert!(!has_archive_signature(b"PK"));
    }
}
