use std::cmp;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// Default file mode for entries synthesized from a bare name,
/// expressed in the ZIP external-attribute encoding (mode in the high
/// 16 bits).
pub const DEFAULT_EXTERNAL_ATTR: u32 = 0o644 << 16;

/// Fixed part of a local file header, before the name.
pub const LOCAL_HEADER_LEN: u64 = 30;

/// Per-entry metadata, mirroring one central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Archive path; unique within the live set after close.
    pub name: String,
    /// Byte offset of the entry's local file header.
    pub header_offset: u64,
    pub compress_type: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub dos_time: u16,
    pub dos_date: u16,
    pub external_attr: u32,
}

impl EntryInfo {
    /// Metadata for a fresh entry: current wall-clock timestamp,
    /// stored compression, 0644 mode.
    pub fn from_name(name: &str) -> Self {
        let (dos_date, dos_time) = dos_date_time(SystemTime::now());
        Self {
            name: name.to_string(),
            header_offset: 0,
            compress_type: METHOD_STORED,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            dos_time,
            dos_date,
            external_attr: DEFAULT_EXTERNAL_ATTR,
        }
    }

    /// Length of this entry's local header including the name.
    pub fn local_header_len(&self) -> u64 {
        LOCAL_HEADER_LEN + self.name.len() as u64
    }
}

/// Length-bounded reader over one entry's payload. The caller must
/// have positioned `inner` at the start of the payload.
pub struct EntryReader<'a, R> {
    pub(crate) inner: &'a mut R,
    pub(crate) len: u64,
    pub(crate) pos: u64,
}

impl<'a, R> EntryReader<'a, R> {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a, R: Read> Read for EntryReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let rem = self.len - self.pos;
        if rem == 0 {
            return Ok(0);
        }
        let max = cmp::min(buf.len() as u64, rem) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// `(date, time)` in MS-DOS packed format, clamped to the 1980 epoch.
pub fn dos_date_time(t: SystemTime) -> (u16, u16) {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (year, month, day) = civil_from_days((secs / 86400) as i64);
    if year < 1980 {
        // 1980-01-01 00:00:00, the earliest representable instant.
        return (1 << 5 | 1, 0);
    }
    let rem = secs % 86400;
    let (hour, minute, second) = (rem / 3600, rem % 3600 / 60, rem % 60);
    let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
    let time = ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2);
    (date, time)
}

// Days-since-epoch to civil date (proleptic Gregorian).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe as i64 + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}
