use std::cmp;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::entry::{EntryInfo, EntryReader, LOCAL_HEADER_LEN, METHOD_STORED};
use crate::error::Error;
use crate::lock::ScopedLock;

const LOCAL_SIG: u32 = 0x04034b50;
const CENTRAL_SIG: u32 = 0x02014b50;
const EOCD_SIG: u32 = 0x06054b50;
const EOCD_LEN: u64 = 22;
const VERSION_NEEDED: u16 = 20;
// Unix host, PKZIP 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
const COMPACT_MAX_CHUNK: u64 = 1024 * 1024 * 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write,
    Append,
}

/// ZIP writer that permits replacing existing entries. Overwrites
/// leave tombstoned byte ranges behind; `close` compacts them away so
/// the emitted central directory never points into dead space.
#[derive(Debug)]
pub struct ZipWriter {
    file: File,
    /// Entries visible in the central directory, sorted by
    /// `header_offset` at all times.
    live: Vec<EntryInfo>,
    /// First-write order of live names; the central directory is
    /// emitted in this order, so an overwrite keeps its position.
    names: Vec<String>,
    /// Overwritten entries whose bytes still occupy space.
    tombstoned: Vec<EntryInfo>,
    end_of_data: u64,
    lock: Option<ScopedLock>,
    closed: bool,
}

impl ZipWriter {
    /// Open `path` for writing. With `Mode::Append` the existing
    /// central directory is read back and new data lands where it
    /// started; a missing or empty target silently promotes to
    /// `Mode::Write`. When `lock` is requested it is acquired against
    /// a sibling lockfile before the archive is opened.
    pub fn open(path: &Path, mode: Mode, lock: bool) -> Result<Self> {
        let lock = if lock {
            Some(ScopedLock::acquire(path)?)
        } else {
            None
        };

        let mode = match mode {
            Mode::Append => {
                let empty = match std::fs::metadata(path) {
                    Ok(m) => m.len() == 0,
                    Err(_) => true,
                };
                if empty {
                    debug!("{}: nothing to append to, writing anew", path.display());
                    Mode::Write
                } else {
                    Mode::Append
                }
            }
            m => m,
        };

        match mode {
            Mode::Write => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(Error::ArchiveIo)
                    .with_context(|| format!("couldn't create {}", path.display()))?;
                Ok(Self {
                    file,
                    live: Vec::new(),
                    names: Vec::new(),
                    tombstoned: Vec::new(),
                    end_of_data: 0,
                    lock,
                    closed: false,
                })
            }
            Mode::Append => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .map_err(Error::ArchiveIo)
                    .with_context(|| format!("couldn't open {}", path.display()))?;
                let (entries, cd_offset) = read_central_directory(&mut file)?;
                let names = entries.iter().map(|e| e.name.clone()).collect();
                let mut live = entries;
                live.sort_by_key(|e| e.header_offset);
                file.seek(SeekFrom::Start(cd_offset))
                    .map_err(Error::ArchiveIo)?;
                Ok(Self {
                    file,
                    live,
                    names,
                    tombstoned: Vec::new(),
                    end_of_data: cd_offset,
                    lock,
                    closed: false,
                })
            }
        }
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.live
    }

    /// Write one entry, replacing any live entry of the same name.
    ///
    /// Replacement takes one of three paths: if the existing entry is
    /// the last one, the file is truncated at its header and the new
    /// data appended in its place; if the new payload is stored and
    /// exactly the size of the old one, it is overwritten in place;
    /// otherwise the old entry is tombstoned and the new one appended,
    /// to be compacted on close.
    pub fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if self.closed {
            bail!("archive is closed");
        }
        let mut info = EntryInfo::from_name(name);
        info.crc32 = crc32fast::hash(data);
        info.compressed_size = data.len() as u64;
        info.uncompressed_size = data.len() as u64;

        // rposition: robust against pathological duplicates.
        match self.live.iter().rposition(|e| e.name == name) {
            Some(idx) if idx == self.live.len() - 1 => {
                let old = self.live.remove(idx);
                self.file
                    .set_len(old.header_offset)
                    .map_err(Error::ArchiveIo)?;
                self.end_of_data = old.header_offset;
                self.append_entry(info, data)?;
            }
            Some(idx)
                if info.compress_type == METHOD_STORED
                    && info.compressed_size == self.live[idx].compressed_size =>
            {
                // Same name, same size: the headers line up exactly.
                let offset = self.live[idx].header_offset;
                info.header_offset = offset;
                self.file
                    .seek(SeekFrom::Start(offset))
                    .map_err(Error::ArchiveIo)?;
                write_local_header(&mut self.file, &info).map_err(Error::ArchiveIo)?;
                self.file.write_all(data).map_err(Error::ArchiveIo)?;
                self.live.remove(idx);
                self.live.push(info);
                self.file
                    .seek(SeekFrom::Start(self.end_of_data))
                    .map_err(Error::ArchiveIo)?;
            }
            Some(idx) => {
                let old = self.live.remove(idx);
                debug!("tombstoning {} at {}", old.name, old.header_offset);
                self.tombstoned.push(old);
                self.append_entry(info, data)?;
            }
            None => {
                self.names.push(name.to_string());
                self.append_entry(info, data)?;
            }
        }
        self.live.sort_by_key(|e| e.header_offset);
        Ok(())
    }

    fn append_entry(&mut self, mut info: EntryInfo, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(self.end_of_data))
            .map_err(Error::ArchiveIo)?;
        info.header_offset = self.end_of_data;
        write_local_header(&mut self.file, &info).map_err(Error::ArchiveIo)?;
        self.file.write_all(data).map_err(Error::ArchiveIo)?;
        self.end_of_data = info.header_offset + info.local_header_len() + data.len() as u64;
        self.live.push(info);
        Ok(())
    }

    /// Compact away tombstoned ranges if any, then emit the central
    /// directory and release the lock. A second close is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.tombstoned.is_empty() {
            self.compact()?;
        }
        self.write_central_directory()?;
        self.file.flush().map_err(Error::ArchiveIo)?;
        self.lock.take();
        self.closed = true;
        Ok(())
    }

    /// Shift surviving entries left over the tombstoned ranges.
    ///
    /// After sorting by offset, every kept entry's source range lies
    /// at or to the right of the write cursor, so each range is read
    /// before anything can overwrite it.
    fn compact(&mut self) -> Result<()> {
        let mut merged: Vec<(EntryInfo, bool)> = self
            .live
            .drain(..)
            .map(|e| (e, true))
            .chain(self.tombstoned.drain(..).map(|e| (e, false)))
            .collect();
        merged.sort_by_key(|(e, _)| e.header_offset);

        let mut lengths = Vec::with_capacity(merged.len());
        for i in 0..merged.len() {
            let end = match merged.get(i + 1) {
                Some((next, _)) => next.header_offset,
                None => self.end_of_data,
            };
            lengths.push(end - merged[i].0.header_offset);
        }

        let mut write_cursor = merged[0].0.header_offset;
        for ((entry, keep), len) in merged.iter_mut().zip(lengths) {
            if !*keep {
                continue;
            }
            if entry.header_offset != write_cursor {
                copy_within(&mut self.file, entry.header_offset, write_cursor, len)?;
                entry.header_offset = write_cursor;
            }
            write_cursor += len;
        }

        self.file.set_len(write_cursor).map_err(Error::ArchiveIo)?;
        self.end_of_data = write_cursor;
        self.live = merged
            .into_iter()
            .filter(|(_, keep)| *keep)
            .map(|(e, _)| e)
            .collect();
        Ok(())
    }

    fn write_central_directory(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(self.end_of_data))
            .map_err(Error::ArchiveIo)?;
        let cd_offset = self.end_of_data;
        for name in &self.names {
            let entry = self
                .live
                .iter()
                .find(|e| &e.name == name)
                .ok_or_else(|| anyhow!("no live entry for recorded name {name}"))?;
            let offset = u32::try_from(entry.header_offset).context("archive too large")?;
            write_central_header(&mut self.file, entry, offset).map_err(Error::ArchiveIo)?;
        }
        let cd_end = self.file.stream_position().map_err(Error::ArchiveIo)?;

        let w = &mut self.file;
        w.write_u32::<LittleEndian>(EOCD_SIG)
            .map_err(Error::ArchiveIo)?;
        w.write_u16::<LittleEndian>(0).map_err(Error::ArchiveIo)?;
        w.write_u16::<LittleEndian>(0).map_err(Error::ArchiveIo)?;
        let count = u16::try_from(self.names.len()).context("too many archive entries")?;
        w.write_u16::<LittleEndian>(count).map_err(Error::ArchiveIo)?;
        w.write_u16::<LittleEndian>(count).map_err(Error::ArchiveIo)?;
        let cd_size = u32::try_from(cd_end - cd_offset).context("central directory too large")?;
        w.write_u32::<LittleEndian>(cd_size)
            .map_err(Error::ArchiveIo)?;
        let cd_offset = u32::try_from(cd_offset).context("archive too large")?;
        w.write_u32::<LittleEndian>(cd_offset)
            .map_err(Error::ArchiveIo)?;
        w.write_u16::<LittleEndian>(0).map_err(Error::ArchiveIo)?;

        let end = self.file.stream_position().map_err(Error::ArchiveIo)?;
        // Drop stale directory bytes from a previously longer file.
        self.file.set_len(end).map_err(Error::ArchiveIo)?;
        Ok(())
    }
}

impl Drop for ZipWriter {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

/// Read-side view over an archive's central directory.
pub struct ZipReader {
    file: File,
    entries: Vec<EntryInfo>,
}

impl ZipReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(Error::ArchiveIo)
            .with_context(|| format!("couldn't open {}", path.display()))?;
        let (entries, _) = read_central_directory(&mut file)?;
        Ok(Self { file, entries })
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    /// Reader over the named entry's payload, positioned past its
    /// local header. Only stored entries can be read back.
    pub fn entry_reader(&mut self, name: &str) -> Result<EntryReader<'_, File>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| anyhow!("no entry named {name}"))?
            .clone();
        if entry.compress_type != METHOD_STORED {
            bail!("entry {name} uses an unsupported compression method");
        }
        self.file
            .seek(SeekFrom::Start(entry.header_offset))
            .map_err(Error::ArchiveIo)?;
        let sig = self
            .file
            .read_u32::<LittleEndian>()
            .map_err(Error::ArchiveIo)?;
        if sig != LOCAL_SIG {
            bail!("corrupt local header for entry {name}");
        }
        // Name and extra lengths live at offsets 26 and 28.
        self.file
            .seek(SeekFrom::Start(entry.header_offset + 26))
            .map_err(Error::ArchiveIo)?;
        let name_len = self
            .file
            .read_u16::<LittleEndian>()
            .map_err(Error::ArchiveIo)? as u64;
        let extra_len = self
            .file
            .read_u16::<LittleEndian>()
            .map_err(Error::ArchiveIo)? as u64;
        self.file
            .seek(SeekFrom::Start(
                entry.header_offset + LOCAL_HEADER_LEN + name_len + extra_len,
            ))
            .map_err(Error::ArchiveIo)?;
        Ok(EntryReader {
            inner: &mut self.file,
            len: entry.compressed_size,
            pos: 0,
        })
    }

    /// Whole payload of the named entry, CRC-checked.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let expected = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.crc32)
            .ok_or_else(|| anyhow!("no entry named {name}"))?;
        let mut reader = self.entry_reader(name)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(Error::ArchiveIo)?;
        if crc32fast::hash(&data) != expected {
            bail!("checksum mismatch reading entry {name}");
        }
        Ok(data)
    }
}

fn write_local_header(w: &mut File, e: &EntryInfo) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(LOCAL_SIG)?;
    w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(e.compress_type)?;
    w.write_u16::<LittleEndian>(e.dos_time)?;
    w.write_u16::<LittleEndian>(e.dos_date)?;
    w.write_u32::<LittleEndian>(e.crc32)?;
    w.write_u32::<LittleEndian>(e.compressed_size as u32)?;
    w.write_u32::<LittleEndian>(e.uncompressed_size as u32)?;
    w.write_u16::<LittleEndian>(e.name.len() as u16)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_all(e.name.as_bytes())
}

fn write_central_header(w: &mut File, e: &EntryInfo, offset: u32) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(CENTRAL_SIG)?;
    w.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
    w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(e.compress_type)?;
    w.write_u16::<LittleEndian>(e.dos_time)?;
    w.write_u16::<LittleEndian>(e.dos_date)?;
    w.write_u32::<LittleEndian>(e.crc32)?;
    w.write_u32::<LittleEndian>(e.compressed_size as u32)?;
    w.write_u32::<LittleEndian>(e.uncompressed_size as u32)?;
    w.write_u16::<LittleEndian>(e.name.len() as u16)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u32::<LittleEndian>(e.external_attr)?;
    w.write_u32::<LittleEndian>(offset)?;
    w.write_all(e.name.as_bytes())
}

fn read_central_directory(file: &mut File) -> Result<(Vec<EntryInfo>, u64)> {
    let file_len = file.seek(SeekFrom::End(0)).map_err(Error::ArchiveIo)?;
    if file_len < EOCD_LEN {
        bail!("not a ZIP archive: too short");
    }
    // EOCD comments are bounded at 64k; scan the tail for the record.
    let tail_len = cmp::min(file_len, EOCD_LEN + 65_535);
    file.seek(SeekFrom::Start(file_len - tail_len))
        .map_err(Error::ArchiveIo)?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail).map_err(Error::ArchiveIo)?;
    let sig = EOCD_SIG.to_le_bytes();
    let eocd_at = tail
        .windows(4)
        .rposition(|w| w == sig)
        .ok_or_else(|| anyhow!("not a ZIP archive: no end-of-central-directory record"))?;
    let eocd = &tail[eocd_at..];
    if eocd.len() < EOCD_LEN as usize {
        bail!("truncated end-of-central-directory record");
    }
    let count = u16::from_le_bytes([eocd[10], eocd[11]]) as usize;
    let cd_offset = u32::from_le_bytes([eocd[16], eocd[17], eocd[18], eocd[19]]) as u64;

    file.seek(SeekFrom::Start(cd_offset))
        .map_err(Error::ArchiveIo)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read_central_header(file)?);
    }
    Ok((entries, cd_offset))
}

fn read_central_header(file: &mut File) -> Result<EntryInfo> {
    let mut fixed = [0u8; 46];
    file.read_exact(&mut fixed).map_err(Error::ArchiveIo)?;
    let u16at = |i: usize| u16::from_le_bytes([fixed[i], fixed[i + 1]]);
    let u32at = |i: usize| u32::from_le_bytes([fixed[i], fixed[i + 1], fixed[i + 2], fixed[i + 3]]);
    if u32at(0) != CENTRAL_SIG {
        bail!("corrupt central directory header");
    }
    let name_len = u16at(28) as usize;
    let extra_len = u16at(30) as i64;
    let comment_len = u16at(32) as i64;
    let mut name = vec![0u8; name_len];
    file.read_exact(&mut name).map_err(Error::ArchiveIo)?;
    file.seek(SeekFrom::Current(extra_len + comment_len))
        .map_err(Error::ArchiveIo)?;
    Ok(EntryInfo {
        name: String::from_utf8_lossy(&name).into_owned(),
        header_offset: u32at(42) as u64,
        compress_type: u16at(10),
        crc32: u32at(16),
        compressed_size: u32at(20) as u64,
        uncompressed_size: u32at(24) as u64,
        dos_time: u16at(12),
        dos_date: u16at(14),
        external_attr: u32at(38),
    })
}

fn copy_within(file: &mut File, mut src: u64, mut dst: u64, mut len: u64) -> Result<()> {
    let mut buf = vec![0u8; cmp::min(len, COMPACT_MAX_CHUNK) as usize];
    while len > 0 {
        let n = cmp::min(len, COMPACT_MAX_CHUNK) as usize;
        file.seek(SeekFrom::Start(src)).map_err(Error::ArchiveIo)?;
        file.read_exact(&mut buf[..n]).map_err(Error::ArchiveIo)?;
        file.seek(SeekFrom::Start(dst)).map_err(Error::ArchiveIo)?;
        file.write_all(&buf[..n]).map_err(Error::ArchiveIo)?;
        src += n as u64;
        dst += n as u64;
        len -= n as u64;
    }
    Ok(())
}
