//! Repeated-copy container codec.
//!
//! Layout, all integers little endian:
//!
//! ```text
//! u32 count
//! count x { u16 name_len, name (UTF-8), u64 data_len, data }
//! ```
//!
//! Every entry of a packed container carries the same payload; only the
//! names differ (`copy_0001_<base>`, `copy_0002_<base>` ...).

use std::borrow::Cow;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{RecompressError, Result};

/// Human readable description of the layout, embedded in search manifests.
pub const FORMAT_DOC: &str = "<I N> then N * {<H name_len><name utf8><Q data_len><data>}";

/// Largest entry count `sniff` treats as plausible.
pub const SNIFF_MAX_COUNT: u32 = 1_000_000;
/// Largest first-entry name length `sniff` treats as plausible.
pub const SNIFF_MAX_NAME_LEN: u16 = 4096;

const COUNT_LEN: usize = 4;
const NAME_LEN_LEN: usize = 2;
const DATA_LEN_LEN: usize = 8;

/// One logical file inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Borrowed view of an entry while walking a container in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef<'a> {
    pub name: Cow<'a, str>,
    pub data: &'a [u8],
}

/// Name of the `index`th (1-based) copy of `base_name`.
pub fn entry_name(index: u32, base_name: &str) -> String {
    format!("copy_{index:04}_{base_name}")
}

/// All entry names of a container with `copies` entries, in order.
pub fn entry_names(copies: u32, base_name: &str) -> Vec<String> {
    (1..=copies).map(|i| entry_name(i, base_name)).collect()
}

/// Serialized size of a container without building it.
pub fn packed_len(payload_len: u64, copies: u32, base_name: &str) -> u64 {
    let per_entry_fixed = (NAME_LEN_LEN + DATA_LEN_LEN) as u64;
    let names: u64 = (1..=copies)
        .map(|i| entry_name(i, base_name).len() as u64)
        .sum();
    COUNT_LEN as u64 + copies as u64 * (per_entry_fixed + payload_len) + names
}

/// Stream a container of `copies` copies of `source` into `writer`.
pub fn pack_to<W: Write>(writer: &mut W, source: &[u8], copies: u32, base_name: &str) -> Result<()> {
    if copies == 0 {
        return Err(RecompressError::Config(
            "a container needs at least one copy".into(),
        ));
    }
    writer.write_all(&copies.to_le_bytes())?;
    let data_len = source.len() as u64;
    for index in 1..=copies {
        let name = entry_name(index, base_name);
        let name_len = u16::try_from(name.len()).map_err(|_| {
            RecompressError::Config(format!(
                "entry name is {} bytes, longer than the {} byte limit",
                name.len(),
                u16::MAX
            ))
        })?;
        writer.write_all(&name_len.to_le_bytes())?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(&data_len.to_le_bytes())?;
        writer.write_all(source)?;
    }
    Ok(())
}

/// Build a container in memory.
pub fn pack(source: &[u8], copies: u32, base_name: &str) -> Result<Vec<u8>> {
    let capacity = packed_len(source.len() as u64, copies, base_name);
    let mut out = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
    pack_to(&mut out, source, copies, base_name)?;
    Ok(out)
}

/// Pack straight to a file, returning the number of bytes written.
pub fn pack_file(source: &[u8], copies: u32, base_name: &str, dest: &Path) -> Result<u64> {
    let file = fs::File::create(dest)?;
    let mut writer = io::BufWriter::new(file);
    pack_to(&mut writer, source, copies, base_name)?;
    writer.flush()?;
    Ok(fs::metadata(dest)?.len())
}

/// Cheap plausibility check on the first bytes of a blob.
///
/// Accepts when the count is in `(0, 1_000_000]`, the first name length is in
/// `(0, 4096]`, the first name is fully present and the first declared data
/// length fits in what remains. This is a heuristic, not a checksum.
pub fn sniff(bytes: &[u8]) -> bool {
    let mut cursor = Cursor::new(bytes);
    let Some(count) = cursor.u32() else {
        return false;
    };
    if count == 0 || count > SNIFF_MAX_COUNT {
        return false;
    }
    let Some(name_len) = cursor.u16() else {
        return false;
    };
    if name_len == 0 || name_len > SNIFF_MAX_NAME_LEN {
        return false;
    }
    if cursor.take(name_len as usize).is_none() {
        return false;
    }
    let Some(data_len) = cursor.u64() else {
        return false;
    };
    data_len <= cursor.remaining() as u64
}

/// Iterator over the entries of a serialized container.
pub struct Entries<'a> {
    cursor: Cursor<'a>,
    declared: u32,
    yielded: u32,
    failed: bool,
}

impl<'a> Entries<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let declared = cursor.u32().ok_or_else(|| malformed("missing entry count"))?;
        Ok(Self {
            cursor,
            declared,
            yielded: 0,
            failed: false,
        })
    }

    /// Entry count from the header.
    pub fn declared(&self) -> u32 {
        self.declared
    }

    fn read_entry(&mut self) -> Result<EntryRef<'a>> {
        let index = self.yielded + 1;
        let name_len = self
            .cursor
            .u16()
            .ok_or_else(|| malformed(format!("entry {index}: truncated name length")))?;
        let name = self
            .cursor
            .take(name_len as usize)
            .ok_or_else(|| malformed(format!("entry {index}: truncated name")))?;
        let data_len = self
            .cursor
            .u64()
            .ok_or_else(|| malformed(format!("entry {index}: truncated data length")))?;
        let data_len = usize::try_from(data_len)
            .ok()
            .filter(|len| *len <= self.cursor.remaining())
            .ok_or_else(|| {
                malformed(format!(
                    "entry {index}: declares {data_len} data bytes but only {} remain",
                    self.cursor.remaining()
                ))
            })?;
        let data = self
            .cursor
            .take(data_len)
            .ok_or_else(|| malformed(format!("entry {index}: truncated data")))?;
        Ok(EntryRef {
            name: String::from_utf8_lossy(name),
            data,
        })
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<EntryRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.yielded >= self.declared {
            return None;
        }
        let item = self.read_entry();
        match item {
            Ok(_) => self.yielded += 1,
            Err(_) => self.failed = true,
        }
        Some(item)
    }
}

/// Fully decode a container into owned entries.
pub fn decode(bytes: &[u8]) -> Result<Vec<Entry>> {
    Entries::new(bytes)?
        .map(|entry| {
            entry.map(|e| Entry {
                name: e.name.into_owned(),
                data: e.data.to_vec(),
            })
        })
        .collect()
}

/// Write every entry of `bytes` under `target_dir`, returning the produced
/// paths in encounter order. Invalid UTF-8 in names is replaced, not fatal.
pub fn unpack(bytes: &[u8], target_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for entry in Entries::new(bytes)? {
        let entry = entry?;
        let relative = safe_relative(&entry.name)?;
        let out_path = target_dir.join(relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, entry.data)?;
        written.push(out_path);
    }
    Ok(written)
}

/// Reject names that would escape the extraction directory.
fn safe_relative(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(malformed(format!("entry name '{name}' is not a relative file name")));
    }
    Ok(path)
}

fn malformed(reason: impl Into<String>) -> RecompressError {
    RecompressError::MalformedContainer {
        path: PathBuf::new(),
        reason: reason.into(),
    }
}

/// Little endian reader over a byte slice that never panics on short input.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|s| s.try_into().ok())
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.array().map(u64::from_le_bytes)
    }
}
