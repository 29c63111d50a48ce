//! Block framing
//!
//! A block is the unit stored in a segment: one key/value pair behind a
//! two byte format tag.

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{HandoffError, Result};

/// First byte of every block
pub const MAGIC: u8 = 0xB7;

/// Attr bit: a CRC32 of key+value follows the value
pub const ATTR_CRC32: u8 = 0x01;

/// Attr bits this version understands
const KNOWN_ATTRS: u8 = ATTR_CRC32;

/// Magic (1) + Attr (1) + KeyLen (4) + ValueLen (4)
pub const BLOCK_OVERHEAD: u64 = 10;

/// Size of the optional checksum trailer
pub const CRC_SIZE: u64 = 4;

/// A key/value payload as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    key: Bytes,
    value: Bytes,
}

impl Block {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn into_parts(self) -> (Bytes, Bytes) {
        (self.key, self.value)
    }

    /// Size of the encoded block in bytes
    pub fn encoded_len(&self, checksum: bool) -> u64 {
        let mut len = BLOCK_OVERHEAD + self.key.len() as u64 + self.value.len() as u64;
        if checksum {
            len += CRC_SIZE;
        }
        len
    }

    /// Encode the block
    ///
    /// Fails only when a field does not fit a u32 length prefix.
    pub fn encode(&self, checksum: bool) -> Result<Bytes> {
        let key_len = field_len(&self.key)?;
        let value_len = field_len(&self.value)?;

        let mut buf = BytesMut::with_capacity(self.encoded_len(checksum) as usize);
        buf.put_u8(MAGIC);
        buf.put_u8(if checksum { ATTR_CRC32 } else { 0 });
        buf.put_u32(key_len);
        buf.put_slice(&self.key);
        buf.put_u32(value_len);
        buf.put_slice(&self.value);
        if checksum {
            buf.put_u32(self.crc());
        }

        Ok(buf.freeze())
    }

    /// Decode one block from `reader`
    ///
    /// Returns:
    /// - `Ok(Some((block, len)))`: a whole block and its encoded length
    /// - `Ok(None)`: the reader was exhausted exactly at a block boundary
    /// - `Err(Corrupt)`: torn write, bad tag, oversize length or bad checksum
    pub fn decode<R: Read>(reader: &mut R, max_block_size: u32) -> Result<Option<(Block, u64)>> {
        let mut tag = [0u8; 2];
        match read_full(reader, &mut tag)? {
            0 => return Ok(None),
            2 => {}
            n => return Err(torn("format tag", 2, n)),
        }

        if tag[0] != MAGIC {
            return Err(HandoffError::Corrupt(format!(
                "bad magic: expected 0x{:02x}, got 0x{:02x}",
                MAGIC, tag[0]
            )));
        }
        let attr = tag[1];
        if attr & !KNOWN_ATTRS != 0 {
            return Err(HandoffError::Corrupt(format!("unknown attr bits 0x{:02x}", attr)));
        }

        let key = read_field(reader, "key", max_block_size)?;
        let value = read_field(reader, "value", max_block_size)?;
        let block = Block {
            key: Bytes::from(key),
            value: Bytes::from(value),
        };

        let checksum = attr & ATTR_CRC32 != 0;
        if checksum {
            let mut crc = [0u8; 4];
            let n = read_full(reader, &mut crc)?;
            if n != 4 {
                return Err(torn("checksum", 4, n));
            }
            let expected = u32::from_be_bytes(crc);
            let actual = block.crc();
            if expected != actual {
                return Err(HandoffError::Corrupt(format!(
                    "checksum mismatch: stored 0x{:08x}, computed 0x{:08x}",
                    expected, actual
                )));
            }
        }

        let len = block.encoded_len(checksum);
        Ok(Some((block, len)))
    }

    fn crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.key);
        hasher.update(&self.value);
        hasher.finalize()
    }
}

fn field_len(field: &[u8]) -> Result<u32> {
    u32::try_from(field.len()).map_err(|_| HandoffError::BlockTooLarge {
        size: field.len() as u64,
        max: u32::MAX as u64,
    })
}

/// Read a `[len:u32][bytes]` field, rejecting lengths over the ceiling
/// before allocating.
fn read_field<R: Read>(reader: &mut R, name: &str, max_block_size: u32) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    let n = read_full(reader, &mut len_buf)?;
    if n != 4 {
        return Err(torn(name, 4, n));
    }

    let len = u32::from_be_bytes(len_buf);
    if len > max_block_size {
        return Err(HandoffError::Corrupt(format!(
            "{} length {} exceeds max block size {}",
            name, len, max_block_size
        )));
    }

    let mut field = vec![0u8; len as usize];
    let n = read_full(reader, &mut field)?;
    if n != field.len() {
        return Err(torn(name, field.len(), n));
    }
    Ok(field)
}

/// Like `read_exact`, but reports how many bytes arrived before EOF so a
/// clean boundary can be told apart from a torn block.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn torn(what: &str, expected: usize, got: usize) -> HandoffError {
    HandoffError::Corrupt(format!(
        "torn block: {} expected {} bytes, got {}",
        what, expected, got
    ))
}
