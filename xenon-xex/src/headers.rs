//! XEX2 header structures and parsing.
//!
//! A XEX2 file has the following high-level layout:
//!
//! | Region             | Offset                 | Notes                       |
//! |--------------------|------------------------|-----------------------------|
//! | Fixed header       | `0x00`–`0x17`          | Always plaintext            |
//! | Optional headers   | `0x18`                 | 8-byte id/value entries     |
//! | Security info      | `security_info_offset` | Holds the wrapped file key  |
//! | File format info   | via key `0x000003`     | Encryption/compression info |
//! | PE data            | `pe_data_offset`–EOF   | Encrypted for retail files  |

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use core::fmt;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::XexError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// XEX2 magic: ASCII `XEX2` at offset 0.
pub const XEX_MAGIC: [u8; 4] = *b"XEX2";

/// Optional-header key for the file format info offset.
pub const KEY_FILE_FORMAT_INFO: u32 = 0x00_0003;
/// Optional-header key for the entry point address.
pub const KEY_ENTRY_POINT: u32 = 0x00_0101;
/// Optional-header key for the image base address.
pub const KEY_IMAGE_BASE: u32 = 0x00_0102;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Encryption type field in the file format info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum EncryptionType {
    /// Payload stored in the clear.
    None = 0,
    /// Payload AES-CBC encrypted with the per-file key.
    Normal = 1,
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionType::None => write!(f, "None"),
            EncryptionType::Normal => write!(f, "Normal"),
        }
    }
}

/// Compression type field in the file format info.
///
/// Only [`None`](CompressionType::None) and [`Basic`](CompressionType::Basic)
/// can be expanded here; the LZX and delta schemes fall back to pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum CompressionType {
    None = 0,
    Basic = 1,
    Normal = 2,
    Delta = 3,
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionType::None => write!(f, "None"),
            CompressionType::Basic => write!(f, "Basic"),
            CompressionType::Normal => write!(f, "Normal (LZX)"),
            CompressionType::Delta => write!(f, "Delta"),
        }
    }
}

// ---------------------------------------------------------------------------
// Header structs
// ---------------------------------------------------------------------------

/// Fixed XEX2 header (`0x00`–`0x17`, all big-endian).
///
/// ```text
/// 0x00  [u8;4]  magic "XEX2"
/// 0x04  u32     module_flags
/// 0x08  u32     pe_data_offset
/// 0x0C  u32     (reserved)
/// 0x10  u32     security_info_offset
/// 0x14  u32     optional_header_count
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XexHeader {
    pub magic: [u8; 4],
    pub module_flags: u32,
    pub pe_data_offset: u32,
    pub security_info_offset: u32,
    pub optional_header_count: u32,
}

impl XexHeader {
    /// Size of the fixed header in bytes.
    pub const SIZE: usize = 0x18;

    /// Parse the fixed header and validate the magic.
    pub fn parse(buffer: &[u8]) -> Result<Self, XexError> {
        if buffer.len() < Self::SIZE {
            return Err(XexError::Truncated {
                needed: Self::SIZE,
                available: buffer.len(),
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buffer[0..4]);
        if magic != XEX_MAGIC {
            return Err(XexError::BadMagic(magic));
        }

        let mut c = Cursor::new(&buffer[4..Self::SIZE]);
        let module_flags = c.read_u32::<BigEndian>()?;
        let pe_data_offset = c.read_u32::<BigEndian>()?;
        let _reserved = c.read_u32::<BigEndian>()?;
        let security_info_offset = c.read_u32::<BigEndian>()?;
        let optional_header_count = c.read_u32::<BigEndian>()?;

        Ok(Self {
            magic,
            module_flags,
            pe_data_offset,
            security_info_offset,
            optional_header_count,
        })
    }
}

// ---------------------------------------------------------------------------

/// Values captured from the recognized optional-header keys.
///
/// Each entry is `{ id: u32, value: u32 }` with the key in the top 24 bits of
/// the id. Unrecognized keys are skipped without error — each entry is a
/// fixed 8 bytes regardless of key, so forward compatibility is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalHeaders {
    pub file_format_info_offset: Option<u32>,
    pub entry_point: Option<u32>,
    pub image_base: Option<u32>,
}

impl OptionalHeaders {
    /// Scan the optional-header table starting right after the fixed header.
    pub fn parse(buffer: &[u8], count: u32) -> Result<Self, XexError> {
        let end = XexHeader::SIZE + count as usize * 8;
        if buffer.len() < end {
            return Err(XexError::Truncated {
                needed: end,
                available: buffer.len(),
            });
        }

        let mut c = Cursor::new(&buffer[XexHeader::SIZE..end]);
        let mut out = Self::default();
        for _ in 0..count {
            let id = c.read_u32::<BigEndian>()?;
            let value = c.read_u32::<BigEndian>()?;
            match (id >> 8) & 0xFF_FFFF {
                KEY_FILE_FORMAT_INFO => out.file_format_info_offset = Some(value),
                KEY_ENTRY_POINT => out.entry_point = Some(value),
                KEY_IMAGE_BASE => out.image_base = Some(value),
                _ => {}
            }
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------

/// Fields read from the security info block (offsets relative to
/// `security_info_offset`, all big-endian).
///
/// ```text
/// +0x004  u32      image_size
/// +0x110  u32      load_address
/// +0x150  [u8;16]  file_key (AES-encrypted with the retail key)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityInfo {
    pub image_size: u32,
    pub load_address: u32,
    pub file_key: [u8; 16],
}

impl SecurityInfo {
    pub const IMAGE_SIZE_OFFSET: usize = 0x04;
    pub const LOAD_ADDRESS_OFFSET: usize = 0x110;
    pub const FILE_KEY_OFFSET: usize = 0x150;

    /// Bytes required past `offset` to read every field.
    pub const SIZE: usize = Self::FILE_KEY_OFFSET + 16;

    /// Read the security info fields at `offset` into the file.
    pub fn parse(buffer: &[u8], offset: usize) -> Result<Self, XexError> {
        let end = offset.saturating_add(Self::SIZE);
        if buffer.len() < end {
            return Err(XexError::Truncated {
                needed: end,
                available: buffer.len(),
            });
        }

        let mut c = Cursor::new(&buffer[offset + Self::IMAGE_SIZE_OFFSET..]);
        let image_size = c.read_u32::<BigEndian>()?;

        let mut c = Cursor::new(&buffer[offset + Self::LOAD_ADDRESS_OFFSET..]);
        let load_address = c.read_u32::<BigEndian>()?;

        let mut file_key = [0u8; 16];
        file_key.copy_from_slice(&buffer[offset + Self::FILE_KEY_OFFSET..end]);

        Ok(Self {
            image_size,
            load_address,
            file_key,
        })
    }
}

// ---------------------------------------------------------------------------

/// One run of the basic-block compression sequence: `data_size` literal
/// bytes followed by `zero_size` implicit zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub data_size: u32,
    pub zero_size: u32,
}

impl BasicBlock {
    /// Bytes this block contributes to the decompressed image.
    pub const fn total(&self) -> usize {
        self.data_size as usize + self.zero_size as usize
    }
}

// ---------------------------------------------------------------------------

/// File format info block, located via optional-header key `0x000003`.
///
/// ```text
/// +0  u32  size (bounds the block descriptor table)
/// +4  u16  encryption_type
/// +6  u16  compression_type
/// +8  {data_size: u32, zero_size: u32} descriptors, {0,0}-terminated
/// ```
///
/// The descriptor table is only present (and only read) for basic-block
/// compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFormatInfo {
    pub size: u32,
    pub encryption_type: u16,
    pub compression_type: u16,
    pub blocks: Vec<BasicBlock>,
}

impl FileFormatInfo {
    /// Size of the fixed part of the block, before the descriptor table.
    pub const HEADER_SIZE: usize = 8;

    /// Read the file format info at `offset` into the file.
    pub fn parse(buffer: &[u8], offset: usize) -> Result<Self, XexError> {
        let fixed_end = offset.saturating_add(Self::HEADER_SIZE);
        if buffer.len() < fixed_end {
            return Err(XexError::Truncated {
                needed: fixed_end,
                available: buffer.len(),
            });
        }

        let mut c = Cursor::new(&buffer[offset..]);
        let size = c.read_u32::<BigEndian>()?;
        let encryption_type = c.read_u16::<BigEndian>()?;
        let compression_type = c.read_u16::<BigEndian>()?;

        let mut blocks = Vec::new();
        if compression_type == CompressionType::Basic as u16 {
            // Descriptors run from +8 up to the declared block size, ending
            // at the {0,0} sentinel if one appears first.
            let table_end = offset.saturating_add(size as usize).min(buffer.len());
            let mut pos = fixed_end;
            while pos + 8 <= table_end {
                let mut c = Cursor::new(&buffer[pos..pos + 8]);
                let data_size = c.read_u32::<BigEndian>()?;
                let zero_size = c.read_u32::<BigEndian>()?;
                if data_size == 0 && zero_size == 0 {
                    break;
                }
                blocks.push(BasicBlock {
                    data_size,
                    zero_size,
                });
                pos += 8;
            }
        }

        Ok(Self {
            size,
            encryption_type,
            compression_type,
            blocks,
        })
    }

    /// Attempt to interpret the raw `encryption_type` field as
    /// [`EncryptionType`].
    pub fn encryption_type_enum(&self) -> Result<EncryptionType, u16> {
        EncryptionType::try_from(self.encryption_type).map_err(|e| e.number)
    }

    /// Attempt to interpret the raw `compression_type` field as
    /// [`CompressionType`].
    pub fn compression_type_enum(&self) -> Result<CompressionType, u16> {
        CompressionType::try_from(self.compression_type).map_err(|e| e.number)
    }

    /// Display name for the encryption type, with a raw-value fallback.
    pub fn encryption_str(&self) -> String {
        match self.encryption_type_enum() {
            Ok(e) => e.to_string(),
            Err(raw) => format!("Unknown({raw})"),
        }
    }

    /// Display name for the compression type, with a raw-value fallback.
    pub fn compression_str(&self) -> String {
        match self.compression_type_enum() {
            Ok(c) => c.to_string(),
            Err(raw) => format!("Unknown({raw})"),
        }
    }

    /// Sum of every descriptor's literal and zero runs.
    pub fn blocks_total(&self) -> usize {
        self.blocks.iter().map(BasicBlock::total).sum()
    }
}
