//! COFF/PE structures for decoded Xbox 360 images.
//!
//! Unlike the XEX2 container, the embedded executable's own headers are
//! little-endian, even on this big-endian console.

use core::fmt;
use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use enumflags2::{bitflags, BitFlags};
use num_enum::{IntoPrimitive, TryFromPrimitive};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Legacy DOS signature at offset 0.
pub const DOS_MAGIC: [u8; 2] = *b"MZ";

/// PE signature (`PE\0\0`).
pub const PE_MAGIC: [u8; 4] = *b"PE\0\0";

/// Offset of the little-endian `e_lfanew` field in the DOS header.
pub const E_LFANEW_OFFSET: usize = 0x3C;

/// Offsets probed for the PE signature when no DOS header points at it.
/// Xbox 360 images frequently omit the DOS header entirely.
pub const PROBE_OFFSETS: [usize; 4] = [0, 0x80, 0x100, 0x1000];

/// Size of one section table record.
pub const SECTION_RECORD_SIZE: usize = 40;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Known COFF machine types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Machine {
    /// Big-endian PowerPC (Xbox 360).
    PowerPcBe = 0x01F2,
    X86 = 0x014C,
    X64 = 0x8664,
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Machine::PowerPcBe => write!(f, "PowerPC (Xbox 360)"),
            Machine::X86 => write!(f, "x86"),
            Machine::X64 => write!(f, "x64"),
        }
    }
}

/// Section characteristics bits.
#[bitflags]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SectionFlag {
    Code = 0x20,
    InitializedData = 0x40,
    UninitializedData = 0x80,
    MemExecute = 0x2000_0000,
    MemRead = 0x4000_0000,
    MemWrite = 0x8000_0000,
}

impl SectionFlag {
    /// Short label used in section table listings.
    pub const fn label(self) -> &'static str {
        match self {
            SectionFlag::Code => "CODE",
            SectionFlag::InitializedData => "IDATA",
            SectionFlag::UninitializedData => "UDATA",
            SectionFlag::MemExecute => "X",
            SectionFlag::MemRead => "R",
            SectionFlag::MemWrite => "W",
        }
    }
}

// ---------------------------------------------------------------------------
// Header structs
// ---------------------------------------------------------------------------

/// COFF file header fields the extractor needs (all little-endian).
///
/// ```text
/// +0   u16  machine
/// +2   u16  section_count
/// +16  u16  optional_header_size
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    pub machine: u16,
    pub section_count: u16,
    pub optional_header_size: u16,
}

impl CoffHeader {
    /// Size of the COFF header in bytes.
    pub const SIZE: usize = 20;

    /// Parse the COFF header from a buffer starting at its first byte.
    pub fn parse(buffer: &[u8]) -> io::Result<Self> {
        let mut c = Cursor::new(buffer);
        let machine = c.read_u16::<LittleEndian>()?;
        let section_count = c.read_u16::<LittleEndian>()?;
        let _timestamp = c.read_u32::<LittleEndian>()?;
        let _symbol_table_offset = c.read_u32::<LittleEndian>()?;
        let _symbol_count = c.read_u32::<LittleEndian>()?;
        let optional_header_size = c.read_u16::<LittleEndian>()?;

        Ok(Self {
            machine,
            section_count,
            optional_header_size,
        })
    }

    /// Attempt to interpret the raw `machine` field as [`Machine`].
    pub fn machine_enum(&self) -> Result<Machine, u16> {
        Machine::try_from(self.machine).map_err(|e| e.number)
    }
}

// ---------------------------------------------------------------------------

/// One 40-byte record from the section table.
///
/// ```text
/// +0   [u8;8]  name (null-padded ASCII)
/// +8   u32     virtual_size
/// +12  u32     virtual_address (relative to the image base)
/// +16  u32     raw_size
/// +20  u32     raw_offset
/// +36  u32     characteristics
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub raw_size: u32,
    pub raw_offset: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    /// Parse one section record from a buffer starting at its first byte.
    pub fn parse(buffer: &[u8]) -> io::Result<Self> {
        let mut c = Cursor::new(buffer);

        let mut name = [0u8; 8];
        c.read_exact(&mut name)?;

        let virtual_size = c.read_u32::<LittleEndian>()?;
        let virtual_address = c.read_u32::<LittleEndian>()?;
        let raw_size = c.read_u32::<LittleEndian>()?;
        let raw_offset = c.read_u32::<LittleEndian>()?;
        let _relocations = c.read_u32::<LittleEndian>()?;
        let _line_numbers = c.read_u32::<LittleEndian>()?;
        let _counts = c.read_u32::<LittleEndian>()?;
        let characteristics = c.read_u32::<LittleEndian>()?;

        Ok(Self {
            name,
            virtual_size,
            virtual_address,
            raw_size,
            raw_offset,
            characteristics,
        })
    }

    /// Section name as a `&str`, stripping trailing NULs.
    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("<invalid UTF-8>")
    }

    /// Characteristics as typed BitFlags; unknown bits are dropped.
    #[must_use]
    pub fn flags_bits(&self) -> BitFlags<SectionFlag> {
        BitFlags::from_bits_truncate(self.characteristics)
    }

    /// A section is code iff the `CODE` characteristic bit is set;
    /// everything else counts as data.
    #[inline]
    pub const fn is_code(&self) -> bool {
        self.characteristics & SectionFlag::Code as u32 != 0
    }

    /// Bytes this section contributes when loaded.
    #[inline]
    pub const fn loaded_size(&self) -> u32 {
        if self.raw_size < self.virtual_size {
            self.raw_size
        } else {
            self.virtual_size
        }
    }

    /// Comma-joined flag labels, e.g. `CODE,X,R`.
    pub fn flags_str(&self) -> String {
        self.flags_bits()
            .iter()
            .map(SectionFlag::label)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:8} VSize={:#08X} VA={:#010X} Raw={:#08X} @ {:#08X} [{}]",
            self.name_str(),
            self.virtual_size,
            self.virtual_address,
            self.raw_size,
            self.raw_offset,
            self.flags_str(),
        )
    }
}
