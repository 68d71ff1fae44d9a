//! PE image validation and section enumeration.
//!
//! All failure here is advisory: the extractor already owns a complete
//! decoded image and emits it regardless of whether these headers check
//! out. The caller decides what to do with the warnings.

use core::fmt;

use crate::structs::{
    CoffHeader, SectionHeader, DOS_MAGIC, E_LFANEW_OFFSET, PE_MAGIC, PROBE_OFFSETS,
    SECTION_RECORD_SIZE,
};

/// Non-fatal conditions encountered while validating an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeWarning {
    /// No `MZ` or `PE\0\0` signature anywhere we know to look.
    NoSignature,
    /// Image ends before the COFF header.
    CoffTruncated { offset: usize, available: usize },
    /// Section table runs past the end of the image; enumeration stopped
    /// after `parsed` of the `declared` records.
    SectionTableTruncated { parsed: u16, declared: u16 },
}

impl fmt::Display for PeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeWarning::NoSignature => write!(f, "no MZ or PE signature found"),
            PeWarning::CoffTruncated { offset, available } => write!(
                f,
                "image ends before the COFF header (offset {offset:#x}, {available} bytes)"
            ),
            PeWarning::SectionTableTruncated { parsed, declared } => write!(
                f,
                "section table truncated after {parsed} of {declared} entries"
            ),
        }
    }
}

/// Parsed view of a decoded image's executable headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeImage {
    /// Offset of the `PE\0\0` signature within the image.
    pub pe_offset: usize,
    /// Whether a legacy DOS header pointed at the signature.
    pub has_dos_header: bool,
    pub coff: CoffHeader,
    pub sections: Vec<SectionHeader>,
    /// Degraded conditions hit during section enumeration.
    pub warnings: Vec<PeWarning>,
}

impl PeImage {
    /// Locate and parse the embedded executable headers.
    pub fn parse(image: &[u8]) -> Result<Self, PeWarning> {
        let (pe_offset, has_dos_header) =
            locate_signature(image).ok_or(PeWarning::NoSignature)?;

        let coff_offset = pe_offset + 4;
        if coff_offset + CoffHeader::SIZE > image.len() {
            return Err(PeWarning::CoffTruncated {
                offset: coff_offset,
                available: image.len(),
            });
        }
        let coff = CoffHeader::parse(&image[coff_offset..coff_offset + CoffHeader::SIZE])
            .map_err(|_| PeWarning::CoffTruncated {
                offset: coff_offset,
                available: image.len(),
            })?;

        let table_offset = coff_offset + CoffHeader::SIZE + coff.optional_header_size as usize;
        let mut sections = Vec::with_capacity(coff.section_count as usize);
        let mut warnings = Vec::new();

        for i in 0..coff.section_count as usize {
            let offset = table_offset + i * SECTION_RECORD_SIZE;
            let Some(record) = image.get(offset..offset + SECTION_RECORD_SIZE) else {
                warnings.push(PeWarning::SectionTableTruncated {
                    parsed: i as u16,
                    declared: coff.section_count,
                });
                #[cfg(feature = "logging")]
                tracing::warn!(
                    parsed = i,
                    declared = coff.section_count,
                    "section table truncated, stopping enumeration"
                );
                break;
            };
            match SectionHeader::parse(record) {
                Ok(section) => sections.push(section),
                Err(_) => {
                    warnings.push(PeWarning::SectionTableTruncated {
                        parsed: i as u16,
                        declared: coff.section_count,
                    });
                    break;
                }
            }
        }

        Ok(Self {
            pe_offset,
            has_dos_header,
            coff,
            sections,
            warnings,
        })
    }

    /// Total bytes contributed by non-code sections, counting
    /// `min(raw_size, virtual_size)` for each.
    pub fn data_bytes_total(&self) -> u64 {
        self.sections
            .iter()
            .filter(|s| !s.is_code())
            .map(|s| u64::from(s.loaded_size()))
            .sum()
    }
}

/// Find the `PE\0\0` signature: legacy DOS header first, then offset 0,
/// then a small set of alternates seen in the wild. The probe list is a
/// best-effort heuristic, not something the format guarantees. An
/// `e_lfanew` that points at garbage is ignored in favor of probing.
fn locate_signature(image: &[u8]) -> Option<(usize, bool)> {
    let sig_at = |offset: usize| {
        image
            .get(offset..offset + 4)
            .is_some_and(|bytes| bytes == PE_MAGIC)
    };

    if image.len() >= E_LFANEW_OFFSET + 4 && image[..2] == DOS_MAGIC {
        let e_lfanew = u32::from_le_bytes([
            image[E_LFANEW_OFFSET],
            image[E_LFANEW_OFFSET + 1],
            image[E_LFANEW_OFFSET + 2],
            image[E_LFANEW_OFFSET + 3],
        ]) as usize;
        if sig_at(e_lfanew) {
            return Some((e_lfanew, true));
        }
    }

    PROBE_OFFSETS
        .iter()
        .copied()
        .find(|&offset| sig_at(offset))
        .map(|offset| (offset, false))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use byteorder::{LittleEndian, WriteBytesExt};
    use enumflags2::BitFlags;

    use super::*;
    use crate::structs::{Machine, SectionFlag};

    const OPT_HEADER_SIZE: u16 = 16;

    struct SectionSpec {
        name: &'static [u8],
        virtual_size: u32,
        virtual_address: u32,
        raw_size: u32,
        raw_offset: u32,
        characteristics: u32,
    }

    /// Build a synthetic image: optional DOS stub, PE signature at
    /// `pe_offset`, COFF header, zeroed optional header, section table.
    fn build_image(dos_header: bool, pe_offset: usize, sections: &[SectionSpec]) -> Vec<u8> {
        let table_offset = pe_offset + 4 + CoffHeader::SIZE + OPT_HEADER_SIZE as usize;
        let total = table_offset + sections.len() * SECTION_RECORD_SIZE;

        let mut out = vec![0u8; total];
        let mut c = Cursor::new(&mut out[..]);

        if dos_header {
            c.write_all(&DOS_MAGIC).unwrap();
            c.set_position(E_LFANEW_OFFSET as u64);
            c.write_u32::<LittleEndian>(pe_offset as u32).unwrap();
        }

        c.set_position(pe_offset as u64);
        c.write_all(&PE_MAGIC).unwrap();
        c.write_u16::<LittleEndian>(Machine::PowerPcBe as u16).unwrap();
        c.write_u16::<LittleEndian>(sections.len() as u16).unwrap();
        c.write_u32::<LittleEndian>(0).unwrap(); // timestamp
        c.write_u32::<LittleEndian>(0).unwrap(); // symbol table
        c.write_u32::<LittleEndian>(0).unwrap(); // symbol count
        c.write_u16::<LittleEndian>(OPT_HEADER_SIZE).unwrap();
        c.write_u16::<LittleEndian>(0).unwrap(); // characteristics

        c.set_position(table_offset as u64);
        for s in sections {
            let mut name = [0u8; 8];
            name[..s.name.len()].copy_from_slice(s.name);
            c.write_all(&name).unwrap();
            c.write_u32::<LittleEndian>(s.virtual_size).unwrap();
            c.write_u32::<LittleEndian>(s.virtual_address).unwrap();
            c.write_u32::<LittleEndian>(s.raw_size).unwrap();
            c.write_u32::<LittleEndian>(s.raw_offset).unwrap();
            c.write_u32::<LittleEndian>(0).unwrap(); // relocations
            c.write_u32::<LittleEndian>(0).unwrap(); // line numbers
            c.write_u32::<LittleEndian>(0).unwrap(); // counts
            c.write_u32::<LittleEndian>(s.characteristics).unwrap();
        }

        out
    }

    fn two_sections() -> Vec<SectionSpec> {
        vec![
            SectionSpec {
                name: b".text",
                virtual_size: 0x4000,
                virtual_address: 0x1000,
                raw_size: 0x4000,
                raw_offset: 0x400,
                characteristics: 0x6000_0020, // CODE | X | R
            },
            SectionSpec {
                name: b".data",
                virtual_size: 0x2000,
                virtual_address: 0x5000,
                raw_size: 0x1800,
                raw_offset: 0x4400,
                characteristics: 0xC000_0040, // IDATA | R | W
            },
        ]
    }

    #[test]
    fn parses_image_with_dos_header() {
        let image = build_image(true, 0x80, &two_sections());
        let pe = PeImage::parse(&image).unwrap();

        assert_eq!(pe.pe_offset, 0x80);
        assert!(pe.has_dos_header);
        assert_eq!(pe.coff.machine_enum(), Ok(Machine::PowerPcBe));
        assert_eq!(pe.coff.section_count, 2);
        assert!(pe.warnings.is_empty());

        let text = &pe.sections[0];
        assert_eq!(text.name_str(), ".text");
        assert!(text.is_code());
        assert_eq!(
            text.flags_bits(),
            SectionFlag::Code | SectionFlag::MemExecute | SectionFlag::MemRead
        );
        assert_eq!(text.flags_str(), "CODE,X,R");

        let data = &pe.sections[1];
        assert_eq!(data.name_str(), ".data");
        assert!(!data.is_code());
        assert_eq!(
            data.flags_bits(),
            SectionFlag::InitializedData | SectionFlag::MemRead | SectionFlag::MemWrite
        );

        // Only the data section counts, at min(raw, virtual).
        assert_eq!(pe.data_bytes_total(), 0x1800);
    }

    #[test]
    fn parses_headerless_image_at_offset_zero() {
        let image = build_image(false, 0, &two_sections());
        let pe = PeImage::parse(&image).unwrap();

        assert_eq!(pe.pe_offset, 0);
        assert!(!pe.has_dos_header);
        assert_eq!(pe.sections.len(), 2);
    }

    #[test]
    fn probes_alternate_offsets() {
        let image = build_image(false, 0x100, &two_sections());
        let pe = PeImage::parse(&image).unwrap();

        assert_eq!(pe.pe_offset, 0x100);
        assert!(!pe.has_dos_header);
    }

    #[test]
    fn bad_e_lfanew_falls_back_to_probing() {
        let mut image = build_image(false, 0x80, &two_sections());
        // Fake DOS header whose e_lfanew points past the end of the image.
        image[0..2].copy_from_slice(&DOS_MAGIC);
        image[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4]
            .copy_from_slice(&0x0050_0000u32.to_le_bytes());

        let pe = PeImage::parse(&image).unwrap();
        assert_eq!(pe.pe_offset, 0x80);
        assert!(!pe.has_dos_header);
    }

    #[test]
    fn missing_signature_is_reported() {
        let image = vec![0u8; 0x2000];
        assert_eq!(PeImage::parse(&image), Err(PeWarning::NoSignature));
    }

    #[test]
    fn truncated_section_table_stops_early() {
        let mut image = build_image(false, 0, &two_sections());
        // Cut the image in the middle of the second record.
        let table = 4 + CoffHeader::SIZE + OPT_HEADER_SIZE as usize;
        image.truncate(table + SECTION_RECORD_SIZE + 10);

        let pe = PeImage::parse(&image).unwrap();
        assert_eq!(pe.sections.len(), 1);
        assert_eq!(pe.sections[0].name_str(), ".text");
        assert_eq!(
            pe.warnings,
            vec![PeWarning::SectionTableTruncated {
                parsed: 1,
                declared: 2,
            }]
        );
    }

    #[test]
    fn unknown_characteristic_bits_are_dropped() {
        let section = SectionHeader {
            name: *b".rdata\0\0",
            virtual_size: 0x100,
            virtual_address: 0x7000,
            raw_size: 0x100,
            raw_offset: 0x6000,
            characteristics: 0x4000_0040 | 0x0000_1000, // plus an unmodeled bit
        };
        assert_eq!(
            section.flags_bits(),
            SectionFlag::InitializedData | SectionFlag::MemRead
        );
    }

    #[test]
    fn coff_truncated_image_is_reported() {
        let mut image = build_image(false, 0x100, &[]);
        image.truncate(0x100 + 10);

        assert!(matches!(
            PeImage::parse(&image),
            Err(PeWarning::CoffTruncated { .. })
        ));
    }

    #[test]
    fn empty_flags_render_empty() {
        let section = SectionHeader {
            name: *b".pad\0\0\0\0",
            virtual_size: 0,
            virtual_address: 0,
            raw_size: 0,
            raw_offset: 0,
            characteristics: 0,
        };
        assert_eq!(section.flags_bits(), BitFlags::empty());
        assert_eq!(section.flags_str(), "");
    }
}
