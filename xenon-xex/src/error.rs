//! Error and warning types for XEX2 decoding.

use core::fmt;

use thiserror::Error;

/// Fatal decode errors. Any of these aborts the run before output is written.
#[derive(Debug, Error)]
pub enum XexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a XEX2 file (magic: {0:02X?})")]
    BadMagic([u8; 4]),

    #[error("file format info optional header not found")]
    MissingFormatInfo,

    #[error("unsupported encryption type {0:#06x} — cannot decrypt")]
    UnsupportedEncryption(u16),

    #[error("file truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

/// Non-fatal conditions encountered while decoding.
///
/// These are carried on the result rather than raised: the decoder keeps
/// producing best-effort output, which is usually more useful than an abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// Compression scheme this decoder cannot expand; the payload is passed
    /// through and truncated to the declared image size.
    UnsupportedCompression(u16),

    /// A block descriptor asked for more payload than remains. Only the
    /// available bytes were copied; later descriptors were skipped.
    BlockOverflow {
        block: usize,
        src_offset: usize,
        data_size: usize,
    },

    /// Sum of the block descriptors disagrees with the declared image size.
    ImageSizeMismatch {
        blocks_total: usize,
        image_size: usize,
    },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::UnsupportedCompression(raw) => {
                write!(f, "compression type {raw} not supported, writing payload as-is")
            }
            DecodeWarning::BlockOverflow {
                block,
                src_offset,
                data_size,
            } => write!(
                f,
                "block {block} overflow (src={src_offset:#x}, need {data_size})"
            ),
            DecodeWarning::ImageSizeMismatch {
                blocks_total,
                image_size,
            } => write!(
                f,
                "block total {blocks_total:#x} does not match declared image size {image_size:#x}"
            ),
        }
    }
}
