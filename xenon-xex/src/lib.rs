//! Xbox 360 XEX2 container decoding.
//!
//! This crate decodes an encrypted, optionally block-compressed XEX2
//! executable container into the raw PE image it wraps. The pipeline is
//! strictly sequential: header parsing, key unwrap, bulk decrypt, block
//! decompression.

pub mod compression;
pub mod crypto;
pub mod error;
pub mod headers;
pub mod reader;

// Re-export main types for convenience
pub use error::{DecodeWarning, XexError};
pub use headers::{
    BasicBlock, CompressionType, EncryptionType, FileFormatInfo, OptionalHeaders, SecurityInfo,
    XexHeader,
};
pub use reader::{DecodedImage, XexFile};
