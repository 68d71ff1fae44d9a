//! One-shot XEX2 decode pipeline.
//!
//! Parses the container structures up front, then decodes in a single pass:
//! unwrap the per-file key, decrypt the PE data area, expand basic-block
//! compression, and size the result to the declared image size.
//!
//! ```ignore
//! let xex = XexFile::open(std::fs::read("default.xex")?)?;
//! let image = xex.decode()?;
//! std::fs::write("default.bin", &image.bytes)?;
//! ```

use crate::compression;
use crate::crypto;
use crate::error::{DecodeWarning, XexError};
use crate::headers::{
    CompressionType, EncryptionType, FileFormatInfo, OptionalHeaders, SecurityInfo, XexHeader,
};

/// Parsed XEX2 container over an in-memory file.
///
/// All fatal format errors (bad magic, missing format info, unsupported
/// encryption type, truncation before a required field) surface in
/// [`Self::open`], before any decryption or decompression is attempted.
pub struct XexFile {
    data: Vec<u8>,
    header: XexHeader,
    opt_headers: OptionalHeaders,
    security: SecurityInfo,
    format_info: FileFormatInfo,
}

/// Fully decoded image plus everything a caller may want to report.
pub struct DecodedImage {
    /// Exactly `image_size` bytes, truncated or zero-extended as needed.
    pub bytes: Vec<u8>,
    /// Unwrapped content key, when the container was encrypted.
    pub file_key: Option<[u8; 16]>,
    /// Degraded-decode conditions encountered along the way.
    pub warnings: Vec<DecodeWarning>,
}

impl XexFile {
    /// Parse all fixed structures of the container.
    pub fn open(data: Vec<u8>) -> Result<Self, XexError> {
        let header = XexHeader::parse(&data)?;
        let opt_headers = OptionalHeaders::parse(&data, header.optional_header_count)?;

        // Without the format info the decryption and decompression
        // parameters are unknowable, so this is fatal.
        let ffi_offset = opt_headers
            .file_format_info_offset
            .ok_or(XexError::MissingFormatInfo)?;

        let security = SecurityInfo::parse(&data, header.security_info_offset as usize)?;
        let format_info = FileFormatInfo::parse(&data, ffi_offset as usize)?;

        if let Err(raw) = format_info.encryption_type_enum() {
            return Err(XexError::UnsupportedEncryption(raw));
        }

        Ok(Self {
            data,
            header,
            opt_headers,
            security,
            format_info,
        })
    }

    // -- accessors ----------------------------------------------------------

    /// Reference to the parsed fixed header.
    pub const fn header(&self) -> &XexHeader {
        &self.header
    }

    /// Values captured from the recognized optional headers.
    pub const fn optional_headers(&self) -> &OptionalHeaders {
        &self.opt_headers
    }

    /// Reference to the parsed security info fields.
    pub const fn security(&self) -> &SecurityInfo {
        &self.security
    }

    /// Reference to the parsed file format info.
    pub const fn format_info(&self) -> &FileFormatInfo {
        &self.format_info
    }

    // -- pipeline -----------------------------------------------------------

    /// Decrypt and decompress the PE data area into the final image.
    pub fn decode(&self) -> Result<DecodedImage, XexError> {
        let payload_offset = self.header.pe_data_offset as usize;
        if payload_offset > self.data.len() {
            return Err(XexError::Truncated {
                needed: payload_offset,
                available: self.data.len(),
            });
        }
        let payload = &self.data[payload_offset..];

        let (decrypted, file_key) = match self.format_info.encryption_type_enum() {
            Ok(EncryptionType::Normal) => {
                let key = crypto::unwrap_file_key(&self.security.file_key)?;
                (crypto::decrypt_pe_data(&key, payload)?, Some(key))
            }
            // Unknown values were rejected in `open`.
            _ => (payload.to_vec(), None),
        };

        let image_size = self.security.image_size as usize;
        let mut warnings = Vec::new();

        let bytes = match self.format_info.compression_type_enum() {
            Ok(CompressionType::None) => compression::passthrough(decrypted, image_size),
            Ok(CompressionType::Basic) => compression::decompress_basic(
                &decrypted,
                &self.format_info.blocks,
                image_size,
                &mut warnings,
            ),
            _ => {
                // LZX, delta, and unknown schemes fall back to pass-through.
                // The output is not guaranteed correct, but a best-effort
                // image beats an aborted run.
                let raw = self.format_info.compression_type;
                warnings.push(DecodeWarning::UnsupportedCompression(raw));
                #[cfg(feature = "logging")]
                tracing::warn!(
                    compression_type = raw,
                    "unsupported compression, writing payload as-is"
                );
                compression::passthrough(decrypted, image_size)
            }
        };

        Ok(DecodedImage {
            bytes,
            file_key,
            warnings,
        })
    }
}
