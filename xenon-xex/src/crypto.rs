//! AES primitives for XEX2 key unwrapping and PE data decryption.
//!
//! Both steps run AES-128-CBC with a zero IV: the retail key unwraps the
//! per-file key, and the per-file key decrypts everything from the PE data
//! offset to end-of-file.

use std::io;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Well-known Xbox 360 retail AES-128 key that unwraps per-file keys.
pub const RETAIL_KEY: [u8; 16] = [
    0x20, 0xB1, 0x85, 0xA5, 0x9D, 0x28, 0xFD, 0xC3, 0x40, 0x58, 0x3F, 0xBB, 0x08, 0x96, 0xBF, 0x91,
];

/// IV used for both the key unwrap and the bulk decrypt.
pub const BLANK_IV: [u8; 16] = [0u8; 16];

/// AES-CBC decrypt in-place. `data` must be a multiple of 16 bytes.
pub fn aes_decrypt_cbc(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> io::Result<()> {
    let decryptor = Aes128CbcDec::new(key.into(), iv.into());
    decryptor
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| io::Error::other("cbc decrypt failed"))?;
    Ok(())
}

/// AES-CBC encrypt in-place. `data` must be a multiple of 16 bytes.
pub fn aes_encrypt_cbc(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> io::Result<()> {
    let encryptor = Aes128CbcEnc::new(key.into(), iv.into());
    encryptor
        .encrypt_padded_mut::<NoPadding>(data, data.len())
        .map_err(|_| io::Error::other("cbc encrypt failed"))?;
    Ok(())
}

/// Unwrap the per-file content key stored in the security info block.
pub fn unwrap_file_key(encrypted: &[u8; 16]) -> io::Result<[u8; 16]> {
    let mut key = *encrypted;
    aes_decrypt_cbc(&RETAIL_KEY, &BLANK_IV, &mut key)?;
    Ok(key)
}

/// Decrypt the PE data area with the unwrapped file key.
///
/// The input is zero-padded on the right to a 16-byte boundary first. The
/// pad bytes are not part of the logical payload; downstream length limits
/// discard them rather than trusting them as content.
pub fn decrypt_pe_data(key: &[u8; 16], payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut buf = payload.to_vec();
    buf.resize(payload.len().div_ceil(16) * 16, 0);
    aes_decrypt_cbc(key, &BLANK_IV, &mut buf)?;
    Ok(buf)
}
