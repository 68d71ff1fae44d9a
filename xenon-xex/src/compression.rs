//! Basic-block decompression for the XEX2 PE data area.

use crate::error::DecodeWarning;
use crate::headers::BasicBlock;

/// Expand a basic-block compressed payload.
///
/// The output buffer is pre-sized to `max(image_size, blocks total)` and
/// zero-initialized. Zero runs are skipped, never written, so the gap
/// regions depend on that initialization staying untouched by the
/// surrounding copies. The result is truncated or zero-extended to exactly
/// `image_size` at the end.
///
/// A descriptor that reads past the end of the payload copies only what
/// remains and stops the walk; the rest of the buffer stays zero. That is a
/// degraded output, not a failure.
pub fn decompress_basic(
    payload: &[u8],
    blocks: &[BasicBlock],
    image_size: usize,
    warnings: &mut Vec<DecodeWarning>,
) -> Vec<u8> {
    let blocks_total: usize = blocks.iter().map(BasicBlock::total).sum();
    if blocks_total != image_size {
        warnings.push(DecodeWarning::ImageSizeMismatch {
            blocks_total,
            image_size,
        });
        #[cfg(feature = "logging")]
        tracing::warn!(
            blocks_total,
            image_size,
            "block total does not match declared image size"
        );
    }

    let mut out = vec![0u8; blocks_total.max(image_size)];
    let mut src = 0usize;
    let mut dst = 0usize;

    for (i, block) in blocks.iter().enumerate() {
        let data_size = block.data_size as usize;
        let zero_size = block.zero_size as usize;

        if src + data_size > payload.len() {
            // Copy what remains and stop.
            let avail = payload.len() - src;
            out[dst..dst + avail].copy_from_slice(&payload[src..]);
            warnings.push(DecodeWarning::BlockOverflow {
                block: i,
                src_offset: src,
                data_size,
            });
            #[cfg(feature = "logging")]
            tracing::warn!(
                block = i,
                src_offset = src,
                data_size,
                "block descriptor overruns decrypted payload"
            );
            break;
        }

        out[dst..dst + data_size].copy_from_slice(&payload[src..src + data_size]);
        src += data_size;
        dst += data_size + zero_size;
    }

    out.resize(image_size, 0);
    out
}

/// Identity stage for uncompressed (or unsupported) payloads: truncate or
/// zero-extend to the declared image size.
pub fn passthrough(mut payload: Vec<u8>, image_size: usize) -> Vec<u8> {
    payload.resize(image_size, 0);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(runs: &[(u32, u32)]) -> Vec<BasicBlock> {
        runs.iter()
            .map(|&(data_size, zero_size)| BasicBlock {
                data_size,
                zero_size,
            })
            .collect()
    }

    #[test]
    fn literal_then_zero_run() {
        let mut warnings = Vec::new();
        let out = decompress_basic(b"AABB", &blocks(&[(4, 4)]), 8, &mut warnings);

        assert_eq!(out, b"AABB\x00\x00\x00\x00");
        assert!(warnings.is_empty());
    }

    #[test]
    fn zero_gaps_between_literals_stay_zero() {
        let mut warnings = Vec::new();
        let out = decompress_basic(b"\xAA\xAA\xBB\xBB", &blocks(&[(2, 3), (2, 1)]), 8, &mut warnings);

        assert_eq!(out, b"\xAA\xAA\x00\x00\x00\xBB\xBB\x00");
        assert!(warnings.is_empty());
    }

    #[test]
    fn overflow_copies_remainder_and_stops() {
        let mut warnings = Vec::new();
        let out = decompress_basic(b"\x11\x22\x33\x44", &blocks(&[(8, 0), (4, 0)]), 8, &mut warnings);

        assert_eq!(out, b"\x11\x22\x33\x44\x00\x00\x00\x00");
        assert!(warnings.contains(&DecodeWarning::BlockOverflow {
            block: 0,
            src_offset: 0,
            data_size: 8,
        }));
        // The mismatch between block total (12) and image size (8) is also
        // reported.
        assert!(warnings.contains(&DecodeWarning::ImageSizeMismatch {
            blocks_total: 12,
            image_size: 8,
        }));
    }

    #[test]
    fn block_total_larger_than_image_size_truncates() {
        let mut warnings = Vec::new();
        let out = decompress_basic(b"ABCDEFGH", &blocks(&[(8, 8)]), 12, &mut warnings);

        assert_eq!(out.len(), 12);
        assert_eq!(&out[..8], b"ABCDEFGH");
        assert!(out[8..].iter().all(|&b| b == 0));
        assert!(warnings.contains(&DecodeWarning::ImageSizeMismatch {
            blocks_total: 16,
            image_size: 12,
        }));
    }

    #[test]
    fn block_total_smaller_than_image_size_zero_extends() {
        let mut warnings = Vec::new();
        let out = decompress_basic(b"AB", &blocks(&[(2, 0)]), 6, &mut warnings);

        assert_eq!(out, b"AB\x00\x00\x00\x00");
        assert_eq!(
            warnings,
            vec![DecodeWarning::ImageSizeMismatch {
                blocks_total: 2,
                image_size: 6,
            }]
        );
    }

    #[test]
    fn passthrough_truncates() {
        assert_eq!(passthrough(b"ABCDEF".to_vec(), 4), b"ABCD");
    }

    #[test]
    fn passthrough_zero_extends() {
        assert_eq!(passthrough(b"AB".to_vec(), 4), b"AB\x00\x00");
    }
}
