//! SCSI UNMAP parameter list decoding and ATA DATA SET MANAGEMENT (TRIM)
//! entry encoding.
//!
//! The UNMAP parameter list is a SCSI block-device descriptor list (SBC-3
//! §4.7); this engine turns it into 64-bit TRIM entries (48-bit LBA,
//! 16-bit block count).

use crate::error::DispatchError;
use alloc::vec::Vec;
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, be_u64};
use nom::IResult;

/// One SCSI UNMAP block descriptor: (LBA, block count). A zero count means
/// "all remaining blocks" in SBC-3, but this engine treats it as a no-op
/// descriptor, not a wildcard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnmapDescriptor {
    pub lba: u64,
    pub block_count: u32,
}

const DESCRIPTOR_LEN: usize = 16;

fn parse_descriptor(input: &[u8]) -> IResult<&[u8], UnmapDescriptor> {
    let (input, lba) = be_u64(input)?;
    let (input, block_count) = be_u32(input)?;
    let (input, _reserved) = take(4usize)(input)?;
    Ok((
        input,
        UnmapDescriptor {
            lba,
            block_count,
        },
    ))
}

/// Decode a SCSI UNMAP parameter list: an 8-byte header (unmap data
/// length, block descriptor data length) followed by 16-byte descriptors.
pub fn decode_unmap_parameter_list(param_list: &[u8]) -> Result<Vec<UnmapDescriptor>, DispatchError> {
    if param_list.len() < 8 {
        return Err(DispatchError::InvalidParameterList);
    }
    let (rest, _unmap_data_length) = be_u16::<_, nom::error::Error<&[u8]>>(param_list)
        .map_err(|_| DispatchError::InvalidParameterList)?;
    let (rest, _reserved) = be_u16::<_, nom::error::Error<&[u8]>>(rest)
        .map_err(|_| DispatchError::InvalidParameterList)?;
    let (rest, descriptor_data_length) = be_u32::<_, nom::error::Error<&[u8]>>(rest)
        .map_err(|_| DispatchError::InvalidParameterList)?;

    let descriptor_bytes = descriptor_data_length as usize;
    if descriptor_bytes % DESCRIPTOR_LEN != 0 || descriptor_bytes > rest.len() {
        return Err(DispatchError::InvalidParameterList);
    }

    let mut input = &rest[..descriptor_bytes];
    let mut out = Vec::with_capacity(descriptor_bytes / DESCRIPTOR_LEN);
    while !input.is_empty() {
        let (remainder, descriptor) =
            parse_descriptor(input).map_err(|_| DispatchError::InvalidParameterList)?;
        out.push(descriptor);
        input = remainder;
    }
    Ok(out)
}

/// Maximum LBA a 48-bit TRIM entry can address.
pub const TRIM_MAX_LBA: u64 = (1u64 << 48) - 1;
/// Maximum block count a single TRIM entry's 16-bit length field can hold.
pub const TRIM_MAX_LENGTH: u32 = 0xFFFF;

/// A single 8-byte DATA SET MANAGEMENT TRIM entry: 48-bit LBA packed into
/// the low 48 bits, 16-bit block count in the high bits (ATA8-ACS TRIM
/// descriptor layout).
pub fn encode_trim_entry(lba: u64, block_count: u16) -> Result<[u8; 8], DispatchError> {
    if lba > TRIM_MAX_LBA {
        return Err(DispatchError::InvalidCdbField);
    }
    let packed = (lba & TRIM_MAX_LBA) | ((block_count as u64) << 48);
    Ok(packed.to_le_bytes())
}

/// Split SCSI UNMAP descriptors into batches of ATA TRIM entries, each
/// batch bounded by three caps: `max_range_blocks_per_entry` (device's
/// IDENTIFY word 105, possibly clamped further by a model quirk),
/// `TRIM_MAX_LENGTH` per entry, and `entries_per_batch` (scratch-buffer
/// capacity / 8, itself bounded to the device's max-DSM-range count).
///
/// Descriptors with a zero block count are dropped (no-op, not an error).
/// Descriptors whose LBA exceeds the 48-bit addressable range are skipped
/// with no entry emitted — a diagnostic belongs at the call site, this
/// function only reports whether any were dropped via the bool.
pub fn split_into_trim_batches(
    descriptors: &[UnmapDescriptor],
    entries_per_batch: usize,
) -> (Vec<Vec<[u8; 8]>>, bool) {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(entries_per_batch);
    let mut any_dropped = false;

    for d in descriptors {
        if d.block_count == 0 {
            continue;
        }
        let mut remaining = d.block_count;
        let mut lba = d.lba;
        while remaining > 0 {
            if lba > TRIM_MAX_LBA {
                any_dropped = true;
                break;
            }
            let chunk = remaining.min(TRIM_MAX_LENGTH);
            let entry = match encode_trim_entry(lba, chunk as u16) {
                Ok(e) => e,
                Err(_) => {
                    any_dropped = true;
                    break;
                }
            };
            if current.len() == entries_per_batch {
                batches.push(core::mem::replace(&mut current, Vec::with_capacity(entries_per_batch)));
            }
            current.push(entry);
            lba += chunk as u64;
            remaining -= chunk;
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    (batches, any_dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_param_list(descriptors: &[UnmapDescriptor]) -> Vec<u8> {
        let descriptor_bytes = descriptors.len() * DESCRIPTOR_LEN;
        let mut out = Vec::with_capacity(8 + descriptor_bytes);
        out.extend_from_slice(&((descriptor_bytes + 6) as u16).to_be_bytes());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&(descriptor_bytes as u32).to_be_bytes());
        for d in descriptors {
            out.extend_from_slice(&d.lba.to_be_bytes());
            out.extend_from_slice(&d.block_count.to_be_bytes());
            out.extend_from_slice(&[0u8; 4]);
        }
        out
    }

    #[test]
    fn decodes_zero_descriptor_list() {
        let param = build_param_list(&[]);
        let descriptors = decode_unmap_parameter_list(&param).unwrap();
        assert!(descriptors.is_empty());
    }

    #[test]
    fn decodes_multiple_descriptors() {
        let input = [
            UnmapDescriptor { lba: 100, block_count: 5 },
            UnmapDescriptor { lba: 2000, block_count: 64 },
        ];
        let param = build_param_list(&input);
        let descriptors = decode_unmap_parameter_list(&param).unwrap();
        assert_eq!(descriptors, input);
    }

    #[test]
    fn rejects_descriptor_length_not_multiple_of_16() {
        let mut param = build_param_list(&[UnmapDescriptor { lba: 1, block_count: 1 }]);
        param[7] = 15; // corrupt descriptor_data_length
        let r = decode_unmap_parameter_list(&param);
        assert_eq!(r, Err(DispatchError::InvalidParameterList));
    }

    #[test]
    fn rejects_length_field_exceeding_buffer() {
        let mut param = build_param_list(&[UnmapDescriptor { lba: 1, block_count: 1 }]);
        param[4..8].copy_from_slice(&1_000_000u32.to_be_bytes());
        let r = decode_unmap_parameter_list(&param);
        assert_eq!(r, Err(DispatchError::InvalidParameterList));
    }

    #[test]
    fn trim_entry_packs_lba_and_length() {
        let entry = encode_trim_entry(0x0000_1234_5678, 10).unwrap();
        let packed = u64::from_le_bytes(entry);
        assert_eq!(packed & TRIM_MAX_LBA, 0x0000_1234_5678);
        assert_eq!(packed >> 48, 10);
    }

    #[test]
    fn trim_entry_rejects_lba_beyond_48_bits() {
        let r = encode_trim_entry(1u64 << 48, 1);
        assert_eq!(r, Err(DispatchError::InvalidCdbField));
    }

    #[test]
    fn split_batches_respects_entries_per_batch_cap() {
        let descriptors = [UnmapDescriptor { lba: 0, block_count: 200_000 }];
        let (batches, dropped) = split_into_trim_batches(&descriptors, 64);
        assert!(!dropped);
        for b in &batches[..batches.len() - 1] {
            assert_eq!(b.len(), 64);
        }
        let total_entries: usize = batches.iter().map(|b| b.len()).sum();
        let expected_entries = (200_000u32 as f64 / TRIM_MAX_LENGTH as f64).ceil() as usize;
        assert_eq!(total_entries, expected_entries);
    }

    #[test]
    fn split_batches_drops_zero_length_descriptors() {
        let descriptors = [UnmapDescriptor { lba: 50, block_count: 0 }];
        let (batches, dropped) = split_into_trim_batches(&descriptors, 64);
        assert!(batches.is_empty());
        assert!(!dropped);
    }

    #[test]
    fn split_batches_flags_lba_overflow_and_skips_entry() {
        let descriptors = [UnmapDescriptor { lba: TRIM_MAX_LBA + 1, block_count: 2 }];
        let (batches, dropped) = split_into_trim_batches(&descriptors, 64);
        assert!(dropped);
        assert!(batches.is_empty());
    }
}
