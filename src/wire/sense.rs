//! Fixed-format SCSI sense response synthesis (SPC-3 §4.5.3).

use crate::error::SenseTuple;

pub const FIXED_SENSE_LEN: usize = 18;

/// Encode `tuple` as an 18-byte fixed-format sense response.
///
/// error-code = 0x70 (current errors, fixed format); sense-key at offset
/// 2, ASC at offset 12, ASCQ at offset 13; additional-sense-length (offset
/// 7) is fixed at `FIXED_SENSE_LEN - 8`.
pub fn encode_fixed_sense(tuple: &SenseTuple) -> [u8; FIXED_SENSE_LEN] {
    let mut out = [0u8; FIXED_SENSE_LEN];
    out[0] = 0x70;
    out[2] = tuple.key as u8;
    out[7] = (FIXED_SENSE_LEN - 8) as u8;
    out[12] = tuple.asc;
    out[13] = tuple.ascq;
    out
}

/// Copy an encoded sense response into the caller's buffer, truncated to
/// whichever of the buffer length or the CDB allocation length is
/// shorter (REQUEST SENSE's contract).
pub fn copy_sense_truncated(sense: &[u8; FIXED_SENSE_LEN], out: &mut [u8], allocation_length: usize) -> usize {
    let n = sense.len().min(out.len()).min(allocation_length);
    out[..n].copy_from_slice(&sense[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{asc, SenseKey};

    #[test]
    fn encodes_key_asc_ascq_at_fixed_offsets() {
        let tuple = SenseTuple::new(SenseKey::MediumError, asc::MEDIUM_NOT_PRESENT.0, asc::MEDIUM_NOT_PRESENT.1);
        let buf = encode_fixed_sense(&tuple);
        assert_eq!(buf[0], 0x70);
        assert_eq!(buf[2], SenseKey::MediumError as u8);
        assert_eq!(buf[12], 0x3A);
        assert_eq!(buf[13], 0x00);
    }

    #[test]
    fn second_request_sense_on_empty_tuple_is_all_zero_key() {
        let buf = encode_fixed_sense(&SenseTuple::NONE);
        assert_eq!(buf[2], 0);
        assert_eq!(buf[12], 0);
        assert_eq!(buf[13], 0);
    }

    #[test]
    fn copy_truncates_to_shortest_of_buffer_and_allocation() {
        let tuple = SenseTuple::new(SenseKey::AbortedCommand, 0, 0);
        let sense = encode_fixed_sense(&tuple);
        let mut out = [0u8; 8];
        let n = copy_sense_truncated(&sense, &mut out, 100);
        assert_eq!(n, 8);
        let mut out2 = [0u8; 18];
        let n2 = copy_sense_truncated(&sense, &mut out2, 4);
        assert_eq!(n2, 4);
    }
}
