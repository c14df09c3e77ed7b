//! SCSI response PDU encode/decode: standard INQUIRY, VPD pages,
//! READ CAPACITY (10/16), MODE SENSE (10), MODE SELECT (10).
//!
//! All multi-byte fields are big-endian (SPC-3/SBC-3).

use crate::error::{asc, DispatchError};
use crate::wire::identify::IdentifyBlock;
use alloc::vec::Vec;

pub const STANDARD_INQUIRY_LEN: usize = 36;

/// VPD page codes this engine answers.
pub mod vpd_page {
    pub const SUPPORTED_PAGES: u8 = 0x00;
    pub const BLOCK_LIMITS: u8 = 0xB0;
    pub const LOGICAL_BLOCK_PROVISIONING: u8 = 0xB2;
}

/// Split an ATA model number into (vendor, product) fields: split at the
/// first space, or at a hyphen if no space falls within the 8-byte
/// vendor field, else a blind 8/16 split.
fn split_vendor_product(model: &str) -> (&str, &str) {
    let bytes = model.as_bytes();
    if let Some(space) = bytes.iter().position(|&b| b == b' ') {
        if space <= 8 {
            return (&model[..space], model[space..].trim_start());
        }
    }
    if let Some(hyphen) = bytes[..bytes.len().min(8)].iter().position(|&b| b == b'-') {
        return (&model[..hyphen], &model[hyphen..]);
    }
    let split = model.len().min(8);
    (&model[..split], &model[split..])
}

fn pad_field(dst: &mut [u8], src: &str) {
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    for b in dst[n..].iter_mut() {
        *b = b' ';
    }
}

/// Encode the 36-byte standard INQUIRY response from a cached identify
/// block.
pub fn encode_standard_inquiry(id: &IdentifyBlock) -> [u8; STANDARD_INQUIRY_LEN] {
    let mut out = [0u8; STANDARD_INQUIRY_LEN];
    // Peripheral device type: 0x00 direct-access block device, 0x05 CD/DVD.
    out[0] = if id.is_atapi { 0x05 } else { 0x00 };
    out[1] = if id.removable_media { 0x80 } else { 0x00 };
    out[2] = 0x05; // ANSI version: SPC-3
    out[3] = 0x02; // response data format
    out[4] = (STANDARD_INQUIRY_LEN - 5) as u8; // additional length

    let (vendor, product) = split_vendor_product(&id.model_number);
    pad_field(&mut out[8..16], vendor);
    pad_field(&mut out[16..32], product);

    // Product revision = last 4 bytes of the serial number.
    let serial = &id.serial_number;
    let rev_src = if serial.len() >= 4 {
        &serial[serial.len() - 4..]
    } else {
        serial.as_str()
    };
    pad_field(&mut out[32..36], rev_src);
    out
}

/// Encode the "supported VPD pages" page (page 0x00).
pub fn encode_vpd_supported_pages(is_atapi: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(if is_atapi { 0x05 } else { 0x00 });
    out.push(vpd_page::SUPPORTED_PAGES);
    out.push(0);
    out.push(2); // page length
    out.push(vpd_page::BLOCK_LIMITS);
    out.push(vpd_page::LOGICAL_BLOCK_PROVISIONING);
    out
}

/// Encode the block-limits VPD page (0xB0). Unmap fields are zeroed when
/// trim is unsupported, never omitted: the page is always answered once
/// it is present in the supported-pages list.
pub fn encode_vpd_block_limits(trim_supported: bool, max_trim_range_blocks: u16) -> Vec<u8> {
    let mut out = alloc::vec![0u8; 20];
    out[1] = vpd_page::BLOCK_LIMITS;
    out[3] = (out.len() - 4) as u8;
    if trim_supported {
        // Maximum UNMAP LBA count: unlimited (0xFFFFFFFF), bytes 20..24 in
        // the full page; grow the minimal 20-byte page to fit it.
        out.resize(24, 0);
        out[20..24].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        let max_descriptor_count = (max_trim_range_blocks as u32) * 64;
        out.resize(28, 0);
        out[24..28].copy_from_slice(&max_descriptor_count.to_be_bytes());
        out[3] = (out.len() - 4) as u8;
    }
    out
}

/// Encode the logical-block-provisioning VPD page (0xB2).
pub fn encode_vpd_logical_block_provisioning(lbpu: bool, lbprz: bool) -> Vec<u8> {
    let mut out = alloc::vec![0u8; 8];
    out[1] = vpd_page::LOGICAL_BLOCK_PROVISIONING;
    out[3] = (out.len() - 4) as u8;
    let mut flags = 0u8;
    if lbpu {
        flags |= 0x80;
    }
    if lbprz {
        flags |= 0x40;
    }
    out[5] = flags;
    out
}

/// Encode READ CAPACITY (10): block size + clamped LBA.
pub fn encode_read_capacity_10(total_sectors: u64, sector_size: u32) -> [u8; 8] {
    let last_lba = total_sectors.saturating_sub(1).min(0xFFFF_FFFF) as u32;
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&last_lba.to_be_bytes());
    out[4..8].copy_from_slice(&sector_size.to_be_bytes());
    out
}

/// Encode READ CAPACITY (16): full 64-bit LBA plus LBPME/LBPRZ.
pub fn encode_read_capacity_16(total_sectors: u64, sector_size: u32, lbpme: bool, lbprz: bool) -> [u8; 32] {
    let mut out = [0u8; 32];
    let last_lba = total_sectors.saturating_sub(1);
    out[0..8].copy_from_slice(&last_lba.to_be_bytes());
    out[8..12].copy_from_slice(&sector_size.to_be_bytes());
    let mut flags = 0u8;
    if lbpme {
        flags |= 0x80;
    }
    if lbprz {
        flags |= 0x40;
    }
    out[12] = flags;
    out
}

/// MODE SENSE page-control values (SPC-3 table 100).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageControl {
    Current,
    Changeable,
    Default,
    Saved,
}

pub fn decode_page_control(bits: u8) -> PageControl {
    match bits & 0x03 {
        0 => PageControl::Current,
        1 => PageControl::Changeable,
        2 => PageControl::Default,
        _ => PageControl::Saved,
    }
}

pub const MODEPAGE_CONTROL: u8 = 0x0A;
pub const MODEPAGE_ALL: u8 = 0x3F;

/// Encode MODE SENSE (10): header + one block descriptor + the control
/// mode page. `page_control` must be Current or Saved and `page_code`
/// must be control or all-pages, or this returns invalid-field-in-CDB.
pub fn encode_mode_sense_10(
    page_code: u8,
    page_control: PageControl,
    sector_size: u32,
) -> Result<Vec<u8>, DispatchError> {
    if page_code != MODEPAGE_CONTROL && page_code != MODEPAGE_ALL {
        return Err(DispatchError::InvalidCdbField);
    }
    if !matches!(page_control, PageControl::Current | PageControl::Saved) {
        return Err(DispatchError::InvalidCdbField);
    }

    const HEADER_LEN: usize = 8;
    const BLOCK_DESC_LEN: usize = 8;
    const CONTROL_PAGE_LEN: usize = 8;
    let total_len = HEADER_LEN + BLOCK_DESC_LEN + CONTROL_PAGE_LEN;

    let mut out = alloc::vec![0u8; total_len];
    out[0..2].copy_from_slice(&((total_len - 2) as u16).to_be_bytes());
    out[6..8].copy_from_slice(&(BLOCK_DESC_LEN as u16).to_be_bytes());

    // Block descriptor: reserved density, number-of-blocks = 0 (applies to
    // entire medium), 3-byte block length.
    let bd = &mut out[HEADER_LEN..HEADER_LEN + BLOCK_DESC_LEN];
    bd[5] = (sector_size >> 16) as u8;
    bd[6] = (sector_size >> 8) as u8;
    bd[7] = sector_size as u8;

    // Control mode page: page code 0x0A, page length 6, DQue=1 (queuing
    // disabled, this engine exposes queue depth 1 per device), QErr
    // clear, QAM unrestricted.
    let cp_off = HEADER_LEN + BLOCK_DESC_LEN;
    out[cp_off] = MODEPAGE_CONTROL;
    out[cp_off + 1] = (CONTROL_PAGE_LEN - 2) as u8;
    out[cp_off + 2] = 0x02; // DQue bit
    Ok(out)
}

/// Decode MODE SELECT (10)'s control page. Only the control page is
/// recognized; others are rejected with invalid-parameter-field. Returns
/// the page's DQue bit if accepted.
pub fn decode_mode_select_10(param_list: &[u8]) -> Result<bool, DispatchError> {
    const HEADER_LEN: usize = 8;
    if param_list.len() < HEADER_LEN {
        return Err(DispatchError::InvalidParameterList);
    }
    let block_desc_len = u16::from_be_bytes([param_list[6], param_list[7]]) as usize;
    let mut offset = HEADER_LEN + block_desc_len;

    while offset + 2 <= param_list.len() {
        let page_code = param_list[offset] & 0x3F;
        let page_length = param_list[offset + 1] as usize;
        let page_total = page_length + 2;
        if offset + page_total > param_list.len() {
            return Err(DispatchError::InvalidParameterList);
        }
        if page_code == MODEPAGE_CONTROL {
            const CONTROL_PAGE_BODY_LEN: usize = 6;
            if page_length != CONTROL_PAGE_BODY_LEN {
                return Err(DispatchError::InvalidParameterList);
            }
            let dque = (param_list[offset + 2] & 0x02) != 0;
            return Ok(dque);
        }
        // Other pages are recognized-but-rejected.
        return Err(DispatchError::InvalidParameterList);
    }
    Err(DispatchError::InvalidParameterList)
}

/// sense ASC/ASCQ helper used by callers translating a `DispatchError`
/// into a sense tuple.
pub fn dispatch_error_asc(err: DispatchError) -> (u8, u8) {
    match err {
        DispatchError::InvalidOpcode => asc::INVALID_COMMAND_OPERATION_CODE,
        DispatchError::InvalidCdbField => asc::INVALID_FIELD_IN_CDB,
        DispatchError::InvalidParameterList => asc::INVALID_FIELD_IN_PARAMETER_LIST,
        DispatchError::DirectionMismatch => asc::INVALID_FIELD_IN_CDB,
        DispatchError::LunOutOfRange => asc::NO_ADDITIONAL_SENSE,
        DispatchError::LengthMismatch => asc::INVALID_FIELD_IN_CDB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::identify::build_identify_fixture;

    fn fixture_id(model: &str, serial: &str) -> IdentifyBlock {
        let buf = build_identify_fixture(model, serial, "FW01", 400, 0, false, false, false, false, 0);
        crate::wire::identify::parse_identify(&buf)
    }

    #[test]
    fn read_capacity_10_clamps_s3() {
        let buf = encode_read_capacity_10(400, 512);
        assert_eq!(buf, [0x00, 0x00, 0x01, 0x8F, 0x00, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn read_capacity_10_clamps_huge_capacity() {
        let total = (1u64 << 33) + 10;
        let buf = encode_read_capacity_10(total, 512);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), 0xFFFF_FFFF);
    }

    #[test]
    fn read_capacity_16_reports_true_last_lba() {
        let total = (1u64 << 33) + 10;
        let buf = encode_read_capacity_16(total, 512, true, true);
        let last_lba = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        assert_eq!(last_lba, total - 1);
        assert_eq!(buf[12] & 0x80, 0x80);
        assert_eq!(buf[12] & 0x40, 0x40);
    }

    #[test]
    fn inquiry_splits_model_at_space() {
        let id = fixture_id("ACME DRIVE9000", "ABCDEFGH1234");
        let buf = encode_standard_inquiry(&id);
        let vendor = core::str::from_utf8(&buf[8..16]).unwrap().trim_end();
        assert_eq!(vendor, "ACME");
        let revision = core::str::from_utf8(&buf[32..36]).unwrap();
        assert_eq!(revision, "1234");
    }

    #[test]
    fn vpd_block_limits_zero_fills_when_trim_unsupported() {
        let page = encode_vpd_block_limits(false, 0);
        assert_eq!(page.len(), 20);
        assert!(page[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn vpd_block_limits_max_unmap_lba_count_s6() {
        let page = encode_vpd_block_limits(true, 1);
        assert!(page.len() >= 16);
        let max_lba_count = u32::from_be_bytes(page[20..24].try_into().unwrap());
        assert_eq!(max_lba_count, 0xFFFF_FFFF);
    }

    #[test]
    fn mode_sense_rejects_unsupported_page_code() {
        let r = encode_mode_sense_10(0x08, PageControl::Current, 512);
        assert_eq!(r, Err(DispatchError::InvalidCdbField));
    }

    #[test]
    fn mode_sense_rejects_changeable_page_control() {
        let r = encode_mode_sense_10(MODEPAGE_CONTROL, PageControl::Changeable, 512);
        assert_eq!(r, Err(DispatchError::InvalidCdbField));
    }

    #[test]
    fn mode_sense_encodes_sector_size_in_block_descriptor() {
        let buf = encode_mode_sense_10(MODEPAGE_CONTROL, PageControl::Current, 512).unwrap();
        let bd = &buf[8..16];
        let len = ((bd[5] as u32) << 16) | ((bd[6] as u32) << 8) | bd[7] as u32;
        assert_eq!(len, 512);
    }

    #[test]
    fn mode_select_rejects_non_control_page() {
        // header (8) + no block descriptor + page code 0x02 (disconnect-reconnect)
        let mut param = alloc::vec![0u8; 10];
        param[8] = 0x02;
        param[9] = 0x00;
        let r = decode_mode_select_10(&param);
        assert_eq!(r, Err(DispatchError::InvalidParameterList));
    }

    #[test]
    fn mode_select_accepts_control_page_length_match() {
        let mut param = alloc::vec![0u8; 8 + 8];
        param[8] = MODEPAGE_CONTROL;
        param[9] = 6;
        param[10] = 0x02; // DQue
        let r = decode_mode_select_10(&param).unwrap();
        assert!(r);
    }

    #[test]
    fn mode_select_rejects_control_page_length_mismatch() {
        let mut param = alloc::vec![0u8; 8 + 8];
        param[8] = MODEPAGE_CONTROL;
        param[9] = 4; // wrong length
        let r = decode_mode_select_10(&param);
        assert_eq!(r, Err(DispatchError::InvalidParameterList));
    }
}
