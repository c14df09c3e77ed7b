//! The SCSI→ATA/ATAPI dispatcher: maps CDBs to ATA programs or
//! synthesized responses.

pub mod trim;

use crate::channel::errclass::{classify, RequestKind};
use crate::channel::Channel;
use crate::controller::{Controller, DmaCompletion, TransferDirection as CtlDirection};
use crate::device::{Device, DeviceKind};
use crate::error::{asc, Completion, DispatchError, SenseKey, SenseTuple, SubsystemStatus};
use crate::request::{Ccb, TransferDirection as CcbDirection};
use crate::sync::Clock;
use crate::wire::atapi::AtapiPacket;
use crate::wire::cdb::{self, opcode, Direction as CdbDirection};
use crate::wire::scsi_response::{self, dispatch_error_asc};
use crate::wire::sense::{copy_sense_truncated, encode_fixed_sense, FIXED_SENSE_LEN};
use crate::wire::taskfile::{cmd, TaskFile, MAX_LBA_28BIT, MAX_SECTORS_28BIT};

fn completion_from_dispatch_error(err: DispatchError) -> Completion {
    let (asc_code, ascq) = dispatch_error_asc(err);
    Completion::with_sense(SenseTuple::new(SenseKey::IllegalRequest, asc_code, ascq), 0)
}

/// Copy `src` into `data`, truncated to whichever of `data`'s length or
/// the CDB's allocation length is shorter.
fn copy_into(data: &mut [u8], src: &[u8], allocation_length: u16) -> usize {
    let n = src.len().min(data.len()).min(allocation_length as usize);
    data[..n].copy_from_slice(&src[..n]);
    n
}

/// Run one CDB against `device_index` on `channel`, writing the outcome
/// into `ccb` and moving data through `data` (a single host-visible
/// buffer standing in for the request's already-resolved scatter-gather
/// list).
pub fn dispatch<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, ccb: &mut Ccb, data: &mut [u8]) {
    let completion = dispatch_inner(channel, device_index, ccb, data);
    ccb.apply_completion(completion);
}

fn dispatch_inner<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, ccb: &mut Ccb, data: &mut [u8]) -> Completion {
    let cdb = ccb.cdb_bytes();
    if cdb.is_empty() {
        return completion_from_dispatch_error(DispatchError::InvalidOpcode);
    }
    let opcode_byte = cdb[0];

    let device = &channel.devices[device_index as usize];
    if ccb.lun > device.last_lun {
        return Completion::status_only(SubsystemStatus::SelectionTimeout, 0);
    }
    if !device.is_present() {
        return Completion::status_only(SubsystemStatus::TargetIdInvalid, 0);
    }

    // Sense-carry rule: cleared on entry unless this is REQUEST-SENSE.
    if opcode_byte != opcode::REQUEST_SENSE {
        channel.devices[device_index as usize].sense = SenseTuple::NONE;
    }

    if channel.devices[device_index as usize].kind == DeviceKind::Atapi {
        return dispatch_atapi(channel, device_index, ccb, data);
    }

    match opcode_byte {
        opcode::TEST_UNIT_READY => test_unit_ready(channel, device_index),
        opcode::REQUEST_SENSE => request_sense(channel, device_index, ccb, data),
        opcode::INQUIRY => inquiry(channel, device_index, cdb, data),
        opcode::MODE_SENSE_6 => completion_from_dispatch_error(DispatchError::InvalidOpcode),
        opcode::MODE_SENSE_10 => mode_sense_10(channel, device_index, cdb, data),
        opcode::MODE_SELECT_10 => mode_select_10(cdb, data),
        opcode::READ_CAPACITY_10 => read_capacity_10(channel, device_index, cdb, data),
        opcode::SERVICE_ACTION_IN_16 => service_action_in_16(channel, device_index, cdb, data),
        opcode::READ_6 => read_write(channel, device_index, cdb, data, ReadWriteForm::Six, false),
        opcode::WRITE_6 => read_write(channel, device_index, cdb, data, ReadWriteForm::Six, true),
        opcode::READ_10 => read_write(channel, device_index, cdb, data, ReadWriteForm::Ten, false),
        opcode::WRITE_10 => read_write(channel, device_index, cdb, data, ReadWriteForm::Ten, true),
        opcode::READ_12 => read_write(channel, device_index, cdb, data, ReadWriteForm::Twelve, false),
        opcode::WRITE_12 => read_write(channel, device_index, cdb, data, ReadWriteForm::Twelve, true),
        opcode::READ_16 => read_write(channel, device_index, cdb, data, ReadWriteForm::Sixteen, false),
        opcode::WRITE_16 => read_write(channel, device_index, cdb, data, ReadWriteForm::Sixteen, true),
        opcode::SYNCHRONIZE_CACHE_10 => synchronize_cache(channel, device_index),
        opcode::START_STOP_UNIT => start_stop_unit(channel, device_index, cdb),
        opcode::PREVENT_ALLOW_MEDIUM_REMOVAL | opcode::FORMAT_UNIT | opcode::RESERVE_6 | opcode::RELEASE_6 | opcode::VERIFY_10 => {
            completion_from_dispatch_error(DispatchError::InvalidOpcode)
        }
        opcode::UNMAP => trim::unmap(channel, device_index, data),
        _ => {
            log::debug!("dispatch: opcode {:#04x} not supported by this target", opcode_byte);
            completion_from_dispatch_error(DispatchError::InvalidOpcode)
        }
    }
}

fn ccb_direction_to_atapi(opcode_byte: u8, ccb_direction: CcbDirection) -> CtlDirection {
    match opcode_byte {
        opcode::READ_6 | opcode::READ_10 | opcode::READ_12 | opcode::READ_16 => CtlDirection::FromDevice,
        opcode::WRITE_6 | opcode::WRITE_10 | opcode::WRITE_12 | opcode::WRITE_16 => CtlDirection::ToDevice,
        _ => match ccb_direction {
            CcbDirection::ToDevice => CtlDirection::ToDevice,
            _ => CtlDirection::FromDevice,
        },
    }
}

/// ATAPI passthrough: frame the CDB as a 12-byte packet, send it via the
/// PACKET command, then run the PIO data phase if any data is expected.
fn dispatch_atapi<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, ccb: &mut Ccb, data: &mut [u8]) -> Completion {
    let cdb = ccb.cdb_bytes();
    let packet = match AtapiPacket::from_cdb(cdb) {
        Some(p) => p,
        None => return completion_from_dispatch_error(DispatchError::InvalidCdbField),
    };

    let task_file = TaskFile::bare(cmd::PACKET, device_index);
    if let Err(status) = channel.send_command(device_index, &task_file, false, false) {
        return Completion::status_only(status, 0);
    }

    let mut packet_words = [0u16; 6];
    for (i, w) in packet_words.iter_mut().enumerate() {
        *w = u16::from_le_bytes([packet.bytes[i * 2], packet.bytes[i * 2 + 1]]);
    }
    if let Err(status) = channel.write_packet(&packet_words) {
        return Completion::status_only(status, 0);
    }

    // Even a no-data-phase command must run through `pio_pump` (with
    // zero sectors) so it performs the final status read and returns the
    // channel to idle; `send_command` above already parked it in `Pio`.
    let sector_count = if data.is_empty() { 0 } else { 1 };
    let sector_size = data.len();
    let direction = ccb_direction_to_atapi(cdb[0], ccb.direction);
    let mut chunks = [data];
    match channel.pio_pump(&mut chunks, direction, sector_size, sector_count) {
        Ok(_) => {
            let error = channel.read_error();
            if error.raw_value() != 0 {
                Completion::with_sense(classify(error, RequestKind::Other, false), 0)
            } else {
                Completion::good(0)
            }
        }
        Err(status) => Completion::status_only(status, 0),
    }
}

fn test_unit_ready<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8) -> Completion {
    let rmsn_supported = channel.devices[device_index as usize]
        .identify
        .as_ref()
        .map(|id| id.rmsn_supported)
        .unwrap_or(false);

    if !rmsn_supported {
        return Completion::good(0);
    }

    let task_file = TaskFile::bare(cmd::GET_MEDIA_STATUS, device_index);
    match channel.run_bare_command(device_index, &task_file) {
        Ok(()) => Completion::good(0),
        Err(SubsystemStatus::SequenceFail) => {
            let error = channel.read_error();
            Completion::with_sense(classify(error, RequestKind::Other, false), 0)
        }
        Err(status) => Completion::status_only(status, 0),
    }
}

fn request_sense<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, ccb: &Ccb, data: &mut [u8]) -> Completion {
    let sense = channel.devices[device_index as usize].sense;
    let encoded = encode_fixed_sense(&sense);
    let allocation_length = ccb.cdb_bytes().get(4).copied().unwrap_or(FIXED_SENSE_LEN as u8) as usize;
    copy_sense_truncated(&encoded, data, allocation_length);
    channel.devices[device_index as usize].sense = SenseTuple::NONE;
    Completion::good(0)
}

fn inquiry<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, cdb: &[u8], data: &mut [u8]) -> Completion {
    let decoded = match cdb::decode_inquiry(cdb) {
        Ok(d) => d,
        Err(_) => return completion_from_dispatch_error(DispatchError::InvalidCdbField),
    };

    let device = &channel.devices[device_index as usize];
    let identify = match &device.identify {
        Some(id) => id,
        None => return Completion::status_only(SubsystemStatus::TargetIdInvalid, 0),
    };

    if !decoded.evpd {
        let response = scsi_response::encode_standard_inquiry(identify);
        copy_into(data, &response, decoded.allocation_length);
        return Completion::good(0);
    }

    let page = match decoded.page_code {
        scsi_response::vpd_page::SUPPORTED_PAGES => scsi_response::encode_vpd_supported_pages(identify.is_atapi),
        scsi_response::vpd_page::BLOCK_LIMITS => scsi_response::encode_vpd_block_limits(device.caps.trim_supported, device.caps.max_trim_range_blocks),
        scsi_response::vpd_page::LOGICAL_BLOCK_PROVISIONING => scsi_response::encode_vpd_logical_block_provisioning(device.caps.trim_supported, device.caps.trim_returns_zeros),
        _ => return completion_from_dispatch_error(DispatchError::InvalidCdbField),
    };
    copy_into(data, &page, decoded.allocation_length);
    Completion::good(0)
}

fn mode_sense_10<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, cdb: &[u8], data: &mut [u8]) -> Completion {
    if cdb.len() < 10 {
        return completion_from_dispatch_error(DispatchError::InvalidCdbField);
    }
    let page_control = scsi_response::decode_page_control(cdb[2] >> 6);
    let page_code = cdb[2] & 0x3F;
    let allocation_length = u16::from_be_bytes([cdb[7], cdb[8]]);
    let sector_size = channel.devices[device_index as usize].geometry.sector_size;

    match scsi_response::encode_mode_sense_10(page_code, page_control, sector_size) {
        Ok(response) => {
            copy_into(data, &response, allocation_length);
            Completion::good(0)
        }
        Err(err) => completion_from_dispatch_error(err),
    }
}

fn mode_select_10(cdb: &[u8], data: &[u8]) -> Completion {
    if cdb.len() < 10 {
        return completion_from_dispatch_error(DispatchError::InvalidCdbField);
    }
    let parameter_list_length = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;
    let len = parameter_list_length.min(data.len());
    match scsi_response::decode_mode_select_10(&data[..len]) {
        Ok(_dque) => Completion::good(0),
        Err(err) => completion_from_dispatch_error(err),
    }
}

fn read_capacity_10<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, cdb: &[u8], data: &mut [u8]) -> Completion {
    if cdb.len() < 10 {
        return completion_from_dispatch_error(DispatchError::InvalidCdbField);
    }
    let pmi = cdb[8] & 0x01 != 0;
    let lba_field = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
    if pmi || lba_field != 0 {
        return completion_from_dispatch_error(DispatchError::InvalidCdbField);
    }
    let geometry = channel.devices[device_index as usize].geometry;
    let response = scsi_response::encode_read_capacity_10(geometry.total_sectors, geometry.sector_size);
    copy_into(data, &response, response.len() as u16);
    Completion::good(0)
}

fn service_action_in_16<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, cdb: &[u8], data: &mut [u8]) -> Completion {
    if cdb.len() < 16 || cdb[1] & 0x1F != opcode::SAI_READ_CAPACITY_16 {
        return completion_from_dispatch_error(DispatchError::InvalidOpcode);
    }
    let device = &channel.devices[device_index as usize];
    let response = scsi_response::encode_read_capacity_16(device.geometry.total_sectors, device.geometry.sector_size, device.caps.trim_supported, device.caps.trim_returns_zeros);
    let allocation_length = u32::from_be_bytes([cdb[10], cdb[11], cdb[12], cdb[13]]).min(u16::MAX as u32) as u16;
    copy_into(data, &response, allocation_length);
    Completion::good(0)
}

#[derive(Debug, Copy, Clone)]
enum ReadWriteForm {
    Six,
    Ten,
    Twelve,
    Sixteen,
}

fn decode_form(cdb: &[u8], form: ReadWriteForm, direction: CdbDirection) -> Result<cdb::ReadWriteCdb, cdb::CdbError> {
    match form {
        ReadWriteForm::Six => cdb::decode_read_write_6(cdb, direction),
        ReadWriteForm::Ten => cdb::decode_read_write_10(cdb, direction),
        ReadWriteForm::Twelve => cdb::decode_read_write_12(cdb, direction),
        ReadWriteForm::Sixteen => cdb::decode_read_write_16(cdb, direction),
    }
}

fn read_write<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, cdb: &[u8], data: &mut [u8], form: ReadWriteForm, is_write: bool) -> Completion {
    let direction = if is_write { CdbDirection::ToDevice } else { CdbDirection::FromDevice };
    let decoded = match decode_form(cdb, form, direction) {
        Ok(d) => d,
        Err(_) => return completion_from_dispatch_error(DispatchError::InvalidCdbField),
    };

    if decoded.block_count == 0 {
        return Completion::good(0);
    }

    let geometry = channel.devices[device_index as usize].geometry;
    let caps = channel.devices[device_index as usize].caps;

    let use48 = match select_addressing(geometry.use_48_bit, decoded.lba, decoded.block_count) {
        Some(use48) => use48,
        None => return completion_from_dispatch_error(DispatchError::InvalidCdbField),
    };
    let use_dma = caps.dma_enabled;
    let command = read_write_command(is_write, use_dma, use48);

    let task_file = if use48 {
        TaskFile::lba48(command, device_index, decoded.lba, decoded.block_count)
    } else {
        TaskFile::lba28(command, device_index, decoded.lba as u32, decoded.block_count as u16)
    };

    let ctl_direction = if is_write { CtlDirection::ToDevice } else { CtlDirection::FromDevice };
    let request_kind = if is_write { RequestKind::Write } else { RequestKind::Read };

    if use_dma {
        let expected_bytes = geometry.sector_size.saturating_mul(decoded.block_count);
        run_dma(channel, device_index, &task_file, ctl_direction, request_kind, expected_bytes)
    } else {
        run_pio(channel, device_index, &task_file, data, ctl_direction, geometry.sector_size, decoded.block_count as usize, request_kind)
    }
}

fn select_addressing(device_supports_48bit: bool, lba: u64, block_count: u32) -> Option<bool> {
    let exceeds_28bit = lba >= MAX_LBA_28BIT || block_count > MAX_SECTORS_28BIT;
    if !exceeds_28bit {
        Some(false)
    } else if device_supports_48bit {
        Some(true)
    } else {
        None
    }
}

fn read_write_command(is_write: bool, use_dma: bool, use48: bool) -> u8 {
    match (is_write, use_dma, use48) {
        (false, false, false) => cmd::READ_SECTORS,
        (false, false, true) => cmd::READ_SECTORS_EXT,
        (false, true, false) => cmd::READ_DMA,
        (false, true, true) => cmd::READ_DMA_EXT,
        (true, false, false) => cmd::WRITE_SECTORS,
        (true, false, true) => cmd::WRITE_SECTORS_EXT,
        (true, true, false) => cmd::WRITE_DMA,
        (true, true, true) => cmd::WRITE_DMA_EXT,
    }
}

fn run_pio<C: Controller, CL: Clock>(
    channel: &mut Channel<C, CL>,
    device_index: u8,
    task_file: &TaskFile,
    data: &mut [u8],
    direction: CtlDirection,
    sector_size: u32,
    sector_count: usize,
    request_kind: RequestKind,
) -> Completion {
    if let Err(status) = channel.send_command(device_index, task_file, true, false) {
        return Completion::status_only(status, 0);
    }
    let mut chunks = [data];
    match channel.pio_pump(&mut chunks, direction, sector_size as usize, sector_count) {
        Ok((moved, _overrun)) => {
            let expected = sector_size as usize * sector_count;
            let residual = expected.saturating_sub(moved as usize) as u32;
            let error = channel.read_error();
            channel.classify_completion(device_index, error, request_kind, false, residual, false)
        }
        Err(status) => Completion::status_only(status, 0),
    }
}

fn run_dma<C: Controller, CL: Clock>(
    channel: &mut Channel<C, CL>,
    device_index: u8,
    task_file: &TaskFile,
    direction: CtlDirection,
    request_kind: RequestKind,
    expected_bytes: u32,
) -> Completion {
    if let Err(status) = channel.send_command(device_index, task_file, true, true) {
        return Completion::status_only(status, 0);
    }
    match channel.await_dma_completion(channel_spin_budget()) {
        Ok((DmaCompletion::Success, bytes_moved)) => {
            let residual = expected_bytes.saturating_sub(bytes_moved);
            let error = channel.read_error();
            channel.classify_completion(device_index, error, request_kind, false, residual, false)
        }
        Ok((DmaCompletion::DataOverrunTolerated, bytes_moved)) => Completion::good(expected_bytes.saturating_sub(bytes_moved)),
        Ok((DmaCompletion::Fatal, _)) => {
            let error = channel.read_error();
            channel.classify_completion(device_index, error, request_kind, false, expected_bytes, true)
        }
        Err(status) => Completion::status_only(status, 0),
    }
}

fn channel_spin_budget() -> u32 {
    1_000_000
}

fn synchronize_cache<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8) -> Completion {
    let device = &channel.devices[device_index as usize];
    let write_cache_supported = device.identify.as_ref().map(|id| id.write_cache_supported).unwrap_or(false);
    if !write_cache_supported {
        return Completion::good(0);
    }
    let use48 = device.geometry.use_48_bit;
    let command = if use48 { cmd::FLUSH_CACHE_EXT } else { cmd::FLUSH_CACHE };
    let task_file = TaskFile::bare(command, device_index);
    match channel.run_bare_command(device_index, &task_file) {
        Ok(()) => Completion::good(0),
        Err(SubsystemStatus::SequenceFail) => {
            let error = channel.read_error();
            Completion::with_sense(classify(error, RequestKind::Other, false), 0)
        }
        Err(status) => Completion::status_only(status, 0),
    }
}

fn start_stop_unit<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, cdb: &[u8]) -> Completion {
    if cdb.len() < 5 {
        return completion_from_dispatch_error(DispatchError::InvalidCdbField);
    }
    let start = cdb[4] & 0x01 != 0;
    let load_eject = cdb[4] & 0x02 != 0;

    if load_eject && start {
        return completion_from_dispatch_error(DispatchError::InvalidCdbField);
    }

    if !start {
        let flush = synchronize_cache(channel, device_index);
        if flush.status != SubsystemStatus::Good {
            return flush;
        }
    }

    if load_eject {
        let task_file = TaskFile::bare(cmd::MEDIA_EJECT, device_index);
        return match channel.run_bare_command(device_index, &task_file) {
            Ok(()) => Completion::good(0),
            Err(SubsystemStatus::SequenceFail) => {
                let error = channel.read_error();
                Completion::with_sense(classify(error, RequestKind::Other, false), 0)
            }
            Err(status) => Completion::status_only(status, 0),
        };
    }
    Completion::good(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::controller::test_support::FakeController;
    use crate::request::TransferDirection as ReqDirection;
    use crate::sync::test_clock::TestClock;
    use crate::wire::identify::{build_identify_fixture, parse_identify};
    use alloc::vec;

    fn channel_with_ata_device(dma_supported: bool) -> Channel<FakeController, TestClock> {
        let mut channel = Channel::new(FakeController::new(), TestClock::new(), ChannelConfig::default());
        let buf = build_identify_fixture("EXAMPLE MODEL-1", "SN1", "FW1", 2_000_000, 0, false, dma_supported, true, true, 0xFFFF);
        let id = parse_identify(&buf);
        channel.devices[0] = Device::from_identify(false, id, true);
        channel
    }

    fn ccb_with_cdb(cdb: &[u8], direction: ReqDirection) -> Ccb {
        Ccb::new(0, 0, cdb, direction, alloc::vec::Vec::new(), 20_000)
    }

    #[test]
    fn selection_timeout_reported_when_lun_out_of_range() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0], ReqDirection::None);
        ccb.lun = 1;
        let mut data = [0u8; 0];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::SelectionTimeout);
    }

    #[test]
    fn absent_device_reports_target_id_invalid() {
        let mut channel: Channel<FakeController, TestClock> = Channel::new(FakeController::new(), TestClock::new(), ChannelConfig::default());
        let mut ccb = ccb_with_cdb(&[opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0], ReqDirection::None);
        let mut data = [0u8; 0];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::TargetIdInvalid);
    }

    #[test]
    fn test_unit_ready_without_rmsn_completes_good_synchronously() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0], ReqDirection::None);
        let mut data = [0u8; 0];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
    }

    #[test]
    fn request_sense_reports_stored_tuple_then_clears_it() {
        let mut channel = channel_with_ata_device(false);
        channel.devices[0].sense = SenseTuple::new(SenseKey::MediumError, asc::MEDIUM_NOT_PRESENT.0, asc::MEDIUM_NOT_PRESENT.1);
        let mut ccb = ccb_with_cdb(&[opcode::REQUEST_SENSE, 0, 0, 0, 18, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 18];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
        assert_eq!(data[2], SenseKey::MediumError as u8);
        assert_eq!(data[12], asc::MEDIUM_NOT_PRESENT.0);
        assert!(channel.devices[0].sense.is_empty());
    }

    #[test]
    fn inquiry_standard_response_reports_non_atapi_peripheral_type() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::INQUIRY, 0, 0, 0, 36, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 36];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
        assert_eq!(data[0], 0x00);
    }

    #[test]
    fn inquiry_evpd_unsupported_page_is_invalid_field() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::INQUIRY, 0x01, 0x55, 0x00, 0xFF, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 255];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::CompletedWithError);
        assert_eq!(ccb.autosense[12], asc::INVALID_FIELD_IN_CDB.0);
    }

    #[test]
    fn mode_sense_6_is_rejected_as_invalid_opcode() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::MODE_SENSE_6, 0, 0x0A, 0, 255, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 255];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::CompletedWithError);
        assert_eq!(ccb.autosense[12], asc::INVALID_COMMAND_OPERATION_CODE.0);
    }

    #[test]
    fn read_capacity_10_with_pmi_set_is_invalid_field() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0x01, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 8];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::CompletedWithError);
    }

    #[test]
    fn read_capacity_10_reports_clamped_capacity() {
        let mut channel = channel_with_ata_device(false);
        let mut ccb = ccb_with_cdb(&[opcode::READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 8];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
        assert_eq!(u32::from_be_bytes([data[4], data[5], data[6], data[7]]), 512);
    }

    #[test]
    fn zero_length_read_10_completes_good_synchronously() {
        let mut channel = channel_with_ata_device(true);
        let mut ccb = ccb_with_cdb(&[opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 0, 0], ReqDirection::FromDevice);
        let mut data = [0u8; 0];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
    }

    #[test]
    fn read_10_pio_path_moves_bytes_and_completes_good() {
        let mut channel = channel_with_ata_device(false);
        channel.controller.alt_status_sequence = vec![0x00, 0x40, 0x40, 0x08, 0x40];
        channel.controller.status_sequence = vec![0x40];
        channel.controller.pio_read_data = vec![0u16; 256];
        let mut cdb = [0u8; 10];
        cdb[0] = opcode::READ_10;
        cdb[8] = 1; // one block
        let mut ccb = ccb_with_cdb(&cdb, ReqDirection::FromDevice);
        let mut data = [0u8; 512];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
        assert_eq!(channel.controller.commands_issued, vec![cmd::READ_SECTORS]);
    }

    #[test]
    fn addressing_stays_28bit_within_28bit_limits() {
        assert_eq!(select_addressing(true, 0, 1), Some(false));
    }

    #[test]
    fn addressing_promotes_to_48bit_past_28bit_lba_limit() {
        // S2: LBA = 2^32 exceeds the 28-bit limit outright.
        assert_eq!(select_addressing(true, 1u64 << 32, 8), Some(true));
    }

    #[test]
    fn addressing_rejects_48bit_request_on_28bit_only_device() {
        assert_eq!(select_addressing(false, 1u64 << 32, 8), None);
    }

    #[test]
    fn read_write_command_selects_read_dma_for_s1_style_request() {
        // S1: 28-bit addressing, DMA enabled, read direction.
        assert_eq!(read_write_command(false, true, false), cmd::READ_DMA);
    }

    #[test]
    fn read_write_command_selects_read_dma_ext_for_s2_style_request() {
        assert_eq!(read_write_command(false, true, true), cmd::READ_DMA_EXT);
    }

    #[test]
    fn atapi_zero_data_command_completes_good_and_returns_channel_idle() {
        let mut channel = channel_with_ata_device(false);
        channel.devices[0].kind = DeviceKind::Atapi;
        channel.controller.alt_status_sequence = vec![0x00, 0x00, 0x08, 0x00];
        channel.controller.status_sequence = vec![0x00];
        channel.controller.error_to_report = 0;
        let mut ccb = ccb_with_cdb(&[opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0], ReqDirection::None);
        let mut data = [0u8; 0];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::Good);
        assert_eq!(channel.state(), crate::channel::ChannelState::Idle);
    }

    #[test]
    fn fatal_dma_failure_reports_same_sense_synchronously_and_via_request_sense() {
        let mut channel = channel_with_ata_device(true);
        channel.controller.alt_status_sequence = vec![0x00, 0x40];
        channel.controller.dma_end_result = (DmaCompletion::Fatal, 0);
        channel.controller.error_to_report = 0x10; // IDNF
        channel.on_interrupt(); // pre-post the completion waiter for the synchronous DMA wait below

        let mut cdb = [0u8; 10];
        cdb[0] = opcode::READ_10;
        cdb[8] = 1; // one block
        let mut ccb = ccb_with_cdb(&cdb, ReqDirection::FromDevice);
        let mut data = [0u8; 512];
        dispatch(&mut channel, 0, &mut ccb, &mut data);
        assert_eq!(ccb.status, SubsystemStatus::CompletedWithError);
        let synchronous_asc = ccb.autosense[12];
        let synchronous_ascq = ccb.autosense[13];

        let mut sense_ccb = ccb_with_cdb(&[opcode::REQUEST_SENSE, 0, 0, 0, 18, 0], ReqDirection::FromDevice);
        let mut sense_data = [0u8; 18];
        dispatch(&mut channel, 0, &mut sense_ccb, &mut sense_data);
        assert_eq!(sense_ccb.status, SubsystemStatus::Good);
        assert_eq!(sense_data[12], synchronous_asc);
        assert_eq!(sense_data[13], synchronous_ascq);
        assert_eq!(synchronous_asc, asc::RANDOM_POSITIONING_ERROR.0);
    }

    #[test]
    fn unmap_opcode_delegates_to_trim_module() {
        let mut channel = channel_with_ata_device(false);
        channel.devices[0].caps.trim_supported = true;
        let mut ccb = ccb_with_cdb(&[opcode::UNMAP, 0, 0, 0, 0, 0], ReqDirection::ToDevice);
        let mut param = alloc::vec::Vec::with_capacity(8);
        param.extend_from_slice(&0u16.to_be_bytes());
        param.extend_from_slice(&[0u8; 2]);
        param.extend_from_slice(&0u32.to_be_bytes());
        dispatch(&mut channel, 0, &mut ccb, &mut param);
        assert_eq!(ccb.status, SubsystemStatus::Good);
    }
}
