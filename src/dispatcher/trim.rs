//! UNMAP → DATA SET MANAGEMENT (TRIM) range splitter.

use crate::channel::errclass::{classify, RequestKind};
use crate::channel::Channel;
use crate::controller::{Controller, TransferDirection};
use crate::device::Device;
use crate::error::{asc, Completion, SenseKey, SenseTuple};
use crate::sync::Clock;
use crate::wire::taskfile::{cmd, ParamMask, TaskFile};
use crate::wire::unmap::{decode_unmap_parameter_list, split_into_trim_batches};
use alloc::vec::Vec;

/// In-core scratch buffer capacity, in 8-byte TRIM entries (one 512-byte
/// block). A real build would size this to the controller's DMA scratch
/// region; one block matches the minimum DATA SET MANAGEMENT payload.
const SCRATCH_ENTRIES: usize = 64;

fn invalid_unmap_completion() -> Completion {
    Completion::with_sense(
        SenseTuple::new(SenseKey::IllegalRequest, asc::INVALID_FIELD_IN_PARAMETER_LIST.0, asc::INVALID_FIELD_IN_PARAMETER_LIST.1),
        0,
    )
}

/// Run a SCSI UNMAP: decode the parameter list, split into TRIM-sized
/// batches, and issue one DATA SET MANAGEMENT command per batch.
pub fn unmap<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, param_list: &[u8]) -> Completion {
    let descriptors = match decode_unmap_parameter_list(param_list) {
        Ok(d) => d,
        Err(_) => return invalid_unmap_completion(),
    };

    if descriptors.is_empty() {
        return Completion::good(0);
    }

    let device = &channel.devices[device_index as usize];
    if !device.caps.trim_supported {
        return Completion::with_sense(
            SenseTuple::new(SenseKey::IllegalRequest, asc::INVALID_COMMAND_OPERATION_CODE.0, asc::INVALID_COMMAND_OPERATION_CODE.1),
            0,
        );
    }

    let entries_per_batch = entries_per_batch_cap(device);
    let (batches, _any_dropped) = split_into_trim_batches(&descriptors, entries_per_batch);

    for batch in &batches {
        if let Err(completion) = issue_trim_batch(channel, device_index, batch) {
            return completion;
        }
    }
    Completion::good(0)
}

fn entries_per_batch_cap(device: &Device) -> usize {
    let by_device_range = (device.caps.max_trim_range_blocks as usize).saturating_mul(64).max(1);
    SCRATCH_ENTRIES.min(by_device_range).min(0xFFFF)
}

/// Issue one DATA SET MANAGEMENT TRIM command for `batch`, zero-padding
/// the tail of the final 512-byte block (entries must arrive in whole
/// 512-byte blocks).
fn issue_trim_batch<C: Controller, CL: Clock>(channel: &mut Channel<C, CL>, device_index: u8, batch: &[[u8; 8]]) -> Result<(), Completion> {
    let mut padded: Vec<[u8; 8]> = batch.to_vec();
    while padded.len() % 64 != 0 {
        padded.push([0u8; 8]);
    }
    let sector_count = (padded.len() / 64).max(1) as u16;

    let mut task_file = TaskFile::lba28(cmd::DATA_SET_MANAGEMENT, device_index, 0, sector_count);
    task_file.features = 1; // feature = 1: TRIM
    task_file.mask = task_file.mask | ParamMask::FEATURES;

    channel
        .send_command(device_index, &task_file, true, false)
        .map_err(|s| Completion::status_only(s, 0))?;

    let mut bytes: Vec<u8> = Vec::with_capacity(padded.len() * 8);
    for entry in &padded {
        bytes.extend_from_slice(entry);
    }
    let mut chunks = [bytes.as_mut_slice()];
    let pump_result = channel.pio_pump(&mut chunks, TransferDirection::ToDevice, 512, sector_count as usize);

    match pump_result {
        Ok(_) => {
            let error = channel.read_error();
            if error.raw_value() != 0 {
                let sense = classify(error, RequestKind::Write, false);
                Err(Completion::with_sense(sense, 0))
            } else {
                Ok(())
            }
        }
        Err(status) => Err(Completion::status_only(status, 0)),
    }
}
