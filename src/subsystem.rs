//! The upstream-facing entry points: `execute`, `abort`, `reset_device`,
//! `reset_channel`, `path_inquiry`, `get_restrictions`, `ioctl`.
//! [`Subsystem`] owns one [`Channel`] and the upstream completion sink,
//! replacing a global module pointer to the SCSI stack with a
//! constructor-supplied trait object.

use crate::channel::Channel;
use crate::config::QueueDepth;
use crate::controller::Controller;
use crate::device::{Device, DeviceKind};
use crate::dispatcher;
use crate::error::{DispatchError, SubsystemStatus};
use crate::request::Ccb;
use crate::sync::Clock;
use crate::wire::identify::parse_identify;
use crate::wire::taskfile::cmd;

/// Notified once a submitted [`Ccb`] has run to completion. `run_count`
/// is the number of dispatch attempts this request took (more than one
/// only when an earlier attempt was requeued for a busy channel).
pub trait CompletionSink {
    fn finished(&mut self, ccb: &mut Ccb, run_count: u32);
}

/// `path_inquiry`'s report of bus-wide capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathInquiryInfo {
    pub wide_16bit: bool,
    pub tagged_queueable: bool,
    pub queue_depth: QueueDepth,
    pub initiator_id: u8,
}

/// `get_restrictions`'s per-target report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restrictions {
    pub is_atapi: bool,
    /// True when this engine synthesizes autosense itself (ATA); false
    /// when the device's own PACKET protocol already carries sense
    /// (ATAPI), so the upper stack must not autosense it again.
    pub autosense_synthesized: bool,
    pub max_blocks_per_request: u32,
}

/// The two supported `ioctl` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlOp {
    GetInfoBlock,
    GetStatus,
}

/// `ioctl(GET_STATUS)`'s small reply struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBlock {
    pub dma_enabled: bool,
    pub is_atapi: bool,
}

impl StatusBlock {
    pub fn encode(&self) -> [u8; 2] {
        [self.dma_enabled as u8, self.is_atapi as u8]
    }
}

/// Owns a [`Channel`] and the sink its completions are reported to.
pub struct Subsystem<C: Controller, CL: Clock, S: CompletionSink> {
    pub channel: Channel<C, CL>,
    sink: S,
}

impl<C: Controller, CL: Clock, S: CompletionSink> Subsystem<C, CL, S> {
    pub fn new(channel: Channel<C, CL>, sink: S) -> Self {
        Subsystem { channel, sink }
    }

    /// Pulse reset, probe both slots, and identify whichever are
    /// present. Run once at channel bring-up, wiring the reset/probe
    /// sequence to the device table for the first time.
    pub fn bring_up(&mut self, present: [bool; 2]) {
        log::info!("bring-up: probing channel for {:?}", present);
        self.channel.reset_and_probe(present);
        for (index, is_present) in present.iter().enumerate() {
            if *is_present {
                self.identify_and_populate(index as u8, false);
            } else {
                self.channel.devices[index] = Device::absent(index != 0);
            }
        }
    }

    fn identify_and_populate(&mut self, device_index: u8, is_atapi_hint: bool) {
        let command = if is_atapi_hint { cmd::IDENTIFY_PACKET_DEVICE } else { cmd::IDENTIFY_DEVICE };
        match self.channel.identify(device_index, command) {
            Ok(buf) => {
                let id = parse_identify(&buf);
                let dma_permitted = self.channel.config().dma_permitted;
                self.channel.devices[device_index as usize] = Device::from_identify(device_index != 0, id, dma_permitted).with_identify_raw(buf);
            }
            Err(_) if !is_atapi_hint => {
                // IDENTIFY DEVICE found nothing ATA-shaped at this slot;
                // retry once as a PACKET device before giving up.
                self.identify_and_populate(device_index, true);
            }
            Err(status) => {
                log::warn!("device {} failed to identify ({:?}); marking absent", device_index, status);
                self.channel.devices[device_index as usize] = Device::absent(device_index != 0);
            }
        }
    }

    /// Accept one command. Runs to completion synchronously, since this
    /// engine's PIO pump and DMA wait both run on the caller's thread,
    /// and reports through the sink before returning.
    pub fn execute(&mut self, device_index: u8, mut ccb: Ccb, data: &mut [u8]) {
        dispatcher::dispatch(&mut self.channel, device_index, &mut ccb, data);
        self.sink.finished(&mut ccb, 1);
    }

    /// Best-effort: this engine never tears down an in-flight DMA or PIO
    /// pump, so abort only acknowledges the request (matching the
    /// teacher's legacy and AHCI paths, both of which accept without
    /// actually cancelling).
    pub fn abort(&mut self, _ccb: &Ccb) -> Result<(), SubsystemStatus> {
        Ok(())
    }

    /// Soft-reset a single device and re-identify it. `lun` must be 0.
    pub fn reset_device(&mut self, target_id: u8, lun: u8) -> Result<(), SubsystemStatus> {
        if lun != 0 {
            return Err(SubsystemStatus::TargetIdInvalid);
        }
        let device_index = target_id;
        if device_index as usize >= self.channel.devices.len() {
            return Err(SubsystemStatus::TargetIdInvalid);
        }
        if !self.channel.devices[device_index as usize].is_present() {
            return Err(SubsystemStatus::TargetIdInvalid);
        }
        let is_atapi = self.channel.devices[device_index as usize].kind == DeviceKind::Atapi;
        let present = [self.channel.devices[0].is_present(), self.channel.devices[1].is_present()];
        self.channel.reset_and_probe(present);
        let command = if is_atapi { cmd::IDENTIFY_PACKET_DEVICE } else { cmd::IDENTIFY_DEVICE };
        let buf = self.channel.identify(device_index, command)?;
        let id = parse_identify(&buf);
        let dma_permitted = self.channel.config().dma_permitted;
        self.channel.devices[device_index as usize] = Device::from_identify(device_index != 0, id, dma_permitted).with_identify_raw(buf);
        Ok(())
    }

    /// Reset both devices on the channel and re-identify whichever were
    /// present; a device that fails to re-identify is marked absent
    /// rather than aborting the whole reset.
    pub fn reset_channel(&mut self) {
        let present = [self.channel.devices[0].is_present(), self.channel.devices[1].is_present()];
        let kinds = [self.channel.devices[0].kind, self.channel.devices[1].kind];
        self.channel.reset_and_probe(present);
        for index in 0..2u8 {
            if present[index as usize] {
                self.identify_and_populate(index, kinds[index as usize] == DeviceKind::Atapi);
            }
        }
    }

    pub fn path_inquiry(&self) -> PathInquiryInfo {
        let config = self.channel.config();
        PathInquiryInfo {
            wide_16bit: true,
            tagged_queueable: config.command_queuing_permitted,
            queue_depth: config.queue_depth,
            initiator_id: config.initiator_id,
        }
    }

    pub fn get_restrictions(&self, target_id: u8) -> Result<Restrictions, SubsystemStatus> {
        let device = self.channel.devices.get(target_id as usize).ok_or(SubsystemStatus::TargetIdInvalid)?;
        if !device.is_present() {
            return Err(SubsystemStatus::TargetIdInvalid);
        }
        let is_atapi = device.kind == DeviceKind::Atapi;
        Ok(Restrictions {
            is_atapi,
            autosense_synthesized: !is_atapi,
            max_blocks_per_request: device.max_blocks_per_request,
        })
    }

    pub fn ioctl(&self, target_id: u8, op: IoctlOp, buffer: &mut [u8]) -> Result<usize, DispatchError> {
        let device = self.channel.devices.get(target_id as usize).ok_or(DispatchError::LunOutOfRange)?;
        if !device.is_present() {
            return Err(DispatchError::LunOutOfRange);
        }
        match op {
            IoctlOp::GetInfoBlock => {
                let raw = device.identify_raw.as_ref().ok_or(DispatchError::LunOutOfRange)?;
                let n = raw.len().min(buffer.len());
                buffer[..n].copy_from_slice(&raw[..n]);
                Ok(n)
            }
            IoctlOp::GetStatus => {
                let status = StatusBlock {
                    dma_enabled: device.caps.dma_enabled,
                    is_atapi: device.kind == DeviceKind::Atapi,
                }
                .encode();
                let n = status.len().min(buffer.len());
                buffer[..n].copy_from_slice(&status[..n]);
                Ok(n)
            }
        }
    }
}
