//! The Controller capability: the narrow interface a channel-level
//! controller must provide. Generalized from port I/O on one fixed
//! legacy register layout (`reg_data`/`reg_error`/..., `select_device`,
//! `read_sector`/`write_sector`) to a trait any controller family
//! (legacy or AHCI) can implement.

use crate::wire::taskfile::{ParamMask, TaskFile};

/// Direction a PIO or DMA data phase moves in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferDirection {
    ToDevice,
    FromDevice,
}

/// One physical-address/size pair in a scatter-gather list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SgEntry {
    pub phys_addr: u64,
    pub len: u32,
}

/// Outcome `end_dma` reports once the transfer engine has stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaCompletion {
    Success,
    /// The device moved fewer or more bytes than requested but the
    /// engine recovered; treat as tolerable (ATAPI-only).
    DataOverrunTolerated,
    /// The transfer engine itself failed; the caller should count this
    /// against the device's DMA-failure counter.
    Fatal,
}

/// The capability a per-channel bus engine (C3) consumes. Stateless with
/// respect to which device is selected — the channel engine duplicates
/// that so it never has to probe the hardware to reason about state.
pub trait Controller {
    /// Write the device/head register to select `index` (0 or 1), flush
    /// posted writes by reading alt-status, then settle for 400 ns.
    fn select_device(&mut self, index: u8);

    /// Write only the registers named by `mask`.
    fn write_registers(&mut self, task_file: &TaskFile, mask: ParamMask);

    /// Read back only the registers named by `mask` into a task file
    /// image (used post-completion to recover the error/status/LBA
    /// state for sense classification and residual accounting).
    fn read_registers(&mut self, mask: ParamMask) -> TaskFile;

    /// Read the alternate status register without acknowledging a
    /// pending interrupt. Safe to call from any polling loop.
    fn get_alt_status(&mut self) -> u8;

    /// Read the primary status register (acknowledges a pending
    /// interrupt as a side effect, per the ATA register contract).
    fn read_status(&mut self) -> u8;

    /// Read the error register (only meaningful immediately after a
    /// command completes with ERR set in status).
    fn read_error(&mut self) -> u8;

    /// Write the command register, starting execution.
    fn issue_command(&mut self, command: u8);

    /// Set the software-reset and interrupt-disable bits.
    fn write_device_control(&mut self, bits: u8);

    /// Move 16-bit words between the data register and `dst`.
    fn pio_read_words(&mut self, dst: &mut [u16]);

    /// Move 16-bit words between `src` and the data register.
    fn pio_write_words(&mut self, src: &[u16]);

    /// Prepare the bus-master engine with `sg_list`. Returns `false` if
    /// preparation failed (caller falls back to PIO).
    fn begin_dma(&mut self, sg_list: &[SgEntry], direction: TransferDirection) -> bool;

    /// Stop the transfer engine and classify the outcome, along with
    /// the byte count actually moved (for residual accounting).
    fn end_dma(&mut self) -> (DmaCompletion, u32);
}
