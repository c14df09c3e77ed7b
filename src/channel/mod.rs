//! The per-channel bus engine: state machine, reset/probe, the
//! send-command sequence, PIO pump, DMA path, and interrupt→completion
//! handoff.
//!
//! Generalized from one fixed legacy port layout (`reset`,
//! `select_device`, `wait_until_ready`, `wait_while_busy`,
//! `issue_pio_command`, `read_sector`/`write_sector`, `sem_down`/`sem_up`)
//! to the `Controller` capability so the same engine drives either a
//! legacy channel or an AHCI port.

pub mod errclass;

use crate::config::ChannelConfig;
use crate::controller::{Controller, DmaCompletion, SgEntry, TransferDirection as CtlDirection};
use crate::device::Device;
use crate::error::{Completion, SenseTuple, SubsystemStatus};
use crate::sync::{Clock, CompletionWaiter, TicketLock};
use crate::wire::taskfile::{DeviceControl, ErrorReg, Status, TaskFile};
use errclass::RequestKind;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Busy,
    Pio,
    Dma,
}

/// Polling budget for short register waits (the 50 ms class of wait),
/// expressed as a plain iteration count rather than wall time so the
/// polling loops themselves stay allocation- and syscall-free; the
/// wall-clock ceiling is enforced separately via [`Clock`].
const SHORT_POLL_ITERATIONS: u32 = 10_000;

/// Worst-case settle time after SRST before a probed device's BSY bit is
/// guaranteed to clear (ATA/ATAPI-7 allows a slow-spinning-up slave this
/// long); a 30s slave wait rounded up.
const RESET_BUSY_CLEAR_TIMEOUT_MS: u32 = 31_000;

struct Inner {
    state: ChannelState,
    selected_device: Option<u8>,
    disconnected: bool,
}

/// One controller port (legacy channel or AHCI port) and the state that
/// serializes access to it.
pub struct Channel<C: Controller, CL: Clock> {
    lock: TicketLock<Inner>,
    pub(crate) controller: C,
    clock: CL,
    waiter: CompletionWaiter,
    config: ChannelConfig,
    pub devices: [Device; 2],
}

impl<C: Controller, CL: Clock> Channel<C, CL> {
    pub fn new(controller: C, clock: CL, config: ChannelConfig) -> Self {
        Channel {
            lock: TicketLock::new(Inner {
                state: ChannelState::Idle,
                selected_device: None,
                disconnected: false,
            }),
            controller,
            clock,
            waiter: CompletionWaiter::new(),
            config,
            devices: [Device::absent(false), Device::absent(true)],
        }
    }

    pub fn state(&self) -> ChannelState {
        self.lock.lock().state
    }

    pub fn config(&self) -> ChannelConfig {
        self.config
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock.lock().disconnected
    }

    /// Channel disconnect is monotonic: once set, all further
    /// submissions complete immediately with *no-HBA*.
    pub fn disconnect(&mut self) {
        self.lock.lock().disconnected = true;
    }

    /// Attempt to move *idle* → *busy*. Returns `Requeue` if the channel
    /// was not idle or was disconnected; the upper stack is expected to
    /// retry.
    fn try_start_request(&self, device_index: u8) -> Result<(), SubsystemStatus> {
        let mut inner = self.lock.lock();
        if inner.disconnected {
            return Err(SubsystemStatus::NoHba);
        }
        if inner.state != ChannelState::Idle {
            return Err(SubsystemStatus::Requeue);
        }
        inner.state = ChannelState::Busy;
        inner.selected_device = Some(device_index);
        Ok(())
    }

    fn finish_to_idle(&self) {
        let mut inner = self.lock.lock();
        inner.state = ChannelState::Idle;
        inner.selected_device = None;
    }

    fn transition_to(&self, state: ChannelState) {
        self.lock.lock().state = state;
    }

    // ---- Reset and probe ---------------------------------------------

    /// Pulse software reset and classify which of the two device slots
    /// presented. `presence_probe` performs the sector-count/LBA-low
    /// write-read round trip a reset routine uses before pulsing SRST;
    /// the controller is expected to have already primed each
    /// slot's registers for that round trip (it is a register-level
    /// detail, not one this engine abstracts further).
    pub fn reset_and_probe(&mut self, present: [bool; 2]) {
        log::info!("channel reset: pulsing SRST, probing slots {:?}", present);
        self.controller.write_device_control(0);
        self.controller
            .write_device_control(DeviceControl::new_with_raw_value(0).with_srst(true).raw_value());
        self.controller.write_device_control(0);

        for (index, is_present) in present.iter().enumerate() {
            if *is_present {
                self.controller.select_device(index as u8);
                if !self.wait_while_busy_clocked(RESET_BUSY_CLEAR_TIMEOUT_MS) {
                    log::warn!("device {} still busy {} ms after SRST", index, RESET_BUSY_CLEAR_TIMEOUT_MS);
                }
            }
        }
        self.finish_to_idle();
    }

    /// Poll alt-status until BSY clears or `timeout_ms` elapses, per the
    /// teacher's post-SRST settling wait (up to 31s for a slow-spinning
    /// slave).
    fn wait_while_busy_clocked(&mut self, timeout_ms: u32) -> bool {
        let start = self.clock.now();
        loop {
            if !self.poll_alt_status().bsy() {
                return true;
            }
            if self.clock.elapsed_millis(start) >= timeout_ms as u64 {
                return false;
            }
        }
    }

    fn poll_alt_status(&mut self) -> Status {
        Status::new_with_raw_value(self.controller.get_alt_status())
    }

    fn wait_until_ready(&mut self) -> bool {
        for _ in 0..SHORT_POLL_ITERATIONS {
            let status = self.poll_alt_status();
            if !status.bsy() && !status.drq() {
                return true;
            }
        }
        false
    }

    fn wait_while_busy(&mut self) -> bool {
        for _ in 0..SHORT_POLL_ITERATIONS {
            let status = self.poll_alt_status();
            if !status.bsy() {
                return status.drq();
            }
        }
        false
    }

    fn wait_for_drq(&mut self) -> Result<(), SubsystemStatus> {
        for _ in 0..SHORT_POLL_ITERATIONS {
            let status = self.poll_alt_status();
            if status.bsy() {
                continue;
            }
            if status.drq() {
                return Ok(());
            }
            if status.err() {
                return Err(SubsystemStatus::SequenceFail);
            }
        }
        Err(SubsystemStatus::CommandTimeout)
    }

    // ---- Identify -------------------------------------------------------

    pub fn identify(&mut self, device_index: u8, command: u8) -> Result<[u8; 512], SubsystemStatus> {
        self.try_start_request(device_index)?;
        self.controller.select_device(device_index);
        if !self.wait_until_ready() {
            self.finish_to_idle();
            log::warn!("identify: selection timeout on device {}", device_index);
            return Err(SubsystemStatus::SelectionTimeout);
        }
        self.controller.issue_command(command);
        self.transition_to(ChannelState::Pio);

        if self.wait_for_drq().is_err() {
            self.finish_to_idle();
            log::warn!("identify: device {} never asserted DRQ for command {:#04x}", device_index, command);
            return Err(SubsystemStatus::CommandTimeout);
        }

        let mut words = [0u16; 256];
        self.controller.pio_read_words(&mut words);
        let status = Status::new_with_raw_value(self.controller.read_status());
        self.finish_to_idle();

        if status.err() {
            return Err(SubsystemStatus::SequenceFail);
        }

        let mut bytes = [0u8; 512];
        for (i, w) in words.iter().enumerate() {
            let b = w.to_le_bytes();
            bytes[i * 2] = b[0];
            bytes[i * 2 + 1] = b[1];
        }
        Ok(bytes)
    }

    // ---- Send-command sequence (8 ordered steps) ----------------------

    /// Run `task_file` on `device_index` up through issuing the command
    /// byte and transitioning the channel state. Does not perform the
    /// data phase — callers follow with [`Channel::pio_pump`] or the DMA
    /// path depending on `program_is_dma`.
    pub fn send_command(
        &mut self,
        device_index: u8,
        task_file: &TaskFile,
        requires_drdy: bool,
        program_is_dma: bool,
    ) -> Result<(), SubsystemStatus> {
        self.try_start_request(device_index)?;

        // Step 1: disable interrupts while selecting, in case the other
        // device on this channel might also signal.
        self.controller
            .write_device_control(DeviceControl::new_with_raw_value(0).with_nien(true).raw_value());

        // Step 2: select target; wait for BSY/DRQ clear.
        self.controller.select_device(device_index);
        let status = self.poll_alt_status();
        if status.raw_value() == 0xFF {
            self.finish_to_idle();
            return Err(SubsystemStatus::SelectionTimeout);
        }
        if !self.wait_until_ready() {
            self.finish_to_idle();
            return Err(SubsystemStatus::CommandTimeout);
        }

        // Step 3: DRDY check.
        if requires_drdy {
            let status = self.poll_alt_status();
            if !status.drdy() {
                self.finish_to_idle();
                return Err(SubsystemStatus::SequenceFail);
            }
        }

        // Step 4: write parameter registers named by the mask.
        self.controller.write_registers(task_file, task_file.mask);

        // Step 5/6/7: acquire lock (already held conceptually via
        // try_start_request's Busy state), re-enable interrupts for DMA,
        // write the command byte.
        if program_is_dma {
            self.controller.write_device_control(0);
        }
        self.controller.issue_command(task_file.command);

        // Step 8: transition state; release.
        self.transition_to(if program_is_dma { ChannelState::Dma } else { ChannelState::Pio });
        Ok(())
    }

    /// Write the 12-byte ATAPI command packet once DRQ asserts after a
    /// PACKET command has been issued. The packet's own data phase (if
    /// any) follows via [`Channel::pio_pump`].
    pub fn write_packet(&mut self, words: &[u16; 6]) -> Result<(), SubsystemStatus> {
        self.wait_for_drq()?;
        self.controller.pio_write_words(words);
        Ok(())
    }

    // ---- PIO pump -------------------------------------------------------

    /// Pump `sector_count` sectors of `sector_size` bytes between the
    /// device and `chunks`, a sequence of already-mapped host buffers
    /// (physical-memory resolution happens upstream of this engine).
    ///
    /// Odd-byte/page-boundary reconciliation across `chunks` falls out
    /// naturally: bytes are placed one at a time, continuing into the
    /// next chunk whenever the current one fills — there is no special
    /// carry state to track.
    pub fn pio_pump(
        &mut self,
        chunks: &mut [&mut [u8]],
        direction: CtlDirection,
        sector_size: usize,
        sector_count: usize,
    ) -> Result<(u32, bool), SubsystemStatus> {
        let mut chunk_idx = 0usize;
        let mut offset = 0usize;
        let mut bytes_moved: u32 = 0;
        let mut overrun = false;
        let words_per_sector = sector_size / 2;

        for _ in 0..sector_count {
            if self.wait_for_drq().is_err() {
                self.finish_to_idle();
                return Err(SubsystemStatus::CommandTimeout);
            }

            match direction {
                CtlDirection::FromDevice => {
                    let mut scratch = alloc::vec![0u16; words_per_sector];
                    self.controller.pio_read_words(&mut scratch);
                    for word in &scratch {
                        for b in word.to_le_bytes() {
                            loop {
                                if chunk_idx >= chunks.len() {
                                    overrun = true;
                                    break;
                                }
                                if offset < chunks[chunk_idx].len() {
                                    chunks[chunk_idx][offset] = b;
                                    offset += 1;
                                    bytes_moved += 1;
                                    break;
                                }
                                chunk_idx += 1;
                                offset = 0;
                            }
                        }
                    }
                }
                CtlDirection::ToDevice => {
                    let mut scratch = alloc::vec![0u16; words_per_sector];
                    for word_slot in scratch.iter_mut() {
                        let mut word_bytes = [0u8; 2];
                        for b in word_bytes.iter_mut() {
                            loop {
                                if chunk_idx >= chunks.len() {
                                    break;
                                }
                                if offset < chunks[chunk_idx].len() {
                                    *b = chunks[chunk_idx][offset];
                                    offset += 1;
                                    bytes_moved += 1;
                                    break;
                                }
                                chunk_idx += 1;
                                offset = 0;
                            }
                        }
                        *word_slot = u16::from_le_bytes(word_bytes);
                    }
                    self.controller.pio_write_words(&scratch);
                }
            }
        }

        for _ in 0..SHORT_POLL_ITERATIONS {
            if !self.poll_alt_status().drq() {
                break;
            }
        }
        let final_status = Status::new_with_raw_value(self.controller.read_status());
        self.finish_to_idle();

        if final_status.err() {
            return Err(SubsystemStatus::SequenceFail);
        }
        Ok((bytes_moved, overrun))
    }

    // ---- DMA path -------------------------------------------------------

    /// Arm the DMA engine; returns `false` if preparation failed (the
    /// caller should fall back to PIO and retag the request).
    pub fn begin_dma(&mut self, sg: &[SgEntry], direction: CtlDirection) -> bool {
        self.controller.begin_dma(sg, direction)
    }

    /// Wait for the completion interrupt (via [`Channel::on_interrupt`],
    /// expected to run concurrently and call [`CompletionWaiter::post`]),
    /// then read back the DMA outcome.
    pub fn await_dma_completion(&mut self, spin_budget: u32) -> Result<(DmaCompletion, u32), SubsystemStatus> {
        if !self.waiter.wait(spin_budget) {
            self.finish_to_idle();
            return Err(SubsystemStatus::CommandTimeout);
        }
        Ok(self.controller.end_dma())
    }

    // ---- Interrupt -> completion handoff --------------------------------

    /// Called at interrupt level. Acknowledges a spurious interrupt
    /// (BSY still set) without disturbing state; otherwise transitions
    /// to idle and wakes the waiter.
    pub fn on_interrupt(&mut self) {
        let status = self.poll_alt_status();
        if status.bsy() {
            return;
        }
        {
            let mut inner = self.lock.lock();
            if inner.state == ChannelState::Dma {
                inner.state = ChannelState::Idle;
                inner.selected_device = None;
            }
        }
        self.waiter.post();
    }

    /// Read the latched error register. Only meaningful immediately after
    /// a command completed with ERR set in status.
    pub fn read_error(&mut self) -> ErrorReg {
        ErrorReg::new_with_raw_value(self.controller.read_error())
    }

    /// Issue a command requiring no data phase (FLUSH CACHE, MEDIA EJECT,
    /// SET FEATURES) and wait for it to complete.
    pub fn run_bare_command(&mut self, device_index: u8, task_file: &TaskFile) -> Result<(), SubsystemStatus> {
        self.send_command(device_index, task_file, true, false)?;
        if !self.wait_until_ready() {
            self.finish_to_idle();
            return Err(SubsystemStatus::CommandTimeout);
        }
        let status = Status::new_with_raw_value(self.controller.read_status());
        self.finish_to_idle();
        if status.err() {
            return Err(SubsystemStatus::SequenceFail);
        }
        Ok(())
    }

    // ---- Completion bookkeeping ------------------------------------------

    /// Build a `Completion` from a raw error register, clearing the
    /// device's stored sense if a new one was synthesized (so a
    /// following REQUEST-SENSE does not double-report) and updating the
    /// DMA-failure counter when `was_dma` and the error is fatal.
    pub fn classify_completion(
        &mut self,
        device_index: u8,
        error: ErrorReg,
        request_kind: RequestKind,
        nm: bool,
        residual: u32,
        was_dma_failure: bool,
    ) -> Completion {
        let sense = if error.raw_value() == 0 && !nm {
            SenseTuple::NONE
        } else {
            errclass::classify(error, request_kind, nm)
        };

        let device = &mut self.devices[device_index as usize];
        if was_dma_failure {
            if device.record_dma_failure(self.config.dma_failure_demotion_threshold) {
                log::warn!("device {} demoted from DMA to PIO after repeated failures", device_index);
            }
        } else {
            device.record_dma_success();
        }

        if sense.is_empty() {
            Completion::good(residual)
        } else {
            device.sense = sense;
            Completion::with_sense(sense, residual)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::FakeController;
    use crate::sync::test_clock::TestClock;
    use crate::wire::taskfile::cmd;

    fn channel() -> Channel<FakeController, TestClock> {
        Channel::new(FakeController::new(), TestClock::new(), ChannelConfig::default())
    }

    #[test]
    fn starts_idle() {
        let c = channel();
        assert_eq!(c.state(), ChannelState::Idle);
    }

    #[test]
    fn second_request_while_busy_is_requeued() {
        let c = channel();
        assert!(c.try_start_request(0).is_ok());
        assert_eq!(c.try_start_request(0), Err(SubsystemStatus::Requeue));
    }

    #[test]
    fn disconnected_channel_rejects_with_no_hba() {
        let mut c = channel();
        c.disconnect();
        assert_eq!(c.try_start_request(0), Err(SubsystemStatus::NoHba));
    }

    #[test]
    fn send_command_writes_parameters_then_issues_command_byte() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0x00];
        let tf = TaskFile::lba28(cmd::READ_DMA, 0, 0, 1);
        let r = c.send_command(0, &tf, false, true);
        assert!(r.is_ok());
        assert_eq!(c.controller.commands_issued, alloc::vec![cmd::READ_DMA]);
        assert_eq!(c.controller.written.len(), 1);
        assert_eq!(c.state(), ChannelState::Dma);
    }

    #[test]
    fn send_command_selection_timeout_on_all_ones_status() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0xFF];
        let tf = TaskFile::bare(cmd::FLUSH_CACHE, 0);
        let r = c.send_command(0, &tf, false, false);
        assert_eq!(r, Err(SubsystemStatus::SelectionTimeout));
        assert_eq!(c.state(), ChannelState::Idle);
    }

    #[test]
    fn send_command_drdy_required_but_missing_fails_sequence() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0x00]; // BSY/DRQ/DRDY all clear
        let tf = TaskFile::bare(cmd::IDENTIFY_DEVICE, 0);
        let r = c.send_command(0, &tf, true, false);
        assert_eq!(r, Err(SubsystemStatus::SequenceFail));
    }

    #[test]
    fn pio_pump_moves_bytes_across_chunk_boundary() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0x08]; // DRQ set
        c.controller.status_sequence = alloc::vec![0x40]; // DRDY, no ERR
        c.controller.pio_read_data = alloc::vec![0x1122]; // one word = 2 bytes: 0x22, 0x11

        let mut a = [0u8; 1];
        let mut b = [0u8; 1];
        let mut chunks: [&mut [u8]; 2] = [&mut a, &mut b];
        let (moved, overrun) = c.pio_pump(&mut chunks, CtlDirection::FromDevice, 2, 1).unwrap();
        assert_eq!(moved, 2);
        assert!(!overrun);
        assert_eq!(a[0], 0x22);
        assert_eq!(b[0], 0x11);
    }

    #[test]
    fn pio_pump_flags_overrun_when_chunks_run_short() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0x08];
        c.controller.status_sequence = alloc::vec![0x40];
        c.controller.pio_read_data = alloc::vec![0x1122];

        let mut a = [0u8; 1];
        let mut chunks: [&mut [u8]; 1] = [&mut a];
        let (moved, overrun) = c.pio_pump(&mut chunks, CtlDirection::FromDevice, 2, 1).unwrap();
        assert_eq!(moved, 1);
        assert!(overrun);
    }

    #[test]
    fn interrupt_ignores_spurious_busy_signal() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0x80]; // BSY still set
        c.transition_to(ChannelState::Dma);
        c.on_interrupt();
        assert_eq!(c.state(), ChannelState::Dma);
    }

    #[test]
    fn interrupt_transitions_dma_to_idle_and_wakes_waiter() {
        let mut c = channel();
        c.controller.alt_status_sequence = alloc::vec![0x40];
        c.transition_to(ChannelState::Dma);
        c.on_interrupt();
        assert_eq!(c.state(), ChannelState::Idle);
        assert!(c.waiter.try_wait());
    }

    #[test]
    fn dma_completion_timeout_without_interrupt() {
        let mut c = channel();
        let r = c.await_dma_completion(4);
        assert_eq!(r, Err(SubsystemStatus::CommandTimeout));
    }

    #[test]
    fn classify_completion_abrt_marks_device_sense_and_clears_on_success() {
        let mut c = channel();
        let err = ErrorReg::new_with_raw_value(0x04);
        let completion = c.classify_completion(0, err, RequestKind::Other, false, 0, false);
        assert!(completion.status == SubsystemStatus::CompletedWithError);
        assert!(!c.devices[0].sense.is_empty());
    }

    #[test]
    fn classify_completion_zero_error_is_good() {
        let mut c = channel();
        let completion = c.classify_completion(0, ErrorReg::new_with_raw_value(0), RequestKind::Other, false, 0, false);
        assert_eq!(completion.status, SubsystemStatus::Good);
    }

    #[test]
    fn three_dma_failures_demote_device() {
        let mut c = channel();
        for _ in 0..3 {
            c.classify_completion(0, ErrorReg::new_with_raw_value(0), RequestKind::Other, false, 0, true);
        }
        assert_eq!(c.devices[0].dma_failure_count, 3);
    }
}
