//! The Request/Ccb type: the command-control-block visible at the
//! upstream boundary.

use crate::controller::SgEntry;
use crate::error::{Completion, SubsystemStatus};
use crate::wire::sense::FIXED_SENSE_LEN;
use alloc::vec::Vec;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferDirection {
    None,
    ToDevice,
    FromDevice,
}

/// Maximum CDB length this engine accepts (covers the 6/10/12/16-byte
/// SCSI forms).
pub const MAX_CDB_LEN: usize = 16;

/// A single command-control-block: owned exclusively by one channel from
/// acceptance until completion.
#[derive(Debug, Clone)]
pub struct Ccb {
    pub target_id: u8,
    pub lun: u8,
    pub cdb: [u8; MAX_CDB_LEN],
    pub cdb_len: u8,
    pub direction: TransferDirection,
    pub sg_list: Vec<SgEntry>,
    pub total_data_len: u32,
    pub timeout_ms: u32,
    pub autosense_enabled: bool,

    // Output fields, filled in on completion.
    pub residual: u32,
    pub status: SubsystemStatus,
    pub device_status_check_condition: bool,
    pub autosense: [u8; FIXED_SENSE_LEN],
    pub autosense_len: u8,
}

impl Ccb {
    pub fn new(target_id: u8, lun: u8, cdb: &[u8], direction: TransferDirection, sg_list: Vec<SgEntry>, timeout_ms: u32) -> Self {
        let mut cdb_buf = [0u8; MAX_CDB_LEN];
        let n = cdb.len().min(MAX_CDB_LEN);
        cdb_buf[..n].copy_from_slice(&cdb[..n]);
        let total_data_len = sg_list.iter().map(|e| e.len).sum();
        Ccb {
            target_id,
            lun,
            cdb: cdb_buf,
            cdb_len: n as u8,
            direction,
            sg_list,
            total_data_len,
            timeout_ms,
            autosense_enabled: true,
            residual: 0,
            status: SubsystemStatus::Good,
            device_status_check_condition: false,
            autosense: [0u8; FIXED_SENSE_LEN],
            autosense_len: 0,
        }
    }

    pub fn cdb_bytes(&self) -> &[u8] {
        &self.cdb[..self.cdb_len as usize]
    }

    /// Apply a `Completion` (the dispatcher/channel-engine outcome) to
    /// this request's output fields, synthesizing the autosense buffer
    /// when sense is non-empty and autosense is enabled.
    pub fn apply_completion(&mut self, completion: Completion) {
        self.status = completion.status;
        self.residual = completion.residual;
        if !completion.sense.is_empty() {
            self.device_status_check_condition = true;
            if self.autosense_enabled {
                let encoded = crate::wire::sense::encode_fixed_sense(&completion.sense);
                let len = crate::wire::sense::copy_sense_truncated(&encoded, &mut self.autosense, FIXED_SENSE_LEN);
                self.autosense_len = len as u8;
            }
        } else {
            self.device_status_check_condition = false;
            self.autosense_len = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{asc, SenseKey, SenseTuple};

    fn ccb() -> Ccb {
        Ccb::new(0, 0, &[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0], TransferDirection::FromDevice, alloc::vec![SgEntry { phys_addr: 0x1000, len: 512 }], 20_000)
    }

    #[test]
    fn total_data_len_sums_sg_list() {
        let c = ccb();
        assert_eq!(c.total_data_len, 512);
    }

    #[test]
    fn completion_with_sense_fills_autosense_and_sets_check_condition() {
        let mut c = ccb();
        let sense = SenseTuple::new(SenseKey::MediumError, asc::MEDIUM_NOT_PRESENT.0, asc::MEDIUM_NOT_PRESENT.1);
        c.apply_completion(Completion::with_sense(sense, 512));
        assert!(c.device_status_check_condition);
        assert_eq!(c.autosense[2], SenseKey::MediumError as u8);
        assert_eq!(c.autosense[12], 0x3A);
        assert_eq!(c.autosense_len, FIXED_SENSE_LEN as u8);
    }

    #[test]
    fn good_completion_clears_check_condition() {
        let mut c = ccb();
        c.apply_completion(Completion::good(0));
        assert!(!c.device_status_check_condition);
        assert_eq!(c.autosense_len, 0);
    }

    #[test]
    fn cdb_bytes_truncates_to_recorded_length() {
        let c = ccb();
        assert_eq!(c.cdb_bytes().len(), 10);
    }
}
