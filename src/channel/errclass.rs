//! Error-register → sense-tuple classification.
//!
//! Checked in a fixed order; the first matching bit wins. A masked-off
//! bit is treated as absent.

use crate::error::{asc, SenseKey, SenseTuple};
use crate::wire::taskfile::ErrorReg;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
    Other,
}

/// Classify a latched error register into a sense tuple. `nm` reports
/// the device's no-medium condition (carried separately from the
/// standard ATA error bits, since that condition surfaces through
/// GET_MEDIA_STATUS rather than the error register proper); callers that
/// do not track it pass `false`.
pub fn classify(error: ErrorReg, request_kind: RequestKind, nm: bool) -> SenseTuple {
    if error.icrc() {
        return SenseTuple::new(SenseKey::HardwareError, asc::LUN_COMMUNICATION_CRC_ERROR.0, asc::LUN_COMMUNICATION_CRC_ERROR.1);
    }
    if request_kind == RequestKind::Write && write_protect_bit(error) {
        return SenseTuple::new(SenseKey::DataProtect, asc::WRITE_PROTECTED.0, asc::WRITE_PROTECTED.1);
    }
    if request_kind == RequestKind::Read && error.unc() {
        return SenseTuple::new(SenseKey::MediumError, asc::UNRECOVERED_READ_ERROR.0, asc::UNRECOVERED_READ_ERROR.1);
    }
    if error.mc() {
        return SenseTuple::new(SenseKey::UnitAttention, asc::MEDIUM_CHANGED.0, asc::MEDIUM_CHANGED.1);
    }
    if error.idnf() {
        return SenseTuple::new(SenseKey::MediumError, asc::RANDOM_POSITIONING_ERROR.0, asc::RANDOM_POSITIONING_ERROR.1);
    }
    if error.mcr() {
        return SenseTuple::new(SenseKey::UnitAttention, asc::REMOVAL_REQUESTED.0, asc::REMOVAL_REQUESTED.1);
    }
    if nm {
        return SenseTuple::new(SenseKey::MediumError, asc::MEDIUM_NOT_PRESENT.0, asc::MEDIUM_NOT_PRESENT.1);
    }
    if error.abrt() {
        return SenseTuple::new(SenseKey::AbortedCommand, asc::NO_ADDITIONAL_SENSE.0, asc::NO_ADDITIONAL_SENSE.1);
    }
    SenseTuple::new(SenseKey::HardwareError, asc::INTERNAL_TARGET_FAILURE.0, asc::INTERNAL_TARGET_FAILURE.1)
}

/// Bit 6 of the error register reads as WP on a write command (the same
/// bit reads as UNC on any other command); `error.wp()` is the write-side
/// accessor for that shared bit.
fn write_protect_bit(error: ErrorReg) -> bool {
    error.wp()
}
