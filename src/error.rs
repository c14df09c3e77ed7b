//! Error and status types reported across the upstream boundary.
//!
//! Three independent error channels exist, mirroring §7 of the design:
//! sense (SCSI's own error vocabulary), subsystem status (transport-level
//! failures that have no SCSI sense equivalent), and dispatch errors
//! (rejections that happen before any device interaction).

use core::fmt;

/// A 4-bit SCSI sense key (SPC-3 table 27).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum SenseKey {
    NoSense = 0x0,
    RecoveredError = 0x1,
    NotReady = 0x2,
    MediumError = 0x3,
    HardwareError = 0x4,
    IllegalRequest = 0x5,
    UnitAttention = 0x6,
    DataProtect = 0x7,
    AbortedCommand = 0xB,
}

/// (key, ASC, ASCQ) — the device's pending error, carried across the
/// REQUEST-SENSE boundary. At most one is stored per device at a time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SenseTuple {
    pub key: SenseKey,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseTuple {
    pub const NONE: SenseTuple = SenseTuple {
        key: SenseKey::NoSense,
        asc: 0,
        ascq: 0,
    };

    pub const fn new(key: SenseKey, asc: u8, ascq: u8) -> Self {
        SenseTuple { key, asc, ascq }
    }

    pub fn is_empty(&self) -> bool {
        self.key == SenseKey::NoSense && self.asc == 0 && self.ascq == 0
    }
}

impl Default for SenseTuple {
    fn default() -> Self {
        SenseTuple::NONE
    }
}

/// Common ASC/ASCQ pairs used by the translator and error classifier.
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: (u8, u8) = (0x00, 0x00);
    pub const INVALID_COMMAND_OPERATION_CODE: (u8, u8) = (0x20, 0x00);
    pub const INVALID_FIELD_IN_CDB: (u8, u8) = (0x24, 0x00);
    pub const INVALID_FIELD_IN_PARAMETER_LIST: (u8, u8) = (0x26, 0x00);
    pub const PARAMETER_LIST_LENGTH_ERROR: (u8, u8) = (0x1A, 0x00);
    pub const LUN_COMMUNICATION_CRC_ERROR: (u8, u8) = (0x08, 0x03);
    pub const WRITE_PROTECTED: (u8, u8) = (0x27, 0x00);
    pub const UNRECOVERED_READ_ERROR: (u8, u8) = (0x11, 0x00);
    pub const MEDIUM_CHANGED: (u8, u8) = (0x28, 0x00);
    pub const RANDOM_POSITIONING_ERROR: (u8, u8) = (0x15, 0x01);
    pub const REMOVAL_REQUESTED: (u8, u8) = (0x5A, 0x01);
    pub const MEDIUM_NOT_PRESENT: (u8, u8) = (0x3A, 0x00);
    pub const INTERNAL_TARGET_FAILURE: (u8, u8) = (0x44, 0x00);
    pub const LOGICAL_UNIT_NOT_READY: (u8, u8) = (0x04, 0x00);
}

/// Transport-level completion status, orthogonal to SCSI sense.
///
/// Covers the subsystem-status kinds a caller can observe, plus the
/// `Good` and `Requeue` outcomes implied by the at-most-one-request and
/// zero-length-transfer invariants a channel must uphold.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubsystemStatus {
    /// Completed without error.
    Good,
    /// Completed, but `CHECK CONDITION` / sense is set.
    CompletedWithError,
    /// The channel was busy; the caller should requeue.
    Requeue,
    /// No device responded during selection (status read as all-ones).
    SelectionTimeout,
    /// The device never reached the expected phase within the deadline.
    CommandTimeout,
    /// DRQ/DRDY state was not what the protocol step required.
    SequenceFail,
    /// The controller rejected a register write.
    HbaError,
    /// The channel is disconnected; no further requests can run.
    NoHba,
    /// The target id or LUN addressed no device.
    TargetIdInvalid,
}

impl SubsystemStatus {
    pub fn is_error(&self) -> bool {
        !matches!(self, SubsystemStatus::Good)
    }
}

impl fmt::Display for SubsystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A request rejected by the dispatcher before any device interaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// CDB opcode is not one this engine emulates.
    InvalidOpcode,
    /// A field inside an otherwise-recognized CDB is invalid.
    InvalidCdbField,
    /// A parameter list (MODE SELECT, UNMAP) failed length validation.
    InvalidParameterList,
    /// The request's direction flag contradicts the opcode.
    DirectionMismatch,
    /// LUN exceeds the device's last-lun value.
    LunOutOfRange,
    /// Scatter-gather total length did not equal sector-count * sector-size.
    LengthMismatch,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DispatchError::InvalidOpcode => "opcode not supported by this target",
            DispatchError::InvalidCdbField => "invalid field in CDB",
            DispatchError::InvalidParameterList => "invalid field in parameter list",
            DispatchError::DirectionMismatch => "CDB direction does not match request direction",
            DispatchError::LunOutOfRange => "LUN exceeds last-lun for this target",
            DispatchError::LengthMismatch => "scatter-gather length does not match requested transfer size",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for DispatchError {}

/// The outcome the dispatcher hands back for a single CDB: either it was
/// rejected outright, or it ran (successfully or not) and produced a
/// sense tuple plus subsystem status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: SubsystemStatus,
    pub sense: SenseTuple,
    pub residual: u32,
}

impl Completion {
    pub fn good(residual: u32) -> Self {
        Completion {
            status: SubsystemStatus::Good,
            sense: SenseTuple::NONE,
            residual,
        }
    }

    pub fn with_sense(sense: SenseTuple, residual: u32) -> Self {
        Completion {
            status: SubsystemStatus::CompletedWithError,
            sense,
            residual,
        }
    }

    pub fn status_only(status: SubsystemStatus, residual: u32) -> Self {
        Completion {
            status,
            sense: SenseTuple::NONE,
            residual,
        }
    }

    /// Invariant from §3: whenever sense is non-empty, status is promoted
    /// to completed-with-error.
    pub fn is_consistent(&self) -> bool {
        if !self.sense.is_empty() {
            self.status == SubsystemStatus::CompletedWithError
        } else {
            true
        }
    }
}
