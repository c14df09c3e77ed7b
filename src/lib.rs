//! `ata_bus_core`: the request-dispatch engine at the heart of an
//! ATA/ATAPI bus manager. Translates SCSI command-control-blocks into
//! ATA/ATAPI task-file programs, drives the per-channel bus state
//! machine through PIO and DMA transfers, and classifies completions
//! back into SCSI sense data.
//!
//! This crate has no knowledge of a particular bus transport (legacy
//! ISA/PCI IDE vs. AHCI) beyond the [`controller::Controller`] trait
//! seam; a caller supplies a concrete controller and clock and gets a
//! [`channel::Channel`] to submit [`request::Ccb`]s against.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod controller;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod request;
pub mod subsystem;
pub mod sync;
pub mod wire;
