//! Wire codecs (C1): SCSI CDBs, ATA task files, ATAPI packets, the
//! identify block, SCSI response PDUs, UNMAP parameter lists, and the
//! AHCI command-list/FIS/PRD layout. Pure data transforms, no I/O.

pub mod ahci;
pub mod atapi;
pub mod cdb;
pub mod identify;
pub mod scsi_response;
pub mod sense;
pub mod taskfile;
pub mod unmap;
