//! ATA task-file register image and command codes.
//!
//! Reference: ATA/ATAPI-7, and a register layout exposed as `reg_*`
//! accessors (data, error/features, nsect, lbal, lbam, lbah, device,
//! status/command).

use bitbybit::bitfield;

/// Command codes used by this engine. Values per ATA/ATAPI-7.
pub mod cmd {
    pub const IDENTIFY_DEVICE: u8 = 0xEC;
    pub const IDENTIFY_PACKET_DEVICE: u8 = 0xA1;
    pub const READ_SECTORS: u8 = 0x20;
    pub const READ_SECTORS_EXT: u8 = 0x24;
    pub const WRITE_SECTORS: u8 = 0x30;
    pub const WRITE_SECTORS_EXT: u8 = 0x34;
    pub const READ_DMA: u8 = 0xC8;
    pub const READ_DMA_EXT: u8 = 0x25;
    pub const WRITE_DMA: u8 = 0xCA;
    pub const WRITE_DMA_EXT: u8 = 0x35;
    pub const FLUSH_CACHE: u8 = 0xE7;
    pub const FLUSH_CACHE_EXT: u8 = 0xEA;
    pub const DATA_SET_MANAGEMENT: u8 = 0x06;
    pub const MEDIA_EJECT: u8 = 0xED;
    pub const GET_MEDIA_STATUS: u8 = 0xDA;
    pub const SET_FEATURES: u8 = 0xEF;
    pub const PACKET: u8 = 0xA0;
}

/// Status register bits (read via alt-status; reading status acks IRQ).
#[bitfield(u8, default = 0)]
pub struct Status {
    #[bit(0, r)]
    pub err: bool,
    #[bit(3, r)]
    pub drq: bool,
    #[bit(5, r)]
    pub df: bool,
    #[bit(6, r)]
    pub drdy: bool,
    #[bit(7, r)]
    pub bsy: bool,
}

/// Error register bits, checked by the classifier in a fixed order.
///
/// Bit 6 is overloaded: on a write command it reads as WP (write
/// protected), on any other command it reads as UNC (uncorrectable data
/// error). Both accessors read the same underlying bit; the caller
/// picks which meaning applies based on the command's direction.
#[bitfield(u8, default = 0)]
pub struct ErrorReg {
    #[bit(0, r)]
    pub amnf: bool,
    #[bit(1, r)]
    pub tkznf: bool,
    #[bit(2, r)]
    pub abrt: bool,
    #[bit(3, r)]
    pub mcr: bool,
    #[bit(4, r)]
    pub idnf: bool,
    #[bit(5, r)]
    pub mc: bool,
    #[bit(6, r)]
    pub unc: bool,
    #[bit(6, r)]
    pub wp: bool,
    #[bit(7, r)]
    pub icrc: bool,
}

/// Device/head register: selects the device and (for 28-bit LBA) the
/// high nibble of the address.
#[bitfield(u8, default = 0xA0)]
pub struct DeviceHead {
    #[bits(0..=3, rw)]
    pub lba_high_nibble: u4,
    #[bit(4, rw)]
    pub drv: bool,
    #[bit(6, rw)]
    pub lba_mode: bool,
}

use arbitrary_int::u4;

impl DeviceHead {
    pub fn for_device(dev_index: u8, lba28_high: u8) -> Self {
        DeviceHead::new_with_raw_value(0xA0)
            .with_drv(dev_index != 0)
            .with_lba_mode(true)
            .with_lba_high_nibble(u4::new(lba28_high & 0x0F))
    }
}

/// Device control register bits (software reset, interrupt disable).
#[bitfield(u8, default = 0)]
pub struct DeviceControl {
    #[bit(1, rw)]
    pub nien: bool,
    #[bit(2, rw)]
    pub srst: bool,
    #[bit(7, rw)]
    pub hob: bool,
}

/// Which task-file registers a command must write before the command
/// byte. Bit order is arbitrary but fixed within this crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ParamMask(u16);

impl ParamMask {
    pub const FEATURES: ParamMask = ParamMask(1 << 0);
    pub const NSECT: ParamMask = ParamMask(1 << 1);
    pub const LBA_LOW: ParamMask = ParamMask(1 << 2);
    pub const LBA_MID: ParamMask = ParamMask(1 << 3);
    pub const LBA_HIGH: ParamMask = ParamMask(1 << 4);
    pub const NSECT_EXT: ParamMask = ParamMask(1 << 5);
    pub const LBA_LOW_EXT: ParamMask = ParamMask(1 << 6);
    pub const LBA_MID_EXT: ParamMask = ParamMask(1 << 7);
    pub const LBA_HIGH_EXT: ParamMask = ParamMask(1 << 8);
    pub const DEVICE: ParamMask = ParamMask(1 << 9);

    pub const NONE: ParamMask = ParamMask(0);

    pub const fn union(self, other: ParamMask) -> ParamMask {
        ParamMask(self.0 | other.0)
    }

    pub fn contains(self, bit: ParamMask) -> bool {
        self.0 & bit.0 != 0
    }
}

impl core::ops::BitOr for ParamMask {
    type Output = ParamMask;
    fn bitor(self, rhs: ParamMask) -> ParamMask {
        self.union(rhs)
    }
}

/// A 28- or 48-bit LBA/sector-count command program, ready to be written
/// to the channel's registers in the order §4.3 specifies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TaskFile {
    pub features: u8,
    pub sector_count: u16,
    /// LBA bytes 0..=5 for 48-bit; only bytes 0..=2 meaningful for 28-bit.
    pub lba: [u8; 6],
    pub device_head: u8,
    pub command: u8,
    pub mask: ParamMask,
    pub lba48: bool,
}

impl TaskFile {
    /// Program a 28-bit LBA command. `lba` must be `< 2^28` and
    /// `sector_count` must be `<= 256` (encoded as 0 meaning 256, per the
    /// ATA convention) — callers pass the true count; 256 is encoded as 0.
    pub fn lba28(command: u8, dev_index: u8, lba: u32, sector_count: u16) -> Self {
        debug_assert!(lba < 1 << 28);
        debug_assert!(sector_count as u32 <= 256);
        let encoded_count = if sector_count == 256 { 0 } else { sector_count as u8 };
        let dh = DeviceHead::for_device(dev_index, (lba >> 24) as u8);
        TaskFile {
            features: 0,
            sector_count: encoded_count as u16,
            lba: [lba as u8, (lba >> 8) as u8, (lba >> 16) as u8, 0, 0, 0],
            device_head: dh.raw_value(),
            command,
            mask: ParamMask::NSECT | ParamMask::LBA_LOW | ParamMask::LBA_MID | ParamMask::LBA_HIGH | ParamMask::DEVICE,
            lba48: false,
        }
    }

    /// Program a 48-bit LBA command. `lba` must be `< 2^48`,
    /// `sector_count` must be `<= 65536` (0 encodes 65536).
    pub fn lba48(command: u8, dev_index: u8, lba: u64, sector_count: u32) -> Self {
        debug_assert!(lba < 1 << 48);
        debug_assert!(sector_count <= 65536);
        let encoded_count = if sector_count == 65536 { 0 } else { sector_count as u16 };
        let dh = DeviceHead::for_device(dev_index, 0);
        let b = lba.to_le_bytes();
        TaskFile {
            features: 0,
            sector_count: encoded_count,
            lba: [b[0], b[1], b[2], b[3], b[4], b[5]],
            device_head: dh.raw_value(),
            command,
            mask: ParamMask::NSECT
                | ParamMask::LBA_LOW
                | ParamMask::LBA_MID
                | ParamMask::LBA_HIGH
                | ParamMask::NSECT_EXT
                | ParamMask::LBA_LOW_EXT
                | ParamMask::LBA_MID_EXT
                | ParamMask::LBA_HIGH_EXT
                | ParamMask::DEVICE,
            lba48: true,
        }
    }

    /// A no-parameter command (FLUSH CACHE, MEDIA EJECT, IDENTIFY).
    pub fn bare(command: u8, dev_index: u8) -> Self {
        let dh = DeviceHead::for_device(dev_index, 0);
        TaskFile {
            features: 0,
            sector_count: 0,
            lba: [0; 6],
            device_head: dh.raw_value(),
            command,
            mask: ParamMask::DEVICE,
            lba48: false,
        }
    }

    pub fn with_features(mut self, features: u8) -> Self {
        self.features = features;
        self.mask = self.mask | ParamMask::FEATURES;
        self
    }
}

/// Limits from §3's invariants.
pub const MAX_SECTORS_28BIT: u32 = 256;
pub const MAX_LBA_28BIT: u64 = 1 << 28;
pub const MAX_SECTORS_48BIT: u32 = 65536;
pub const MAX_LBA_48BIT: u64 = 1 << 48;
