//! The device data model: a single drive attached to a channel (legacy)
//! or AHCI port.

use crate::config::max_blocks_for_model;
use crate::error::SenseTuple;
use crate::wire::identify::IdentifyBlock;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    Ata,
    Atapi,
    Absent,
}

/// Geometry and protocol capabilities derived from the parsed identify
/// block, cached once: the identify block is parsed exactly once per
/// device, at bring-up or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub use_lba: bool,
    pub use_48_bit: bool,
    pub total_sectors: u64,
    pub sector_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCapabilities {
    pub dma_supported: bool,
    pub dma_enabled: bool,
    pub trim_supported: bool,
    pub trim_returns_zeros: bool,
    pub max_trim_range_blocks: u16,
}

/// One drive attached to a channel. Constructed after a positive
/// presence probe and a successful identify; destroyed on re-scan or
/// channel teardown.
#[derive(Debug, Clone)]
pub struct Device {
    pub is_secondary: bool,
    pub kind: DeviceKind,
    pub identify: Option<IdentifyBlock>,
    /// The raw 512-byte identify response, kept only for `ioctl`'s
    /// GET_INFO_BLOCK; the parsed `identify` field above is what every
    /// other path reads.
    pub identify_raw: Option<[u8; 512]>,
    pub geometry: Geometry,
    pub caps: ProtocolCapabilities,
    pub last_lun: u8,
    pub sense: SenseTuple,
    pub dma_failure_count: u8,
    pub max_blocks_per_request: u32,
}

impl Device {
    pub fn absent(is_secondary: bool) -> Self {
        Device {
            is_secondary,
            kind: DeviceKind::Absent,
            identify: None,
            identify_raw: None,
            geometry: Geometry {
                use_lba: false,
                use_48_bit: false,
                total_sectors: 0,
                sector_size: 512,
            },
            caps: ProtocolCapabilities {
                dma_supported: false,
                dma_enabled: false,
                trim_supported: false,
                trim_returns_zeros: false,
                max_trim_range_blocks: 0,
            },
            last_lun: 0,
            sense: SenseTuple::NONE,
            dma_failure_count: 0,
            max_blocks_per_request: crate::config::DEFAULT_MAX_BLOCKS_PER_REQUEST,
        }
    }

    /// Build a device record from a freshly parsed identify block,
    /// applying the model-number quirk table to the per-request block
    /// cap.
    pub fn from_identify(is_secondary: bool, identify: IdentifyBlock, dma_permitted: bool) -> Self {
        let kind = if identify.is_atapi {
            DeviceKind::Atapi
        } else {
            DeviceKind::Ata
        };
        let use_48_bit = identify.uses_lba48();
        let total_sectors = identify.sector_count();
        let protocol_cap = if use_48_bit {
            crate::wire::taskfile::MAX_SECTORS_48BIT
        } else {
            crate::wire::taskfile::MAX_SECTORS_28BIT
        };
        let max_blocks_per_request = max_blocks_for_model(&identify.model_number, protocol_cap);

        let caps = ProtocolCapabilities {
            dma_supported: identify.dma_supported,
            dma_enabled: dma_permitted && identify.dma_supported,
            trim_supported: identify.data_set_management_supported,
            trim_returns_zeros: identify.read_zero_after_trim,
            max_trim_range_blocks: identify.max_dsm_range_blocks,
        };

        Device {
            is_secondary,
            kind,
            identify: Some(identify),
            identify_raw: None,
            geometry: Geometry {
                use_lba: true,
                use_48_bit,
                total_sectors,
                sector_size: 512,
            },
            caps,
            last_lun: 0,
            sense: SenseTuple::NONE,
            dma_failure_count: 0,
            max_blocks_per_request,
        }
    }

    pub fn is_present(&self) -> bool {
        self.kind != DeviceKind::Absent
    }

    pub fn with_identify_raw(mut self, raw: [u8; 512]) -> Self {
        self.identify_raw = Some(raw);
        self
    }

    /// Record a DMA completion's outcome; returns `true` if this
    /// failure just crossed the demotion threshold (caller should clear
    /// `dma_enabled`).
    pub fn record_dma_failure(&mut self, threshold: u8) -> bool {
        self.dma_failure_count = self.dma_failure_count.saturating_add(1);
        if self.dma_failure_count >= threshold && self.caps.dma_enabled {
            self.caps.dma_enabled = false;
            true
        } else {
            false
        }
    }

    pub fn record_dma_success(&mut self) {
        self.dma_failure_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::identify::{build_identify_fixture, parse_identify};

    fn ata_device() -> Device {
        let buf = build_identify_fixture("EXAMPLE MODEL-1", "SN1", "FW1", 0, 1_048_576, true, true, true, true, 0xFFFF);
        let id = parse_identify(&buf);
        Device::from_identify(false, id, true)
    }

    #[test]
    fn absent_device_reports_not_present() {
        let d = Device::absent(false);
        assert!(!d.is_present());
    }

    #[test]
    fn from_identify_derives_48bit_geometry() {
        let d = ata_device();
        assert!(d.geometry.use_48_bit);
        assert_eq!(d.geometry.total_sectors, 1_048_576);
        assert!(d.caps.dma_enabled);
    }

    #[test]
    fn dma_disabled_permission_overrides_device_capability() {
        let buf = build_identify_fixture("M", "S", "F", 400, 0, false, true, false, false, 0);
        let id = parse_identify(&buf);
        let d = Device::from_identify(false, id, false);
        assert!(d.caps.dma_supported);
        assert!(!d.caps.dma_enabled);
    }

    #[test]
    fn three_consecutive_dma_failures_demote_to_pio() {
        let mut d = ata_device();
        assert!(!d.record_dma_failure(3));
        assert!(!d.record_dma_failure(3));
        assert!(d.record_dma_failure(3));
        assert!(!d.caps.dma_enabled);
    }

    #[test]
    fn dma_success_resets_failure_counter() {
        let mut d = ata_device();
        d.record_dma_failure(3);
        d.record_dma_success();
        assert_eq!(d.dma_failure_count, 0);
    }

    #[test]
    fn quirky_zip_model_caps_block_count_at_64() {
        let buf = build_identify_fixture("IOMEGA  ZIP 100       ATAPI", "SN", "FW", 750, 0, false, true, false, false, 0);
        let id = parse_identify(&buf);
        let d = Device::from_identify(false, id, true);
        assert_eq!(d.max_blocks_per_request, 64);
    }
}
