//! Per-channel configuration and device quirk tables: the default
//! per-request block cap, and the model-number-prefix quirk list for
//! drives that choke on large transfers.

/// Configuration a channel is constructed with. No environment or file
/// parsing happens here — that is driver-framework plumbing, out of
/// scope for this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_devices: u8,
    pub dma_permitted: bool,
    pub command_queuing_permitted: bool,
    pub request_timeout_ms: u32,
    /// Consecutive DMA failures on a device before it is demoted to PIO
    /// for the remainder of the driver's lifetime.
    pub dma_failure_demotion_threshold: u8,
    /// `path_inquiry`'s reported initiator id (2 for a legacy channel, 32
    /// for an AHCI port — a controller-family fact this generic engine
    /// cannot derive itself, so it is configured in).
    pub initiator_id: u8,
    /// `path_inquiry`'s reported per-device outstanding-request count.
    pub queue_depth: QueueDepth,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_devices: 2,
            dma_permitted: true,
            command_queuing_permitted: false,
            request_timeout_ms: 20_000,
            dma_failure_demotion_threshold: 3,
            initiator_id: 2,
            queue_depth: QueueDepth::LEGACY,
        }
    }
}

/// Per-device outstanding-request count the channel exposes to
/// `path_inquiry`. Frozen at 1 for the legacy channel; the AHCI port
/// reports its hardware slot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth(pub u8);

impl QueueDepth {
    pub const LEGACY: QueueDepth = QueueDepth(1);

    pub const fn ahci(slot_count: u8) -> QueueDepth {
        QueueDepth(slot_count)
    }
}

/// A model-number prefix match that caps the per-request block count
/// below the protocol's own 28-/48-bit limit.
pub struct ModelQuirk {
    pub model_prefix: &'static str,
    pub max_blocks_per_request: u32,
}

/// Drives known to misbehave on large transfers.
pub const MODEL_QUIRKS: &[ModelQuirk] = &[
    ModelQuirk {
        model_prefix: "IOMEGA  ZIP 100       ATAPI",
        max_blocks_per_request: 64,
    },
    ModelQuirk {
        model_prefix: "IOMEGA  Clik!",
        max_blocks_per_request: 64,
    },
];

/// Default per-request block cap before any quirk applies (an
/// unconditional 255-block baseline, bumped to this crate's true
/// 28-bit/48-bit limits by the caller as needed).
pub const DEFAULT_MAX_BLOCKS_PER_REQUEST: u32 = 255;

/// Look up the block cap for a device's model number: the first
/// matching quirk prefix wins, else `fallback`.
pub fn max_blocks_for_model(model_number: &str, fallback: u32) -> u32 {
    MODEL_QUIRKS
        .iter()
        .find(|q| model_number.starts_with(q.model_prefix))
        .map(|q| q.max_blocks_per_request)
        .unwrap_or(fallback)
}
