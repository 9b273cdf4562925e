/// Bridge-wide counters.
///
/// Nothing on the RX/TX hot path returns an error to the graph runtime; every failure is
/// accounted for here instead.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Packets delivered from the external stack into the graph (any successor, `drop` included).
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Descriptors dropped because the RX cache could not cover their segment count.
    pub rx_no_buffer: u64,
    pub rx_dropped_empty: u64,
    pub rx_dropped_oversize: u64,
    pub rx_unknown_packet_type: u64,

    pub tx_packets: u64,
    pub tx_bytes: u64,
    /// Packets dropped because the to-stack ring was full.
    pub tx_dropped_full: u64,
    /// Ethernet packets that had no headroom left for the destination MAC.
    pub tx_dropped_no_headroom: u64,
    /// Packets freed by the punt callback without being transmitted.
    pub punt_discarded: u64,
    /// Packets freed by the interface TX function without being transmitted.
    pub tx_discarded: u64,
    /// Packets freed by TX because the bridge was not enabled.
    pub tx_discarded_disabled: u64,
}

impl BridgeStats {
    pub fn rx_dropped(&self) -> u64 {
        self.rx_no_buffer
            + self.rx_dropped_empty
            + self.rx_dropped_oversize
    }

    pub fn tx_dropped(&self) -> u64 {
        self.tx_dropped_full + self.tx_dropped_no_headroom
    }
}

/// Result of one RX activation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxCounts {
    /// Descriptors dequeued from the from-stack ring.
    pub dequeued: usize,
    /// Chains handed to the graph runtime.
    pub delivered: usize,
    pub bytes: usize,
    pub dropped: usize,
}

/// Result of one TX frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxCounts {
    /// Chain heads in the frame, all of which were freed.
    pub accepted: usize,
    /// Packets freed without a transmit attempt.
    pub discarded: usize,
    /// Packets now sitting on the to-stack ring.
    pub enqueued: usize,
    pub bytes: usize,
    pub dropped_full: usize,
    pub dropped_no_headroom: usize,
}
