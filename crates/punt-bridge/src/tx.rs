//! Outbound path: graph buffer chains onto the to-stack ring.
//!
//! Descriptors own a copy of the payload, so every chain handed to TX is back in the pool by the
//! time the call returns, whether or not the packet made it onto the ring. A bridge that is not
//! enabled frees the chain without touching the ring.

use punt_buffer::{BufferIndex, Chain, Segment};
use punt_ipc::{PushError, TransportDescriptor};
use tracing::trace;

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::mode::PuntCallback;
use crate::provision::DeviceProvisioner;
use crate::stats::TxCounts;

/// What happened to one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Enqueued { bytes: usize },
    DroppedRingFull,
    DroppedNoHeadroom,
    /// The bridge is not enabled; the chain was freed without a transmit attempt.
    Discarded,
}

fn headroom(seg: &Segment) -> u16 {
    u16::try_from(seg.current_data().min(seg.pre_data_size())).unwrap_or(0)
}

impl<P: DeviceProvisioner> Bridge<P> {
    /// Transmit every chain in `frame` to the external stack and free all of them.
    pub fn tx_frame(&mut self, frame: &[BufferIndex]) -> TxCounts {
        let mut counts = TxCounts::default();
        for &head in frame {
            counts.accepted += 1;
            match self.tx_one(head) {
                TxOutcome::Enqueued { bytes } => {
                    counts.enqueued += 1;
                    counts.bytes += bytes;
                }
                TxOutcome::DroppedRingFull => counts.dropped_full += 1,
                TxOutcome::DroppedNoHeadroom => counts.dropped_no_headroom += 1,
                TxOutcome::Discarded => counts.discarded += 1,
            }
        }
        counts
    }

    /// Transmit the chain starting at `head` and free it.
    pub fn tx_one(&mut self, head: BufferIndex) -> TxOutcome {
        let chain = Chain::from_head(&self.pool, head);
        let outcome = if self.is_enabled() {
            self.transmit(&chain)
        } else {
            self.stats.tx_discarded_disabled += 1;
            trace!(head = ?head, "tx discard: bridge not enabled");
            TxOutcome::Discarded
        };
        chain.release(&mut self.pool);
        outcome
    }

    /// Punt callback for frames the graph could not route.
    pub fn punt_frame(&mut self, frame: &[BufferIndex]) -> TxCounts {
        match self.config.mode.punt_callback() {
            PuntCallback::Transmit => self.tx_frame(frame),
            PuntCallback::Discard => {
                self.stats.punt_discarded += frame.len() as u64;
                self.discard(frame)
            }
        }
    }

    /// Device-class TX for traffic routed out of the bridge interface.
    pub fn interface_tx(&mut self, frame: &[BufferIndex]) -> TxCounts {
        if self.config.mode.interface_tx_transmits() {
            return self.tx_frame(frame);
        }
        self.stats.tx_discarded += frame.len() as u64;
        self.discard(frame)
    }

    fn discard(&mut self, frame: &[BufferIndex]) -> TxCounts {
        for &head in frame {
            self.pool.free_chain(head);
        }
        TxCounts {
            accepted: frame.len(),
            discarded: frame.len(),
            ..TxCounts::default()
        }
    }

    fn transmit(&mut self, chain: &Chain) -> TxOutcome {
        if self.config.mode.prepends_dst_mac() {
            let dst_mac = self
                .interface()
                .map(|record| record.dst_mac)
                .unwrap_or_default();
            let seg = self.pool.get_mut(chain.head());
            seg.reset();
            if !seg.prepend(&dst_mac.0) {
                self.stats.tx_dropped_no_headroom += 1;
                self.registry.record_drop(self.sw_if_index);
                trace!(head = ?chain.head(), "tx drop: no headroom for destination mac");
                return TxOutcome::DroppedNoHeadroom;
            }
        }

        let desc = self.build_descriptor(chain);
        let bytes = desc.pkt_len() as usize;
        match self.enqueue(desc) {
            Ok(()) => {
                self.stats.tx_packets += 1;
                self.stats.tx_bytes += bytes as u64;
                self.registry.record_tx(self.sw_if_index, bytes);
                TxOutcome::Enqueued { bytes }
            }
            Err(err) => {
                self.stats.tx_dropped_full += 1;
                self.registry.record_drop(self.sw_if_index);
                trace!(bytes, error = %err, "tx drop");
                TxOutcome::DroppedRingFull
            }
        }
    }

    /// Push onto the to-stack ring. A full ring drops the descriptor; there is no retry.
    fn enqueue(&mut self, desc: TransportDescriptor) -> Result<()> {
        self.transport
            .to_stack
            .try_push(desc)
            .map_err(|PushError::Full(_)| BridgeError::RingFull)
    }

    /// One descriptor per segment, linked as continuations of the head.
    fn build_descriptor(&self, chain: &Chain) -> TransportDescriptor {
        let mut segments = chain.segments().iter().map(|&bi| self.pool.get(bi));
        let mut desc = match segments.next() {
            Some(head) => TransportDescriptor::with_headroom(headroom(head), head.payload()),
            None => TransportDescriptor::from_payload(&[]),
        };
        for seg in segments {
            desc.push_segment(headroom(seg), seg.payload());
        }
        desc
    }
}
