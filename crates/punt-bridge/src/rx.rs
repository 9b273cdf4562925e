//! Inbound path: from-stack ring into graph buffer chains.

use punt_buffer::{BufferFlags, BufferIndex, Chain, INVALID_SW_IF_INDEX};
use punt_ipc::TransportDescriptor;
use tracing::trace;

use crate::bridge::Bridge;
use crate::classify::classify;
use crate::error::Result;
use crate::node::{GraphRuntime, NextNode, RxNodeError, RxTrace};
use crate::provision::DeviceProvisioner;
use crate::stats::RxCounts;

impl<P: DeviceProvisioner> Bridge<P> {
    /// Drain the from-stack ring, handing every packet to `runtime`.
    ///
    /// Never blocks and never fails; descriptors that cannot be delivered are dropped and counted
    /// in [`crate::BridgeStats`].
    pub fn rx_activate<R>(&mut self, runtime: &mut R) -> RxCounts
    where
        R: GraphRuntime + ?Sized,
    {
        let mut counts = RxCounts::default();
        if !self.is_enabled() {
            return counts;
        }

        self.rx_cache.replenish(&mut self.pool);
        let data_size = self.pool.data_size();
        let max_len = self.config.mtu_buffers() * data_size;

        while let Ok(desc) = self.transport.from_stack.try_pop() {
            counts.dequeued += 1;
            let pkt_len = desc.pkt_len() as usize;
            debug_assert!(desc.is_consistent());

            if pkt_len == 0 {
                self.stats.rx_dropped_empty += 1;
                self.rx_drop(&mut counts);
                trace!("rx drop: empty descriptor");
                continue;
            }
            if pkt_len > max_len {
                self.stats.rx_dropped_oversize += 1;
                self.rx_drop(&mut counts);
                trace!(pkt_len, max_len, "rx drop: oversize descriptor");
                continue;
            }

            let handles = match self.take_rx_buffers(pkt_len.div_ceil(data_size)) {
                Ok(handles) => handles,
                Err(err) => {
                    self.stats.rx_no_buffer += 1;
                    self.rx_drop(&mut counts);
                    trace!(pkt_len, error = %err, "rx drop: no buffers");
                    continue;
                }
            };

            let chain = self.fill_chain(&desc, handles);
            self.deliver(runtime, chain, pkt_len, &mut counts);
        }

        counts
    }

    fn rx_drop(&mut self, counts: &mut RxCounts) {
        counts.dropped += 1;
        self.registry.record_drop(self.sw_if_index);
    }

    /// Take `n` segments from the RX cache, refilling it first if it runs short.
    fn take_rx_buffers(&mut self, n: usize) -> Result<Vec<BufferIndex>> {
        if !self.rx_cache.has_reserve(n) {
            self.rx_cache.replenish(&mut self.pool);
        }
        Ok(self.rx_cache.take_n(n)?)
    }

    /// Copy the descriptor's payload into `handles`, filling each segment up to `data_size`.
    ///
    /// The caller sized `handles` from the descriptor's (verified) packet length, so every byte
    /// has a slot.
    fn fill_chain(&mut self, desc: &TransportDescriptor, handles: Vec<BufferIndex>) -> Chain {
        let data_size = self.pool.data_size();
        self.pool
            .get_mut(handles[0])
            .set_current_data(usize::from(desc.data_off()));

        let mut slot = 0;
        let mut room = data_size;
        for seg in desc.segments() {
            let mut bytes = seg.payload();
            while !bytes.is_empty() {
                if room == 0 {
                    slot += 1;
                    room = data_size;
                }
                let n = bytes.len().min(room);
                let written = self.pool.get_mut(handles[slot]).append(&bytes[..n]);
                debug_assert_eq!(written, n);
                room -= n;
                bytes = &bytes[n..];
            }
        }

        Chain::link(&mut self.pool, handles)
    }

    fn deliver<R>(&mut self, runtime: &mut R, chain: Chain, pkt_len: usize, counts: &mut RxCounts)
    where
        R: GraphRuntime + ?Sized,
    {
        let head = chain.head();
        let next = classify(self.config.mode.encap, self.pool.get(head).payload());

        let seg = self.pool.get_mut(head);
        let meta = seg.meta_mut();
        meta.rx_sw_if_index = self.sw_if_index.0;
        meta.tx_sw_if_index = INVALID_SW_IF_INDEX;
        if next == NextNode::Drop {
            meta.error = RxNodeError::UnknownPacketType as u16;
            self.stats.rx_unknown_packet_type += 1;
            trace!(pkt_len, "rx: {}", RxNodeError::UnknownPacketType.as_str());
        }

        if runtime.trace_budget() > 0 {
            seg.set_flags(BufferFlags::IS_TRACED);
            runtime.add_trace(RxTrace {
                head,
                next,
                sw_if_index: self.sw_if_index.0,
                pkt_len,
                n_segments: chain.len(),
            });
        }

        self.stats.rx_packets += 1;
        self.stats.rx_bytes += pkt_len as u64;
        self.registry.record_rx(self.sw_if_index, pkt_len);
        counts.delivered += 1;
        counts.bytes += pkt_len;

        runtime.enqueue(next, head);
    }
}

#[cfg(test)]
mod tests {
    use punt_buffer::BufferConfig;
    use punt_ipc::{StackEndpoint, TransportDescriptor};

    use super::*;
    use crate::config::BridgeConfig;
    use crate::mode::{Encap, InterfaceMode, Role};
    use crate::node::CollectingRuntime;
    use crate::provision::InMemoryProvisioner;

    fn bridge(config: BridgeConfig) -> (Bridge<InMemoryProvisioner>, StackEndpoint) {
        let (mut bridge, stack) = Bridge::new(
            BridgeConfig {
                enabled: true,
                ..config
            },
            InMemoryProvisioner::default(),
        );
        bridge.enable().unwrap();
        (bridge, stack)
    }

    fn ip4(len: usize) -> Vec<u8> {
        let mut pkt = vec![0u8; len];
        pkt[0] = 0x45;
        pkt
    }

    #[test]
    fn inactive_bridge_leaves_the_ring_alone() {
        let (mut bridge, mut stack) =
            Bridge::new(BridgeConfig::default(), InMemoryProvisioner::default());
        stack.send(TransportDescriptor::from_payload(&ip4(64))).unwrap();

        let mut rt = CollectingRuntime::default();
        assert_eq!(bridge.rx_activate(&mut rt), RxCounts::default());
        assert_eq!(stack.from_stack.len(), 1);
    }

    #[test]
    fn head_keeps_the_descriptor_offset_up_to_the_headroom() {
        let (mut bridge, mut stack) = bridge(BridgeConfig::default());
        stack
            .send(TransportDescriptor::with_headroom(32, &ip4(20)))
            .unwrap();
        stack
            .send(TransportDescriptor::with_headroom(1000, &ip4(20)))
            .unwrap();

        let mut rt = CollectingRuntime::default();
        bridge.rx_activate(&mut rt);
        let heads = rt.heads_for(NextNode::Ip4Input);
        assert_eq!(bridge.pool().get(heads[0]).current_data(), 32);
        assert_eq!(bridge.pool().get(heads[1]).current_data(), 128);
        assert_eq!(bridge.pool().get(heads[1]).payload(), &ip4(20)[..]);
    }

    #[test]
    fn metadata_is_stamped_on_the_head() {
        let (mut bridge, mut stack) = bridge(BridgeConfig::default());
        stack.send(TransportDescriptor::from_payload(&[0x17, 1, 2])).unwrap();

        let mut rt = CollectingRuntime::default();
        bridge.rx_activate(&mut rt);

        let (next, head) = rt.enqueued[0];
        assert_eq!(next, NextNode::Drop);
        let meta = bridge.pool().get(head).meta();
        assert_eq!(meta.rx_sw_if_index, bridge.sw_if_index().0);
        assert_eq!(meta.tx_sw_if_index, INVALID_SW_IF_INDEX);
        assert_eq!(meta.error, RxNodeError::UnknownPacketType as u16);
        assert_eq!(bridge.stats().rx_unknown_packet_type, 1);
    }

    #[test]
    fn tracing_stops_when_the_budget_runs_out() {
        let (mut bridge, mut stack) = bridge(BridgeConfig::default());
        for _ in 0..3 {
            stack.send(TransportDescriptor::from_payload(&ip4(40))).unwrap();
        }

        let mut rt = CollectingRuntime::with_trace_limit(2);
        bridge.rx_activate(&mut rt);

        assert_eq!(rt.traces.len(), 2);
        let traced: Vec<bool> = rt
            .enqueued
            .iter()
            .map(|&(_, head)| {
                bridge
                    .pool()
                    .get(head)
                    .flags()
                    .contains(BufferFlags::IS_TRACED)
            })
            .collect();
        assert_eq!(traced, vec![true, true, false]);
        assert_eq!(rt.traces[0].n_segments, 1);
        assert_eq!(rt.traces[0].pkt_len, 40);
    }

    #[test]
    fn empty_and_oversize_descriptors_are_dropped() {
        let (mut bridge, mut stack) = bridge(BridgeConfig {
            mtu_bytes: 1500,
            ..BridgeConfig::default()
        });
        stack.send(TransportDescriptor::from_payload(&[])).unwrap();
        stack.send(TransportDescriptor::from_payload(&ip4(2049))).unwrap();
        stack.send(TransportDescriptor::from_payload(&ip4(2048))).unwrap();

        let mut rt = CollectingRuntime::default();
        let counts = bridge.rx_activate(&mut rt);

        assert_eq!(counts.dequeued, 3);
        assert_eq!(counts.delivered, 1);
        assert_eq!(counts.dropped, 2);
        assert_eq!(bridge.stats().rx_dropped_empty, 1);
        assert_eq!(bridge.stats().rx_dropped_oversize, 1);
        assert_eq!(bridge.interface().unwrap().counters.drops, 2);
    }

    #[test]
    fn ethernet_always_goes_to_ethernet_input() {
        let (mut bridge, mut stack) = bridge(BridgeConfig {
            mode: InterfaceMode::new(Encap::Ethernet, Role::PuntInject),
            ..BridgeConfig::default()
        });
        for first in [0x45u8, 0x60, 0x00, 0xff] {
            stack.send(TransportDescriptor::from_payload(&[first; 60])).unwrap();
        }

        let mut rt = CollectingRuntime::default();
        bridge.rx_activate(&mut rt);
        assert_eq!(rt.heads_for(NextNode::EthernetInput).len(), 4);
    }

    #[test]
    fn exhausted_pool_drops_and_keeps_going() {
        let (mut bridge, mut stack) = bridge(BridgeConfig {
            buffers: BufferConfig {
                n_buffers: 2,
                ..BufferConfig::default()
            },
            ..BridgeConfig::default()
        });
        for _ in 0..4 {
            stack.send(TransportDescriptor::from_payload(&ip4(100))).unwrap();
        }

        let mut rt = CollectingRuntime::default();
        let counts = bridge.rx_activate(&mut rt);

        assert_eq!(counts.delivered, 2);
        assert_eq!(bridge.stats().rx_no_buffer, 2);
        assert!(stack.from_stack.is_empty());
        assert_eq!(bridge.pool().free_count(), 0);
    }
}
