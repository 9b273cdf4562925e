//! Boundary with the forwarding-graph runtime.
//!
//! The bridge does not schedule nodes. RX hands each reconstructed chain head to a
//! [`GraphRuntime`] together with the successor it selected, and TX is handed frames of chain
//! heads by whoever owns the runtime.

use core::fmt;

use punt_buffer::BufferIndex;

/// Successor nodes of the RX input node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextNode {
    Ip4Input,
    Ip6Input,
    EthernetInput,
    Drop,
}

impl NextNode {
    pub const ALL: [NextNode; 4] = [
        NextNode::Ip4Input,
        NextNode::Ip6Input,
        NextNode::EthernetInput,
        NextNode::Drop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NextNode::Ip4Input => "ip4-input",
            NextNode::Ip6Input => "ip6-input",
            NextNode::EthernetInput => "ethernet-input",
            NextNode::Drop => "drop",
        }
    }
}

impl fmt::Display for NextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error codes the RX node stamps on dropped packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RxNodeError {
    UnknownPacketType = 1,
}

impl RxNodeError {
    pub fn as_str(self) -> &'static str {
        match self {
            RxNodeError::UnknownPacketType => "unknown packet type",
        }
    }
}

/// Trace record captured for a packet when tracing is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxTrace {
    pub head: BufferIndex,
    pub next: NextNode,
    pub sw_if_index: u32,
    pub pkt_len: usize,
    pub n_segments: usize,
}

/// What the bridge needs from the graph runtime.
pub trait GraphRuntime {
    /// Queue the chain starting at `head` for the successor `next`.
    fn enqueue(&mut self, next: NextNode, head: BufferIndex);

    /// Number of packets that may still be traced in this activation.
    fn trace_budget(&self) -> usize {
        0
    }

    /// Record a trace entry. Called at most [`GraphRuntime::trace_budget`] times per activation.
    fn add_trace(&mut self, _trace: RxTrace) {}
}

impl<T: GraphRuntime + ?Sized> GraphRuntime for &mut T {
    fn enqueue(&mut self, next: NextNode, head: BufferIndex) {
        <T as GraphRuntime>::enqueue(&mut **self, next, head);
    }

    fn trace_budget(&self) -> usize {
        <T as GraphRuntime>::trace_budget(&**self)
    }

    fn add_trace(&mut self, trace: RxTrace) {
        <T as GraphRuntime>::add_trace(&mut **self, trace);
    }
}

/// A runtime that simply collects what it is given.
///
/// Useful for host glue that dispatches the collected vectors itself, and for tests.
#[derive(Debug, Default)]
pub struct CollectingRuntime {
    pub enqueued: Vec<(NextNode, BufferIndex)>,
    pub traces: Vec<RxTrace>,
    pub trace_limit: usize,
}

impl CollectingRuntime {
    pub fn with_trace_limit(trace_limit: usize) -> Self {
        Self {
            trace_limit,
            ..Self::default()
        }
    }

    /// Heads queued for `next`, in delivery order.
    pub fn heads_for(&self, next: NextNode) -> Vec<BufferIndex> {
        self.enqueued
            .iter()
            .filter(|(n, _)| *n == next)
            .map(|&(_, head)| head)
            .collect()
    }

    pub fn take(&mut self) -> Vec<(NextNode, BufferIndex)> {
        std::mem::take(&mut self.enqueued)
    }
}

impl GraphRuntime for CollectingRuntime {
    fn enqueue(&mut self, next: NextNode, head: BufferIndex) {
        self.enqueued.push((next, head));
    }

    fn trace_budget(&self) -> usize {
        self.trace_limit.saturating_sub(self.traces.len())
    }

    fn add_trace(&mut self, trace: RxTrace) {
        self.traces.push(trace);
    }
}
