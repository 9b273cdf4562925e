//! Packet buffer arena and chain model shared by the punt RX and TX paths.
//!
//! A packet inside the forwarding graph is one or more fixed-size [`Segment`]s owned by a
//! [`BufferPool`] and addressed by [`BufferIndex`]. Multi-segment packets are described by a
//! [`Chain`], an ordered sequence of handles; the per-segment `NEXT_PRESENT`/`next` fields are kept
//! in sync so the graph runtime can still follow a chain from its head handle alone.
//!
//! This crate never copies payload between representations. Moving bytes into or out of segments
//! is the job of the RX/TX paths in `punt-bridge`.
#![forbid(unsafe_code)]

pub mod cache;
pub mod chain;
pub mod pool;

pub use cache::{RxBufferCache, FRAME_SIZE};
pub use chain::Chain;
pub use pool::{
    BufferConfig, BufferFlags, BufferIndex, BufferPool, PacketMeta, Segment, DEFAULT_DATA_SIZE,
    DEFAULT_PRE_DATA_SIZE, INVALID_SW_IF_INDEX,
};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The pool (or the RX cache in front of it) cannot supply the requested number of segments.
    #[error("buffer pool exhausted ({requested} segments requested, {available} available)")]
    ResourceExhausted { requested: usize, available: usize },

    #[error("a buffer chain needs at least one segment")]
    EmptyChain,
}
