//! Punt/inject bridge for a vector packet-processing dataplane.
//!
//! This crate re-exports the workspace members under one roof:
//!
//! - [`buffer`]: the segment arena, buffer chains and the RX buffer cache.
//! - [`ipc`]: the SPSC rings and the descriptors carried over them.
//! - [`bridge`]: the RX and TX paths, the interface registry and device provisioning.
//!
//! [`echo`] is a minimal external stack that reflects every packet back to the dataplane; the
//! `punt-echo` binary and the end-to-end tests drive a bridge against it.
#![forbid(unsafe_code)]

pub use punt_bridge as bridge;
pub use punt_buffer as buffer;
pub use punt_ipc as ipc;

pub use punt_bridge::{Bridge, BridgeConfig, BridgeError, BridgeStats, GraphRuntime, NextNode};

pub mod echo {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use punt_ipc::{PushError, StackEndpoint};

    /// Reflect descriptors from the to-stack ring onto the from-stack ring until `stop` is set.
    ///
    /// A descriptor that does not fit on a full from-stack ring is held and retried; the echo
    /// never drops. Returns the number of descriptors reflected.
    pub fn run(mut stack: StackEndpoint, stop: Arc<AtomicBool>) -> usize {
        let mut echoed = 0;
        let mut pending = None;
        while !stop.load(Ordering::Acquire) {
            let Some(desc) = pending.take().or_else(|| stack.recv()) else {
                std::thread::yield_now();
                continue;
            };
            match stack.send(desc) {
                Ok(()) => echoed += 1,
                Err(PushError::Full(desc)) => {
                    pending = Some(desc);
                    std::thread::yield_now();
                }
            }
        }
        echoed
    }
}
