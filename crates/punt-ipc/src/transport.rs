//! The to-stack / from-stack ring pair.
//!
//! ```text
//!   dataplane                                   external stack
//!   DataplaneEndpoint.to_stack   ──ring──▶  StackEndpoint.to_stack
//!   DataplaneEndpoint.from_stack ◀──ring──  StackEndpoint.from_stack
//! ```
//!
//! Each ring has exactly one producer and one consumer. The external stack may run on another
//! thread; the endpoints are `Send`.

use crate::descriptor::TransportDescriptor;
use crate::ring::{channel, Consumer, PopError, Producer, PushError};

/// Ring size used when the configuration does not override it.
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// Dataplane side: produces onto the to-stack ring and consumes from the from-stack ring.
#[derive(Debug)]
pub struct DataplaneEndpoint {
    pub to_stack: Producer<TransportDescriptor>,
    pub from_stack: Consumer<TransportDescriptor>,
}

/// External stack side: the opposite ends of both rings.
#[derive(Debug)]
pub struct StackEndpoint {
    pub to_stack: Consumer<TransportDescriptor>,
    pub from_stack: Producer<TransportDescriptor>,
}

impl StackEndpoint {
    /// Dequeue the next descriptor the dataplane handed over, if any.
    pub fn recv(&mut self) -> Option<TransportDescriptor> {
        match self.to_stack.try_pop() {
            Ok(desc) => Some(desc),
            Err(PopError::Empty) => None,
        }
    }

    /// Hand a descriptor to the dataplane.
    pub fn send(&mut self, desc: TransportDescriptor) -> Result<(), PushError<TransportDescriptor>> {
        self.from_stack.try_push(desc)
    }
}

/// Build both rings, each holding up to `capacity` descriptors.
pub fn pair(capacity: usize) -> (DataplaneEndpoint, StackEndpoint) {
    let (to_stack_tx, to_stack_rx) = channel(capacity);
    let (from_stack_tx, from_stack_rx) = channel(capacity);
    (
        DataplaneEndpoint {
            to_stack: to_stack_tx,
            from_stack: from_stack_rx,
        },
        StackEndpoint {
            to_stack: to_stack_rx,
            from_stack: from_stack_tx,
        },
    )
}
