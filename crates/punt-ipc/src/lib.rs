//! Ring-mediated transport between the dataplane and an external user-space network stack.
//!
//! - [`ring`]: bounded lock-free SPSC queue, split into a producer and a consumer end.
//! - [`descriptor`]: the record exchanged over the rings.
//! - [`transport`]: the pair of rings (to-stack and from-stack) and the two endpoints built on it.

pub mod descriptor;
pub mod ring;
pub mod transport;

pub use descriptor::TransportDescriptor;
pub use ring::{channel, Consumer, PopError, Producer, PushError};
pub use transport::{DataplaneEndpoint, StackEndpoint, DEFAULT_RING_CAPACITY};
