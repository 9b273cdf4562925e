//! Punt/inject bridge between a packet-processing graph and an external user-space stack.
//!
//! The bridge owns one device and one interface record. Packets cross in both directions over a
//! pair of SPSC rings (see `punt-ipc`):
//!
//! - [`Bridge::rx_activate`] drains the from-stack ring, rebuilds each packet as a buffer chain,
//!   classifies it and hands the head to the [`GraphRuntime`].
//! - [`Bridge::tx_frame`] copies chains into descriptors on the to-stack ring and frees them.
//!
//! Neither path returns errors to the graph; every failure is a counted drop in
//! [`BridgeStats`]. Control-plane calls ([`Bridge::enable`], [`Bridge::add_address`]) return
//! [`BridgeError`].
#![forbid(unsafe_code)]

mod bridge;
pub mod classify;
pub mod config;
mod error;
pub mod interface;
pub mod mode;
pub mod node;
pub mod provision;
mod rx;
mod stats;
mod tx;

pub use bridge::Bridge;
pub use classify::{classify, try_classify};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, Result};
pub use interface::{
    AddressAction, AddressChange, AddressOutcome, InterfaceRecord, InterfaceRegistry, MacAddr,
    SwIfIndex,
};
pub use mode::{Encap, InterfaceMode, PuntCallback, Role};
pub use node::{CollectingRuntime, GraphRuntime, NextNode, RxNodeError, RxTrace};
pub use provision::{DeviceProvisioner, InMemoryProvisioner, ProvisionStep};
pub use stats::{BridgeStats, RxCounts, TxCounts};
pub use tx::TxOutcome;
