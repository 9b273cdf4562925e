use std::io;
use std::net::IpAddr;

use punt_buffer::BufferError;
use thiserror::Error;

use crate::provision::ProvisionStep;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    ResourceExhausted(#[from] BufferError),

    #[error("to-stack ring is full")]
    RingFull,

    #[error("unknown packet type (first byte {first_byte:#04x})")]
    UnknownPacketType { first_byte: u8 },

    #[error("interface configuration failed at {step}: {source}")]
    InterfaceConfigFailure {
        step: ProvisionStep,
        #[source]
        source: io::Error,
    },

    #[error("no subinterface address {addr} on sw_if_index {sw_if_index}")]
    AddressKeyNotFound { sw_if_index: u32, addr: IpAddr },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown input `{0}`")]
    UnknownInput(String),

    #[error("`{keyword}` expects a value")]
    MissingValue { keyword: &'static str },

    #[error("invalid mtu `{0}`")]
    InvalidMtu(String),
}
