//! Startup configuration.
//!
//! The configuration is a flat list of whitespace-separated keywords:
//!
//! ```text
//! enable mtu 1500 ethernet have-normal-interface name vpp0
//! ```
//!
//! | Keyword | Effect |
//! |---|---|
//! | `enable` / `disable` | turn the bridge on or off (default off) |
//! | `mtu <bytes>` | device MTU (default 4352) |
//! | `ethernet` / `ether` | Ethernet-framed device instead of raw IP |
//! | `have-normal-interface` / `have-normal` | register as a routed interface instead of a punt target |
//! | `name <ifname>` | OS device name (default `vnet`) |

use punt_buffer::BufferConfig;
use punt_ipc::DEFAULT_RING_CAPACITY;

use crate::error::ConfigError;
use crate::mode::{Encap, InterfaceMode, Role};

pub const DEFAULT_MTU_BYTES: u32 = 4096 + 256;
pub const DEFAULT_DEVICE_NAME: &str = "vnet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub mtu_bytes: u32,
    pub mode: InterfaceMode,
    pub name: String,
    pub ring_capacity: usize,
    pub buffers: BufferConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mtu_bytes: DEFAULT_MTU_BYTES,
            mode: InterfaceMode::default(),
            name: DEFAULT_DEVICE_NAME.to_string(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            buffers: BufferConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let mut tokens = input.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "enable" => cfg.enabled = true,
                "disable" => cfg.enabled = false,
                "ethernet" | "ether" => cfg.mode.encap = Encap::Ethernet,
                "have-normal-interface" | "have-normal" => cfg.mode.role = Role::Normal,
                "mtu" => {
                    let value = tokens
                        .next()
                        .ok_or(ConfigError::MissingValue { keyword: "mtu" })?;
                    cfg.mtu_bytes = value
                        .parse::<u32>()
                        .ok()
                        .filter(|&mtu| mtu > 0)
                        .ok_or_else(|| ConfigError::InvalidMtu(value.to_string()))?;
                }
                "name" => {
                    let value = tokens
                        .next()
                        .ok_or(ConfigError::MissingValue { keyword: "name" })?;
                    cfg.name = value.to_string();
                }
                other => return Err(ConfigError::UnknownInput(other.to_string())),
            }
        }
        Ok(cfg)
    }

    /// MTU expressed in buffer segments, rounded up.
    pub fn mtu_buffers(&self) -> usize {
        (self.mtu_bytes as usize).div_ceil(self.buffers.data_size)
    }
}
