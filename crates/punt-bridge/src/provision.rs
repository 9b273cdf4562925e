//! Contract with the OS-level device provisioner.
//!
//! The bridge never talks to the kernel itself. It drives a [`DeviceProvisioner`] through a fixed
//! sequence of steps and owns the rollback: if any step fails, every handle opened so far is
//! closed before the error is returned.

use core::fmt;
use std::io;

use tracing::warn;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::interface::{InterfaceAddress, MacAddr};
use crate::mode::Encap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionStep {
    OpenDevice,
    SetInterface,
    SetPersistent,
    OpenControlSocket,
    BindControlSocket,
    SetNonBlocking,
    SetMtu,
    LinkUp,
    ReadHardwareAddress,
    RegisterReadReady,
}

impl ProvisionStep {
    pub const ALL: [ProvisionStep; 10] = [
        ProvisionStep::OpenDevice,
        ProvisionStep::SetInterface,
        ProvisionStep::SetPersistent,
        ProvisionStep::OpenControlSocket,
        ProvisionStep::BindControlSocket,
        ProvisionStep::SetNonBlocking,
        ProvisionStep::SetMtu,
        ProvisionStep::LinkUp,
        ProvisionStep::ReadHardwareAddress,
        ProvisionStep::RegisterReadReady,
    ];
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionStep::OpenDevice => "open device",
            ProvisionStep::SetInterface => "set interface mode",
            ProvisionStep::SetPersistent => "set persistent",
            ProvisionStep::OpenControlSocket => "open control socket",
            ProvisionStep::BindControlSocket => "bind control socket",
            ProvisionStep::SetNonBlocking => "set non-blocking",
            ProvisionStep::SetMtu => "set mtu",
            ProvisionStep::LinkUp => "link up",
            ProvisionStep::ReadHardwareAddress => "read hardware address",
            ProvisionStep::RegisterReadReady => "register read-ready",
        })
    }
}

/// Opaque OS handle (a file descriptor on Unix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub i32);

/// A provisioned device: the data handle, the control handle and the learned peer MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub dev: RawHandle,
    pub ctl: RawHandle,
    /// Zero for raw (non-Ethernet) devices.
    pub dst_mac: MacAddr,
}

/// Address to put on (or take off) an OS alias device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasAddress {
    pub alias: String,
    pub address: InterfaceAddress,
}

pub trait DeviceProvisioner {
    /// Whether the process may create devices at all. Unprivileged bridges skip provisioning.
    fn is_privileged(&self) -> bool;

    fn open_device(&mut self) -> io::Result<RawHandle>;
    fn set_interface(&mut self, dev: RawHandle, name: &str, encap: Encap) -> io::Result<()>;
    fn set_persistent(&mut self, dev: RawHandle, persistent: bool) -> io::Result<()>;
    fn open_control(&mut self) -> io::Result<RawHandle>;
    fn bind_control(&mut self, ctl: RawHandle, name: &str) -> io::Result<()>;
    fn set_nonblocking(&mut self, dev: RawHandle) -> io::Result<()>;
    fn set_mtu(&mut self, ctl: RawHandle, name: &str, mtu_bytes: u32) -> io::Result<()>;
    fn set_link(&mut self, ctl: RawHandle, name: &str, up: bool) -> io::Result<()>;
    fn hardware_address(&mut self, ctl: RawHandle, name: &str) -> io::Result<MacAddr>;
    fn register_read_ready(&mut self, dev: RawHandle) -> io::Result<()>;
    fn close(&mut self, handle: RawHandle);

    fn set_alias_address(&mut self, alias: &AliasAddress) -> io::Result<()>;
    fn clear_alias_address(&mut self, alias: &AliasAddress) -> io::Result<()>;
}

fn at(step: ProvisionStep) -> impl FnOnce(io::Error) -> BridgeError {
    move |source| BridgeError::InterfaceConfigFailure { step, source }
}

/// Bring up the device described by `config`.
///
/// On failure nothing stays open.
pub fn provision<P>(provisioner: &mut P, config: &BridgeConfig) -> Result<Device>
where
    P: DeviceProvisioner + ?Sized,
{
    let dev = provisioner
        .open_device()
        .map_err(at(ProvisionStep::OpenDevice))?;
    let mut ctl = None;
    match bring_up(provisioner, config, dev, &mut ctl) {
        Ok(device) => Ok(device),
        Err(err) => {
            if let Some(ctl) = ctl {
                provisioner.close(ctl);
            }
            provisioner.close(dev);
            Err(err)
        }
    }
}

fn bring_up<P>(
    provisioner: &mut P,
    config: &BridgeConfig,
    dev: RawHandle,
    ctl_slot: &mut Option<RawHandle>,
) -> Result<Device>
where
    P: DeviceProvisioner + ?Sized,
{
    let name = config.name.as_str();
    provisioner
        .set_interface(dev, name, config.mode.encap)
        .map_err(at(ProvisionStep::SetInterface))?;
    provisioner
        .set_persistent(dev, true)
        .map_err(at(ProvisionStep::SetPersistent))?;

    let ctl = provisioner
        .open_control()
        .map_err(at(ProvisionStep::OpenControlSocket))?;
    *ctl_slot = Some(ctl);
    provisioner
        .bind_control(ctl, name)
        .map_err(at(ProvisionStep::BindControlSocket))?;

    provisioner
        .set_nonblocking(dev)
        .map_err(at(ProvisionStep::SetNonBlocking))?;
    provisioner
        .set_mtu(ctl, name, config.mtu_bytes)
        .map_err(at(ProvisionStep::SetMtu))?;
    provisioner
        .set_link(ctl, name, true)
        .map_err(at(ProvisionStep::LinkUp))?;

    let dst_mac = match config.mode.encap {
        Encap::Ethernet => provisioner
            .hardware_address(ctl, name)
            .map_err(at(ProvisionStep::ReadHardwareAddress))?,
        Encap::Raw => MacAddr::ZERO,
    };

    provisioner
        .register_read_ready(dev)
        .map_err(at(ProvisionStep::RegisterReadReady))?;

    Ok(Device { dev, ctl, dst_mac })
}

/// Take the link down, drop persistence and close both handles.
///
/// Teardown is best effort: failures are logged and the remaining steps still run.
pub fn teardown<P>(provisioner: &mut P, device: Device, name: &str)
where
    P: DeviceProvisioner + ?Sized,
{
    if let Err(err) = provisioner.set_link(device.ctl, name, false) {
        warn!(device = name, error = %err, "failed to take link down");
    }
    if let Err(err) = provisioner.set_persistent(device.dev, false) {
        warn!(device = name, error = %err, "failed to clear persistence");
    }
    provisioner.close(device.ctl);
    provisioner.close(device.dev);
}

/// Provisioner that keeps all device state in memory.
///
/// Used by the loopback binary and by tests; `fail_at` makes one step fail to exercise rollback.
#[derive(Debug, Clone)]
pub struct InMemoryProvisioner {
    pub privileged: bool,
    pub hw_addr: MacAddr,
    pub fail_at: Option<ProvisionStep>,
    pub open_handles: Vec<RawHandle>,
    pub persistent: bool,
    pub link_up: bool,
    pub mtu_bytes: Option<u32>,
    pub aliases: Vec<AliasAddress>,
    pub(crate) next_handle: i32,
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self {
            privileged: true,
            hw_addr: MacAddr([0x02, 0xfe, 0x00, 0x00, 0x00, 0x01]),
            fail_at: None,
            open_handles: Vec::new(),
            persistent: false,
            link_up: false,
            mtu_bytes: None,
            aliases: Vec::new(),
            next_handle: 3,
        }
    }
}

impl InMemoryProvisioner {
    pub fn failing_at(step: ProvisionStep) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::default()
        }
    }

    fn check(&self, step: ProvisionStep) -> io::Result<()> {
        if self.fail_at == Some(step) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected failure at {step}"),
            ));
        }
        Ok(())
    }

    fn open(&mut self, step: ProvisionStep) -> io::Result<RawHandle> {
        self.check(step)?;
        let handle = RawHandle(self.next_handle);
        self.next_handle += 1;
        self.open_handles.push(handle);
        Ok(handle)
    }
}

impl DeviceProvisioner for InMemoryProvisioner {
    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn open_device(&mut self) -> io::Result<RawHandle> {
        self.open(ProvisionStep::OpenDevice)
    }

    fn set_interface(&mut self, _dev: RawHandle, _name: &str, _encap: Encap) -> io::Result<()> {
        self.check(ProvisionStep::SetInterface)
    }

    fn set_persistent(&mut self, _dev: RawHandle, persistent: bool) -> io::Result<()> {
        if persistent {
            self.check(ProvisionStep::SetPersistent)?;
        }
        self.persistent = persistent;
        Ok(())
    }

    fn open_control(&mut self) -> io::Result<RawHandle> {
        self.open(ProvisionStep::OpenControlSocket)
    }

    fn bind_control(&mut self, _ctl: RawHandle, _name: &str) -> io::Result<()> {
        self.check(ProvisionStep::BindControlSocket)
    }

    fn set_nonblocking(&mut self, _dev: RawHandle) -> io::Result<()> {
        self.check(ProvisionStep::SetNonBlocking)
    }

    fn set_mtu(&mut self, _ctl: RawHandle, _name: &str, mtu_bytes: u32) -> io::Result<()> {
        self.check(ProvisionStep::SetMtu)?;
        self.mtu_bytes = Some(mtu_bytes);
        Ok(())
    }

    fn set_link(&mut self, _ctl: RawHandle, _name: &str, up: bool) -> io::Result<()> {
        if up {
            self.check(ProvisionStep::LinkUp)?;
        }
        self.link_up = up;
        Ok(())
    }

    fn hardware_address(&mut self, _ctl: RawHandle, _name: &str) -> io::Result<MacAddr> {
        self.check(ProvisionStep::ReadHardwareAddress)?;
        Ok(self.hw_addr)
    }

    fn register_read_ready(&mut self, _dev: RawHandle) -> io::Result<()> {
        self.check(ProvisionStep::RegisterReadReady)
    }

    fn close(&mut self, handle: RawHandle) {
        self.open_handles.retain(|&h| h != handle);
    }

    fn set_alias_address(&mut self, alias: &AliasAddress) -> io::Result<()> {
        if !self.aliases.contains(alias) {
            self.aliases.push(alias.clone());
        }
        Ok(())
    }

    fn clear_alias_address(&mut self, alias: &AliasAddress) -> io::Result<()> {
        self.aliases.retain(|a| a.alias != alias.alias);
        Ok(())
    }
}
