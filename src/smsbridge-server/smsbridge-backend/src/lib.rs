// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;

use smsbridge_app::normalize_name;
use smsbridge_core::{Device, DeviceManager, GatewayError, GatewayResult};

mod defaults;
pub mod dummy;

pub use defaults::{
    AtSerialDefaults, FamilyDefaults, HttpRouterDefaults, RemoteShellDefaults, VoipRestDefaults,
};
pub use dummy::{DummyControl, DummyManager};

#[cfg(feature = "at")]
pub use smsbridge_backend_at as at;
#[cfg(feature = "router")]
pub use smsbridge_backend_router as router;
#[cfg(feature = "shell")]
pub use smsbridge_backend_shell as shell;
#[cfg(feature = "voip")]
pub use smsbridge_backend_voip as voip;

pub type BackendFactory = fn(Device, &FamilyDefaults) -> GatewayResult<Box<dyn DeviceManager>>;

/// Context for registering and instantiating device managers.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under a family name (e.g. "at-serial").
    pub fn register_family(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    pub fn is_family_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// Registered family keys, sorted.
    pub fn registered_families(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the manager for a device from its family tag.
    pub fn build_manager(
        &self,
        device: Device,
        defaults: &FamilyDefaults,
    ) -> GatewayResult<Box<dyn DeviceManager>> {
        let family = device.family.to_string();
        let factory = self
            .factories
            .get(&normalize_name(&family))
            .ok_or(GatewayError::UnsupportedFamily(family))?;
        factory(device, defaults)
    }

    pub fn extend_from(&mut self, other: &RegistrationContext) {
        for (name, factory) in &other.factories {
            self.factories.insert(name.clone(), *factory);
        }
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in families enabled by features on a context.
pub fn register_builtin_families_on(context: &mut RegistrationContext) {
    context.register_family("dummy", dummy_factory);
    #[cfg(feature = "at")]
    context.register_family("at-serial", at_serial_factory);
    #[cfg(feature = "router")]
    context.register_family("http-router", http_router_factory);
    #[cfg(feature = "shell")]
    context.register_family("remote-shell", remote_shell_factory);
    #[cfg(feature = "voip")]
    context.register_family("voip-rest", voip_rest_factory);
}

fn dummy_factory(device: Device, _defaults: &FamilyDefaults) -> GatewayResult<Box<dyn DeviceManager>> {
    Ok(Box::new(DummyManager::new(device)))
}

#[cfg(feature = "at")]
fn at_serial_factory(
    device: Device,
    defaults: &FamilyDefaults,
) -> GatewayResult<Box<dyn DeviceManager>> {
    let d = &defaults.at_serial;
    let baud = device
        .config_value("baud")
        .and_then(|b| b.parse().ok())
        .unwrap_or(d.baud);
    let settings = at::SerialSettings {
        path: device.transport_address.clone(),
        baud,
        timeout: d.timeout(),
        settle: d.settle(),
    };
    Ok(Box::new(at::serial_modem(device, settings)))
}

#[cfg(feature = "router")]
fn http_router_factory(
    device: Device,
    defaults: &FamilyDefaults,
) -> GatewayResult<Box<dyn DeviceManager>> {
    let d = &defaults.http_router;
    let settings = router::RouterSettings {
        base_url: d.endpoint_for(&device.transport_address),
        timeout: d.timeout(),
    };
    Ok(Box::new(router::RouterManager::new(device, settings)?))
}

#[cfg(feature = "shell")]
fn remote_shell_factory(
    device: Device,
    defaults: &FamilyDefaults,
) -> GatewayResult<Box<dyn DeviceManager>> {
    let d = &defaults.remote_shell;
    let (host, port) = d.split_address(&device.transport_address);
    let settings = shell::AdbSettings {
        adb_path: d.adb_path.clone(),
        host,
        port,
        timeout: d.timeout(),
    };
    Ok(Box::new(shell::adb_manager(device, settings)))
}

#[cfg(feature = "voip")]
fn voip_rest_factory(
    device: Device,
    defaults: &FamilyDefaults,
) -> GatewayResult<Box<dyn DeviceManager>> {
    let d = &defaults.voip_rest;
    let base_url = if device.transport_address.starts_with("http") {
        device.transport_address.clone()
    } else {
        d.base_url.clone()
    };
    let settings = voip::VoipSettings {
        base_url,
        timeout: d.timeout(),
    };
    Ok(Box::new(voip::VoipManager::new(device, settings)?))
}
