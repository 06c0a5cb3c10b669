// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Android phones reached over an ADB remote shell.

pub mod link;
pub mod manager;
pub mod parse;

pub use link::{AdbLink, AdbSettings, ShellLink};
pub use manager::ShellPhone;

use smsbridge_core::Device;

/// Phone manager for `device`; a `serial` config entry selects a USB-attached phone.
pub fn adb_manager(device: Device, settings: AdbSettings) -> ShellPhone<AdbLink> {
    let timeout = settings.timeout;
    let serial = device.config_value("serial").map(str::to_string);
    ShellPhone::new(&device, AdbLink::new(settings, serial), timeout)
}
