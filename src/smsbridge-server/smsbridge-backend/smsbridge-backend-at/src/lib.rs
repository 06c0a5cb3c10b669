// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! AT-command modems on serial ports (generic 3GPP, Huawei, Sierra, Fibocom).

pub mod commands;
pub mod link;
pub mod modem;
pub mod parse;

pub use commands::Vendor;
pub use link::{AtLink, AtResponse, SerialLink, SerialSettings};
pub use modem::AtModem;

use smsbridge_core::Device;

/// Modem manager for `device` over a serial port; the port opens on first use.
pub fn serial_modem(device: Device, settings: SerialSettings) -> AtModem<SerialLink> {
    let timeout = settings.timeout;
    AtModem::new(&device, SerialLink::new(settings), timeout)
}
