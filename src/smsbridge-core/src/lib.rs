// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod controller;
pub mod device;
pub mod error;
pub mod manager;
pub mod message;
pub mod signal;
pub mod stats;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use device::{Device, DeviceFamily, DeviceStatus, DeviceSummary, SignalDetails};
pub use error::{GatewayError, GatewayResult};
pub use manager::{AuxCommand, AuxOutput, BoxFuture, DeviceManager, InitReport};
pub use message::{DeliveryStatus, InboundMessage, Message};
pub use stats::{DeviceStats, MessageSummary};
