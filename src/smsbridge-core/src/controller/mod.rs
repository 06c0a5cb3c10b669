// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device controller components.
//!
//! Lifecycle state machine, event fan-out and the delivery/polling policies
//! shared by the registry and the message pipeline.

pub mod events;
pub mod machine;
pub mod policies;

pub use events::{EventEmitter, GatewayEvent, GatewayListener, ListenerId};
pub use machine::{DeviceEvent, DeviceStateMachine};
pub use policies::{DeliveryOutcome, DeliveryPolicy, FixedPolling, PollingPolicy};
