// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Provider-hosted numbers on a Twilio-compatible messaging REST API.

pub mod api;
pub mod manager;

pub use manager::{VoipManager, VoipSettings};
