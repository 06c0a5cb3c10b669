// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Routers and hotspots with a token-authenticated SMS REST API.

pub mod api;
pub mod manager;
pub mod session;

pub use manager::{RouterManager, RouterSettings};
pub use session::RouterSession;
