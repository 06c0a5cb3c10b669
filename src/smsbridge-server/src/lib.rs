// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod config;
pub mod gateway;
pub mod hub;
pub mod notify;
pub mod pipeline;
pub mod poller;
pub mod registry;
pub mod store;

pub use config::ServerConfig;
pub use gateway::Gateway;
