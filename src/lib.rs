// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker-less publish/subscribe messaging over IPv4 UDP multicast.
//!
//! Topics are hashed to multicast group addresses within a configured
//! network range, so IGMP filters traffic at the network layer before it
//! reaches subscribers who never asked for it. See [`Interface`] for the
//! entry point.

pub mod cache;
pub mod config;
pub mod error;
pub mod frame;
pub mod hash;
pub mod iface;
pub mod network;
pub mod publish;
pub mod reassembly;
pub mod subscribe;

pub use config::Config;
pub use error::{Error, Result};
pub use iface::{Callback, Interface};
pub use network::Ipv4Network;
