// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration knobs for an interface, with sensible network-wide
//! defaults.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::network::Ipv4Network;

/// Default UMPS port.
pub const DEFAULT_PORT: u16 = 50123;

/// Default multicast TTL.
pub const DEFAULT_TTL: u32 = 3;

/// Default reassembly timeout.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default publish cache bound.
pub const DEFAULT_CACHE_BOUND: usize = crate::cache::DEFAULT_BOUND;

/// Default poll interval the subscribe endpoint's receive loop uses to wake
/// and check retransmission deadlines when no datagram arrives. Not part of
/// the wire protocol.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default cap on how long an incomplete message may be retransmission-
/// pending before it is purged with a warning. `None` restores an unbounded
/// retry loop.
pub const DEFAULT_MAX_INCOMPLETE_AGE: Duration = Duration::from_secs(60);

/// The only protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = crate::frame::PROTOCOL_VERSION;

/// Configuration for an [`crate::iface::Interface`].
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Ipv4Network,
    pub port: u16,
    pub protocol_version: u8,
    pub cache_bound: usize,
    pub ttl: u32,
    pub reassembly_timeout: Duration,
    pub poll_interval: Duration,
    pub max_incomplete_age: Option<Duration>,
}

impl Config {
    /// Start a config with the given multicast network, applying every
    /// default for the remaining knobs.
    pub fn new(network_addr: Ipv4Addr, prefix: u8) -> crate::error::Result<Self> {
        let network = Ipv4Network::new(network_addr, prefix)?;
        Ok(Self {
            network,
            port: DEFAULT_PORT,
            protocol_version: PROTOCOL_VERSION,
            cache_bound: DEFAULT_CACHE_BOUND,
            ttl: DEFAULT_TTL,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_incomplete_age: Some(DEFAULT_MAX_INCOMPLETE_AGE),
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cache_bound(mut self, bound: usize) -> Self {
        self.cache_bound = bound;
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the incomplete-message age cap. `None` restores an
    /// unbounded retransmission loop.
    pub fn with_max_incomplete_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_incomplete_age = max_age;
        self
    }
}
