// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interface façade: topic↔group mapping, subscription table, endpoint
//! lifecycle, and callback dispatch.
//!
//! Endpoint construction runs on a background thread, matching the
//! `AtomicBool` + `JoinHandle` shutdown idiom used for the multicast
//! listener thread in `publish.rs`/`subscribe.rs`, generalized here into a
//! cancellable startup helper.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash;
use crate::publish::PublishEndpoint;
use crate::subscribe::{OnMessage, SubscribeEndpoint};

/// A subscriber callback, invoked with `(topic, body)` in registration
/// order for every completed, deduplicated message on that topic.
pub type Callback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

enum StartupState<T> {
    Pending(std::thread::JoinHandle<std::io::Result<T>>),
    Ready(Option<Arc<T>>),
}

/// Models asynchronous, cancellable endpoint construction with a background
/// thread: the (fast, synchronous) socket bind/join runs off the caller's
/// thread, and the first `wait()` call blocks joining it.
struct Startup<T> {
    state: Mutex<StartupState<T>>,
    cancelled: Arc<AtomicBool>,
}

impl<T: Send + 'static> Startup<T> {
    fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> std::io::Result<T> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("umps-endpoint-startup".into())
            .spawn(f)
            .expect("spawning startup thread should not fail");
        Self {
            state: Mutex::new(StartupState::Pending(handle)),
            cancelled,
        }
    }

    /// Join the startup thread if still pending, caching the result.
    /// Returns `None` if startup failed or was cancelled.
    fn wait(&self) -> Option<Arc<T>> {
        let mut state = self.state.lock();
        if let StartupState::Ready(ref ready) = *state {
            return ready.clone();
        }
        let StartupState::Pending(handle) =
            std::mem::replace(&mut *state, StartupState::Ready(None))
        else {
            unreachable!("checked for Pending above")
        };
        let ready = match handle.join() {
            Ok(Ok(endpoint)) => {
                if self.cancelled.load(Ordering::Acquire) {
                    None // endpoint drops here, closing it
                } else {
                    Some(Arc::new(endpoint))
                }
            }
            Ok(Err(e)) => {
                warn!("endpoint startup failed: {e}");
                None
            }
            Err(_) => {
                warn!("endpoint startup thread panicked");
                None
            }
        };
        *state = StartupState::Ready(ready.clone());
        ready
    }

    /// Cancel startup and, once resolved, drop the endpoint so it closes.
    fn terminate(&self) {
        self.cancelled.store(true, Ordering::Release);
        let mut state = self.state.lock();
        match &mut *state {
            StartupState::Pending(_) => {
                let StartupState::Pending(handle) =
                    std::mem::replace(&mut *state, StartupState::Ready(None))
                else {
                    unreachable!("checked for Pending above")
                };
                let _ = handle.join(); // endpoint, if any, drops at join's return value
            }
            StartupState::Ready(ready) => {
                ready.take(); // drops the Arc; closes the endpoint if this was the last reference
            }
        }
    }
}

#[derive(Default)]
struct FacadeState {
    groups: HashMap<Ipv4Addr, HashSet<String>>,
    callbacks: HashMap<String, Vec<Callback>>,
}

fn dispatch(state: &Mutex<FacadeState>, topic: &str, body: &[u8]) {
    let callbacks = {
        let state = state.lock();
        match state.callbacks.get(topic) {
            Some(cbs) => cbs.clone(),
            None => {
                debug!("no subscriber registered for topic '{topic}', discarding");
                return;
            }
        }
    };
    for cb in &callbacks {
        cb(topic, body);
    }
}

/// Topic-addressed pub/sub over a configured multicast network: one publish
/// endpoint, one subscribe endpoint, and the subscription table between
/// them.
pub struct Interface {
    config: Config,
    nbins: u32,
    publish: Startup<PublishEndpoint>,
    subscribe: Startup<SubscribeEndpoint>,
    state: Arc<Mutex<FacadeState>>,
}

impl Interface {
    /// Start both endpoints. Fails immediately (no startup thread needed)
    /// if the protocol version is unsupported or the network cannot host at
    /// least one bin; otherwise returns before either endpoint is ready.
    pub fn new(config: Config) -> Result<Self> {
        if config.protocol_version != crate::config::PROTOCOL_VERSION {
            return Err(Error::UnsupportedProtocolVersion(config.protocol_version));
        }
        let nbins = config.network.nbins()?;

        let state: Arc<Mutex<FacadeState>> = Arc::new(Mutex::new(FacadeState::default()));

        let port = config.port;
        let ttl = config.ttl;
        let cache_bound = config.cache_bound;
        let publish = Startup::spawn(move || PublishEndpoint::new(ttl, cache_bound));

        let reassembly_timeout = config.reassembly_timeout;
        let max_incomplete_age = config.max_incomplete_age;
        let poll_interval = config.poll_interval;
        let dispatch_state = Arc::clone(&state);
        let on_message: OnMessage = Arc::new(move |topic: &str, body: &[u8]| {
            dispatch(&dispatch_state, topic, body);
        });
        let subscribe = Startup::spawn(move || {
            SubscribeEndpoint::new(port, reassembly_timeout, max_incomplete_age, poll_interval, on_message)
        });

        Ok(Self {
            config,
            nbins,
            publish,
            subscribe,
            state,
        })
    }

    fn group_for(&self, topic: &str) -> Ipv4Addr {
        let bin = hash::hash(topic, self.nbins);
        self.config
            .network
            .nth_host(u64::from(bin))
            .expect("hash output is within nbins, which nbins() guarantees is host-addressable")
    }

    /// Hash `topic` to a group, pack `body`, and send it. Blocks until the
    /// publish endpoint's startup resolves.
    pub fn publish(&self, topic: &str, body: &[u8]) -> Result<()> {
        let endpoint = self.publish.wait().ok_or(Error::NotConnected)?;
        let group = self.group_for(topic);
        let dest = SocketAddr::new(group.into(), self.config.port);
        endpoint.publish(dest, topic, body)
    }

    /// Register `callback` for `topic`, joining its group if this is the
    /// first subscription on that group. Blocks until the subscribe
    /// endpoint's startup resolves.
    pub fn subscribe(&self, topic: &str, callback: Callback) -> Result<()> {
        let endpoint = self.subscribe.wait().ok_or(Error::NotConnected)?;
        let group = self.group_for(topic);

        let is_new_group = {
            let mut state = self.state.lock();
            let topics = state.groups.entry(group).or_default();
            let is_new_group = topics.is_empty();
            topics.insert(topic.to_string());
            state
                .callbacks
                .entry(topic.to_string())
                .or_default()
                .push(callback);
            is_new_group
        };

        if is_new_group {
            endpoint.subscribe(group);
        }
        Ok(())
    }

    /// Remove `topic`'s subscription. Fails with [`Error::NotSubscribed`] if
    /// there was none. Leaves the group if this was the last topic on it.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        let endpoint = self.subscribe.wait().ok_or(Error::NotConnected)?;
        let group = self.group_for(topic);

        let now_empty = {
            let mut state = self.state.lock();
            let Some(topics) = state.groups.get_mut(&group) else {
                return Err(Error::NotSubscribed);
            };
            if !topics.remove(topic) {
                return Err(Error::NotSubscribed);
            }
            state.callbacks.remove(topic);
            let now_empty = topics.is_empty();
            if now_empty {
                state.groups.remove(&group);
            }
            now_empty
        };

        if now_empty {
            endpoint.unsubscribe(group);
        }
        Ok(())
    }

    /// Cancel any still-running startup and close both endpoints.
    /// Idempotent.
    pub fn terminate(&self) {
        self.publish.terminate();
        self.subscribe.terminate();
    }
}
