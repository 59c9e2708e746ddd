// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish endpoint: sends frames, caches outbound messages, answers
//! retransmission requests.
//!
//! The socket is bound through `socket2` (for `SO_REUSEADDR` before bind)
//! and converted to a plain `std::net::UdpSocket` for I/O. The receive loop
//! runs on a dedicated thread with an `AtomicBool` running flag and a
//! `JoinHandle` joined on `close`/`Drop`.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::cache::PublishCache;
use crate::error::{Error, Result};
use crate::frame::{self, FrameType};

const RECV_BUF_SIZE: usize = 1500;
const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Sends topic-addressed messages and answers retransmission requests for
/// messages still in its bounded cache.
pub struct PublishEndpoint {
    socket: Arc<UdpSocket>,
    cache: Arc<Mutex<PublishCache>>,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PublishEndpoint {
    /// Bind a UDP socket on the wildcard address and an ephemeral port, set
    /// the multicast TTL, and start the dedicated receive thread that
    /// answers `FrameRequest`s.
    ///
    /// The port is always ephemeral, never the well-known UMPS port: it
    /// becomes the source address subscribers send `FrameRequest`s back to,
    /// and a subscribe endpoint on the same host already owns the
    /// well-known port. Binding here would either collide on it or leave
    /// unicast retransmission requests non-deterministically demuxed to
    /// whichever socket `SO_REUSEADDR` happens to hand them to.
    pub fn new(ttl: u32, cache_bound: usize) -> io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        let bind_addr: SocketAddr = SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0);
        socket2.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket2.into();
        socket.set_multicast_ttl_v4(ttl)?;
        socket.set_read_timeout(Some(RECV_POLL_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        debug!("publish endpoint bound to {local_addr}, ttl={ttl}");

        let socket = Arc::new(socket);
        let cache = Arc::new(Mutex::new(PublishCache::new(cache_bound)));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let socket = Arc::clone(&socket);
            let cache = Arc::clone(&cache);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("umps-publish-rx".into())
                .spawn(move || Self::run_loop(socket, cache, running))?
        };

        Ok(Self {
            socket,
            cache,
            running,
            handle: Some(handle),
        })
    }

    fn run_loop(socket: Arc<UdpSocket>, cache: Arc<Mutex<PublishCache>>, running: Arc<AtomicBool>) {
        let mut buf = [0u8; RECV_BUF_SIZE];
        while running.load(Ordering::Acquire) {
            match socket.recv_from(&mut buf) {
                Ok((len, source)) => Self::handle_datagram(&socket, &cache, &buf[..len], source),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    warn!("publish endpoint recv error: {e}");
                    continue;
                }
            }
        }
    }

    fn handle_datagram(
        socket: &UdpSocket,
        cache: &Mutex<PublishCache>,
        buf: &[u8],
        source: SocketAddr,
    ) {
        let request = match frame::parse(buf) {
            Ok(f) => f,
            Err(e) => {
                warn!("publish endpoint discarding malformed datagram from {source}: {e}");
                return;
            }
        };
        if request.frame_type != FrameType::FrameRequest {
            debug!(
                "publish endpoint discarding non-request frame type from {source}"
            );
            return;
        }

        let answer = {
            let cache = cache.lock();
            cache
                .get(request.uid)
                .and_then(|frames| frames.get(request.index as usize))
                .cloned()
        };

        match answer {
            Some(frame_bytes) => {
                if let Err(e) = socket.send_to(&frame_bytes, source) {
                    warn!("failed to send retransmit response to {source}: {e}");
                }
            }
            None => {
                let drop = frame::pack_drop(request.uid, request.index, request.total);
                if let Err(e) = socket.send_to(&drop, source) {
                    warn!("failed to send drop notice to {source}: {e}");
                }
            }
        }
    }

    /// Pack, send, and cache a message addressed to `dest`.
    pub fn publish(&self, dest: SocketAddr, topic: &str, body: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        let uid = (rand::random::<u128>() >> 64) as u64;
        let mut frames = frame::pack(uid, topic, body)?;
        for f in &frames {
            self.socket.send_to(f, dest)?;
        }
        debug!("published uid={uid} topic={topic} frames={} dest={dest}", frames.len());
        frame::retarget(&mut frames);
        self.cache.lock().insert(uid, frames);
        Ok(())
    }

    /// Idempotent shutdown: stops the receive thread and releases the socket.
    pub fn close(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for PublishEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
