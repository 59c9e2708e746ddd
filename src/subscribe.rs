// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscribe endpoint: joins/leaves multicast groups, reassembles
//! messages, requests missing frames, deduplicates.
//!
//! Group membership uses `join_multicast_v4`/`leave_multicast_v4` on the
//! wildcard interface; the receive loop runs on a dedicated thread with the
//! same `AtomicBool` + `JoinHandle` shutdown idiom as
//! [`crate::publish::PublishEndpoint`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::frame;
use crate::reassembly::{Outcome, Reassembler};

const RECV_BUF_SIZE: usize = 1500;

/// Callback invoked once per completed, deduplicated message.
pub type OnMessage = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Joins multicast groups and reassembles fragmented messages, driving the
/// retransmission protocol for any that lose frames.
pub struct SubscribeEndpoint {
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SubscribeEndpoint {
    /// Bind the wildcard address on `port` and start the dedicated receive
    /// thread, which reassembles messages and invokes `on_message` for each
    /// completed one.
    pub fn new(
        port: u16,
        reassembly_timeout: Duration,
        max_incomplete_age: Option<Duration>,
        poll_interval: Duration,
        on_message: OnMessage,
    ) -> io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        let bind_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);
        socket2.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(poll_interval))?;
        debug!("subscribe endpoint bound to {bind_addr}");

        let socket = Arc::new(socket);
        let running = Arc::new(AtomicBool::new(true));
        let reassembler = Arc::new(Mutex::new(Reassembler::new(reassembly_timeout, max_incomplete_age)));

        let handle = {
            let socket = Arc::clone(&socket);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("umps-subscribe-rx".into())
                .spawn(move || Self::run_loop(socket, reassembler, running, on_message))?
        };

        Ok(Self {
            socket,
            running,
            handle: Some(handle),
        })
    }

    fn run_loop(
        socket: Arc<UdpSocket>,
        reassembler: Arc<Mutex<Reassembler>>,
        running: Arc<AtomicBool>,
        on_message: OnMessage,
    ) {
        let mut buf = [0u8; RECV_BUF_SIZE];
        while running.load(Ordering::Acquire) {
            match socket.recv_from(&mut buf) {
                Ok((len, source)) => {
                    Self::handle_datagram(&reassembler, &on_message, &buf[..len], source);
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    Self::run_timers(&socket, &reassembler);
                }
                Err(e) => {
                    warn!("subscribe endpoint recv error: {e}");
                }
            }
        }
    }

    fn handle_datagram(
        reassembler: &Mutex<Reassembler>,
        on_message: &OnMessage,
        buf: &[u8],
        source: SocketAddr,
    ) {
        let parsed = match frame::parse(buf) {
            Ok(f) => f,
            Err(e) => {
                warn!("subscribe endpoint discarding malformed datagram from {source}: {e}");
                return;
            }
        };
        let now = Instant::now();
        let outcome = reassembler.lock().on_frame(parsed, source, now);
        match outcome {
            Outcome::Delivered { topic, body } => on_message(&topic, &body),
            Outcome::Malformed(msg) => warn!("dropping malformed message: {msg}"),
            Outcome::Pending => {}
        }
    }

    fn run_timers(socket: &UdpSocket, reassembler: &Mutex<Reassembler>) {
        let now = Instant::now();
        let mut reassembler = reassembler.lock();
        let purged = reassembler.purge_stale(now);
        for uid in purged {
            debug!("purged stale incomplete message uid={uid}");
        }
        let due = reassembler.due_retransmits(now);
        drop(reassembler);
        for request in due {
            for index in &request.indices {
                let req = frame::pack_request(request.uid, *index, request.total);
                if let Err(e) = socket.send_to(&req, request.source) {
                    warn!(
                        "failed to send frame request for uid={} index={} to {}: {e}",
                        request.uid, index, request.source
                    );
                }
            }
        }
    }

    /// Join the given multicast group on the wildcard interface.
    pub fn subscribe(&self, group: Ipv4Addr) {
        if !self.running.load(Ordering::Acquire) {
            debug!("subscribe({group}) ignored: endpoint closed");
            return;
        }
        match self.socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
            Ok(()) => debug!("joined multicast group {group}"),
            Err(e) => warn!("failed to join multicast group {group}: {e}"),
        }
    }

    /// Leave the given multicast group.
    pub fn unsubscribe(&self, group: Ipv4Addr) {
        if !self.running.load(Ordering::Acquire) {
            debug!("unsubscribe({group}) ignored: endpoint closed");
            return;
        }
        match self.socket.leave_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
            Ok(()) => debug!("left multicast group {group}"),
            Err(e) => warn!("failed to leave multicast group {group}: {e}"),
        }
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

impl Drop for SubscribeEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_and_unsubscribe_after_close_are_silent_no_ops() {
        let on_message: OnMessage = Arc::new(|_, _| {});
        let mut ep = SubscribeEndpoint::new(
            0,
            Duration::from_secs(3),
            Some(Duration::from_secs(60)),
            Duration::from_millis(50),
            on_message,
        )
        .expect("bind should succeed");
        ep.close();
        // Must not panic even though the socket's receive thread has stopped.
        ep.subscribe(Ipv4Addr::new(239, 11, 122, 1));
        ep.unsubscribe(Ipv4Addr::new(239, 11, 122, 1));
    }

    #[test]
    fn close_is_idempotent() {
        let on_message: OnMessage = Arc::new(|_, _| {});
        let mut ep = SubscribeEndpoint::new(
            0,
            Duration::from_secs(3),
            None,
            Duration::from_millis(50),
            on_message,
        )
        .expect("bind should succeed");
        ep.close();
        ep.close();
    }

    #[test]
    fn callback_is_invoked_on_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let on_message: OnMessage = Arc::new(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let ep = SubscribeEndpoint::new(
            0,
            Duration::from_secs(3),
            Some(Duration::from_secs(60)),
            Duration::from_millis(20),
            on_message,
        )
        .expect("bind should succeed");
        let port = ep.socket.local_addr().unwrap().port();

        let sender = UdpSocket::bind("127.0.0.1:0").expect("sender bind");
        let raw = frame::pack(1, "greeting", b"hi").unwrap();
        sender
            .send_to(&raw[0], SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port))
            .expect("send");

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && calls.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
