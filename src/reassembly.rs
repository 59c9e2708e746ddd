// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscribe-side reassembly state machine, extracted from socket I/O so it
//! can be driven by unit tests with synthetic frames and clocks.
//!
//! The per-UID state shape — a sparse frame array, a missing-index set, and
//! a deadline-driven resend loop — mirrors the gap-tracking pattern used
//! elsewhere in this codebase for reliable delivery over an unreliable
//! transport.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::warn;
use lru::LruCache;

use crate::frame::{Frame, FrameType};

/// Subscribe dedup LRU bound.
pub const COMPLETED_BOUND: usize = 1024;

/// Result of feeding one frame into the reassembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The frame was stored or discarded; no message completed.
    Pending,
    /// All frames for this UID are in hand; deliver to the caller.
    Delivered { topic: String, body: Vec<u8> },
    /// The message completed but its topic could not be recovered (the
    /// index-0 frame was never seen as a `Start` frame). State for the UID
    /// has already been purged.
    Malformed(String),
}

/// A unicast retransmission request the caller must send on the wire.
#[derive(Debug, PartialEq, Eq)]
pub struct RetransmitRequest {
    pub uid: u64,
    pub total: u8,
    pub source: SocketAddr,
    pub indices: Vec<u8>,
}

struct Incomplete {
    total: u8,
    frames: Vec<Option<Frame>>,
    missing: HashSet<u8>,
    deadline: Instant,
    created: Instant,
    source: SocketAddr,
}

/// Owns all per-UID reassembly state for one subscribe endpoint.
pub struct Reassembler {
    timeout: Duration,
    max_age: Option<Duration>,
    incomplete: HashMap<u64, Incomplete>,
    completed: LruCache<u64, ()>,
}

impl Reassembler {
    pub fn new(timeout: Duration, max_age: Option<Duration>) -> Self {
        Self {
            timeout,
            max_age,
            incomplete: HashMap::new(),
            completed: LruCache::new(
                std::num::NonZeroUsize::new(COMPLETED_BOUND).expect("bound is nonzero"),
            ),
        }
    }

    /// Feed one received, already-parsed frame into the state machine.
    pub fn on_frame(&mut self, frame: Frame, source: SocketAddr, now: Instant) -> Outcome {
        match frame.frame_type {
            FrameType::FrameRequest => {
                // Belongs to the publish side; a subscribe endpoint should
                // never receive these, but don't let a misbehaving peer
                // corrupt our state.
                Outcome::Pending
            }
            FrameType::MessageDropped => {
                self.incomplete.remove(&frame.uid);
                Outcome::Pending
            }
            FrameType::Start | FrameType::Continuation | FrameType::FrameResponse => {
                self.on_body_frame(frame, source, now)
            }
        }
    }

    fn on_body_frame(&mut self, frame: Frame, source: SocketAddr, now: Instant) -> Outcome {
        let uid = frame.uid;

        if self.completed.contains(&uid) {
            warn!("discarding duplicate straggler frame for completed uid {uid}");
            return Outcome::Pending;
        }

        if let Some(incomplete) = self.incomplete.get_mut(&uid) {
            let index = frame.index;
            incomplete.missing.remove(&index);
            incomplete.frames[index as usize] = Some(frame);
            if incomplete.missing.is_empty() {
                return self.complete(uid);
            }
            let incomplete = self.incomplete.get_mut(&uid).expect("just looked up");
            incomplete.deadline = now + self.timeout;
            return Outcome::Pending;
        }

        if frame.total == 1 && frame.index == 0 {
            let mut frames = vec![None];
            frames[0] = Some(frame);
            self.incomplete.insert(
                uid,
                Incomplete {
                    total: 1,
                    frames,
                    missing: HashSet::new(),
                    deadline: now,
                    created: now,
                    source,
                },
            );
            return self.complete(uid);
        }

        let total = frame.total;
        let index = frame.index;
        let mut frames = vec![None; total as usize];
        let mut missing: HashSet<u8> = (0..total).collect();
        missing.remove(&index);
        frames[index as usize] = Some(frame);
        self.incomplete.insert(
            uid,
            Incomplete {
                total,
                frames,
                missing,
                deadline: now + self.timeout,
                created: now,
                source,
            },
        );
        Outcome::Pending
    }

    fn complete(&mut self, uid: u64) -> Outcome {
        let incomplete = self.incomplete.remove(&uid).expect("caller just verified presence");
        let start = incomplete.frames[0].as_ref().expect("index 0 always present at completion");
        let Some(topic) = start.topic.clone() else {
            warn!("completed uid {uid} has no recoverable topic, purging");
            return Outcome::Malformed(format!(
                "uid {uid} completed without a Start frame at index 0"
            ));
        };

        let mut body = Vec::new();
        for slot in &incomplete.frames {
            let frame = slot.as_ref().expect("missing set was empty at completion");
            body.extend_from_slice(&frame.body);
        }

        self.completed.put(uid, ());
        Outcome::Delivered { topic, body }
    }

    /// Scan all incomplete messages and return retransmission requests for
    /// any whose deadline has elapsed, resetting their deadline as if the
    /// request had just been sent.
    pub fn due_retransmits(&mut self, now: Instant) -> Vec<RetransmitRequest> {
        let mut due = Vec::new();
        for (&uid, incomplete) in self.incomplete.iter_mut() {
            if incomplete.deadline <= now {
                let mut indices: Vec<u8> = incomplete.missing.iter().copied().collect();
                indices.sort_unstable();
                due.push(RetransmitRequest {
                    uid,
                    total: incomplete.total,
                    source: incomplete.source,
                    indices,
                });
                incomplete.deadline = now + self.timeout;
            }
        }
        due
    }

    /// Purge incomplete messages older than the configured maximum age,
    /// returning the UIDs purged. A no-op if no cap is configured.
    pub fn purge_stale(&mut self, now: Instant) -> Vec<u64> {
        let Some(max_age) = self.max_age else {
            return Vec::new();
        };
        let stale: Vec<u64> = self
            .incomplete
            .iter()
            .filter(|(_, inc)| now.duration_since(inc.created) > max_age)
            .map(|(&uid, _)| uid)
            .collect();
        for &uid in &stale {
            warn!("purging incomplete message {uid}: exceeded max incomplete age");
            self.incomplete.remove(&uid);
        }
        stale
    }

    /// Whether a UID currently has in-flight incomplete reassembly state.
    /// Test/diagnostic helper, not part of the wire protocol.
    pub fn is_incomplete(&self, uid: u64) -> bool {
        self.incomplete.contains_key(&uid)
    }
}
