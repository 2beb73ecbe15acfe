/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Time source for post, like, and comment timestamps.
//!
//! Timelines sort on these timestamps, so the engine takes the clock as a
//! collaborator instead of reading wall time inline.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies millisecond timestamps for writes.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Hands out strictly increasing timestamps, one tick per call.
///
/// Gives tests and tools a reproducible ordering.
#[derive(Debug)]
pub struct StepClock {
    next: AtomicI64,
}

impl StepClock {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
