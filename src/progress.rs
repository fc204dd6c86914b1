// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Progress reporting contract shared by the installer and updater.
// Author: Lukas Bower

//! Progress reporting for long-running install and update operations.
//!
//! Sinks receive `update(current, total)` once per page or chunk. A `total`
//! of zero marks an indeterminate phase (erase polling) where `current` is
//! the retry count; the terminal call is always `update(0, 0)` so UI layers
//! can reset spinners. Returning `true` from `update` aborts the operation
//! after the current page.

use std::sync::atomic::{AtomicU32, Ordering};

/// `total` value reported while a phase has no known bound.
pub const INDETERMINATE: u32 = 0;

/// Receiver for install/update progress.
pub trait ProgressSink {
    /// Report progress; return `true` to abort the operation.
    fn update(&mut self, current: u32, total: u32) -> bool;

    /// Announce the phase key (`"erasing"`, `"installing"`, `"verifying"`).
    fn set_key(&mut self, _key: &str) {}

    /// The most recently announced phase key.
    fn current_key(&self) -> &str {
        ""
    }
}

/// Sink that discards all updates and never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&mut self, _current: u32, _total: u32) -> bool {
        false
    }
}

impl<F> ProgressSink for F
where
    F: FnMut(u32, u32) -> bool,
{
    fn update(&mut self, current: u32, total: u32) -> bool {
        self(current, total)
    }
}

/// Session-level progress counters.
///
/// The session thread writes with plain stores; another thread may read them
/// with relaxed loads to drive a UI. No ordering is implied beyond the
/// values themselves.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    current: AtomicU32,
    maximum: AtomicU32,
}

impl ProgressCounters {
    /// Current progress value.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Relaxed)
    }

    /// Maximum progress value for the running operation.
    #[must_use]
    pub fn maximum(&self) -> u32 {
        self.maximum.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current(&self, value: u32) {
        self.current.store(value, Ordering::Relaxed);
    }

    pub(crate) fn set_maximum(&self, value: u32) {
        self.maximum.store(value, Ordering::Relaxed);
    }

    pub(crate) fn add(&self, delta: u32) {
        self.current.fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.set_current(0);
        self.set_maximum(0);
    }
}
