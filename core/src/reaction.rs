/*
 *   Copyright (c) 2026 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! A declared reaction: its immutable metadata
//! plus the mutable run-state the scheduler and task factory touch on
//! every emission. Input descriptors are exposed as data (a small
//! tagged-variant sum assembled by a builder) rather than encoded at
//! compile time in the host type system.

use std::{sync::{atomic::{AtomicBool, AtomicU32, Ordering},
                  Arc,
                  Mutex,
                  Weak},
          time::{Duration, Instant}};

use smallvec::SmallVec;

use crate::types::{MutexGroupKey, Payload, Priority, TypeKey};

/// Identifies a single registered reaction for its whole lifetime.
/// Allocated once by [`crate::reactor::Runtime::install`] and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReactionId(pub(crate) u64);

impl std::fmt::Display for ReactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reaction#{}", self.0)
    }
}

/// One declared dependency of a reaction.
#[derive(Debug, Clone)]
pub enum InputDescriptor {
    /// Primary trigger: the emission that fires the reaction supplies the
    /// value.
    Trigger(TypeKey),
    /// Secondary value resolved from the last-value cache. Rejects the
    /// task if absent and the type is not marked transient.
    With(TypeKey),
    /// Snapshot of the `N` most recent values of this type observed by
    /// this reaction since registration.
    Last(TypeKey, usize),
    /// Metadata supplied by the timer service.
    TimerTick,
    /// `(fd, event mask)` supplied by the I/O watcher.
    IoEvent,
}

/// Timer metadata handed to a reaction with a `TimerTick` input (spec
/// §4.5).
#[derive(Debug, Clone, Copy)]
pub struct TimerTickInfo {
    pub scheduled: Instant,
    pub actual: Instant,
}

impl TimerTickInfo {
    /// scheduled − actual.
    pub fn drift(&self) -> Duration {
        if self.actual >= self.scheduled {
            self.actual - self.scheduled
        } else {
            self.scheduled - self.actual
        }
    }
}

/// Readiness event handed to a reaction with an `IoEvent` input (spec
/// §4.6). The mask uses the same bit layout as `mio::Interest`.
#[derive(Debug, Clone, Copy)]
pub struct IoEventInfo {
    pub fd: std::os::fd::RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// One resolved input, in declaration order, forming the argument tuple a
/// reaction's callback is invoked with.
#[derive(Debug, Clone)]
pub enum ResolvedInput {
    Value(Payload),
    /// A transient `With(T)` whose cache was empty.
    Absent,
    History(Vec<Payload>),
    Timer(TimerTickInfo),
    Io(IoEventInfo),
}

pub type ReactionCallback = dyn Fn(&[ResolvedInput]) + Send + Sync;

/// Bounded, drop-oldest history of a single input type for one reaction.
/// `Last(N, T)`'s `N` is chosen per-reaction at registration time (a
/// runtime value, not a compile-time constant), so the capacity is a field
/// rather than a const generic; the inline `[Payload; 4]` storage covers
/// the common small windows (`Last(2,T)`..`Last(4,T)`) without a heap
/// allocation per reaction, spilling to the heap for anything larger.
#[derive(Debug, Default)]
struct HistoryBuffer {
    capacity: usize,
    buf: SmallVec<[Payload; 4]>,
}

impl HistoryBuffer {
    fn new(capacity: usize) -> Self { Self { capacity, buf: SmallVec::new() } }

    fn push(&mut self, payload: Payload) {
        if self.buf.len() == self.capacity {
            self.buf.remove(0);
        }
        self.buf.push(payload);
    }

    /// Oldest-first, i.e. newest-last.
    fn snapshot(&self) -> Vec<Payload> { self.buf.iter().cloned().collect() }
}

/// Immutable metadata plus mutable run-state for one declared reaction.
pub struct ReactionRecord {
    pub id: ReactionId,
    pub reactor_name: Arc<str>,
    pub priority: Priority,
    pub mutex_group: Option<MutexGroupKey>,
    pub single_flight: bool,
    pub main_thread_only: bool,
    /// If true, tasks for this reaction keep being accepted during
    /// shutdown drain even after the pool starts rejecting new ones. Used
    /// by the distinguished `ShutdownEvent` cleanup reactions.
    pub shutdown_exempt: bool,
    pub inputs: Vec<InputDescriptor>,
    callback: Box<ReactionCallback>,

    enabled: AtomicBool,
    pending_count: AtomicU32,
    active_count: AtomicU32,
    histories: Mutex<Vec<HistoryBuffer>>,
    unbinders: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl std::fmt::Debug for ReactionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionRecord")
            .field("id", &self.id)
            .field("reactor_name", &self.reactor_name)
            .field("priority", &self.priority)
            .field("mutex_group", &self.mutex_group)
            .field("single_flight", &self.single_flight)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl ReactionRecord {
    pub fn new(
        id: ReactionId,
        reactor_name: Arc<str>,
        priority: Priority,
        mutex_group: Option<MutexGroupKey>,
        single_flight: bool,
        main_thread_only: bool,
        shutdown_exempt: bool,
        inputs: Vec<InputDescriptor>,
        callback: Box<ReactionCallback>,
    ) -> Self {
        let histories = inputs
            .iter()
            .map(|input| match input {
                InputDescriptor::Last(_, n) => HistoryBuffer::new(*n),
                _ => HistoryBuffer::new(0),
            })
            .collect();
        Self {
            id,
            reactor_name,
            priority,
            mutex_group,
            single_flight,
            main_thread_only,
            shutdown_exempt,
            inputs,
            callback,
            enabled: AtomicBool::new(true),
            pending_count: AtomicU32::new(0),
            active_count: AtomicU32::new(0),
            histories: Mutex::new(histories),
            unbinders: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool { self.enabled.load(Ordering::Acquire) }

    pub fn set_enabled(&self, enabled: bool) { self.enabled.store(enabled, Ordering::Release); }

    pub fn pending_count(&self) -> u32 { self.pending_count.load(Ordering::Acquire) }

    pub fn active_count(&self) -> u32 { self.active_count.load(Ordering::Acquire) }

    /// §8 invariant 2: single-flight reactions never have more than one
    /// task pending-or-active at once.
    pub fn is_single_flight_busy(&self) -> bool {
        self.single_flight && (self.pending_count() >= 1 || self.active_count() >= 1)
    }

    pub(crate) fn on_requested(&self) { self.pending_count.fetch_add(1, Ordering::AcqRel); }

    pub(crate) fn on_running(&self) { self.active_count.fetch_add(1, Ordering::AcqRel); }

    pub(crate) fn on_completed(&self) {
        self.pending_count.fetch_sub(1, Ordering::AcqRel);
        self.active_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// A task was dropped before running (disabled/unbound at pop time, or
    /// rejected between Requested and Queued); only the pending half of the
    /// counter pair was ever incremented.
    pub(crate) fn on_dropped_before_running(&self) {
        self.pending_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn record_history(&self, input_index: usize, payload: &Payload) {
        let mut histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(buf) = histories.get_mut(input_index) {
            if buf.capacity > 0 {
                buf.push(payload.clone());
            }
        }
    }

    pub(crate) fn history_snapshot(&self, input_index: usize) -> Vec<Payload> {
        let histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        histories.get(input_index).map(HistoryBuffer::snapshot).unwrap_or_default()
    }

    pub fn invoke(&self, args: &[ResolvedInput]) { (self.callback)(args) }

    /// Registers a callback to run when this reaction is unbound --
    /// typically cancelling a timer, dropping an fd watch, or removing a
    /// bus subscription.
    pub(crate) fn push_unbinder(&self, unbinder: Box<dyn FnOnce() + Send>) {
        self.unbinders.lock().unwrap_or_else(|e| e.into_inner()).push(unbinder);
    }

    fn run_unbinders(&self) {
        let unbinders = std::mem::take(&mut *self.unbinders.lock().unwrap_or_else(|e| e.into_inner()));
        for unbinder in unbinders {
            unbinder();
        }
    }
}

/// External reference to a reaction supporting enable/disable/unbind (spec
/// §4.7). A weak reference: once every strong `Arc<ReactionRecord>` the
/// runtime holds is dropped (after unbind quiesces), the handle goes
/// inert on its own.
#[derive(Clone)]
pub struct ReactionHandle {
    record: Weak<ReactionRecord>,
}

impl std::fmt::Debug for ReactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionHandle").field("id", &self.id()).finish()
    }
}

impl ReactionHandle {
    pub(crate) fn new(record: &Arc<ReactionRecord>) -> Self {
        Self { record: Arc::downgrade(record) }
    }

    pub fn id(&self) -> Option<ReactionId> { self.record.upgrade().map(|r| r.id) }

    /// Upgrades to a strong reference, for callers (e.g. [`crate::reactor`]'s
    /// timer/IO registration helpers) that need to hand the record itself to
    /// another service. Returns `None` once the handle has gone inert.
    pub(crate) fn record(&self) -> Option<Arc<ReactionRecord>> { self.record.upgrade() }

    pub fn enable(&self) {
        if let Some(record) = self.record.upgrade() {
            record.set_enabled(true);
        }
    }

    pub fn disable(&self) {
        if let Some(record) = self.record.upgrade() {
            record.set_enabled(false);
        }
    }

    /// Runs the reaction's stored unbinders (cancel timers, drop fd
    /// watches, remove bus subscriptions), then disables it. Idempotent:
    /// a second call finds the unbinder list already empty. After this
    /// returns, no *new* task for the reaction is ever requested again;
    /// in-flight tasks still complete.
    pub fn unbind(&self) {
        if let Some(record) = self.record.upgrade() {
            record.set_enabled(false);
            record.run_unbinders();
        }
    }

    pub fn is_inert(&self) -> bool { self.record.upgrade().is_none() }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::type_key_of;

    fn make_record(inputs: Vec<InputDescriptor>) -> Arc<ReactionRecord> {
        Arc::new(ReactionRecord::new(
            ReactionId(1),
            Arc::from("r"),
            Priority::NORMAL,
            None,
            false,
            false,
            false,
            inputs,
            Box::new(|_| {}),
        ))
    }

    #[test]
    fn handle_enable_disable_round_trips() {
        let record = make_record(vec![]);
        let handle = ReactionHandle::new(&record);
        assert!(record.is_enabled());
        handle.disable();
        assert!(!record.is_enabled());
        handle.enable();
        assert!(record.is_enabled());
    }

    #[test]
    fn unbind_runs_unbinders_disables_and_is_idempotent() {
        let record = make_record(vec![]);
        let handle = ReactionHandle::new(&record);
        let runs = Arc::new(AtomicU32::new(0));
        let runs_clone = runs.clone();
        record.push_unbinder(Box::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        }));

        handle.unbind();
        assert!(!record.is_enabled());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Idempotent: a second unbind finds the unbinder list already empty.
        handle.unbind();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_goes_inert_once_the_record_is_dropped() {
        let record = make_record(vec![]);
        let handle = ReactionHandle::new(&record);
        assert!(!handle.is_inert());
        drop(record);
        assert!(handle.is_inert());
        // Inert handle operations are no-ops, not panics.
        handle.enable();
        handle.disable();
        handle.unbind();
    }

    #[test]
    fn last_n_history_buffer_starts_empty_and_stays_bounded() {
        let record = make_record(vec![InputDescriptor::Last(type_key_of::<u32>(), 2)]);
        assert!(record.history_snapshot(0).is_empty());
        record.record_history(0, &Payload::new(1u32));
        record.record_history(0, &Payload::new(2u32));
        record.record_history(0, &Payload::new(3u32));
        let snapshot = record.history_snapshot(0);
        let ints: Vec<u32> = snapshot.iter().map(|p| *p.downcast::<u32>().unwrap()).collect();
        assert_eq!(ints, vec![2, 3]);
    }

    #[test]
    fn non_last_input_ignores_history_writes() {
        let record = make_record(vec![InputDescriptor::Trigger(type_key_of::<u32>())]);
        record.record_history(0, &Payload::new(1u32));
        assert!(record.history_snapshot(0).is_empty());
    }
}
