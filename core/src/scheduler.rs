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

//! Priority-ordered ready queue backed by a fixed worker pool. Workers pop
//! the highest-priority ready task, try-acquire its mutex-group slot (if
//! any), run it to completion, release the slot, and wake the next waiter.

use std::{any::Any,
          collections::{BinaryHeap, HashMap},
          panic::{self, AssertUnwindSafe},
          sync::{Arc, Condvar, Mutex, OnceLock},
          thread::{self, JoinHandle}};

use crate::{control::ReactionExceptionEvent, task::Task, types::MutexGroupKey};

/// Wraps a [`Task`] so the ready queue can order by
/// `(priority_class DESC, numeric_priority DESC, task_id ASC)`.
struct ReadyTask(Task);

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool { self.0.id == other.0.id }
}
impl Eq for ReadyTask {}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl Ord for ReadyTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // `BinaryHeap` is a max-heap; break priority ties so the smaller
        // task_id (older emission) is treated as greater, i.e. pops first.
        self.0
            .reaction
            .priority
            .cmp(&other.0.reaction.priority)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

#[derive(Default)]
struct MutexGroupState {
    held: bool,
    waiters: BinaryHeap<ReadyTask>,
}

struct SharedState {
    ready: BinaryHeap<ReadyTask>,
    main_thread_ready: BinaryHeap<ReadyTask>,
    groups: HashMap<MutexGroupKey, MutexGroupState>,
    draining: bool,
}

/// A fixed pool of worker threads consuming one priority queue, with
/// mutex-group gating (at most one running task per group key at a time).
/// Single-flight gating is enforced upstream by the task factory -- the
/// scheduler only ever sees at most one outstanding task per single-flight
/// reaction.
pub struct Scheduler {
    state: Mutex<SharedState>,
    cv: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    exception_sink: OnceLock<Box<dyn Fn(ReactionExceptionEvent) + Send + Sync>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("Scheduler").finish_non_exhaustive() }
}

impl Scheduler {
    pub fn new(thread_count: usize) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            state: Mutex::new(SharedState {
                ready: BinaryHeap::new(),
                main_thread_ready: BinaryHeap::new(),
                groups: HashMap::new(),
                draining: false,
            }),
            cv: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(thread_count)),
            exception_sink: OnceLock::new(),
        });

        let mut handles = Vec::with_capacity(thread_count);
        for worker_index in 0..thread_count.max(1) {
            let scheduler = scheduler.clone();
            let is_main = worker_index == 0;
            handles.push(
                thread::Builder::new()
                    .name(format!("reactor-worker-{worker_index}"))
                    .spawn(move || scheduler.worker_loop(is_main))
                    .expect("failed to spawn reactor worker thread"),
            );
        }
        *scheduler.workers.lock().unwrap_or_else(|e| e.into_inner()) = handles;
        scheduler
    }

    /// Installs the callback used to publish [`ReactionExceptionEvent`] when
    /// a reaction's callback panics. Set once, by the runtime, after both it
    /// and the scheduler exist (breaks the scheduler -> pipeline -> runtime
    /// construction cycle).
    pub fn set_exception_sink(&self, sink: Box<dyn Fn(ReactionExceptionEvent) + Send + Sync>) {
        let _ = self.exception_sink.set(sink);
    }

    pub fn submit(&self, task: Task) {
        tracing::trace!(task_id = task.id, reaction = %task.reaction.id, "task queued");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if task.reaction.main_thread_only {
            state.main_thread_ready.push(ReadyTask(task));
        } else {
            state.ready.push(ReadyTask(task));
        }
        self.cv.notify_all();
    }

    /// Marks the pool as draining: workers finish their current task, drain
    /// the ready queue of tasks whose reactions are not shutdown-exempt, and
    /// then exit.
    pub fn begin_shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.draining = true;
        drop(state);
        self.cv.notify_all();
    }

    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn worker_loop(self: Arc<Self>, is_main: bool) {
        loop {
            let task = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if let Some(task) = self.try_pop(&mut state, is_main) {
                        break Some(task);
                    }
                    if state.draining && !self.has_non_exempt_work(&state) {
                        break None;
                    }
                    state = self.cv.wait(state).unwrap_or_else(|e| e.into_inner());
                }
            };

            let Some(task) = task else { break };
            self.run(task);
            self.cv.notify_all();
        }
    }

    fn has_non_exempt_work(&self, state: &SharedState) -> bool {
        state.ready.iter().any(|t| !t.0.reaction.shutdown_exempt)
            || state.main_thread_ready.iter().any(|t| !t.0.reaction.shutdown_exempt)
            || state.groups.values().any(|g| g.waiters.iter().any(|t| !t.0.reaction.shutdown_exempt))
    }

    /// Pops the highest-priority task this worker may run right now,
    /// skipping (and completing as dropped) any task whose reaction was
    /// disabled or whose mutex group is currently held. The main worker
    /// drains its dedicated `MainThread` lane first, then falls back to the
    /// general ready queue -- otherwise a single-worker pool (the common
    /// `thread_count == 1` case) would never dispatch any reaction that
    /// didn't ask for `MainThread`. Non-main workers never touch the
    /// `MainThread` lane, preserving the "restricted to the dedicated
    /// thread" contract.
    fn try_pop(&self, state: &mut SharedState, is_main: bool) -> Option<Task> {
        loop {
            let popped = if is_main {
                state.main_thread_ready.pop().or_else(|| state.ready.pop())
            } else {
                state.ready.pop()
            };
            let Some(ReadyTask(task)) = popped else { return None };

            if state.draining && !task.reaction.shutdown_exempt {
                task.reaction.on_dropped_before_running();
                continue;
            }

            if !task.reaction.is_enabled() {
                task.reaction.on_dropped_before_running();
                continue;
            }

            if let Some(group) = &task.reaction.mutex_group {
                let entry = state.groups.entry(group.clone()).or_default();
                if entry.held {
                    tracing::trace!(task_id = task.id, group = %group, "task gated: mutex group held");
                    entry.waiters.push(ReadyTask(task));
                    continue;
                }
                entry.held = true;
            }

            return Some(task);
        }
    }

    fn run(&self, task: Task) {
        task.reaction.on_running();
        let reaction = task.reaction.clone();
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| reaction.invoke(&task.args)));
        reaction.on_completed();

        if let Err(payload) = result {
            let message = panic_message(&payload);
            tracing::error!(reaction = %reaction.id, reactor = %reaction.reactor_name, %message, "reaction callback panicked");
            if let Some(sink) = self.exception_sink.get() {
                sink(ReactionExceptionEvent { reaction_id: reaction.id, reactor_name: reaction.reactor_name.clone(), message });
            }
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(group) = &reaction.mutex_group {
            self.release_group(&mut state, group);
        }
    }

    /// Releases the group's slot and requeues every parked waiter onto its
    /// normal lane, rather than handing the slot to one waiter directly.
    /// Re-dispatching through `ready`/`main_thread_ready` means the next
    /// worker to pop a requeued task runs it back through `try_pop`'s own
    /// `entry.held` gate -- which re-acquires the now-`false` slot for
    /// exactly one of them and re-parks the rest. Setting `held = true`
    /// here directly (bypassing that gate) would make `try_pop` see the
    /// slot as still taken on the requeued task's next pop and park it
    /// again forever, since nothing would ever call `release_group` for it.
    fn release_group(&self, state: &mut SharedState, group: &MutexGroupKey) {
        let Some(entry) = state.groups.get_mut(group) else { return };
        entry.held = false;
        let waiters = std::mem::take(&mut entry.waiters);
        for ReadyTask(waiter) in waiters {
            if waiter.reaction.main_thread_only {
                state.main_thread_ready.push(ReadyTask(waiter));
            } else {
                state.ready.push(ReadyTask(waiter));
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reaction callback panicked with a non-string payload".to_string()
    }
}
