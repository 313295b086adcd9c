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

//! Task factory: resolves a reaction's declared inputs into an
//! argument tuple, or silently rejects the prospective task. Rejection is
//! never an error -- see [`crate::error`] for what actually is one.

use std::sync::{atomic::{AtomicU64, Ordering},
                Arc};
use std::time::Instant;

use crate::{reaction::{InputDescriptor, IoEventInfo, ReactionRecord, ResolvedInput, TimerTickInfo},
            registry::TypeRegistry,
            types::{Payload, TypeKey}};

/// Context supplied alongside an emission that isn't a plain bus publish:
/// timer ticks and I/O readiness events ride in here so the factory can
/// resolve `TimerTick` / `IoEvent` inputs.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub timer_tick: Option<TimerTickInfo>,
    pub io_event: Option<IoEventInfo>,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// One scheduled invocation of a reaction. Single-use:
/// once a worker runs it, it is discarded.
pub struct Task {
    pub id: u64,
    pub reaction: Arc<ReactionRecord>,
    pub args: Vec<ResolvedInput>,
    pub assembled_at: Instant,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("reaction", &self.reaction.id)
            .finish_non_exhaustive()
    }
}

/// Stateless; holds no data of its own beyond the type registry it
/// resolves `With`/`Last` inputs against. Safe to share across every
/// emitting thread.
#[derive(Debug)]
pub struct TaskFactory {
    registry: Arc<TypeRegistry>,
}

impl TaskFactory {
    pub fn new(registry: Arc<TypeRegistry>) -> Self { Self { registry } }

    /// Attempts to build a task for `reaction` in response to an emission
    /// of `trigger_type` carrying `primary`. Returns `None` on any
    /// rejection condition; rejection is silent by design.
    pub fn try_build(
        &self,
        reaction: &Arc<ReactionRecord>,
        trigger_type: TypeKey,
        primary: &Payload,
        context: &TaskContext,
    ) -> Option<Task> {
        if !reaction.is_enabled() {
            tracing::trace!(reaction = %reaction.id, "task rejected: reaction disabled");
            return None;
        }
        if reaction.is_single_flight_busy() {
            tracing::trace!(reaction = %reaction.id, "task rejected: single-flight busy");
            return None;
        }

        let mut args = Vec::with_capacity(reaction.inputs.len());

        for (index, input) in reaction.inputs.iter().enumerate() {
            let resolved = match input {
                InputDescriptor::Trigger(type_key) => {
                    if *type_key != trigger_type {
                        return None;
                    }
                    ResolvedInput::Value(primary.clone())
                }
                InputDescriptor::With(type_key) => {
                    let snapshot = if *type_key == trigger_type {
                        Some(primary.clone())
                    } else {
                        self.registry.snapshot(*type_key)
                    };
                    match snapshot {
                        Some(payload) => ResolvedInput::Value(payload),
                        None if self.registry.is_transient(*type_key) => ResolvedInput::Absent,
                        None => {
                            tracing::trace!(reaction = %reaction.id, "task rejected: required With() input absent");
                            return None;
                        }
                    }
                }
                InputDescriptor::Last(type_key, _n) => {
                    // Only extend the window when this build was actually
                    // provoked by a `T` emission -- resolving `Last(T)` as a
                    // side dependency of some other type's trigger must read
                    // the window as it stands, not re-append the same cached
                    // value on every unrelated firing.
                    if *type_key == trigger_type {
                        reaction.record_history(index, primary);
                    }
                    ResolvedInput::History(reaction.history_snapshot(index))
                }
                InputDescriptor::TimerTick => match context.timer_tick {
                    Some(info) => ResolvedInput::Timer(info),
                    None => return None,
                },
                InputDescriptor::IoEvent => match context.io_event {
                    Some(info) => ResolvedInput::Io(info),
                    None => return None,
                },
            };
            args.push(resolved);
        }

        reaction.on_requested();
        tracing::trace!(reaction = %reaction.id, "task accepted");
        Some(Task {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            reaction: reaction.clone(),
            args,
            assembled_at: Instant::now(),
        })
    }
}
