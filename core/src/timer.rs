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

//! Timer service (spec §4.5): one dedicated thread owning a min-heap of
//! `(next_fire_time, period, reaction)` entries. Registration and
//! cancellation ride `EveryConfiguration` / `UnbindTimer` control messages
//! published with `Scope::Direct`, observed here via
//! [`EmissionPipeline::subscribe_direct`] rather than through the reaction
//! machinery, so a registration takes effect before the publishing call
//! returns.

use std::{cmp::Reverse,
          collections::BinaryHeap,
          sync::{Arc, Condvar, Mutex},
          thread::{self, JoinHandle},
          time::Instant};

use crate::{clock::Clock,
            control::{EveryConfiguration, UnbindTimer},
            pipeline::EmissionPipeline,
            reaction::{ReactionId, ReactionRecord, TimerTickInfo},
            scheduler::Scheduler,
            task::{TaskContext, TaskFactory}};

struct TimerEntry {
    next_fire: Instant,
    period: std::time::Duration,
    reaction: Arc<ReactionRecord>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool { self.next_fire == other.next_fire }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.next_fire.cmp(&other.next_fire) }
}

struct State {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    shutdown: bool,
}

/// One dedicated thread, sleeping via the configured [`Clock`] until the
/// nearest deadline, then firing every entry due at that instant and
/// re-inserting it with `next_fire += period`.
pub struct TimerService {
    state: Mutex<State>,
    /// Notified on registration/cancellation/shutdown so an idle thread
    /// (no timers registered) wakes promptly instead of polling.
    idle_cv: Condvar,
    clock: Arc<dyn Clock>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("TimerService").finish_non_exhaustive() }
}

impl TimerService {
    pub fn spawn(
        pipeline: &EmissionPipeline,
        scheduler: Arc<Scheduler>,
        factory: Arc<TaskFactory>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            state: Mutex::new(State { heap: BinaryHeap::new(), shutdown: false }),
            idle_cv: Condvar::new(),
            clock,
            handle: Mutex::new(None),
        });

        let register_service = service.clone();
        pipeline.subscribe_direct::<EveryConfiguration, _>(move |config| {
            register_service.register(config.reaction.clone(), config.period);
        });

        let cancel_service = service.clone();
        pipeline.subscribe_direct::<UnbindTimer, _>(move |unbind| {
            cancel_service.cancel(unbind.reaction_id);
        });

        let worker_service = service.clone();
        let handle = thread::Builder::new()
            .name("reactor-timer".to_string())
            .spawn(move || worker_service.worker_loop(scheduler, factory))
            .expect("failed to spawn timer thread");
        *service.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        service
    }

    fn register(&self, reaction: Arc<ReactionRecord>, period: std::time::Duration) {
        tracing::debug!(reaction = %reaction.id, period_ms = period.as_millis(), "timer registered");
        let next_fire = self.clock.now() + period;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.heap.push(Reverse(TimerEntry { next_fire, period, reaction }));
        self.idle_cv.notify_all();
    }

    fn cancel(&self, reaction_id: ReactionId) {
        tracing::debug!(reaction = %reaction_id, "timer cancelled");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let remaining: BinaryHeap<Reverse<TimerEntry>> =
            state.heap.drain().filter(|Reverse(entry)| entry.reaction.id != reaction_id).collect();
        state.heap = remaining;
        self.idle_cv.notify_all();
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shutdown = true;
        self.idle_cv.notify_all();
    }

    fn worker_loop(&self, scheduler: Arc<Scheduler>, factory: Arc<TaskFactory>) {
        loop {
            let next_deadline = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.shutdown {
                    return;
                }
                if state.heap.is_empty() {
                    // Nothing scheduled: block until a registration or shutdown
                    // arrives instead of polling.
                    let (guard, _timed_out) = self
                        .idle_cv
                        .wait_timeout(state, std::time::Duration::from_millis(200))
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                    if state.shutdown {
                        return;
                    }
                }
                state.heap.peek().map(|Reverse(entry)| entry.next_fire)
            };

            let Some(deadline) = next_deadline else { continue };
            self.clock.sleep_until(deadline);
            self.fire_due(&scheduler, &factory);
        }
    }

    fn fire_due(&self, scheduler: &Scheduler, factory: &TaskFactory) {
        let now = self.clock.now();
        let mut due = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            while let Some(Reverse(entry)) = state.heap.peek() {
                if entry.next_fire > now {
                    break;
                }
                let Reverse(entry) = state.heap.pop().expect("peeked entry must be poppable");
                due.push(entry);
            }
        }

        for entry in due {
            let info = TimerTickInfo { scheduled: entry.next_fire, actual: now };
            tracing::trace!(reaction = %entry.reaction.id, drift_us = info.drift().as_micros(), "timer fired");
            let context = TaskContext { timer_tick: Some(info), io_event: None };
            // Timer ticks are not routed through the type registry -- the
            // reaction is bound 1:1 to this entry, so the trigger type/
            // payload are placeholders a `TimerTick`-only reaction never
            // inspects.
            if let Some(task) = factory.try_build(
                &entry.reaction,
                crate::types::type_key_of::<TimerTickInfo>(),
                &crate::types::Payload::new(info),
                &context,
            ) {
                scheduler.submit(task);
            }

            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.shutdown {
                state.heap.push(Reverse(TimerEntry {
                    next_fire: entry.next_fire + entry.period,
                    period: entry.period,
                    reaction: entry.reaction,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::{AtomicU32, Ordering},
              time::Duration};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{clock::VirtualClock,
                reaction::{InputDescriptor, ReactionId, ReactionRecord},
                registry::TypeRegistry,
                types::Priority};

    #[test]
    fn timer_fires_once_per_period_as_virtual_clock_advances() {
        let registry = Arc::new(TypeRegistry::new());
        let factory = Arc::new(TaskFactory::new(registry.clone()));
        let scheduler = Scheduler::new(1);
        let pipeline = EmissionPipeline::new(registry, factory.clone(), scheduler.clone());
        let clock = Arc::new(VirtualClock::new());

        let fire_count = Arc::new(AtomicU32::new(0));
        let fire_count_clone = fire_count.clone();
        let reaction = Arc::new(ReactionRecord::new(
            ReactionId(1),
            Arc::from("r"),
            Priority::NORMAL,
            None,
            false,
            false,
            false,
            vec![InputDescriptor::TimerTick],
            Box::new(move |_| {
                fire_count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let timer = TimerService::spawn(&pipeline, scheduler, factory, clock.clone());
        pipeline.emit(
            crate::types::Payload::new(EveryConfiguration::from_period(reaction, Duration::from_millis(10))),
            crate::types::Scope::Direct,
        );

        for _ in 0..5 {
            clock.advance(Duration::from_millis(10));
            thread::sleep(Duration::from_millis(20));
        }

        assert!(fire_count.load(Ordering::SeqCst) >= 4);
        timer.shutdown();
    }

    #[test]
    fn unbind_timer_stops_future_firings() {
        let registry = Arc::new(TypeRegistry::new());
        let factory = Arc::new(TaskFactory::new(registry.clone()));
        let scheduler = Scheduler::new(1);
        let pipeline = EmissionPipeline::new(registry, factory.clone(), scheduler.clone());
        let clock = Arc::new(VirtualClock::new());

        let fire_count = Arc::new(AtomicU32::new(0));
        let fire_count_clone = fire_count.clone();
        let reaction = Arc::new(ReactionRecord::new(
            ReactionId(7),
            Arc::from("r"),
            Priority::NORMAL,
            None,
            false,
            false,
            false,
            vec![InputDescriptor::TimerTick],
            Box::new(move |_| {
                fire_count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let timer = TimerService::spawn(&pipeline, scheduler, factory, clock.clone());
        pipeline.emit(
            crate::types::Payload::new(EveryConfiguration::from_period(reaction, Duration::from_millis(10))),
            crate::types::Scope::Direct,
        );
        clock.advance(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));

        pipeline.emit(crate::types::Payload::new(UnbindTimer { reaction_id: ReactionId(7) }), crate::types::Scope::Direct);
        let seen_before = fire_count.load(Ordering::SeqCst);
        for _ in 0..5 {
            clock.advance(Duration::from_millis(10));
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fire_count.load(Ordering::SeqCst), seen_before);
        timer.shutdown();
    }
}
