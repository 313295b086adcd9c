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

//! End-to-end scenarios exercising whole-runtime behavior rather than one
//! module in isolation: double-triggering, missing `With()` inputs,
//! `Last(N, T)` windows, mutex-group serialisation, timer cadence, and
//! handle-disable-before-emit.

use std::{sync::{Arc, Mutex},
          thread,
          time::{Duration, Instant}};

use pretty_assertions::assert_eq;
use r3bl_reactor::{type_key_of, InputDescriptor, OnOptions, Reactor, ReactorContext, ResolvedInput, Runtime, RuntimeConfig,
                    Scope, VirtualClock};

fn settle() { thread::sleep(Duration::from_millis(80)); }

mod double_trigger {
    use super::*;

    #[derive(Clone, Copy)]
    struct A(u32);
    #[derive(Clone, Copy)]
    struct B(u32);

    struct Recorder {
        r1: Arc<Mutex<Vec<(u32, u32)>>>,
        r2: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl Reactor for Recorder {
        fn install(context: &ReactorContext) -> Self {
            let r1 = Arc::new(Mutex::new(Vec::new()));
            let r2 = Arc::new(Mutex::new(Vec::new()));

            let r1_clone = r1.clone();
            context.on(
                vec![InputDescriptor::Trigger(type_key_of::<A>()), InputDescriptor::With(type_key_of::<B>())],
                OnOptions::new(),
                move |args| {
                    let ResolvedInput::Value(a) = &args[0] else { panic!("expected trigger") };
                    let ResolvedInput::Value(b) = &args[1] else { panic!("expected with") };
                    let a = a.downcast::<A>().unwrap();
                    let b = b.downcast::<B>().unwrap();
                    r1_clone.lock().unwrap().push((a.0, b.0));
                },
            );

            let r2_clone = r2.clone();
            context.on(
                vec![InputDescriptor::Trigger(type_key_of::<B>()), InputDescriptor::With(type_key_of::<A>())],
                OnOptions::new(),
                move |args| {
                    let ResolvedInput::Value(b) = &args[0] else { panic!("expected trigger") };
                    let ResolvedInput::Value(a) = &args[1] else { panic!("expected with") };
                    let b = b.downcast::<B>().unwrap();
                    let a = a.downcast::<A>().unwrap();
                    r2_clone.lock().unwrap().push((b.0, a.0));
                },
            );

            Self { r1, r2 }
        }
    }

    /// S1: `emit(A1); emit(B1); emit(A2)`. R1 (Trigger(A)+With(B)) is
    /// rejected at `emit(A1)` since `B` has no cached value yet, then fires
    /// at `emit(A2)` with `(A2, B1)`. R2 (Trigger(B)+With(A)) fires once at
    /// `emit(B1)` with `(B1, A1)`, since `A` already has a cached value by
    /// then. `emit(B1)` does not re-trigger R1 -- its `Trigger` input keys
    /// on `A`, not `B`, regardless of R1 also subscribing to `B` for its
    /// `With` input.
    #[test]
    fn double_trigger_sequence() {
        let runtime = Runtime::new(RuntimeConfig::new(2)).unwrap();
        let recorder = runtime.install::<Recorder>("recorder").unwrap();

        runtime.emit(A(1), Scope::Local);
        settle();
        runtime.emit(B(1), Scope::Local);
        settle();
        runtime.emit(A(2), Scope::Local);
        settle();

        assert_eq!(*recorder.r2.lock().unwrap(), vec![(1, 1)]);
        assert_eq!(*recorder.r1.lock().unwrap(), vec![(2, 1)]);
        runtime.shutdown();
    }
}

mod missing_with {
    use super::*;

    #[derive(Clone, Copy)]
    struct A(u32);
    #[derive(Clone, Copy)]
    struct B(u32);

    struct Recorder {
        fired: Arc<Mutex<u32>>,
    }

    impl Reactor for Recorder {
        fn install(context: &ReactorContext) -> Self {
            let fired = Arc::new(Mutex::new(0));
            let fired_clone = fired.clone();
            context.on(
                vec![InputDescriptor::Trigger(type_key_of::<A>()), InputDescriptor::With(type_key_of::<B>())],
                OnOptions::new(),
                move |_args| {
                    *fired_clone.lock().unwrap() += 1;
                },
            );
            Self { fired }
        }
    }

    /// S2: only `emit(A1)` is issued; R1 requires `With(B)` which is
    /// absent, so it must never fire.
    #[test]
    fn reaction_with_absent_required_input_never_fires() {
        let runtime = Runtime::new(RuntimeConfig::new(1)).unwrap();
        let recorder = runtime.install::<Recorder>("recorder").unwrap();

        runtime.emit(A(1), Scope::Local);
        settle();

        assert_eq!(*recorder.fired.lock().unwrap(), 0);
        runtime.shutdown();
    }
}

mod last_n {
    use super::*;

    #[derive(Clone, Copy)]
    struct A(u32);

    struct Recorder {
        windows: Arc<Mutex<Vec<Vec<u32>>>>,
    }

    impl Reactor for Recorder {
        fn install(context: &ReactorContext) -> Self {
            let windows = Arc::new(Mutex::new(Vec::new()));
            let windows_clone = windows.clone();
            context.on(
                vec![InputDescriptor::Last(type_key_of::<A>(), 3)],
                OnOptions::new(),
                move |args| {
                    let ResolvedInput::History(values) = &args[0] else { panic!("expected history") };
                    let values: Vec<u32> = values.iter().map(|p| p.downcast::<A>().unwrap().0).collect();
                    windows_clone.lock().unwrap().push(values);
                },
            );
            Self { windows }
        }
    }

    /// S3: `Last(3, A)` over `emit(A1..A5)` produces the five sliding
    /// windows ending at each emission, capped at length 3.
    #[test]
    fn last_three_produces_sliding_windows() {
        let runtime = Runtime::new(RuntimeConfig::new(1)).unwrap();
        let recorder = runtime.install::<Recorder>("recorder").unwrap();

        for value in 1..=5u32 {
            runtime.emit(A(value), Scope::Local);
            settle();
        }

        let windows = recorder.windows.lock().unwrap().clone();
        assert_eq!(
            windows,
            vec![vec![1], vec![1, 2], vec![1, 2, 3], vec![2, 3, 4], vec![3, 4, 5]]
        );
        runtime.shutdown();
    }
}

mod sync_group {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Clone, Copy)]
    struct Kick(u32);

    struct Sleepers {
        ran: Arc<AtomicU32>,
    }

    impl Reactor for Sleepers {
        fn install(context: &ReactorContext) -> Self {
            let ran = Arc::new(AtomicU32::new(0));
            for _ in 0..2 {
                let ran_clone = ran.clone();
                context.on(
                    vec![InputDescriptor::Trigger(type_key_of::<Kick>())],
                    OnOptions::new().sync("group-g"),
                    move |_args| {
                        thread::sleep(Duration::from_millis(50));
                        ran_clone.fetch_add(1, Ordering::SeqCst);
                    },
                );
            }
            Self { ran }
        }
    }

    /// S4: two reactions sharing mutex-group G, each sleeping 50ms, run
    /// serialised even with two workers available -- total wall-clock is
    /// at least 100ms, not 50ms, and (serialised-but-still-run) both must
    /// actually complete rather than the second waiter being stranded.
    #[test]
    fn shared_mutex_group_serialises_execution() {
        let runtime = Runtime::new(RuntimeConfig::new(2)).unwrap();
        let sleepers = runtime.install::<Sleepers>("sleepers").unwrap();

        let start = Instant::now();
        runtime.emit(Kick(1), Scope::Local);
        thread::sleep(Duration::from_millis(250));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100), "expected serialised execution, took {elapsed:?}");
        assert_eq!(sleepers.ran.load(Ordering::SeqCst), 2, "both grouped reactions must run, not just the first");
        runtime.shutdown();
    }
}

mod timer_cadence {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Ticker {
        count: Arc<AtomicU32>,
    }

    impl Reactor for Ticker {
        fn install(context: &ReactorContext) -> Self {
            let count = Arc::new(AtomicU32::new(0));
            let count_clone = count.clone();
            let handle = context.on(vec![InputDescriptor::TimerTick], OnOptions::new(), move |_args| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
            context.every(&handle, Duration::from_millis(100));
            Self { count }
        }
    }

    /// S5: `Every(period=100ms)` observed for 1s of virtual time, advanced
    /// in 100ms steps, should fire 9 to 11 times.
    #[test]
    fn timer_fires_within_expected_window() {
        let clock = Arc::new(VirtualClock::new());
        let runtime = Runtime::with_clock(RuntimeConfig::new(1), clock.clone()).unwrap();
        let ticker = runtime.install::<Ticker>("ticker").unwrap();

        for _ in 0..10 {
            clock.advance(Duration::from_millis(100));
            thread::sleep(Duration::from_millis(15));
        }

        let fired = ticker.count.load(Ordering::SeqCst);
        assert!((8..=11).contains(&fired), "expected roughly 9-10 firings, got {fired}");
        runtime.shutdown();
    }
}

mod disable_before_emit {
    use super::*;

    #[derive(Clone, Copy)]
    struct Kick;

    struct FailingReactor;

    impl Reactor for FailingReactor {
        fn install(context: &ReactorContext) -> Self {
            let handle = context.on(vec![InputDescriptor::Trigger(type_key_of::<Kick>())], OnOptions::new(), |_args| {
                panic!("this reaction must never run");
            });
            // Disabled during installation, strictly before any emission
            // this test issues.
            handle.disable();
            Self
        }
    }

    /// S6: a reaction whose body always panics is disabled before the
    /// triggering emission; `shutdown()` completes without the body ever
    /// running.
    #[test]
    fn disabled_reaction_handle_suppresses_failing_body() {
        let runtime = Runtime::new(RuntimeConfig::new(1)).unwrap();
        runtime.install::<FailingReactor>("failing").unwrap();

        runtime.emit(Kick, Scope::Local);
        settle();
        runtime.shutdown();
    }
}

mod unbind_quiescence {
    use super::*;

    #[derive(Clone, Copy)]
    struct Kick(u32);

    struct Watcher {
        handle: r3bl_reactor::ReactionHandle,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    impl Reactor for Watcher {
        fn install(context: &ReactorContext) -> Self {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen_clone = seen.clone();
            let handle = context.on(vec![InputDescriptor::Trigger(type_key_of::<Kick>())], OnOptions::new(), move |args| {
                let ResolvedInput::Value(v) = &args[0] else { panic!("expected trigger") };
                seen_clone.lock().unwrap().push(v.downcast::<Kick>().unwrap().0);
            });
            Self { handle, seen }
        }
    }

    /// §8 invariant 6: after `unbind` returns and the pool drains, no
    /// further tasks for that reaction are dispatched -- emissions
    /// published after unbind must not reach the bus-subscribed callback.
    #[test]
    fn unbind_stops_future_bus_dispatch() {
        let runtime = Runtime::new(RuntimeConfig::new(1)).unwrap();
        let watcher = runtime.install::<Watcher>("watcher").unwrap();

        runtime.emit(Kick(1), Scope::Local);
        settle();
        watcher.handle.unbind();
        runtime.emit(Kick(2), Scope::Local);
        settle();

        assert_eq!(*watcher.seen.lock().unwrap(), vec![1]);
        runtime.shutdown();
    }
}

mod cache_monotonicity {
    use super::*;

    #[derive(Clone, Copy)]
    struct Reading(u32);
    #[derive(Clone, Copy)]
    struct Probe;

    struct Prober {
        observed: Arc<Mutex<Vec<u32>>>,
    }

    impl Reactor for Prober {
        fn install(context: &ReactorContext) -> Self {
            let observed = Arc::new(Mutex::new(Vec::new()));
            let observed_clone = observed.clone();
            context.on(
                vec![InputDescriptor::Trigger(type_key_of::<Probe>()), InputDescriptor::With(type_key_of::<Reading>())],
                OnOptions::new(),
                move |args| {
                    let ResolvedInput::Value(reading) = &args[1] else { return };
                    observed_clone.lock().unwrap().push(reading.downcast::<Reading>().unwrap().0);
                },
            );
            Self { observed }
        }
    }

    /// §8 invariant 4: after `emit(v)` returns on a cacheable type, any
    /// subsequent `With` resolution observes either `v` or a later value,
    /// never an earlier one. `emit_local` writes the cache synchronously
    /// before returning, so interleaving `Reading` and `Probe` emissions
    /// from the same thread must never let a later probe see an earlier
    /// reading. A single worker keeps completion order equal to emission
    /// order, so the recorded sequence is a direct, non-flaky check of the
    /// cache write, independent of how the scheduler happens to interleave
    /// unrelated concurrent work.
    #[test]
    fn with_resolution_never_observes_a_stale_reading() {
        let runtime = Runtime::new(RuntimeConfig::new(1)).unwrap();
        let prober = runtime.install::<Prober>("prober").unwrap();

        for value in 1..=20u32 {
            runtime.emit(Reading(value), Scope::Local);
            runtime.emit(Probe, Scope::Local);
        }
        settle();

        let observed = prober.observed.lock().unwrap().clone();
        assert!(!observed.is_empty());
        for pair in observed.windows(2) {
            assert!(pair[1] >= pair[0], "cache went backwards: {observed:?}");
        }
        runtime.shutdown();
    }
}

mod shutdown_event {
    use super::*;

    struct Cleanup {
        ran: Arc<Mutex<bool>>,
    }

    impl Reactor for Cleanup {
        fn install(context: &ReactorContext) -> Self {
            let ran = Arc::new(Mutex::new(false));
            let ran_clone = ran.clone();
            context.on(
                vec![InputDescriptor::Trigger(type_key_of::<r3bl_reactor::ShutdownEvent>())],
                OnOptions::new().shutdown_exempt(),
                move |_args| {
                    *ran_clone.lock().unwrap() = true;
                },
            );
            Self { ran }
        }
    }

    /// spec §5 "Shutdown": a distinguished `ShutdownEvent` is published
    /// locally before workers stop, giving shutdown-exempt cleanup
    /// reactions a chance to run.
    #[test]
    fn shutdown_exempt_reaction_observes_shutdown_event() {
        let runtime = Runtime::new(RuntimeConfig::new(1)).unwrap();
        let cleanup = runtime.install::<Cleanup>("cleanup").unwrap();

        runtime.shutdown();
        settle();

        assert!(*cleanup.ran.lock().unwrap());
    }
}
