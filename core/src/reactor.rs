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

//! External interfaces (spec §6) and reactor container (spec §4.7): the
//! [`Runtime`] owns every installed reactor's reaction records and
//! coordinates shutdown; [`ReactorContext`] is the back-reference a reactor
//! receives during installation.

use std::{any::Any,
          collections::HashSet,
          sync::{atomic::{AtomicU64, Ordering},
                  Arc,
                  Mutex}};

use crate::{clock::{Clock, SystemClock},
            config::RuntimeConfig,
            control::{IoConfigure, ReactionExceptionEvent, ShutdownEvent, UnbindIo, UnbindSubscription, UnbindTimer},
            error::{ReactorError, Result},
            io_watcher::{self, IoWatcher},
            pipeline::EmissionPipeline,
            reaction::{InputDescriptor, ReactionCallback, ReactionHandle, ReactionId, ReactionRecord, ResolvedInput},
            registry::TypeRegistry,
            scheduler::Scheduler,
            task::TaskFactory,
            timer::TimerService,
            types::{type_key_of, MutexGroupKey, Payload, Priority, Scope}};

/// Options recognised by `ReactorContext::on` (spec §6, "Reactor-facing").
#[derive(Debug, Clone, Default)]
pub struct OnOptions {
    priority: Option<Priority>,
    mutex_group: Option<MutexGroupKey>,
    single_flight: bool,
    main_thread: bool,
    shutdown_exempt: bool,
}

impl OnOptions {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// `Sync(group)`: attach a mutex-group key.
    #[must_use]
    pub fn sync(mut self, group: impl Into<MutexGroupKey>) -> Self {
        self.mutex_group = Some(group.into());
        self
    }

    /// `Single`: single-flight.
    #[must_use]
    pub fn single(mut self) -> Self {
        self.single_flight = true;
        self
    }

    /// `MainThread`: restrict dispatch to the dedicated main worker.
    #[must_use]
    pub fn main_thread(mut self) -> Self {
        self.main_thread = true;
        self
    }

    /// Keeps this reaction's tasks flowing during shutdown drain, for
    /// cleanup reactions that must observe [`crate::control::ShutdownEvent`].
    #[must_use]
    pub fn shutdown_exempt(mut self) -> Self {
        self.shutdown_exempt = true;
        self
    }
}

struct RuntimeInner {
    registry: Arc<TypeRegistry>,
    factory: Arc<TaskFactory>,
    scheduler: Arc<Scheduler>,
    pipeline: Arc<EmissionPipeline>,
    timer: Arc<TimerService>,
    io: Option<Arc<IoWatcher>>,
    clock: Arc<dyn Clock>,
    default_priority: Priority,
    next_reaction_id: AtomicU64,
    reactor_names: Mutex<HashSet<Arc<str>>>,
    /// Lifetime owner of reactors installed by user code (spec §4.7): kept
    /// alive for as long as the runtime is, type-erased since `Runtime` is
    /// generic over no particular `Reactor` implementation.
    installed: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
}

impl RuntimeInner {
    fn next_reaction_id(&self) -> ReactionId {
        ReactionId(self.next_reaction_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register_reaction(
        &self,
        reactor_name: Arc<str>,
        inputs: Vec<InputDescriptor>,
        mut options: OnOptions,
        callback: Box<ReactionCallback>,
    ) -> ReactionHandle {
        // IO reactions are implicitly single-flight (spec §4.6): the
        // watcher must not re-fire while the previous readiness is still
        // unserviced.
        if inputs.iter().any(|input| matches!(input, InputDescriptor::IoEvent)) {
            options.single_flight = true;
        }

        let id = self.next_reaction_id();
        let record = Arc::new(ReactionRecord::new(
            id,
            reactor_name,
            options.priority.unwrap_or(self.default_priority),
            options.mutex_group,
            options.single_flight,
            options.main_thread,
            options.shutdown_exempt,
            inputs.clone(),
            callback,
        ));

        let mut subscriptions = Vec::new();
        for input in &inputs {
            let type_key = match input {
                InputDescriptor::Trigger(key) | InputDescriptor::With(key) | InputDescriptor::Last(key, _) => *key,
                InputDescriptor::TimerTick | InputDescriptor::IoEvent => continue,
            };
            subscriptions.push(self.registry.subscribe(type_key, record.clone()));
        }

        let registry = self.registry.clone();
        record.push_unbinder(Box::new(move || {
            for token in subscriptions {
                registry.unsubscribe(token);
            }
        }));

        ReactionHandle::new(&record)
    }
}

/// The runtime: owns the thread pool, the type-indexed message bus, the
/// timer wheel, and the I/O watcher (spec §2). `install`/`emit`/`start`/
/// `shutdown` are the whole user-facing surface (spec §6).
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("Runtime").finish_non_exhaustive() }
}

impl Runtime {
    /// Builds the runtime with the real OS clock. Fails only on
    /// configuration errors (spec §7), synchronously.
    pub fn new(config: RuntimeConfig) -> Result<Self> { Self::with_clock(config, Arc::new(SystemClock)) }

    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(TypeRegistry::new());
        let factory = Arc::new(TaskFactory::new(registry.clone()));
        let scheduler = Scheduler::new(config.thread_count);
        let pipeline = EmissionPipeline::new(registry.clone(), factory.clone(), scheduler.clone());
        let timer = TimerService::spawn(&pipeline, scheduler.clone(), factory.clone(), clock.clone());
        let io = match IoWatcher::spawn(&pipeline, scheduler.clone(), factory.clone()) {
            Ok(watcher) => Some(watcher),
            Err(error) => {
                tracing::warn!(%error, "I/O watcher unavailable on this host; IO reactions will never fire");
                None
            }
        };

        let exception_pipeline = pipeline.clone();
        scheduler.set_exception_sink(Box::new(move |event: ReactionExceptionEvent| {
            exception_pipeline.emit(Payload::new(event), Scope::Local);
        }));

        let unbind_registry = registry.clone();
        pipeline.subscribe_direct::<UnbindSubscription, _>(move |unbind| {
            unbind_registry.unsubscribe(crate::registry::SubscriptionToken {
                type_key: unbind.type_key,
                reaction_id: unbind.reaction_id,
            });
        });

        let inner = Arc::new(RuntimeInner {
            registry,
            factory,
            scheduler,
            pipeline,
            timer,
            io,
            clock,
            next_reaction_id: AtomicU64::new(1),
            reactor_names: Mutex::new(HashSet::new()),
            installed: Mutex::new(Vec::new()),
        });

        Ok(Self { inner })
    }

    /// Installs a reactor: hands it a [`ReactorContext`] back-reference and
    /// lets it register its reactions during construction. Installation is
    /// `Direct` -- complete before this call returns (spec §4.7).
    pub fn install<R: Reactor>(&self, name: impl Into<Arc<str>>) -> Result<Arc<R>> {
        let name = name.into();
        {
            let mut names = self.inner.reactor_names.lock().unwrap_or_else(|e| e.into_inner());
            if !names.insert(name.clone()) {
                return Err(ReactorError::DuplicateReactorName(name));
            }
        }

        let context = ReactorContext { runtime: self.inner.clone(), reactor_name: name };
        let reactor = Arc::new(R::install(&context));
        self.inner.installed.lock().unwrap_or_else(|e| e.into_inner()).push(Box::new(reactor.clone()));
        Ok(reactor)
    }

    /// Publishes `value` under `scope` (spec §4.4). Never blocks the
    /// publisher and never returns an error (spec §7).
    pub fn emit<T: Send + Sync + 'static>(&self, value: T, scope: Scope) {
        self.inner.pipeline.emit(Payload::new(value), scope);
    }

    /// Marks a type's cache as non-cacheable; a `Local` publish of it never
    /// updates the last-value cell.
    pub fn mark_non_cacheable<T: 'static>(&self) { self.inner.registry.mark_non_cacheable(type_key_of::<T>()); }

    /// Marks a type transient (spec §9, Open Question (b)): a `With(T)`
    /// whose cache is empty passes `null` through instead of rejecting the
    /// task.
    pub fn mark_transient<T: 'static>(&self) { self.inner.registry.mark_transient(type_key_of::<T>()); }

    pub fn clock(&self) -> Arc<dyn Clock> { self.inner.clock.clone() }

    /// Blocks until [`Runtime::shutdown`] is called and the pool drains
    /// (spec §6). Reactors are expected to be installed and timers/IO
    /// configured before calling this.
    pub fn start(&self) {
        self.inner.scheduler.join();
    }

    /// Marks the pool as draining, publishes [`ShutdownEvent`] so
    /// shutdown-exempt cleanup reactions can run, then stops the timer and
    /// I/O threads (spec §5, "Shutdown"). Infallible.
    pub fn shutdown(&self) {
        self.inner.pipeline.emit(Payload::new(ShutdownEvent), Scope::Local);
        self.inner.scheduler.begin_shutdown();
        self.inner.timer.shutdown();
        if let Some(io) = &self.inner.io {
            io.shutdown();
        }
    }
}

/// Back-reference a reactor receives during installation (spec §6,
/// "Reactor-facing"): emit, declare reactions, read-only clock access. A
/// non-owning reference -- the runtime is the sole owner of reactors, not
/// the other way around (spec §9, "Weak back-references").
pub struct ReactorContext {
    runtime: Arc<RuntimeInner>,
    reactor_name: Arc<str>,
}

impl std::fmt::Debug for ReactorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorContext").field("reactor_name", &self.reactor_name).finish_non_exhaustive()
    }
}

impl ReactorContext {
    pub fn emit<T: Send + Sync + 'static>(&self, value: T, scope: Scope) {
        self.runtime.pipeline.emit(Payload::new(value), scope);
    }

    pub fn clock(&self) -> &dyn Clock { self.runtime.clock.as_ref() }

    /// Declares a reaction: `inputs` resolved in declaration order into the
    /// argument tuple the callback is invoked with (spec §3, "Input
    /// descriptor"). Returns a [`ReactionHandle`] supporting enable/
    /// disable/unbind.
    pub fn on(
        &self,
        inputs: Vec<InputDescriptor>,
        options: OnOptions,
        callback: impl Fn(&[ResolvedInput]) + Send + Sync + 'static,
    ) -> ReactionHandle {
        self.runtime.register_reaction(self.reactor_name.clone(), inputs, options, Box::new(callback))
    }

    /// Registers `reaction` with the timer service to fire every `period`
    /// (spec §4.5). The returned unbinder is also attached to `handle` --
    /// calling `handle.unbind()` cancels the timer.
    pub fn every(&self, handle: &ReactionHandle, period: std::time::Duration) {
        let Some(record) = handle.record() else { return };
        let reaction_id = record.id;
        self.emit(
            crate::control::EveryConfiguration::from_period(record, period),
            Scope::Direct,
        );
        let unbind_runtime = self.runtime.clone();
        if let Some(record) = handle.record() {
            record.push_unbinder(Box::new(move || {
                unbind_runtime.pipeline.emit(Payload::new(UnbindTimer { reaction_id }), Scope::Direct);
            }));
        }
    }

    /// Registers `reaction` with the I/O watcher for readiness on `fd`
    /// (spec §4.6). Validates `fd` per spec §7.
    pub fn watch_fd(
        &self,
        handle: &ReactionHandle,
        fd: std::os::fd::RawFd,
        readable: bool,
        writable: bool,
    ) -> Result<()> {
        io_watcher::validate_fd(fd)?;
        let Some(record) = handle.record() else { return Ok(()) };
        let reaction_id = record.id;
        self.emit(IoConfigure { reaction: record, fd, readable, writable }, Scope::Direct);
        let unbind_runtime = self.runtime.clone();
        if let Some(record) = handle.record() {
            record.push_unbinder(Box::new(move || {
                unbind_runtime.pipeline.emit(Payload::new(UnbindIo { reaction_id }), Scope::Direct);
            }));
        }
        Ok(())
    }
}

/// A user-defined collection of reactions sharing installation and
/// shutdown lifetime (spec §4.7, GLOSSARY).
pub trait Reactor: Send + Sync + 'static {
    fn install(context: &ReactorContext) -> Self
    where
        Self: Sized;
}
