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

//! Routes a published value through one of four scopes: `Local` (cache +
//! scheduler), `Direct` (synchronous, bypasses the pool; used for internal
//! control messages), `Initialise` (cache only, fires nothing), and
//! `Network` (handed to the network reactor, out of scope here beyond this
//! contract).

use std::{collections::HashMap,
          panic::{self, AssertUnwindSafe},
          sync::{Arc, RwLock}};

use crate::{control::ReactionExceptionEvent,
            registry::TypeRegistry,
            scheduler::Scheduler,
            task::{TaskContext, TaskFactory},
            types::{type_key_of, Payload, Scope, TypeKey}};

type DirectSink = Arc<dyn Fn(&Payload) + Send + Sync>;
type NetworkSink = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Ties the type registry, task factory, and scheduler together behind the
/// single `emit` entry point reactors and the runtime call.
pub struct EmissionPipeline {
    registry: Arc<TypeRegistry>,
    factory: Arc<TaskFactory>,
    scheduler: Arc<Scheduler>,
    direct_sinks: RwLock<HashMap<TypeKey, Vec<DirectSink>>>,
    network_sink: RwLock<Option<NetworkSink>>,
}

impl std::fmt::Debug for EmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("EmissionPipeline").finish_non_exhaustive() }
}

impl EmissionPipeline {
    pub fn new(registry: Arc<TypeRegistry>, factory: Arc<TaskFactory>, scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            factory,
            scheduler,
            direct_sinks: RwLock::new(HashMap::new()),
            network_sink: RwLock::new(None),
        })
    }

    pub fn emit(&self, payload: Payload, scope: Scope) {
        match scope {
            Scope::Local => self.emit_local(&payload),
            Scope::Direct => self.emit_direct(&payload),
            Scope::Initialise => {
                let type_key = payload.type_key();
                self.registry.publish(type_key, &payload, true);
            }
            Scope::Network => self.emit_network(&payload),
        }
    }

    /// Publish into cache (if the type is cacheable), look up subscribers,
    /// ask the factory to build tasks, enqueue onto the scheduler.
    fn emit_local(&self, payload: &Payload) {
        let type_key = payload.type_key();
        let cacheable = self.registry.is_cacheable(type_key);
        let subscribers = self.registry.publish(type_key, payload, cacheable);
        for reaction in subscribers {
            if let Some(task) = self.factory.try_build(&reaction, type_key, payload, &TaskContext::default()) {
                self.scheduler.submit(task);
            }
        }
    }

    /// Bypass the pool: run every matching direct sink, then every matching
    /// reaction's factory+callback synchronously, in subscription order, on
    /// the publishing thread. The cache is left untouched -- internal
    /// control messages are not meant to be read back via `With`.
    fn emit_direct(&self, payload: &Payload) {
        let type_key = payload.type_key();

        let sinks = self.direct_sinks.read().unwrap_or_else(|e| e.into_inner()).get(&type_key).cloned();
        if let Some(sinks) = sinks {
            for sink in sinks {
                sink(payload);
            }
        }

        let subscribers = self.registry.publish(type_key, payload, false);
        for reaction in subscribers {
            let Some(task) = self.factory.try_build(&reaction, type_key, payload, &TaskContext::default()) else {
                continue;
            };
            reaction.on_running();
            let result = panic::catch_unwind(AssertUnwindSafe(|| reaction.invoke(&task.args)));
            reaction.on_completed();
            if let Err(cause) = result {
                let message = cause
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "reaction callback panicked with a non-string payload".to_string());
                self.emit(
                    Payload::new(ReactionExceptionEvent {
                        reaction_id: reaction.id,
                        reactor_name: reaction.reactor_name.clone(),
                        message,
                    }),
                    Scope::Local,
                );
            }
        }
    }

    fn emit_network(&self, payload: &Payload) {
        if let Some(sink) = self.network_sink.read().unwrap_or_else(|e| e.into_inner()).clone() {
            sink(payload);
        }
    }

    /// Registers a listener invoked synchronously, in registration order,
    /// whenever a `T` is published with `Scope::Direct`. Used by the timer
    /// service and I/O watcher to observe their configuration control
    /// messages without going through the reaction machinery.
    pub fn subscribe_direct<T, F>(&self, sink: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        let type_key = type_key_of::<T>();
        let wrapped: DirectSink = Arc::new(move |payload: &Payload| {
            if let Some(value) = payload.downcast::<T>() {
                sink(&value);
            }
        });
        self.direct_sinks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(type_key)
            .or_default()
            .push(wrapped);
    }

    pub fn set_network_sink<F>(&self, sink: F)
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        *self.network_sink.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(sink));
    }
}
