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

//! An in-process reactive runtime: a type-indexed message bus, a priority
//! thread-pool scheduler, a timer service, and an I/O readiness watcher for
//! assembling concurrent software out of loosely coupled reactors.
//!
//! Start with [`Runtime::new`], install one or more [`Reactor`]s with
//! [`Runtime::install`], then call [`Runtime::start`] to block the calling
//! thread while the pool drains work.

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod io_watcher;
pub mod pipeline;
pub mod reaction;
pub mod reactor;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod timer;
pub mod tracing_logging;
pub mod types;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::RuntimeConfig;
pub use control::{EveryConfiguration, IoConfigure, ReactionExceptionEvent, ShutdownEvent, UnbindIo, UnbindSubscription,
                   UnbindTimer};
pub use error::{ReactorError, Result};
pub use reaction::{InputDescriptor, IoEventInfo, ReactionHandle, ReactionId, ResolvedInput, TimerTickInfo};
pub use reactor::{OnOptions, Reactor, ReactorContext, Runtime};
pub use registry::SubscriptionToken;
pub use types::{type_key_of, MutexGroupKey, Payload, Priority, PriorityClass, Scope, TypeKey};
