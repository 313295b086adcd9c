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

//! Shapes shared across the whole crate: the type key the bus is indexed
//! by, the opaque payload envelope, priority ordering, and emission scope.

use std::{any::{Any, TypeId},
          sync::Arc};

/// A stable identifier per payload type, obtained at registration time
/// rather than encoded in the type system (either
/// works so long as keys are stable within a process lifetime).
pub type TypeKey = TypeId;

pub fn type_key_of<T: 'static>() -> TypeKey { TypeId::of::<T>() }

/// An opaque, shared, read-only value tagged by its static type. Once
/// published a payload is immutable; cloning the envelope is cheap (it
/// clones the `Arc`), so any number of tasks may hold a reference to the
/// same emission concurrently.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self { Self(Arc::new(value)) }

    pub fn type_key(&self) -> TypeKey { (*self.0).type_id() }

    /// Downcast to the concrete type. Returns `None` if `T` does not match
    /// the type this payload was constructed with.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let any_arc = self.0.clone();
        any_arc.downcast::<T>().ok()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload(type_key={:?})", self.type_key())
    }
}

/// Priority class, ordered REALTIME > HIGH > NORMAL > LOW > IDLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityClass {
    Idle,
    Low,
    Normal,
    High,
    Realtime,
}

impl Default for PriorityClass {
    fn default() -> Self { PriorityClass::Normal }
}

/// A reaction's scheduling priority: a class, with an optional numeric
/// override for fine-grained ordering within (or across) classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Priority {
    pub class: PriorityClass,
    pub numeric: i32,
}

impl Priority {
    pub const fn new(class: PriorityClass, numeric: i32) -> Self { Self { class, numeric } }

    pub const IDLE: Priority = Priority::new(PriorityClass::Idle, 0);
    pub const LOW: Priority = Priority::new(PriorityClass::Low, 0);
    pub const NORMAL: Priority = Priority::new(PriorityClass::Normal, 0);
    pub const HIGH: Priority = Priority::new(PriorityClass::High, 0);
    pub const REALTIME: Priority = Priority::new(PriorityClass::Realtime, 0);
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.class, self.numeric).cmp(&(other.class, other.numeric))
    }
}

/// The mutual-exclusion domain attached to a reaction via `Sync(group)`
/// At most one task bearing a given key runs at a time.
pub type MutexGroupKey = Arc<str>;

/// How a published value is routed through the emission pipeline (spec
/// §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Publish into cache (if cacheable), look up subscribers, enqueue
    /// tasks on the scheduler. The default.
    Local,
    /// Bypass the pool: run every subscriber's factory+callback
    /// synchronously on the publishing thread, in subscription order.
    Direct,
    /// Cache the value but fire no reactions.
    Initialise,
    /// Hand the value to the network reactor; do not fire local
    /// subscribers. The network reactor's internals are out of scope
    /// this crate only guarantees the bus contract.
    Network,
}

impl Default for Scope {
    fn default() -> Self { Scope::Local }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn priority_class_dominates_numeric_override() {
        // §8 invariant 3: class ordering wins even when the lower class
        // carries a larger numeric override.
        let low_class_high_numeric = Priority::new(PriorityClass::Low, 1000);
        let high_class_low_numeric = Priority::new(PriorityClass::High, -1000);
        assert!(high_class_low_numeric > low_class_high_numeric);
    }

    #[test]
    fn numeric_breaks_ties_within_a_class() {
        let a = Priority::new(PriorityClass::Normal, 5);
        let b = Priority::new(PriorityClass::Normal, 10);
        assert!(b > a);
    }

    #[test]
    fn payload_downcast_succeeds_only_for_the_constructing_type() {
        let payload = Payload::new(42u32);
        assert_eq!(*payload.downcast::<u32>().unwrap(), 42);
        assert!(payload.downcast::<u64>().is_none());
    }

    #[test]
    fn payload_type_key_matches_type_key_of() {
        let payload = Payload::new(String::from("hi"));
        assert_eq!(payload.type_key(), type_key_of::<String>());
    }

    #[test]
    fn cloned_payload_shares_the_same_type_key() {
        let payload = Payload::new(7i64);
        let clone = payload.clone();
        assert_eq!(payload.type_key(), clone.type_key());
    }
}
