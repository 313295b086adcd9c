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

//! Type registry & last-value cache: maps a payload type to its
//! subscriber list and an optional cached "last value" cell.

use std::{collections::HashMap,
          sync::{Arc, RwLock}};

use crate::{reaction::{ReactionId, ReactionRecord},
            types::{Payload, TypeKey}};

/// Returned by [`TypeRegistry::subscribe`]; pass back to
/// [`TypeRegistry::unsubscribe`] to remove the subscription.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionToken {
    pub type_key: TypeKey,
    pub reaction_id: ReactionId,
}

#[derive(Debug, Default)]
struct TypeEntry {
    /// Insertion order preserved so priority ties break by registration
    /// order.
    subscribers: RwLock<Vec<Arc<ReactionRecord>>>,
    cache: RwLock<Option<Payload>>,
    /// A transient type's absence from the cache is an acceptable input
    /// rather than a cause for task rejection.
    transient: std::sync::atomic::AtomicBool,
    /// Most types are cacheable by default; a type marked non-cacheable is
    /// never written to its last-value cell even on a `Local` publish.
    non_cacheable: std::sync::atomic::AtomicBool,
}

/// Per-type subscriber lists plus last-value cache cells. Thread-safe
/// under one read-mostly lock per type key; there is no global lock on the
/// hot (publish/snapshot) path beyond that per-type lock.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<TypeKey, Arc<TypeEntry>>>,
}

impl TypeRegistry {
    pub fn new() -> Self { Self::default() }

    fn entry(&self, type_key: TypeKey) -> Arc<TypeEntry> {
        if let Some(entry) = self.entries.read().unwrap_or_else(|e| e.into_inner()).get(&type_key) {
            return entry.clone();
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(type_key).or_default().clone()
    }

    /// Appends `reaction` to the subscriber list for `type_key`.
    pub fn subscribe(&self, type_key: TypeKey, reaction: Arc<ReactionRecord>) -> SubscriptionToken {
        let entry = self.entry(type_key);
        let reaction_id = reaction.id;
        entry.subscribers.write().unwrap_or_else(|e| e.into_inner()).push(reaction);
        SubscriptionToken { type_key, reaction_id }
    }

    /// O(subscribers) removal, safe under the same per-type lock.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let entry = self.entry(token.type_key);
        entry
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|r| r.id != token.reaction_id);
    }

    /// Lock-free from the caller's perspective in spirit (a single
    /// uncontended read lock acquire/release); returns a clone of the
    /// cached payload, if any.
    pub fn snapshot(&self, type_key: TypeKey) -> Option<Payload> {
        self.entry(type_key).cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// If `cacheable`, atomically replaces the cache cell. Returns a
    /// snapshot of the subscriber list taken under the read lock, in
    /// registration order, for the caller to hand to the task factory.
    pub fn publish(
        &self,
        type_key: TypeKey,
        payload: &Payload,
        cacheable: bool,
    ) -> Vec<Arc<ReactionRecord>> {
        let entry = self.entry(type_key);
        if cacheable {
            *entry.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(payload.clone());
        }
        entry.subscribers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn mark_transient(&self, type_key: TypeKey) {
        self.entry(type_key).transient.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_transient(&self, type_key: TypeKey) -> bool {
        self.entry(type_key).transient.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn mark_non_cacheable(&self, type_key: TypeKey) {
        self.entry(type_key).non_cacheable.store(true, std::sync::atomic::Ordering::Release);
    }

    /// Whether a `Local` publish of this type should update the last-value
    /// cache. Defaults to `true` for every type until marked otherwise.
    pub fn is_cacheable(&self, type_key: TypeKey) -> bool {
        !self.entry(type_key).non_cacheable.load(std::sync::atomic::Ordering::Acquire)
    }
}
