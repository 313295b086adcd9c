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

//! Install-time configuration, validated synchronously (spec §6, §7
//! "Configuration error"). `thread_count` is the only field spec.md names;
//! `queue_capacity_hint` and `default_priority` are additive conveniences
//! that never change behavior when left at their defaults.

use crate::{error::{ReactorError, Result},
            types::Priority};

/// `{ thread_count: positive int }` from spec §6, plus two additive
/// conveniences.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads the scheduler spawns. Must be positive.
    pub thread_count: usize,
    /// Pure performance hint for pre-sizing the ready queue; never a hard
    /// cap on how many tasks may be in flight.
    pub queue_capacity_hint: Option<usize>,
    /// Applied when a reaction's `on(...)` call omits an explicit
    /// `Priority`.
    pub default_priority: Priority,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_count: std::thread::available_parallelism().map(std::num::NonZero::get).unwrap_or(1),
            queue_capacity_hint: None,
            default_priority: Priority::NORMAL,
        }
    }
}

impl RuntimeConfig {
    pub fn new(thread_count: usize) -> Self { Self { thread_count, ..Self::default() } }

    #[must_use]
    pub fn with_queue_capacity_hint(mut self, hint: usize) -> Self {
        self.queue_capacity_hint = Some(hint);
        self
    }

    #[must_use]
    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    /// Reported at installation, fatal to the affected operation only
    /// (spec §7).
    pub(crate) fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(ReactorError::InvalidThreadCount(self.thread_count));
        }
        Ok(())
    }
}
