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

//! Internal control-message payload types. These ride the same bus as user
//! payloads but are always published with `Scope::Direct`: the timer service
//! and I/O watcher subscribe to them directly (bypassing the reaction
//! machinery entirely) so that registering or cancelling a timer/fd watch
//! takes effect before the publishing call returns.

use std::{os::fd::RawFd, sync::Arc, time::Duration};

use crate::reaction::{ReactionId, ReactionRecord};

/// Registers `reaction` with the timer service to fire every `period`.
#[derive(Debug, Clone)]
pub struct EveryConfiguration {
    pub reaction: Arc<ReactionRecord>,
    pub period: Duration,
}

impl EveryConfiguration {
    /// `Every::from_period` entry-point: a raw period between firings.
    pub fn from_period(reaction: Arc<ReactionRecord>, period: Duration) -> Self {
        Self { reaction, period }
    }

    /// `Every::from_frequency` entry-point: firings per second, expressed
    /// the way a caller thinking in rate rather than interval would spell
    /// it. Produces the identical `EveryConfiguration` shape as
    /// `from_period` -- there is no additional runtime surface, only two
    /// builder entry-points feeding the same timer registration.
    pub fn from_frequency(reaction: Arc<ReactionRecord>, hz: f64) -> Self {
        Self { reaction, period: Duration::from_secs_f64(1.0 / hz) }
    }
}

/// Cancels a previously registered timer.
#[derive(Debug, Clone, Copy)]
pub struct UnbindTimer {
    pub reaction_id: ReactionId,
}

/// Registers `reaction` with the I/O watcher for readiness on `fd`.
#[derive(Debug, Clone)]
pub struct IoConfigure {
    pub reaction: Arc<ReactionRecord>,
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// Cancels a previously registered fd watch.
#[derive(Debug, Clone, Copy)]
pub struct UnbindIo {
    pub reaction_id: ReactionId,
}

/// Drops `reaction_id` from a type's subscriber list.
#[derive(Debug, Clone, Copy)]
pub struct UnbindSubscription {
    pub type_key: crate::types::TypeKey,
    pub reaction_id: ReactionId,
}

/// Published on the local bus when a reaction's callback panics. The
/// worker that caught the panic keeps running; the reaction itself is
/// *not* auto-disabled.
#[derive(Debug, Clone)]
pub struct ReactionExceptionEvent {
    pub reaction_id: ReactionId,
    pub reactor_name: Arc<str>,
    pub message: String,
}

/// Published locally before workers stop, giving shutdown-exempt cleanup
/// reactions a chance to run.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownEvent;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::Priority;

    fn test_record() -> Arc<ReactionRecord> {
        Arc::new(ReactionRecord::new(
            ReactionId(1),
            Arc::from("r"),
            Priority::NORMAL,
            None,
            false,
            false,
            false,
            Vec::new(),
            Box::new(|_| {}),
        ))
    }

    #[test]
    fn from_period_keeps_the_given_duration() {
        let config = EveryConfiguration::from_period(test_record(), Duration::from_millis(250));
        assert_eq!(config.period, Duration::from_millis(250));
    }

    #[test]
    fn from_frequency_inverts_hz_into_a_period() {
        let config = EveryConfiguration::from_frequency(test_record(), 10.0);
        assert_eq!(config.period, Duration::from_millis(100));
    }

    #[test]
    fn from_frequency_and_from_period_agree_on_the_same_rate() {
        let by_period = EveryConfiguration::from_period(test_record(), Duration::from_millis(20));
        let by_frequency = EveryConfiguration::from_frequency(test_record(), 50.0);
        assert_eq!(by_period.period, by_frequency.period);
    }
}
