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

//! Monotonic time source, pluggable so the timer service can be driven
//! deterministically in tests instead of sleeping on wall-clock time.

use std::{sync::{Arc, Condvar, Mutex},
          time::{Duration, Instant}};

/// A monotonic clock. `now()` must never go backwards for a given instance.
/// `sleep_until` is what the timer service actually blocks on, so a test
/// double can wake it deterministically instead of the service sleeping on
/// wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;

    /// Blocks the calling thread until `now() >= deadline`.
    fn sleep_until(&self, deadline: Instant);
}

/// The real OS clock. Used by [`crate::reactor::Runtime`] unless a test
/// swaps in a [`VirtualClock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant { Instant::now() }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// A clock whose `now()` only moves when [`VirtualClock::advance`] is
/// called. Lets timer-cadence tests assert exact firing counts instead of
/// tolerating wall-clock jitter. `sleep_until` parks on a condition
/// variable that `advance` notifies, so the timer service thread wakes
/// exactly when the test drives time forward.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    inner: Arc<(Mutex<Instant>, Condvar)>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(Instant::now()), Condvar::new())) }
    }

    pub fn advance(&self, by: Duration) {
        let (lock, cv) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
        cv.notify_all();
    }
}

impl Default for VirtualClock {
    fn default() -> Self { Self::new() }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep_until(&self, deadline: Instant) {
        let (lock, cv) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        while *guard < deadline {
            guard = cv.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }
}
