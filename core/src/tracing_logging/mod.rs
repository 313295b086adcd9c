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

//! Structured logging setup, grounded on `terminal_async::tracing_logging`.
//! The runtime emits `tracing` events at levels from `trace` (per-task
//! bookkeeping in [`crate::task`] and [`crate::scheduler`]) to `warn`
//! (degraded I/O watcher availability) to `error` (captured callback
//! panics); this module only wires up *where those events go*.

pub mod init_tracing;
pub mod rolling_file_appender_impl;
pub mod tracing_config;

pub use init_tracing::*;
pub use tracing_config::*;
