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

//! Error taxonomy for the runtime. Only the things §7 calls out as errors
//! actually produce a [`ReactorError`]; factory rejections and missing-cache
//! reads are intentionally silent (see [`crate::task`] and [`crate::registry`]).

use thiserror::Error;

/// Errors surfaced synchronously from configuration/installation APIs.
///
/// Everything else the runtime can fail at (factory rejection, missing
/// cache entry, a panicking callback) is handled without an `Err` -- see
/// the module docs on [`crate::task::TaskFactory`] and
/// [`crate::reactor::Runtime`] for where those outcomes go instead.
#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("thread_count must be positive, got {0}")]
    InvalidThreadCount(usize),

    #[error("a reactor named {0:?} is already installed")]
    DuplicateReactorName(std::sync::Arc<str>),

    #[error("invalid file descriptor: {0}")]
    InvalidFd(i32),

    #[error("a lock guarding runtime state was poisoned by a panicking holder")]
    Poison,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReactorError>;
