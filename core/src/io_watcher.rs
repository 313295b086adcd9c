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

//! I/O watcher (spec §4.6): one dedicated thread running `mio`'s
//! cross-platform readiness multiplexer (epoll on Linux, kqueue on BSD/
//! macOS). The watched set is a map `fd -> (interest, reaction)`.
//! Registration and cancellation ride `IoConfigure` / `UnbindIo` control
//! messages published `Scope::Direct`; a [`mio::Waker`] interrupts a
//! blocked `poll()` call so a new registration takes effect immediately,
//! the same pattern `tui`'s resilient-reactor-thread module uses to wake a
//! thread parked in `mio::Poll::poll()`.
//!
//! The watcher never drains the fd itself -- the reaction's callback is
//! expected to consume the readiness. IO reactions are forced single-flight
//! at registration (see [`crate::reactor`]) so the watcher cannot re-fire
//! while a handler still owes a read.

use std::{collections::HashMap,
          os::fd::RawFd,
          sync::{Arc, Mutex},
          thread::{self, JoinHandle}};

use mio::{unix::SourceFd, Events, Interest, Poll, Token, Waker};

use crate::{control::{IoConfigure, UnbindIo},
            error::{ReactorError, Result},
            pipeline::EmissionPipeline,
            reaction::{IoEventInfo, ReactionId, ReactionRecord},
            scheduler::Scheduler,
            task::{TaskContext, TaskFactory}};

const WAKE_TOKEN: Token = Token(usize::MAX);

enum PendingOp {
    Register { fd: RawFd, interest: Interest, reaction: Arc<ReactionRecord> },
    Cancel(ReactionId),
}

struct Watched {
    reaction: Arc<ReactionRecord>,
}

struct State {
    pending: Vec<PendingOp>,
    watched: HashMap<RawFd, Watched>,
    shutdown: bool,
}

/// Dedicated fd-readiness thread. Every emission the watcher produces rides
/// the normal scheduler (priority, mutex-group gating) rather than running
/// inline on the watcher thread.
pub struct IoWatcher {
    state: Mutex<State>,
    waker: Arc<Waker>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IoWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("IoWatcher").finish_non_exhaustive() }
}

impl IoWatcher {
    pub fn spawn(
        pipeline: &EmissionPipeline,
        scheduler: Arc<Scheduler>,
        factory: Arc<TaskFactory>,
    ) -> Result<Arc<Self>> {
        let poll = Poll::new().map_err(ReactorError::Io)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).map_err(ReactorError::Io)?);

        let watcher = Arc::new(Self {
            state: Mutex::new(State { pending: Vec::new(), watched: HashMap::new(), shutdown: false }),
            waker,
            handle: Mutex::new(None),
        });

        let register_watcher = watcher.clone();
        pipeline.subscribe_direct::<IoConfigure, _>(move |config| {
            let interest = match (config.readable, config.writable) {
                (true, true) => Interest::READABLE.add(Interest::WRITABLE),
                (true, false) => Interest::READABLE,
                (false, true) => Interest::WRITABLE,
                (false, false) => Interest::READABLE,
            };
            register_watcher.queue(PendingOp::Register {
                fd: config.fd,
                interest,
                reaction: config.reaction.clone(),
            });
        });

        let cancel_watcher = watcher.clone();
        pipeline.subscribe_direct::<UnbindIo, _>(move |unbind| {
            cancel_watcher.queue(PendingOp::Cancel(unbind.reaction_id));
        });

        let worker_watcher = watcher.clone();
        let handle = thread::Builder::new()
            .name("reactor-io".to_string())
            .spawn(move || worker_watcher.worker_loop(poll, scheduler, factory))
            .expect("failed to spawn io watcher thread");
        *watcher.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(watcher)
    }

    fn queue(&self, op: PendingOp) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending.push(op);
        drop(state);
        let _ = self.waker.wake();
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shutdown = true;
        drop(state);
        let _ = self.waker.wake();
    }

    fn worker_loop(&self, mut poll: Poll, scheduler: Arc<Scheduler>, factory: Arc<TaskFactory>) {
        let mut events = Events::with_capacity(128);
        loop {
            if poll.poll(&mut events, None).is_err() {
                continue;
            }

            let mut woke = false;
            for event in &events {
                if event.token() == WAKE_TOKEN {
                    woke = true;
                    continue;
                }
                let fd = event.token().0 as RawFd;
                let reaction = {
                    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.watched.get(&fd).map(|w| w.reaction.clone())
                };
                let Some(reaction) = reaction else { continue };
                let info = IoEventInfo { fd, readable: event.is_readable(), writable: event.is_writable() };
                tracing::trace!(reaction = %reaction.id, fd, readable = info.readable, writable = info.writable, "io readiness");
                let context = TaskContext { timer_tick: None, io_event: Some(info) };
                if let Some(task) = factory.try_build(
                    &reaction,
                    crate::types::type_key_of::<IoEventInfo>(),
                    &crate::types::Payload::new(info),
                    &context,
                ) {
                    scheduler.submit(task);
                }
            }

            if woke {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.shutdown {
                    return;
                }
                let pending = std::mem::take(&mut state.pending);
                for op in pending {
                    match op {
                        PendingOp::Register { fd, interest, reaction } => {
                            let mut source = SourceFd(&fd);
                            let token = Token(fd as usize);
                            if poll.registry().register(&mut source, token, interest).is_err() {
                                let _ = poll.registry().reregister(&mut source, token, interest);
                            }
                            state.watched.insert(fd, Watched { reaction });
                        }
                        PendingOp::Cancel(reaction_id) => {
                            let matching: Vec<RawFd> = state
                                .watched
                                .iter()
                                .filter(|(_, w)| w.reaction.id == reaction_id)
                                .map(|(fd, _)| *fd)
                                .collect();
                            for fd in matching {
                                state.watched.remove(&fd);
                                let mut source = SourceFd(&fd);
                                let _ = poll.registry().deregister(&mut source);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Validates a raw fd before it is handed to [`IoWatcher`] (spec §7,
/// "Configuration error: ... invalid fd").
pub fn validate_fd(fd: RawFd) -> Result<()> {
    if fd < 0 {
        return Err(ReactorError::InvalidFd(fd));
    }
    Ok(())
}
