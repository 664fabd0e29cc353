// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Dedicated worker thread owning a piece of state.
//!
//! Every task posted to a [`Worker`] runs on the same thread, one after the
//! other, in posting order. Results come back through a [`Pending`] handle
//! that can be waited on from a plain thread or awaited from async code.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::common::{BufferError, BufferResult};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Command<S> {
    Run(Task<S>),
    Shutdown,
}

/// Result of a task posted to a worker
#[must_use = "a pending result does nothing unless waited on or awaited"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<BufferResult<T>>,
}

impl<T> Pending<T> {
    /// An already resolved result
    pub fn ready(value: BufferResult<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(value);
        Self { receiver }
    }

    /// Block the calling thread until the task has run.
    ///
    /// Must not be called from within an async runtime; `.await` the pending
    /// result there instead.
    pub fn wait(self) -> BufferResult<T> {
        self.receiver.blocking_recv().map_err(|_| BufferError::WorkerStopped)?
    }
}

impl<T> Future for Pending<T> {
    type Output = BufferResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BufferError::WorkerStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

/// Cloneable sender side of a worker
pub struct WorkerHandle<S> {
    sender: mpsc::UnboundedSender<Command<S>>,
}

impl<S> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}

impl<S: 'static> WorkerHandle<S> {
    /// Queue `task` and return a handle on its result
    pub fn post<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> BufferResult<T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let task: Task<S> = Box::new(move |state| {
            // A panicking task must not take the worker thread down with it
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(state))).unwrap_or_else(|_| {
                error!("worker task panicked");
                Err(BufferError::TaskPanicked)
            });
            // The caller may have dropped its pending handle
            let _ = sender.send(result);
        });

        // A closed channel drops the task and its sender, which resolves the
        // pending result to WorkerStopped
        let _ = self.sender.send(Command::Run(task));
        Pending { receiver }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A thread serializing every access to its state
pub struct Worker<S> {
    handle: WorkerHandle<S>,
    thread: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> Worker<S> {
    pub fn spawn(name: &str, mut state: S) -> BufferResult<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Command<S>>();
        let thread_name = name.to_string();

        let thread = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            debug!(worker = %thread_name, "worker started");
            while let Some(command) = receiver.blocking_recv() {
                match command {
                    Command::Run(task) => task(&mut state),
                    Command::Shutdown => break,
                }
            }
            debug!(worker = %thread_name, "worker stopped");
        })?;

        Ok(Self {
            handle: WorkerHandle { sender },
            thread: Some(thread),
        })
    }
}

impl<S: 'static> Worker<S> {
    pub fn handle(&self) -> &WorkerHandle<S> {
        &self.handle
    }

    pub fn post<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> BufferResult<T> + Send + 'static,
    {
        self.handle.post(task)
    }
}

impl<S> Worker<S> {
    /// Stop the worker once the already queued tasks have run
    pub fn stop(&mut self) {
        let _ = self.handle.sender.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl<S> Drop for Worker<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
