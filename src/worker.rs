//! Background compilation worker
//!
//! One dedicated thread runs builds strictly one at a time. Requests are
//! coalesced: `submit` replaces the pending request instead of queueing it,
//! so a burst of file changes costs at most one extra build. A build that
//! already started always runs to completion.
//!
//! Results come back as [`WorkerEvent`]s over a channel; `submit` never waits
//! for a build.

use crate::cache::CacheDir;
use crate::compiler::{CompileRequest, CompileResult, Compiler};
use crate::settings::Toolchain;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Progress notifications, in order `Started` then `Finished` per request
#[derive(Debug)]
pub enum WorkerEvent {
    Started(CompileRequest),
    Finished(CompileRequest, CompileResult),
}

#[derive(Default)]
struct Queue {
    pending: Option<CompileRequest>,
    quit: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Worker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread building inside `cache`
    pub fn spawn(
        cache: Arc<CacheDir>,
        toolchain: Toolchain,
    ) -> std::io::Result<(Self, Receiver<WorkerEvent>)> {
        Self::with_compiler(Compiler::new(cache, toolchain))
    }

    pub fn with_compiler(compiler: Compiler) -> std::io::Result<(Self, Receiver<WorkerEvent>)> {
        let shared = Arc::new(Shared::default());
        let (events_tx, events_rx) = unbounded();

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("livedsp-compiler".to_string())
            .spawn(move || Worker::run(&thread_shared, &compiler, &events_tx))?;

        Ok((
            Self {
                shared,
                thread: Some(thread),
            },
            events_rx,
        ))
    }

    /// Schedule `request`, replacing any request that has not started yet
    pub fn submit(&self, request: CompileRequest) {
        let mut queue = self.shared.lock();
        if let Some(dropped) = queue.pending.replace(request) {
            debug!("Superseded pending build of {}", dropped.source.display());
        }
        self.shared.wake.notify_one();
    }

    fn run(shared: &Shared, compiler: &Compiler, events: &Sender<WorkerEvent>) {
        while let Some(request) = Self::next_request(shared) {
            if events.send(WorkerEvent::Started(request.clone())).is_err() {
                break;
            }
            let result = compiler.compile(&request);
            if events.send(WorkerEvent::Finished(request, result)).is_err() {
                break;
            }
        }
        info!("Compilation worker stopped");
    }

    /// Block until a request is pending; `None` once asked to quit
    fn next_request(shared: &Shared) -> Option<CompileRequest> {
        let mut queue = shared.lock();
        loop {
            if queue.quit {
                return None;
            }
            if let Some(request) = queue.pending.take() {
                return Some(request);
            }
            queue = shared
                .wake
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.lock();
            queue.quit = true;
            queue.pending = None;
        }
        self.shared.wake.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
