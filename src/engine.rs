//! Asynchronous execution engine.
//!
//! Operator invocations are validated on the caller and then pushed as jobs.
//! A [`EngineKind::Threaded`] engine runs jobs in push order on one worker
//! thread; a [`EngineKind::Naive`] engine runs them immediately on the caller.
//! Either way results must not be inspected before [`Engine::wait_for_all`]
//! returns.
//!
//! Kernel failures (including panics inside a job) are recorded and handed
//! back by the next `wait_for_all`.
//!
//! ## Example
//!
//! ```rust
//! use briny_dispatch::engine::{Engine, EngineKind};
//!
//! let engine = Engine::new(EngineKind::Threaded).unwrap();
//! engine.push(Box::new(|| Ok(())));
//! engine.wait_for_all().unwrap();
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::OpError;

/// Environment variable selecting the global engine kind.
pub const ENGINE_TYPE_VAR: &str = "BRINY_ENGINE_TYPE";

/// A unit of work: one operator invocation.
pub type Job = Box<dyn FnOnce() -> Result<(), OpError> + Send + 'static>;

/// How pushed jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineKind {
    /// One worker thread, jobs run in push order.
    #[default]
    Threaded,
    /// Jobs run synchronously inside [`Engine::push`].
    Naive,
}

impl EngineKind {
    /// Reads [`ENGINE_TYPE_VAR`], falling back to [`EngineKind::Threaded`].
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(ENGINE_TYPE_VAR) {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                log::warn!("{e}; using the threaded engine");
                Self::Threaded
            }),
            Err(_) => Self::Threaded,
        }
    }
}

impl FromStr for EngineKind {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" | "threadedengine" | "threadedengineperdevice" => Ok(Self::Threaded),
            "naive" | "naiveengine" => Ok(Self::Naive),
            other => Err(OpError::Engine(format!("unknown engine type `{other}`"))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threaded => f.write_str("threaded"),
            Self::Naive => f.write_str("naive"),
        }
    }
}

#[derive(Default)]
struct Progress {
    pending: usize,
    first_error: Option<OpError>,
}

#[derive(Default)]
struct Shared {
    progress: Mutex<Progress>,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, result: Result<(), OpError>) {
        let mut progress = self.lock();
        progress.pending = progress.pending.saturating_sub(1);
        if let Err(e) = result {
            log::debug!("engine job failed: {e}");
            progress.first_error.get_or_insert(e);
        }
        if progress.pending == 0 {
            self.idle.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_owned()
    }
}

fn run_job(job: Job) -> Result<(), OpError> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => Err(OpError::Engine(panic_message(payload.as_ref()))),
    }
}

/// Executes operator jobs and tracks their completion.
pub struct Engine {
    kind: EngineKind,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("pending", &self.shared.lock().pending)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine, spawning its worker thread if `kind` needs one.
    ///
    /// # Errors
    /// [`OpError::Engine`] if the worker thread cannot be spawned.
    pub fn new(kind: EngineKind) -> Result<Self, OpError> {
        let shared = Arc::new(Shared::default());
        let (sender, worker) = match kind {
            EngineKind::Naive => (None, None),
            EngineKind::Threaded => {
                let (tx, rx) = mpsc::channel::<Job>();
                let worker_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name("briny-engine".into())
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            worker_shared.finish(run_job(job));
                        }
                        log::debug!("engine worker stopped");
                    })
                    .map_err(|e| OpError::Engine(format!("cannot spawn worker: {e}")))?;
                (Some(tx), Some(handle))
            }
        };
        log::debug!("created {kind} engine");
        Ok(Self {
            kind,
            sender,
            worker,
            shared,
        })
    }

    /// The process-wide engine, created on first use with the kind in
    /// [`SuiteConfig::get`](crate::testing::config::SuiteConfig::get).
    pub fn get() -> &'static Self {
        &ENGINE
    }

    /// How this engine executes jobs.
    #[must_use]
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Schedules `job`.
    pub fn push(&self, job: Job) {
        self.shared.lock().pending += 1;
        let job = match &self.sender {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::SendError(job)) => {
                    log::warn!("engine worker is gone, running job on the caller");
                    job
                }
            },
            None => job,
        };
        self.shared.finish(run_job(job));
    }

    /// Blocks until every pushed job has run.
    ///
    /// # Errors
    /// The first job failure recorded since the previous call.
    pub fn wait_for_all(&self) -> Result<(), OpError> {
        let mut progress = self.shared.lock();
        while progress.pending > 0 {
            progress = self
                .shared
                .idle
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
        progress.first_error.take().map_or(Ok(()), Err)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        drop(self.sender.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

lazy_static::lazy_static! {
    static ref ENGINE: Engine = {
        let kind = crate::testing::config::SuiteConfig::get().engine;
        Engine::new(kind).unwrap_or_else(|e| {
            log::warn!("{e}; falling back to the naive engine");
            Engine {
                kind: EngineKind::Naive,
                sender: None,
                worker: None,
                shared: Arc::new(Shared::default()),
            }
        })
    };
}
