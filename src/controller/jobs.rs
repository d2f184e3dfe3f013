use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use crate::runs::{ApiError, PromoteResponse, RunId, RunMeta, ScoreResult, StartRunResponse};

/// Callback that asks the host to run another frame, so job results are
/// picked up without waiting for user input.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

pub(crate) fn noop_waker() -> Waker {
    Arc::new(|| {})
}

/// Next generation counter value; zero is reserved for "nothing issued".
pub(crate) fn next_generation(current: u64) -> u64 {
    current.wrapping_add(1).max(1)
}

/// Results of console-level background requests.
#[derive(Debug)]
pub(crate) enum JobMessage {
    RunsListed {
        generation: u64,
        result: Result<Vec<RunMeta>, ApiError>,
    },
    RunStarted {
        parent: Option<RunId>,
        result: Result<StartRunResponse, ApiError>,
    },
    RunPromoted {
        run_id: RunId,
        result: Result<PromoteResponse, ApiError>,
    },
    PairScored {
        result: Result<ScoreResult, ApiError>,
    },
}

/// Channel the UI thread drains once per frame.
pub(crate) struct JobChannel<M> {
    tx: Sender<M>,
    rx: Receiver<M>,
    waker: Waker,
}

impl<M: Send + 'static> JobChannel<M> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            waker: noop_waker(),
        }
    }

    pub(crate) fn set_waker(&mut self, waker: Waker) {
        self.waker = waker;
    }

    pub(crate) fn sender(&self) -> Sender<M> {
        self.tx.clone()
    }

    pub(crate) fn waker(&self) -> Waker {
        Arc::clone(&self.waker)
    }

    pub(crate) fn try_recv(&self) -> Option<M> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Run `job` on a worker thread and post its result.
    pub(crate) fn spawn(&self, name: &str, job: impl FnOnce() -> M + Send + 'static) {
        let tx = self.sender();
        let waker = self.waker();
        let spawned = thread::Builder::new()
            .name(format!("runscope-{name}"))
            .spawn(move || {
                if tx.send(job()).is_ok() {
                    waker();
                }
            });
        if let Err(err) = spawned {
            tracing::error!("Failed to spawn {name} worker: {err}");
        }
    }
}

impl<M> std::fmt::Debug for JobChannel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobChannel").finish_non_exhaustive()
    }
}
