//! Execution Bridge
//!
//! Runs every radio operation on one dedicated worker thread driving a
//! current-thread tokio runtime. The UI thread submits work without blocking
//! and gets results back through callbacks it runs itself, on its own turn,
//! via [`ExecutionBridge::dispatch_completions`].
//!
//! ```text
//!  UI thread                         ble-worker thread
//!  ─────────                         ─────────────────
//!  submit(op) ──── WorkerMessage ───▶ tokio::spawn(op)
//!                                        │
//!  dispatch_completions() ◀── callback ──┘ (value or BackgroundFault)
//! ```

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{mpsc as std_mpsc, Arc, Condvar, Mutex, Once};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{self, JoinError};
use tracing::{debug, error, info, warn};

use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};

pub const WORKER_THREAD_NAME: &str = "ble-worker";

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;
type ForegroundCallback = Box<dyn FnOnce() + Send>;

enum WorkerMessage {
    Run(Job),
    Shutdown,
}

thread_local! {
    // Backtraces of panicked tasks not yet turned into faults
    static PANIC_BACKTRACES: RefCell<HashMap<task::Id, String>> = RefCell::new(HashMap::new());
}

static PANIC_HOOK: Once = Once::new();

/// Remember the backtrace of panics on the worker thread so the fault can
/// carry it to the UI.
fn install_panic_capture() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if std::thread::current().name() == Some(WORKER_THREAD_NAME) {
                if let Some(id) = task::try_id() {
                    let backtrace = Backtrace::force_capture().to_string();
                    PANIC_BACKTRACES.with(|traces| traces.borrow_mut().insert(id, backtrace));
                }
            }
            previous(info);
        }));
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn background_fault(err: JoinError) -> ControlError {
    let backtrace = PANIC_BACKTRACES
        .with(|traces| traces.borrow_mut().remove(&err.id()))
        .unwrap_or_default();
    let message = if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        "operation cancelled".to_string()
    };
    error!("Background operation failed: {}\n{}", message, backtrace);
    ControlError::BackgroundFault { message, backtrace }
}

enum Slot<T> {
    Pending,
    Callback(Box<dyn FnOnce(ControlResult<T>) + Send>),
    Ready(ControlResult<T>),
    Done,
}

struct Inner<T> {
    slot: Slot<T>,
    completions_tx: std_mpsc::Sender<ForegroundCallback>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> Shared<T> {
    fn new(completions_tx: std_mpsc::Sender<ForegroundCallback>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Pending,
                completions_tx,
            }),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: ControlResult<T>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match std::mem::replace(&mut inner.slot, Slot::Done) {
            Slot::Pending => {
                inner.slot = Slot::Ready(outcome);
                self.ready.notify_all();
            }
            Slot::Callback(callback) => {
                // UI side gone means nobody is listening
                let _ = inner
                    .completions_tx
                    .send(Box::new(move || callback(outcome)));
            }
            already @ (Slot::Ready(_) | Slot::Done) => inner.slot = already,
        }
    }
}

/// Completes the submission exactly once, with `BridgeClosed` if the job is
/// dropped before finishing (worker shut down underneath it).
struct Completer<T: Send + 'static>(Option<Arc<Shared<T>>>);

impl<T: Send + 'static> Completer<T> {
    fn finish(mut self, outcome: ControlResult<T>) {
        if let Some(shared) = self.0.take() {
            shared.complete(outcome);
        }
    }
}

impl<T: Send + 'static> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.0.take() {
            shared.complete(Err(ControlError::BridgeClosed));
        }
    }
}

/// Handle to one submitted operation
pub struct Submission<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Submission<T> {
    /// Run `callback` with the outcome on the thread that next calls
    /// [`ExecutionBridge::dispatch_completions`].
    pub fn on_complete(self, callback: impl FnOnce(ControlResult<T>) + Send + 'static) {
        let Ok(mut inner) = self.shared.inner.lock() else {
            return;
        };
        match std::mem::replace(&mut inner.slot, Slot::Done) {
            Slot::Pending => inner.slot = Slot::Callback(Box::new(callback)),
            Slot::Ready(outcome) => {
                let _ = inner
                    .completions_tx
                    .send(Box::new(move || callback(outcome)));
            }
            other => inner.slot = other,
        }
    }

    /// Take the outcome if it has arrived.
    pub fn try_take(&self) -> Option<ControlResult<T>> {
        let mut inner = self.shared.inner.lock().ok()?;
        match std::mem::replace(&mut inner.slot, Slot::Done) {
            Slot::Ready(outcome) => Some(outcome),
            other => {
                inner.slot = other;
                None
            }
        }
    }

    /// Block for at most `timeout`. `None` when the operation is still running.
    pub fn wait(self, timeout: Duration) -> Option<ControlResult<T>> {
        let inner = self.shared.inner.lock().ok()?;
        let (mut inner, _) = self
            .shared
            .ready
            .wait_timeout_while(inner, timeout, |inner| {
                matches!(inner.slot, Slot::Pending)
            })
            .ok()?;
        match std::mem::replace(&mut inner.slot, Slot::Done) {
            Slot::Ready(outcome) => Some(outcome),
            other => {
                inner.slot = other;
                None
            }
        }
    }
}

pub struct ExecutionBridge {
    jobs_tx: mpsc::UnboundedSender<WorkerMessage>,
    completions_tx: std_mpsc::Sender<ForegroundCallback>,
    completions_rx: std_mpsc::Receiver<ForegroundCallback>,
    stopped_rx: std_mpsc::Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl ExecutionBridge {
    /// Spawn the worker thread and its runtime.
    pub fn start() -> std::io::Result<Self> {
        install_panic_capture();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let (completions_tx, completions_rx) = std_mpsc::channel();
        let (stopped_tx, stopped_rx) = std_mpsc::channel();

        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(message) = jobs_rx.recv().await {
                        match message {
                            WorkerMessage::Run(job) => {
                                tokio::spawn(job);
                            }
                            WorkerMessage::Shutdown => break,
                        }
                    }
                });
                // Dropping the runtime cancels whatever is still running
                drop(runtime);
                debug!("Worker thread stopped");
                let _ = stopped_tx.send(());
            })?;

        info!("Background worker started");
        Ok(Self {
            jobs_tx,
            completions_tx,
            completions_rx,
            stopped_rx,
            worker: Some(worker),
        })
    }

    /// Queue `operation` on the worker. Never blocks.
    ///
    /// A panic inside the operation is reported as
    /// [`ControlError::BackgroundFault`]; the worker keeps running.
    pub fn submit<T, F>(&self, operation: F) -> Submission<T>
    where
        T: Send + 'static,
        F: Future<Output = ControlResult<T>> + Send + 'static,
    {
        let shared = Arc::new(Shared::new(self.completions_tx.clone()));
        let completer = Completer(Some(shared.clone()));

        let job: Job = Box::pin(async move {
            let outcome = match tokio::spawn(operation).await {
                Ok(result) => result,
                Err(e) => Err(background_fault(e)),
            };
            completer.finish(outcome);
        });

        // On a closed channel the job (and its completer) is dropped right
        // here, completing with BridgeClosed
        let _ = self.jobs_tx.send(WorkerMessage::Run(job));

        Submission { shared }
    }

    /// Run every completion callback that has arrived. Returns how many ran.
    pub fn dispatch_completions(&self) -> usize {
        let mut count = 0;
        while let Ok(callback) = self.completions_rx.try_recv() {
            callback();
            count += 1;
        }
        count
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the worker, waiting at most `timeout` for it to exit. Returns
    /// `false` if it had to be left behind.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        let _ = self.jobs_tx.send(WorkerMessage::Shutdown);

        // A worker that died early drops the sender, which also counts as stopped
        if let Err(std_mpsc::RecvTimeoutError::Timeout) = self.stopped_rx.recv_timeout(timeout) {
            warn!(
                "Background worker did not stop within {:?}, detaching it",
                timeout
            );
            return false;
        }

        if worker.join().is_err() {
            error!("Background worker panicked during shutdown");
        }
        info!("Background worker stopped");
        true
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.jobs_tx.send(WorkerMessage::Shutdown);
        }
    }
}
