//! Background workers: one std thread per read model and per automation.
//!
//! Each worker runs a polling cycle, then sleeps on its shutdown channel for
//! `poll_interval`. A shutdown request lets the in-flight cycle complete; the
//! thread is then joined.

pub mod automation_worker;
pub mod read_model_worker;

use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::info;

pub use automation_worker::{
    AutomationCycle, AutomationProcessor, AutomationSettings, AutomationWorkerError,
};
pub use read_model_worker::{ReadModelError, ReadModelHandle, ReadModelProcessor, ReadModelStatus};

/// A unit of polling work driven by [`spawn`].
pub trait BackgroundTask: Send + 'static {
    fn name(&self) -> String;

    /// Run one cycle. Failures are logged by the task; the next cycle retries.
    fn tick(&mut self);

    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawn a worker thread that runs `task` every `poll_interval`.
pub fn spawn(mut task: Box<dyn BackgroundTask>, poll_interval: Duration) -> io::Result<WorkerHandle> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let name = task.name();

    let join = thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(task.as_mut(), shutdown_rx, poll_interval))?;

    Ok(WorkerHandle {
        name,
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

fn worker_loop(task: &mut dyn BackgroundTask, shutdown_rx: mpsc::Receiver<()>, tick: Duration) {
    let name = task.name();
    info!(worker = %name, "worker started");
    task.on_start();

    loop {
        task.tick();

        match shutdown_rx.recv_timeout(tick) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }

    task.on_stop();
    info!(worker = %name, "worker stopped");
}
