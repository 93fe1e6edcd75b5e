//! Runtime registry: wires read models and automations to the log.
//!
//! Built once at startup; nothing here is global. Registration returns the
//! handles callers need (read models) and `start()` spawns one worker thread
//! per registration.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use dcbflow_events::{
    Automation, AutomationError, Command, Dependencies, DomainEvent, MappedAutomation, ReadModel,
    SequencedEvent,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::RuntimeConfig;
use crate::event_log::EventLog;
use crate::projections::cursor_store::CursorStore;
use crate::read_model::ProjectionStore;
use crate::workers::{
    self, AutomationProcessor, AutomationSettings, BackgroundTask, ReadModelHandle,
    ReadModelProcessor, WorkerHandle,
};

pub struct RuntimeBuilder {
    log: Arc<dyn EventLog>,
    cursors: Arc<dyn CursorStore>,
    config: RuntimeConfig,
    tasks: Vec<Box<dyn BackgroundTask>>,
    read_models: Vec<ReadModelHandle>,
}

impl RuntimeBuilder {
    pub fn new(log: Arc<dyn EventLog>, config: RuntimeConfig, cursors: Arc<dyn CursorStore>) -> Self {
        Self {
            log,
            cursors,
            config,
            tasks: Vec::new(),
            read_models: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a read model backed by `store`.
    ///
    /// The handle is usable immediately; reads are refused until the worker
    /// has finished its initial catch-up.
    pub fn register_read_model<R, S>(&mut self, read_model: R, store: S) -> ReadModelHandle
    where
        R: ReadModel,
        S: ProjectionStore + 'static,
    {
        let processor = ReadModelProcessor::new(
            read_model,
            Arc::new(store),
            self.log.clone(),
            self.config.batch_size,
        );
        let handle = processor.handle();
        self.read_models.push(handle.clone());
        self.tasks.push(Box::new(processor));
        handle
    }

    /// Register an automation from a name, trigger and mapping.
    pub fn register_automation<E, C, D, F>(
        &mut self,
        name: &'static str,
        trigger: &'static str,
        dependencies: D,
        mapping: F,
    ) -> &mut Self
    where
        E: DomainEvent,
        C: Command,
        D: Dependencies,
        F: Fn(&SequencedEvent<E>, &D) -> Result<Option<C>, AutomationError>
            + Send
            + Sync
            + 'static,
    {
        self.register(MappedAutomation::new(name, trigger, dependencies, mapping))
    }

    pub fn register<A>(&mut self, automation: A) -> &mut Self
    where
        A: Automation,
    {
        let processor = AutomationProcessor::new(
            automation,
            self.log.clone(),
            self.cursors.clone(),
            AutomationSettings::from(&self.config),
        );
        self.tasks.push(Box::new(processor));
        self
    }

    /// Spawn every registered worker.
    pub fn start(self) -> io::Result<Runtime> {
        let mut handles = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match workers::spawn(task, self.config.poll_interval) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        handle.shutdown();
                    }
                    return Err(err);
                }
            }
        }

        info!(
            workers = handles.len(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "runtime started"
        );

        Ok(Runtime {
            dispatcher: CommandDispatcher::new(self.log.clone())
                .with_batch_size(self.config.batch_size),
            log: self.log,
            workers: handles,
            read_models: self.read_models,
        })
    }
}

/// A started runtime. Dropping it without `shutdown()` detaches the workers.
pub struct Runtime {
    log: Arc<dyn EventLog>,
    dispatcher: CommandDispatcher<Arc<dyn EventLog>>,
    workers: Vec<WorkerHandle>,
    read_models: Vec<ReadModelHandle>,
}

impl Runtime {
    /// Dispatcher for caller-issued commands.
    pub fn dispatcher(&self) -> &CommandDispatcher<Arc<dyn EventLog>> {
        &self.dispatcher
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    pub fn read_models(&self) -> &[ReadModelHandle] {
        &self.read_models
    }

    /// Wait until every read model reflects the current log head.
    ///
    /// `timeout` bounds the whole wait, not each read model.
    pub fn wait_until_caught_up(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.read_models.iter().all(|rm| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            rm.wait_until_caught_up(remaining)
        })
    }

    /// Stop every worker; in-flight cycles complete first.
    pub fn shutdown(self) {
        let count = self.workers.len();
        for handle in self.workers {
            handle.shutdown();
        }
        info!(workers = count, "runtime stopped");
    }
}
