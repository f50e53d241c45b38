use crate::task::Task;
use crate::CoreError;
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Executes tasks on the dispatcher's worker thread.
///
/// `run` is invoked strictly in submission order; `finish` runs once after
/// the shutdown signal, still on the worker, for best-effort cleanup.
pub trait TaskRunner {
    fn run(&mut self, task: Task) -> Result<(), CoreError>;

    fn finish(&mut self) {}
}

enum Message {
    Run(Task),
    Shutdown,
}

/// Single-consumer task queue serializing all mutating operations.
///
/// `submit` is non-blocking and multi-producer; one dedicated worker pulls
/// tasks and runs each to completion before the next. A task failure is
/// caught, logged, and isolated to that task; there is no retry and the
/// loop never dies with its queue.
pub struct Dispatcher {
    tx: Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn<R>(mut runner: R) -> Self
    where
        R: TaskRunner + Send + 'static,
    {
        let (tx, rx) = channel::<Message>();
        let worker = std::thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                match message {
                    Message::Run(task) => {
                        debug!("task {} ({:?}) starting", task.kind(), task.server());
                        if let Err(e) = runner.run(task) {
                            // Failure is isolated to this task; the
                            // submitter must resubmit if it cares.
                            error!("task failed: {e}");
                        }
                    }
                    Message::Shutdown => break,
                }
            }
            runner.finish();
            info!("dispatcher stopped");
        });

        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Enqueue a task. Never blocks; returns immediately even when the
    /// worker is busy provisioning.
    pub fn submit(&self, task: Task) {
        if self.tx.send(Message::Run(task)).is_err() {
            warn!("dispatcher is shut down; task dropped");
        }
    }

    /// Stop the worker. Tasks queued ahead of the shutdown message still
    /// run; then `finish` executes on the worker and the thread is joined.
    pub fn shutdown(&mut self) {
        if self.worker.is_none() {
            return;
        }
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
