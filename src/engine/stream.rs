//! Ordered per-device command streams.
//!
//! Each stream owns a worker thread draining an unbounded channel of
//! commands in FIFO order. Work items run on the worker; events recorded
//! between work items provide the happens-before edges other streams
//! need. A failed work item leaves the stream in a sticky faulted state:
//! later work items are skipped, but event records and waits still fire
//! so that streams depending on this one cannot deadlock.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::engine::event::CompletionEvent;
use crate::error::{CholForgeError, CholResult};
use crate::registry::DeviceId;

type WorkFn = Box<dyn FnOnce() -> CholResult<()> + Send + 'static>;

enum Command {
    Exec { label: &'static str, run: WorkFn },
    Record(CompletionEvent),
    Wait(CompletionEvent),
    Shutdown,
}

/// An in-order execution queue bound to one device.
pub struct DeviceStream {
    device_id: DeviceId,
    sender: Sender<Command>,
    fault: Arc<Mutex<Option<CholForgeError>>>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceStream {
    pub fn new(device_id: DeviceId) -> Self {
        let (sender, receiver) = mpsc::channel::<Command>();
        let fault: Arc<Mutex<Option<CholForgeError>>> = Arc::new(Mutex::new(None));
        let worker_fault = Arc::clone(&fault);

        let worker = thread::Builder::new()
            .name(format!("stream-{device_id}"))
            .spawn(move || {
                #[cfg(feature = "rocm")]
                if let Err(err) = crate::hip::set_device(device_id.0) {
                    *worker_fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
                }
                while let Ok(cmd) = receiver.recv() {
                    match cmd {
                        Command::Exec { label, run } => {
                            let faulted =
                                worker_fault.lock().unwrap_or_else(|e| e.into_inner()).is_some();
                            if faulted {
                                tracing::trace!(op = label, "skipping work on faulted stream");
                                continue;
                            }
                            if let Err(err) = run() {
                                tracing::warn!(op = label, error = %err, "stream work item failed");
                                let mut slot =
                                    worker_fault.lock().unwrap_or_else(|e| e.into_inner());
                                if slot.is_none() {
                                    *slot = Some(err);
                                }
                            }
                        }
                        // Events fire even on a faulted stream: downstream
                        // waiters must unblock and observe the fault via
                        // their own polls instead of hanging.
                        Command::Record(ev) => ev.complete(),
                        Command::Wait(ev) => ev.wait(),
                        Command::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn stream worker thread");

        DeviceStream {
            device_id,
            sender,
            fault,
            worker: Some(worker),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Enqueue a work item. Returns once the item is queued, not run.
    pub fn submit<F>(&self, label: &'static str, run: F)
    where
        F: FnOnce() -> CholResult<()> + Send + 'static,
    {
        // A send failure means the worker already exited; the fault poll
        // surfaces the cause, so the lost item is moot.
        let _ = self.sender.send(Command::Exec {
            label,
            run: Box::new(run),
        });
    }

    /// Record a completion event after everything queued so far.
    pub fn record(&self) -> CompletionEvent {
        let ev = CompletionEvent::new();
        let _ = self.sender.send(Command::Record(ev.clone()));
        ev
    }

    /// Make this stream wait for an event recorded elsewhere before
    /// running anything queued after this call.
    pub fn wait_event(&self, ev: &CompletionEvent) {
        let _ = self.sender.send(Command::Wait(ev.clone()));
    }

    /// Block the calling thread until every command queued so far has
    /// been retired.
    pub fn synchronize(&self) {
        self.record().wait();
    }

    /// Return the first error this stream hit, if any. The fault is
    /// sticky: once set, work items stop running until the stream is
    /// dropped.
    pub fn fault(&self) -> Option<CholForgeError> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain the stream and return its fault state as a result.
    pub fn drain(&self) -> CholResult<()> {
        self.synchronize();
        match self.fault() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("device_id", &self.device_id)
            .field("faulted", &self.fault().is_some())
            .finish()
    }
}
