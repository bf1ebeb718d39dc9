//! Background compactor
//!
//! A single worker thread fed through a crossbeam channel. After a flush the
//! engine sends the table over; the worker runs the configured strategy on
//! it. Failures never reach the writer: they are logged and kept as the
//! "last background error" for callers who want to check.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::storage::CompactionStrategy;
use crate::table::{CompactionOutcome, Table};

/// Pending requests beyond this are dropped; the next flush asks again
const QUEUE_CAPACITY: usize = 64;

enum CompactorMessage {
    Compact(Arc<Table>),
    Shutdown,
}

pub(crate) struct Compactor {
    sender: Sender<CompactorMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Compactor {
    /// Spawn the worker thread
    pub(crate) fn start(strategy: Box<dyn CompactionStrategy>) -> Result<Self> {
        let (sender, receiver) = bounded(QUEUE_CAPACITY);
        let last_error = Arc::new(Mutex::new(None));

        let worker_error = Arc::clone(&last_error);
        let worker = thread::Builder::new()
            .name("distribuito-compactor".to_string())
            .spawn(move || Self::worker_loop(receiver, strategy, worker_error))?;

        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
            last_error,
        })
    }

    /// Ask for `table` to be looked at; never blocks
    pub(crate) fn request(&self, table: Arc<Table>) {
        match self.sender.try_send(CompactorMessage::Compact(table)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Compaction queue full, request dropped"),
            Err(TrySendError::Disconnected(_)) => debug!("Compactor stopped, request dropped"),
        }
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Stop the worker after the requests already queued; idempotent
    pub(crate) fn shutdown(&self) {
        let worker = match self.worker.lock().take() {
            Some(worker) => worker,
            None => return,
        };
        // A full queue still drains, so a blocking send is bounded
        let _ = self.sender.send(CompactorMessage::Shutdown);
        if worker.join().is_err() {
            error!("Compactor thread panicked");
        }
        info!("Background compactor stopped");
    }

    fn worker_loop(
        receiver: Receiver<CompactorMessage>,
        strategy: Box<dyn CompactionStrategy>,
        last_error: Arc<Mutex<Option<String>>>,
    ) {
        for message in receiver {
            let table = match message {
                CompactorMessage::Compact(table) => table,
                CompactorMessage::Shutdown => break,
            };

            match table.compact(strategy.as_ref()) {
                Ok(CompactionOutcome::Skipped) => {}
                Ok(CompactionOutcome::Compacted { inputs, output }) => debug!(
                    table = table.name(),
                    inputs = inputs.len(),
                    output = output.id(),
                    "Background compaction finished"
                ),
                Err(e) => {
                    error!(table = table.name(), error = %e, "Background compaction failed");
                    *last_error.lock() = Some(format!("{}: {}", table.name(), e));
                }
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
