/*!
 * Named, bounded action queues.
 *
 * Host callbacks and the broker event loop only ever call
 * [`ActionSender::try_enqueue`], which never waits: a full queue is reported
 * as busy. The single worker drains the matching [`ActionReceiver`].
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::action::ActionRequest;
use crate::error::{Error, Result};

/// Sending half of an action queue
#[derive(Debug, Clone)]
pub struct ActionSender {
    name: String,
    generation: u64,
    tx: mpsc::Sender<ActionRequest>,
}

impl ActionSender {
    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation of the name this queue was created under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Enqueue without waiting
    pub fn try_enqueue(&self, request: ActionRequest) -> Result<()> {
        let kind = request.kind();
        match self.tx.try_send(request) {
            Ok(()) => {
                debug!("Enqueued {} on {}", kind, self.name);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!("Queue {} is full, rejecting {}", self.name, kind);
                Err(Error::busy(format!("queue {} is full", self.name)))
            }
            Err(TrySendError::Closed(_)) => {
                Err(Error::queue(format!("queue {} is closed", self.name)))
            }
        }
    }

    /// Free slots left in the queue
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Whether the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an action queue
#[derive(Debug)]
pub struct ActionReceiver {
    name: String,
    rx: mpsc::Receiver<ActionRequest>,
}

impl ActionReceiver {
    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next request; `None` once the queue is closed and drained
    pub async fn recv(&mut self) -> Option<ActionRequest> {
        self.rx.recv().await
    }

    /// Stop accepting requests; queued requests can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueInfo {
    capacity: usize,
    generation: u64,
}

/// Namespace of named queues
///
/// Creating a name that is already taken unlinks the stale queue and
/// creates a fresh one. Every creation gets a new generation, so the owner
/// of a stale queue can unlink its own name without removing the fresh one.
#[derive(Debug, Default)]
pub struct QueueNamespace {
    queues: Mutex<HashMap<String, QueueInfo>>,
    generations: AtomicU64,
}

impl QueueNamespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding up to `capacity` requests
    pub fn create<S: Into<String>>(&self, name: S, capacity: usize) -> Result<(ActionSender, ActionReceiver)> {
        let name = name.into();
        if capacity == 0 {
            return Err(Error::queue(format!("queue {} needs a capacity above zero", name)));
        }

        let mut queues = self
            .queues
            .lock()
            .map_err(|_| Error::queue("queue namespace lock poisoned"))?;
        if let Some(stale) = queues.remove(&name) {
            warn!(
                "Queue {} already exists (capacity {}), unlinking and recreating",
                name, stale.capacity
            );
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        queues.insert(name.clone(), QueueInfo { capacity, generation });

        let (tx, rx) = mpsc::channel(capacity);
        info!("Created queue {} with capacity {} (generation {})", name, capacity, generation);
        Ok((
            ActionSender {
                name: name.clone(),
                generation,
                tx,
            },
            ActionReceiver { name, rx },
        ))
    }

    /// Remove a name; existing handles keep working
    pub fn unlink(&self, name: &str) -> bool {
        self.queues
            .lock()
            .map(|mut queues| queues.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Remove a name only while it still refers to `generation`
    ///
    /// Returns false when the name is gone or was recreated since.
    pub fn unlink_generation(&self, name: &str, generation: u64) -> bool {
        let Ok(mut queues) = self.queues.lock() else {
            return false;
        };
        match queues.get(name) {
            Some(info) if info.generation == generation => {
                queues.remove(name);
                true
            }
            Some(info) => {
                debug!(
                    "Queue {} now belongs to generation {}, leaving it linked",
                    name, info.generation
                );
                false
            }
            None => false,
        }
    }

    /// Whether a name is linked
    pub fn contains(&self, name: &str) -> bool {
        self.queues
            .lock()
            .map(|queues| queues.contains_key(name))
            .unwrap_or(false)
    }

    /// Capacity a linked queue was created with
    pub fn capacity(&self, name: &str) -> Option<usize> {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(name).map(|info| info.capacity))
    }
}
