//! Log fan-out hub.
//!
//! Buffers helper log lines in a bounded replay history and broadcasts them
//! to any number of live observers. Independent of job state: lines survive
//! across jobs until evicted, and observers may attach or detach at any time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::model::LogEvent;

/// Buffer size of the live broadcast channel. A subscriber that falls this
/// far behind starts missing events (lagged) instead of blocking publishers.
const BROADCAST_BUFFER: usize = 256;

/// An attached log observer: the replay of prior lines plus a live receiver.
/// Dropping `live` unsubscribes; dropping an already-detached receiver is a
/// no-op.
pub struct LogSubscription {
    pub replay: Vec<LogEvent>,
    pub live: broadcast::Receiver<LogEvent>,
}

#[derive(Debug)]
pub struct LogHub {
    tx: broadcast::Sender<LogEvent>,
    replay: Mutex<VecDeque<LogEvent>>,
    seq: AtomicU64,
    capacity: usize,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_BUFFER);
        Self {
            tx,
            replay: Mutex::new(VecDeque::with_capacity(capacity.min(BROADCAST_BUFFER))),
            seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Publish a line to the replay history and every live observer, in
    /// publish order. Never blocks on a slow observer.
    pub fn publish(&self, line: impl Into<String>) -> LogEvent {
        // The lock spans the seq assignment, the replay append, and the
        // broadcast send: concurrent publishers are serialized, so delivery
        // order always agrees with `seq`, and a concurrent subscribe() sees
        // each event exactly once, either in the replay or on the live
        // receiver, never both or neither.
        let mut replay = self.replay.lock().expect("log replay lock poisoned");
        let event = LogEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            line: line.into(),
        };
        replay.push_back(event.clone());
        while replay.len() > self.capacity {
            replay.pop_front();
        }
        let _ = self.tx.send(event.clone());
        event
    }

    /// Attach an observer. The returned subscription carries the current
    /// replay history so late joiners see prior context, then every
    /// subsequent event.
    pub fn subscribe(&self) -> LogSubscription {
        let replay = self.replay.lock().expect("log replay lock poisoned");
        let live = self.tx.subscribe();
        LogSubscription {
            replay: replay.iter().cloned().collect(),
            live,
        }
    }

    /// Current replay history as plain lines, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.replay
            .lock()
            .expect("log replay lock poisoned")
            .iter()
            .map(|e| e.line.clone())
            .collect()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
