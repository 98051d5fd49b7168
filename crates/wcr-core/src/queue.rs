use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tracing::{debug, info};

use crate::route::ReplyRecord;

/// Single-writer/single-reader FIFO of reply records.
///
/// Enqueue is non-blocking and called from the subscription's processing
/// path; a drain task on a fixed interval pops the whole queue each tick
/// and pushes to the currently attached client connection. Records popped
/// with no client attached are dropped (no replay buffer) and counted —
/// a client that connects late has lost anything enqueued before it
/// attached. Attaching a new connection cancels the previous drain task
/// and starts a fresh one bound to the new connection, so exactly one
/// connection is ever "current".
pub struct DeliveryQueue {
    records: Mutex<VecDeque<ReplyRecord>>,
    dropped: AtomicU64,
    drain_interval: Duration,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryQueue {
    pub fn new(drain_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            drain_interval,
            drain_task: Mutex::new(None),
        })
    }

    /// Append to the tail. Never blocks the caller.
    pub fn enqueue(&self, record: ReplyRecord) {
        self.records
            .lock()
            .expect("queue lock poisoned")
            .push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records popped with no live client to deliver to, since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start the unattached drain loop. Runs from process start so the
    /// queue never grows without bound while no client is connected.
    pub fn start(self: &Arc<Self>) {
        self.respawn(None);
    }

    /// Bind the drain loop to a new client connection, replacing any
    /// previous connection's drain task.
    pub fn attach(self: &Arc<Self>, client: UnboundedSender<ReplyRecord>) {
        info!("reply client attached, rebinding drain loop");
        self.respawn(Some(client));
    }

    fn respawn(self: &Arc<Self>, client: Option<UnboundedSender<ReplyRecord>>) {
        let mut slot = self.drain_task.lock().expect("drain task lock poisoned");
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let queue = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(queue.drain_interval);
            loop {
                tick.tick().await;
                queue.drain_once(client.as_ref());
            }
        }));
    }

    /// One drain pass: pop from the head until the queue is empty.
    fn drain_once(&self, client: Option<&UnboundedSender<ReplyRecord>>) {
        let mut dropped_this_tick = 0u64;

        loop {
            let record = {
                let mut records = self.records.lock().expect("queue lock poisoned");
                match records.pop_front() {
                    Some(r) => r,
                    None => break,
                }
            };

            let delivered = match client {
                // A send error means the connection went away mid-drain.
                Some(tx) => tx.send(record).is_ok(),
                None => false,
            };

            if !delivered {
                dropped_this_tick += 1;
            }
        }

        if dropped_this_tick > 0 {
            let total = self.dropped.fetch_add(dropped_this_tick, Ordering::Relaxed)
                + dropped_this_tick;
            debug!(
                dropped = dropped_this_tick,
                total_dropped = total,
                "drained reply records with no client attached"
            );
        }
    }
}
