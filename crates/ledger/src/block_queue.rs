//! Out-of-order inbound blocks, replayed to the engine in height order.

use crate::blockchain::Blockchainer;
use neo2_core::Block;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Heap entry ordered by block index.
struct QueuedBlock(Block);

impl PartialEq for QueuedBlock {
    fn eq(&self, other: &Self) -> bool {
        self.0.index() == other.0.index()
    }
}

impl Eq for QueuedBlock {}

impl PartialOrd for QueuedBlock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedBlock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.index().cmp(&other.0.index())
    }
}

/// A bounded min-priority queue of inbound blocks keyed by index.
///
/// Blocks at or below the current height are dropped silently (the same
/// block routinely arrives from several peers). A single worker drains the
/// queue while the head extends the chain; everything else waits. The queue
/// shuts down deterministically through [`BlockQueue::discard`].
pub struct BlockQueue<C: Blockchainer> {
    chain: Arc<C>,
    heap: Mutex<BinaryHeap<Reverse<QueuedBlock>>>,
    signal: Notify,
    cancelled: AtomicBool,
    capacity: usize,
}

impl<C: Blockchainer> BlockQueue<C> {
    /// Creates a queue feeding the given chain.
    pub fn new(chain: Arc<C>, capacity: usize) -> Self {
        BlockQueue {
            chain,
            heap: Mutex::new(BinaryHeap::new()),
            signal: Notify::new(),
            cancelled: AtomicBool::new(false),
            capacity,
        }
    }

    /// Number of queued blocks.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Enqueues a block and signals the worker. Stale and overflow blocks
    /// are dropped.
    pub fn put(&self, block: Block) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if block.index() <= self.chain.block_height() {
            return;
        }
        {
            let mut heap = self.heap.lock();
            if heap.len() >= self.capacity {
                debug!(index = block.index(), "block queue full, dropping");
                return;
            }
            heap.push(Reverse(QueuedBlock(block)));
        }
        self.signal.notify_one();
    }

    /// The worker loop: applies ready blocks in height order until
    /// discarded. Run this on one task only.
    pub async fn run(&self) {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            self.drain_ready();
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            self.signal.notified().await;
        }
    }

    fn drain_ready(&self) {
        loop {
            let next = {
                let mut heap = self.heap.lock();
                match heap.peek() {
                    Some(Reverse(queued)) if queued.0.index() <= self.chain.block_height() + 1 => {
                        heap.pop().map(|Reverse(queued)| queued.0)
                    }
                    _ => None,
                }
            };
            let Some(block) = next else {
                return;
            };
            if block.index() != self.chain.block_height() + 1 {
                // Raced with consensus; the height moved past this block.
                continue;
            }
            let index = block.index();
            let hash = block.hash();
            if let Err(err) = self.chain.add_block(block) {
                // The block may have landed through consensus already.
                if self.chain.get_block(&hash).ok().flatten().is_none() {
                    warn!(index, error = %err, "failed adding queued block");
                }
            }
        }
    }

    /// Drains the queue and stops the worker.
    pub fn discard(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.heap.lock().clear();
        self.signal.notify_waiters();
        self.signal.notify_one();
    }
}
