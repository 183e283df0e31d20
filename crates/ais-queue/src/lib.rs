// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ready-queue and concurrency gating for the plan engine scheduler.
//!
//! The scheduler pops nodes whose dependencies have all completed into a
//! [`ReadyQueue`] — a stable FIFO ordered by topological index, not
//! priority: ties (equal topo index, which should not normally occur) are
//! broken by insertion order. Dispatch is then gated by a
//! [`ConcurrencyGate`], which enforces a global `max_concurrency` semaphore
//! plus per-chain read/write semaphores.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::{Semaphore, OwnedSemaphorePermit};

// ---------------------------------------------------------------------------
// ReadyQueue
// ---------------------------------------------------------------------------

struct Entry<T> {
    topo_index: u64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.topo_index == other.topo_index && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the lowest (topo_index, seq)
        // pair — the earliest-ready node, FIFO among ties — pops first.
        other
            .topo_index
            .cmp(&self.topo_index)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A ready-to-dispatch node queue, ordered by topological index with
/// insertion-order tie-breaking.
pub struct ReadyQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> Default for ReadyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadyQueue<T> {
    /// Create a new, empty ready queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Push an item that became ready, recording its topological index.
    pub fn push(&mut self, topo_index: u64, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { topo_index, seq, item });
    }

    /// Pop the next item in FIFO-by-topo-index order.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.item)
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ConcurrencyGate
// ---------------------------------------------------------------------------

/// Per-chain read/write concurrency limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLimits {
    /// Maximum concurrent read-class nodes for this chain.
    pub max_read_concurrency: u32,
    /// Maximum concurrent write-class nodes for this chain.
    pub max_write_concurrency: u32,
}

impl Default for ChainLimits {
    fn default() -> Self {
        Self {
            max_read_concurrency: 8,
            max_write_concurrency: 1,
        }
    }
}

/// Whether a permit is being acquired for a read-class or write-class node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// `query_ref` nodes, or read-kind execution types.
    Read,
    /// Everything else — writes.
    Write,
}

/// A held global-plus-chain concurrency reservation for one in-flight node.
///
/// Dropping it releases both permits, including on error paths — the node
/// task only needs to hold this for the duration of its execution.
pub struct NodePermit {
    _global: OwnedSemaphorePermit,
    _chain: OwnedSemaphorePermit,
}

/// Enforces the global `max_concurrency` limit and per-chain read/write
/// limits described in the concurrency and resource model.
pub struct ConcurrencyGate {
    global: Arc<Semaphore>,
    read: HashMap<String, Arc<Semaphore>>,
    write: HashMap<String, Arc<Semaphore>>,
    default_limits: ChainLimits,
    default_read: Arc<Semaphore>,
    default_write: Arc<Semaphore>,
}

impl ConcurrencyGate {
    /// Build a gate with an explicit global limit, a set of known chains and
    /// their limits, and a default applied to any chain not listed.
    #[must_use]
    pub fn new(
        max_concurrency: u32,
        chain_limits: &BTreeMap<String, ChainLimits>,
        default_limits: ChainLimits,
    ) -> Self {
        let mut read = HashMap::new();
        let mut write = HashMap::new();
        for (chain, limits) in chain_limits {
            read.insert(chain.clone(), Arc::new(Semaphore::new(limits.max_read_concurrency as usize)));
            write.insert(chain.clone(), Arc::new(Semaphore::new(limits.max_write_concurrency as usize)));
        }
        Self {
            global: Arc::new(Semaphore::new(max_concurrency as usize)),
            read,
            write,
            default_read: Arc::new(Semaphore::new(default_limits.max_read_concurrency as usize)),
            default_write: Arc::new(Semaphore::new(default_limits.max_write_concurrency as usize)),
            default_limits,
        }
    }

    fn chain_semaphore(&self, chain: &str, class: NodeClass) -> Arc<Semaphore> {
        let map = match class {
            NodeClass::Read => &self.read,
            NodeClass::Write => &self.write,
        };
        map.get(chain).cloned().unwrap_or_else(|| match class {
            NodeClass::Read => self.default_read.clone(),
            NodeClass::Write => self.default_write.clone(),
        })
    }

    /// Acquire a global slot and a per-chain slot for `class`. Resolves once
    /// both are available; releases automatically when the returned
    /// [`NodePermit`] drops.
    ///
    /// # Panics
    ///
    /// Panics if the underlying semaphore has been closed, which this type
    /// never does.
    pub async fn acquire(&self, chain: &str, class: NodeClass) -> NodePermit {
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore never closed");
        let chain_sem = self.chain_semaphore(chain, class);
        let chain_permit = chain_sem
            .acquire_owned()
            .await
            .expect("chain semaphore never closed");
        NodePermit {
            _global: global,
            _chain: chain_permit,
        }
    }

    /// The default per-chain limits applied to unlisted chains.
    #[must_use]
    pub fn default_limits(&self) -> ChainLimits {
        self.default_limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_queue_pops_lowest_topo_index_first() {
        let mut q = ReadyQueue::new();
        q.push(3, "c");
        q.push(1, "a");
        q.push(2, "b");
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), Some("c"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn ready_queue_ties_broken_by_insertion_order() {
        let mut q = ReadyQueue::new();
        q.push(5, "first");
        q.push(5, "second");
        q.push(5, "third");
        assert_eq!(q.pop(), Some("first"));
        assert_eq!(q.pop(), Some("second"));
        assert_eq!(q.pop(), Some("third"));
    }

    #[test]
    fn ready_queue_len_and_is_empty() {
        let mut q: ReadyQueue<&str> = ReadyQueue::new();
        assert!(q.is_empty());
        q.push(0, "only");
        assert_eq!(q.len(), 1);
        assert!(!q.is_empty());
        q.pop();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn global_semaphore_caps_concurrency() {
        let gate = ConcurrencyGate::new(1, &BTreeMap::new(), ChainLimits::default());
        let _first = gate.acquire("eip155:1", NodeClass::Read).await;
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            gate.acquire("eip155:1", NodeClass::Read),
        )
        .await;
        assert!(second.is_err(), "second acquire should block while first holds the only global slot");
    }

    #[tokio::test]
    async fn per_chain_write_limit_independent_of_read() {
        let mut limits = BTreeMap::new();
        limits.insert(
            "eip155:1".to_string(),
            ChainLimits {
                max_read_concurrency: 4,
                max_write_concurrency: 1,
            },
        );
        let gate = ConcurrencyGate::new(8, &limits, ChainLimits::default());
        let _write = gate.acquire("eip155:1", NodeClass::Write).await;
        // A concurrent read on the same chain should not be blocked by the write permit.
        let read = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            gate.acquire("eip155:1", NodeClass::Read),
        )
        .await;
        assert!(read.is_ok(), "read permit should be independent of the write semaphore");
    }

    #[tokio::test]
    async fn unlisted_chain_falls_back_to_default_limits() {
        let gate = ConcurrencyGate::new(
            8,
            &BTreeMap::new(),
            ChainLimits {
                max_read_concurrency: 2,
                max_write_concurrency: 1,
            },
        );
        let _a = gate.acquire("solana:mainnet", NodeClass::Write).await;
        let b = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            gate.acquire("solana:mainnet", NodeClass::Write),
        )
        .await;
        assert!(b.is_err(), "default write limit of 1 should block a second writer");
    }

    #[test]
    fn default_limits_accessor() {
        let limits = ChainLimits {
            max_read_concurrency: 3,
            max_write_concurrency: 2,
        };
        let gate = ConcurrencyGate::new(4, &BTreeMap::new(), limits);
        assert_eq!(gate.default_limits(), limits);
    }
}
