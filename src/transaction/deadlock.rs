use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use log::debug;

use crate::common::config::DEADLOCK_DETECTION_INTERVAL;
use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::TransactionState;
use crate::transaction::transaction_manager::TransactionManager;

/// The waits-for graph: an edge `t1 -> t2` means `t1` has a pending request
/// blocked behind a lock granted to `t2`. Vertices and adjacency iterate in
/// ascending transaction-id order so detection is deterministic.
#[derive(Default)]
pub struct WaitsForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: TxnId, to: TxnId) {
        if from != to {
            self.edges.entry(from).or_default().insert(to);
        }
    }

    pub fn remove_edge(&mut self, from: TxnId, to: TxnId) {
        if let Some(targets) = self.edges.get_mut(&from) {
            targets.remove(&to);
        }
    }

    /// Drop the vertex and every edge touching it.
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        for targets in self.edges.values_mut() {
            targets.remove(&txn_id);
        }
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect()
    }

    /// Depth-first search from each vertex in ascending order. If a cycle
    /// exists, returns the victim: the highest transaction id on it.
    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        let mut visited = BTreeSet::new();
        for &source in self.edges.keys() {
            if visited.contains(&source) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = BTreeSet::new();
            if let Some(victim) = self.dfs(source, &mut visited, &mut path, &mut on_path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
        on_path: &mut BTreeSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        for &next in self.edges.get(&node).into_iter().flatten() {
            if on_path.contains(&next) {
                let start = path
                    .iter()
                    .position(|&t| t == next)
                    .expect("on-path vertex must be in the path");
                let victim = path[start..]
                    .iter()
                    .copied()
                    .max()
                    .expect("cycle cannot be empty");
                return Some(victim);
            }
            if !visited.contains(&next) {
                if let Some(victim) = self.dfs(next, visited, path, on_path) {
                    return Some(victim);
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }
}

/// Background task that periodically rebuilds the waits-for graph, aborts
/// the highest-id transaction on each cycle, and wakes every lock queue so
/// victims can unwind. Stops (and joins) on drop.
pub struct DeadlockDetector {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlockDetector {
    /// Spawn with the default detection interval.
    pub fn spawn_default(
        lock_manager: Arc<LockManager>,
        txn_manager: Arc<TransactionManager>,
    ) -> Self {
        Self::spawn(lock_manager, txn_manager, DEADLOCK_DETECTION_INTERVAL)
    }

    pub fn spawn(
        lock_manager: Arc<LockManager>,
        txn_manager: Arc<TransactionManager>,
        interval: Duration,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                Self::run_once(&lock_manager, &txn_manager);
            }
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// One detection pass; also usable directly from tests.
    pub fn run_once(lock_manager: &LockManager, txn_manager: &TransactionManager) {
        let mut graph = lock_manager.build_waits_for();

        while let Some(victim) = graph.find_cycle_victim() {
            debug!("deadlock detected, aborting txn {}", victim);
            if let Some(txn) = txn_manager.get_transaction(victim) {
                txn.set_state(TransactionState::Aborted);
            }
            graph.remove_txn(victim);
            // Wake every queue so the victim can unwind its pending request
            lock_manager.broadcast_all();
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
