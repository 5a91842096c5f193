use std::collections::{HashMap, HashSet};

use crate::common::TransactionId;

/// Wait-for graph between transactions.
///
/// An edge `waiter -> holder` means the waiter's last lock request was
/// rejected because the holder has a conflicting lock. Each waiter's edges
/// are replaced on every failed attempt, so the graph only reflects the
/// conflicts that are current.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set of transactions `waiter` is blocked on.
    pub fn set_waits(&mut self, waiter: TransactionId, holders: impl IntoIterator<Item = TransactionId>) {
        let holders: HashSet<_> = holders.into_iter().filter(|&h| h != waiter).collect();
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders);
        }
    }

    /// Forgets the outgoing edges of `waiter`, e.g. once its lock is granted.
    pub fn clear_waits(&mut self, waiter: TransactionId) {
        self.edges.remove(&waiter);
    }

    /// Removes a finished transaction, including the edges pointing at it.
    pub fn remove_transaction(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
        self.edges.retain(|_, holders| {
            holders.remove(&tid);
            !holders.is_empty()
        });
    }

    /// Returns the transactions `waiter` is currently blocked on.
    pub fn waits_for(&self, waiter: TransactionId) -> Vec<TransactionId> {
        self.edges
            .get(&waiter)
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns a cycle passing through `start`, listed from `start` along
    /// the edges, or None if `start` is not deadlocked.
    ///
    /// Only cycles through `start` are searched: any other cycle was closed
    /// by an earlier request, and that request's transaction was aborted.
    pub fn find_cycle(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        fn visit(
            edges: &HashMap<TransactionId, HashSet<TransactionId>>,
            node: TransactionId,
            start: TransactionId,
            visited: &mut HashSet<TransactionId>,
            path: &mut Vec<TransactionId>,
        ) -> bool {
            path.push(node);
            if let Some(holders) = edges.get(&node) {
                for &next in holders {
                    if next == start {
                        return true;
                    }
                    if visited.insert(next) && visit(edges, next, start, visited, path) {
                        return true;
                    }
                }
            }
            path.pop();
            false
        }

        let mut visited = HashSet::from([start]);
        let mut path = Vec::new();
        visit(&self.edges, start, start, &mut visited, &mut path).then_some(path)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
