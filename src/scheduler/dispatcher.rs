use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::cluster::{Cluster, NodePredicate};
use crate::core::node::Node;
use crate::errors::DispatchError;
use crate::scheduler::context::Context;

/// Runs jobs on cluster nodes with mutual exclusion.
///
/// A non-exclusive run holds one matching node for the duration of its job;
/// an exclusive run holds every matching node at once. Reservations are all
/// or nothing under a single monitor, so no caller ever waits while holding
/// part of what it needs.
///
/// Waiters are served in arrival order among callers whose candidate sets
/// overlap; callers with disjoint candidates never wait on each other.
pub struct Dispatcher {
    ctx: Context,
    cluster: Arc<Cluster>,
    slots: Mutex<SlotTable>,
    released: Notify,
    next_ticket: AtomicU64,
}

/// Busy flags per cluster index plus the callers currently waiting, keyed by
/// arrival ticket. Only ever touched with the monitor held.
struct SlotTable {
    busy: Vec<bool>,
    waiting: BTreeMap<u64, Vec<usize>>,
}

impl SlotTable {
    fn try_reserve(&mut self, ticket: u64, candidates: &[usize], exclusive: bool) -> Option<Vec<usize>> {
        let queued_behind = self
            .waiting
            .range(..ticket)
            .any(|(_, earlier)| earlier.iter().any(|ix| candidates.contains(ix)));
        if queued_behind {
            return None;
        }

        if exclusive {
            if candidates.iter().any(|&ix| self.busy[ix]) {
                return None;
            }
            for &ix in candidates {
                self.busy[ix] = true;
            }
            Some(candidates.to_vec())
        } else {
            let ix = candidates.iter().copied().find(|&ix| !self.busy[ix])?;
            self.busy[ix] = true;
            Some(vec![ix])
        }
    }
}

/// Point-in-time view of the dispatcher's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStatus {
    /// Names of reserved nodes, in cluster order
    pub busy: Vec<String>,
    /// Callers suspended waiting for a reservation
    pub waiting: usize,
}

impl Dispatcher {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self::with_context(Context::background(), cluster)
    }

    /// Cancelling `ctx` aborts every caller still waiting for nodes.
    pub fn with_context(ctx: Context, cluster: Arc<Cluster>) -> Self {
        let busy = vec![false; cluster.len()];
        Self {
            ctx,
            cluster,
            slots: Mutex::new(SlotTable {
                busy,
                waiting: BTreeMap::new(),
            }),
            released: Notify::new(),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn status(&self) -> DispatchStatus {
        let slots = self.lock_slots();
        let busy = slots
            .busy
            .iter()
            .enumerate()
            .filter(|(_, busy)| **busy)
            .filter_map(|(ix, _)| self.cluster.node(ix).map(|n| n.name.clone()))
            .collect();
        DispatchStatus {
            busy,
            waiting: slots.waiting.len(),
        }
    }

    /// Reserve nodes matching `predicate`, run `job` on one of them, release.
    ///
    /// With `exclusive` the whole matching set is reserved and `job` receives
    /// the first reserved node in cluster order; no other dispatched job
    /// touches any node of the set while it runs. Otherwise a single free
    /// node (lowest index first) is reserved.
    ///
    /// Returns [`DispatchError::NoMatchingNodes`] without waiting when the
    /// predicate matches nothing, the context's error when it ends before a
    /// reservation is made (the job is then never called), and the job's own
    /// error wrapped in [`DispatchError::Job`]. The reservation is released
    /// on every path.
    pub async fn run<P, F, Fut, T>(
        &self,
        ctx: &Context,
        predicate: &P,
        exclusive: bool,
        job: F,
    ) -> Result<T, DispatchError>
    where
        P: NodePredicate + ?Sized,
        F: FnOnce(Context, Arc<Node>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let candidates = self.cluster.matching_indices(predicate);
        if candidates.is_empty() {
            warn!(exclusive, "No node matches the dispatch predicate");
            return Err(DispatchError::NoMatchingNodes);
        }

        let reservation = self.reserve(ctx, &candidates, exclusive).await?;
        let node = reservation.representative();

        debug!(node = %node.name, exclusive, "Running job");
        let result = job(ctx.clone(), node.clone()).await;
        drop(reservation);

        result.map_err(|source| DispatchError::Job {
            node: node.name.clone(),
            source,
        })
    }

    async fn reserve(
        &self,
        ctx: &Context,
        candidates: &[usize],
        exclusive: bool,
    ) -> Result<Reservation<'_>, DispatchError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut queued: Option<QueuedWaiter<'_>> = None;

        loop {
            // Registered before looking at the table so a release that lands
            // between the check and the await still wakes us.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut slots = self.lock_slots();

                if let Some(err) = ctx.err().or_else(|| self.ctx.err()) {
                    debug!(ticket, error = %err, "Gave up waiting for nodes");
                    return Err(err.into());
                }

                if let Some(nodes) = slots.try_reserve(ticket, candidates, exclusive) {
                    if slots.waiting.remove(&ticket).is_some() {
                        // later tickets may have been queued behind this one
                        self.released.notify_waiters();
                    }
                    debug!(ticket, nodes = ?self.names(&nodes), exclusive, "Reserved nodes");
                    return Ok(Reservation {
                        dispatcher: self,
                        nodes,
                    });
                }

                if queued.is_none() {
                    slots.waiting.insert(ticket, candidates.to_vec());
                    queued = Some(QueuedWaiter {
                        dispatcher: self,
                        ticket,
                    });
                }
            }

            trace!(ticket, exclusive, "Waiting for nodes");
            tokio::select! {
                _ = &mut released => {}
                err = ctx.done() => {
                    debug!(ticket, error = %err, "Gave up waiting for nodes");
                    return Err(err.into());
                }
                err = self.ctx.done() => {
                    debug!(ticket, error = %err, "Dispatcher shut down while waiting");
                    return Err(err.into());
                }
            }
        }
    }

    fn release(&self, nodes: &[usize]) {
        {
            let mut slots = self.lock_slots();
            for &ix in nodes {
                slots.busy[ix] = false;
            }
        }
        debug!(nodes = ?self.names(nodes), "Released nodes");
        self.released.notify_waiters();
    }

    fn names(&self, nodes: &[usize]) -> Vec<&str> {
        nodes
            .iter()
            .filter_map(|&ix| self.cluster.node(ix))
            .map(|n| n.name.as_str())
            .collect()
    }

    // The table is left consistent between statements, so a poisoned lock
    // is still safe to use.
    fn lock_slots(&self) -> MutexGuard<'_, SlotTable> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while a job runs; frees its nodes and wakes waiters on drop.
struct Reservation<'a> {
    dispatcher: &'a Dispatcher,
    nodes: Vec<usize>,
}

impl Reservation<'_> {
    fn representative(&self) -> Arc<Node> {
        // nodes is never empty and indices come from the same cluster
        let ix = self.nodes[0];
        self.dispatcher.cluster.nodes()[ix].clone()
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.dispatcher.release(&self.nodes);
    }
}

/// Queue entry for a suspended caller. Dropping it (cancellation, or the
/// `run` future itself being dropped) takes the caller out of line.
struct QueuedWaiter<'a> {
    dispatcher: &'a Dispatcher,
    ticket: u64,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        let removed = self.dispatcher.lock_slots().waiting.remove(&self.ticket).is_some();
        if removed {
            self.dispatcher.released.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(busy: &[bool]) -> SlotTable {
        SlotTable {
            busy: busy.to_vec(),
            waiting: BTreeMap::new(),
        }
    }

    #[test]
    fn single_reservation_takes_lowest_free_index() {
        let mut slots = table(&[true, false, false]);
        assert_eq!(slots.try_reserve(0, &[0, 1, 2], false), Some(vec![1]));
        assert_eq!(slots.busy, [true, true, false]);
    }

    #[test]
    fn gang_reservation_is_all_or_nothing() {
        let mut slots = table(&[false, true, false]);
        assert_eq!(slots.try_reserve(0, &[0, 1, 2], true), None);
        assert_eq!(slots.busy, [false, true, false]);

        slots.busy[1] = false;
        assert_eq!(slots.try_reserve(0, &[0, 1, 2], true), Some(vec![0, 1, 2]));
        assert_eq!(slots.busy, [true, true, true]);
    }

    #[test]
    fn earlier_overlapping_waiter_goes_first() {
        let mut slots = table(&[false, false, false]);
        slots.waiting.insert(3, vec![0, 1, 2]);

        assert_eq!(slots.try_reserve(5, &[1], false), None);
        // earlier tickets and disjoint sets are not held back
        assert_eq!(slots.try_reserve(2, &[1], false), Some(vec![1]));
        slots.waiting.insert(4, vec![0]);
        assert_eq!(slots.try_reserve(6, &[2], false), None);
        slots.waiting.remove(&3);
        assert_eq!(slots.try_reserve(6, &[2], false), Some(vec![2]));
    }
}
