//! Dependency-aware concurrent execution of per-node tasks.
//!
//! A node is launched once every dependency inside the pass has succeeded.
//! When a node fails, everything that depends on it is skipped; independent
//! branches keep running. Node outcomes are written only by the scheduler
//! loop, never by the tasks themselves.

use crate::dependency::Node;
use crate::error::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum NodeOutcome<T> {
    Done(T),
    Failed(String),
    /// Not attempted; the string names the reason (usually a dependency).
    Skipped(String),
}

impl<T> NodeOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, NodeOutcome::Done(_))
    }
}

/// What the scheduler tells its observer.
#[derive(Debug)]
pub enum Event<P> {
    Launched,
    Progress(P),
    Succeeded,
    Failed(String),
    Skipped(String),
}

/// Handed to each task so it can report intermediate progress.
#[derive(Debug, Clone)]
pub struct Progress<P> {
    node: Node,
    tx: mpsc::UnboundedSender<(Node, P)>,
}

impl<P> Progress<P> {
    pub fn report(&self, update: P) {
        // The receiver lives as long as the pass; a send can only fail after it ended.
        let _ = self.tx.send((self.node.clone(), update));
    }
}

/// Result of one scheduled pass.
#[derive(Debug)]
pub struct Schedule<T> {
    pub outcomes: BTreeMap<Node, NodeOutcome<T>>,
    /// Nodes in the order they finished successfully.
    pub completed: Vec<Node>,
    /// Failures of nodes that were attempted. Skips are not repeated here.
    pub errors: Vec<Error>,
}

impl<T> Schedule<T> {
    pub fn outcome(&self, node: &Node) -> Option<&NodeOutcome<T>> {
        self.outcomes.get(node)
    }

    pub fn skipped(&self) -> Vec<&Node> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, NodeOutcome::Skipped(_)))
            .map(|(n, _)| n)
            .collect()
    }

    /// `Ok` when nothing failed; otherwise every failure, aggregated.
    pub fn into_result(self) -> Result<()> {
        Error::aggregate(self.errors)
    }
}

pub struct Scheduler {
    parallelism: usize,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(parallelism: usize, cancel: CancellationToken) -> Self {
        Self {
            parallelism: parallelism.max(1),
            cancel,
        }
    }

    /// Run `task` for every node of `order`, which must be topologically sorted.
    ///
    /// `dependencies` may name nodes outside `order`; those are treated as
    /// already satisfied.
    pub async fn run<T, P, D, F, Fut, O>(
        &self,
        order: &[Node],
        dependencies: D,
        mut task: F,
        mut observe: O,
    ) -> Schedule<T>
    where
        D: Fn(&Node) -> Vec<Node>,
        F: FnMut(Node, Progress<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(&Node, Event<P>),
    {
        let members: BTreeSet<&Node> = order.iter().collect();
        let deps: BTreeMap<Node, Vec<Node>> = order
            .iter()
            .map(|node| {
                let within: Vec<Node> = dependencies(node)
                    .into_iter()
                    .filter(|d| members.contains(d) && d != node)
                    .collect();
                (node.clone(), within)
            })
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<(Node, P)>();
        let mut pending: Vec<Node> = order.to_vec();
        let mut outcomes: BTreeMap<Node, NodeOutcome<T>> = BTreeMap::new();
        let mut completed = Vec::new();
        let mut errors = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            let mut i = 0;
            while i < pending.len() {
                let node_deps = deps.get(&pending[i]).map(Vec::as_slice).unwrap_or(&[]);

                let blocked = node_deps.iter().find(|d| {
                    matches!(
                        outcomes.get(*d),
                        Some(NodeOutcome::Failed(_)) | Some(NodeOutcome::Skipped(_))
                    )
                });
                if let Some(blocker) = blocked {
                    let reason = format!("dependency '{}' did not complete", blocker.name());
                    let node = pending.remove(i);
                    tracing::warn!("Skipping '{}': {}", node.name(), reason);
                    observe(&node, Event::Skipped(reason.clone()));
                    outcomes.insert(node, NodeOutcome::Skipped(reason));
                    continue;
                }

                if self.cancel.is_cancelled() {
                    let node = pending.remove(i);
                    observe(&node, Event::Skipped("cancelled".to_string()));
                    outcomes.insert(node, NodeOutcome::Skipped("cancelled".to_string()));
                    continue;
                }

                let ready = node_deps
                    .iter()
                    .all(|d| outcomes.get(d).is_some_and(NodeOutcome::is_done));
                if ready && in_flight.len() < self.parallelism {
                    let node = pending.remove(i);
                    observe(&node, Event::Launched);
                    let fut = task(
                        node.clone(),
                        Progress {
                            node: node.clone(),
                            tx: tx.clone(),
                        },
                    );
                    in_flight.push(async move { (node, fut.await) });
                    continue;
                }
                i += 1;
            }

            if in_flight.is_empty() {
                while let Ok((node, update)) = rx.try_recv() {
                    observe(&node, Event::Progress(update));
                }
                // Only reachable with a mis-sorted order; never spin.
                for node in pending.drain(..) {
                    let reason = "dependencies never became ready".to_string();
                    observe(&node, Event::Skipped(reason.clone()));
                    outcomes.insert(node, NodeOutcome::Skipped(reason));
                }
                break;
            }

            tokio::select! {
                Some((node, result)) = in_flight.next() => {
                    while let Ok((n, update)) = rx.try_recv() {
                        observe(&n, Event::Progress(update));
                    }
                    match result {
                        Ok(value) => {
                            observe(&node, Event::Succeeded);
                            completed.push(node.clone());
                            outcomes.insert(node, NodeOutcome::Done(value));
                        }
                        Err(e) => {
                            let message = e.to_string();
                            observe(&node, Event::Failed(message.clone()));
                            outcomes.insert(node, NodeOutcome::Failed(message));
                            errors.push(e);
                        }
                    }
                }
                Some((node, update)) = rx.recv() => {
                    observe(&node, Event::Progress(update));
                }
                else => break,
            }
        }

        Schedule {
            outcomes,
            completed,
            errors,
        }
    }
}
