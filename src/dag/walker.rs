use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use super::graph::DependencyGraph;
use crate::error::{Result, StackError};
use crate::executor::cancel::CancelToken;

/// Traversal direction of a task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies before dependents (create, update, resume).
    Forward,
    /// Dependents before dependencies (delete, suspend).
    Reverse,
}

/// The work for one node.
pub type NodeTask = BoxFuture<'static, Result<()>>;

/// Builds the work for a node, given its name.
pub type NodeExecutor = Arc<dyn Fn(String) -> NodeTask + Send + Sync>;

/// Final status of a node after a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Succeeded,
    Failed(String),
    /// Never started, because the walk stopped first.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct NodeResult {
    pub name: String,
    pub status: NodeStatus,
    pub elapsed: Duration,
}

/// Outcome of a whole walk: every node's result plus the first failure.
#[derive(Debug)]
pub struct WalkReport {
    pub results: Vec<NodeResult>,
    pub error: Option<StackError>,
}

impl WalkReport {
    pub fn succeeded(&self) -> usize {
        self.count(|s| *s == NodeStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, NodeStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == NodeStatus::Skipped)
    }

    fn count(&self, pred: impl Fn(&NodeStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn into_result(self) -> Result<Vec<NodeResult>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }
}

/// Message sent back from worker tasks to the walker.
enum WalkerMessage {
    NodeCompleted {
        name: String,
        result: Result<()>,
        elapsed: Duration,
    },
}

/// Runs one task per graph node, each only after all of its predecessors
/// (in the chosen direction) succeeded. Independent branches run
/// concurrently, bounded by the parallelism limit.
///
/// After the first failure no further node is started; nodes already running
/// are awaited and the failure is returned.
pub struct DependencyTaskGroup {
    direction: Direction,
    order: Vec<String>,
    predecessors: HashMap<String, Vec<String>>,
    successors: HashMap<String, Vec<String>>,
    parallelism: usize,
    cancel: CancelToken,
    progress: Option<&'static str>,
}

impl DependencyTaskGroup {
    pub fn new(graph: &DependencyGraph, direction: Direction) -> Self {
        let reverse = direction == Direction::Reverse;
        let order: Vec<String> = graph.walk(reverse).map(str::to_string).collect();

        let mut predecessors = HashMap::new();
        let mut successors = HashMap::new();
        for name in &order {
            let (before, after) = match direction {
                Direction::Forward => (graph.requires(name), graph.required_by(name)),
                Direction::Reverse => (graph.required_by(name), graph.requires(name)),
            };
            predecessors.insert(name.clone(), before);
            successors.insert(name.clone(), after);
        }

        Self {
            direction,
            order,
            predecessors,
            successors,
            parallelism: 0,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Limit the number of nodes in flight. 0 means unbounded.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Stop starting nodes once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Print a progress line per node, using `verb` ("Creating", ...).
    pub fn with_progress(mut self, verb: &'static str) -> Self {
        self.progress = Some(verb);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub async fn run(&self, executor: NodeExecutor) -> WalkReport {
        let node_count = self.order.len();
        if node_count == 0 {
            return WalkReport {
                results: Vec::new(),
                error: None,
            };
        }

        let semaphore = (self.parallelism > 0).then(|| Arc::new(Semaphore::new(self.parallelism)));
        let (tx, mut rx) = mpsc::channel::<WalkerMessage>(node_count);

        let mut waiting: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), self.predecessors[name].len()))
            .collect();
        let mut results: Vec<NodeResult> = Vec::with_capacity(node_count);
        let mut first_error: Option<StackError> = None;
        let mut in_flight = 0usize;

        for name in &self.order {
            if waiting[name.as_str()] == 0 {
                self.spawn_node(name, &executor, &semaphore, &tx);
                in_flight += 1;
            }
        }

        while in_flight > 0 {
            let Some(WalkerMessage::NodeCompleted {
                name,
                result,
                elapsed,
            }) = rx.recv().await
            else {
                break;
            };
            in_flight -= 1;

            match result {
                Ok(()) => {
                    debug!(
                        resource = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        progress = format!("{}/{}", results.len() + 1, node_count),
                        "Node completed"
                    );
                    if let Some(verb) = self.progress {
                        println!(
                            "{}: {} after {}",
                            name,
                            format!("{} complete", verb).green().bold(),
                            format_duration(elapsed).bold(),
                        );
                    }

                    if first_error.is_none() && !self.cancel.is_cancelled() {
                        for next in &self.successors[&name] {
                            if let Some(count) = waiting.get_mut(next.as_str()) {
                                *count -= 1;
                                if *count == 0 {
                                    self.spawn_node(next, &executor, &semaphore, &tx);
                                    in_flight += 1;
                                }
                            }
                        }
                    }
                    results.push(NodeResult {
                        name,
                        status: NodeStatus::Succeeded,
                        elapsed,
                    });
                }
                Err(e) => {
                    warn!(resource = %name, error = %e, "Node failed");
                    if self.progress.is_some() {
                        println!(
                            "{}: {} after {}: {}",
                            name.bold(),
                            "FAILED".red().bold(),
                            format_duration(elapsed),
                            e.to_string().red(),
                        );
                    }
                    results.push(NodeResult {
                        name,
                        status: NodeStatus::Failed(e.to_string()),
                        elapsed,
                    });
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let finished: std::collections::HashSet<String> =
            results.iter().map(|r| r.name.clone()).collect();
        let skipped: Vec<String> = self
            .order
            .iter()
            .filter(|name| !finished.contains(*name))
            .cloned()
            .collect();
        for name in &skipped {
            debug!(resource = %name, "Node skipped");
            results.push(NodeResult {
                name: name.clone(),
                status: NodeStatus::Skipped,
                elapsed: Duration::ZERO,
            });
        }

        if first_error.is_none() && !skipped.is_empty() && self.cancel.is_cancelled() {
            first_error = Some(StackError::Cancelled {
                task: format!("{} of {} nodes", skipped.len(), node_count),
            });
        }

        WalkReport {
            results,
            error: first_error,
        }
    }

    fn spawn_node(
        &self,
        name: &str,
        executor: &NodeExecutor,
        semaphore: &Option<Arc<Semaphore>>,
        tx: &mpsc::Sender<WalkerMessage>,
    ) {
        let name = name.to_string();
        let task = executor(name.clone());
        let semaphore = semaphore.clone();
        let tx = tx.clone();
        let progress = self.progress;

        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            if let Some(verb) = progress {
                println!("{}: {}...", name, verb.cyan());
            }

            let started = Instant::now();
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(StackError::Panicked(name.clone())),
            };

            let _ = tx
                .send(WalkerMessage::NodeCompleted {
                    name,
                    result,
                    elapsed: started.elapsed(),
                })
                .await;
        });
    }
}

/// Format a duration into a human-readable string.
pub(crate) fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs == 0 {
        format!("{}ms", elapsed.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else {
        let mins = secs / 60;
        let remaining = secs % 60;
        if remaining == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m{}s", mins, remaining)
        }
    }
}
