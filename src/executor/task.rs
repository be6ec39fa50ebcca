use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::cancel::CancelToken;
use crate::error::{Result, StackError};

/// Outcome of a single step of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    /// Not finished; step again later.
    Pending,
    Complete(T),
}

/// A suspendable unit of work, advanced one step at a time.
#[async_trait]
pub trait Task: Send {
    type Output: Send;

    fn name(&self) -> String;

    async fn step(&mut self) -> Result<Progress<Self::Output>>;

    /// Called once when the task is abandoned because of a timeout or a
    /// cancellation, before the runner reports it.
    async fn abort(&mut self, _reason: &StackError) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Complete,
    Failed(String),
    Cancelled,
}

/// Drives a [`Task`] to completion: steps it, sleeps `poll_interval`
/// between pending steps, and stops early on timeout or cancellation.
pub struct TaskRunner<T: Task> {
    task: T,
    state: TaskState,
    poll_interval: Duration,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl<T: Task> TaskRunner<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            state: TaskState::NotStarted,
            poll_interval: Duration::from_secs(1),
            timeout: None,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound the run to `timeout`, measured from the start of [`TaskRunner::run`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound the run to an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Observe `token` instead of a private one.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn done(&self) -> bool {
        matches!(
            self.state,
            TaskState::Complete | TaskState::Failed(_) | TaskState::Cancelled
        )
    }

    /// Request cancellation. Takes effect at the task's next resumption
    /// point. Every holder of the same token observes it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn into_inner(self) -> T {
        self.task
    }

    /// Advance the task by exactly one step, without waiting.
    pub async fn step(&mut self) -> Result<Option<T::Output>> {
        if self.done() {
            return Err(StackError::TaskFinished(self.task.name()));
        }
        self.state = TaskState::Running;
        match self.task.step().await {
            Ok(Progress::Complete(output)) => {
                self.state = TaskState::Complete;
                Ok(Some(output))
            }
            Ok(Progress::Pending) => Ok(None),
            Err(e) => {
                self.state = TaskState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Run the task until it completes, fails, times out or is cancelled.
    pub async fn run(&mut self) -> Result<T::Output> {
        if self.done() {
            return Err(StackError::TaskFinished(self.task.name()));
        }
        self.state = TaskState::Running;

        let started = Instant::now();
        let deadline = match (self.deadline, self.timeout.map(|t| started + t)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        loop {
            if self.cancel.is_cancelled() {
                let error = StackError::Cancelled {
                    task: self.task.name(),
                };
                return Err(self.halt(error).await);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let error = self.timeout_error(started);
                return Err(self.halt(error).await);
            }

            // Steps are never interrupted; the deadline is checked between them.
            let stepped = self.task.step().await;

            match stepped {
                Ok(Progress::Complete(output)) => {
                    self.state = TaskState::Complete;
                    debug!(
                        task = %self.task.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Task complete"
                    );
                    return Ok(output);
                }
                Ok(Progress::Pending) => {}
                Err(e) => {
                    self.state = TaskState::Failed(e.to_string());
                    return Err(e);
                }
            }

            let mut wait = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    let error = self.timeout_error(started);
                    return Err(self.halt(error).await);
                }
                wait = wait.min(deadline - now);
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    fn timeout_error(&self, started: Instant) -> StackError {
        StackError::Timeout {
            task: self.task.name(),
            after: started.elapsed(),
        }
    }

    async fn halt(&mut self, error: StackError) -> StackError {
        self.state = if error.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Failed(error.to_string())
        };
        debug!(task = %self.task.name(), reason = %error, "Task aborted");
        self.task.abort(&error).await;
        error
    }
}
