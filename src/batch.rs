//! Concurrent batch execution with per-task failure isolation.
//!
//! Every task runs on its own tokio task, so an error or even a panic in one
//! unit of work never reaches its siblings. [`run_batch`] returns only after
//! every task has reported, with one [`TaskOutcome`] per submitted task in
//! submission order. Retries are the work function's business, not ours.

use anyhow::Result;
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::error::CatalogError;

/// An independent unit of work identified by `id`.
pub struct Task<T> {
    pub id: String,
    work: BoxFuture<'static, Result<T>>,
}

impl<T> Task<T> {
    pub fn new<F>(id: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            work: Box::pin(work),
        }
    }
}

/// The typed result of one task: its value, or the error that stopped it.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub id: String,
    pub result: Result<T>,
}

/// A failed task as recorded in a build report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub id: String,
    pub message: String,
}

/// Run all tasks concurrently and wait for every one of them.
///
/// With `max_concurrency`, at most that many tasks do work at once; the
/// rest wait for a permit. Completion is still total.
pub async fn run_batch<T>(tasks: Vec<Task<T>>, max_concurrency: Option<usize>) -> Vec<TaskOutcome<T>>
where
    T: Send + 'static,
{
    let limiter = max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let mut ids = Vec::with_capacity(tasks.len());
    let mut handles = Vec::with_capacity(tasks.len());

    for task in tasks {
        let limiter = limiter.clone();
        ids.push(task.id);
        let work = task.work;
        handles.push(tokio::spawn(async move {
            let _permit = match limiter {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            work.await
        }));
    }

    let joined = join_all(handles).await;

    ids.into_iter()
        .zip(joined)
        .map(|(id, joined)| {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => Err(CatalogError::Task {
                    id: id.clone(),
                    message: join_err.to_string(),
                }
                .into()),
            };
            TaskOutcome { id, result }
        })
        .collect()
}

/// Split outcomes into successful values and logged failures.
///
/// Each failure is reported once through `tracing` and kept for the caller;
/// none of them is raised.
pub fn partition_outcomes<T>(outcomes: Vec<TaskOutcome<T>>) -> (Vec<T>, Vec<TaskFailure>) {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(value) => {
                debug!("Processed {}", outcome.id);
                values.push(value);
            }
            Err(e) => {
                error!("Error processing file {}: {:#}", outcome.id, e);
                failures.push(TaskFailure {
                    id: outcome.id,
                    message: format!("{:#}", e),
                });
            }
        }
    }

    (values, failures)
}
