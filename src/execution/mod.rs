//! Task Graph Executor
//!
//! Expands an Intent into independent gateway tasks, runs them all
//! concurrently under per-task sub-timeouts, and assembles the EvidenceSet
//! once every task has a terminal result.
//!
//! Individual task failures are data, not errors. The executor only fails
//! wholesale when no mandatory task produced anything.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::{RequestScope, TimeBudget};
use crate::error::{AgentError, GatewayError};
use crate::gateway::FundGateway;
use crate::models::{
    EvidenceEntry, EvidenceSet, FundRef, FundSummary, Intent, Task, TaskFailure, TaskKind,
    TaskOutput, TaskResult,
};
use crate::retry::RetryPolicy;
use crate::Result;

/// Maximum tasks per request (defensive guard)
const MAX_TASKS_PER_REQUEST: usize = 16;

/// Matches requested per search unless configured otherwise
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

pub struct TaskGraphExecutor {
    gateway: Arc<dyn FundGateway>,
    retry: RetryPolicy,
    search_limit: usize,
}

impl TaskGraphExecutor {
    pub fn new(gateway: Arc<dyn FundGateway>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            retry,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    /// Cap on matches a Search or ResolveName task asks the gateway for
    pub fn with_search_limit(mut self, search_limit: usize) -> Self {
        self.search_limit = search_limit.max(1);
        self
    }

    /// Task set for an intent, highest priority first.
    ///
    /// Exact codes become Lookups, names become ResolveName tasks, and a
    /// requested window adds one best-effort History task per code.
    pub fn expand(intent: &Intent) -> Vec<Task> {
        let mut tasks: Vec<Task> = Vec::new();

        let (funds, window): (Vec<&FundRef>, _) = match intent {
            Intent::Search { term } => {
                return vec![Task::new(TaskKind::Search { term: term.clone() })];
            }
            Intent::Lookup { fund, window } => (vec![fund], *window),
            Intent::Compare { funds, window } => (funds.iter().collect(), *window),
        };

        for fund in &funds {
            let kind = match fund {
                FundRef::Code(code) => TaskKind::Lookup { code: code.clone() },
                FundRef::Name(name) => TaskKind::ResolveName { name: name.clone() },
            };
            tasks.push(Task::new(kind));
        }

        if let Some(window) = window {
            for fund in &funds {
                if let FundRef::Code(code) = fund {
                    tasks.push(Task::new(TaskKind::History {
                        code: code.clone(),
                        window,
                    }));
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        tasks.retain(|t| seen.insert(t.id.clone()));
        // stable: intent order is kept within a priority class
        tasks.sort_by_key(|t| t.priority);
        tasks
    }

    pub async fn execute(
        &self,
        scope: &RequestScope,
        intent: Intent,
        budget: TimeBudget,
    ) -> Result<EvidenceSet> {
        let tasks = Self::expand(&intent);

        if tasks.len() > MAX_TASKS_PER_REQUEST {
            return Err(AgentError::InsufficientEvidence(format!(
                "request expands to {} tasks (max {})",
                tasks.len(),
                MAX_TASKS_PER_REQUEST
            )));
        }

        scope.check_cancelled()?;

        let started = Instant::now();
        let sub_timeout = budget.share(tasks.len());

        debug!(
            request_id = %scope.request_id,
            task_count = tasks.len(),
            sub_timeout_ms = sub_timeout.as_millis() as u64,
            "Dispatching tasks"
        );

        let mut running = JoinSet::new();
        for (index, task) in tasks.iter().cloned().enumerate() {
            let gateway = self.gateway.clone();
            let retry = self.retry;
            let search_limit = self.search_limit;
            running.spawn(async move {
                let result =
                    run_task(gateway.as_ref(), &retry, search_limit, &task, sub_timeout).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        let mut deadline_hit = false;

        loop {
            tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => {
                    running.abort_all();
                    warn!(request_id = %scope.request_id, "Execution cancelled");
                    return Err(AgentError::Cancelled);
                }
                _ = tokio::time::sleep_until(budget.deadline()) => {
                    running.abort_all();
                    deadline_hit = true;
                    break;
                }
                joined = running.join_next() => match joined {
                    Some(Ok((index, result))) => results[index] = Some(result),
                    Some(Err(e)) => warn!(error = %e, "Task did not complete"),
                    None => break,
                },
            }
        }

        let entries: Vec<EvidenceEntry> = tasks
            .into_iter()
            .zip(results)
            .map(|(task, result)| {
                let result = result.unwrap_or_else(|| {
                    TaskResult::Failure(if deadline_hit {
                        TaskFailure::Timeout
                    } else {
                        TaskFailure::UpstreamError("task aborted".to_string())
                    })
                });
                EvidenceEntry { task, result }
            })
            .collect();

        let evidence = EvidenceSet::assemble(intent, entries);

        info!(
            request_id = %scope.request_id,
            tasks = evidence.entries().len(),
            succeeded = evidence.success_count(),
            completeness = evidence.completeness(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task graph executed"
        );

        if evidence.mandatory_success_count() == 0 {
            return Err(no_evidence_error(&evidence));
        }

        Ok(evidence)
    }
}

/// Timeouts everywhere mean "no answer in time"; anything else means
/// "no answer possible".
fn no_evidence_error(evidence: &EvidenceSet) -> AgentError {
    let mandatory: Vec<(&Task, &TaskFailure)> = evidence
        .failures()
        .into_iter()
        .filter(|(task, _)| task.kind.is_mandatory())
        .collect();

    let detail = mandatory
        .iter()
        .map(|(task, failure)| format!("{}: {}", task.id, failure))
        .collect::<Vec<_>>()
        .join("; ");

    let all_timed_out = !mandatory.is_empty()
        && mandatory
            .iter()
            .all(|(_, failure)| matches!(failure, TaskFailure::Timeout));

    if all_timed_out {
        AgentError::ExecutorTimeout(detail)
    } else {
        AgentError::InsufficientEvidence(detail)
    }
}

async fn run_task(
    gateway: &dyn FundGateway,
    retry: &RetryPolicy,
    search_limit: usize,
    task: &Task,
    limit: Duration,
) -> TaskResult {
    let started = Instant::now();

    let result = match tokio::time::timeout(limit, perform(gateway, retry, search_limit, &task.kind)).await {
        Ok(Ok(output)) => TaskResult::Success(output),
        Ok(Err(e)) => TaskResult::Failure(e.into()),
        Err(_) => TaskResult::Failure(TaskFailure::Timeout),
    };

    match &result {
        TaskResult::Success(_) => debug!(
            task_id = %task.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task succeeded"
        ),
        TaskResult::Failure(failure) => warn!(
            task_id = %task.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            %failure,
            "Task failed"
        ),
    }

    result
}

async fn perform(
    gateway: &dyn FundGateway,
    retry: &RetryPolicy,
    search_limit: usize,
    kind: &TaskKind,
) -> std::result::Result<TaskOutput, GatewayError> {
    match kind {
        TaskKind::Lookup { code } => {
            let record = retry.run("get_by_code", || gateway.get_by_code(code)).await?;
            Ok(TaskOutput::Fund { record })
        }

        TaskKind::Search { term } => {
            let funds = retry.run("search_by_name", || gateway.search_by_name(term, search_limit)).await?;
            if funds.is_empty() {
                return Err(GatewayError::NotFound(format!("no funds match '{}'", term)));
            }
            Ok(TaskOutput::Matches { funds })
        }

        TaskKind::ResolveName { name } => {
            let hits = retry.run("search_by_name", || gateway.search_by_name(name, search_limit)).await?;
            let best = best_match(name, &hits)
                .ok_or_else(|| GatewayError::NotFound(format!("no fund named '{}'", name)))?;

            debug!(name = %name, scheme_code = %best.scheme_code, "Resolved fund name");
            let code = best.scheme_code.clone();
            let record = retry.run("get_by_code", || gateway.get_by_code(&code)).await?;
            Ok(TaskOutput::Fund { record })
        }

        TaskKind::History { code, window } => {
            let points = retry
                .run("get_history", || gateway.get_history(code, *window))
                .await?;
            if points.is_empty() {
                return Err(GatewayError::NotFound(format!("{} has no NAV history", code)));
            }
            Ok(TaskOutput::History {
                code: code.clone(),
                window: *window,
                points,
            })
        }
    }
}

/// Exact name match, else the first direct-growth variant, else the first hit
fn best_match<'a>(name: &str, hits: &'a [FundSummary]) -> Option<&'a FundSummary> {
    let wanted = name.trim().to_lowercase();

    if let Some(exact) = hits
        .iter()
        .find(|h| h.scheme_name.trim().to_lowercase() == wanted)
    {
        return Some(exact);
    }

    let score = |hit: &FundSummary| {
        let lowered = hit.scheme_name.to_lowercase();
        lowered.contains("direct") as u8 + lowered.contains("growth") as u8
    };

    let mut best: Option<&FundSummary> = None;
    for hit in hits {
        if best.map_or(true, |b| score(hit) > score(b)) {
            best = Some(hit);
        }
    }
    best
}
