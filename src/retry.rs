//! Bounded retries with a parameter relaxation schedule.
//!
//! Each attempt gets search parameters a little looser than the previous
//! one: a lower score threshold and room for more results. An attempt that
//! produces nothing, or fails, moves on to the next; the caller decides what
//! to fall back to once the schedule is exhausted.

use std::future::Future;

use tracing::{info, warn};

/// Search parameters in effect for one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptParams {
    pub attempt: u32,
    pub score_threshold: f64,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationSchedule {
    pub max_attempts: u32,
    pub base_score_threshold: f64,
    /// Multiplier applied to the threshold per extra attempt
    pub threshold_decay: f64,
    pub base_max_results: usize,
    pub max_results_step: usize,
}

impl Default for RelaxationSchedule {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_score_threshold: 0.1,
            threshold_decay: 0.9,
            base_max_results: 1,
            max_results_step: 1,
        }
    }
}

impl RelaxationSchedule {
    /// Parameters for a 1-based attempt number.
    pub fn params_for(&self, attempt: u32) -> AttemptParams {
        let step = attempt.saturating_sub(1);
        AttemptParams {
            attempt,
            score_threshold: self.base_score_threshold * self.threshold_decay.powi(step as i32),
            max_results: self.base_max_results + self.max_results_step * step as usize,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome<T> {
    Completed { attempt: u32, value: T },
    Exhausted { attempts: u32, last_error: Option<anyhow::Error> },
}

impl<T> RunOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RunOutcome::Completed { attempt, .. } => *attempt,
            RunOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResilientRunner {
    schedule: RelaxationSchedule,
}

impl ResilientRunner {
    pub fn new(schedule: RelaxationSchedule) -> Self {
        Self { schedule }
    }

    /// Drive `attempt_fn` until it yields a value or the schedule runs out.
    ///
    /// `Ok(None)` means "nothing found, relax and try again".
    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> RunOutcome<T>
    where
        F: FnMut(AttemptParams) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let max = self.schedule.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max {
            let params = self.schedule.params_for(attempt);
            info!(
                "=== Attempt {}/{} === score_threshold: {:.2}, max_search_results: {}",
                attempt, max, params.score_threshold, params.max_results
            );

            match attempt_fn(params).await {
                Ok(Some(value)) => return RunOutcome::Completed { attempt, value },
                Ok(None) if attempt < max => {
                    info!("Attempt {} found nothing. Retrying with adjusted parameters...", attempt);
                }
                Ok(None) => {
                    info!("Maximum attempts reached. Nothing found.");
                }
                Err(e) => {
                    warn!("Attempt {} failed: {:#}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        RunOutcome::Exhausted { attempts: max, last_error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn schedule_relaxes_per_attempt() {
        let schedule = RelaxationSchedule::default();
        let first = schedule.params_for(1);
        assert_eq!(first.max_results, 1);
        assert!((first.score_threshold - 0.1).abs() < 1e-12);

        let third = schedule.params_for(3);
        assert_eq!(third.max_results, 3);
        assert!((third.score_threshold - 0.081).abs() < 1e-12);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = ResilientRunner::default();

        let log = seen.clone();
        let outcome = runner
            .run(|params| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(params.max_results);
                    Ok(if params.attempt == 2 { Some("found") } else { None })
                }
            })
            .await;

        match outcome {
            RunOutcome::Completed { attempt, value } => {
                assert_eq!(attempt, 2);
                assert_eq!(value, "found");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn errors_count_as_failed_attempts() {
        let runner = ResilientRunner::new(RelaxationSchedule { max_attempts: 2, ..Default::default() });
        let outcome: RunOutcome<()> = runner
            .run(|params| async move {
                if params.attempt == 1 {
                    anyhow::bail!("search API down")
                }
                Ok(None)
            })
            .await;

        assert!(!outcome.is_completed());
        assert_eq!(outcome.attempts(), 2);
        match outcome {
            RunOutcome::Exhausted { last_error: Some(e), .. } => {
                assert_eq!(e.to_string(), "search API down");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let runner = ResilientRunner::new(RelaxationSchedule { max_attempts: 0, ..Default::default() });
        let outcome = runner.run(|_| async { Ok(Some(1)) }).await;
        assert!(outcome.is_completed());
    }
}
