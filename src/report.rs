//! Multi-river report fetching over a fixed pool of worker threads.
//!
//! Workers share nothing with the caller: each builds its own fetcher,
//! receives jobs on its own channel and answers on a shared result channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::{App, ProgressEvent, ProgressSink};
use crate::domain::{ForecastDate, RiverId};
use crate::error::HydroError;
use crate::geoglows::BiasCorrectedSource;
use crate::series::RiverReportData;
use crate::zarr::ChunkedArraySource;

pub const DEFAULT_POOL_SIZE: usize = 3;

/// How the batch completes when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Wait for every task and report each outcome.
    #[default]
    SettleAll,
    /// Reject with the first failure; queued tasks are not started.
    FailFast,
}

/// One river round-trip: the uncorrected forecast plus return periods.
pub trait RiverFetcher {
    fn fetch_report_data(
        &self,
        river_id: RiverId,
        date: &ForecastDate,
    ) -> Result<RiverReportData, HydroError>;
}

impl<Z: ChunkedArraySource, B: BiasCorrectedSource> RiverFetcher for App<Z, B> {
    fn fetch_report_data(
        &self,
        river_id: RiverId,
        date: &ForecastDate,
    ) -> Result<RiverReportData, HydroError> {
        let forecast = self.get_forecast(river_id, date, false)?;
        let return_periods = self.get_return_periods(river_id, false)?;
        Ok(RiverReportData {
            river_id,
            forecast,
            return_periods,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTask {
    pub river_id: RiverId,
    pub forecast_date: ForecastDate,
}

impl BatchTask {
    pub fn new(river_id: RiverId, forecast_date: ForecastDate) -> Self {
        Self {
            river_id,
            forecast_date,
        }
    }
}

/// Task indices per worker: task `i` goes to worker `i % pool_size`, and
/// each worker's list keeps submission order.
pub fn assign_round_robin(task_count: usize, pool_size: usize) -> Vec<Vec<usize>> {
    let pool_size = pool_size.max(1);
    let mut assignment = vec![Vec::new(); pool_size];
    for index in 0..task_count {
        assignment[index % pool_size].push(index);
    }
    assignment
}

struct Job {
    index: usize,
    task: BatchTask,
}

enum WorkerMessage {
    Started {
        worker: usize,
        index: usize,
    },
    Finished {
        worker: usize,
        index: usize,
        data: Box<RiverReportData>,
    },
    Failed {
        worker: usize,
        index: usize,
        error: HydroError,
    },
}

#[derive(Debug)]
pub struct TaskResult {
    pub index: usize,
    pub river_id: RiverId,
    pub worker: usize,
    pub outcome: Result<RiverReportData, HydroError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per submitted task, in submission order.
    pub results: Vec<TaskResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &RiverReportData> {
        self.results
            .iter()
            .filter_map(|result| result.outcome.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (RiverId, &HydroError)> {
        self.results.iter().filter_map(|result| match &result.outcome {
            Err(err) => Some((result.river_id, err)),
            Ok(_) => None,
        })
    }

    pub fn summary(&self) -> BatchSummary {
        let rivers: Vec<RiverSummary> = self
            .results
            .iter()
            .map(|result| RiverSummary {
                river_id: result.river_id,
                status: if result.outcome.is_ok() {
                    "finished"
                } else {
                    "error"
                },
                timesteps: result.outcome.as_ref().ok().map(|data| data.forecast.len()),
                error: result.outcome.as_ref().err().map(ToString::to_string),
            })
            .collect();
        BatchSummary {
            total: rivers.len(),
            succeeded: rivers.iter().filter(|river| river.error.is_none()).count(),
            failed: rivers.iter().filter(|river| river.error.is_some()).count(),
            rivers,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rivers: Vec<RiverSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiverSummary {
    pub river_id: RiverId,
    pub status: &'static str,
    pub timesteps: Option<usize>,
    pub error: Option<String>,
}

/// Runs batch tasks across `pool_size` workers. `factory` is called once
/// inside each worker thread with the worker's index.
pub struct BatchOrchestrator<F> {
    pool_size: usize,
    policy: FailurePolicy,
    factory: F,
}

impl<F, W> BatchOrchestrator<F>
where
    F: Fn(usize) -> Result<W, HydroError> + Sync,
    W: RiverFetcher,
{
    pub fn new(pool_size: usize, policy: FailurePolicy, factory: F) -> Self {
        Self {
            pool_size: pool_size.max(1),
            policy,
            factory,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn run(
        &self,
        tasks: Vec<BatchTask>,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, HydroError> {
        let total = tasks.len();
        if total == 0 {
            return Ok(BatchReport::default());
        }
        let start = Instant::now();
        let river_ids: Vec<RiverId> = tasks.iter().map(|task| task.river_id).collect();
        let mut worker_of = vec![0usize; total];
        for (worker, indices) in assign_round_robin(total, self.pool_size)
            .into_iter()
            .enumerate()
        {
            for index in indices {
                worker_of[index] = worker;
            }
        }
        let mut outcomes: Vec<Option<(usize, Result<RiverReportData, HydroError>)>> =
            (0..total).map(|_| None).collect();
        let cancelled = AtomicBool::new(false);
        let mut first_failure: Option<HydroError> = None;

        info!(tasks = total, pool = self.pool_size, "dispatching report tasks");
        thread::scope(|scope| {
            let (result_tx, result_rx) = mpsc::channel::<WorkerMessage>();
            let mut job_senders = Vec::with_capacity(self.pool_size);
            for worker in 0..self.pool_size {
                let (job_tx, job_rx) = mpsc::channel::<Job>();
                job_senders.push(job_tx);
                let result_tx = result_tx.clone();
                let factory = &self.factory;
                let cancelled = &cancelled;
                scope.spawn(move || run_worker(worker, factory, job_rx, result_tx, cancelled));
            }
            drop(result_tx);

            for (index, task) in tasks.into_iter().enumerate() {
                let worker = worker_of[index];
                if job_senders[worker].send(Job { index, task }).is_err() {
                    warn!(worker, index, "worker stopped before accepting its task");
                }
            }
            drop(job_senders);

            let mut completed = 0usize;
            while completed < total {
                let Ok(message) = result_rx.recv() else {
                    break;
                };
                let (worker, index, outcome) = match message {
                    WorkerMessage::Started { worker, index } => {
                        debug!(worker, index, river = %river_ids[index], "task started");
                        continue;
                    }
                    WorkerMessage::Finished {
                        worker,
                        index,
                        data,
                    } => (worker, index, Ok(*data)),
                    WorkerMessage::Failed {
                        worker,
                        index,
                        error,
                    } => (worker, index, Err(error)),
                };
                let Some(slot) = outcomes.get_mut(index) else {
                    continue;
                };
                if slot.is_some() {
                    continue;
                }
                let river_id = river_ids[index];
                let status = match &outcome {
                    Ok(_) => "finished",
                    Err(err) => {
                        warn!(worker, river = %river_id, %err, "report task failed");
                        "error"
                    }
                };
                completed += 1;
                sink.event(ProgressEvent {
                    message: format!(
                        "progress {completed}/{total}; river {river_id} {status}"
                    ),
                    elapsed: Some(start.elapsed()),
                });

                if let Err(err) = &outcome
                    && self.policy == FailurePolicy::FailFast
                {
                    first_failure = Some(HydroError::TaskFailed {
                        river_id: river_id.get(),
                        cause: err.to_string(),
                    });
                    cancelled.store(true, Ordering::SeqCst);
                    *slot = Some((worker, outcome));
                    break;
                }
                *slot = Some((worker, outcome));
            }
        });

        if let Some(err) = first_failure {
            return Err(err);
        }

        let results = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let worker = worker_of[index];
                let (worker, outcome) =
                    slot.unwrap_or((worker, Err(HydroError::WorkerUnavailable(worker))));
                TaskResult {
                    index,
                    river_id: river_ids[index],
                    worker,
                    outcome,
                }
            })
            .collect();
        Ok(BatchReport { results })
    }
}

fn run_worker<F, W>(
    worker: usize,
    factory: &F,
    jobs: mpsc::Receiver<Job>,
    results: mpsc::Sender<WorkerMessage>,
    cancelled: &AtomicBool,
) where
    F: Fn(usize) -> Result<W, HydroError>,
    W: RiverFetcher,
{
    let fetcher = match factory(worker) {
        Ok(fetcher) => Some(fetcher),
        Err(err) => {
            warn!(worker, %err, "report worker failed to start");
            None
        }
    };
    for job in jobs {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let index = job.index;
        // the caller may have stopped listening; nothing left to report to
        let _ = results.send(WorkerMessage::Started { worker, index });
        let message = match &fetcher {
            Some(fetcher) => match fetcher.fetch_report_data(job.task.river_id, &job.task.forecast_date) {
                Ok(data) => WorkerMessage::Finished {
                    worker,
                    index,
                    data: Box::new(data),
                },
                Err(error) => WorkerMessage::Failed {
                    worker,
                    index,
                    error,
                },
            },
            None => WorkerMessage::Failed {
                worker,
                index,
                error: HydroError::WorkerUnavailable(worker),
            },
        };
        let _ = results.send(message);
    }
}
