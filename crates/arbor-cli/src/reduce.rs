// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Drives one reduction: a producer pool resolves values while a reduction
//! pool folds them.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arbor_core::{
    AsyncValue, DotProduct, Max, PoolConfig, Priority, ReduceFuture, ReduceOp, ReducePairTask,
    ReduceTask, ScheduleError, Scheduler, Sum, WorkerPool,
};
use clap::ValueEnum;
use tracing::{info, warn};

/// Operator selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OpKind {
    /// Sum of `0..count`.
    Sum,
    /// Largest of `0..count`.
    Max,
    /// Dot product of `[i]` with `[1.0]` for each `i`.
    Dot,
}

impl OpKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Dot => "dot",
        }
    }
}

/// What the producers generate.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Number of values.
    pub count: u32,
    /// Delay before each value resolves.
    pub delay: Duration,
    /// Producer pool size.
    pub producers: usize,
}

/// Outcome of [`run`], printed one `key: value` per line.
#[derive(Debug)]
pub struct Report {
    op: OpKind,
    result: String,
    arguments: usize,
    merges: usize,
    outstanding: usize,
    workers: usize,
    elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "op: {}", self.op.name())?;
        writeln!(f, "result: {}", self.result)?;
        writeln!(f, "arguments: {}", self.arguments)?;
        writeln!(f, "merges: {}", self.merges)?;
        writeln!(f, "outstanding: {}", self.outstanding)?;
        writeln!(f, "workers: {}", self.workers)?;
        write!(f, "elapsed_ms: {:.3}", self.elapsed.as_secs_f64() * 1e3)
    }
}

/// Runs `op` over `workload` on a reduction pool built from `pool`.
pub fn run(op: OpKind, workload: &Workload, pool: &PoolConfig) -> Result<Report> {
    let reducer = Arc::new(WorkerPool::new(pool).context("starting reduction pool")?);
    let producers =
        WorkerPool::with_workers(workload.producers).context("starting producer pool")?;
    info!(
        op = op.name(),
        count = workload.count,
        workers = reducer.workers(),
        producers = producers.workers(),
        "reduction started"
    );

    let workers = reducer.workers();
    let start = Instant::now();
    let report = match op {
        OpKind::Sum => {
            let future = single(Sum::<u64>::default(), workload, &reducer, &producers)?;
            finish(op, workers, &future, start, u64::to_string)?
        }
        OpKind::Max => {
            let future = single(Max::<u64>::default(), workload, &reducer, &producers)?;
            finish(op, workers, &future, start, |max| {
                (*max).map_or_else(|| "none".to_owned(), |m| m.to_string())
            })?
        }
        OpKind::Dot => {
            let future = dot(workload, &reducer, &producers)?;
            finish(op, workers, &future, start, f64::to_string)?
        }
    };
    info!(elapsed = ?report.elapsed, "reduction finished");

    producers.shutdown();
    Ok(report)
}

fn single<O>(
    op: O,
    workload: &Workload,
    reducer: &Arc<WorkerPool>,
    producers: &WorkerPool,
) -> Result<ReduceFuture<O::Result>>
where
    O: ReduceOp<Argument = u64>,
{
    let mut task = ReduceTask::new(op, Arc::clone(reducer));
    for i in 0..workload.count {
        let value = AsyncValue::new();
        task.add(value.clone())?;
        produce(producers, value, u64::from(i), workload.delay)?;
    }
    Ok(task.submit())
}

fn dot(
    workload: &Workload,
    reducer: &Arc<WorkerPool>,
    producers: &WorkerPool,
) -> Result<ReduceFuture<f64>> {
    let mut task = ReducePairTask::new(DotProduct, Arc::clone(reducer));
    for i in 0..workload.count {
        let left = AsyncValue::new();
        task.add(left.clone(), vec![1.0])?;
        produce(producers, left, vec![f64::from(i)], workload.delay)?;
    }
    Ok(task.submit())
}

/// Queues a producer task that resolves `value` to `item` after `delay`.
fn produce<T>(
    producers: &WorkerPool,
    value: AsyncValue<T>,
    item: T,
    delay: Duration,
) -> Result<(), ScheduleError>
where
    T: Send + Sync + 'static,
{
    producers.schedule(
        Box::new(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if let Err(err) = value.set(item) {
                warn!(%err, "value resolved twice");
            }
        }),
        Priority::Normal,
    )
}

fn finish<R>(
    op: OpKind,
    workers: usize,
    future: &ReduceFuture<R>,
    start: Instant,
    render: impl FnOnce(&R) -> String,
) -> Result<Report> {
    let result = render(future.wait().context("reduction failed")?);
    let elapsed = start.elapsed();
    let progress = future.progress();
    Ok(Report {
        op,
        result,
        arguments: progress.consumed(),
        merges: progress.merges(),
        outstanding: progress.outstanding(),
        workers,
        elapsed,
    })
}
