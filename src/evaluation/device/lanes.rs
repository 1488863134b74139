//! # Lane Device
//!
//! A CPU compute device: a pool of worker threads ("lanes") that run the
//! kernel form's instruction streams over packed halo windows.
//!
//! ## Architecture
//!
//! Each lane is a worker thread with a dedicated job channel and result
//! channel. A dispatch splits the work items into one contiguous range per
//! lane, publishes the ranges round-robin and then collects one result per
//! published job until the deadline passes.
//!
//! Lanes only read the shared batch and each returns its own result vector,
//! so no lane ever writes memory another lane reads.
//!
//! Every dispatch gets a fresh job id. When a dispatch times out its jobs keep
//! running, and their late results are recognised by id and discarded by the
//! next dispatch.

use std::ops::Range;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use web_time::Instant;

use crate::error::{DispatchError, EvalError};
use crate::evaluation::device::{Batch, ComputeDevice};
use crate::rules::compiler::CompiledPlan;
use crate::rules::kernel::PackedWindow;

/// A slice of one dispatch, processed by a single lane.
struct LaneJob {
    id: u64,
    plan: Arc<CompiledPlan>,
    batch: Batch,
    range: Range<usize>,
}

/// Words computed for a job's range.
struct LaneResult {
    id: u64,
    start: usize,
    words: Result<Vec<u32>, EvalError>,
}

impl LaneJob {
    fn process(self) -> LaneResult {
        let words = self.run();
        LaneResult {
            id: self.id,
            start: self.range.start,
            words,
        }
    }

    fn run(&self) -> Result<Vec<u32>, EvalError> {
        let program = self.plan.program();
        let deltas = self.plan.kernel().deltas();
        let mut words = Vec::with_capacity(self.range.len() * 2);
        for &centre in &self.batch.centres[self.range.clone()] {
            let window = PackedWindow {
                cells: &self.batch.cells,
                centre: centre as usize,
                deltas,
            };
            let outcome = program.evaluate(&window)?;
            words.push(outcome.flags());
            words.push(outcome.next.pack());
        }
        Ok(words)
    }
}

/// The channels of one lane.
struct LaneChannel {
    job_sender: Sender<LaneJob>,
    result_receiver: Receiver<LaneResult>,
    _worker: JoinHandle<()>,
}

/// CPU compute device backed by worker threads.
pub struct LaneDevice {
    name: String,
    lanes: Vec<LaneChannel>,
    current_lane: usize,
    next_job: u64,
}

impl LaneDevice {
    /// Starts `count` lanes (at least one).
    ///
    /// # Returns
    /// The device, or `DispatchError::Lane` if a worker thread could not be spawned.
    pub fn new(count: usize) -> Result<Self, DispatchError> {
        let count = count.max(1);
        let mut lanes = Vec::with_capacity(count);

        for index in 0..count {
            let (job_tx, job_rx) = channel::<LaneJob>();
            let (result_tx, result_rx) = channel::<LaneResult>();

            let worker = thread::Builder::new()
                .name(format!("compute-lane-{index}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if result_tx.send(job.process()).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|err| DispatchError::Lane(err.to_string()))?;

            lanes.push(LaneChannel {
                job_sender: job_tx,
                result_receiver: result_rx,
                _worker: worker,
            });
        }

        info!("Started {count} compute lanes");
        Ok(LaneDevice {
            name: format!("cpu-lanes-{count}"),
            lanes,
            current_lane: 0,
            next_job: 0,
        })
    }

    /// Number of worker threads.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Waits for the result of job `id` on one lane, dropping stale results.
    ///
    /// # Returns
    /// `Ok(None)` once the deadline has passed.
    fn receive(
        &self,
        lane: usize,
        id: u64,
        deadline: Instant,
    ) -> Result<Option<LaneResult>, DispatchError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.lanes[lane].result_receiver.recv_timeout(remaining) {
                Ok(result) if result.id == id => return Ok(Some(result)),
                Ok(stale) => debug!("Discarding stale result of job {} on lane {lane}", stale.id),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DispatchError::Lane(format!("lane {lane} disconnected")))
                }
            }
        }
    }
}

impl ComputeDevice for LaneDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(
        &mut self,
        plan: &Arc<CompiledPlan>,
        batch: &Batch,
        timeout: Duration,
    ) -> Result<Vec<u32>, DispatchError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let items = batch.len();
        if items == 0 {
            return Ok(Vec::new());
        }

        let id = self.next_job;
        self.next_job += 1;

        let per_lane = items.div_ceil(self.lanes.len());
        let mut published = Vec::with_capacity(self.lanes.len());
        for start in (0..items).step_by(per_lane) {
            let lane = self.current_lane;
            self.current_lane = (self.current_lane + 1) % self.lanes.len();
            let job = LaneJob {
                id,
                plan: Arc::clone(plan),
                batch: batch.clone(),
                range: start..(start + per_lane).min(items),
            };
            self.lanes[lane]
                .job_sender
                .send(job)
                .map_err(|_| DispatchError::Lane(format!("lane {lane} is gone")))?;
            published.push(lane);
        }

        let mut words = vec![0u32; items * 2];
        for lane in published {
            let Some(result) = self.receive(lane, id, deadline)? else {
                warn!("Compute lanes missed the {} ms deadline", timeout.as_millis());
                return Err(DispatchError::Timeout(started.elapsed().as_millis()));
            };
            let chunk = result
                .words
                .map_err(|err| DispatchError::Lane(err.to_string()))?;
            let offset = result.start * 2;
            let end = offset + chunk.len();
            if end > words.len() {
                return Err(DispatchError::MalformedResult {
                    expected: words.len(),
                    actual: end,
                });
            }
            words[offset..end].copy_from_slice(&chunk);
        }

        debug!(
            "Lanes evaluated {items} cells of '{}' in {:?}",
            plan.name(),
            started.elapsed()
        );
        Ok(words)
    }
}
