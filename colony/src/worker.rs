//! Bounded worker pool for CPU-bound detection.
//!
//! Requests go through a bounded `crossbeam-channel` queue to a fixed set of
//! worker threads, so callers never run detection on their own thread. Every
//! request gets a per-image sequence number. By default every queued request
//! runs and writes its result, so the last writer wins. With skipping
//! enabled, a queued request that is already superseded by a newer queued one
//! for the same image is dropped before it starts.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::config::DetectionParams;
use crate::error::{ColonyError, ColonyResult};
use crate::image_proc::encode_mask_png;
use crate::pipeline::{ColonyDetector, DetectionResult};
use crate::session::{ImageId, SessionStore};

/// Result of a detect request that ran.
#[derive(Debug, Clone)]
pub struct DetectResponse {
    /// Sequence number of the request
    pub sequence: u64,
    /// Whether no newer request for the image was queued when this one
    /// finished writing
    pub latest: bool,
    /// The stored result
    pub result: Arc<DetectionResult>,
}

impl DetectResponse {
    pub fn count(&self) -> usize {
        self.result.count()
    }
}

/// How a submitted detect request ended
#[derive(Debug, Clone)]
pub enum DetectOutcome {
    Completed(DetectResponse),
    /// Skipped before starting because a newer request was queued
    Superseded {
        image_id: ImageId,
        sequence: u64,
        latest: u64,
    },
}

impl DetectOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            DetectOutcome::Completed(response) => response.sequence,
            DetectOutcome::Superseded { sequence, .. } => *sequence,
        }
    }

    /// The response, if the request ran
    pub fn completed(self) -> Option<DetectResponse> {
        match self {
            DetectOutcome::Completed(response) => Some(response),
            DetectOutcome::Superseded { .. } => None,
        }
    }
}

struct Job {
    image: ImageId,
    sequence: u64,
    params: DetectionParams,
    include_mask: bool,
    reply: Sender<ColonyResult<DetectOutcome>>,
}

/// Handle to one submitted request
#[derive(Debug)]
pub struct DetectTicket {
    image: ImageId,
    sequence: u64,
    reply: Receiver<ColonyResult<DetectOutcome>>,
}

impl DetectTicket {
    pub fn image_id(&self) -> ImageId {
        self.image
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Block until the request finishes.
    pub fn wait(self) -> ColonyResult<DetectOutcome> {
        self.reply
            .recv()
            .map_err(|_| ColonyError::WorkerUnavailable)?
    }
}

struct Worker {
    store: Arc<dyn SessionStore>,
    skip_superseded: bool,
}

impl Worker {
    fn run(&self, jobs: Receiver<Job>) {
        for job in jobs.iter() {
            let outcome = self.process(&job);
            if let Err(e) = &outcome {
                warn!(image = %job.image, sequence = job.sequence, "Detection failed: {}", e);
            }
            // The submitter may have dropped its ticket.
            let _ = job.reply.send(outcome);
        }
    }

    fn process(&self, job: &Job) -> ColonyResult<DetectOutcome> {
        let entry = self.store.image(job.image)?;
        if self.skip_superseded {
            let newest = entry.queued_sequence;
            if newest > job.sequence {
                debug!(image = %job.image, sequence = job.sequence, newest, "Skipping superseded detection");
                return Ok(DetectOutcome::Superseded {
                    image_id: job.image,
                    sequence: job.sequence,
                    latest: newest,
                });
            }
        }

        let start = Instant::now();
        let detector = ColonyDetector::new(&job.params);
        let detection = detector.detect_bytes(&entry.bytes, &entry.filename)?;
        let mask_png = if job.include_mask {
            Some(encode_mask_png(detection.mask.view())?)
        } else {
            None
        };

        let result = Arc::new(DetectionResult {
            image_id: job.image,
            session_id: entry.session_id,
            colonies: detection.colonies,
            params: job.params.clone(),
            mask_png,
            sequence: job.sequence,
            width: entry.width,
            height: entry.height,
            detection_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });

        let mut latest = false;
        let mut pending = Some(result.clone());
        self.store.update_image(job.image, &mut |entry| {
            if let Some(result) = pending.take() {
                entry.detection = Some(result);
            }
            latest = entry.queued_sequence <= job.sequence;
            Ok(())
        })?;

        debug!(
            image = %job.image,
            sequence = job.sequence,
            count = result.count(),
            latest,
            elapsed_ms = result.detection_time_ms,
            "Stored detection"
        );
        Ok(DetectOutcome::Completed(DetectResponse {
            sequence: job.sequence,
            latest,
            result,
        }))
    }
}

/// Fixed-size pool of detection threads fed by a bounded queue.
///
/// Dropping the pool closes the queue, lets workers drain what is already
/// queued and joins them.
pub struct DetectionPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    store: Arc<dyn SessionStore>,
}

impl DetectionPool {
    pub fn new(
        store: Arc<dyn SessionStore>,
        threads: usize,
        queue_capacity: usize,
        skip_superseded: bool,
    ) -> ColonyResult<Self> {
        let (sender, receiver) = bounded::<Job>(queue_capacity.max(1));

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let worker = Worker {
                store: store.clone(),
                skip_superseded,
            };
            let jobs = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("colony-detect-{index}"))
                .spawn(move || worker.run(jobs))?;
            workers.push(handle);
        }

        info!(threads = workers.len(), queue_capacity, "Started detection pool");
        Ok(Self {
            sender: Some(sender),
            workers,
            store,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    fn prepare(
        &self,
        image: ImageId,
        params: DetectionParams,
        include_mask: bool,
    ) -> ColonyResult<(Job, DetectTicket)> {
        let sequence = self.store.next_detect_sequence(image)?;
        let (reply, receiver) = bounded(1);
        let job = Job {
            image,
            sequence,
            params,
            include_mask,
            reply,
        };
        let ticket = DetectTicket {
            image,
            sequence,
            reply: receiver,
        };
        Ok((job, ticket))
    }

    /// Called only once the job is in the queue. A sequence whose send
    /// failed is never recorded, so it cannot mark a later result as stale.
    fn mark_queued(&self, image: ImageId, sequence: u64) {
        if let Err(e) = self.store.record_queued(image, sequence) {
            warn!(image = %image, sequence, "Failed to record queued detection: {}", e);
        }
    }

    /// Queue a request, failing with [`ColonyError::QueueFull`] when no slot is free.
    pub fn try_submit(
        &self,
        image: ImageId,
        params: DetectionParams,
        include_mask: bool,
    ) -> ColonyResult<DetectTicket> {
        let sender = self.sender.as_ref().ok_or(ColonyError::WorkerUnavailable)?;
        let (job, ticket) = self.prepare(image, params, include_mask)?;
        match sender.try_send(job) {
            Ok(()) => {
                self.mark_queued(image, ticket.sequence);
                Ok(ticket)
            }
            Err(TrySendError::Full(_)) => Err(ColonyError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(ColonyError::WorkerUnavailable),
        }
    }

    /// Queue a request, waiting for a free slot if the queue is full.
    pub fn submit(
        &self,
        image: ImageId,
        params: DetectionParams,
        include_mask: bool,
    ) -> ColonyResult<DetectTicket> {
        let sender = self.sender.as_ref().ok_or(ColonyError::WorkerUnavailable)?;
        let (job, ticket) = self.prepare(image, params, include_mask)?;
        sender
            .send(job)
            .map_err(|_| ColonyError::WorkerUnavailable)?;
        self.mark_queued(image, ticket.sequence);
        Ok(ticket)
    }
}

impl Drop for DetectionPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Detection worker panicked");
            }
        }
    }
}
