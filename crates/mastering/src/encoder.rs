//! Parallel frame encoding with back-pressure.
//!
//! Jobs are numbered on submission and handed back strictly in that order.
//! Local worker threads and one thread per remote server pull from a shared
//! bounded job channel. A job that fails remotely goes to a retry channel
//! that local workers drain before taking new work; a local failure ends the
//! run.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TryRecvError};
use reelkit_common::config::EncodingConfig;
use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_player::{Eyes, Image};
use reelkit_timeline_model::ProjectSettings;

use crate::codec::{EncodeRequest, FrameEncoder};
use crate::remote::encode_remote;

/// What to do for one picture.
#[derive(Debug, Clone)]
pub enum JobWork {
    Encode(Arc<Image>),
    /// Bytes carried over from a previous run.
    Reuse(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct FrameJob {
    /// Output frame index.
    pub frame: i64,
    pub eyes: Eyes,
    pub source_hash: String,
    pub work: JobWork,
}

/// A picture ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub frame: i64,
    pub eyes: Eyes,
    pub source_hash: String,
    pub data: Vec<u8>,
    pub reused: bool,
}

/// Encoder resources for one run.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub threads: usize,
    pub max_in_flight: usize,
    /// `host:port` of each remote server.
    pub servers: Vec<String>,
    pub remote_timeout: Duration,
    pub remote_failure_limit: u32,
    pub deprioritized_backoff: Duration,
    pub bandwidth: u64,
    pub fps: u32,
}

impl EncoderOptions {
    pub fn new(config: &EncodingConfig, settings: &ProjectSettings) -> ReelkitResult<Self> {
        config.validate()?;
        let port = config.ports().encode;
        Ok(Self {
            threads: config.threads,
            max_in_flight: config.max_in_flight(),
            servers: config
                .servers
                .iter()
                .map(|s| {
                    if s.contains(':') {
                        s.clone()
                    } else {
                        format!("{s}:{port}")
                    }
                })
                .collect(),
            remote_timeout: Duration::from_millis(config.remote_timeout_ms),
            remote_failure_limit: config.remote_failure_limit,
            deprioritized_backoff: Duration::from_millis(config.deprioritized_backoff_ms),
            bandwidth: settings.j2k_bandwidth,
            fps: settings.video_frame_rate,
        })
    }
}

/// Monotonic counters for progress reporting.
#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    reused: AtomicU64,
    remote: AtomicU64,
    retried: AtomicU64,
}

/// A snapshot of the encoder's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub submitted: u64,
    pub completed: u64,
    pub reused: u64,
    /// Encoded by a remote server.
    pub remote: u64,
    /// Sent back to local workers after a remote failure.
    pub retried: u64,
}

type WorkerResult = (u64, ReelkitResult<Vec<u8>>);

struct Shared {
    codec: Arc<dyn FrameEncoder>,
    counters: Counters,
    shutdown: AtomicBool,
}

/// Bounded, order-preserving encode pool.
pub struct Encoder {
    jobs: Option<Sender<EncodeRequest>>,
    results: Receiver<WorkerResult>,
    /// Metadata of jobs handed to workers, by sequence.
    pending: HashMap<u64, (i64, Eyes, String)>,
    reorder: BTreeMap<u64, EncodedFrame>,
    next_sequence: u64,
    next_emit: u64,
    in_flight: usize,
    max_in_flight: usize,
    bandwidth: u64,
    fps: u32,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Encoder {
    pub fn new(options: EncoderOptions, codec: Arc<dyn FrameEncoder>) -> ReelkitResult<Self> {
        if options.threads == 0 {
            return Err(ReelkitError::config(
                "At least one local encode thread is required",
            ));
        }
        let max_in_flight = options.max_in_flight.max(1);
        let (job_tx, job_rx) = bounded::<EncodeRequest>(max_in_flight);
        let (retry_tx, retry_rx) = unbounded::<EncodeRequest>();
        let (result_tx, result_rx) = unbounded::<WorkerResult>();
        let shared = Arc::new(Shared {
            codec,
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = vec![];
        for index in 0..options.threads {
            let jobs = job_rx.clone();
            let retry = retry_rx.clone();
            let results = result_tx.clone();
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("reelkit-encode-{index}"))
                .spawn(move || local_worker(jobs, retry, results, shared))?;
            workers.push(handle);
        }
        for server in &options.servers {
            let remote = RemoteWorker {
                server: server.clone(),
                timeout: options.remote_timeout,
                failure_limit: options.remote_failure_limit,
                backoff: options.deprioritized_backoff,
            };
            let jobs = job_rx.clone();
            let retry = retry_tx.clone();
            let results = result_tx.clone();
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("reelkit-remote-{server}"))
                .spawn(move || remote.run(jobs, retry, results, shared))?;
            workers.push(handle);
        }

        tracing::info!(
            threads = options.threads,
            servers = options.servers.len(),
            max_in_flight,
            codec = shared.codec.name(),
            "Encoder started"
        );

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            pending: HashMap::new(),
            reorder: BTreeMap::new(),
            next_sequence: 0,
            next_emit: 0,
            in_flight: 0,
            max_in_flight,
            bandwidth: options.bandwidth,
            fps: options.fps,
            shared,
            workers,
        })
    }

    pub fn stats(&self) -> EncoderStats {
        let c = &self.shared.counters;
        EncoderStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            reused: c.reused.load(Ordering::Relaxed),
            remote: c.remote.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
        }
    }

    /// Jobs submitted but not yet handed back.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Queue a job, returning every frame that is now ready in order.
    ///
    /// Blocks while the in-flight bound is reached.
    pub fn submit(&mut self, job: FrameJob) -> ReelkitResult<Vec<EncodedFrame>> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.in_flight += 1;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        match job.work {
            JobWork::Reuse(data) => {
                self.shared.counters.reused.fetch_add(1, Ordering::Relaxed);
                self.shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.reorder.insert(
                    sequence,
                    EncodedFrame {
                        sequence,
                        frame: job.frame,
                        eyes: job.eyes,
                        source_hash: job.source_hash,
                        data,
                        reused: true,
                    },
                );
            }
            JobWork::Encode(image) => {
                let request = EncodeRequest {
                    sequence,
                    frame: job.frame,
                    eyes: job.eyes,
                    image,
                    bandwidth: self.bandwidth,
                    fps: self.fps,
                };
                self.pending
                    .insert(sequence, (job.frame, job.eyes, job.source_hash));
                let jobs = self
                    .jobs
                    .as_ref()
                    .ok_or_else(|| ReelkitError::encode(job.frame, "encoder already finished"))?;
                jobs.send(request)
                    .map_err(|_| ReelkitError::encode(job.frame, "encode workers have stopped"))?;
            }
        }

        self.drain_results()?;
        let mut ready = self.pop_ready();
        while self.in_flight >= self.max_in_flight {
            self.receive()?;
            ready.extend(self.pop_ready());
        }
        Ok(ready)
    }

    /// Wait for every outstanding job and stop the workers.
    pub fn finish(&mut self) -> ReelkitResult<Vec<EncodedFrame>> {
        let mut ready = self.pop_ready();
        while self.in_flight > 0 {
            self.receive()?;
            ready.extend(self.pop_ready());
        }
        self.stop();
        tracing::info!(stats = ?self.stats(), "Encoder finished");
        Ok(ready)
    }

    fn accept(&mut self, (sequence, result): WorkerResult) -> ReelkitResult<()> {
        let (frame, eyes, source_hash) = self.pending.remove(&sequence).ok_or_else(|| {
            ReelkitError::encode(-1, format!("result for unknown job {sequence}"))
        })?;
        let data = result?;
        self.reorder.insert(
            sequence,
            EncodedFrame {
                sequence,
                frame,
                eyes,
                source_hash,
                data,
                reused: false,
            },
        );
        Ok(())
    }

    fn drain_results(&mut self) -> ReelkitResult<()> {
        loop {
            match self.results.try_recv() {
                Ok(result) => self.accept(result)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(ReelkitError::encode(-1, "encode workers have stopped"))
                }
            }
        }
    }

    fn receive(&mut self) -> ReelkitResult<()> {
        let result = self
            .results
            .recv()
            .map_err(|_| ReelkitError::encode(-1, "encode workers have stopped"))?;
        self.accept(result)
    }

    fn pop_ready(&mut self) -> Vec<EncodedFrame> {
        let mut ready = vec![];
        while let Some(frame) = self.reorder.remove(&self.next_emit) {
            self.next_emit += 1;
            self.in_flight -= 1;
            ready.push(frame);
        }
        ready
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.jobs = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Encode worker panicked");
            }
        }
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Next job for a local worker: retries first, then new work.
fn next_local_job(
    jobs: &Receiver<EncodeRequest>,
    retry: &Receiver<EncodeRequest>,
    jobs_open: &mut bool,
    retry_open: &mut bool,
) -> Option<EncodeRequest> {
    loop {
        match retry.try_recv() {
            Ok(job) => return Some(job),
            Err(TryRecvError::Disconnected) => *retry_open = false,
            Err(TryRecvError::Empty) => {}
        }
        match (*jobs_open, *retry_open) {
            (false, false) => return None,
            (true, false) => match jobs.recv() {
                Ok(job) => return Some(job),
                Err(_) => *jobs_open = false,
            },
            (false, true) => match retry.recv() {
                Ok(job) => return Some(job),
                Err(_) => *retry_open = false,
            },
            (true, true) => select! {
                recv(retry) -> job => match job {
                    Ok(job) => return Some(job),
                    Err(_) => *retry_open = false,
                },
                recv(jobs) -> job => match job {
                    Ok(job) => return Some(job),
                    Err(_) => *jobs_open = false,
                },
            },
        }
    }
}

fn local_worker(
    jobs: Receiver<EncodeRequest>,
    retry: Receiver<EncodeRequest>,
    results: Sender<WorkerResult>,
    shared: Arc<Shared>,
) {
    let mut jobs_open = true;
    let mut retry_open = true;
    while let Some(request) = next_local_job(&jobs, &retry, &mut jobs_open, &mut retry_open) {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let result = shared.codec.encode(&request).map_err(|e| match e {
            ReelkitError::Encode { .. } => e,
            other => ReelkitError::encode(request.frame, other.to_string()),
        });
        match &result {
            Ok(_) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(frame = request.frame, error = %e, "Local encode failed");
                shared.shutdown.store(true, Ordering::SeqCst);
            }
        }
        if results.send((request.sequence, result)).is_err() {
            return;
        }
    }
}

struct RemoteWorker {
    server: String,
    timeout: Duration,
    failure_limit: u32,
    backoff: Duration,
}

impl RemoteWorker {
    fn run(
        self,
        jobs: Receiver<EncodeRequest>,
        retry: Sender<EncodeRequest>,
        results: Sender<WorkerResult>,
        shared: Arc<Shared>,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(server = %self.server, error = %e, "No runtime for remote encoding");
                return;
            }
        };

        let mut failures = 0u32;
        let mut deprioritized = false;
        while let Ok(request) = jobs.recv() {
            if shared.shutdown.load(Ordering::SeqCst) {
                let _ = retry.send(request);
                return;
            }
            if deprioritized {
                std::thread::sleep(self.backoff);
            }

            let outcome = runtime.block_on(async {
                tokio::time::timeout(self.timeout, encode_remote(&self.server, &request)).await
            });
            let error = match outcome {
                Ok(Ok(data)) => {
                    failures = 0;
                    shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                    shared.counters.remote.fetch_add(1, Ordering::Relaxed);
                    if results.send((request.sequence, Ok(data))).is_err() {
                        return;
                    }
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };

            failures += 1;
            tracing::warn!(
                server = %self.server,
                frame = request.frame,
                failures,
                error = %error,
                "Remote encode failed; retrying locally"
            );
            if !deprioritized && failures >= self.failure_limit {
                deprioritized = true;
                tracing::warn!(server = %self.server, "Deprioritizing encode server");
            }
            shared.counters.retried.fetch_add(1, Ordering::Relaxed);
            if retry.send(request).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RleEncoder;
    use std::sync::atomic::AtomicUsize;

    fn options(threads: usize, max_in_flight: usize) -> EncoderOptions {
        EncoderOptions {
            threads,
            max_in_flight,
            servers: vec![],
            remote_timeout: Duration::from_secs(5),
            remote_failure_limit: 1,
            deprioritized_backoff: Duration::from_millis(1),
            bandwidth: 100_000_000,
            fps: 24,
        }
    }

    fn job(frame: i64) -> FrameJob {
        FrameJob {
            frame,
            eyes: Eyes::Both,
            source_hash: format!("{frame}"),
            work: JobWork::Encode(Arc::new(Image::solid(4, 2, (frame as u8, 0, 0)))),
        }
    }

    /// Counts concurrent encodes and sleeps a little in each.
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FrameEncoder for Gauge {
        fn encode(&self, request: &EncodeRequest) -> ReelkitResult<Vec<u8>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![request.frame as u8])
        }

        fn name(&self) -> &str {
            "gauge"
        }
    }

    #[test]
    fn test_output_in_submission_order_within_bound() {
        let gauge = Arc::new(Gauge {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut encoder = Encoder::new(options(4, 6), gauge.clone()).unwrap();

        let mut out = vec![];
        for frame in 0..40 {
            out.extend(encoder.submit(job(frame)).unwrap());
            assert!(encoder.in_flight() < 6);
        }
        out.extend(encoder.finish().unwrap());

        let frames: Vec<i64> = out.iter().map(|f| f.frame).collect();
        assert_eq!(frames, (0..40).collect::<Vec<_>>());
        assert!(gauge.peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(encoder.stats().completed, 40);
    }

    #[test]
    fn test_reuse_jobs_keep_their_place() {
        let mut encoder = Encoder::new(options(2, 8), Arc::new(RleEncoder)).unwrap();
        let mut out = vec![];
        out.extend(encoder.submit(job(0)).unwrap());
        out.extend(
            encoder
                .submit(FrameJob {
                    frame: 1,
                    eyes: Eyes::Both,
                    source_hash: "1".to_string(),
                    work: JobWork::Reuse(vec![42]),
                })
                .unwrap(),
        );
        out.extend(encoder.submit(job(2)).unwrap());
        out.extend(encoder.finish().unwrap());

        assert_eq!(out.len(), 3);
        assert_eq!(out[1].data, vec![42]);
        assert!(out[1].reused);
        assert!(!out[2].reused);
        assert_eq!(encoder.stats().reused, 1);
    }

    #[test]
    fn test_unreachable_server_falls_back_to_local() {
        let mut opts = options(1, 4);
        // Nothing listens on the discard port of localhost in a test sandbox.
        opts.servers = vec!["127.0.0.1:9".to_string()];
        let mut encoder = Encoder::new(opts, Arc::new(RleEncoder)).unwrap();

        let mut out = vec![];
        for frame in 0..10 {
            out.extend(encoder.submit(job(frame)).unwrap());
        }
        out.extend(encoder.finish().unwrap());

        assert_eq!(out.len(), 10);
        let stats = encoder.stats();
        assert_eq!(stats.remote, 0);
        assert_eq!(stats.completed, 10);
    }

    struct Broken;

    impl FrameEncoder for Broken {
        fn encode(&self, request: &EncodeRequest) -> ReelkitResult<Vec<u8>> {
            Err(ReelkitError::encode(request.frame, "codec exploded"))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_local_failure_is_fatal() {
        let mut encoder = Encoder::new(options(1, 2), Arc::new(Broken)).unwrap();
        let mut failed = false;
        for frame in 0..4 {
            if encoder.submit(job(frame)).is_err() {
                failed = true;
                break;
            }
        }
        if !failed {
            failed = encoder.finish().is_err();
        }
        assert!(failed);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(Encoder::new(options(0, 2), Arc::new(RleEncoder)).is_err());
    }
}
