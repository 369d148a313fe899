//! Multi-worker batch assembly (spec §5): a bounded worker pool builds
//! samples off the mmap-backed dataset while the caller drains completed
//! batches in sample-index order, with a deadline past which a stalled
//! worker pool surfaces as a timeout rather than hanging the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use parking_lot::Mutex;
use tsi_types::error::CoreError;

use crate::concat::ConcatDataset;
use crate::sampler::Sampler;

/// One stacked batch: every field is the per-sample field concatenated
/// along a new leading batch axis.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_size: usize,
    pub c: usize,
    pub t: usize,
    pub d: usize,
    pub tf: usize,
    /// Row-major `[N, C, T, D]`.
    pub tensor: Vec<f32>,
    /// Row-major `[N, C, T]`.
    pub mask: Vec<u8>,
    pub future_tensor: Option<Vec<f32>>,
    pub future_mask: Option<Vec<u8>>,
    pub sample_indices: Vec<usize>,
}

pub struct DataLoaderOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub drop_last: bool,
    pub queue_capacity: usize,
    pub timeout: Duration,
}

impl Default for DataLoaderOptions {
    /// `drop_last` defaults to `true`, matching training's preference for
    /// uniform batch shapes over evaluation's preference for seeing every
    /// sample (spec §5); evaluation callers override it explicitly.
    fn default() -> Self {
        Self {
            batch_size: 32,
            workers: 1,
            drop_last: true,
            queue_capacity: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

fn assemble_batch(dataset: &ConcatDataset, indices: &[usize]) -> Result<Batch, CoreError> {
    let samples = indices.iter().map(|&i| dataset.sample(i)).collect::<Result<Vec<_>, _>>()?;
    let first = samples.first().expect("batch job is never empty");
    let (c, t, d, tf) = (first.c, first.t, first.d, first.tf);

    let mut tensor = Vec::with_capacity(samples.len() * c * t * d);
    let mut mask = Vec::with_capacity(samples.len() * c * t);
    let mut future_tensor = if tf > 0 { Some(Vec::with_capacity(samples.len() * c * tf * d)) } else { None };
    let mut future_mask = if tf > 0 { Some(Vec::with_capacity(samples.len() * c * tf)) } else { None };

    for sample in &samples {
        tensor.extend_from_slice(&sample.tensor);
        mask.extend_from_slice(&sample.mask);
        if let (Some(ft), Some(fm)) = (future_tensor.as_mut(), future_mask.as_mut()) {
            ft.extend_from_slice(sample.future_tensor.as_deref().unwrap_or(&[]));
            fm.extend_from_slice(sample.future_mask.as_deref().unwrap_or(&[]));
        }
    }

    Ok(Batch {
        batch_size: samples.len(),
        c,
        t,
        d,
        tf,
        tensor,
        mask,
        future_tensor,
        future_mask,
        sample_indices: indices.to_vec(),
    })
}

/// Assembles stacked batches off a fixed sample ordering using a pool of
/// worker threads, re-serializing their (possibly out-of-order) completions
/// back into sample-index order before handing them to the caller.
pub struct DataLoader {
    receiver: crossbeam_channel::Receiver<Result<(usize, Batch), CoreError>>,
    total_batches: usize,
    expected_next: Mutex<usize>,
    reorder: Mutex<HashMap<usize, Batch>>,
    timeout: Duration,
    _workers: Vec<JoinHandle<()>>,
}

impl DataLoader {
    pub fn new(dataset: Arc<ConcatDataset>, mut sampler: Box<dyn Sampler>, opts: DataLoaderOptions) -> Result<Self, CoreError> {
        let order = sampler.indices(dataset.len());
        let mut batches: Vec<Vec<usize>> = order.chunks(opts.batch_size.max(1)).map(<[usize]>::to_vec).collect();
        if opts.drop_last {
            if let Some(last) = batches.last() {
                if last.len() < opts.batch_size {
                    batches.pop();
                }
            }
        }
        let total_batches = batches.len();

        let (job_tx, job_rx) = unbounded::<(usize, Vec<usize>)>();
        for (i, batch) in batches.into_iter().enumerate() {
            job_tx.send((i, batch)).expect("job receiver outlives this loop");
        }
        drop(job_tx);

        let (res_tx, res_rx) = bounded::<Result<(usize, Batch), CoreError>>(opts.queue_capacity.max(1));
        let worker_count = opts.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let dataset = Arc::clone(&dataset);
            workers.push(std::thread::spawn(move || {
                while let Ok((idx, sample_idxs)) = job_rx.recv() {
                    match assemble_batch(&dataset, &sample_idxs) {
                        Ok(batch) => {
                            if res_tx.send(Ok((idx, batch))).is_err() {
                                break;
                            }
                        }
                        // Surface the failure to `next_batch` instead of
                        // silently dropping this worker's slot, which would
                        // otherwise read as a clean end-of-stream.
                        Err(e) => {
                            let _ = res_tx.send(Err(e));
                            break;
                        }
                    }
                }
            }));
        }

        Ok(Self {
            receiver: res_rx,
            total_batches,
            expected_next: Mutex::new(0),
            reorder: Mutex::new(HashMap::new()),
            timeout: opts.timeout,
            _workers: workers,
        })
    }

    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    /// Returns the next batch in sample-index order, `Ok(None)` once every
    /// batch has been delivered, or `Err(_)` if a worker failed to assemble
    /// a batch, the pool disconnected before delivering every batch, or
    /// none arrives within the configured deadline.
    pub fn next_batch(&self) -> Result<Option<Batch>, CoreError> {
        let mut expected = self.expected_next.lock();
        if *expected >= self.total_batches {
            return Ok(None);
        }
        loop {
            if let Some(batch) = self.reorder.lock().remove(&*expected) {
                *expected += 1;
                return Ok(Some(batch));
            }
            match self.receiver.recv_timeout(self.timeout) {
                Ok(Ok((idx, batch))) => {
                    if idx == *expected {
                        *expected += 1;
                        return Ok(Some(batch));
                    }
                    self.reorder.lock().insert(idx, batch);
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => return Err(CoreError::DataloaderTimeout),
                Err(RecvTimeoutError::Disconnected) => {
                    if *expected < self.total_batches {
                        return Err(CoreError::Internal(
                            "dataloader worker pool disconnected before every batch was delivered".into(),
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }
}
