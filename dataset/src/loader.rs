use std::collections::VecDeque;
use std::thread::JoinHandle;

use burn::prelude::Backend;
use tokio::sync::{mpsc, oneshot};
use tracing::trace_span;

use crate::batch::Batch;
use crate::collate::collate;
use crate::config::LoaderConfig;
use crate::error::{DatasetError, Result};

/// `Ok(None)` once the source is exhausted.
type Assembled<B> = Result<Option<Batch<B>>>;
type Job<B> = oneshot::Sender<Assembled<B>>;

/// Merges single example items from a source into device resident batches.
///
/// A single background worker transfers and collates the next batches while
/// the caller consumes the current one. At most `buffer_factor` assembly jobs
/// are outstanding and results come back in submission order.
///
/// Absent source items are skipped and replaced by the next valid item, so
/// yielded batches always hold `batch_size` examples. Iteration ends when the
/// source runs out; a trailing partial batch is dropped.
pub struct TransferCollator<B: Backend> {
    jobs: Option<mpsc::UnboundedSender<Job<B>>>,
    pending: VecDeque<oneshot::Receiver<Assembled<B>>>,
    worker: Option<JoinHandle<()>>,
    buffer_factor: usize,
    batch_size: usize,
    source_len: usize,
}

impl<B: Backend> TransferCollator<B> {
    pub fn new<I>(source: I, config: &LoaderConfig, device: &B::Device) -> Result<Self>
    where
        I: ExactSizeIterator<Item = Option<Batch<B>>> + Send + 'static,
    {
        if config.batch_size == 0 {
            return Err(DatasetError::InvalidConfig("batch_size must be positive"));
        }
        if config.buffer_factor == 0 {
            return Err(DatasetError::InvalidConfig("buffer_factor must be positive"));
        }

        let source_len = source.len();
        let batch_size = config.batch_size;
        let device = device.clone();
        let (send_job, mut receive_job) = mpsc::unbounded_channel::<Job<B>>();

        let worker = std::thread::Builder::new()
            .name("transfer-collator".to_string())
            .spawn(move || {
                let mut source = source.fuse();
                while let Some(reply) = receive_job.blocking_recv() {
                    let assembled = assemble(&mut source, batch_size, &device);
                    if reply.send(assembled).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(send_job),
            pending: VecDeque::with_capacity(config.buffer_factor),
            worker: Some(worker),
            buffer_factor: config.buffer_factor,
            batch_size,
            source_len,
        })
    }

    /// Number of full batches the source can produce, ignoring absent items.
    pub fn len(&self) -> usize {
        self.source_len / self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn top_up(&mut self) -> Option<oneshot::Receiver<Assembled<B>>> {
        if let Some(jobs) = &self.jobs {
            while self.pending.len() < self.buffer_factor {
                let (reply, receiver) = oneshot::channel();
                if jobs.send(reply).is_err() {
                    break;
                }
                self.pending.push_back(receiver);
            }
        }
        self.pending.pop_front()
    }

    fn settle(
        &mut self,
        received: std::result::Result<Assembled<B>, oneshot::error::RecvError>,
    ) -> Option<Result<Batch<B>>> {
        match received {
            Ok(Ok(Some(batch))) => Some(Ok(batch)),
            Ok(Ok(None)) => {
                log::info!("Data source exhausted, stopping batch assembly.");
                self.shutdown();
                None
            }
            Ok(Err(err)) => Some(Err(err)),
            Err(_) => {
                self.shutdown();
                Some(Err(DatasetError::WorkerGone))
            }
        }
    }

    /// Waits for the oldest outstanding batch.
    pub async fn next_batch(&mut self) -> Option<Result<Batch<B>>> {
        let receiver = self.top_up()?;
        let received = receiver.await;
        self.settle(received)
    }

    fn shutdown(&mut self) {
        self.jobs = None;
        self.pending.clear();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Transfer collator worker panicked.");
            }
        }
    }
}

impl<B: Backend> Iterator for TransferCollator<B> {
    type Item = Result<Batch<B>>;

    /// Blocking variant of [`TransferCollator::next_batch`]. Must not be called
    /// from within an async runtime.
    fn next(&mut self) -> Option<Self::Item> {
        let receiver = self.top_up()?;
        let received = receiver.blocking_recv();
        self.settle(received)
    }
}

impl<B: Backend> Drop for TransferCollator<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn assemble<B: Backend>(
    source: &mut impl Iterator<Item = Option<Batch<B>>>,
    batch_size: usize,
    device: &B::Device,
) -> Assembled<B> {
    let _span = trace_span!("Assemble batch", batch_size).entered();

    let mut items = Vec::with_capacity(batch_size);
    while items.len() < batch_size {
        match source.next() {
            None => return Ok(None),
            Some(None) => continue,
            Some(Some(item)) => items.push(Some(item.to(device))),
        }
    }

    let batch = collate(items, true)?;
    // Transfers must land before the batch is handed to compute.
    B::sync(device);
    Ok(batch)
}
