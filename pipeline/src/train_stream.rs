use std::time::{Duration, Instant};

use async_fn_stream::TryStreamEmitter;
use async_trait::async_trait;
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use dataset::TransferCollator;
use dataset::transforms::BatchTransform;
use train::BevTaskVan;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::message::PipelineMessage;
use crate::pipeline_stream::PipelineStream;

/// Drives the training loop: pulls batches, rewrites their poses, runs every
/// task and steps the optimizers.
pub struct TrainStream<B: AutodiffBackend> {
    config: PipelineConfig,
    loader: TransferCollator<B>,
    transform: Box<dyn BatchTransform<B>>,
    van: BevTaskVan<B>,
}

impl<B: AutodiffBackend> TrainStream<B> {
    pub fn new(
        config: PipelineConfig,
        loader: TransferCollator<B>,
        transform: Box<dyn BatchTransform<B>>,
        van: BevTaskVan<B>,
    ) -> Result<Self> {
        if config.update_every == 0 {
            return Err(PipelineError::InvalidConfig("update_every must be positive"));
        }
        Ok(Self {
            config,
            loader,
            transform,
            van,
        })
    }

    pub fn van(&self) -> &BevTaskVan<B> {
        &self.van
    }
}

#[async_trait]
impl<B: AutodiffBackend> PipelineStream for TrainStream<B> {
    async fn run(
        &mut self,
        emitter: TryStreamEmitter<PipelineMessage, anyhow::Error>,
    ) -> anyhow::Result<()> {
        let PipelineConfig {
            seed,
            start_iter,
            total_steps,
            lr,
            update_every,
        } = self.config.clone();

        log::info!("Using seed {seed}");
        <B as Backend>::seed(seed);

        let mut train_duration = Duration::from_secs(0);
        let mut iter = start_iter;

        log::info!("Start training loop.");
        while iter < total_steps {
            let step_time = Instant::now();

            let Some(batch) = self.loader.next_batch().await else {
                log::info!("Ran out of data after {iter} of {total_steps} steps.");
                break;
            };

            // We just finished iter 'iter', now starting iter + 1.
            let next_iter = iter + 1;
            let is_last_step = next_iter == total_steps;
            let report = next_iter % update_every == 0 || is_last_step;

            let losses = {
                let batch = self.transform.apply(batch?);
                let losses = self.van.forward(&batch, iter as usize)?;
                self.van.step(lr);
                report.then(|| losses.to_scalars())
            };
            iter = next_iter;

            // Add up time from this step.
            train_duration += step_time.elapsed();

            if let Some(losses) = losses {
                log::info!("Training iteration {iter} of {total_steps}");
                emitter
                    .emit(PipelineMessage::TrainStep {
                        losses,
                        iter,
                        total_elapsed: train_duration,
                    })
                    .await;
            }
        }

        emitter.emit(PipelineMessage::Finished { iter }).await;
        Ok(())
    }
}
