use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// Some number of training steps are done.
    TrainStep {
        /// Losses of the latest step, averaged over the batch.
        losses: BTreeMap<String, f32>,
        iter: u32,
        total_elapsed: Duration,
    },
    /// Training stopped, either after the last step or because the data ran out.
    Finished { iter: u32 },
}
