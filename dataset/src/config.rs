use burn::prelude::Config;

#[derive(Config, Debug)]
pub struct LoaderConfig {
    /// Number of single example source items merged into one yielded batch.
    #[config(default = 1)]
    pub batch_size: usize,

    /// How many assembly jobs to keep queued ahead of the consumer.
    #[config(default = 2)]
    pub buffer_factor: usize,
}
