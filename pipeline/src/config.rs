use burn::prelude::Config;

#[derive(Config, Debug)]
pub struct PipelineConfig {
    /// Random seed.
    #[config(default = 42)]
    pub seed: u64,

    /// Iteration to resume from
    #[config(default = 0)]
    pub start_iter: u32,

    /// Total number of steps to train for.
    #[config(default = 100000)]
    pub total_steps: u32,

    /// Learning rate shared by every component.
    #[config(default = 1e-4)]
    pub lr: f64,

    /// Report losses every this many steps.
    #[config(default = 5)]
    pub update_every: u32,
}
