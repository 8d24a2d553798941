use burn::prelude::Config;

#[derive(Config, Debug)]
pub struct VanConfig {
    /// Cameras fed to the frame encoder, in this order.
    pub cameras: Vec<String>,

    /// Channels of the coarse BEV grid.
    pub dim: usize,

    /// Channels of the upsampled BEV grid. Required when there are high
    /// resolution tasks.
    pub hr_dim: Option<usize>,

    /// Number of leading frames merged into the BEV grid.
    #[config(default = 3)]
    pub num_encode_frames: usize,

    /// How many of the encoded frames propagate gradients into the encoder.
    /// Earlier frames are encoded without recording a graph.
    #[config(default = 2)]
    pub num_backprop_frames: usize,

    /// Images are logged every this many steps, text ten times as often.
    #[config(default = 500)]
    pub log_interval: usize,

    /// Directory tasks write their artifacts to.
    #[config(default = "String::from(\"out\")")]
    pub output: String,
}
