//! Synthetic shadow pair generation.

mod folder;
mod sampler;
mod synth;

pub use folder::{scan_images, DatasetPaths, FILE_LIST_NAME};
pub use sampler::CyclicSampler;
pub use synth::{
    sample_threshold, threshold_mask, ComposedPair, PostProcess, SampleBatch, SynthDataset,
    TrainingSample,
};
