/*!
Contains configuration information for building and decoding a column network.
Typical usage is to the use the builder to construct the config, e.g.
```
use mpd_con::mpd_config::{AnnotationMode, MpdConfig, MpdConfigBuilder};
let config: MpdConfig = MpdConfigBuilder::default()
    .g_value(0.1)
    .output_gap_insensitive(true)
    .annotation_mode(AnnotationMode::ColumnProbability)
    .build()
    .unwrap();
```
*/

/// Enumeration of the ways an annotated consensus can be decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum AnnotationMode {
    /// Maximizes the sum of column marginals, ignoring the annotation states
    ColumnProbability,
    /// Weights each column marginal by the posterior of its most probable annotation state
    #[default]
    ColumnStateJoint
}

/**
Contains configuration information for the column network and the driver around it.
Typical usage is to the use the builder to construct the config, e.g.
```
use mpd_con::mpd_config::{MpdConfig, MpdConfigBuilder};
let config: MpdConfig = MpdConfigBuilder::default()
    .two_state(true)
    .max_samples(1000)
    .build()
    .unwrap();
```
*/
#[derive(derive_builder::Builder, Clone, Debug)]
#[builder(default)]
pub struct MpdConfig {
    /// Per-column penalty subtracted during Viterbi decoding, larger values give shorter and more conservative consensuses
    pub g_value: f64,
    /// If true, Viterbi decoding optimizes the gap insensitive column marginals
    pub optimize_gap_insensitive: bool,
    /// If true, gap insensitive marginals are reported next to the default scores
    pub output_gap_insensitive: bool,
    /// If true, pairwise (order-2) column transition counts are tracked and used for posteriors and path counts
    pub two_state: bool,
    /// Decoding mode used when an annotator is attached
    pub annotation_mode: AnnotationMode,
    /// Maximum number of samples added to the network, 0 means no limit
    pub max_samples: usize,
    /// Only every `sample_rate`-th sample is used
    pub sample_rate: usize,
    /// Index of the first sample used, everything before it is treated as burn-in
    pub first_sample: usize
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            // plain maximum posterior decoding
            g_value: 0.0,
            // the DAG is built on the gap sensitive coding, so optimize that
            optimize_gap_insensitive: false,
            // extra output column is opt-in
            output_gap_insensitive: false,
            // order-1 statistics unless asked otherwise
            two_state: false,
            annotation_mode: AnnotationMode::ColumnStateJoint,
            // use everything we get
            max_samples: 0,
            sample_rate: 1,
            first_sample: 0
        }
    }
}
