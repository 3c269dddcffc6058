/*!
Drives a ColumnNetwork through its lifecycle for a stream of named alignment samples.
The driver owns the sampling controls, keeps the sequence names, and reports statistics as it goes.

# Example usage
```rust
use mpd_con::io::Alignment;
use mpd_con::mpd_config::MpdConfigBuilder;
use mpd_con::mpd_driver::MpdDriver;

let samples = vec![
    Alignment::new(vec!["b".to_string(), "a".to_string()], vec![b"CG".to_vec(), b"A-".to_vec()]).unwrap(),
    Alignment::new(vec!["a".to_string(), "b".to_string()], vec![b"A-".to_vec(), b"CG".to_vec()]).unwrap(),
];

let config = MpdConfigBuilder::default()
    .g_value(0.0)
    .build().unwrap();
let mut driver = MpdDriver::with_config(config).unwrap();
let used = driver.add_samples(samples.into_iter().map(Ok)).unwrap();
assert_eq!(used, 2);

let summary = driver.decode().unwrap();
assert_eq!(driver.names(), &["a".to_string(), "b".to_string()]);
assert_eq!(summary.rows(), &[b"A-".to_vec(), b"CG".to_vec()]);
```
*/

use log::{debug, info, warn};
use simple_error::bail;
use std::io::Write;
use std::time::Instant;

use crate::annotator::{Annotation, Annotator};
use crate::column_network::{ColumnNetwork, NetworkState, SummaryAlignment};
use crate::io::{write_sample_score, Alignment};
use crate::mpd_config::MpdConfig;

/// Applies the burn-in, thinning and sample limit of a configuration to a stream of samples
pub fn select_samples<T, I: IntoIterator<Item = T>>(samples: I, config: &MpdConfig) -> impl Iterator<Item = T> {
    let limit = if config.max_samples == 0 { usize::MAX } else { config.max_samples };
    samples.into_iter()
        .skip(config.first_sample)
        .step_by(config.sample_rate.max(1))
        .take(limit)
}

/// Builds a network from named samples and extracts the results
#[derive(Debug)]
pub struct MpdDriver {
    /// The network being built
    network: ColumnNetwork,
    /// Sequence names in network order, taken from the first accepted sample
    names: Vec<String>,
    /// Number of samples that were rejected as inconsistent
    skipped: usize
}

impl MpdDriver {
    /// Creates a new driver.
    /// # Arguments
    /// * `config` - network options plus the sampling controls
    /// # Errors
    /// * if the sample rate is 0
    pub fn with_config(config: MpdConfig) -> Result<MpdDriver, Box<dyn std::error::Error>> {
        if config.sample_rate == 0 {
            bail!("Sample rate must be at least 1");
        }
        debug!("Using g value {}", config.g_value);
        Ok(MpdDriver {
            network: ColumnNetwork::with_config(config),
            names: vec![],
            skipped: 0
        })
    }

    /// Adds one sample. Rows are sorted by name first.
    /// Samples with duplicate names, or that do not match the sequences seen so far are skipped with a warning and `false` is returned.
    /// # Errors
    /// * if the network has already been linked
    pub fn add_sample(&mut self, mut alignment: Alignment) -> Result<bool, Box<dyn std::error::Error>> {
        if self.network.state() >= NetworkState::Linked {
            bail!("Cannot add samples after the network has been linked");
        }
        alignment.sort_by_name();

        // rows are matched up by name, so names must be unique
        if alignment.names().windows(2).any(|w| w[0] == w[1]) {
            warn!("Skipping sample with duplicate sequence names {:?}", alignment.names());
            self.skipped += 1;
            return Ok(false);
        }
        if !self.names.is_empty() && self.names.as_slice() != alignment.names() {
            warn!("Skipping sample with sequence names {:?}, expected {:?}", alignment.names(), self.names);
            self.skipped += 1;
            return Ok(false);
        }
        if let Err(e) = self.network.add_alignment(alignment.rows()) {
            warn!("Skipping inconsistent sample: {}", e);
            self.skipped += 1;
            return Ok(false);
        }

        if self.names.is_empty() {
            info!("Number of sequences = {}", alignment.len());
            self.names = alignment.names().to_vec();
        }
        Ok(true)
    }

    /// Adds every selected sample of a stream, returning how many were accepted.
    /// # Errors
    /// * if reading a sample fails
    /// * if the network has already been linked
    pub fn add_samples<I>(&mut self, samples: I) -> Result<usize, Box<dyn std::error::Error>>
    where
        I: IntoIterator<Item = Result<Alignment, Box<dyn std::error::Error>>>
    {
        let start = Instant::now();
        let mut accepted = 0;
        for sample in select_samples(samples, self.network.config()) {
            if self.add_sample(sample?)? {
                accepted += 1;
            }
        }
        info!("Added {} samples ({} skipped) in {:?}", accepted, self.skipped, start.elapsed());
        Ok(accepted)
    }

    /// Links the network if that has not happened yet
    /// # Errors
    /// * if no samples were added
    pub fn link(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.network.state() < NetworkState::Linked {
            self.network.compute_equivalence_class_freqs()?;
        }
        Ok(())
    }

    /// Links the network, runs the Viterbi decoding and returns the consensus
    /// # Errors
    /// * if no samples were added
    pub fn decode(&mut self) -> Result<SummaryAlignment, Box<dyn std::error::Error>> {
        self.link()?;
        self.network.update_viterbi()?;
        let summary = self.network.consensus()?;
        self.log_stats();
        Ok(summary)
    }

    /// Links the network and annotates it, the annotation carries the consensus
    /// # Errors
    /// * if no samples were added
    /// * if the annotation fails
    pub fn annotate(&mut self, annotator: &Annotator) -> Result<Annotation, Box<dyn std::error::Error>> {
        self.link()?;
        let start = Instant::now();
        let annotation = annotator.annotate(&mut self.network)?;
        self.log_stats();
        info!("Annotation total: {:?}", start.elapsed());
        Ok(annotation)
    }

    /// Log of the count weighted number of alignment paths through the network
    pub fn log_n_paths(&mut self) -> Result<f64, Box<dyn std::error::Error>> {
        self.link()?;
        let log_n_paths = self.network.log_n_paths()?;
        info!("Log number of paths: {:.6}", log_n_paths);
        Ok(log_n_paths)
    }

    /// Scores one sample against the linked network.
    /// Returns the score and the number of real columns.
    /// # Errors
    /// * if the network is not linked
    /// * if the sample does not match the network or contains a column that is not in it
    pub fn score_sample(&self, mut alignment: Alignment, compute_log_posterior: bool) -> Result<(f64, usize), Box<dyn std::error::Error>> {
        alignment.sort_by_name();
        if self.names.as_slice() != alignment.names() {
            bail!("Sample sequence names {:?} do not match {:?}", alignment.names(), self.names);
        }
        self.network.score_alignment(alignment.rows(), compute_log_posterior)
    }

    /// Scores every selected sample of a stream, writing one line per sample.
    /// Returns the number of samples scored.
    /// # Arguments
    /// * `samples` - the stream, usually the same one the network was built from
    /// * `compute_log_posterior` - if true, scores are empirical log posteriors instead of marginal sums
    /// * `writer` - the output for the per sample lines
    /// # Errors
    /// * if reading, scoring, or writing a sample fails
    pub fn score_samples<I, W>(&mut self, samples: I, compute_log_posterior: bool, writer: &mut W) -> Result<usize, Box<dyn std::error::Error>>
    where
        I: IntoIterator<Item = Result<Alignment, Box<dyn std::error::Error>>>,
        W: Write
    {
        self.link()?;
        let mut scored = 0;
        for (index, sample) in select_samples(samples, self.network.config()).enumerate() {
            let (score, real_columns) = self.score_sample(sample?, compute_log_posterior)?;
            write_sample_score(writer, index, score, real_columns)?;
            scored += 1;
        }
        debug!("Scored {} samples", scored);
        Ok(scored)
    }

    fn log_stats(&self) {
        info!("Network: {} columns, {} classes, {} alignments", self.network.num_columns(), self.network.num_classes(), self.network.num_alignments());
        info!("Building network: {:?}", self.network.build_time());
        info!("Viterbi algorithm: {:?}", self.network.viterbi_time());
    }

    // Getters
    pub fn network(&self) -> &ColumnNetwork {
        &self.network
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
