/*!
# mpd_con
This library summarizes an ensemble of multiple sequence alignments into a single consensus alignment with per-column reliability scores.
The ensemble is compressed into a network of unique alignment columns, and the summary is decoded from that network with dynamic programming.

Key benefits:
* Each unique column is stored once, so large ensembles of similar alignments stay compact
* Column scores are the empirical frequency of each column across the ensemble, optionally ignoring gap placement
* An annotator can layer an HMM over per-column states, e.g. evolutionary rate classes, and decode posterior state probabilities

Performance notes:
* All dynamic programming walks the network iteratively in topological order, so long alignments do not grow the call stack
* Network size scales with the alignment uncertainty of the ensemble, not the number of samples

# Example usage
```rust
use mpd_con::column_network::ColumnNetwork;

let ensemble = [
    [b"AC-G".to_vec(), b"A-TG".to_vec()],
    [b"AC-G".to_vec(), b"A-TG".to_vec()],
    [b"ACG".to_vec(), b"ATG".to_vec()],
];

// add all the alignments and link the network
let mut network: ColumnNetwork = Default::default();
for alignment in ensemble.iter() {
    network.add_alignment(alignment).unwrap();
}
network.compute_equivalence_class_freqs().unwrap();

// decode and check the results
network.update_viterbi().unwrap();
let summary = network.consensus().unwrap();
assert_eq!(summary.rows(), &ensemble[0]);
assert_eq!(summary.scores().len(), 4);
```
*/

/// Forward-backward-Viterbi annotation of a network with an HMM over column states
pub mod annotator;
/// The column network and its decoding algorithms
pub mod column_network;
/// Hashable descriptors of alignment columns
pub mod descriptor;
/// Emission models for the annotator
pub mod emission;
/// Utility for generating examples
pub mod example_gen;
/// Alignment readers and result writers
pub mod io;
/// Log space arithmetic
pub mod log_math;
/// Configuration for the network and driver
pub mod mpd_config;
/// Sample stream handling around a network
pub mod mpd_driver;
