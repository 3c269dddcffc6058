/*!
The annotator layers a hidden Markov model over the annotation states on top of a linked ColumnNetwork.
Each column emits with a per-state likelihood from an `EmissionModel`; forward-backward gives per-column state posteriors, which then drive the Viterbi decoding.

# Example usage
```rust
use mpd_con::annotator::Annotator;
use mpd_con::column_network::ColumnNetwork;
use mpd_con::emission::StarTreeModel;

let ensemble = [
    [b"A-G".to_vec(), b"-CG".to_vec()],
    [b"AG".to_vec(), b"CG".to_vec()],
];
let mut network: ColumnNetwork = Default::default();
for alignment in ensemble.iter() {
    network.add_alignment(alignment).unwrap();
}
network.compute_equivalence_class_freqs().unwrap();

// a slow and a fast evolving state
let model = StarTreeModel::jukes_cantor(b"ACGT", 0.1, vec![1.0, 5.0]).unwrap();
let annotator = Annotator::new(
    Box::new(model),
    vec![vec![0.9, 0.1], vec![0.1, 0.9]],
    vec![0.5, 0.5]
).unwrap();
let annotation = annotator.annotate(&mut network).unwrap();
assert_eq!(annotation.posteriors().len(), annotation.summary().scores().len());
for posterior in annotation.posteriors().iter() {
    assert!((posterior.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}
```
*/

use log::{debug, info, warn};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use simple_error::bail;
use std::time::Instant;

use crate::column_network::{ColumnId, ColumnNetwork, NetworkState, SummaryAlignment};
use crate::descriptor::GAP;
use crate::emission::{EmissionModel, MISSING};
use crate::log_math::{log_add, log_close, log_sum, to_log, LOG_ZERO};
use crate::mpd_config::AnnotationMode;

/// Relative tolerance when comparing the forward and backward likelihoods
const LIKELIHOOD_TOLERANCE: f64 = 1e-6;

/// The result of annotating a network
#[derive(Clone, Debug)]
pub struct Annotation {
    /// The decoded summary alignment
    summary: SummaryAlignment,
    /// Posterior probability of each state for each consensus column
    posteriors: Vec<Vec<f64>>,
    /// Most probable state for each consensus column
    states: Vec<usize>,
    /// Total data log likelihood from the forward pass
    log_likelihood: f64,
    /// Total data log likelihood from the backward pass
    backward_log_likelihood: f64
}

impl Annotation {
    /// Restricts the posteriors to the consensus columns where one sequence has a residue.
    /// # Arguments
    /// * `seq_index` - the sequence to project onto
    /// # Errors
    /// * if the sequence index is out of range
    pub fn project(&self, seq_index: usize) -> Result<Vec<Vec<f64>>, Box<dyn std::error::Error>> {
        let row = match self.summary.rows().get(seq_index) {
            Some(r) => r,
            None => bail!("Sequence index {} is out of range for {} sequences", seq_index, self.summary.rows().len())
        };
        Ok(row.iter().zip(self.posteriors.iter())
            .filter(|(&c, _p)| c != GAP)
            .map(|(_c, p)| p.clone())
            .collect())
    }

    // Getters
    pub fn summary(&self) -> &SummaryAlignment {
        &self.summary
    }

    pub fn posteriors(&self) -> &[Vec<f64>] {
        &self.posteriors
    }

    pub fn states(&self) -> &[usize] {
        &self.states
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn backward_log_likelihood(&self) -> f64 {
        self.backward_log_likelihood
    }
}

/// Forward-backward-Viterbi over a column network with an HMM on the annotation states
pub struct Annotator {
    /// Per-state column likelihoods
    model: Box<dyn EmissionModel>,
    /// log P(next state | current state)
    log_transitions: Vec<Vec<f64>>,
    /// log P(state) at the first dummy column
    log_initial: Vec<f64>,
    /// True if the model treats `-` as a character
    gap_is_char: bool
}

impl Annotator {
    /// Creates a new annotator and performs sanity checks on the HMM.
    /// # Arguments
    /// * `model` - the emission model, which also defines the number of states
    /// * `transitions` - square matrix of state transition probabilities, rows sum to one
    /// * `initial` - the initial state distribution
    /// # Errors
    /// * if the matrix or initial distribution does not match the model or is not a distribution
    pub fn new(model: Box<dyn EmissionModel>, transitions: Vec<Vec<f64>>, initial: Vec<f64>) -> Result<Annotator, Box<dyn std::error::Error>> {
        let num_states = model.num_states();
        if transitions.len() != num_states || transitions.iter().any(|row| row.len() != num_states) {
            bail!("Transition matrix must be {} x {} to match the emission model", num_states, num_states);
        }
        if initial.len() != num_states {
            bail!("Initial distribution must have {} states", num_states);
        }
        if !transitions.iter().all(|row| is_distribution(row)) || !is_distribution(&initial) {
            bail!("Transition rows and the initial distribution must be probability distributions");
        }

        let gap_is_char = model.alphabet().contains(&GAP);
        Ok(Annotator {
            model,
            log_transitions: transitions.iter().map(|row| to_log(row)).collect(),
            log_initial: to_log(&initial),
            gap_is_char
        })
    }

    /// Annotates a linked network: computes emissions, runs forward-backward, and decodes the consensus.
    /// The decoding objective comes from the network configuration's `annotation_mode`.
    /// # Arguments
    /// * `network` - the linked network; emission scores are stored on its columns and its decoding is replaced
    /// # Errors
    /// * if the network is not linked
    /// * if the emission model fails or the data likelihood is not finite
    /// * if the forward and backward likelihoods disagree
    pub fn annotate(&self, network: &mut ColumnNetwork) -> Result<Annotation, Box<dyn std::error::Error>> {
        if network.state() < NetworkState::Linked {
            bail!("Network must be linked before annotation");
        }
        let start = Instant::now();
        self.compute_emissions(network)?;

        let fwd = self.forward(network)?;
        let bwd = self.backward(network)?;
        let (first_col, last_col) = match (network.first_column(), network.last_column()) {
            (Some(f), Some(l)) => (f, l),
            _ => bail!("Network is empty")
        };

        let terminal_class = network.column(last_col).pred().unwrap();
        let log_likelihood = log_sum(fwd[terminal_class].iter().cloned());
        let start_class = network.column(first_col).succ().unwrap();
        let entry = self.transition_in(&bwd[start_class]);
        let backward_log_likelihood = log_sum(self.log_initial.iter().zip(entry.iter()).map(|(i, b)| i + b));
        check_likelihoods(log_likelihood, backward_log_likelihood)?;
        info!("Data log likelihood: {:.6}", log_likelihood);

        // posteriors for every real column, dummies stay None
        let posteriors: Vec<Option<Vec<f64>>> = (0..network.num_columns())
            .map(|col_id| {
                if col_id == first_col || col_id == last_col {
                    Ok(None)
                } else {
                    self.column_posterior(network, &fwd, &bwd, col_id).map(Some)
                }
            })
            .collect::<Result<_, Box<dyn std::error::Error>>>()?;

        let mode = network.config().annotation_mode;
        let gap_insensitive = network.config().optimize_gap_insensitive;
        let table = network.viterbi_table(|col_id| {
            let marginal = network.col_marginal(col_id, gap_insensitive)?;
            match mode {
                AnnotationMode::ColumnProbability => Ok((marginal, None)),
                AnnotationMode::ColumnStateJoint => {
                    let (state, p) = match posteriors[col_id].as_ref() {
                        Some(posterior) => best_state(posterior),
                        None => bail!("Missing posterior for column {}", col_id)
                    };
                    Ok((marginal * p, Some(state)))
                }
            }
        })?;
        let viterbi_score = network.install_viterbi(table)?;
        debug!("Annotation Viterbi score: {:.3}", viterbi_score);

        let summary = network.consensus()?;
        let path = network.consensus_path()?;
        let mut path_posteriors = Vec::with_capacity(path.len());
        let mut states = Vec::with_capacity(path.len());
        for col_id in path.into_iter() {
            let posterior = match posteriors[col_id].as_ref() {
                Some(p) => p.clone(),
                None => bail!("Missing posterior for column {}", col_id)
            };
            states.push(best_state(&posterior).0);
            path_posteriors.push(posterior);
        }

        info!("Annotated {} consensus columns in {:?}", states.len(), start.elapsed());
        Ok(Annotation {
            summary,
            posteriors: path_posteriors,
            states,
            log_likelihood,
            backward_log_likelihood
        })
    }

    /// Stores the per-state log emission of every column, caching by observed characters
    fn compute_emissions(&self, network: &mut ColumnNetwork) -> Result<(), Box<dyn std::error::Error>> {
        let num_states = self.model.num_states();
        let first_col = network.first_column();
        let last_col = network.last_column();

        let mut cache: HashMap<Vec<u8>, Vec<f64>> = Default::default();
        let mut warned: HashSet<u8> = Default::default();
        for col_id in 0..network.num_columns() {
            if Some(col_id) == first_col || Some(col_id) == last_col {
                network.set_scores(col_id, vec![0.0; num_states]);
                continue;
            }

            let rendered = network.column(col_id).key().render(network.sequences());
            let observed = self.observed_column(&rendered, &mut warned);
            let scores = match cache.get(&observed) {
                Some(s) => s.clone(),
                None => {
                    let mut s = Vec::with_capacity(num_states);
                    for state in 0..num_states {
                        s.push(self.model.likelihood(&observed, state)?.ln());
                    }
                    cache.insert(observed, s.clone());
                    s
                }
            };
            network.set_scores(col_id, scores);
        }
        debug!("Computed emissions for {} unique observed columns", cache.len());
        Ok(())
    }

    /// Converts a rendered column into model characters, unknown characters become `MISSING`
    fn observed_column(&self, rendered: &[u8], warned: &mut HashSet<u8>) -> Vec<u8> {
        let alphabet = self.model.alphabet();
        rendered.iter()
            .map(|&c| {
                if c == GAP {
                    return if self.gap_is_char { GAP } else { MISSING };
                }
                let upper = c.to_ascii_uppercase();
                if alphabet.contains(&upper) {
                    upper
                } else {
                    if warned.insert(upper) {
                        warn!("Unrecognized character {:?}, treating it as missing data", upper as char);
                    }
                    MISSING
                }
            })
            .collect()
    }

    /// Forward vectors per class: log P(everything before the class, state of the next column)
    fn forward(&self, network: &ColumnNetwork) -> Result<Vec<Vec<f64>>, Box<dyn std::error::Error>> {
        let num_states = self.model.num_states();
        let mut fwd = vec![vec![LOG_ZERO; num_states]; network.num_classes()];
        for &class_id in network.class_order().iter() {
            let mut acc = vec![LOG_ZERO; num_states];
            for &col_id in network.class(class_id).predecessors().iter() {
                let column = network.column(col_id);
                let prior: &[f64] = match column.pred() {
                    Some(pred) => &fwd[pred],
                    None => &self.log_initial
                };
                let jump = log_jump(network, col_id);
                let emitted: Vec<f64> = prior.iter().zip(column_scores(network, col_id)?.iter())
                    .map(|(p, e)| p + e + jump)
                    .collect();
                for (a, m) in acc.iter_mut().zip(self.transition_out(&emitted).into_iter()) {
                    *a = log_add(*a, m);
                }
            }
            fwd[class_id] = acc;
        }
        Ok(fwd)
    }

    /// Backward vectors per class: log P(everything from the class on | state of the chosen member)
    fn backward(&self, network: &ColumnNetwork) -> Result<Vec<Vec<f64>>, Box<dyn std::error::Error>> {
        let num_states = self.model.num_states();
        let mut bwd = vec![vec![LOG_ZERO; num_states]; network.num_classes()];
        for &class_id in network.class_order().iter().rev() {
            let mut acc = vec![LOG_ZERO; num_states];
            for &col_id in network.class(class_id).members().iter() {
                let column = network.column(col_id);
                let exit = match column.succ() {
                    Some(succ) => self.transition_in(&bwd[succ]),
                    // last dummy
                    None => vec![0.0; num_states]
                };
                let jump = log_jump(network, col_id);
                for (a, (e, x)) in acc.iter_mut().zip(column_scores(network, col_id)?.iter().zip(exit.iter())) {
                    *a = log_add(*a, jump + e + x);
                }
            }
            bwd[class_id] = acc;
        }
        Ok(bwd)
    }

    /// Normalized state posterior of a real column, all zeros if the column is impossible under the model
    fn column_posterior(&self, network: &ColumnNetwork, fwd: &[Vec<f64>], bwd: &[Vec<f64>], col_id: ColumnId) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
        let column = network.column(col_id);
        let (pred, succ) = match (column.pred(), column.succ()) {
            (Some(p), Some(s)) => (p, s),
            _ => bail!("Column {} is not a real column", col_id)
        };
        let jump = log_jump(network, col_id);
        let exit = self.transition_in(&bwd[succ]);
        let joint: Vec<f64> = fwd[pred].iter()
            .zip(column_scores(network, col_id)?.iter())
            .zip(exit.iter())
            .map(|((f, e), x)| f + jump + e + x)
            .collect();

        let total = log_sum(joint.iter().cloned());
        if total == LOG_ZERO {
            return Ok(vec![0.0; joint.len()]);
        }
        Ok(joint.iter().map(|j| (j - total).exp()).collect())
    }

    /// For each next state t: log sum over s of v[s] + T[s][t]
    fn transition_out(&self, v: &[f64]) -> Vec<f64> {
        (0..v.len())
            .map(|t| log_sum(v.iter().zip(self.log_transitions.iter()).map(|(vs, row)| vs + row[t])))
            .collect()
    }

    /// For each current state s: log sum over t of T[s][t] + b[t]
    fn transition_in(&self, b: &[f64]) -> Vec<f64> {
        self.log_transitions.iter()
            .map(|row| log_sum(row.iter().zip(b.iter()).map(|(ts, bt)| ts + bt)))
            .collect()
    }
}

/// Verifies that the data likelihood is usable and that both passes computed the same value
fn check_likelihoods(forward: f64, backward: f64) -> Result<(), Box<dyn std::error::Error>> {
    if !forward.is_finite() {
        bail!("Data log likelihood is not finite: {}", forward);
    }
    if !log_close(forward, backward, LIKELIHOOD_TOLERANCE) {
        bail!("Forward log likelihood {} does not match backward log likelihood {}", forward, backward);
    }
    Ok(())
}

/// log of the probability of choosing this column among the members of its class; 0 for the first dummy
fn log_jump(network: &ColumnNetwork, col_id: ColumnId) -> f64 {
    let column = network.column(col_id);
    match column.pred() {
        Some(pred) => (column.count() as f64 / network.class(pred).succ_freq() as f64).ln(),
        None => 0.0
    }
}

fn column_scores(network: &ColumnNetwork, col_id: ColumnId) -> Result<&[f64], Box<dyn std::error::Error>> {
    match network.column(col_id).scores() {
        Some(s) => Ok(s),
        None => bail!("Column {} has no emission scores", col_id)
    }
}

/// Returns the index and value of the largest entry, first index on ties
fn best_state(posterior: &[f64]) -> (usize, f64) {
    posterior.iter().enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
}

fn is_distribution(values: &[f64]) -> bool {
    values.iter().all(|&v| v >= 0.0) && (values.iter().sum::<f64>() - 1.0).abs() <= 1e-6
}
