/*!
Emission models provide the per-state likelihood of an observed alignment column.
The annotator only depends on the `EmissionModel` trait; `StarTreeModel` is a simple phylogenetic implementation of it.

# Example usage
```rust
use mpd_con::emission::{EmissionModel, StarTreeModel, MISSING};

// two states, the second one evolving three times faster
let model = StarTreeModel::jukes_cantor(b"ACGT", 0.1, vec![1.0, 3.0]).unwrap();
let conserved = model.likelihood(b"AAA", 0).unwrap();
let fast = model.likelihood(b"AAA", 1).unwrap();
assert!(conserved > fast);

// missing data carries no information
assert!((model.likelihood(&[MISSING, MISSING], 0).unwrap() - 1.0).abs() < 1e-12);
```
*/

use simple_error::bail;

/// Marker for an observation that carries no information, e.g. a gap when gaps are not part of the alphabet
pub const MISSING: u8 = 0;

/// Provides the likelihood of an observed column under each annotation state
pub trait EmissionModel {
    /// The number of annotation states
    fn num_states(&self) -> usize;

    /// The characters this model recognizes, uppercase; contains `-` if gaps are modeled as a character
    fn alphabet(&self) -> &[u8];

    /// Returns the probability of the observed characters, one per sequence, in the given state.
    /// # Arguments
    /// * `observed` - one character per sequence, each either in `alphabet()` or `MISSING`
    /// * `state` - the annotation state
    /// # Errors
    /// * if a character is not recognized or the state is out of range
    fn likelihood(&self, observed: &[u8], state: usize) -> Result<f64, Box<dyn std::error::Error>>;
}

/// Star phylogeny with a Felsenstein (F81) substitution model: every sequence descends directly from one root.
/// Each annotation state scales the branch length by its own rate multiplier.
#[derive(Clone, Debug)]
pub struct StarTreeModel {
    /// Recognized characters
    alphabet: Vec<u8>,
    /// Equilibrium frequency of each character
    equilibrium: Vec<f64>,
    /// Branch length from the root to every leaf
    branch_length: f64,
    /// Rate multiplier of each annotation state
    rhos: Vec<f64>,
    /// Rate normalizer so that one unit of branch length is one expected substitution
    mu: f64
}

impl StarTreeModel {
    /// Creates a new model and performs sanity checks.
    /// # Arguments
    /// * `alphabet` - recognized characters
    /// * `equilibrium` - equilibrium frequencies, must match the alphabet and sum to one
    /// * `branch_length` - branch length from root to leaves
    /// * `rhos` - one rate multiplier per annotation state
    /// # Errors
    /// * if the parameters are inconsistent
    pub fn new(alphabet: &[u8], equilibrium: Vec<f64>, branch_length: f64, rhos: Vec<f64>) -> Result<StarTreeModel, Box<dyn std::error::Error>> {
        if alphabet.is_empty() || alphabet.len() != equilibrium.len() {
            bail!("Equilibrium frequencies must match the alphabet size");
        }
        if equilibrium.iter().any(|&p| p < 0.0) || (equilibrium.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
            bail!("Equilibrium frequencies must be a probability distribution");
        }
        if branch_length < 0.0 || rhos.is_empty() || rhos.iter().any(|&r| r < 0.0) {
            bail!("Branch length and rate multipliers must be non-negative, with at least one state");
        }

        let homozygosity: f64 = equilibrium.iter().map(|p| p * p).sum();
        let mu = if homozygosity < 1.0 { 1.0 / (1.0 - homozygosity) } else { 0.0 };
        Ok(StarTreeModel {
            alphabet: alphabet.to_ascii_uppercase(),
            equilibrium,
            branch_length,
            rhos,
            mu
        })
    }

    /// Uniform equilibrium frequencies, i.e. a Jukes-Cantor model over the alphabet
    pub fn jukes_cantor(alphabet: &[u8], branch_length: f64, rhos: Vec<f64>) -> Result<StarTreeModel, Box<dyn std::error::Error>> {
        let equilibrium = vec![1.0 / alphabet.len() as f64; alphabet.len()];
        StarTreeModel::new(alphabet, equilibrium, branch_length, rhos)
    }

    /// P(leaf = b | root = a) along a branch of length `t`
    fn transition(&self, a: usize, b: usize, t: f64) -> f64 {
        let stay = (-self.mu * t).exp();
        let same = if a == b { stay } else { 0.0 };
        same + (1.0 - stay) * self.equilibrium[b]
    }

    // Getters
    pub fn rhos(&self) -> &[f64] {
        &self.rhos
    }

    pub fn branch_length(&self) -> f64 {
        self.branch_length
    }
}

impl EmissionModel for StarTreeModel {
    fn num_states(&self) -> usize {
        self.rhos.len()
    }

    fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    fn likelihood(&self, observed: &[u8], state: usize) -> Result<f64, Box<dyn std::error::Error>> {
        if state >= self.rhos.len() {
            bail!("State {} is out of range for a model with {} states", state, self.rhos.len());
        }
        let t = self.branch_length * self.rhos[state];

        let mut leaves: Vec<Option<usize>> = Vec::with_capacity(observed.len());
        for &c in observed.iter() {
            if c == MISSING {
                leaves.push(None);
                continue;
            }
            match self.alphabet.iter().position(|&a| a == c) {
                Some(index) => leaves.push(Some(index)),
                None => bail!("Unrecognized character {:?} in observed column", c as char)
            };
        }

        // sum over the root character, missing leaves contribute a factor of one
        let total: f64 = (0..self.alphabet.len())
            .map(|root| {
                let partial: f64 = leaves.iter()
                    .flatten()
                    .map(|&leaf| self.transition(root, leaf, t))
                    .product();
                self.equilibrium[root] * partial
            })
            .sum();
        Ok(total)
    }
}
