/*!
This module provides access to the ColumnNetwork, which compresses an ensemble of alignments into a DAG of unique columns and decodes a summary alignment from it.

# Example usage
```rust
use mpd_con::column_network::ColumnNetwork;

let ensemble = [
    [b"A-G".to_vec(), b"-CG".to_vec()],
    [b"A-G".to_vec(), b"-CG".to_vec()],
    [b"AG".to_vec(), b"CG".to_vec()],
];

// add all the alignments, then link the network
let mut network: ColumnNetwork = Default::default();
for alignment in ensemble.iter() {
    network.add_alignment(alignment).unwrap();
}
network.compute_equivalence_class_freqs().unwrap();

// decode and check the results
let score = network.update_viterbi().unwrap();
assert!((score - 7.0 / 3.0).abs() < 1e-12);
let summary = network.consensus().unwrap();
assert_eq!(summary.rows(), &[b"A-G".to_vec(), b"-CG".to_vec()]);
assert_eq!(summary.scores().len(), 3);
```
*/

use log::{debug, info, trace};
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;
use std::time::{Duration, Instant};

use crate::descriptor::{ColumnKey, GAP};
use crate::log_math::{log_sum, LOG_ZERO};
use crate::mpd_config::MpdConfig;

/// Stable handle of a column inside a network
pub type ColumnId = usize;
/// Stable handle of an equivalence class inside a network
pub type ClassId = usize;

/// A unique alignment column observed somewhere in the ensemble
#[derive(Clone, Debug)]
pub struct Column {
    /// The descriptor of this column, also its identity
    key: ColumnKey,
    /// Number of alignments containing this column
    count: u64,
    /// The class of columns that may follow this one, None only for the last dummy column
    succ: Option<ClassId>,
    /// The class this column is a member of, populated when the network is linked; always None for the first dummy
    pred: Option<ClassId>,
    /// Per-state log emission scores, only set by an annotator
    scores: Option<Vec<f64>>
}

impl Column {
    fn new(key: ColumnKey, succ: Option<ClassId>) -> Column {
        Column {
            key,
            count: 1,
            succ,
            pred: None,
            scores: None
        }
    }

    // Getters
    pub fn key(&self) -> &ColumnKey {
        &self.key
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn succ(&self) -> Option<ClassId> {
        self.succ
    }

    pub fn pred(&self) -> Option<ClassId> {
        self.pred
    }

    pub fn scores(&self) -> Option<&[f64]> {
        self.scores.as_deref()
    }
}

/// Equivalence class: all columns that are valid next observations after the same prior state
#[derive(Clone, Debug)]
pub struct ColClass {
    /// The shared predecessor key of all members
    key: ColumnKey,
    /// Columns in this class
    members: Vec<ColumnId>,
    /// Columns whose successor is this class, populated when the network is linked
    predecessors: Vec<ColumnId>,
    /// Sum of the member counts, populated when the network is linked
    succ_freq: u64
}

impl ColClass {
    fn new(key: ColumnKey) -> ColClass {
        ColClass {
            key,
            members: vec![],
            predecessors: vec![],
            succ_freq: 0
        }
    }

    // Getters
    pub fn key(&self) -> &ColumnKey {
        &self.key
    }

    pub fn members(&self) -> &[ColumnId] {
        &self.members
    }

    pub fn predecessors(&self) -> &[ColumnId] {
        &self.predecessors
    }

    pub fn succ_freq(&self) -> u64 {
        self.succ_freq
    }
}

/// Lifecycle of a network; states only move forward
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum NetworkState {
    /// Nothing has been added yet
    Empty,
    /// At least one alignment has been added
    Building,
    /// Predecessor lists and class frequencies are populated, no more alignments may be added
    Linked,
    /// A Viterbi decoding has been run and a consensus can be extracted
    Decoded
}

/// Result of a Viterbi pass over the classes of a network
#[derive(Clone, Debug)]
pub(crate) struct ViterbiTable {
    /// Best achievable score from each class to the end
    pub scores: Vec<f64>,
    /// The column chosen in each class
    pub choice: Vec<Option<ColumnId>>,
    /// The annotation state chosen in each class, if the weighting uses states
    pub states: Vec<Option<usize>>
}

/// A decoded summary alignment with its per-column reliability scores
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryAlignment {
    /// One row per sequence, in network order
    rows: Vec<Vec<u8>>,
    /// Gap sensitive marginal of each consensus column
    scores: Vec<f64>,
    /// Gap insensitive marginal of each consensus column, if requested
    gi_scores: Option<Vec<f64>>,
    /// Total Viterbi score of the decoding
    viterbi_score: f64
}

impl SummaryAlignment {
    // Getters
    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn gi_scores(&self) -> Option<&[f64]> {
        self.gi_scores.as_deref()
    }

    pub fn viterbi_score(&self) -> f64 {
        self.viterbi_score
    }
}

/// Core structure holding the column DAG built from an alignment ensemble
#[derive(Debug)]
pub struct ColumnNetwork {
    /// Configuration for scoring and decoding
    config: MpdConfig,
    /// Arena of all unique columns
    columns: Vec<Column>,
    /// Arena of all equivalence classes
    classes: Vec<ColClass>,
    /// Descriptor to column lookup
    column_lookup: HashMap<ColumnKey, ColumnId>,
    /// Class key to class lookup
    class_lookup: HashMap<ColumnKey, ClassId>,
    /// Observed transitions between consecutive columns, only tracked in two-state mode
    pair_freqs: Option<HashMap<(ColumnId, ColumnId), u64>>,
    /// Column counts keyed by the gap insensitive key, only tracked if gap insensitive scores are needed
    gi_counts: Option<HashMap<ColumnKey, u64>>,
    /// The shared first dummy column
    first_col: Option<ColumnId>,
    /// The shared last dummy column
    last_col: Option<ColumnId>,
    /// Ungapped sequences, taken from the first alignment
    sequences: Vec<Vec<u8>>,
    /// Number of alignments added
    num_alignments: u64,
    /// Lifecycle state
    state: NetworkState,
    /// Classes sorted so that every class comes before all of its successors, set when linking
    class_order: Vec<ClassId>,
    /// The most recent Viterbi decoding
    viterbi: Option<ViterbiTable>,
    /// Time spent adding alignments
    build_time: Duration,
    /// Time spent decoding
    viterbi_time: Duration
}

impl Default for ColumnNetwork {
    fn default() -> Self {
        ColumnNetwork::with_config(Default::default())
    }
}

impl ColumnNetwork {
    /// Creates a new, empty network
    /// # Arguments
    /// * `config` - scoring and decoding options; sampling options are ignored here
    pub fn with_config(config: MpdConfig) -> ColumnNetwork {
        let pair_freqs = if config.two_state { Some(Default::default()) } else { None };
        let gi_counts = if config.optimize_gap_insensitive || config.output_gap_insensitive {
            Some(Default::default())
        } else {
            None
        };

        ColumnNetwork {
            config,
            columns: vec![],
            classes: vec![],
            column_lookup: Default::default(),
            class_lookup: Default::default(),
            pair_freqs,
            gi_counts,
            first_col: None,
            last_col: None,
            sequences: vec![],
            num_alignments: 0,
            state: NetworkState::Empty,
            class_order: vec![],
            viterbi: None,
            build_time: Duration::ZERO,
            viterbi_time: Duration::ZERO
        }
    }

    /// Adds an alignment to the network.
    /// Counts of existing columns are incremented, new columns and classes are created as needed.
    /// # Arguments
    /// * `rows` - the aligned rows, all of equal length, `-` marks a gap
    /// # Errors
    /// * if the network has already been linked
    /// * if the rows are inconsistent with each other or with the alignments added so far; the network is left unchanged
    pub fn add_alignment<R: AsRef<[u8]>>(&mut self, rows: &[R]) -> Result<(), Box<dyn std::error::Error>> {
        if self.state >= NetworkState::Linked {
            bail!("Cannot add alignments after the network has been linked");
        }
        self.check_shape(rows)?;
        let start = Instant::now();

        let first_col = match self.first_col {
            Some(first_col) => {
                self.columns[first_col].count += 1;
                first_col
            },
            None => {
                // first alignment, keep the sequences and create the shared start
                self.sequences = rows.iter()
                    .map(|row| row.as_ref().iter().cloned().filter(|&c| c != GAP).collect())
                    .collect();
                let first_key = ColumnKey::first(rows.len());
                let succ = self.class_for(first_key.succ_key());
                let first_col = self.push_column(first_key, Some(succ));
                self.first_col = Some(first_col);
                first_col
            }
        };

        let mut current = self.columns[first_col].key.clone();
        let mut prev_col = first_col;
        let width = rows[0].as_ref().len();
        for j in 0..width {
            let next = match current.next(rows, j) {
                Some(n) => n,
                // all gap columns are absorbed into the next transition
                None => continue
            };

            if let Some(gi_counts) = self.gi_counts.as_mut() {
                *gi_counts.entry(next.gi_key()).or_insert(0) += 1;
            }

            let col_id = self.observe(next.clone(), prev_col);
            if let Some(pair_freqs) = self.pair_freqs.as_mut() {
                *pair_freqs.entry((prev_col, col_id)).or_insert(0) += 1;
            }
            prev_col = col_id;
            current = next;
        }

        match self.last_col {
            Some(last_col) => self.columns[last_col].count += 1,
            None => {
                let last_key = ColumnKey::last(&current);
                let pred_class = self.columns[prev_col].succ.unwrap();
                let last_col = self.push_column(last_key, None);
                self.classes[pred_class].members.push(last_col);
                self.last_col = Some(last_col);
            }
        };

        self.num_alignments += 1;
        self.state = NetworkState::Building;
        self.build_time += start.elapsed();
        trace!("Added alignment {}, {} columns in {} classes", self.num_alignments, self.columns.len(), self.classes.len());
        Ok(())
    }

    /// Verifies that an alignment can be replayed through this network
    fn check_shape<R: AsRef<[u8]>>(&self, rows: &[R]) -> Result<(), Box<dyn std::error::Error>> {
        if rows.is_empty() {
            bail!("Alignment must have at least one row");
        }
        let width = rows[0].as_ref().len();
        if rows.iter().any(|r| r.as_ref().len() != width) {
            bail!("Alignment rows have inconsistent lengths");
        }
        if self.first_col.is_some() {
            if rows.len() != self.sequences.len() {
                bail!("Alignment has {} rows, expected {}", rows.len(), self.sequences.len());
            }
            for (i, (row, seq)) in rows.iter().zip(self.sequences.iter()).enumerate() {
                let residues = row.as_ref().iter().filter(|&&c| c != GAP).count();
                if residues != seq.len() {
                    bail!("Alignment row {} has {} residues, expected {}", i, residues, seq.len());
                }
            }
        }
        Ok(())
    }

    /// Records one observation of a column, creating it if needed
    /// # Arguments
    /// * `key` - the descriptor of the observed column
    /// * `prev_col` - the column observed right before it
    fn observe(&mut self, key: ColumnKey, prev_col: ColumnId) -> ColumnId {
        if let Some(&col_id) = self.column_lookup.get(&key) {
            self.columns[col_id].count += 1;
            return col_id;
        }

        let pred_class = self.columns[prev_col].succ.unwrap();
        debug_assert_eq!(self.classes[pred_class].key, key.pred_key());
        let succ = self.class_for(key.succ_key());
        let col_id = self.push_column(key, Some(succ));
        self.classes[pred_class].members.push(col_id);
        col_id
    }

    fn push_column(&mut self, key: ColumnKey, succ: Option<ClassId>) -> ColumnId {
        let col_id = self.columns.len();
        self.column_lookup.insert(key.clone(), col_id);
        self.columns.push(Column::new(key, succ));
        col_id
    }

    /// Returns the class for a key, creating it if it does not exist yet
    fn class_for(&mut self, key: ColumnKey) -> ClassId {
        if let Some(&class_id) = self.class_lookup.get(&key) {
            return class_id;
        }
        let class_id = self.classes.len();
        self.class_lookup.insert(key.clone(), class_id);
        self.classes.push(ColClass::new(key));
        class_id
    }

    /// Links the network: fills the predecessor lists and class frequencies.
    /// This must be called exactly once, after all alignments are added and before any decoding.
    /// # Errors
    /// * if the network is empty or has already been linked
    pub fn compute_equivalence_class_freqs(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        match self.state {
            NetworkState::Empty => bail!("Cannot link an empty network"),
            NetworkState::Linked | NetworkState::Decoded => bail!("Network is already linked"),
            NetworkState::Building => {}
        };

        debug!("Computing equivalence class frequencies.");
        for (class_id, class) in self.classes.iter_mut().enumerate() {
            for &col_id in class.members.iter() {
                let column = &mut self.columns[col_id];
                column.pred = Some(class_id);
                class.succ_freq += column.count;
            }
        }
        for (col_id, column) in self.columns.iter().enumerate() {
            if let Some(succ) = column.succ {
                self.classes[succ].predecessors.push(col_id);
            }
        }

        // class key sums strictly increase along each edge, giving a topological order
        let mut class_order: Vec<ClassId> = (0..self.classes.len()).collect();
        class_order.sort_by_key(|&c| (self.classes[c].key.level(), c));
        self.class_order = class_order;

        self.state = NetworkState::Linked;
        info!("Network has {} columns in {} classes from {} alignments", self.columns.len(), self.classes.len(), self.num_alignments);
        Ok(())
    }

    /// Returns the empirical frequency of a column across the ensemble.
    /// # Arguments
    /// * `col_id` - the column
    /// * `gap_insensitive` - if true, uses the count of all columns sharing the gap insensitive key
    /// # Errors
    /// * if the network is empty
    /// * if the column is not in the network
    /// * if gap insensitive counts were requested but not tracked
    pub fn col_marginal(&self, col_id: ColumnId, gap_insensitive: bool) -> Result<f64, Box<dyn std::error::Error>> {
        if self.num_alignments == 0 {
            bail!("Cannot compute a marginal on an empty network");
        }
        let n = self.num_alignments as f64;
        let column = match self.columns.get(col_id) {
            Some(c) => c,
            None => bail!("Column {} is out of range for a network with {} columns", col_id, self.columns.len())
        };
        if gap_insensitive {
            let gi_counts = match self.gi_counts.as_ref() {
                Some(g) => g,
                None => bail!("Gap insensitive counts are not tracked by this network")
            };
            let count = gi_counts.get(&column.key.gi_key()).cloned().unwrap_or(0);
            Ok(count as f64 / n)
        } else {
            Ok(column.count as f64 / n)
        }
    }

    /// Runs the Viterbi algorithm maximizing the sum of column marginals minus `g` per column.
    /// Returns the total score of the decoded path.
    /// # Errors
    /// * if the network has not been linked
    pub fn update_viterbi(&mut self) -> Result<f64, Box<dyn std::error::Error>> {
        self.require_linked()?;
        let start = Instant::now();
        let gap_insensitive = self.config.optimize_gap_insensitive;
        let table = self.viterbi_table(|col_id| {
            Ok((self.col_marginal(col_id, gap_insensitive)?, None))
        })?;
        let score = self.install_viterbi(table)?;
        self.viterbi_time += start.elapsed();
        info!("Viterbi score: {:.3}", score);
        Ok(score)
    }

    /// Generic Viterbi pass, every column on the path contributes `weight - g`.
    /// The class holding the last dummy scores 0.
    /// # Arguments
    /// * `column_weight` - returns the weight of a column and optionally the annotation state that produced it
    pub(crate) fn viterbi_table<F>(&self, column_weight: F) -> Result<ViterbiTable, Box<dyn std::error::Error>>
    where
        F: Fn(ColumnId) -> Result<(f64, Option<usize>), Box<dyn std::error::Error>>
    {
        self.require_linked()?;
        let last_col = self.endpoints()?.1;
        let num_classes = self.classes.len();
        let mut table = ViterbiTable {
            scores: vec![LOG_ZERO; num_classes],
            choice: vec![None; num_classes],
            states: vec![None; num_classes]
        };

        // successors always come later in the order, so walk it backwards
        for &class_id in self.class_order.iter().rev() {
            let class = &self.classes[class_id];
            if class.members.contains(&last_col) {
                table.scores[class_id] = 0.0;
                table.choice[class_id] = Some(last_col);
                continue;
            }

            let mut best: Option<(f64, ColumnId, Option<usize>)> = None;
            for &col_id in class.members.iter() {
                let succ = self.columns[col_id].succ.unwrap();
                let (weight, state) = column_weight(col_id)?;
                let score = weight - self.config.g_value + table.scores[succ];
                if best.map_or(true, |(b, _, _)| score > b) {
                    best = Some((score, col_id, state));
                }
            }

            if let Some((score, col_id, state)) = best {
                table.scores[class_id] = score;
                table.choice[class_id] = Some(col_id);
                table.states[class_id] = state;
            }
        }
        Ok(table)
    }

    /// Stores a Viterbi table as the current decoding, returning its total score
    pub(crate) fn install_viterbi(&mut self, table: ViterbiTable) -> Result<f64, Box<dyn std::error::Error>> {
        let first_col = self.endpoints()?.0;
        let start_class = self.columns[first_col].succ.unwrap();
        let score = table.scores[start_class];
        self.viterbi = Some(table);
        self.state = NetworkState::Decoded;
        Ok(score)
    }

    /// Returns the columns of the decoded consensus, excluding both dummies.
    /// # Errors
    /// * if no decoding has been run
    pub fn consensus_path(&self) -> Result<Vec<ColumnId>, Box<dyn std::error::Error>> {
        let table = match self.viterbi.as_ref() {
            Some(t) => t,
            None => bail!("Consensus requested before decoding")
        };
        let (first_col, last_col) = self.endpoints()?;

        let mut path = vec![];
        let mut current = first_col;
        loop {
            let succ = self.columns[current].succ.unwrap();
            current = match table.choice[succ] {
                Some(c) => c,
                None => bail!("Viterbi decoding is missing a choice for class {}", succ)
            };
            if current == last_col {
                break;
            }
            path.push(current);
        }
        Ok(path)
    }

    /// Returns the annotation states chosen along the consensus path, if the decoding tracked them
    pub fn consensus_states(&self) -> Result<Vec<Option<usize>>, Box<dyn std::error::Error>> {
        let path = self.consensus_path()?;
        let table = self.viterbi.as_ref().unwrap();
        Ok(path.iter()
            .map(|&col_id| table.states[self.columns[col_id].pred.unwrap()])
            .collect())
    }

    /// Renders the decoded consensus with its per-column scores.
    /// # Errors
    /// * if no decoding has been run
    pub fn consensus(&self) -> Result<SummaryAlignment, Box<dyn std::error::Error>> {
        let path = self.consensus_path()?;
        let table = self.viterbi.as_ref().unwrap();

        let mut rows: Vec<Vec<u8>> = vec![Vec::with_capacity(path.len()); self.sequences.len()];
        let mut scores = Vec::with_capacity(path.len());
        let mut gi_scores = if self.config.output_gap_insensitive { Some(vec![]) } else { None };
        for &col_id in path.iter() {
            let rendered = self.columns[col_id].key.render(&self.sequences);
            for (row, c) in rows.iter_mut().zip(rendered.into_iter()) {
                row.push(c);
            }
            scores.push(self.col_marginal(col_id, false)?);
            if let Some(gi) = gi_scores.as_mut() {
                gi.push(self.col_marginal(col_id, true)?);
            }
        }

        let first_col = self.first_col.unwrap();
        let viterbi_score = table.scores[self.columns[first_col].succ.unwrap()];
        Ok(SummaryAlignment {
            rows,
            scores,
            gi_scores,
            viterbi_score
        })
    }

    /// Computes the log of the (count weighted) number of distinct paths from the first to the last dummy.
    /// In two-state mode, only predecessor columns that were actually observed right before a column are followed.
    /// # Errors
    /// * if the network has not been linked
    pub fn log_n_paths(&self) -> Result<f64, Box<dyn std::error::Error>> {
        self.require_linked()?;
        let (first_col, last_col) = self.endpoints()?;
        let start_class = self.columns[first_col].succ.unwrap();

        let mut paths = vec![LOG_ZERO; self.columns.len()];
        for &class_id in self.class_order.iter() {
            let class = &self.classes[class_id];
            for &col_id in class.members.iter() {
                paths[col_id] = if class_id == start_class {
                    (self.columns[col_id].count as f64).ln()
                } else {
                    let filter = col_id != last_col;
                    log_sum(class.predecessors.iter()
                        .filter(|&&p| !filter || self.pair_observed(p, col_id))
                        .map(|&p| paths[p]))
                };
            }
        }
        Ok(paths[last_col])
    }

    /// Returns true if the transition is allowed; always true outside of two-state mode
    fn pair_observed(&self, from: ColumnId, to: ColumnId) -> bool {
        match self.pair_freqs.as_ref() {
            Some(pair_freqs) => pair_freqs.contains_key(&(from, to)),
            None => true
        }
    }

    /// Replays an alignment that was used to build the network and scores it.
    /// Returns the score and the number of non-gap columns consumed.
    /// # Arguments
    /// * `rows` - the aligned rows
    /// * `compute_log_posterior` - if true, the score is the empirical log posterior; otherwise it is the sum of column marginals
    /// # Errors
    /// * if the network has not been linked
    /// * if a column of the alignment is not in the network
    pub fn score_alignment<R: AsRef<[u8]>>(&self, rows: &[R], compute_log_posterior: bool) -> Result<(f64, usize), Box<dyn std::error::Error>> {
        self.require_linked()?;
        self.check_shape(rows)?;
        let first_col = self.endpoints()?.0;

        let mut score = 0.0;
        let mut real_columns = 0;
        let mut current = self.columns[first_col].key.clone();
        let mut prev_col = first_col;
        let width = rows[0].as_ref().len();
        for j in 0..width {
            let next = match current.next(rows, j) {
                Some(n) => n,
                None => continue
            };
            real_columns += 1;

            let col_id = match self.column_lookup.get(&next) {
                Some(&c) => c,
                None => bail!("Could not find column {:?} in the network", next.desc())
            };
            let column = &self.columns[col_id];
            if compute_log_posterior {
                match self.pair_freqs.as_ref() {
                    Some(pair_freqs) => {
                        if let Some(&freq) = pair_freqs.get(&(prev_col, col_id)) {
                            score += (freq as f64 / self.columns[prev_col].count as f64).ln();
                        }
                    },
                    None => {
                        let class = &self.classes[column.pred.unwrap()];
                        score += (column.count as f64 / class.succ_freq as f64).ln();
                    }
                };
            } else {
                score += self.col_marginal(col_id, self.config.optimize_gap_insensitive)?;
            }

            prev_col = col_id;
            current = next;
        }
        Ok((score, real_columns))
    }

    fn require_linked(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.state < NetworkState::Linked {
            bail!("Network must be linked before decoding or scoring");
        }
        Ok(())
    }

    /// Returns the first and last dummy columns
    fn endpoints(&self) -> Result<(ColumnId, ColumnId), Box<dyn std::error::Error>> {
        match (self.first_col, self.last_col) {
            (Some(f), Some(l)) => Ok((f, l)),
            _ => bail!("Network is empty")
        }
    }

    /// Sets the emission scores of a column, used by annotators
    pub(crate) fn set_scores(&mut self, col_id: ColumnId, scores: Vec<f64>) {
        self.columns[col_id].scores = Some(scores);
    }

    /// Topological order of the classes, empty until linked
    pub(crate) fn class_order(&self) -> &[ClassId] {
        &self.class_order
    }

    /// Looks up a column by descriptor
    pub fn find_column(&self, key: &ColumnKey) -> Option<ColumnId> {
        self.column_lookup.get(key).cloned()
    }

    /// Returns the number of times `to` directly followed `from`, only tracked in two-state mode
    pub fn pair_count(&self, from: ColumnId, to: ColumnId) -> Option<u64> {
        self.pair_freqs.as_ref()
            .map(|p| p.get(&(from, to)).cloned().unwrap_or(0))
    }

    // Getters
    pub fn config(&self) -> &MpdConfig {
        &self.config
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn num_alignments(&self) -> u64 {
        self.num_alignments
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn column(&self, col_id: ColumnId) -> &Column {
        &self.columns[col_id]
    }

    pub(crate) fn class(&self, class_id: ClassId) -> &ColClass {
        &self.classes[class_id]
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn classes(&self) -> &[ColClass] {
        &self.classes
    }

    pub fn first_column(&self) -> Option<ColumnId> {
        self.first_col
    }

    pub fn last_column(&self) -> Option<ColumnId> {
        self.last_col
    }

    pub fn sequences(&self) -> &[Vec<u8>] {
        &self.sequences
    }

    pub fn build_time(&self) -> Duration {
        self.build_time
    }

    pub fn viterbi_time(&self) -> Duration {
        self.viterbi_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::example_gen::generate_ensemble;
    use crate::mpd_config::MpdConfigBuilder;

    /// Three alignments of "AG" and "CG", the G column is shared by all of them
    fn g_scenario() -> Vec<[Vec<u8>; 2]> {
        vec![
            [b"A-G".to_vec(), b"-CG".to_vec()],
            [b"A-G".to_vec(), b"-CG".to_vec()],
            [b"AG".to_vec(), b"CG".to_vec()]
        ]
    }

    fn build_network<A: AsRef<[Vec<u8>]>>(alignments: &[A], config: MpdConfig) -> ColumnNetwork {
        let mut network = ColumnNetwork::with_config(config);
        for alignment in alignments.iter() {
            network.add_alignment(alignment.as_ref()).unwrap();
        }
        network.compute_equivalence_class_freqs().unwrap();
        network
    }

    fn key(desc: &[i32]) -> ColumnKey {
        ColumnKey::new(desc.to_vec())
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_unanimous() {
        let alignment = vec![b"ACG".to_vec(), b"A-G".to_vec()];
        let ensemble = vec![alignment.clone(); 3];
        let mut network = build_network(&ensemble, Default::default());

        // three real columns plus the two dummies
        assert_eq!(network.num_columns(), 5);
        assert_eq!(network.num_classes(), 4);
        assert_eq!(network.num_alignments(), 3);

        let score = network.update_viterbi().unwrap();
        assert_close(score, 3.0);

        let summary = network.consensus().unwrap();
        assert_eq!(summary.rows(), &alignment[..]);
        assert_eq!(summary.scores(), &[1.0, 1.0, 1.0]);
        assert_eq!(summary.gi_scores(), None);
        assert_close(summary.viterbi_score(), 3.0);
    }

    #[test]
    fn test_shared_column_marginals() {
        let ensemble = g_scenario();
        let mut network = ColumnNetwork::default();
        for alignment in ensemble.iter() {
            network.add_alignment(alignment).unwrap();
        }
        network.compute_equivalence_class_freqs().unwrap();

        let shared = network.find_column(&key(&[3, 3])).unwrap();
        assert_close(network.col_marginal(shared, false).unwrap(), 1.0);
        let divergent = network.find_column(&key(&[1, 1])).unwrap();
        assert_close(network.col_marginal(divergent, false).unwrap(), 1.0 / 3.0);
        let gapped = network.find_column(&key(&[1, 0])).unwrap();
        assert_close(network.col_marginal(gapped, false).unwrap(), 2.0 / 3.0);

        let outside = network.num_columns();
        let error = network.col_marginal(outside, false).err().unwrap();
        assert_eq!(error.to_string(), format!("Column {} is out of range for a network with {} columns", outside, outside));

        // the gapped path wins with g = 0
        let score = network.update_viterbi().unwrap();
        assert_close(score, 2.0 / 3.0 + 2.0 / 3.0 + 1.0);
        let summary = network.consensus().unwrap();
        assert_eq!(summary.rows(), &[b"A-G".to_vec(), b"-CG".to_vec()]);
    }

    #[test]
    fn test_g_value_shortens() {
        // with a large enough penalty, the shorter path is preferred
        let config = MpdConfigBuilder::default()
            .g_value(1.5)
            .build().unwrap();
        let mut network = build_network(&g_scenario(), config);
        let score = network.update_viterbi().unwrap();
        assert_close(score, (1.0 / 3.0 - 1.5) + (1.0 - 1.5));
        let summary = network.consensus().unwrap();
        assert_eq!(summary.rows(), &[b"AG".to_vec(), b"CG".to_vec()]);
    }

    #[test]
    fn test_idempotent_readd() {
        let ensemble = g_scenario();
        let mut network = ColumnNetwork::default();
        network.add_alignment(&ensemble[0]).unwrap();
        let num_columns = network.num_columns();
        let num_classes = network.num_classes();
        let counts: Vec<u64> = network.columns().iter().map(|c| c.count()).collect();

        network.add_alignment(&ensemble[1]).unwrap();
        assert_eq!(network.num_columns(), num_columns);
        assert_eq!(network.num_classes(), num_classes);
        for (column, old_count) in network.columns().iter().zip(counts.iter()) {
            assert_eq!(column.count(), old_count + 1);
        }
    }

    #[test]
    fn test_order_independence() {
        let ensemble = g_scenario();
        let config: MpdConfig = MpdConfigBuilder::default()
            .output_gap_insensitive(true)
            .build().unwrap();
        let forward = build_network(&ensemble, config.clone());
        let reversed: Vec<_> = ensemble.iter().rev().cloned().collect();
        let backward = build_network(&reversed, config);

        assert_eq!(forward.num_columns(), backward.num_columns());
        assert_eq!(forward.num_classes(), backward.num_classes());
        for (col_id, column) in forward.columns().iter().enumerate() {
            let other = backward.find_column(column.key()).unwrap();
            assert_eq!(column.count(), backward.column(other).count());
            assert_eq!(forward.col_marginal(col_id, false).unwrap(), backward.col_marginal(other, false).unwrap());
            assert_eq!(forward.col_marginal(col_id, true).unwrap(), backward.col_marginal(other, true).unwrap());
        }

        // class membership matches when compared by descriptor
        for class in forward.classes().iter() {
            let mut members: Vec<ColumnKey> = class.members().iter()
                .map(|&c| forward.column(c).key().clone())
                .collect();
            members.sort();
            let other = backward.classes().iter()
                .find(|c| c.key() == class.key())
                .unwrap();
            let mut other_members: Vec<ColumnKey> = other.members().iter()
                .map(|&c| backward.column(c).key().clone())
                .collect();
            other_members.sort();
            assert_eq!(members, other_members);
        }
    }

    #[test]
    fn test_class_probability_conservation() {
        let (_truth, ensemble) = generate_ensemble(4, 20, 30, 0.1);
        let network = build_network(&ensemble, Default::default());
        let n = network.num_alignments() as f64;
        for class in network.classes().iter() {
            let total: f64 = class.members().iter()
                .map(|&c| network.col_marginal(c, false).unwrap())
                .sum();
            assert!((total - class.succ_freq() as f64 / n).abs() < 1e-9);
        }

        // every column but the first dummy has a class after linking
        let first = network.first_column().unwrap();
        for (col_id, column) in network.columns().iter().enumerate() {
            assert_eq!(column.pred().is_none(), col_id == first);
        }
    }

    #[test]
    fn test_log_n_paths() {
        // identical alignments give one path weighted by its count
        let alignment = vec![b"ACG".to_vec(), b"A-G".to_vec()];
        let network = build_network(&vec![alignment; 4], Default::default());
        assert_close(network.log_n_paths().unwrap(), 4.0_f64.ln());

        // two alignments that only meet at the shared final column
        let ensemble = g_scenario();
        let network = build_network(&ensemble[1..], Default::default());
        assert_close(network.log_n_paths().unwrap(), 2.0_f64.ln());

        let network = build_network(&ensemble, Default::default());
        assert_close(network.log_n_paths().unwrap(), 3.0_f64.ln());
    }

    #[test]
    fn test_log_n_paths_two_state() {
        // both alignments pass through the state where A and C are consumed, so the
        // order-1 network also contains the two mixed paths
        let ensemble = vec![
            vec![b"A-B-".to_vec(), b"-C-D".to_vec()],
            vec![b"AB".to_vec(), b"CD".to_vec()]
        ];
        let network = build_network(&ensemble, Default::default());
        assert_close(network.log_n_paths().unwrap(), 4.0_f64.ln());

        // pairwise statistics only follow observed transitions
        let config = MpdConfigBuilder::default()
            .two_state(true)
            .build().unwrap();
        let network = build_network(&ensemble, config);
        assert_close(network.log_n_paths().unwrap(), 2.0_f64.ln());
    }

    #[test]
    fn test_score_alignment() {
        let ensemble = g_scenario();
        let network = build_network(&ensemble, Default::default());

        let (score, real_columns) = network.score_alignment(&ensemble[0], false).unwrap();
        assert_close(score, 2.0 / 3.0 + 2.0 / 3.0 + 1.0);
        assert_eq!(real_columns, 3);

        let (score, real_columns) = network.score_alignment(&ensemble[2], false).unwrap();
        assert_close(score, 1.0 / 3.0 + 1.0);
        assert_eq!(real_columns, 2);

        // empirical posteriors of the two distinct alignments sum to one
        let (p1, _) = network.score_alignment(&ensemble[0], true).unwrap();
        let (p2, _) = network.score_alignment(&ensemble[2], true).unwrap();
        assert_close(p1, (2.0_f64 / 3.0).ln());
        assert_close(p1.exp() + p2.exp(), 1.0);

        // all gap columns are skipped and not counted
        let gapped = [b"A--G".to_vec(), b"-C-G".to_vec()];
        let (score, real_columns) = network.score_alignment(&gapped, false).unwrap();
        assert_close(score, 2.0 / 3.0 + 2.0 / 3.0 + 1.0);
        assert_eq!(real_columns, 3);
    }

    #[test]
    fn test_score_alignment_two_state() {
        let ensemble = g_scenario();
        let config = MpdConfigBuilder::default()
            .two_state(true)
            .build().unwrap();
        let network = build_network(&ensemble, config);

        let first = network.first_column().unwrap();
        let gapped = network.find_column(&key(&[1, 0])).unwrap();
        assert_eq!(network.pair_count(first, gapped), Some(2));

        let (p1, _) = network.score_alignment(&ensemble[0], true).unwrap();
        let (p2, _) = network.score_alignment(&ensemble[2], true).unwrap();
        assert_close(p1, (2.0_f64 / 3.0).ln());
        assert_close(p2, (1.0_f64 / 3.0).ln());
    }

    #[test]
    fn test_score_missing_column() {
        let network = build_network(&g_scenario(), Default::default());
        let unseen = [b"AG-".to_vec(), b"C-G".to_vec()];
        let error = network.score_alignment(&unseen, false).err().unwrap();
        assert!(error.to_string().starts_with("Could not find column"));
    }

    #[test]
    fn test_gap_insensitive() {
        let ensemble = vec![
            vec![b"A-".to_vec(), b"-C".to_vec()],
            vec![b"-A".to_vec(), b"C-".to_vec()]
        ];
        let config = MpdConfigBuilder::default()
            .output_gap_insensitive(true)
            .build().unwrap();
        let network = build_network(&ensemble, config);

        // [1, 0] and [1, 2] only differ in the gap component
        let a = network.find_column(&key(&[1, 0])).unwrap();
        let b = network.find_column(&key(&[1, 2])).unwrap();
        assert_close(network.col_marginal(a, false).unwrap(), 0.5);
        assert_close(network.col_marginal(a, true).unwrap(), 1.0);
        assert_close(network.col_marginal(b, true).unwrap(), 1.0);

        // not tracked without the flag
        let network = build_network(&ensemble, Default::default());
        assert!(network.col_marginal(a, true).is_err());
    }

    #[test]
    fn test_gap_insensitive_output() {
        let config = MpdConfigBuilder::default()
            .optimize_gap_insensitive(true)
            .output_gap_insensitive(true)
            .build().unwrap();
        let mut network = build_network(&g_scenario(), config);
        network.update_viterbi().unwrap();
        let summary = network.consensus().unwrap();
        let gi_scores = summary.gi_scores().unwrap();
        assert_eq!(gi_scores.len(), summary.scores().len());
        for (gi, gs) in gi_scores.iter().zip(summary.scores().iter()) {
            assert!(gi >= gs);
        }
    }

    #[test]
    fn test_lifecycle_errors() {
        let ensemble = g_scenario();
        let mut network = ColumnNetwork::default();

        let error = network.compute_equivalence_class_freqs().err().unwrap();
        assert_eq!(error.to_string(), "Cannot link an empty network");
        let error = network.col_marginal(0, false).err().unwrap();
        assert_eq!(error.to_string(), "Cannot compute a marginal on an empty network");

        network.add_alignment(&ensemble[0]).unwrap();
        let error = network.update_viterbi().err().unwrap();
        assert_eq!(error.to_string(), "Network must be linked before decoding or scoring");
        assert!(network.log_n_paths().is_err());
        assert!(network.score_alignment(&ensemble[0], false).is_err());

        network.compute_equivalence_class_freqs().unwrap();
        let error = network.consensus().err().unwrap();
        assert_eq!(error.to_string(), "Consensus requested before decoding");
        let error = network.compute_equivalence_class_freqs().err().unwrap();
        assert_eq!(error.to_string(), "Network is already linked");
        let error = network.add_alignment(&ensemble[1]).err().unwrap();
        assert_eq!(error.to_string(), "Cannot add alignments after the network has been linked");

        network.update_viterbi().unwrap();
        assert_eq!(network.state(), NetworkState::Decoded);
        assert!(network.add_alignment(&ensemble[1]).is_err());
    }

    #[test]
    fn test_inconsistent_alignments() {
        let mut network = ColumnNetwork::default();
        let error = network.add_alignment(&[b"AC".to_vec(), b"A".to_vec()]).err().unwrap();
        assert_eq!(error.to_string(), "Alignment rows have inconsistent lengths");
        assert_eq!(network.state(), NetworkState::Empty);

        network.add_alignment(&[b"AC".to_vec(), b"A-".to_vec()]).unwrap();
        let error = network.add_alignment(&[b"AC".to_vec()]).err().unwrap();
        assert_eq!(error.to_string(), "Alignment has 1 rows, expected 2");
        let error = network.add_alignment(&[b"AC".to_vec(), b"AG".to_vec()]).err().unwrap();
        assert_eq!(error.to_string(), "Alignment row 1 has 2 residues, expected 1");

        // failed adds do not count
        assert_eq!(network.num_alignments(), 1);
    }

    #[test]
    fn test_random_ensemble_round_trip() {
        let (_truth, ensemble) = generate_ensemble(5, 40, 50, 0.15);
        let mut network = build_network(&ensemble, Default::default());
        for alignment in ensemble.iter() {
            let (score, real_columns) = network.score_alignment(alignment, false).unwrap();
            assert!(score.is_finite());
            assert!(real_columns > 0);
            let (log_post, _) = network.score_alignment(alignment, true).unwrap();
            assert!(log_post.is_finite() && log_post <= 0.0);
        }
        assert!(network.log_n_paths().unwrap().is_finite());

        // the consensus is itself an alignment of the same sequences
        network.update_viterbi().unwrap();
        let summary = network.consensus().unwrap();
        for (row, seq) in summary.rows().iter().zip(network.sequences().iter()) {
            let ungapped: Vec<u8> = row.iter().cloned().filter(|&c| c != GAP).collect();
            assert_eq!(&ungapped, seq);
        }
    }

    #[test]
    fn test_determinism() {
        let (_truth, ensemble) = generate_ensemble(4, 30, 40, 0.2);
        let mut n1 = build_network(&ensemble, Default::default());
        let mut n2 = build_network(&ensemble, Default::default());
        let s1 = n1.update_viterbi().unwrap();
        let s2 = n2.update_viterbi().unwrap();
        assert_eq!(s1.to_bits(), s2.to_bits());
        assert_eq!(n1.consensus().unwrap(), n2.consensus().unwrap());
    }
}
