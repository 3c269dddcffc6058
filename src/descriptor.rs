/*!
Hashable encoding of a single alignment column.
Each component tracks one sequence: `-1` is the position before the sequence start, odd values mark a residue at the current column, and even values mark a gap.
In both cases `component >> 1` is the index of the last consumed residue in the ungapped sequence.
*/

/// The gap character used in all alignment rows
pub const GAP: u8 = b'-';

/// A column descriptor, compared and hashed by value.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ColumnKey {
    desc: Vec<i32>
}

impl ColumnKey {
    /// Wraps a raw descriptor
    pub fn new(desc: Vec<i32>) -> ColumnKey {
        ColumnKey { desc }
    }

    /// The descriptor that precedes every alignment, all components are `-1`
    /// # Arguments
    /// * `num_sequences` - the number of rows in the alignments
    pub fn first(num_sequences: usize) -> ColumnKey {
        ColumnKey { desc: vec![-1; num_sequences] }
    }

    /// The descriptor that follows every alignment, each component is pushed one residue past the end of its sequence.
    /// # Arguments
    /// * `final_key` - the descriptor of the final column of any alignment of the ensemble
    pub fn last(final_key: &ColumnKey) -> ColumnKey {
        ColumnKey {
            desc: final_key.desc.iter()
                .map(|&d| d + (d & 1) + 1)
                .collect()
        }
    }

    /// Computes the descriptor for the next alignment column.
    /// Returns `None` if the column is all gaps, in which case the caller keeps the current descriptor.
    /// # Arguments
    /// * `rows` - the alignment rows
    /// * `column` - the column index into each row
    pub fn next<R: AsRef<[u8]>>(&self, rows: &[R], column: usize) -> Option<ColumnKey> {
        let mut all_gap = true;
        let desc: Vec<i32> = self.desc.iter().zip(rows.iter())
            .map(|(&d, row)| {
                // skip over a residue that was counted in the previous column
                let mut d = d + (d & 1);
                if row.as_ref()[column] != GAP {
                    d += 1;
                    all_gap = false;
                }
                d
            })
            .collect();

        if all_gap {
            None
        } else {
            Some(ColumnKey { desc })
        }
    }

    /// Key of the class this column leads into; `x` can directly precede `y` iff `x.succ_key() == y.pred_key()`
    pub fn succ_key(&self) -> ColumnKey {
        ColumnKey {
            desc: self.desc.iter().map(|&d| (d + 1) >> 1).collect()
        }
    }

    /// Key of the class this column belongs to
    pub fn pred_key(&self) -> ColumnKey {
        ColumnKey {
            desc: self.desc.iter().map(|&d| d >> 1).collect()
        }
    }

    /// Gap insensitive variant of the key: all gap components are zeroed.
    pub fn gi_key(&self) -> ColumnKey {
        ColumnKey {
            desc: self.desc.iter()
                .map(|&d| if d & 1 == 1 { d } else { 0 })
                .collect()
        }
    }

    /// Returns true if sequence `index` has a residue in this column
    pub fn has_residue(&self, index: usize) -> bool {
        self.desc[index] & 1 == 1
    }

    /// Returns the residue index into the ungapped sequence `index`, or None for a gap
    pub fn residue_index(&self, index: usize) -> Option<usize> {
        if self.has_residue(index) {
            Some((self.desc[index] >> 1) as usize)
        } else {
            None
        }
    }

    /// Renders the column as one character per sequence.
    /// # Arguments
    /// * `sequences` - the ungapped sequences the descriptor indexes into
    pub fn render(&self, sequences: &[Vec<u8>]) -> Vec<u8> {
        (0..self.desc.len())
            .map(|i| match self.residue_index(i) {
                Some(r) => sequences[i][r],
                None => GAP
            })
            .collect()
    }

    /// Sum of all components; strictly increases along every edge of the network
    pub fn level(&self) -> i64 {
        self.desc.iter().map(|&d| d as i64).sum()
    }

    // Getters
    pub fn desc(&self) -> &[i32] {
        &self.desc
    }

    pub fn len(&self) -> usize {
        self.desc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_empty()
    }
}
