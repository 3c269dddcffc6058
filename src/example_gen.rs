use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};

use crate::descriptor::GAP;

const RESIDUES: &[u8] = b"ACGT";

/// Creates an ensemble of alignments of the same sequences that we can verify is working.
/// A "true" alignment is generated first; each sample then randomly splits some of its columns in two, which is how alignment uncertainty typically shows up.
/// Returns the true alignment and the samples.
/// # Arguments
/// * `num_sequences` - the number of rows in each alignment
/// * `num_columns` - the number of columns in the true alignment
/// * `num_samples` - the number of alignments to generate
/// * `split_rate` - the chance that a column of the true alignment gets split in a sample
pub fn generate_ensemble(num_sequences: usize, num_columns: usize, num_samples: usize, split_rate: f64) -> (Vec<Vec<u8>>, Vec<Vec<Vec<u8>>>) {
    assert!(num_sequences > 0);
    assert!((0.0..=1.0).contains(&split_rate));

    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let residue_distribution = Uniform::new(0, RESIDUES.len());
    let row_distribution = Uniform::new(0, num_sequences);
    let unit_distribution = Uniform::new(0.0, 1.0);

    // each true column has at least one residue
    let truth_columns: Vec<Vec<u8>> = (0..num_columns)
        .map(|_j| {
            let forced = rng.sample(row_distribution);
            (0..num_sequences)
                .map(|i| {
                    if i == forced || rng.sample(unit_distribution) < 0.8 {
                        RESIDUES[rng.sample(residue_distribution)]
                    } else {
                        GAP
                    }
                })
                .collect()
        })
        .collect();

    let samples: Vec<Vec<Vec<u8>>> = (0..num_samples)
        .map(|_s| {
            let mut columns: Vec<Vec<u8>> = vec![];
            for column in truth_columns.iter() {
                let present = column.iter().filter(|&&c| c != GAP).count();
                if present < 2 || rng.sample(unit_distribution) >= split_rate {
                    columns.push(column.clone());
                    continue;
                }

                // move a random non-empty, proper subset of the residues into a leading column
                loop {
                    let keep_first: Vec<bool> = column.iter()
                        .map(|&c| c != GAP && rng.gen_bool(0.5))
                        .collect();
                    let moved = keep_first.iter().filter(|&&b| b).count();
                    if moved == 0 || moved == present {
                        continue;
                    }
                    let (lead, trail): (Vec<u8>, Vec<u8>) = column.iter().zip(keep_first.iter())
                        .map(|(&c, &first)| if first { (c, GAP) } else { (GAP, c) })
                        .unzip();
                    columns.push(lead);
                    columns.push(trail);
                    break;
                }
            }
            transpose(&columns, num_sequences)
        })
        .collect();

    (transpose(&truth_columns, num_sequences), samples)
}

/// Converts a list of columns into a list of rows
fn transpose(columns: &[Vec<u8>], num_sequences: usize) -> Vec<Vec<u8>> {
    (0..num_sequences)
        .map(|i| columns.iter().map(|c| c[i]).collect())
        .collect()
}
