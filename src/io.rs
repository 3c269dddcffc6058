/*!
Readers for alignment ensembles and writers for the decoded results.
Ensembles arrive either as FASTA files, one alignment each, or as a sampler log where every alignment line is tagged with `Sample <n>\tAlignment:\t`.
*/

use itertools::Itertools;
use log::trace;
use simple_error::bail;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::column_network::SummaryAlignment;

/// Tag separating the sample prefix from the alignment content in a log line
const SAMPLE_TAG: &str = "\tAlignment:\t";

/// A named multiple sequence alignment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Alignment {
    /// Sequence names, one per row
    names: Vec<String>,
    /// Aligned rows
    rows: Vec<Vec<u8>>
}

impl Alignment {
    /// Creates an alignment, the number of names must match the number of rows
    pub fn new(names: Vec<String>, rows: Vec<Vec<u8>>) -> Result<Alignment, Box<dyn std::error::Error>> {
        if names.len() != rows.len() {
            bail!("Alignment has {} names and {} rows", names.len(), rows.len());
        }
        Ok(Alignment { names, rows })
    }

    /// Sorts the rows by sequence name so every sample lists the sequences in the same order
    pub fn sort_by_name(&mut self) {
        let (names, rows): (Vec<String>, Vec<Vec<u8>>) = self.names.drain(..)
            .zip(self.rows.drain(..))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .unzip();
        self.names = names;
        self.rows = rows;
    }

    // Getters
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses FASTA content; sequence lines are concatenated and the name is the whole trimmed header line.
/// # Errors
/// * if there is content before the first header
pub fn parse_fasta(contents: &[u8]) -> Result<Alignment, Box<dyn std::error::Error>> {
    let mut names = vec![];
    let mut rows: Vec<Vec<u8>> = vec![];
    for line in contents.split(|&c| c == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if let Some(header) = line.strip_prefix(b">") {
            // names may contain spaces, only the surrounding whitespace is dropped
            names.push(String::from_utf8_lossy(header).trim().to_string());
            rows.push(vec![]);
        } else if !line.is_empty() {
            match rows.last_mut() {
                Some(row) => row.extend(line.iter().filter(|c| !c.is_ascii_whitespace())),
                None => bail!("FASTA content must start with a '>' header")
            };
        }
    }
    Alignment::new(names, rows)
}

/// Reads one alignment from a FASTA file
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Alignment, Box<dyn std::error::Error>> {
    let contents = std::fs::read(path.as_ref())?;
    trace!("Read {} bytes from {:?}", contents.len(), path.as_ref());
    parse_fasta(&contents)
}

/// Streams the alignments of a sampler log, one item per sample.
/// Untagged lines are ignored. The tagged content may be `name\tsequence` or FASTA lines.
pub struct SampleReader<R: BufRead> {
    /// Remaining lines of the log
    lines: std::io::Lines<R>,
    /// The first line of the next sample, read while finishing the previous one
    pending: Option<(usize, String)>,
    /// Set once the input is exhausted or failed
    done: bool
}

impl<R: BufRead> SampleReader<R> {
    pub fn new(reader: R) -> SampleReader<R> {
        SampleReader {
            lines: reader.lines(),
            pending: None,
            done: false
        }
    }

    /// Returns the next tagged line, split into sample index and content
    fn next_tagged(&mut self) -> Result<Option<(usize, String)>, Box<dyn std::error::Error>> {
        for line in self.lines.by_ref() {
            let line = line?;
            if let Some(tagged) = parse_sample_line(&line)? {
                return Ok(Some(tagged));
            }
        }
        Ok(None)
    }
}

impl<R: BufRead> Iterator for SampleReader<R> {
    type Item = Result<(usize, Alignment), Box<dyn std::error::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let (index, first) = match self.pending.take() {
            Some(p) => p,
            None => match self.next_tagged() {
                Ok(Some(p)) => p,
                Ok(None) => {
                    self.done = true;
                    return None;
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        };

        // gather everything tagged with the same sample index as FASTA text
        let mut buffer = String::new();
        push_record(&mut buffer, &first);
        loop {
            match self.next_tagged() {
                Ok(Some((i, content))) if i == index => push_record(&mut buffer, &content),
                Ok(Some(other)) => {
                    self.pending = Some(other);
                    break;
                },
                Ok(None) => {
                    self.done = true;
                    break;
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
        }

        Some(parse_fasta(buffer.as_bytes()).map(|alignment| (index, alignment)))
    }
}

/// Splits `Sample <n>\tAlignment:\t<content>`, None if the line is not tagged
fn parse_sample_line(line: &str) -> Result<Option<(usize, String)>, Box<dyn std::error::Error>> {
    let (prefix, content) = match line.split_once(SAMPLE_TAG) {
        Some(split) => split,
        None => return Ok(None)
    };
    let index = match prefix.trim().strip_prefix("Sample ").and_then(|n| n.trim().parse::<usize>().ok()) {
        Some(i) => i,
        None => bail!("Malformed sample prefix: {:?}", prefix)
    };
    Ok(Some((index, content.to_string())))
}

/// Appends tagged content to a FASTA buffer
fn push_record(buffer: &mut String, content: &str) {
    match content.split_once('\t') {
        Some((name, sequence)) => {
            buffer.push('>');
            buffer.push_str(name.trim());
            buffer.push('\n');
            buffer.push_str(sequence.trim());
        },
        None => buffer.push_str(content.trim())
    };
    buffer.push('\n');
}

/// Writes rows as FASTA, one line per sequence
pub fn write_fasta<W: Write>(writer: &mut W, names: &[String], rows: &[Vec<u8>]) -> std::io::Result<()> {
    for (name, row) in names.iter().zip(rows.iter()) {
        writeln!(writer, ">{}\n{}", name, String::from_utf8_lossy(row))?;
    }
    Ok(())
}

/// Writes rows as `name\tsequence` lines
pub fn write_tabular<W: Write>(writer: &mut W, names: &[String], rows: &[Vec<u8>]) -> std::io::Result<()> {
    for (name, row) in names.iter().zip(rows.iter()) {
        writeln!(writer, "{}\t{}", name, String::from_utf8_lossy(row))?;
    }
    Ok(())
}

/// Writes one line per consensus column: the marginal, then the gap insensitive marginal if present
pub fn write_column_scores<W: Write>(writer: &mut W, summary: &SummaryAlignment) -> std::io::Result<()> {
    for (i, score) in summary.scores().iter().enumerate() {
        match summary.gi_scores() {
            Some(gi) => writeln!(writer, "{}\t{}", score, gi[i])?,
            None => writeln!(writer, "{}", score)?
        };
    }
    Ok(())
}

/// Writes the consensus followed by a `#scores` section
/// # Arguments
/// * `writer` - the output
/// * `names` - sequence names in network order
/// * `summary` - the decoded consensus
/// * `tabular` - if true, rows are written as `name\tsequence` instead of FASTA
pub fn write_mpd<W: Write>(writer: &mut W, names: &[String], summary: &SummaryAlignment, tabular: bool) -> std::io::Result<()> {
    if tabular {
        write_tabular(writer, names, summary.rows())?;
    } else {
        write_fasta(writer, names, summary.rows())?;
    }
    writeln!(writer, "\n#scores\n")?;
    write_column_scores(writer, summary)
}

/// Writes a `sampleIndex\tscore\trealColumnCount` line
pub fn write_sample_score<W: Write>(writer: &mut W, index: usize, score: f64, real_columns: usize) -> std::io::Result<()> {
    writeln!(writer, "{}\t{:.6}\t{}", index, score, real_columns)
}

/// Writes one line of tab separated state posteriors per column
pub fn write_posteriors<W: Write>(writer: &mut W, posteriors: &[Vec<f64>]) -> std::io::Result<()> {
    for posterior in posteriors.iter() {
        writeln!(writer, "{}", posterior.iter().map(|p| format!("{:.6}", p)).join("\t"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::column_network::ColumnNetwork;

    #[test]
    fn test_parse_fasta() {
        let contents = b">seq2 some description \nAC-\nGT\n\n>seq1\r\nA--\r\nGT\r\n";
        let alignment = parse_fasta(contents).unwrap();
        assert_eq!(alignment.names(), &["seq2 some description".to_string(), "seq1".to_string()]);
        assert_eq!(alignment.rows(), &[b"AC-GT".to_vec(), b"A--GT".to_vec()]);

        assert!(parse_fasta(b"").unwrap().is_empty());
        let error = parse_fasta(b"ACGT\n>seq1\nA\n").err().unwrap();
        assert_eq!(error.to_string(), "FASTA content must start with a '>' header");
    }

    #[test]
    fn test_sort_by_name() {
        let mut alignment = Alignment::new(
            vec!["b".to_string(), "c".to_string(), "a".to_string()],
            vec![b"B".to_vec(), b"C".to_vec(), b"A".to_vec()]
        ).unwrap();
        alignment.sort_by_name();
        assert_eq!(alignment.names(), &["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(alignment.rows(), &[b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);

        assert!(Alignment::new(vec!["a".to_string()], vec![]).is_err());
    }

    #[test]
    fn test_sample_reader() {
        let log = "\
Header line that is ignored
Sample 0\tAlignment:\tseq1\tA-C
Sample 0\tAlignment:\tseq2\tAGC
Sample 0\tTree:\t(seq1,seq2);
Sample 1\tAlignment:\t>seq1
Sample 1\tAlignment:\tAC-
Sample 1\tAlignment:\t>seq2
Sample 1\tAlignment:\tAGC
";
        let samples: Vec<(usize, Alignment)> = SampleReader::new(log.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].0, 0);
        assert_eq!(samples[0].1.names(), &["seq1".to_string(), "seq2".to_string()]);
        assert_eq!(samples[0].1.rows(), &[b"A-C".to_vec(), b"AGC".to_vec()]);
        assert_eq!(samples[1].0, 1);
        assert_eq!(samples[1].1.rows(), &[b"AC-".to_vec(), b"AGC".to_vec()]);
    }

    #[test]
    fn test_sample_reader_errors() {
        let log = "Sample x\tAlignment:\tseq1\tA-C\n";
        let mut reader = SampleReader::new(log.as_bytes());
        let error = reader.next().unwrap().err().unwrap();
        assert_eq!(error.to_string(), "Malformed sample prefix: \"Sample x\"");
        assert!(reader.next().is_none());

        assert!(SampleReader::new("nothing tagged\n".as_bytes()).next().is_none());
    }

    #[test]
    fn test_writers() {
        let names = vec!["s1".to_string(), "s2".to_string()];
        let mut network = ColumnNetwork::default();
        network.add_alignment(&[b"AC".to_vec(), b"A-".to_vec()]).unwrap();
        network.compute_equivalence_class_freqs().unwrap();
        network.update_viterbi().unwrap();
        let summary = network.consensus().unwrap();

        let mut buffer: Vec<u8> = vec![];
        write_mpd(&mut buffer, &names, &summary, false).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), ">s1\nAC\n>s2\nA-\n\n#scores\n\n1\n1\n");

        let mut buffer: Vec<u8> = vec![];
        write_tabular(&mut buffer, &names, summary.rows()).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "s1\tAC\ns2\tA-\n");

        let mut buffer: Vec<u8> = vec![];
        write_sample_score(&mut buffer, 3, -0.5, 7).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "3\t-0.500000\t7\n");

        let mut buffer: Vec<u8> = vec![];
        write_posteriors(&mut buffer, &[vec![0.25, 0.75], vec![1.0, 0.0]]).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "0.250000\t0.750000\n1.000000\t0.000000\n");
    }
}
