use clap::Parser;
use log::{error, info, LevelFilter};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use mpd_con::annotator::Annotator;
use mpd_con::emission::StarTreeModel;
use mpd_con::io::{read_fasta, write_column_scores, write_fasta, write_mpd, write_posteriors, write_tabular, Alignment, SampleReader};
use mpd_con::mpd_config::{AnnotationMode, MpdConfig, MpdConfigBuilder};
use mpd_con::mpd_driver::MpdDriver;

type SampleStream = Box<dyn Iterator<Item = Result<Alignment, Box<dyn std::error::Error>>>>;

/// Summary alignment from an ensemble of alignments, given as a sampler log or as FASTA files.
/// Every column of the result gets a reliability score.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// A sampler log file, or one FASTA file per alignment with --fasta
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Inputs are FASTA files, one alignment each
    #[clap(long)]
    fasta: bool,

    /// Output file, defaults to the first input with an .mpd extension
    #[clap(long, short = 'o')]
    output: Option<PathBuf>,

    /// Write the column scores to this file instead of appending a #scores section to the output
    #[clap(long)]
    score_file: Option<PathBuf>,

    /// Write the alignment as name-tab-sequence lines instead of FASTA
    #[clap(long)]
    tabular: bool,

    /// Per column penalty, larger values favor shorter summaries
    #[clap(long, short = 'g', default_value = "0")]
    g_value: f64,

    /// Optimize gap insensitive column scores
    #[clap(long)]
    gap_insensitive: bool,

    /// Also output gap insensitive column scores
    #[clap(long)]
    output_gap_insensitive: bool,

    /// Use pairwise transition statistics for posteriors and path counts
    #[clap(long)]
    two_state: bool,

    /// Maximum number of samples to use, 0 for all
    #[clap(long, default_value = "0")]
    max_samples: usize,

    /// Use every n-th sample
    #[clap(long, default_value = "1")]
    sample_rate: usize,

    /// Number of leading samples to discard
    #[clap(long, default_value = "0")]
    first_sample: usize,

    /// Score every sample against the network and write one line per sample to this file
    #[clap(long)]
    score_samples: Option<PathBuf>,

    /// Sample scores are empirical log posteriors instead of column score sums
    #[clap(long)]
    log_posterior: bool,

    /// Report the log of the number of paths through the network
    #[clap(long)]
    log_n_paths: bool,

    /// Rate multiplier of each annotation state; enables annotation
    #[clap(long, num_args = 1..)]
    rho: Vec<f64>,

    /// Root to leaf branch length of the annotation model
    #[clap(long, default_value = "0.1")]
    branch_length: f64,

    /// Probability of switching to another annotation state between columns
    #[clap(long, default_value = "0.05")]
    switch_rate: f64,

    /// Decode the annotated network by column probability only
    #[clap(long)]
    column_probability: bool,

    /// Also write the posteriors restricted to the columns of this sequence
    #[clap(long)]
    project: Option<String>,

    /// Enable verbose output, repeat for more
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8
}

impl Cli {
    fn config(&self) -> Result<MpdConfig, Box<dyn std::error::Error>> {
        let annotation_mode = if self.column_probability {
            AnnotationMode::ColumnProbability
        } else {
            AnnotationMode::ColumnStateJoint
        };
        Ok(MpdConfigBuilder::default()
            .g_value(self.g_value)
            .optimize_gap_insensitive(self.gap_insensitive)
            .output_gap_insensitive(self.output_gap_insensitive)
            .two_state(self.two_state)
            .annotation_mode(annotation_mode)
            .max_samples(self.max_samples)
            .sample_rate(self.sample_rate)
            .first_sample(self.first_sample)
            .build()?)
    }

    /// Opens the inputs as a stream of samples; may be called more than once
    fn samples(&self) -> Result<SampleStream, Box<dyn std::error::Error>> {
        if self.fasta {
            let files = self.inputs.clone();
            Ok(Box::new(files.into_iter().map(read_fasta)))
        } else {
            if self.inputs.len() > 1 {
                simple_error::bail!("Multiple inputs require --fasta");
            }
            let reader = BufReader::new(File::open(&self.inputs[0])?);
            Ok(Box::new(SampleReader::new(reader).map(|sample| sample.map(|(_index, alignment)| alignment))))
        }
    }

    fn output(&self) -> PathBuf {
        match self.output.as_ref() {
            Some(o) => o.clone(),
            None => {
                let mut name = self.inputs[0].as_os_str().to_owned();
                name.push(".mpd");
                PathBuf::from(name)
            }
        }
    }

    fn annotator(&self) -> Result<Annotator, Box<dyn std::error::Error>> {
        let model = StarTreeModel::jukes_cantor(b"ACGT", self.branch_length, self.rho.clone())?;
        let num_states = self.rho.len();
        let stay = if num_states > 1 { 1.0 - self.switch_rate } else { 1.0 };
        let switch = if num_states > 1 { self.switch_rate / (num_states - 1) as f64 } else { 0.0 };
        let transitions = (0..num_states)
            .map(|s| (0..num_states).map(|t| if s == t { stay } else { switch }).collect())
            .collect();
        let initial = vec![1.0 / num_states as f64; num_states];
        Annotator::new(Box::new(model), transitions, initial)
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, Box<dyn std::error::Error>> {
    info!("Writing {:?}", path);
    Ok(BufWriter::new(File::create(path)?))
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut driver = MpdDriver::with_config(cli.config()?)?;
    let accepted = driver.add_samples(cli.samples()?)?;
    info!("Using {} samples", accepted);

    if cli.log_n_paths {
        let log_n_paths = driver.log_n_paths()?;
        println!("log(number of paths) = {:.6}", log_n_paths);
    }

    if let Some(path) = cli.score_samples.as_ref() {
        let mut writer = create(path)?;
        driver.score_samples(cli.samples()?, cli.log_posterior, &mut writer)?;
        writer.flush()?;
        return Ok(());
    }

    let output = cli.output();
    let (summary, annotation) = if cli.rho.is_empty() {
        (driver.decode()?, None)
    } else {
        let annotation = driver.annotate(&cli.annotator()?)?;
        (annotation.summary().clone(), Some(annotation))
    };

    let mut writer = create(&output)?;
    match cli.score_file.as_ref() {
        Some(score_file) => {
            if cli.tabular {
                write_tabular(&mut writer, driver.names(), summary.rows())?;
            } else {
                write_fasta(&mut writer, driver.names(), summary.rows())?;
            }
            let mut score_writer = create(score_file)?;
            write_column_scores(&mut score_writer, &summary)?;
            score_writer.flush()?;
        },
        None => write_mpd(&mut writer, driver.names(), &summary, cli.tabular)?
    };
    writer.flush()?;

    if let Some(annotation) = annotation {
        let mut name = output.as_os_str().to_owned();
        name.push(".annot");
        let mut annot_writer = create(Path::new(&name))?;
        write_posteriors(&mut annot_writer, annotation.posteriors())?;
        annot_writer.flush()?;

        if let Some(project) = cli.project.as_ref() {
            let seq_index = match driver.names().iter().position(|n| n == project) {
                Some(i) => i,
                None => simple_error::bail!("Sequence {:?} is not in the alignments", project)
            };
            name.push(".");
            name.push(project);
            let mut project_writer = create(Path::new(&name))?;
            write_posteriors(&mut project_writer, &annotation.project(seq_index)?)?;
            project_writer.flush()?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let filter_level = match cli.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    if let Err(e) = run(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
