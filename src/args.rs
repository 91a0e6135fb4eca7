use crate::backend::RunningMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reproducibility and quality control for 3D genome contact maps", long_about, name = "replicateqc-rs", color=clap::ColorChoice::Always, styles=get_styles())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run all steps in the reproducibility/QC analysis with this single
    /// command
    #[command(name = "run_all", visible_alias = "run-all")]
    RunAll(RunAllArgs),

    /// (step 1) split files by chromosome
    Split(SplitArgs),

    /// (step 2.a) compute QC per sample
    Qc(QcArgs),

    /// (step 2.b) compute reproducibility of replicate pairs
    Reproducibility(ReproducibilityArgs),

    /// (step 3) summarize scores across chromosomes and genome-wide
    Summary(SummaryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Name of output directory
    #[arg(long, default_value = "replicateQC", help_heading = "output")]
    pub outdir: PathBuf,

    /// Which methods to use for measuring concordance or QC, as a
    /// comma-delimited list. Possible methods: "GenomeDISCO", "HiCRep",
    /// "HiC-Spector", "QuASAR-Rep", "QuASAR-QC". "all" runs every method.
    #[arg(long, default_value = "all", help_heading = "analysis")]
    pub methods: String,

    /// The mode in which to run the analysis: run each generated script as
    /// is ("NA") or submit it as a job through sge or slurm
    #[arg(long, value_enum, default_value = "NA", help_heading = "execution")]
    pub running_mode: RunningMode,

    /// Comma-delimited list of chromosomes to restrict the analysis to. By
    /// default the analysis runs on all chromosomes for which there are
    /// data. Useful for quick testing.
    #[arg(long, help_heading = "analysis")]
    pub subset_chromosomes: Option<String>,

    /// Directory holding the external comparison tools and the environment
    /// files the generated scripts source
    #[arg(long, default_value = "software", help_heading = "execution")]
    pub tools_dir: PathBuf,

    /// Partition to submit to when --running-mode slurm is used
    #[arg(long, default_value = "akundaje", help_heading = "execution")]
    pub slurm_partition: String,

    /// Number of worker threads for running scripts in-process. 0: use all
    /// cpus; non-zero: use the given number of threads
    #[arg(long, default_value_t = 0, help_heading = "execution")]
    pub num_threads: usize,
}

#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// File with parameters for the reproducibility and QC analysis, one
    /// `method<TAB>param<TAB>value` per line; overrides built-in defaults
    #[arg(long, help_heading = "analysis")]
    pub parameters_file: Option<PathBuf>,

    /// Obtain a concise analysis: scores are measured but plots that might
    /// be more time/memory consuming are not created
    #[arg(long, default_value_t = false, help_heading = "analysis")]
    pub concise_analysis: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BinsArgs {
    /// A (gzipped) bed file of all bins used in the analysis, with 4
    /// columns "chr start end name", where the name of the bin corresponds
    /// to the bins used in the contact maps. For each chromosome the bins
    /// must be ordered by genomic position.
    #[arg(long, required = true, help_heading = "input data")]
    pub bins: PathBuf,

    /// Set if the bins are not uniform bins in the genome (e.g.
    /// restriction-fragment-based). By default bins are assumed to be of
    /// uniform length.
    #[arg(long, default_value_t = false, help_heading = "input data")]
    pub re_fragments: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SamplesArg {
    /// A file where each row is "samplename<TAB>samplefile". Sample names
    /// must be unique. Each sample file follows the format
    /// "chr1 bin1 chr2 bin2 value".
    #[arg(long, required = true, help_heading = "input data")]
    pub metadata_samples: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PairsArg {
    /// A file where each row is a pair of sample names to be compared, in
    /// the format "samplename1<TAB>samplename2". Sample names must
    /// correspond to the first column of the --metadata-samples file.
    #[arg(long, required = true, help_heading = "input data")]
    pub metadata_pairs: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunAllArgs {
    #[command(flatten)]
    pub samples: SamplesArg,
    #[command(flatten)]
    pub pairs: PairsArg,
    #[command(flatten)]
    pub bins: BinsArgs,
    #[command(flatten)]
    pub analysis: AnalysisArgs,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    #[command(flatten)]
    pub samples: SamplesArg,
    #[command(flatten)]
    pub bins: BinsArgs,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct QcArgs {
    #[command(flatten)]
    pub samples: SamplesArg,
    #[command(flatten)]
    pub analysis: AnalysisArgs,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct ReproducibilityArgs {
    #[command(flatten)]
    pub samples: SamplesArg,
    #[command(flatten)]
    pub pairs: PairsArg,
    #[command(flatten)]
    pub analysis: AnalysisArgs,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub samples: SamplesArg,
    #[command(flatten)]
    pub pairs: PairsArg,
    #[command(flatten)]
    pub analysis: AnalysisArgs,
    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_all_command_line() {
        let cli = Cli::try_parse_from([
            "replicateqc-rs",
            "run_all",
            "--metadata-samples",
            "samples.txt",
            "--metadata-pairs",
            "pairs.txt",
            "--bins",
            "bins.bed.gz",
            "--outdir",
            "out",
            "--methods",
            "GenomeDISCO,HiCRep",
            "--running-mode",
            "slurm",
            "--subset-chromosomes",
            "chr21,chr22",
        ])
        .unwrap();
        match cli.command {
            Commands::RunAll(args) => {
                assert_eq!(args.common.running_mode, RunningMode::Slurm);
                assert_eq!(args.common.methods, "GenomeDISCO,HiCRep");
                assert_eq!(args.bins.bins, PathBuf::from("bins.bed.gz"));
            }
            _ => panic!("expected run_all"),
        }
    }

    #[test]
    fn running_mode_defaults_to_in_process() {
        let cli = Cli::try_parse_from([
            "replicateqc-rs",
            "split",
            "--metadata-samples",
            "samples.txt",
            "--bins",
            "bins.bed.gz",
        ])
        .unwrap();
        match cli.command {
            Commands::Split(args) => {
                assert_eq!(args.common.running_mode, RunningMode::Na);
                assert!(!args.bins.re_fragments);
            }
            _ => panic!("expected split"),
        }
    }
}
