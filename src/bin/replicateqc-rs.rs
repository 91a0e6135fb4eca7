use anyhow::Result;
use clap::Parser;
use replicateqc_rs::args::{AnalysisArgs, Cli, Commands, CommonArgs};
use replicateqc_rs::backend::Backend;
use replicateqc_rs::layout::OutputLayout;
use replicateqc_rs::metadata::{SamplePairs, Samples};
use replicateqc_rs::methods::{Method, ParameterTable};
use replicateqc_rs::scripts::ToolConfig;
use replicateqc_rs::stages::Pipeline;

fn build_pipeline(
    common: &CommonArgs,
    analysis: Option<&AnalysisArgs>,
    re_fragments: bool,
) -> Result<Pipeline> {
    let methods = Method::parse_list(&common.methods)?;
    let params =
        ParameterTable::from_file(analysis.and_then(|a| a.parameters_file.as_deref()))?;
    let tools = ToolConfig::for_methods(common.tools_dir.clone(), &methods);
    let backend = Backend::from_mode(common.running_mode, &common.slurm_partition);
    Ok(Pipeline {
        layout: OutputLayout::new(&common.outdir),
        methods,
        backend,
        params,
        tools,
        subset: common.subset_chromosomes.clone(),
        concise: analysis.map(|a| a.concise_analysis).unwrap_or(false),
        re_fragments,
        num_threads: common.num_threads,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::RunAll(args) => {
            let pipeline =
                build_pipeline(&args.common, Some(&args.analysis), args.bins.re_fragments)?;
            let samples = Samples::from_file(&args.samples.metadata_samples)?;
            let pairs = SamplePairs::from_file(&args.pairs.metadata_pairs, &samples)?;
            pipeline.run_all(&samples, &pairs, &args.bins.bins)?;
        }
        Commands::Split(args) => {
            let pipeline = build_pipeline(&args.common, None, args.bins.re_fragments)?;
            let samples = Samples::from_file(&args.samples.metadata_samples)?;
            pipeline.run_split(&samples, &args.bins.bins)?;
        }
        Commands::Qc(args) => {
            let pipeline = build_pipeline(&args.common, Some(&args.analysis), false)?;
            let samples = Samples::from_file(&args.samples.metadata_samples)?;
            pipeline.run_qc(&samples)?;
        }
        Commands::Reproducibility(args) => {
            let pipeline = build_pipeline(&args.common, Some(&args.analysis), false)?;
            let samples = Samples::from_file(&args.samples.metadata_samples)?;
            let pairs = SamplePairs::from_file(&args.pairs.metadata_pairs, &samples)?;
            pipeline.run_reproducibility(&pairs)?;
        }
        Commands::Summary(args) => {
            let pipeline = build_pipeline(&args.common, Some(&args.analysis), false)?;
            let samples = Samples::from_file(&args.samples.metadata_samples)?;
            let pairs = SamplePairs::from_file(&args.pairs.metadata_pairs, &samples)?;
            pipeline.run_summary(&pairs)?;
        }
    }
    Ok(())
}
