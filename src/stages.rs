use crate::backend::{self, wait_for_outputs, Backend};
use crate::layout::{self, OutputLayout};
use crate::metadata::{
    self, compute_resolution, discover_chromosomes, read_bins, read_chromosomes, read_resolution,
    working_chromosomes, write_chromosomes, write_resolution, SamplePairs, Samples,
};
use crate::methods::{Method, MethodShape, ParameterTable};
use crate::partition;
use crate::scripts::{self, ScriptGenerator, ToolConfig, UnitKey, WorkUnit};
use crate::summary;
use log::{error, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// How long `run_all` under a cluster backend waits for a stage's expected
/// outputs before giving up.
pub const STAGE_WAIT_TIMEOUT: Duration = Duration::from_secs(24 * 3600);
const STAGE_WAIT_POLL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Split,
    Qc,
    Reproducibility,
    Summary,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Split => "split",
            Stage::Qc => "qc",
            Stage::Reproducibility => "reproducibility",
            Stage::Summary => "summary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "stage {later} requires outputs of stage {earlier}, but {path:?} is absent; \
         run `{earlier}` first"
    )]
    StageOrder {
        earlier: Stage,
        later: Stage,
        path: PathBuf,
    },
    #[error("{failed} of {total} work unit(s) failed in stage {stage}")]
    UnitsFailed {
        stage: Stage,
        failed: usize,
        total: usize,
    },
    #[error("metadata error: {0:?}")]
    Metadata(#[from] metadata::Error),
    #[error("partition error: {0:?}")]
    Partition(#[from] partition::Error),
    #[error("script generation error: {0:?}")]
    Script(#[from] scripts::Error),
    #[error("layout error: {0:?}")]
    Layout(#[from] layout::Error),
    #[error("summary error: {0:?}")]
    Summary(#[from] summary::Error),
    #[error("backend error: {0:?}")]
    Backend(#[from] backend::Error),
    #[error("thread pool error: {0:?}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Orchestrates the four pipeline stages over one output tree. Holds only
/// run configuration; all inter-stage state lives on disk, so each stage can
/// also be invoked on its own against an existing tree.
pub struct Pipeline {
    pub layout: OutputLayout,
    pub methods: Vec<Method>,
    pub backend: Backend,
    pub params: ParameterTable,
    pub tools: ToolConfig,
    pub subset: Option<String>,
    pub concise: bool,
    pub re_fragments: bool,
    pub num_threads: usize,
}

impl Pipeline {
    fn pool(&self) -> Result<rayon::ThreadPool> {
        // local pool so this run's thread count does not leak into other
        // instances of the program
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()?)
    }

    fn per_chromosome_methods(&self) -> Vec<Method> {
        self.methods
            .iter()
            .copied()
            .filter(|m| m.shape() == MethodShape::PerChromosome)
            .collect()
    }

    fn quasar_requested(&self) -> bool {
        self.methods
            .iter()
            .any(|m| matches!(m, Method::QuasarRep | Method::QuasarQc))
    }

    /// Barrier check: a later stage reads only what split has written.
    fn require_split_outputs(&self, later: Stage) -> Result<(Vec<String>, u64)> {
        for path in [self.layout.chromosomes_file(), self.layout.resolution_file()] {
            if !path.exists() {
                return Err(Error::StageOrder {
                    earlier: Stage::Split,
                    later,
                    path,
                });
            }
        }
        let discovered = read_chromosomes(&self.layout.chromosomes_file())?;
        let working = working_chromosomes(discovered, self.subset.as_deref());
        let resolution = read_resolution(&self.layout.resolution_file())?;
        Ok((working, resolution))
    }

    /// Generate and dispatch a batch of work units. Skipped units generate
    /// no script. Per-unit failures are collected and reported after the
    /// whole batch so one bad unit cannot mask its siblings. Returns the
    /// expected output paths of every dispatched unit.
    fn dispatch(
        &self,
        stage: Stage,
        generator: &ScriptGenerator,
        units: Vec<WorkUnit>,
    ) -> Result<Vec<PathBuf>> {
        let mut ready = vec![];
        for unit in units {
            if let Some(script) = generator.generate(&unit)? {
                let output = unit.output_path(&self.layout);
                ready.push((unit, script, output));
            }
        }
        if ready.is_empty() {
            return Ok(vec![]);
        }
        info!("stage {}: dispatching {} work unit(s)", stage, ready.len());

        let submit = |(unit, script, _): &(WorkUnit, PathBuf, PathBuf)| {
            self.backend
                .submit(script)
                .err()
                .map(|e| (unit.describe(), e))
        };
        let failures: Vec<(String, backend::Error)> = if self.backend.is_blocking() {
            // independent units write disjoint paths, safe to run concurrently
            self.pool()?
                .install(|| ready.par_iter().filter_map(submit).collect())
        } else {
            // fire-and-forget submissions are cheap, submit in order
            ready.iter().filter_map(submit).collect()
        };
        if !failures.is_empty() {
            for (desc, e) in &failures {
                error!("work unit {} failed: {}", desc, e);
            }
            return Err(Error::UnitsFailed {
                stage,
                failed: failures.len(),
                total: ready.len(),
            });
        }
        Ok(ready.into_iter().map(|(_, _, output)| output).collect())
    }

    /// Stage 1: derive metadata, shard samples by chromosome, and build the
    /// genome-wide QuASAR inputs.
    pub fn run_split(&self, samples: &Samples, bins_path: &Path) -> Result<Vec<PathBuf>> {
        self.layout.ensure_dirs()?;
        let bins = read_bins(bins_path)?;
        let resolution = compute_resolution(&bins)?;
        let discovered = discover_chromosomes(&bins);
        write_chromosomes(&self.layout.chromosomes_file(), &discovered)?;
        write_resolution(&self.layout.resolution_file(), resolution)?;
        let working = working_chromosomes(discovered, self.subset.as_deref());
        info!(
            "stage split: resolution {} bp, {} working chromosome(s), {} sample(s)",
            resolution,
            working.len(),
            samples.len()
        );

        if !self.per_chromosome_methods().is_empty() {
            self.pool()?.install(|| -> Result<()> {
                partition::split_nodes(&bins, &working, &self.layout)?;
                partition::split_edges_all(samples.as_slice(), &working, &self.layout)?;
                Ok(())
            })?;
        }

        let mut expected = vec![];
        if self.quasar_requested() {
            let subset_chroms = self.subset.as_ref().map(|_| working.as_slice());
            self.pool()?.install(|| {
                partition::write_quasar_fulldata_all(samples.as_slice(), subset_chroms, &self.layout)
            })?;

            let generator = ScriptGenerator::new(
                &self.layout,
                &self.params,
                &self.tools,
                resolution,
                self.concise,
            )
            .with_split_inputs(bins_path, self.subset.as_deref(), self.re_fragments);

            // the shared node partition must exist before any dataset unit
            let quasar_method = if self.methods.contains(&Method::QuasarQc) {
                Method::QuasarQc
            } else {
                Method::QuasarRep
            };
            let partition_outputs = self.dispatch(
                Stage::Split,
                &generator,
                vec![WorkUnit {
                    method: quasar_method,
                    stage: Stage::Split,
                    key: UnitKey::Partition,
                }],
            )?;
            if !self.backend.is_blocking() {
                wait_for_outputs(&partition_outputs, STAGE_WAIT_TIMEOUT, STAGE_WAIT_POLL)?;
            }

            let units = samples
                .iter()
                .map(|s| WorkUnit {
                    method: quasar_method,
                    stage: Stage::Split,
                    key: UnitKey::Sample {
                        name: s.name.clone(),
                    },
                })
                .collect();
            expected.extend(self.dispatch(Stage::Split, &generator, units)?);
        }
        Ok(expected)
    }

    /// Stage 2a: per-sample quality scores (QuASAR-QC only).
    pub fn run_qc(&self, samples: &Samples) -> Result<Vec<PathBuf>> {
        let (_working, resolution) = self.require_split_outputs(Stage::Qc)?;
        if !self.methods.contains(&Method::QuasarQc) {
            info!("stage qc: no qc method requested, nothing to do");
            return Ok(vec![]);
        }
        let generator = ScriptGenerator::new(
            &self.layout,
            &self.params,
            &self.tools,
            resolution,
            self.concise,
        );
        let units = samples
            .iter()
            .map(|s| WorkUnit {
                method: Method::QuasarQc,
                stage: Stage::Qc,
                key: UnitKey::Sample {
                    name: s.name.clone(),
                },
            })
            .collect();
        self.dispatch(Stage::Qc, &generator, units)
    }

    /// Stage 2b: pairwise concordance, fanned out per (method, pair,
    /// chromosome) for per-chromosome methods and per (method, pair) for
    /// QuASAR-Rep.
    pub fn run_reproducibility(&self, pairs: &SamplePairs) -> Result<Vec<PathBuf>> {
        let (working, resolution) = self.require_split_outputs(Stage::Reproducibility)?;
        let generator = ScriptGenerator::new(
            &self.layout,
            &self.params,
            &self.tools,
            resolution,
            self.concise,
        );
        let mut units = vec![];
        for pair in pairs.iter() {
            for method in self.per_chromosome_methods() {
                for chrom in &working {
                    units.push(WorkUnit {
                        method,
                        stage: Stage::Reproducibility,
                        key: UnitKey::PairChrom {
                            pair: pair.clone(),
                            chrom: chrom.clone(),
                        },
                    });
                }
            }
            if self.methods.contains(&Method::QuasarRep) {
                units.push(WorkUnit {
                    method: Method::QuasarRep,
                    stage: Stage::Reproducibility,
                    key: UnitKey::Pair { pair: pair.clone() },
                });
            }
        }
        self.dispatch(Stage::Reproducibility, &generator, units)
    }

    /// Stage 3: purely local aggregation of score files into summary tables.
    pub fn run_summary(&self, pairs: &SamplePairs) -> Result<()> {
        let (working, _resolution) = self.require_split_outputs(Stage::Summary)?;
        summary::summarize(&self.methods, pairs.as_slice(), &working, &self.layout)?;
        Ok(())
    }

    /// All four stages in order. Each stage is a barrier: under the
    /// Immediate backend dispatch blocks per unit; under cluster backends we
    /// poll for the stage's expected outputs instead of trusting scheduler
    /// ordering.
    pub fn run_all(
        &self,
        samples: &Samples,
        pairs: &SamplePairs,
        bins_path: &Path,
    ) -> Result<()> {
        let outputs = self.run_split(samples, bins_path)?;
        self.wait_stage(outputs)?;
        let outputs = self.run_qc(samples)?;
        self.wait_stage(outputs)?;
        let outputs = self.run_reproducibility(pairs)?;
        self.wait_stage(outputs)?;
        self.run_summary(pairs)
    }

    fn wait_stage(&self, expected: Vec<PathBuf>) -> Result<()> {
        if !self.backend.is_blocking() && !expected.is_empty() {
            info!("waiting for {} expected stage output(s)", expected.len());
            wait_for_outputs(&expected, STAGE_WAIT_TIMEOUT, STAGE_WAIT_POLL)?;
        }
        Ok(())
    }
}
