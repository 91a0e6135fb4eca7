use crate::layout::{self, ensure_parent_dir, OutputLayout};
use crate::metadata::SamplePair;
use crate::methods::{self, Method, ParameterTable};
use crate::stages::Stage;
use log::debug;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// An edge shard at or below this size holds no usable contacts: a complete
/// empty gzip stream (header plus empty deflate block plus trailer) is 20
/// bytes. Per-chromosome comparisons are skipped rather than failed for such
/// chromosomes.
pub const MIN_SHARD_BYTES: u64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("layout error: {0:?}")]
    Layout(#[from] layout::Error),
    #[error("parameter error: {0:?}")]
    Parameter(#[from] methods::Error),
    #[error("bins file required to generate the genome-wide partition unit")]
    MissingBins,
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Io {
        source: e,
        path: path.to_owned(),
    }
}

/// Execution environment for the external comparison tools, computed once
/// per run from the requested method set. Generated scripts source
/// `env_file` (which defines `${mypython}`) and call programs under
/// `tools_dir`.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub env_file: PathBuf,
    pub tools_dir: PathBuf,
}

impl ToolConfig {
    pub fn for_methods(tools_dir: impl Into<PathBuf>, methods: &[Method]) -> Self {
        let tools_dir = tools_dir.into();
        // a GenomeDISCO-only run gets by with the lighter environment
        let env_name = if methods == [Method::GenomeDisco] {
            "bashrc.genomedisco"
        } else {
            "bashrc.all_methods"
        };
        Self {
            env_file: tools_dir.join(env_name),
            tools_dir,
        }
    }
}

/// The key identifying one unit of dispatch within a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKey {
    /// One comparison of a sample pair on one chromosome.
    PairChrom { pair: SamplePair, chrom: String },
    /// One genome-wide comparison of a sample pair.
    Pair { pair: SamplePair },
    /// One genome-wide unit for a single sample.
    Sample { name: String },
    /// The shared genome-wide node partition.
    Partition,
}

/// The unit of dispatch: generated fresh each stage, never persisted beyond
/// its script and expected output path.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub method: Method,
    pub stage: Stage,
    pub key: UnitKey,
}

impl WorkUnit {
    pub fn script_path(&self, layout: &OutputLayout) -> PathBuf {
        match (&self.key, self.stage) {
            (UnitKey::PairChrom { pair, chrom }, _) => {
                layout.pair_script(self.method, pair, Some(chrom))
            }
            (UnitKey::Pair { pair }, _) => layout.pair_script(self.method, pair, None),
            (UnitKey::Sample { name }, Stage::Split) => layout.quasar_dataset_script(name),
            (UnitKey::Sample { name }, _) => layout.qc_script(self.method, name),
            (UnitKey::Partition, _) => layout.quasar_partition_script(),
        }
    }

    /// The file whose existence marks this unit complete.
    pub fn output_path(&self, layout: &OutputLayout) -> PathBuf {
        match (&self.key, self.stage) {
            (UnitKey::PairChrom { pair, chrom }, _) => {
                layout.pair_score_file(self.method, pair, chrom)
            }
            (UnitKey::Pair { pair }, _) => {
                layout.pair_genomewide_score_file(self.method, pair)
            }
            (UnitKey::Sample { name }, Stage::Split) => layout.quasar_transform(name),
            (UnitKey::Sample { name }, _) => layout.qc_score_file(self.method, name),
            (UnitKey::Partition, _) => layout.quasar_partition_file(),
        }
    }

    pub fn describe(&self) -> String {
        match &self.key {
            UnitKey::PairChrom { pair, chrom } => {
                format!("{} {} {}", self.method, pair.key(), chrom)
            }
            UnitKey::Pair { pair } => format!("{} {}", self.method, pair.key()),
            UnitKey::Sample { name } => format!("{} {}", self.method, name),
            UnitKey::Partition => format!("{} partition", self.method),
        }
    }
}

/// True when a shard file exists and is large enough to hold data.
pub fn shard_usable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() > MIN_SHARD_BYTES,
        Err(_) => false,
    }
}

/// Renders one self-contained shell script per work unit. Script paths and
/// output paths are deterministic from the unit key, so re-generation is
/// idempotent.
pub struct ScriptGenerator<'a> {
    layout: &'a OutputLayout,
    params: &'a ParameterTable,
    tools: &'a ToolConfig,
    resolution: u64,
    concise: bool,
    bins: Option<&'a Path>,
    subset: Option<&'a str>,
    re_fragments: bool,
}

impl<'a> ScriptGenerator<'a> {
    pub fn new(
        layout: &'a OutputLayout,
        params: &'a ParameterTable,
        tools: &'a ToolConfig,
        resolution: u64,
        concise: bool,
    ) -> Self {
        Self {
            layout,
            params,
            tools,
            resolution,
            concise,
            bins: None,
            subset: None,
            re_fragments: false,
        }
    }

    /// Inputs only the split stage needs (for the genome-wide partition).
    pub fn with_split_inputs(
        mut self,
        bins: &'a Path,
        subset: Option<&'a str>,
        re_fragments: bool,
    ) -> Self {
        self.bins = Some(bins);
        self.subset = subset;
        self.re_fragments = re_fragments;
        self
    }

    /// Generate the script for a unit. `Ok(None)` means the unit was skipped
    /// under the empty-shard policy (or the method renders no script).
    pub fn generate(&self, unit: &WorkUnit) -> Result<Option<PathBuf>> {
        let lines = match (&unit.key, unit.method) {
            (UnitKey::PairChrom { pair, chrom }, Method::GenomeDisco) => {
                match self.genomedisco_lines(pair, chrom)? {
                    Some(lines) => lines,
                    None => return self.skip(unit),
                }
            }
            (UnitKey::PairChrom { pair, chrom }, Method::HicRep) => {
                match self.hicrep_lines(pair, chrom)? {
                    Some(lines) => lines,
                    None => return self.skip(unit),
                }
            }
            // no comparison implemented upstream yet
            (_, Method::HicSpector) => return Ok(None),
            (UnitKey::Pair { pair }, Method::QuasarRep) => self.quasar_rep_lines(pair),
            (UnitKey::Sample { name }, Method::QuasarQc) if unit.stage == Stage::Qc => {
                self.quasar_qc_lines(name)
            }
            (UnitKey::Sample { name }, _) => self.quasar_dataset_lines(name),
            (UnitKey::Partition, _) => self.quasar_partition_lines()?,
            (key, method) => {
                debug!("no script template for {} unit {:?}", method, key);
                return Ok(None);
            }
        };
        let script_path = unit.script_path(self.layout);
        ensure_parent_dir(&unit.output_path(self.layout))?;
        self.write_script(&script_path, &lines)?;
        Ok(Some(script_path))
    }

    fn skip(&self, unit: &WorkUnit) -> Result<Option<PathBuf>> {
        debug!("skipping {} (empty or missing shard)", unit.describe());
        Ok(None)
    }

    fn write_script(&self, path: &Path, lines: &[String]) -> Result<()> {
        let mut body = String::new();
        body.push_str("#!/bin/sh\n");
        body.push_str("set -e\n");
        body.push_str(&format!("source {}\n", self.tools.env_file.display()));
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        layout::atomic_write(path, body.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .map_err(io_err(path))?;
        }
        Ok(())
    }

    fn tool(&self, rel: &str) -> String {
        self.tools.tools_dir.join(rel).display().to_string()
    }

    /// Both edge shards must be present and non-trivial; otherwise the
    /// chromosome legitimately has no data and the unit is skipped.
    fn pair_shards(&self, pair: &SamplePair, chrom: &str) -> Option<(PathBuf, PathBuf)> {
        let f1 = self.layout.edge_file(&pair.name1, chrom);
        let f2 = self.layout.edge_file(&pair.name2, chrom);
        (shard_usable(&f1) && shard_usable(&f2)).then_some((f1, f2))
    }

    fn genomedisco_lines(&self, pair: &SamplePair, chrom: &str) -> Result<Option<Vec<String>>> {
        let (f1, f2) = match self.pair_shards(pair, chrom) {
            Some(x) => x,
            None => return Ok(None),
        };
        let nodefile = self.layout.node_file(chrom);
        let outdir = self.layout.pair_results_dir(Method::GenomeDisco, pair);
        // a sample name in the subsampling parameter points at that sample's
        // shard for this chromosome
        let subsampling = self.params.get(Method::GenomeDisco, "subsampling")?;
        let subsampling = match subsampling {
            "NA" | "lowest" => subsampling.to_owned(),
            sample => self.layout.edge_file(sample, chrom).display().to_string(),
        };
        let concise = if self.concise { " --concise_analysis" } else { "" };
        Ok(Some(vec![format!(
            "${{mypython}} -W ignore {} --m1 {} --m2 {} --m1name {} --m2name {} \
             --node_file {} --outdir {} --outpref {} --m_subsample {} \
             --approximation 10000000 --norm {} --method RandomWalks --tmin {} --tmax {}{}",
            self.tool("genomedisco/compute_reproducibility.py"),
            f1.display(),
            f2.display(),
            pair.name1,
            pair.name2,
            nodefile.display(),
            outdir.display(),
            chrom,
            subsampling,
            self.params.get(Method::GenomeDisco, "norm")?,
            self.params.get(Method::GenomeDisco, "tmin")?,
            self.params.get(Method::GenomeDisco, "tmax")?,
            concise,
        )]))
    }

    fn hicrep_lines(&self, pair: &SamplePair, chrom: &str) -> Result<Option<Vec<String>>> {
        let (f1, f2) = match self.pair_shards(pair, chrom) {
            Some(x) => x,
            None => return Ok(None),
        };
        let outpath = self.layout.pair_score_file(Method::HicRep, pair, chrom);
        Ok(Some(vec![format!(
            "Rscript {} {} {} {} {} {} {} {} {} {}",
            self.tool("HiCRep_wrapper.R"),
            f1.display(),
            f2.display(),
            outpath.display(),
            self.params.get(Method::HicRep, "maxdist")?,
            self.resolution,
            self.layout.node_file(chrom).display(),
            self.params.get(Method::HicRep, "h")?,
            pair.name1,
            pair.name2,
        )]))
    }

    fn quasar_rep_lines(&self, pair: &SamplePair) -> Vec<String> {
        let t1 = self.layout.quasar_transform(&pair.name1);
        let t2 = self.layout.quasar_transform(&pair.name2);
        let outpath = self
            .layout
            .pair_genomewide_score_file(Method::QuasarRep, pair);
        let mut lines = vec![format!(
            "${{mypython}} {} {} {} {}",
            self.tool("hifive/bin/find_quasar_replicate_score"),
            t1.display(),
            t2.display(),
            outpath.display(),
        )];
        if !self.concise {
            lines.push(format!(
                "${{mypython}} {} {} {} {}",
                self.tool("plot_quasar_scatter.py"),
                t1.display(),
                t2.display(),
                outpath.display(),
            ));
        }
        lines
    }

    fn quasar_qc_lines(&self, sample: &str) -> Vec<String> {
        let transform = self.layout.quasar_transform(sample);
        let outpath = self.layout.qc_score_file(Method::QuasarQc, sample);
        vec![format!(
            "${{mypython}} {} {} {}",
            self.tool("hifive/bin/find_quasar_quality_score"),
            transform.display(),
            outpath.display(),
        )]
    }

    /// Genome-wide node partition shared by all QuASAR units, keyed by the
    /// run's resolution.
    fn quasar_partition_lines(&self) -> Result<Vec<String>> {
        let bins = self.bins.ok_or(Error::MissingBins)?;
        let re = if self.re_fragments { " --re" } else { "" };
        Ok(vec![format!(
            "${{mypython}} {} --nodes {} --partition {} --subset_chromosomes {} --resolution {}{}",
            self.tool("make_partition_from_bedfile.py"),
            bins.display(),
            self.layout.quasar_partition_file().display(),
            self.subset.unwrap_or("NA"),
            self.resolution,
            re,
        )])
    }

    /// Build the QuASAR dataset/project/transform chain for one sample and
    /// clean up the intermediates it created.
    fn quasar_dataset_lines(&self, sample: &str) -> Vec<String> {
        let fulldata = self.layout.quasar_fulldata(sample);
        let partition = self.layout.quasar_partition_file();
        let dataset = self.layout.quasar_dataset(sample);
        let project = self.layout.quasar_project(sample);
        let transform = self.layout.quasar_transform(sample);
        let mut lines = vec![
            format!(
                "${{mypython}} {} {} {} {}",
                self.tool("encode_data_to_hifive.py"),
                fulldata.display(),
                partition.display(),
                dataset.display(),
            ),
            format!(
                "${{mypython}} -c \"import hifive; hic=hifive.HiC('{}','w'); \
                 hic.load_data('{}'); hic.filter_fends(mininteractions=1); hic.save()\"",
                project.display(),
                dataset.display(),
            ),
            format!(
                "${{mypython}} {} {} {} -r {}",
                self.tool("hifive/bin/find_quasar_transform"),
                project.display(),
                transform.display(),
                self.resolution,
            ),
        ];
        if !self.concise {
            lines.push(format!(
                "${{mypython}} {} --transform {} --out {}",
                self.tool("plot_quasar_transform.py"),
                transform.display(),
                transform.display(),
            ));
        }
        lines.push(format!(
            "rm -f {} {} {}",
            fulldata.display(),
            dataset.display(),
            project.display(),
        ));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::ParameterTable;

    fn pair() -> SamplePair {
        SamplePair {
            name1: "s1".into(),
            name2: "s2".into(),
        }
    }

    fn write_shard(path: &Path, len: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![b'x'; len]).unwrap();
    }

    #[test]
    fn env_file_depends_on_method_set() {
        let tc = ToolConfig::for_methods("software", &[Method::GenomeDisco]);
        assert!(tc.env_file.ends_with("bashrc.genomedisco"));
        let tc = ToolConfig::for_methods("software", &[Method::GenomeDisco, Method::HicRep]);
        assert!(tc.env_file.ends_with("bashrc.all_methods"));
    }

    #[test]
    fn small_or_missing_shard_skips_comparison_unit() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let params = ParameterTable::defaults();
        let tools = ToolConfig::for_methods("software", &[Method::GenomeDisco]);
        let generator = ScriptGenerator::new(&layout, &params, &tools, 10, false);

        let unit = WorkUnit {
            method: Method::GenomeDisco,
            stage: Stage::Reproducibility,
            key: UnitKey::PairChrom {
                pair: pair(),
                chrom: "chr1".into(),
            },
        };

        // both shards missing
        assert!(generator.generate(&unit).unwrap().is_none());

        // one shard at the threshold, one above
        write_shard(&layout.edge_file("s1", "chr1"), MIN_SHARD_BYTES as usize);
        write_shard(&layout.edge_file("s2", "chr1"), 100);
        assert!(generator.generate(&unit).unwrap().is_none());

        // both above the threshold
        write_shard(&layout.edge_file("s1", "chr1"), 100);
        let script = generator.generate(&unit).unwrap().expect("script generated");
        let body = std::fs::read_to_string(&script).unwrap();
        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.contains("compute_reproducibility.py"));
        assert!(body.contains("--outpref chr1"));
        assert!(body.contains("--m_subsample lowest"));
    }

    #[test]
    fn quasar_rep_unit_is_genome_wide() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let params = ParameterTable::defaults();
        let tools = ToolConfig::for_methods("software", &[Method::QuasarRep]);
        let generator = ScriptGenerator::new(&layout, &params, &tools, 40000, true);

        let unit = WorkUnit {
            method: Method::QuasarRep,
            stage: Stage::Reproducibility,
            key: UnitKey::Pair { pair: pair() },
        };
        let script = generator.generate(&unit).unwrap().expect("script generated");
        let body = std::fs::read_to_string(&script).unwrap();
        assert!(body.contains("find_quasar_replicate_score"));
        // concise analysis suppresses the scatter plot
        assert!(!body.contains("plot_quasar_scatter"));
        assert_eq!(
            unit.output_path(&layout),
            layout.pair_genomewide_score_file(Method::QuasarRep, &pair())
        );
    }

    #[test]
    fn dataset_script_cleans_up_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let params = ParameterTable::defaults();
        let tools = ToolConfig::for_methods("software", &[Method::QuasarQc]);
        let generator = ScriptGenerator::new(&layout, &params, &tools, 40000, false);

        let unit = WorkUnit {
            method: Method::QuasarQc,
            stage: Stage::Split,
            key: UnitKey::Sample { name: "s1".into() },
        };
        let script = generator.generate(&unit).unwrap().expect("script generated");
        let body = std::fs::read_to_string(&script).unwrap();
        assert!(body.contains("encode_data_to_hifive.py"));
        assert!(body.contains("find_quasar_transform"));
        assert!(body.contains("rm -f"));
    }
}
