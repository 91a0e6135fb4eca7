use crate::metadata::SamplePair;
use crate::methods::Method;
use std::io::Write;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("cannot persist temp file to {path:?}: {source:?}")]
    Persist {
        source: tempfile::PersistError,
        path: std::path::PathBuf,
    },
    #[error("path has no parent directory: {0:?}")]
    NoParent(std::path::PathBuf),
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Io {
        source: e,
        path: path.to_owned(),
    }
}

/// The on-disk output tree of one analysis run. The tree is the sole state
/// shared between stages, so every path used anywhere in the pipeline is
/// derived here.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ---- metadata
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("data/metadata")
    }
    pub fn chromosomes_file(&self) -> PathBuf {
        self.metadata_dir().join("chromosomes.gz")
    }
    pub fn resolution_file(&self) -> PathBuf {
        self.metadata_dir().join("resolution.txt")
    }

    // ---- per-chromosome shards
    pub fn nodes_dir(&self) -> PathBuf {
        self.root.join("data/nodes")
    }
    pub fn node_file(&self, chrom: &str) -> PathBuf {
        self.nodes_dir().join(format!("nodes.{}.gz", chrom))
    }
    pub fn edges_dir(&self, sample: &str) -> PathBuf {
        self.root.join("data/edges").join(sample)
    }
    pub fn edge_file(&self, sample: &str, chrom: &str) -> PathBuf {
        self.edges_dir(sample).join(format!("{}.{}.gz", sample, chrom))
    }

    // ---- genome-wide QuASAR inputs
    pub fn quasar_dir(&self) -> PathBuf {
        self.root.join("data/forQuASAR")
    }
    pub fn quasar_partition_file(&self) -> PathBuf {
        self.quasar_dir().join("nodes.partition")
    }
    pub fn quasar_fulldata(&self, sample: &str) -> PathBuf {
        self.quasar_dir().join(format!("{}.fulldata.gz", sample))
    }
    pub fn quasar_dataset(&self, sample: &str) -> PathBuf {
        self.quasar_dir().join(format!("{}.quasar_data", sample))
    }
    pub fn quasar_project(&self, sample: &str) -> PathBuf {
        self.quasar_dir().join(format!("{}.quasar_project", sample))
    }
    pub fn quasar_transform(&self, sample: &str) -> PathBuf {
        self.quasar_dir().join(format!("{}.quasar_transform", sample))
    }

    // ---- generated scripts
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }
    pub fn quasar_partition_script(&self) -> PathBuf {
        self.scripts_dir().join("forQuASAR/QuASARpartition.sh")
    }
    pub fn quasar_dataset_script(&self, sample: &str) -> PathBuf {
        self.scripts_dir()
            .join("forQuASAR")
            .join(format!("{}.QuASARmakeData.sh", sample))
    }
    pub fn qc_script(&self, method: Method, sample: &str) -> PathBuf {
        self.scripts_dir()
            .join(method.name())
            .join(sample)
            .join(format!("{}.{}.sh", sample, method.name()))
    }
    pub fn pair_script(&self, method: Method, pair: &SamplePair, chrom: Option<&str>) -> PathBuf {
        let dir = self.scripts_dir().join(method.name()).join(pair.key());
        match chrom {
            Some(chrom) => dir.join(format!("{}.{}.sh", chrom, pair.key())),
            None => dir.join(format!("{}.{}.sh", pair.key(), method.name())),
        }
    }

    // ---- results
    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }
    pub fn pair_results_dir(&self, method: Method, pair: &SamplePair) -> PathBuf {
        self.results_dir().join(method.name()).join(pair.key())
    }
    /// Per-chromosome score file, score in the third tab-separated column.
    pub fn pair_score_file(&self, method: Method, pair: &SamplePair, chrom: &str) -> PathBuf {
        self.pair_results_dir(method, pair)
            .join(format!("{}.{}.scores.txt", chrom, pair.key()))
    }
    /// Genome-wide score file for methods that compare whole samples.
    pub fn pair_genomewide_score_file(&self, method: Method, pair: &SamplePair) -> PathBuf {
        self.pair_results_dir(method, pair)
            .join(format!("{}.{}.scores.txt", pair.key(), method.name()))
    }
    pub fn qc_score_file(&self, method: Method, sample: &str) -> PathBuf {
        self.results_dir()
            .join(method.name())
            .join(sample)
            .join(format!("{}.{}.scores.txt", sample, method.name()))
    }
    pub fn summary_dir(&self, method: Method) -> PathBuf {
        self.results_dir().join("summary").join(method.name())
    }
    pub fn summary_chrom_file(&self, method: Method, chrom: &str) -> PathBuf {
        self.summary_dir(method)
            .join(format!("{}.{}.txt", method.name(), chrom))
    }
    pub fn summary_genomewide_file(&self, method: Method) -> PathBuf {
        self.summary_dir(method)
            .join(format!("{}.genomewide.txt", method.name()))
    }

    /// Bootstrap the directory skeleton. Idempotent.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.scripts_dir(),
            self.metadata_dir(),
            self.nodes_dir(),
            self.root.join("data/edges"),
            self.results_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        Ok(())
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<&Path> {
    let parent = path.parent().ok_or_else(|| Error::NoParent(path.to_owned()))?;
    std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    Ok(parent)
}

/// Write `bytes` to `path` atomically: temp file in the destination
/// directory, then rename into place. A partial file is never visible under
/// the final name, so a file that exists is a finished file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = ensure_parent_dir(path)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err(parent))?;
    tmp.write_all(bytes).map_err(io_err(path))?;
    tmp.flush().map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| Error::Persist {
        source: e,
        path: path.to_owned(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SamplePair;

    fn pair() -> SamplePair {
        SamplePair {
            name1: "s1".into(),
            name2: "s2".into(),
        }
    }

    #[test]
    fn score_paths_follow_result_tree() {
        let layout = OutputLayout::new("/out");
        assert_eq!(
            layout.pair_score_file(Method::GenomeDisco, &pair(), "chr1"),
            PathBuf::from("/out/results/GenomeDISCO/s1.vs.s2/chr1.s1.vs.s2.scores.txt")
        );
        assert_eq!(
            layout.summary_genomewide_file(Method::HicRep),
            PathBuf::from("/out/results/summary/HiCRep/HiCRep.genomewide.txt")
        );
        assert_eq!(
            layout.edge_file("s1", "chr2"),
            PathBuf::from("/out/data/edges/s1/s1.chr2.gz")
        );
    }

    #[test]
    fn atomic_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/score.txt");
        atomic_write(&path, b"first\n").unwrap();
        atomic_write(&path, b"second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
        // no leftover temp files
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
