use crate::layout::{self, atomic_write, OutputLayout};
use crate::metadata::SamplePair;
use crate::methods::{Method, MethodShape};
use crate::scripts::shard_usable;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("expected score file is absent: {0:?} (did the reproducibility stage complete?)")]
    MissingOutput(std::path::PathBuf),
    #[error("cannot parse score from {path:?}: {line:?}")]
    ParseScore {
        path: std::path::PathBuf,
        line: String,
    },
    #[error("layout error: {0:?}")]
    Layout(#[from] layout::Error),
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Io {
        source: e,
        path: path.to_owned(),
    }
}

/// Read the single score from a fixed-format score file: first data line,
/// third tab-separated column.
fn read_score(path: &Path) -> Result<f64> {
    if !path.exists() {
        return Err(Error::MissingOutput(path.to_owned()));
    }
    let content = std::fs::read_to_string(path).map_err(io_err(path))?;
    let line = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("");
    line.split('\t')
        .nth(2)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or_else(|| Error::ParseScore {
            path: path.to_owned(),
            line: line.to_owned(),
        })
}

/// Scores of one method across pairs and chromosomes, plus the derived
/// genome-wide mean. Built from on-disk score files during the summary
/// stage; not retained afterwards.
pub struct MethodScores {
    method: Method,
    // pair -> chromosome -> score; skipped chromosomes carry no entry
    per_pair: Vec<(SamplePair, BTreeMap<String, f64>)>,
}

impl MethodScores {
    /// Mean of the per-chromosome scores available for a pair. Skipped
    /// chromosomes are excluded from the mean, never counted as zero.
    fn genomewide(scores: &BTreeMap<String, f64>) -> Option<f64> {
        if scores.is_empty() {
            None
        } else {
            Some(scores.values().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Collect scores for a per-chromosome method. A chromosome whose
/// comparison was skipped (missing or empty edge shard) is excluded; a
/// missing score file for a chromosome that had usable shards means the
/// reproducibility stage did not complete and is a hard error.
pub fn collect_per_chromosome(
    method: Method,
    pairs: &[SamplePair],
    chroms: &[String],
    layout: &OutputLayout,
) -> Result<MethodScores> {
    let mut per_pair = vec![];
    for pair in pairs {
        let mut scores = BTreeMap::new();
        for chrom in chroms {
            let usable = shard_usable(&layout.edge_file(&pair.name1, chrom))
                && shard_usable(&layout.edge_file(&pair.name2, chrom));
            if !usable {
                continue;
            }
            let path = layout.pair_score_file(method, pair, chrom);
            let score = read_score(&path)?;
            scores.insert(chrom.clone(), score);
        }
        if scores.is_empty() {
            warn!(
                "{}: no usable chromosome produced a score for pair {}",
                method,
                pair.key()
            );
        }
        per_pair.push((pair.clone(), scores));
    }
    Ok(MethodScores { method, per_pair })
}

/// Collect scores for a genome-wide method (one score file per pair).
pub fn collect_genomewide(
    method: Method,
    pairs: &[SamplePair],
    layout: &OutputLayout,
) -> Result<MethodScores> {
    let mut per_pair = vec![];
    for pair in pairs {
        let path = layout.pair_genomewide_score_file(method, pair);
        let score = read_score(&path)?;
        let mut scores = BTreeMap::new();
        scores.insert("genomewide".to_owned(), score);
        per_pair.push((pair.clone(), scores));
    }
    Ok(MethodScores { method, per_pair })
}

/// Write the per-chromosome and genome-wide summary tables for one method.
/// All scores are read before anything is written, so a failed aggregation
/// never leaves a partial summary table behind.
pub fn write_summary(scores: &MethodScores, chroms: &[String], layout: &OutputLayout) -> Result<()> {
    let method = scores.method;

    if method.shape() == MethodShape::PerChromosome {
        for chrom in chroms {
            let mut table = String::from("#Sample1\tSample2\tScore\n");
            let mut rows = 0usize;
            for (pair, per_chrom) in &scores.per_pair {
                if let Some(score) = per_chrom.get(chrom) {
                    writeln!(table, "{}\t{}\t{}", pair.name1, pair.name2, score)
                        .expect("write to in-memory buffer");
                    rows += 1;
                }
            }
            if rows == 0 {
                continue;
            }
            let path = layout.summary_chrom_file(method, chrom);
            atomic_write(&path, table.as_bytes())?;
            info!("wrote {}", path.display());
        }
    }

    let mut table = String::new();
    for (pair, per_chrom) in &scores.per_pair {
        if let Some(mean) = MethodScores::genomewide(per_chrom) {
            writeln!(table, "{}\t{}\t{}", pair.name1, pair.name2, mean)
                .expect("write to in-memory buffer");
        }
    }
    let path = layout.summary_genomewide_file(method);
    atomic_write(&path, table.as_bytes())?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Aggregate every requested non-QC method. Per-method failures abort that
/// method before any of its summary files are written.
pub fn summarize(
    methods: &[Method],
    pairs: &[SamplePair],
    chroms: &[String],
    layout: &OutputLayout,
) -> Result<()> {
    for method in methods {
        if method.is_qc() {
            continue;
        }
        // no comparison units exist for this method yet, so no outputs are
        // expected and there is nothing to aggregate
        if *method == Method::HicSpector {
            warn!("{}: no comparison implemented; skipping summary", method);
            continue;
        }
        let scores = match method.shape() {
            MethodShape::PerChromosome => collect_per_chromosome(*method, pairs, chroms, layout)?,
            MethodShape::GenomeWide => collect_genomewide(*method, pairs, layout)?,
        };
        write_summary(&scores, chroms, layout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::MIN_SHARD_BYTES;

    fn pair() -> SamplePair {
        SamplePair {
            name1: "s1".into(),
            name2: "s2".into(),
        }
    }

    fn write_file(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn write_shards(layout: &OutputLayout, chrom: &str, usable: bool) {
        let len = if usable { 100 } else { MIN_SHARD_BYTES as usize };
        for s in ["s1", "s2"] {
            write_file(&layout.edge_file(s, chrom), &vec![b'x'; len]);
        }
    }

    fn write_score(layout: &OutputLayout, chrom: &str, score: f64) {
        let path = layout.pair_score_file(Method::GenomeDisco, &pair(), chrom);
        write_file(&path, format!("s1\ts2\t{}\n", score).as_bytes());
    }

    #[test]
    fn genomewide_mean_over_available_chromosomes() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let chroms = vec!["chr1".to_owned(), "chr2".to_owned()];
        write_shards(&layout, "chr1", true);
        write_shards(&layout, "chr2", true);
        write_score(&layout, "chr1", 0.8);
        write_score(&layout, "chr2", 0.6);

        let scores =
            collect_per_chromosome(Method::GenomeDisco, &[pair()], &chroms, &layout).unwrap();
        write_summary(&scores, &chroms, &layout).unwrap();

        let gw = std::fs::read_to_string(layout.summary_genomewide_file(Method::GenomeDisco))
            .unwrap();
        let mut fields = gw.trim_end().split('\t');
        assert_eq!(fields.next(), Some("s1"));
        assert_eq!(fields.next(), Some("s2"));
        let mean: f64 = fields.next().unwrap().parse().unwrap();
        assert!((mean - 0.7).abs() < 1e-12, "genome-wide mean was {}", mean);
        let chr1 = std::fs::read_to_string(
            layout.summary_chrom_file(Method::GenomeDisco, "chr1"),
        )
        .unwrap();
        assert_eq!(chr1, "#Sample1\tSample2\tScore\ns1\ts2\t0.8\n");
    }

    #[test]
    fn skipped_chromosome_excluded_from_mean() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let chroms = vec!["chr1".to_owned(), "chr2".to_owned()];
        write_shards(&layout, "chr1", true);
        // chr2 shards at the size threshold: comparison was skipped
        write_shards(&layout, "chr2", false);
        write_score(&layout, "chr1", 0.5);

        let scores =
            collect_per_chromosome(Method::GenomeDisco, &[pair()], &chroms, &layout).unwrap();
        write_summary(&scores, &chroms, &layout).unwrap();

        let gw = std::fs::read_to_string(layout.summary_genomewide_file(Method::GenomeDisco))
            .unwrap();
        assert_eq!(gw, "s1\ts2\t0.5\n");
        // no chr2 table, nothing scored there
        assert!(!layout.summary_chrom_file(Method::GenomeDisco, "chr2").exists());
    }

    #[test]
    fn missing_output_is_fatal_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let chroms = vec!["chr1".to_owned()];
        // usable shards but the score file was never produced
        write_shards(&layout, "chr1", true);

        let result = summarize(&[Method::GenomeDisco], &[pair()], &chroms, &layout);
        assert!(matches!(result, Err(Error::MissingOutput(_))));
        assert!(!layout.summary_genomewide_file(Method::GenomeDisco).exists());
        assert!(!layout.summary_chrom_file(Method::GenomeDisco, "chr1").exists());
    }

    #[test]
    fn quasar_rep_reads_single_genomewide_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let path = layout.pair_genomewide_score_file(Method::QuasarRep, &pair());
        write_file(&path, b"s1\ts2\t0.93\n");

        let scores = collect_genomewide(Method::QuasarRep, &[pair()], &layout).unwrap();
        write_summary(&scores, &[], &layout).unwrap();
        let gw =
            std::fs::read_to_string(layout.summary_genomewide_file(Method::QuasarRep)).unwrap();
        assert_eq!(gw, "s1\ts2\t0.93\n");
    }
}
