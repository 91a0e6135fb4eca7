use crate::layout::{self, atomic_write, OutputLayout};
use crate::metadata::{self, normalize_chrom, open_maybe_gz, BinRecord, Sample};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("metadata error: {0:?}")]
    Metadata(#[from] metadata::Error),
    #[error("layout error: {0:?}")]
    Layout(#[from] layout::Error),
    #[error("contact record with {actual} columns (expected {expect}) in {path:?}")]
    BadContactRecord {
        expect: usize,
        actual: usize,
        path: std::path::PathBuf,
    },
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Io {
        source: e,
        path: path.to_owned(),
    }
}

fn gzip_bytes(content: &[u8], path: &Path) -> Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(content).map_err(io_err(path))?;
    enc.finish().map_err(io_err(path))
}

/// One sparse contact record: `chr1 bin1 chr2 bin2 value`. Chromosome labels
/// are normalized on read; the count value is kept verbatim.
struct ContactRecord {
    chrom1: String,
    bin1: String,
    chrom2: String,
    bin2: String,
    value: String,
}

fn for_each_contact_record(
    path: &Path,
    mut f: impl FnMut(ContactRecord),
) -> Result<()> {
    let reader = open_maybe_gz(path)?;
    for line in reader.lines() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(Error::BadContactRecord {
                expect: 5,
                actual: fields.len(),
                path: path.to_owned(),
            });
        }
        f(ContactRecord {
            chrom1: normalize_chrom(fields[0]),
            bin1: fields[1].to_owned(),
            chrom2: normalize_chrom(fields[2]),
            bin2: fields[3].to_owned(),
            value: fields[4].to_owned(),
        });
    }
    Ok(())
}

/// Write per-chromosome node shards: `chrom start end name included`,
/// gzipped, one file per working chromosome. Atomic and idempotent.
pub fn split_nodes(bins: &[BinRecord], chroms: &[String], layout: &OutputLayout) -> Result<()> {
    let mut buckets: HashMap<&str, Vec<u8>> =
        chroms.iter().map(|c| (c.as_str(), Vec::new())).collect();
    for bin in bins {
        if let Some(buf) = buckets.get_mut(bin.chrom.as_str()) {
            writeln!(
                buf,
                "{}\t{}\t{}\t{}\tincluded",
                bin.chrom, bin.start, bin.end, bin.name
            )
            .expect("write to in-memory buffer");
        }
    }
    chroms.par_iter().try_for_each(|chrom| -> Result<()> {
        info!("splitting nodes {}", chrom);
        let path = layout.node_file(chrom);
        let gz = gzip_bytes(&buckets[chrom.as_str()], &path)?;
        atomic_write(&path, &gz)?;
        Ok(())
    })
}

/// Write per-chromosome edge shards for one sample: records where both
/// endpoints lie on the chromosome, as `bin1\tbin2\tvalue`, gzipped.
/// Inter-chromosomal records are discarded (known limitation of the
/// per-chromosome methods). A chromosome with no data still gets a shard, so
/// downstream skip decisions can be made from file size alone.
pub fn split_edges(sample: &Sample, chroms: &[String], layout: &OutputLayout) -> Result<()> {
    info!("splitting edges for {}", sample.name);
    let mut buckets: HashMap<&str, Vec<u8>> =
        chroms.iter().map(|c| (c.as_str(), Vec::new())).collect();
    let mut dropped_inter = 0usize;
    for_each_contact_record(&sample.path, |rec| {
        if rec.chrom1 != rec.chrom2 {
            dropped_inter += 1;
            return;
        }
        if let Some(buf) = buckets.get_mut(rec.chrom1.as_str()) {
            writeln!(buf, "{}\t{}\t{}", rec.bin1, rec.bin2, rec.value)
                .expect("write to in-memory buffer");
        }
    })?;
    if dropped_inter > 0 {
        debug!(
            "{}: discarded {} inter-chromosomal records",
            sample.name, dropped_inter
        );
    }
    for chrom in chroms {
        let path = layout.edge_file(&sample.name, chrom);
        let gz = gzip_bytes(&buckets[chrom.as_str()], &path)?;
        atomic_write(&path, &gz)?;
    }
    Ok(())
}

pub fn split_edges_all(
    samples: &[Sample],
    chroms: &[String],
    layout: &OutputLayout,
) -> Result<()> {
    samples
        .par_iter()
        .try_for_each(|sample| split_edges(sample, chroms, layout))
}

/// Genome-wide normalized contact file for one sample, input to the QuASAR
/// transform. With a chromosome subset only intra-chromosomal records on the
/// requested chromosomes are kept; otherwise every record is passed through.
pub fn write_quasar_fulldata(
    sample: &Sample,
    subset: Option<&[String]>,
    layout: &OutputLayout,
) -> Result<()> {
    info!("building genome-wide QuASAR input for {}", sample.name);
    let keep: Option<HashSet<&str>> =
        subset.map(|s| s.iter().map(|c| c.as_str()).collect());
    let mut content = Vec::new();
    for_each_contact_record(&sample.path, |rec| {
        if let Some(keep) = keep.as_ref() {
            if rec.chrom1 != rec.chrom2 || !keep.contains(rec.chrom1.as_str()) {
                return;
            }
        }
        writeln!(
            content,
            "{}\t{}\t{}\t{}\t{}",
            rec.chrom1, rec.bin1, rec.chrom2, rec.bin2, rec.value
        )
        .expect("write to in-memory buffer");
    })?;
    let path = layout.quasar_fulldata(&sample.name);
    let gz = gzip_bytes(&content, &path)?;
    atomic_write(&path, &gz)?;
    Ok(())
}

pub fn write_quasar_fulldata_all(
    samples: &[Sample],
    subset: Option<&[String]>,
    layout: &OutputLayout,
) -> Result<()> {
    samples
        .par_iter()
        .try_for_each(|sample| write_quasar_fulldata(sample, subset, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::read_bins;
    use std::fs::File;
    use std::io::Read;

    fn gunzip(path: &Path) -> String {
        let mut s = String::new();
        flate2::read::MultiGzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut s)
            .unwrap();
        s
    }

    fn fixture(dir: &Path) -> (Vec<BinRecord>, Sample, OutputLayout) {
        let bins_path = dir.join("bins.bed");
        std::fs::write(
            &bins_path,
            "1\t0\t10\tbin1\n1\t10\t20\tbin2\n2\t0\t10\tbin3\n",
        )
        .unwrap();
        let sample_path = dir.join("s1.txt");
        std::fs::write(
            &sample_path,
            "1\t0\t1\t10\t5\nchr1\t10\tchr1\t10\t2\n1\t0\t2\t0\t9\nchr2\t0\tchr2\t0\t3\n",
        )
        .unwrap();
        let layout = OutputLayout::new(dir.join("out"));
        layout.ensure_dirs().unwrap();
        (
            read_bins(&bins_path).unwrap(),
            Sample {
                name: "s1".into(),
                path: sample_path,
            },
            layout,
        )
    }

    #[test]
    fn node_shards_keep_only_their_chromosome() {
        let dir = tempfile::tempdir().unwrap();
        let (bins, _, layout) = fixture(dir.path());
        let chroms = vec!["chr1".to_owned(), "chr2".to_owned()];
        split_nodes(&bins, &chroms, &layout).unwrap();
        assert_eq!(
            gunzip(&layout.node_file("chr1")),
            "chr1\t0\t10\tbin1\tincluded\nchr1\t10\t20\tbin2\tincluded\n"
        );
        assert_eq!(gunzip(&layout.node_file("chr2")), "chr2\t0\t10\tbin3\tincluded\n");
    }

    #[test]
    fn edge_shards_drop_inter_chromosomal_records() {
        let dir = tempfile::tempdir().unwrap();
        let (_, sample, layout) = fixture(dir.path());
        let chroms = vec!["chr1".to_owned(), "chr2".to_owned()];
        split_edges(&sample, &chroms, &layout).unwrap();
        // the chr1-chr2 record is gone; labels are normalized
        assert_eq!(
            gunzip(&layout.edge_file("s1", "chr1")),
            "0\t10\t5\n10\t10\t2\n"
        );
        assert_eq!(gunzip(&layout.edge_file("s1", "chr2")), "0\t0\t3\n");
    }

    #[test]
    fn quasar_fulldata_subset_keeps_intra_chromosomal_only() {
        let dir = tempfile::tempdir().unwrap();
        let (_, sample, layout) = fixture(dir.path());
        let subset = vec!["chr1".to_owned()];
        write_quasar_fulldata(&sample, Some(&subset), &layout).unwrap();
        assert_eq!(
            gunzip(&layout.quasar_fulldata("s1")),
            "chr1\t0\tchr1\t10\t5\nchr1\t10\tchr1\t10\t2\n"
        );

        write_quasar_fulldata(&sample, None, &layout).unwrap();
        assert_eq!(gunzip(&layout.quasar_fulldata("s1")).lines().count(), 4);
    }
}
