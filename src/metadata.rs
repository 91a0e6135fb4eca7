use crate::layout::{self, atomic_write};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("csv error: {0:?}")]
    CsvError(#[from] csv::Error),
    #[error("duplicated sample name: {0:?}")]
    DuplicateSample(String),
    #[error("pair references unknown sample name: {0:?}")]
    UnknownSampleInPair(String),
    #[error("expected {expect} columns, found {actual}")]
    NotEnoughColumns { expect: usize, actual: usize },
    #[error("{0:?}")]
    ParseIntError(#[from] std::num::ParseIntError),
    #[error("bins file contains no records: {0:?}")]
    EmptyBins(std::path::PathBuf),
    #[error("cannot infer resolution from zero bins")]
    NoBins,
    #[error("bin {name:?} ends at {end}, before its start {start}")]
    InvertedBin { name: String, start: u64, end: u64 },
    #[error("layout error: {0:?}")]
    Layout(#[from] layout::Error),
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Io {
        source: e,
        path: path.to_owned(),
    }
}

/// Open a file that may or may not be gzip-compressed (`zcat -f` semantics),
/// sniffing the two-byte gzip magic.
pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path).map_err(io_err(path))?;
    let mut reader = BufReader::new(f);
    let is_gz = {
        let buf = reader.fill_buf().map_err(io_err(path))?;
        buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b
    };
    if is_gz {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Canonical chromosome label: exactly one "chr" prefix. Idempotent, and
/// collapses duplicated prefixes ("chrchr1" -> "chr1").
pub fn normalize_chrom(label: &str) -> String {
    let mut rest = label.trim();
    while let Some(stripped) = rest.strip_prefix("chr") {
        rest = stripped;
    }
    format!("chr{}", rest)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub name: String,
    pub path: std::path::PathBuf,
}

/// Sample metadata, loaded once and immutable. Names are unique.
pub struct Samples {
    v: Vec<Sample>,
    m: HashMap<String, usize>,
}

impl Samples {
    /// `name\tpath` per line.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut v = vec![];
        let mut m = HashMap::new();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .from_path(path)?;
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            if record.len() < 2 {
                return Err(Error::NotEnoughColumns {
                    expect: 2,
                    actual: record.len(),
                });
            }
            let name = record[0].to_owned();
            if m.contains_key(&name) {
                return Err(Error::DuplicateSample(name));
            }
            m.insert(name.clone(), v.len());
            v.push(Sample {
                name,
                path: record[1].into(),
            });
        }
        Ok(Self { v, m })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.v.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.v
    }

    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.m.get(name).map(|i| &self.v[*i])
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    pub name1: String,
    pub name2: String,
}

impl SamplePair {
    /// Directory/file key for a pair, e.g. "s1.vs.s2".
    pub fn key(&self) -> String {
        format!("{}.vs.{}", self.name1, self.name2)
    }
}

pub struct SamplePairs(Vec<SamplePair>);

impl SamplePairs {
    /// `name1\tname2` per line; both names must exist in `samples`.
    pub fn from_file(path: &Path, samples: &Samples) -> Result<Self> {
        let mut v = vec![];
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .from_path(path)?;
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            if record.len() < 2 {
                return Err(Error::NotEnoughColumns {
                    expect: 2,
                    actual: record.len(),
                });
            }
            for name in [&record[0], &record[1]] {
                if samples.get(name).is_none() {
                    return Err(Error::UnknownSampleInPair(name.to_owned()));
                }
            }
            v.push(SamplePair {
                name1: record[0].to_owned(),
                name2: record[1].to_owned(),
            });
        }
        Ok(Self(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SamplePair> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[SamplePair] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One record of the (gzipped) 4-column bins bed file.
#[derive(Debug, Clone)]
pub struct BinRecord {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: String,
}

pub fn read_bins(path: &Path) -> Result<Vec<BinRecord>> {
    let reader = open_maybe_gz(path)?;
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(reader);
    let mut v = vec![];
    let mut record = csv::StringRecord::new();
    while csv_reader.read_record(&mut record)? {
        if record.len() < 4 {
            return Err(Error::NotEnoughColumns {
                expect: 4,
                actual: record.len(),
            });
        }
        v.push(BinRecord {
            chrom: normalize_chrom(&record[0]),
            start: record[1].parse()?,
            end: record[2].parse()?,
            name: record[3].to_owned(),
        });
    }
    if v.is_empty() {
        return Err(Error::EmptyBins(path.to_owned()));
    }
    Ok(v)
}

/// Bin resolution = median of (end - start) over all bins. Inverted bins
/// and an empty slice are rejected rather than panicking.
pub fn compute_resolution(bins: &[BinRecord]) -> Result<u64> {
    let mut widths = Vec::with_capacity(bins.len());
    for b in bins {
        let width = b.end.checked_sub(b.start).ok_or_else(|| Error::InvertedBin {
            name: b.name.clone(),
            start: b.start,
            end: b.end,
        })?;
        widths.push(width);
    }
    widths.sort_unstable();
    let n = widths.len();
    if n == 0 {
        Err(Error::NoBins)
    } else if n % 2 == 1 {
        Ok(widths[n / 2])
    } else {
        Ok((widths[n / 2 - 1] + widths[n / 2]) / 2)
    }
}

/// Sorted unique normalized chromosome labels present in the bins.
pub fn discover_chromosomes(bins: &[BinRecord]) -> Vec<String> {
    bins.iter()
        .map(|b| b.chrom.clone())
        .unique()
        .sorted()
        .collect()
}

/// Ordered intersection of an optional subset filter with the discovered
/// chromosomes. Subset entries absent from the data are dropped silently.
pub fn working_chromosomes(discovered: Vec<String>, subset: Option<&str>) -> Vec<String> {
    match subset {
        None => discovered,
        Some(list) => {
            let have: HashSet<&str> = discovered.iter().map(|s| s.as_str()).collect();
            let mut seen = HashSet::new();
            list.split(',')
                .map(normalize_chrom)
                .filter(|c| have.contains(c.as_str()) && seen.insert(c.clone()))
                .collect()
        }
    }
}

/// Chromosome list persisted between stages, one label per line, gzipped.
/// Written atomically: later stages take the existence of this file as proof
/// the split stage finished, so a torn file must never appear under this
/// name.
pub fn write_chromosomes(path: &Path, chroms: &[String]) -> Result<()> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    for c in chroms {
        writeln!(enc, "{}", c).map_err(io_err(path))?;
    }
    let gz = enc.finish().map_err(io_err(path))?;
    atomic_write(path, &gz)?;
    Ok(())
}

pub fn read_chromosomes(path: &Path) -> Result<Vec<String>> {
    let reader = open_maybe_gz(path)?;
    let mut v = vec![];
    for line in reader.lines() {
        let line = line.map_err(io_err(path))?;
        let line = line.trim();
        if !line.is_empty() {
            v.push(line.to_owned());
        }
    }
    Ok(v)
}

/// Atomic for the same reason as [`write_chromosomes`].
pub fn write_resolution(path: &Path, resolution: u64) -> Result<()> {
    atomic_write(path, format!("{}\n", resolution).as_bytes())?;
    Ok(())
}

pub fn read_resolution(path: &Path) -> Result<u64> {
    let mut s = String::new();
    File::open(path)
        .map_err(io_err(path))?
        .read_to_string(&mut s)
        .map_err(io_err(path))?;
    Ok(s.trim().parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn normalize_is_idempotent() {
        assert_eq!(normalize_chrom("1"), "chr1");
        assert_eq!(normalize_chrom("chr1"), "chr1");
        assert_eq!(normalize_chrom("chrchr1"), "chr1");
        assert_eq!(normalize_chrom(&normalize_chrom("21")), "chr21");
    }

    #[test]
    fn duplicate_sample_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "samples.txt", "s1\t/a\ns2\t/b\ns1\t/c\n");
        match Samples::from_file(&path) {
            Err(Error::DuplicateSample(name)) => assert_eq!(name, "s1"),
            other => panic!("expected DuplicateSample, got {:?}", other.err()),
        }
    }

    #[test]
    fn pair_with_unknown_sample_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let samples_path = write_file(dir.path(), "samples.txt", "s1\t/a\ns2\t/b\n");
        let samples = Samples::from_file(&samples_path).unwrap();

        let ok = write_file(dir.path(), "pairs.txt", "s1\ts2\n");
        assert_eq!(SamplePairs::from_file(&ok, &samples).unwrap().len(), 1);

        let bad = write_file(dir.path(), "bad_pairs.txt", "s1\ts3\n");
        assert!(matches!(
            SamplePairs::from_file(&bad, &samples),
            Err(Error::UnknownSampleInPair(_))
        ));
    }

    fn bins_of(widths: &[(u64, u64)]) -> Vec<BinRecord> {
        widths
            .iter()
            .map(|(s, e)| BinRecord {
                chrom: "chr1".into(),
                start: *s,
                end: *e,
                name: format!("bin{}", s),
            })
            .collect()
    }

    #[test]
    fn resolution_is_median_width() {
        let bins = bins_of(&[(0, 10), (10, 20), (20, 40)]);
        assert_eq!(compute_resolution(&bins).unwrap(), 10);
    }

    #[test]
    fn resolution_rejects_empty_and_inverted_bins() {
        assert!(matches!(compute_resolution(&[]), Err(Error::NoBins)));
        let bins = bins_of(&[(0, 10), (30, 20)]);
        match compute_resolution(&bins) {
            Err(Error::InvertedBin { name, start, end }) => {
                assert_eq!(name, "bin30");
                assert_eq!((start, end), (30, 20));
            }
            other => panic!("expected InvertedBin, got {:?}", other),
        }
    }

    #[test]
    fn bins_read_and_chromosomes_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "bins.bed",
            "1\t0\t10\tbin1\nchr2\t0\t10\tbin2\nchrchr1\t10\t20\tbin3\n",
        );
        let bins = read_bins(&path).unwrap();
        assert_eq!(bins.len(), 3);
        assert_eq!(discover_chromosomes(&bins), vec!["chr1", "chr2"]);
    }

    #[test]
    fn subset_intersection_keeps_order_and_drops_unknown() {
        let discovered = vec!["chr1".to_owned(), "chr2".to_owned()];
        let working = working_chromosomes(discovered.clone(), Some("chr2,chrX,1"));
        assert_eq!(working, vec!["chr2", "chr1"]);
        assert_eq!(working_chromosomes(discovered.clone(), None), discovered);
    }

    #[test]
    fn chromosome_list_round_trip_via_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chromosomes.gz");
        let chroms = vec!["chr1".to_owned(), "chr2".to_owned()];
        write_chromosomes(&path, &chroms).unwrap();
        assert_eq!(read_chromosomes(&path).unwrap(), chroms);
    }

    #[test]
    fn stage_metadata_files_replace_torn_leftovers_whole() {
        // later stages take these files' existence as proof split finished,
        // so a pre-existing torn file must be replaced in one rename
        let dir = tempfile::tempdir().unwrap();
        let chroms_path = dir.path().join("chromosomes.gz");
        let res_path = dir.path().join("resolution.txt");
        std::fs::write(&chroms_path, b"\x1f\x8b\x08").unwrap();
        std::fs::write(&res_path, "4").unwrap();

        let chroms = vec!["chr1".to_owned()];
        write_chromosomes(&chroms_path, &chroms).unwrap();
        write_resolution(&res_path, 40000).unwrap();

        assert_eq!(read_chromosomes(&chroms_path).unwrap(), chroms);
        assert_eq!(read_resolution(&res_path).unwrap(), 40000);
        // nothing but the two final files, no temp leftovers
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, ["chromosomes.gz", "resolution.txt"]);
    }
}
