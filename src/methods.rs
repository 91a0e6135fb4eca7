use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

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
    #[error("unknown method name: {0:?}")]
    UnknownMethod(String),
    #[error("parameters file line has {actual} columns, expected {expect}")]
    NotEnoughColumns { expect: usize, actual: usize },
    #[error("no parameter {param:?} for method {method}")]
    MissingParameter { method: Method, param: String },
}

/// Whether a method compares matrices chromosome by chromosome or
/// consumes one genome-wide file per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodShape {
    PerChromosome,
    GenomeWide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    GenomeDisco,
    HicRep,
    HicSpector,
    QuasarRep,
    QuasarQc,
}

pub const ALL_METHODS: [Method; 5] = [
    Method::GenomeDisco,
    Method::HicRep,
    Method::HicSpector,
    Method::QuasarRep,
    Method::QuasarQc,
];

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::GenomeDisco => "GenomeDISCO",
            Method::HicRep => "HiCRep",
            Method::HicSpector => "HiC-Spector",
            Method::QuasarRep => "QuASAR-Rep",
            Method::QuasarQc => "QuASAR-QC",
        }
    }

    pub fn shape(&self) -> MethodShape {
        match self {
            Method::GenomeDisco | Method::HicRep | Method::HicSpector => {
                MethodShape::PerChromosome
            }
            Method::QuasarRep | Method::QuasarQc => MethodShape::GenomeWide,
        }
    }

    /// QC methods score single samples and never enter pairwise summaries.
    pub fn is_qc(&self) -> bool {
        matches!(self, Method::QuasarQc)
    }

    /// Parse a comma-delimited method list; "all" selects every method.
    pub fn parse_list(s: &str) -> Result<Vec<Method>> {
        if s == "all" {
            return Ok(ALL_METHODS.to_vec());
        }
        s.split(',').map(|x| x.trim().parse()).collect()
    }
}

impl FromStr for Method {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GenomeDISCO" => Ok(Method::GenomeDisco),
            "HiCRep" => Ok(Method::HicRep),
            "HiC-Spector" => Ok(Method::HicSpector),
            "QuASAR-Rep" => Ok(Method::QuasarRep),
            "QuASAR-QC" => Ok(Method::QuasarQc),
            _ => Err(Error::UnknownMethod(s.to_owned())),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-method key/value parameters for the external comparison tools.
/// Built-in defaults can be overridden per key from a `method\tparam\tvalue`
/// file. Read-only once loaded.
pub struct ParameterTable {
    m: HashMap<Method, HashMap<String, String>>,
}

impl ParameterTable {
    pub fn defaults() -> Self {
        let mut m: HashMap<Method, HashMap<String, String>> = HashMap::new();
        let disco = m.entry(Method::GenomeDisco).or_default();
        disco.insert("subsampling".into(), "lowest".into());
        disco.insert("tmin".into(), "3".into());
        disco.insert("tmax".into(), "3".into());
        disco.insert("norm".into(), "sqrtvc".into());
        let hicrep = m.entry(Method::HicRep).or_default();
        hicrep.insert("maxdist".into(), "5000000".into());
        hicrep.insert("h".into(), "5".into());
        let quasar = m.entry(Method::QuasarRep).or_default();
        quasar.insert("rebinning".into(), "NA".into());
        Self { m }
    }

    /// Defaults overridden by the entries of a parameters file, if given.
    pub fn from_file(path: Option<&Path>) -> Result<Self> {
        let mut table = Self::defaults();
        let path = match path {
            Some(p) => p,
            None => return Ok(table),
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .from_path(path)?;
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            if record.len() < 3 {
                return Err(Error::NotEnoughColumns {
                    expect: 3,
                    actual: record.len(),
                });
            }
            let method: Method = record[0].parse()?;
            table
                .m
                .entry(method)
                .or_default()
                .insert(record[1].to_owned(), record[2].to_owned());
        }
        Ok(table)
    }

    pub fn get(&self, method: Method, param: &str) -> Result<&str> {
        self.m
            .get(&method)
            .and_then(|p| p.get(param))
            .map(|s| s.as_str())
            .ok_or_else(|| Error::MissingParameter {
                method,
                param: param.to_owned(),
            })
    }
}
