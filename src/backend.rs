use clap::ValueEnum;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

pub type Result<T> = std::result::Result<T, Error>;

/// Memory reservation used for grid-engine submissions.
pub const SGE_VMEM: &str = "3G";
/// Memory reservation used for Slurm submissions.
pub const SLURM_MEM: &str = "50G";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error, source: {source:?}, path: {path:?}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("script {script:?} exited with {status}; captured output:\n{output}")]
    ExternalTool {
        script: std::path::PathBuf,
        status: std::process::ExitStatus,
        output: String,
    },
    #[error("scheduler rejected submission of {script:?}: {message}")]
    Submission {
        script: std::path::PathBuf,
        message: String,
    },
    #[error("timed out waiting for stage outputs; still missing: {missing:?}")]
    StageWaitTimeout { missing: Vec<PathBuf> },
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Io {
        source: e,
        path: path.to_owned(),
    }
}

/// CLI selector for how generated scripts are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunningMode {
    /// Run each script synchronously in-process.
    #[default]
    #[value(name = "NA")]
    Na,
    /// Submit to a grid-engine scheduler (fire-and-forget).
    Sge,
    /// Submit to a Slurm scheduler (fire-and-forget).
    Slurm,
}

/// Where a generated unit of work is executed. Cluster variants submit and
/// return without waiting; whether the job ever finishes is not observed
/// here, which is why staged cluster runs must wait on expected outputs
/// (`wait_for_outputs`) before a later stage reads them.
#[derive(Debug, Clone)]
pub enum Backend {
    Immediate,
    Sge,
    Slurm { partition: String },
}

impl Backend {
    pub fn from_mode(mode: RunningMode, slurm_partition: &str) -> Self {
        match mode {
            RunningMode::Na => Backend::Immediate,
            RunningMode::Sge => Backend::Sge,
            RunningMode::Slurm => Backend::Slurm {
                partition: slurm_partition.to_owned(),
            },
        }
    }

    /// True when `submit` returning means the unit has finished.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Backend::Immediate)
    }

    pub fn submit(&self, script: &Path) -> Result<()> {
        match self {
            Backend::Immediate => run_immediate(script),
            Backend::Sge => {
                let output = Command::new("qsub")
                    .arg("-l")
                    .arg(format!("h_vmem={}", SGE_VMEM))
                    .arg("-o")
                    .arg(with_suffix(script, ".o"))
                    .arg("-e")
                    .arg(with_suffix(script, ".e"))
                    .arg(script)
                    .output()
                    .map_err(io_err(script))?;
                check_submission(script, &output)
            }
            Backend::Slurm { partition } => {
                let output = Command::new("sbatch")
                    .arg("--mem")
                    .arg(SLURM_MEM)
                    .arg("-o")
                    .arg(with_suffix(script, ".o"))
                    .arg("-e")
                    .arg(with_suffix(script, ".e"))
                    .arg("-p")
                    .arg(partition)
                    .arg(script)
                    .output()
                    .map_err(io_err(script))?;
                check_submission(script, &output)
            }
        }
    }
}

fn with_suffix(script: &Path, suffix: &str) -> PathBuf {
    let mut s = script.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn run_immediate(script: &Path) -> Result<()> {
    debug!("running {}", script.display());
    // bash rather than sh: generated scripts use `source`
    let output = Command::new("bash")
        .arg(script)
        .output()
        .map_err(io_err(script))?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(Error::ExternalTool {
            script: script.to_owned(),
            status: output.status,
            output: combined,
        });
    }
    if !combined.trim().is_empty() {
        info!("{}: {}", script.display(), combined.trim_end());
    }
    Ok(())
}

fn check_submission(script: &Path, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("submitted {}: {}", script.display(), stdout.trim_end());
        }
        Ok(())
    } else {
        Err(Error::Submission {
            script: script.to_owned(),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Poll until every expected output file exists. This is the barrier hook
/// for fire-and-forget cluster submissions: scheduler ordering is never
/// trusted across stages.
pub fn wait_for_outputs(paths: &[PathBuf], timeout: Duration, poll: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let missing: Vec<PathBuf> = paths
            .iter()
            .filter(|p| !p.exists())
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::StageWaitTimeout { missing });
        }
        debug!("waiting on {} stage output(s)", missing.len());
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{}", body).unwrap();
        path
    }

    #[test]
    fn immediate_backend_surfaces_failure_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_script(dir.path(), "ok.sh", "echo fine");
        let bad = write_script(dir.path(), "bad.sh", "echo broken >&2; exit 3");

        let backend = Backend::Immediate;
        assert!(backend.submit(&ok).is_ok());
        match backend.submit(&bad) {
            Err(Error::ExternalTool { status, output, .. }) => {
                assert_eq!(status.code(), Some(3));
                assert!(output.contains("broken"));
            }
            other => panic!("expected ExternalTool error, got {:?}", other),
        }
    }

    #[test]
    fn wait_for_outputs_reports_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.txt");
        std::fs::write(&present, "x").unwrap();
        let absent = dir.path().join("b.txt");

        let paths = vec![present.clone(), absent.clone()];
        match wait_for_outputs(&paths, Duration::from_millis(30), Duration::from_millis(10)) {
            Err(Error::StageWaitTimeout { missing }) => assert_eq!(missing, vec![absent]),
            other => panic!("expected timeout, got {:?}", other),
        }

        wait_for_outputs(&[present], Duration::from_millis(30), Duration::from_millis(10))
            .unwrap();
    }
}
