//! Stats conversion collaborator
//!
//! A stats upload (CSV) is turned into a dataset file by an external
//! converter program. The converter writes the dataset next to the upload
//! and prints a JSON object on stdout:
//!
//! - name: `<program> <args..> -n -f <file>` -> `{"basename": "<name><type>"}`
//! - convert: `<program> <args..> -v -f <file>` -> `{"basename": "<name><type>"}`
//! - counters: `<program> <args..> -g -db <file> -ac|-nc|-vc` -> `{"counters": [...]}`
//! - data: `<program> <args..> -g -db <file> -sd -c <counters>` -> `{"data": ...}`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Dataset produced by a conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedStats {
    /// Stem of the dataset file
    pub name: String,
    /// Extension of the dataset file, dot included
    pub kind: String,
}

impl ConvertedStats {
    /// Split a dataset file name into name and type (`perf.db` -> `perf`, `.db`)
    pub fn from_basename(basename: &str) -> Result<Self> {
        let path = Path::new(basename);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty());
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

        match (name, ext) {
            (Some(name), Some(ext)) if path.components().count() == 1 => Ok(Self {
                name,
                kind: format!(".{}", ext),
            }),
            _ => Err(Error::StatsConversion(format!(
                "converter returned an unusable file name: {}",
                basename
            ))),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.kind)
    }
}

/// Which counters of a dataset to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterSet {
    /// Every recorded counter
    #[default]
    All,
    /// Counters with at least one non-zero sample
    Nonzero,
    /// The converter's short list of vitality counters
    Vitality,
}

impl CounterSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Nonzero => "nonzero",
            Self::Vitality => "vitality",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "nonzero" => Some(Self::Nonzero),
            "vitality" => Some(Self::Vitality),
            _ => None,
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            Self::All => "-ac",
            Self::Nonzero => "-nc",
            Self::Vitality => "-vc",
        }
    }
}

impl fmt::Display for CounterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait StatsConverter: Send + Sync {
    /// Name and type the dataset of `upload` would get, without converting
    async fn peek_name(&self, upload: &Path) -> Result<ConvertedStats>;

    /// Convert `upload` into a dataset stored in the same directory
    async fn convert(&self, upload: &Path) -> Result<ConvertedStats>;

    /// Counters recorded in a dataset
    async fn counters(&self, dataset: &Path, set: CounterSet) -> Result<Vec<String>>;

    /// Samples of the given counters, as the converter reports them
    async fn data(&self, dataset: &Path, counters: &[String]) -> Result<serde_json::Value>;
}

#[derive(Deserialize)]
struct ConvertOutput {
    basename: String,
}

#[derive(Deserialize)]
struct CountersOutput {
    counters: Vec<String>,
}

#[derive(Deserialize)]
struct DataOutput {
    data: serde_json::Value,
}

/// Runs an external converter program
#[derive(Debug, Clone)]
pub struct CommandStatsConverter {
    program: String,
    args: Vec<String>,
}

impl CommandStatsConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run<T: for<'de> Deserialize<'de>>(
        &self,
        mode: &[&str],
        file: &Path,
        trailing: &[&str],
    ) -> Result<T> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(mode);
        cmd.arg(file);
        cmd.args(trailing);
        if let Some(dir) = file.parent() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!(program = %self.program, file = %file.display(), "Running stats converter");

        let output = cmd.output().await.map_err(|e| {
            Error::StatsConversion(format!("failed to start {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                program = %self.program,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "Stats converter failed"
            );
            return Err(Error::StatsConversion(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            Error::StatsConversion(format!("unreadable converter output: {}", e))
        })
    }
}

#[async_trait]
impl StatsConverter for CommandStatsConverter {
    async fn peek_name(&self, upload: &Path) -> Result<ConvertedStats> {
        let out: ConvertOutput = self.run(&["-n", "-f"], upload, &[]).await?;
        ConvertedStats::from_basename(&out.basename)
    }

    async fn convert(&self, upload: &Path) -> Result<ConvertedStats> {
        let out: ConvertOutput = self.run(&["-v", "-f"], upload, &[]).await?;
        ConvertedStats::from_basename(&out.basename)
    }

    async fn counters(&self, dataset: &Path, set: CounterSet) -> Result<Vec<String>> {
        let out: CountersOutput = self.run(&["-g", "-db"], dataset, &[set.flag()]).await?;
        Ok(out.counters)
    }

    async fn data(&self, dataset: &Path, counters: &[String]) -> Result<serde_json::Value> {
        if counters.is_empty() {
            return Err(Error::StatsConversion("no counters requested".to_string()));
        }
        let selection = counters.join(",");
        let out: DataOutput = self
            .run(&["-g", "-db"], dataset, &["-sd", "-c", selection.as_str()])
            .await?;
        Ok(out.data)
    }
}
