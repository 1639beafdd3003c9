//! Project index types
//!
//! `ProjectInfo` is the content of one `project.inf` file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the index file inside every project directory
pub const PROJECT_INDEX_FILE: &str = "project.inf";

/// Project status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Bundles are decompressed and browsable
    #[default]
    Open,
    /// Bundles are compressed
    Close,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Open => "open",
            ProjectStatus::Close => "close",
        }
    }

    /// Parse a requested status value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ProjectStatus::Open),
            "close" => Some(ProjectStatus::Close),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Archive format of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveType {
    #[serde(rename = ".tgz")]
    Tgz,
    #[serde(rename = ".zip")]
    Zip,
}

impl ArchiveType {
    /// Extension used for the on-disk archive, dot included
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveType::Tgz => ".tgz",
            ArchiveType::Zip => ".zip",
        }
    }

    /// Detect the archive type from an uploaded file name
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") {
            Some(ArchiveType::Tgz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveType::Zip)
        } else {
            None
        }
    }

    /// `name` + extension, the archive file name of a bundle
    pub fn file_name(&self, name: &str) -> String {
        format!("{}{}", name, self.extension())
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// One registered bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Unique within the project, taken from `ProjectInfo::index`
    pub id: u64,
    /// Root entry of the archive; also the directory / archive stem on disk
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ArchiveType,
    pub date: DateTime<Utc>,
    /// Content currently exists as a browsable directory
    pub available: bool,
    /// The original archive is kept next to the directory
    #[serde(default)]
    pub preserved: bool,
}

impl BundleInfo {
    pub fn archive_file_name(&self) -> String {
        self.kind.file_name(&self.name)
    }
}

/// One registered stats dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Extension of the converted dataset file, dot included
    #[serde(rename = "type")]
    pub kind: String,
    pub available: bool,
}

impl StatsInfo {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.kind)
    }
}

/// Content of `project.inf`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    /// Older index files have no status; they are open
    #[serde(default)]
    pub status: ProjectStatus,
    pub opened: DateTime<Utc>,
    pub closed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    /// Next id to hand out; never decreases
    pub index: u64,
    #[serde(default)]
    pub bundles: Vec<BundleInfo>,
    #[serde(default)]
    pub stats: Vec<StatsInfo>,
}

impl ProjectInfo {
    /// Fresh index for a newly created project
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProjectStatus::Open,
            opened: Utc::now(),
            closed: None,
            description: description.into(),
            index: 0,
            bundles: Vec::new(),
            stats: Vec::new(),
        }
    }

    /// Hand out the next id
    pub fn next_id(&mut self) -> u64 {
        let id = self.index;
        self.index += 1;
        id
    }

    pub fn bundle(&self, id: u64) -> Option<&BundleInfo> {
        self.bundles.iter().find(|b| b.id == id)
    }

    pub fn bundle_mut(&mut self, id: u64) -> Option<&mut BundleInfo> {
        self.bundles.iter_mut().find(|b| b.id == id)
    }

    pub fn has_bundle_named(&self, name: &str) -> bool {
        self.bundles.iter().any(|b| b.name == name)
    }

    pub fn stats_entry(&self, id: u64) -> Option<&StatsInfo> {
        self.stats.iter().find(|s| s.id == id)
    }

    pub fn stats_entry_mut(&mut self, id: u64) -> Option<&mut StatsInfo> {
        self.stats.iter_mut().find(|s| s.id == id)
    }

    pub fn has_stats_named(&self, name: &str) -> bool {
        self.stats.iter().any(|s| s.name == name)
    }

    /// Apply a status change and stamp `closed`
    pub fn set_status(&mut self, status: ProjectStatus) {
        self.status = status;
        self.closed = match status {
            ProjectStatus::Close => Some(Utc::now()),
            ProjectStatus::Open => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(ProjectStatus::parse("open"), Some(ProjectStatus::Open));
        assert_eq!(ProjectStatus::parse("close"), Some(ProjectStatus::Close));
        assert_eq!(ProjectStatus::parse("closed"), None);
        assert_eq!(ProjectStatus::Close.to_string(), "close");
    }

    #[test]
    fn test_archive_type_detection() {
        assert_eq!(ArchiveType::from_file_name("vm-support.tgz"), Some(ArchiveType::Tgz));
        assert_eq!(ArchiveType::from_file_name("logs.TAR.GZ"), Some(ArchiveType::Tgz));
        assert_eq!(ArchiveType::from_file_name("logs.zip"), Some(ArchiveType::Zip));
        assert_eq!(ArchiveType::from_file_name("logs.rar"), None);
        assert_eq!(ArchiveType::Zip.file_name("b1"), "b1.zip");
    }

    #[test]
    fn test_next_id_is_monotonic() {
        let mut info = ProjectInfo::new("p1", "d");
        assert_eq!(info.next_id(), 0);
        assert_eq!(info.next_id(), 1);
        assert_eq!(info.index, 2);
    }

    #[test]
    fn test_set_status_stamps_closed() {
        let mut info = ProjectInfo::new("p1", "");
        info.set_status(ProjectStatus::Close);
        assert_eq!(info.status, ProjectStatus::Close);
        assert!(info.closed.is_some());

        info.set_status(ProjectStatus::Open);
        assert!(info.closed.is_none());
    }

    #[test]
    fn test_index_json_shape() {
        let mut info = ProjectInfo::new("p1", "d");
        let id = info.next_id();
        info.bundles.push(BundleInfo {
            id,
            name: "esx-01".to_string(),
            description: String::new(),
            kind: ArchiveType::Tgz,
            date: Utc::now(),
            available: true,
            preserved: false,
        });

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["status"], "open");
        assert_eq!(value["closed"], serde_json::Value::Null);
        assert_eq!(value["index"], 1);
        assert_eq!(value["bundles"][0]["type"], ".tgz");
        assert_eq!(value["stats"], serde_json::json!([]));
    }

    #[test]
    fn test_legacy_index_defaults() {
        let json = r#"{
            "name": "old",
            "opened": "2019-04-01T10:00:00Z",
            "closed": null,
            "description": "",
            "index": 3,
            "bundles": []
        }"#;
        let info: ProjectInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.status, ProjectStatus::Open);
        assert!(info.stats.is_empty());
        assert_eq!(info.index, 3);
    }
}
