//! Projects, bundles and stats datasets
//!
//! A project is a directory holding a `project.inf` index plus the bundles
//! (extracted log archives) and stats datasets registered in it. All index
//! writes go through `ProjectManager`, which serializes them with the lock
//! client.

pub mod archive;
pub mod files;
pub mod manager;
pub mod repository;
pub mod repository_trait;
pub mod stats;
pub mod tree;
pub mod types;

pub use archive::{
    ArchiveInfo, ArchiveTool, TarZipArchiver, compress_bundle, decompress_bundle,
    extract_bundle_root, remove_bundle_dir,
};
pub use files::{FileInfo, FileNode, ReadFilter};
pub use manager::{DEFAULT_STATS_PROGRAM, ProjectManager, StatusTransition, TransitionReport};
pub use repository::{JsonIndexRepository, MemoryIndexRepository};
pub use repository_trait::IndexRepository;
pub use stats::{CommandStatsConverter, ConvertedStats, CounterSet, StatsConverter};
pub use tree::{PRIVATE_DOMAIN, ResourceTree};
pub use types::{
    ArchiveType, BundleInfo, PROJECT_INDEX_FILE, ProjectInfo, ProjectStatus, StatsInfo,
};
