//! On-disk layout of the repository
//!
//! ```text
//! <root>/<domain>/<project>/project.inf
//! <root>/<domain>/<project>/<bundle>/            (decompressed)
//! <root>/<domain>/<project>/<bundle>.tgz|.zip    (compressed or preserved)
//! <root>/<domain>/<project>/<stats><type>
//! ```
//!
//! The `private` domain is stored under the user's own name.

use super::types::{ArchiveType, PROJECT_INDEX_FILE};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Domain that maps to a per-user directory
pub const PRIVATE_DOMAIN: &str = "private";

#[derive(Debug, Clone)]
pub struct ResourceTree {
    root: PathBuf,
    domains: Vec<String>,
}

impl ResourceTree {
    pub fn new(root: impl Into<PathBuf>, domains: Vec<String>) -> Self {
        Self {
            root: root.into(),
            domains,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// The domain must be one of the configured names
    pub fn validate_domain(&self, domain: &str) -> Result<()> {
        if self.domains.iter().any(|d| d == domain) {
            Ok(())
        } else {
            Err(Error::InvalidDomain(domain.to_string()))
        }
    }

    /// Project names are restricted to `[0-9a-zA-Z#@_+-]+`
    pub fn validate_project_name(project: &str) -> Result<()> {
        let valid = !project.is_empty()
            && project
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '_' | '+' | '-'));
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidProjectName(project.to_string()))
        }
    }

    /// Bundle and stats names become path components
    pub fn is_safe_entry_name(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && name != PROJECT_INDEX_FILE
    }

    fn domain_component<'a>(user: &'a str, domain: &'a str) -> &'a str {
        if domain == PRIVATE_DOMAIN { user } else { domain }
    }

    pub fn domain_dir(&self, user: &str, domain: &str) -> PathBuf {
        self.root.join(Self::domain_component(user, domain))
    }

    pub fn project_dir(&self, user: &str, domain: &str, project: &str) -> PathBuf {
        self.domain_dir(user, domain).join(project)
    }

    pub fn index_path(&self, user: &str, domain: &str, project: &str) -> PathBuf {
        self.project_dir(user, domain, project).join(PROJECT_INDEX_FILE)
    }

    /// Lock key guarding a project's index: its path relative to the root
    pub fn lock_key(user: &str, domain: &str, project: &str) -> String {
        format!(
            "{}/{}/{}",
            Self::domain_component(user, domain),
            project,
            PROJECT_INDEX_FILE
        )
    }

    pub fn bundle_dir(&self, user: &str, domain: &str, project: &str, name: &str) -> PathBuf {
        self.project_dir(user, domain, project).join(name)
    }

    pub fn bundle_archive(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        name: &str,
        kind: ArchiveType,
    ) -> PathBuf {
        self.project_dir(user, domain, project).join(kind.file_name(name))
    }

    /// Any file inside the project directory (uploads, stats datasets)
    pub fn project_file(&self, user: &str, domain: &str, project: &str, file: &str) -> PathBuf {
        self.project_dir(user, domain, project).join(file)
    }
}
