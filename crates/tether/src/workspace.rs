//! Remote workspace naming
//!
//! Each local project maps to `<root>/<basename>-<hash>` on the remote host,
//! where `hash` is the first 12 hex digits of the MD5 of the absolute local
//! path. The format is stable across releases: changing it would orphan
//! every existing workspace.

use crate::Result;
use std::fmt;
use std::path::{Path, PathBuf};

/// Remote directory holding every workspace, relative to the login home
pub const WORKSPACES_ROOT: &str = ".tether/workspaces";

const HASH_LEN: usize = 12;

/// Remote directory mirroring one local project
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteWorkspace {
    local: PathBuf,
    remote: String,
}

impl RemoteWorkspace {
    /// Workspace for `local_dir`, made absolute against the current directory
    pub fn for_local_dir(local_dir: &Path) -> Result<Self> {
        let absolute = std::path::absolute(local_dir)?;
        Ok(Self::for_absolute(&absolute))
    }

    /// Workspace for an already absolute path
    pub fn for_absolute(absolute: &Path) -> Self {
        let path = absolute.to_string_lossy();
        let digest = format!("{:x}", md5::compute(path.as_bytes()));
        let name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            local: absolute.to_path_buf(),
            remote: format!("{}/{}-{}", WORKSPACES_ROOT, name, &digest[..HASH_LEN]),
        }
    }

    /// Absolute local directory
    pub fn local(&self) -> &Path {
        &self.local
    }

    /// Remote path, relative to the login home
    pub fn remote(&self) -> &str {
        &self.remote
    }
}

impl fmt::Display for RemoteWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}
