//! Build metadata captured by `build.rs` through vergen.

use std::fmt;

use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build and source control details baked into the binary.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    /// Short commit SHA, or "unknown" outside a git checkout
    pub git_sha: &'static str,
    pub git_branch: &'static str,
    pub git_commit_timestamp: &'static str,
    pub git_dirty: bool,
    pub build_timestamp: &'static str,
    pub rustc: &'static str,
    pub target: &'static str,
}

pub const BUILD: BuildInfo = BuildInfo {
    version: VERSION,
    git_sha: env!("VERGEN_GIT_SHA"),
    git_branch: env!("VERGEN_GIT_BRANCH"),
    git_commit_timestamp: env!("VERGEN_GIT_COMMIT_TIMESTAMP"),
    git_dirty: matches!(env!("VERGEN_GIT_DIRTY").as_bytes(), b"true"),
    build_timestamp: env!("VERGEN_BUILD_TIMESTAMP"),
    rustc: env!("VERGEN_RUSTC_SEMVER"),
    target: env!("VERGEN_CARGO_TARGET_TRIPLE"),
};

/// `<version> (<git_sha>[ dirty])`, logged at startup.
pub fn full_version() -> String {
    let dirty = if BUILD.git_dirty { " dirty" } else { "" };
    format!("{} ({}{dirty})", BUILD.version, BUILD.git_sha)
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tagging-server {}", self.version)?;
        writeln!(f, "commit: {} ({})", self.git_sha, self.git_commit_timestamp)?;
        writeln!(f, "branch: {}", self.git_branch)?;
        writeln!(f, "built:  {}", self.build_timestamp)?;
        writeln!(f, "rustc:  {}", self.rustc)?;
        write!(f, "target: {}", self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_starts_with_crate_version() {
        assert!(full_version().starts_with(VERSION));
        assert!(BUILD.to_string().starts_with("tagging-server "));
    }
}
