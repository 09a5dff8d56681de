//! Filesystem consistency check
//!
//! Walks the whole tree and reports nodes whose metadata no longer makes
//! sense: symlinks whose target is gone, owners or groups that were deleted
//! from the registry, and modes outside 0..=0o777. With repair enabled,
//! stale owners and groups are reassigned to root and bad modes are masked.

use super::{Access, Node, ResolveError, ResolveOptions, Vfs};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsckIssue {
    DanglingSymlink { path: String, target: String },
    StaleOwner { path: String, owner: String },
    StaleGroup { path: String, group: String },
    InvalidMode { path: String, mode: u16 },
}

impl FsckIssue {
    pub fn code(&self) -> &'static str {
        match self {
            FsckIssue::DanglingSymlink { .. } => "DANGLING_SYMLINK",
            FsckIssue::StaleOwner { .. } => "STALE_OWNER",
            FsckIssue::StaleGroup { .. } => "STALE_GROUP",
            FsckIssue::InvalidMode { .. } => "INVALID_MODE",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FsckIssue::DanglingSymlink { path, .. }
            | FsckIssue::StaleOwner { path, .. }
            | FsckIssue::StaleGroup { path, .. }
            | FsckIssue::InvalidMode { path, .. } => path,
        }
    }

    pub fn is_repairable(&self) -> bool {
        !matches!(self, FsckIssue::DanglingSymlink { .. })
    }
}

impl fmt::Display for FsckIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsckIssue::DanglingSymlink { path, target } => {
                write!(f, "{} {} -> {}", self.code(), path, target)
            }
            FsckIssue::StaleOwner { path, owner } => write!(f, "{} {} (owner {})", self.code(), path, owner),
            FsckIssue::StaleGroup { path, group } => write!(f, "{} {} (group {})", self.code(), path, group),
            FsckIssue::InvalidMode { path, mode } => write!(f, "{} {} ({:o})", self.code(), path, mode),
        }
    }
}

/// Result of a check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsckReport {
    pub issues: Vec<FsckIssue>,
    pub repaired: usize,
    pub scanned: usize,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check the tree against the set of known users and groups
pub fn check(
    fs: &mut Vfs,
    user_exists: &dyn Fn(&str) -> bool,
    group_exists: &dyn Fn(&str) -> bool,
    repair: bool,
) -> FsckReport {
    let mut report = FsckReport::default();
    let access = Access::root();

    let mut symlinks = Vec::new();
    fs.root().walk("/", &mut |path, node| {
        report.scanned += 1;
        let meta = node.meta();
        if !user_exists(&meta.owner) {
            report.issues.push(FsckIssue::StaleOwner {
                path: path.to_string(),
                owner: meta.owner.clone(),
            });
        }
        if !group_exists(&meta.group) {
            report.issues.push(FsckIssue::StaleGroup {
                path: path.to_string(),
                group: meta.group.clone(),
            });
        }
        if !meta.mode.is_valid() {
            report.issues.push(FsckIssue::InvalidMode {
                path: path.to_string(),
                mode: meta.mode.bits(),
            });
        }
        if let Node::Symlink { target, .. } = node {
            symlinks.push((path.to_string(), target.clone()));
        }
    });

    for (path, target) in symlinks {
        match fs.resolve(&path, &access, &ResolveOptions::new().follow()) {
            Err(ResolveError::DanglingSymlink { .. } | ResolveError::TooManyLinks { .. }) => {
                report.issues.push(FsckIssue::DanglingSymlink { path, target });
            }
            _ => {}
        }
    }

    if repair {
        let fixable: Vec<FsckIssue> = report.issues.iter().filter(|i| i.is_repairable()).cloned().collect();
        let root = fs.root_mut();
        root.walk_mut("/", &mut |path, node| {
            for issue in fixable.iter().filter(|i| i.path() == path) {
                let meta = node.meta_mut();
                match issue {
                    FsckIssue::StaleOwner { .. } => meta.owner = "root".to_string(),
                    FsckIssue::StaleGroup { .. } => meta.group = "root".to_string(),
                    FsckIssue::InvalidMode { .. } => meta.mode = meta.mode.masked(),
                    FsckIssue::DanglingSymlink { .. } => {}
                }
            }
        });
        report.repaired = fixable.len();
        if report.repaired > 0 {
            log::debug!("fsck repaired {} issue(s)", report.repaired);
        }
    }

    report.issues.sort_by(|a, b| a.path().cmp(b.path()).then(a.code().cmp(b.code())));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{Credentials, FileMode, WriteMode};

    fn known(name: &str) -> bool {
        ["root", "Guest"].contains(&name)
    }

    fn fs_with_issues() -> Vfs {
        let mut fs = Vfs::with_default_layout("Guest");
        let bob = Access::new("/tmp", Credentials::new("bob", "bob", vec!["bob".into()]));
        fs.write_file("/tmp/orphan", "x", WriteMode::Overwrite, &bob).unwrap();
        fs.create_symlink("/nowhere", "/tmp/broken", &Access::root()).unwrap();
        fs
    }

    #[test]
    fn test_clean_default_tree() {
        let mut fs = Vfs::with_default_layout("Guest");
        let report = check(&mut fs, &known, &known, false);
        assert!(report.is_clean());
        assert!(report.scanned >= 6);
    }

    #[test]
    fn test_reports_issues() {
        let mut fs = fs_with_issues();
        let report = check(&mut fs, &known, &known, false);
        let codes: Vec<&str> = report.issues.iter().map(|i| i.code()).collect();
        assert_eq!(codes, vec!["DANGLING_SYMLINK", "STALE_GROUP", "STALE_OWNER"]);
        assert_eq!(report.repaired, 0);
    }

    #[test]
    fn test_repair_reassigns_to_root() {
        let mut fs = fs_with_issues();
        let report = check(&mut fs, &known, &known, true);
        assert_eq!(report.repaired, 2);

        let stat = fs.stat("/tmp/orphan", &Access::root(), false).unwrap();
        assert_eq!(stat.meta.owner, "root");
        assert_eq!(stat.meta.group, "root");

        // dangling links are reported, never removed
        let again = check(&mut fs, &known, &known, true);
        assert_eq!(again.issues.len(), 1);
    }

    #[test]
    fn test_invalid_mode_is_masked() {
        let json = r#"{"type":"directory","owner":"root","group":"root","mode":4095,"mtime":"2024-01-01T00:00:00Z","children":{}}"#;
        let mut fs = Vfs::from_json(json).unwrap();
        let report = check(&mut fs, &known, &known, true);
        assert_eq!(report.issues[0].code(), "INVALID_MODE");
        assert_eq!(fs.root().meta().mode, FileMode::new(0o777));
    }
}
