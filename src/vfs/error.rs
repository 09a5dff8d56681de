//! Filesystem errors

use thiserror::Error;

/// Failure to turn a path into a node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{path}: No such file or directory")]
    NoSuchPathComponent { path: String },
    #[error("{path}: Not a directory")]
    NotADirectory { path: String },
    #[error("{path}: Not a file")]
    NotAFile { path: String },
    #[error("{path}: Dangling symbolic link")]
    DanglingSymlink { path: String },
    #[error("{path}: Permission denied")]
    PermissionDenied { path: String },
    #[error("{path}: Too many levels of symbolic links")]
    TooManyLinks { path: String },
}

impl ResolveError {
    pub fn no_such(path: impl Into<String>) -> Self {
        ResolveError::NoSuchPathComponent { path: path.into() }
    }

    pub fn denied(path: impl Into<String>) -> Self {
        ResolveError::PermissionDenied { path: path.into() }
    }

    pub fn not_dir(path: impl Into<String>) -> Self {
        ResolveError::NotADirectory { path: path.into() }
    }

    pub fn not_file(path: impl Into<String>) -> Self {
        ResolveError::NotAFile { path: path.into() }
    }

    /// The path the error refers to
    pub fn path(&self) -> &str {
        match self {
            ResolveError::NoSuchPathComponent { path }
            | ResolveError::NotADirectory { path }
            | ResolveError::NotAFile { path }
            | ResolveError::DanglingSymlink { path }
            | ResolveError::PermissionDenied { path }
            | ResolveError::TooManyLinks { path } => path,
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, ResolveError::PermissionDenied { .. })
    }
}

/// Failure of a filesystem mutation or read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{path}: File exists")]
    AlreadyExists { path: String },
    #[error("{path}: Directory not empty")]
    NotEmpty { path: String },
    #[error("{path}: Is a directory")]
    IsADirectory { path: String },
    #[error("{0}")]
    Invalid(String),
    #[error("filesystem image is corrupt: {0}")]
    Corrupt(String),
}

impl FsError {
    pub fn denied(path: impl Into<String>) -> Self {
        FsError::Resolve(ResolveError::denied(path))
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, FsError::Resolve(e) if e.is_permission())
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_path() {
        let err = ResolveError::no_such("/tmp/x");
        assert_eq!(err.to_string(), "/tmp/x: No such file or directory");
        assert_eq!(err.path(), "/tmp/x");

        let err: FsError = ResolveError::denied("/root").into();
        assert_eq!(err.to_string(), "/root: Permission denied");
        assert!(err.is_permission());
    }
}
