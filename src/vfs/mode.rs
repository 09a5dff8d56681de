//! Permission modes
//!
//! A mode is the classic 9-bit rwx triple for owner, group and other.
//! Special bits (setuid, sticky) do not exist in this filesystem.

use serde::{Deserialize, Serialize};

/// The operation a permission check is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Execute,
}

impl Permission {
    fn shift(self) -> u16 {
        match self {
            Permission::Read => 2,
            Permission::Write => 1,
            Permission::Execute => 0,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Execute => write!(f, "execute"),
        }
    }
}

/// Which permission triple applies to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermClass {
    Owner,
    Group,
    Other,
}

impl PermClass {
    fn offset(self) -> u16 {
        match self {
            PermClass::Owner => 6,
            PermClass::Group => 3,
            PermClass::Other => 0,
        }
    }
}

/// File permission bits, always masked to 0o777
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub struct FileMode(u16);

// Stored verbatim so a corrupt image can be flagged by fsck
impl From<u16> for FileMode {
    fn from(bits: u16) -> Self {
        FileMode(bits)
    }
}

impl From<FileMode> for u16 {
    fn from(mode: FileMode) -> Self {
        mode.0
    }
}

impl FileMode {
    pub const FILE_DEFAULT: FileMode = FileMode(0o644); // rw-r--r--
    pub const DIR_DEFAULT: FileMode = FileMode(0o755); // rwxr-xr-x
    pub const SYMLINK_DEFAULT: FileMode = FileMode(0o777);

    pub fn new(bits: u16) -> Self {
        FileMode(bits & 0o777)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// False for values outside 0..=0o777 (only possible from a loaded image)
    pub fn is_valid(&self) -> bool {
        self.0 <= 0o777
    }

    /// The value with out-of-range bits dropped
    pub fn masked(&self) -> FileMode {
        FileMode::new(self.0)
    }

    /// Whether `class` is granted `perm`
    pub fn allows(&self, class: PermClass, perm: Permission) -> bool {
        self.0 & (1 << (class.offset() + perm.shift())) != 0
    }

    /// Format as symbolic string (e.g., "rwxr-xr-x")
    pub fn to_symbolic(&self) -> String {
        let mut s = String::with_capacity(9);
        for class in [PermClass::Owner, PermClass::Group, PermClass::Other] {
            s.push(if self.allows(class, Permission::Read) { 'r' } else { '-' });
            s.push(if self.allows(class, Permission::Write) { 'w' } else { '-' });
            s.push(if self.allows(class, Permission::Execute) { 'x' } else { '-' });
        }
        s
    }

    /// Parse from octal string (e.g., "755" or "0o755")
    pub fn from_octal_str(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0o").unwrap_or(s);
        if digits.is_empty() || digits.len() > 4 {
            return None;
        }
        let bits = u16::from_str_radix(digits, 8).ok()?;
        if bits > 0o777 {
            return None;
        }
        Some(FileMode(bits))
    }

    /// Apply a chmod expression: octal (`644`) or symbolic (`u+x,go-w`, `a=r`)
    pub fn apply(&self, expr: &str) -> Option<FileMode> {
        if expr.chars().all(|c| c.is_ascii_digit()) || expr.starts_with("0o") {
            return FileMode::from_octal_str(expr);
        }

        let mut bits = self.0;
        for clause in expr.split(',') {
            let op_at = clause.find(['+', '-', '='])?;
            let (who, rest) = clause.split_at(op_at);
            let op = rest.chars().next()?;
            let perms = &rest[1..];

            let mut who_mask = 0u16;
            for c in who.chars() {
                who_mask |= match c {
                    'u' => 0o700,
                    'g' => 0o070,
                    'o' => 0o007,
                    'a' => 0o777,
                    _ => return None,
                };
            }
            if who.is_empty() {
                who_mask = 0o777;
            }

            let mut perm_mask = 0u16;
            for c in perms.chars() {
                perm_mask |= match c {
                    'r' => 0o444,
                    'w' => 0o222,
                    'x' => 0o111,
                    _ => return None,
                };
            }

            let delta = who_mask & perm_mask;
            bits = match op {
                '+' => bits | delta,
                '-' => bits & !delta,
                '=' => (bits & !who_mask) | delta,
                _ => return None,
            };
        }
        Some(FileMode::new(bits))
    }
}

impl std::fmt::Display for FileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03o}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_mode_symbolic() {
        assert_eq!(FileMode::new(0o755).to_symbolic(), "rwxr-xr-x");
        assert_eq!(FileMode::new(0o644).to_symbolic(), "rw-r--r--");
        assert_eq!(FileMode::new(0o000).to_symbolic(), "---------");
        assert_eq!(FileMode::new(0o777).to_symbolic(), "rwxrwxrwx");
    }

    #[test]
    fn test_new_masks_special_bits() {
        assert_eq!(FileMode::new(0o4755).bits(), 0o755);
    }

    #[test]
    fn test_octal_parse() {
        assert_eq!(FileMode::from_octal_str("640"), Some(FileMode::new(0o640)));
        assert_eq!(FileMode::from_octal_str("0o700"), Some(FileMode::new(0o700)));
        assert_eq!(FileMode::from_octal_str("0000"), Some(FileMode::new(0)));
        assert_eq!(FileMode::from_octal_str("888"), None);
        assert_eq!(FileMode::from_octal_str("1777"), None);
        assert_eq!(FileMode::from_octal_str(""), None);
    }

    #[test]
    fn test_allows() {
        let mode = FileMode::new(0o640);
        assert!(mode.allows(PermClass::Owner, Permission::Write));
        assert!(mode.allows(PermClass::Group, Permission::Read));
        assert!(!mode.allows(PermClass::Group, Permission::Write));
        assert!(!mode.allows(PermClass::Other, Permission::Read));
    }

    #[test]
    fn test_symbolic_apply() {
        let mode = FileMode::new(0o644);
        assert_eq!(mode.apply("u+x"), Some(FileMode::new(0o744)));
        assert_eq!(mode.apply("go-r"), Some(FileMode::new(0o600)));
        assert_eq!(mode.apply("a=r"), Some(FileMode::new(0o444)));
        assert_eq!(mode.apply("+x"), Some(FileMode::new(0o755)));
        assert_eq!(mode.apply("u+x,o-r"), Some(FileMode::new(0o740)));
        assert_eq!(mode.apply("z+x"), None);
        assert_eq!(mode.apply("u+q"), None);
        assert_eq!(mode.apply("000"), Some(FileMode::new(0)));
    }

    #[test]
    fn test_serde_as_integer() {
        let json = serde_json::to_string(&FileMode::new(0o755)).unwrap();
        assert_eq!(json, "493");
        let mode: FileMode = serde_json::from_str("420").unwrap();
        assert_eq!(mode, FileMode::new(0o644));

        let bad: FileMode = serde_json::from_str("4095").unwrap();
        assert!(!bad.is_valid());
        assert_eq!(bad.masked(), FileMode::new(0o777));
    }
}
