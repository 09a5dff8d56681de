//! User and Group Management
//!
//! Provides Unix-like user and group abstractions:
//! - User table (name → password digest, primary group)
//! - Group table (name → members)
//! - Password hashing with salted key stretching
//!
//! # Security
//!
//! Passwords are hashed using salted, iterated SHA-256:
//! - 16-byte cryptographically random salt per password
//! - 10,000 rounds of hashing to slow brute-force attacks
//! - Stored as "salt_hex:hash_hex"

use crate::vfs::Credentials;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

pub const ROOT: &str = "root";
pub const GUEST: &str = "Guest";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("user '{0}' already exists")]
    UserExists(String),
    #[error("user '{0}' does not exist")]
    UserNotFound(String),
    #[error("group '{0}' already exists")]
    GroupExists(String),
    #[error("group '{0}' does not exist")]
    GroupNotFound(String),
    #[error("group '{group}' is the primary group of user '{user}'")]
    GroupInUse { group: String, user: String },
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("'{0}' is a reserved account")]
    Reserved(String),
    #[error("no session to return to")]
    NoParentSession,
}

/// Entry in the credentials table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// None = no password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub primary_group: String,
}

impl UserRecord {
    pub fn new(primary_group: &str) -> Self {
        Self {
            password_hash: None,
            primary_group: primary_group.to_string(),
        }
    }

    /// Check password against stored hash.
    /// Accounts without a password accept anything.
    pub fn check_password(&self, password: &str) -> bool {
        match &self.password_hash {
            None => true,
            Some(hash) => verify_password(password, hash),
        }
    }

    /// Set or clear the password. An empty password clears it.
    pub fn set_password(&mut self, password: Option<&str>) {
        self.password_hash = match password {
            Some(p) if !p.is_empty() => Some(hash_password(p)),
            _ => None,
        };
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Names must be non-empty and usable as path components
pub fn validate_name(name: &str) -> Result<(), SessionError> {
    let ok = !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !name.starts_with('-')
        && name != "."
        && name != "..";
    if ok {
        Ok(())
    } else {
        Err(SessionError::InvalidName(name.to_string()))
    }
}

/// User and group database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDb {
    users: BTreeMap<String, UserRecord>,
    groups: BTreeMap<String, Vec<String>>,
    dirty: bool,
}

impl Default for UserDb {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDb {
    /// Create an empty user database (no default users)
    pub fn empty() -> Self {
        Self {
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Database holding the reserved accounts
    pub fn new() -> Self {
        let mut db = Self::empty();
        db.ensure_reserved();
        db.dirty = false;
        db
    }

    /// Rebuild from the stored tables. Missing reserved accounts are recreated.
    pub fn from_tables(
        users: BTreeMap<String, UserRecord>,
        groups: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let mut db = Self {
            users,
            groups,
            dirty: false,
        };
        if db.ensure_reserved() {
            log::warn!("user table was missing reserved accounts; recreated");
        }
        db
    }

    fn ensure_reserved(&mut self) -> bool {
        let mut changed = false;
        for name in [ROOT, GUEST] {
            if !self.users.contains_key(name) {
                self.users.insert(name.to_string(), UserRecord::new(name));
                changed = true;
            }
            let members = self.groups.entry(name.to_string()).or_default();
            if !members.iter().any(|m| m == name) {
                members.push(name.to_string());
                changed = true;
            }
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn users_table(&self) -> &BTreeMap<String, UserRecord> {
        &self.users
    }

    pub fn groups_table(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    // ========== Lookups ==========

    pub fn user_exists(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn get_user(&self, name: &str) -> Option<&UserRecord> {
        self.users.get(name)
    }

    pub fn list_users(&self) -> Vec<&str> {
        self.users.keys().map(String::as_str).collect()
    }

    pub fn list_groups(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    pub fn members(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// Primary group first, then supplementary groups by name
    pub fn groups_of(&self, user: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(record) = self.users.get(user) {
            out.push(record.primary_group.clone());
        }
        for (group, members) in &self.groups {
            if members.iter().any(|m| m == user) && !out.contains(group) {
                out.push(group.clone());
            }
        }
        out
    }

    /// Credentials used for permission checks
    pub fn credentials(&self, user: &str) -> Result<Credentials, SessionError> {
        let record = self
            .users
            .get(user)
            .ok_or_else(|| SessionError::UserNotFound(user.to_string()))?;
        Ok(Credentials::new(user, &record.primary_group, self.groups_of(user)))
    }

    // ========== Authentication ==========

    pub fn authenticate(&self, user: &str, password: &str) -> Result<(), SessionError> {
        let record = self
            .users
            .get(user)
            .ok_or_else(|| SessionError::UserNotFound(user.to_string()))?;
        if record.check_password(password) {
            Ok(())
        } else {
            Err(SessionError::AuthenticationFailed)
        }
    }

    pub fn has_password(&self, user: &str) -> bool {
        self.users.get(user).is_some_and(UserRecord::has_password)
    }

    pub fn set_password(&mut self, user: &str, password: Option<&str>) -> Result<(), SessionError> {
        let record = self
            .users
            .get_mut(user)
            .ok_or_else(|| SessionError::UserNotFound(user.to_string()))?;
        record.set_password(password);
        self.dirty = true;
        Ok(())
    }

    // ========== Mutation ==========

    /// Add a new user. Without an explicit primary group, a same-named group
    /// is created (or reused) and the user joins it.
    pub fn add_user(
        &mut self,
        name: &str,
        password: Option<&str>,
        primary_group: Option<&str>,
    ) -> Result<(), SessionError> {
        validate_name(name)?;
        if self.users.contains_key(name) {
            return Err(SessionError::UserExists(name.to_string()));
        }
        let group = match primary_group {
            Some(g) if !self.groups.contains_key(g) => {
                return Err(SessionError::GroupNotFound(g.to_string()));
            }
            Some(g) => g.to_string(),
            None => name.to_string(),
        };

        let mut record = UserRecord::new(&group);
        record.set_password(password);
        self.users.insert(name.to_string(), record);

        let members = self.groups.entry(group).or_default();
        if !members.iter().any(|m| m == name) {
            members.push(name.to_string());
        }
        self.dirty = true;
        Ok(())
    }

    /// Remove a user and its memberships. The user's own group goes too when
    /// nobody else depends on it.
    pub fn remove_user(&mut self, name: &str) -> Result<(), SessionError> {
        if name == ROOT || name == GUEST {
            return Err(SessionError::Reserved(name.to_string()));
        }
        if self.users.remove(name).is_none() {
            return Err(SessionError::UserNotFound(name.to_string()));
        }
        for members in self.groups.values_mut() {
            members.retain(|m| m != name);
        }
        let own_group_unused = self.groups.get(name).is_some_and(|m| m.is_empty())
            && !self.users.values().any(|u| u.primary_group == name);
        if own_group_unused {
            self.groups.remove(name);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn add_group(&mut self, name: &str) -> Result<(), SessionError> {
        validate_name(name)?;
        if self.groups.contains_key(name) {
            return Err(SessionError::GroupExists(name.to_string()));
        }
        self.groups.insert(name.to_string(), Vec::new());
        self.dirty = true;
        Ok(())
    }

    /// Refused while any user has the group as primary group
    pub fn remove_group(&mut self, name: &str) -> Result<(), SessionError> {
        if !self.groups.contains_key(name) {
            return Err(SessionError::GroupNotFound(name.to_string()));
        }
        if let Some((user, _)) = self.users.iter().find(|(_, u)| u.primary_group == name) {
            return Err(SessionError::GroupInUse {
                group: name.to_string(),
                user: user.clone(),
            });
        }
        self.groups.remove(name);
        self.dirty = true;
        Ok(())
    }

    pub fn add_to_group(&mut self, user: &str, group: &str) -> Result<(), SessionError> {
        if !self.users.contains_key(user) {
            return Err(SessionError::UserNotFound(user.to_string()));
        }
        let members = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SessionError::GroupNotFound(group.to_string()))?;
        if !members.iter().any(|m| m == user) {
            members.push(user.to_string());
            self.dirty = true;
        }
        Ok(())
    }

    pub fn remove_from_group(&mut self, user: &str, group: &str) -> Result<(), SessionError> {
        let members = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SessionError::GroupNotFound(group.to_string()))?;
        members.retain(|m| m != user);
        self.dirty = true;
        Ok(())
    }

    pub fn set_primary_group(&mut self, user: &str, group: &str) -> Result<(), SessionError> {
        if !self.groups.contains_key(group) {
            return Err(SessionError::GroupNotFound(group.to_string()));
        }
        let record = self
            .users
            .get_mut(user)
            .ok_or_else(|| SessionError::UserNotFound(user.to_string()))?;
        record.primary_group = group.to_string();
        self.add_to_group(user, group)
    }
}

/// Password hashing configuration
const HASH_ROUNDS: u32 = 10_000;
const SALT_LENGTH: usize = 16;

/// Generate cryptographically random bytes for salt
fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    if getrandom::fill(&mut salt).is_err() {
        // Fall back to a clock-derived salt
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seed = Sha256::digest(nanos.to_le_bytes());
        salt.copy_from_slice(&seed[..SALT_LENGTH]);
    }
    salt
}

/// Hash a password with a given salt using key stretching
fn hash_with_salt(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut state: [u8; 32] = Sha256::new()
        .chain_update(salt)
        .chain_update(password.as_bytes())
        .finalize()
        .into();
    for _ in 0..HASH_ROUNDS {
        state = Sha256::new()
            .chain_update(state)
            .chain_update(salt)
            .finalize()
            .into();
    }
    state
}

/// Hash a password with a new random salt
/// Returns the hash in format "salt_hex:hash_hex"
fn hash_password(password: &str) -> String {
    let salt = generate_salt();
    let hash = hash_with_salt(password, &salt);
    format!("{}:{}", hex::encode(salt), hex::encode(hash))
}

/// Verify a password against a stored "salt_hex:hash_hex" digest
fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Some((salt_hex, expected_hex)) = stored_hash.split_once(':') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    if salt.len() != SALT_LENGTH {
        return false;
    }
    let computed_hex = hex::encode(hash_with_salt(password, &salt));
    constant_time_compare(&computed_hex, expected_hex)
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_db_default_users() {
        let db = UserDb::new();
        assert!(db.user_exists("root"));
        assert!(db.user_exists("Guest"));
        assert_eq!(db.groups_of("Guest"), vec!["Guest"]);
        assert!(!db.has_password("root"));
        assert!(!db.is_dirty());
    }

    #[test]
    fn test_add_user() {
        let mut db = UserDb::new();
        db.add_user("alice", Some("secret"), None).unwrap();
        assert!(db.group_exists("alice"));
        assert_eq!(db.get_user("alice").unwrap().primary_group, "alice");
        assert!(matches!(
            db.add_user("alice", None, None),
            Err(SessionError::UserExists(_))
        ));
        assert!(matches!(db.add_user("", None, None), Err(SessionError::InvalidName(_))));
        assert!(db.is_dirty());
    }

    #[test]
    fn test_password() {
        let mut db = UserDb::new();
        db.add_user("alice", Some("secret"), None).unwrap();
        assert!(db.authenticate("alice", "secret").is_ok());
        assert_eq!(
            db.authenticate("alice", "wrong"),
            Err(SessionError::AuthenticationFailed)
        );
        assert!(matches!(
            db.authenticate("nobody", "x"),
            Err(SessionError::UserNotFound(_))
        ));

        db.set_password("alice", Some("")).unwrap();
        assert!(!db.has_password("alice"));
        assert!(db.authenticate("alice", "anything").is_ok());
    }

    #[test]
    fn test_password_hash_format() {
        let mut record = UserRecord::new("x");
        record.set_password(Some("pw"));
        let hash = record.password_hash.clone().unwrap();
        let (salt, digest) = hash.split_once(':').unwrap();
        assert_eq!(salt.len(), SALT_LENGTH * 2);
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_password_uniqueness() {
        let mut a = UserRecord::new("x");
        let mut b = UserRecord::new("x");
        a.set_password(Some("same"));
        b.set_password(Some("same"));
        assert_ne!(a.password_hash, b.password_hash);
        assert!(a.check_password("same") && b.check_password("same"));
    }

    #[test]
    fn test_malformed_hash_rejects() {
        assert!(!verify_password("x", "nocolon"));
        assert!(!verify_password("x", "zz:00"));
    }

    #[test]
    fn test_group_in_use() {
        let mut db = UserDb::new();
        db.add_user("bob", None, None).unwrap();
        assert!(matches!(
            db.remove_group("bob"),
            Err(SessionError::GroupInUse { .. })
        ));
        db.add_group("staff").unwrap();
        db.add_to_group("bob", "staff").unwrap();
        assert_eq!(db.groups_of("bob"), vec!["bob", "staff"]);
        db.remove_group("staff").unwrap();
        assert_eq!(db.groups_of("bob"), vec!["bob"]);
    }

    #[test]
    fn test_remove_user_drops_own_group() {
        let mut db = UserDb::new();
        db.add_user("carol", None, None).unwrap();
        db.remove_user("carol").unwrap();
        assert!(!db.user_exists("carol"));
        assert!(!db.group_exists("carol"));
        assert!(matches!(db.remove_user("Guest"), Err(SessionError::Reserved(_))));
    }

    #[test]
    fn test_tables_roundtrip() {
        let mut db = UserDb::new();
        db.add_user("dave", Some("pw"), None).unwrap();
        let users = serde_json::to_string(db.users_table()).unwrap();
        let groups = serde_json::to_string(db.groups_table()).unwrap();
        assert!(users.contains("primaryGroup"));

        let restored = UserDb::from_tables(
            serde_json::from_str(&users).unwrap(),
            serde_json::from_str(&groups).unwrap(),
        );
        assert_eq!(restored.users_table(), db.users_table());
        assert_eq!(restored.groups_table(), db.groups_table());
        assert!(restored.authenticate("dave", "pw").is_ok());
    }

    #[test]
    fn test_credentials() {
        let mut db = UserDb::new();
        db.add_group("devs").unwrap();
        db.add_to_group("Guest", "devs").unwrap();
        let cred = db.credentials("Guest").unwrap();
        assert_eq!(cred.primary_group, "Guest");
        assert!(cred.in_group("devs"));
    }
}
