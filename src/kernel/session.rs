//! Login sessions
//!
//! A session is the per-login state: user, cwd, environment, aliases,
//! history and the last exit status. Sessions stack: `su` pushes, `logout`
//! pops and the parent comes back exactly as it was left. `login` replaces
//! the whole stack.
//!
//! Environment, aliases and history also survive across logins through
//! per-user profiles, which is what gets persisted.

use super::users::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Variables the session owns; never persisted
const SESSION_VARS: &[&str] = &["USER", "HOME", "PWD", "OLDPWD"];

/// Persisted per-user state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub env: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, String>,
    pub history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user: String,
    home: String,
    cwd: String,
    env: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
    history: Vec<String>,
    last_status: i32,
    dirty: bool,
}

impl Session {
    pub fn new(user: &str, home: &str, profile: Profile) -> Self {
        let mut env = profile.env;
        env.insert("USER".to_string(), user.to_string());
        env.insert("HOME".to_string(), home.to_string());
        env.insert("PWD".to_string(), home.to_string());
        Self {
            user: user.to_string(),
            home: home.to_string(),
            cwd: home.to_string(),
            env,
            aliases: profile.aliases,
            history: profile.history,
            last_status: 0,
            dirty: false,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Change directory; the caller has already resolved `path`
    pub fn set_cwd(&mut self, path: &str) {
        let old = std::mem::replace(&mut self.cwd, path.to_string());
        self.env.insert("OLDPWD".to_string(), old);
        self.env.insert("PWD".to_string(), path.to_string());
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.env.insert(name.to_string(), value.to_string());
        self.dirty = true;
    }

    pub fn unset_var(&mut self, name: &str) -> bool {
        let removed = self.env.remove(name).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn set_alias(&mut self, name: &str, body: &str) {
        self.aliases.insert(name.to_string(), body.to_string());
        self.dirty = true;
    }

    pub fn remove_alias(&mut self, name: &str) -> bool {
        let removed = self.aliases.remove(name).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn clear_aliases(&mut self) {
        if !self.aliases.is_empty() {
            self.aliases.clear();
            self.dirty = true;
        }
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Append a line, skipping blanks and immediate repeats. Oldest entries
    /// fall off past `limit`.
    pub fn record(&mut self, line: &str, limit: usize) {
        let line = line.trim();
        if line.is_empty() || self.history.last().is_some_and(|l| l == line) {
            return;
        }
        self.history.push(line.to_string());
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
        self.dirty = true;
    }

    pub fn clear_history(&mut self) {
        if !self.history.is_empty() {
            self.history.clear();
            self.dirty = true;
        }
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn set_last_status(&mut self, code: i32) {
        self.last_status = code;
    }

    /// The persistable part of this session
    pub fn profile(&self) -> Profile {
        let env = self
            .env
            .iter()
            .filter(|(k, _)| !SESSION_VARS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Profile {
            env,
            aliases: self.aliases.clone(),
            history: self.history.clone(),
        }
    }
}

/// The session stack plus stored profiles of users not currently active
#[derive(Debug, Clone)]
pub struct SessionManager {
    current: Session,
    parents: Vec<Session>,
    profiles: BTreeMap<String, Profile>,
    dirty: bool,
}

impl SessionManager {
    pub fn new(user: &str, home: &str, profiles: BTreeMap<String, Profile>) -> Self {
        let profile = profiles.get(user).cloned().unwrap_or_default();
        Self {
            current: Session::new(user, home, profile),
            parents: Vec::new(),
            profiles,
            dirty: false,
        }
    }

    /// Build from the three persisted maps (aliases, environment, history)
    pub fn from_tables(
        user: &str,
        home: &str,
        aliases: BTreeMap<String, BTreeMap<String, String>>,
        env: BTreeMap<String, BTreeMap<String, String>>,
        history: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let mut profiles: BTreeMap<String, Profile> = BTreeMap::new();
        for (user, map) in aliases {
            profiles.entry(user).or_default().aliases = map;
        }
        for (user, map) in env {
            profiles.entry(user).or_default().env = map;
        }
        for (user, list) in history {
            profiles.entry(user).or_default().history = list;
        }
        Self::new(user, home, profiles)
    }

    pub fn current(&self) -> &Session {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Session {
        &mut self.current
    }

    /// Number of sessions on the stack
    pub fn depth(&self) -> usize {
        self.parents.len() + 1
    }

    /// Users on the stack, outermost first
    pub fn users(&self) -> Vec<&str> {
        self.parents
            .iter()
            .chain(std::iter::once(&self.current))
            .map(Session::user)
            .collect()
    }

    fn stash(&mut self, session: &Session) {
        self.profiles.insert(session.user.clone(), session.profile());
        self.dirty |= session.dirty;
    }

    fn open(&self, user: &str, home: &str) -> Session {
        let profile = self.profiles.get(user).cloned().unwrap_or_default();
        Session::new(user, home, profile)
    }

    /// `su`: start a session on top of the current one
    pub fn push(&mut self, user: &str, home: &str) {
        let snapshot = self.current.clone();
        self.stash(&snapshot);
        let next = self.open(user, home);
        let prev = std::mem::replace(&mut self.current, next);
        self.parents.push(prev);
        log::debug!("session pushed: {} (depth {})", user, self.depth());
    }

    /// `logout`: return to the parent session
    pub fn pop(&mut self) -> Result<&Session, SessionError> {
        let parent = self.parents.pop().ok_or(SessionError::NoParentSession)?;
        let finished = std::mem::replace(&mut self.current, parent);
        self.stash(&finished);
        log::debug!(
            "session popped: {} -> {} (depth {})",
            finished.user,
            self.current.user,
            self.depth()
        );
        Ok(&self.current)
    }

    /// `login`: discard the stack and start fresh as `user`
    pub fn replace(&mut self, user: &str, home: &str) {
        let sessions: Vec<Session> = self.parents.drain(..).collect();
        for s in &sessions {
            self.stash(s);
        }
        let current = self.current.clone();
        self.stash(&current);
        self.current = self.open(user, home);
        log::debug!("session replaced: {}", user);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.current.dirty || self.parents.iter().any(|s| s.dirty)
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.current.dirty = false;
        for s in &mut self.parents {
            s.dirty = false;
        }
    }

    /// Stored profiles overlaid with the live sessions (innermost wins)
    pub fn profiles(&self) -> BTreeMap<String, Profile> {
        let mut out = self.profiles.clone();
        for s in self.parents.iter().chain(std::iter::once(&self.current)) {
            out.insert(s.user.clone(), s.profile());
        }
        out
    }

    pub fn aliases_table(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.profiles()
            .into_iter()
            .map(|(u, p)| (u, p.aliases))
            .collect()
    }

    pub fn environment_table(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.profiles().into_iter().map(|(u, p)| (u, p.env)).collect()
    }

    pub fn history_table(&self) -> BTreeMap<String, Vec<String>> {
        self.profiles()
            .into_iter()
            .map(|(u, p)| (u, p.history))
            .collect()
    }

    /// Forget a deleted user's stored profile
    pub fn forget(&mut self, user: &str) {
        if self.profiles.remove(user).is_some() {
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new("Guest", "/home/Guest", BTreeMap::new())
    }

    #[test]
    fn test_new_session_env() {
        let m = manager();
        let s = m.current();
        assert_eq!(s.user(), "Guest");
        assert_eq!(s.cwd(), "/home/Guest");
        assert_eq!(s.var("USER"), Some("Guest"));
        assert_eq!(s.var("HOME"), Some("/home/Guest"));
        assert_eq!(s.var("PWD"), Some("/home/Guest"));
    }

    #[test]
    fn test_history_bounds_and_dedup() {
        let mut s = Session::new("Guest", "/home/Guest", Profile::default());
        s.record("ls", 3);
        s.record("ls", 3);
        s.record("   ", 3);
        s.record("pwd", 3);
        s.record("whoami", 3);
        s.record("echo hi", 3);
        assert_eq!(s.history(), &["pwd", "whoami", "echo hi"]);
    }

    #[test]
    fn test_push_pop_restores_state() {
        let mut m = manager();
        m.current_mut().set_cwd("/tmp");
        m.current_mut().set_var("FOO", "guest");
        m.current_mut().record("cd /tmp", 100);

        m.push("root", "/root");
        assert_eq!(m.current().user(), "root");
        assert_eq!(m.current().var("FOO"), None);
        m.current_mut().set_var("FOO", "root");
        m.current_mut().set_cwd("/etc");

        m.push("alice", "/home/alice");
        assert_eq!(m.depth(), 3);
        assert_eq!(m.users(), vec!["Guest", "root", "alice"]);

        assert_eq!(m.pop().unwrap().user(), "root");
        assert_eq!(m.current().cwd(), "/etc");
        assert_eq!(m.current().var("FOO"), Some("root"));

        assert_eq!(m.pop().unwrap().user(), "Guest");
        assert_eq!(m.current().cwd(), "/tmp");
        assert_eq!(m.current().var("FOO"), Some("guest"));
        assert_eq!(m.current().history(), &["cd /tmp"]);

        assert_eq!(m.pop().unwrap_err(), SessionError::NoParentSession);
    }

    #[test]
    fn test_profile_survives_relogin() {
        let mut m = manager();
        m.push("alice", "/home/alice");
        m.current_mut().set_alias("ll", "ls -l");
        m.pop().unwrap();
        m.replace("alice", "/home/alice");
        assert_eq!(m.depth(), 1);
        assert_eq!(m.current().alias("ll"), Some("ls -l"));
    }

    #[test]
    fn test_tables_exclude_session_vars() {
        let mut m = manager();
        m.current_mut().set_var("EDITOR", "vi");
        let env = m.environment_table();
        let guest = &env["Guest"];
        assert_eq!(guest.get("EDITOR").map(String::as_str), Some("vi"));
        assert!(!guest.contains_key("USER"));
        assert!(!guest.contains_key("PWD"));
        assert!(m.is_dirty());
        m.mark_clean();
        assert!(!m.is_dirty());
    }

    #[test]
    fn test_from_tables() {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "Guest".to_string(),
            BTreeMap::from([("la".to_string(), "ls -a".to_string())]),
        );
        let mut history = BTreeMap::new();
        history.insert("Guest".to_string(), vec!["ls".to_string()]);
        let m = SessionManager::from_tables("Guest", "/home/Guest", aliases, BTreeMap::new(), history);
        assert_eq!(m.current().alias("la"), Some("ls -a"));
        assert_eq!(m.current().history(), &["ls"]);
    }
}
