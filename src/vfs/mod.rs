//! Virtual File System
//!
//! An in-memory tree of nodes (file, directory, symlink) with owner, group,
//! mode and mtime. The tree owns every node; paths are resolved by walking
//! from the root, so no node holds a pointer to its parent.
//!
//! Every operation takes an [`Access`] describing who is asking and from
//! which working directory. Root bypasses permission checks.
//!
//! Nothing here hands out references that outlive a call: callers re-resolve
//! after every suspension point.

pub mod error;
pub mod fsck;
pub mod glob;
pub mod mode;
pub mod node;
pub mod path;
pub mod persist;

pub use error::{FsError, FsResult, ResolveError};
pub use mode::{FileMode, PermClass, Permission};
pub use node::{Node, NodeKind, NodeMeta};
pub use persist::{Persister, SaveOutcome};

use chrono::{DateTime, Utc};

/// Default depth limit when following symlinks
pub const MAX_SYMLINK_DEPTH: usize = 40;

/// Who is performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub primary_group: String,
    /// Primary and supplementary groups
    pub groups: Vec<String>,
}

impl Credentials {
    pub fn new(user: &str, primary_group: &str, groups: Vec<String>) -> Self {
        Self {
            user: user.to_string(),
            primary_group: primary_group.to_string(),
            groups,
        }
    }

    pub fn root() -> Self {
        Self::new("root", "root", vec!["root".to_string()])
    }

    pub fn is_root(&self) -> bool {
        self.user == "root"
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.primary_group == group || self.groups.iter().any(|g| g == group)
    }
}

/// Credentials plus the working directory relative paths resolve against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub cwd: String,
    pub cred: Credentials,
}

impl Access {
    pub fn new(cwd: impl Into<String>, cred: Credentials) -> Self {
        Self {
            cwd: cwd.into(),
            cred,
        }
    }

    pub fn root() -> Self {
        Self::new("/", Credentials::root())
    }
}

/// How the resolver should treat a path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// A missing final component is not an error
    pub allow_missing: bool,
    /// Expected node type after dereferencing
    pub expect: Option<NodeKind>,
    /// Permissions required on the final node
    pub require: Vec<Permission>,
    /// Dereference a symlink in the final component
    pub follow: bool,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }

    pub fn expect(mut self, kind: NodeKind) -> Self {
        self.expect = Some(kind);
        self
    }

    pub fn require(mut self, perm: Permission) -> Self {
        self.require.push(perm);
        self
    }

    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical absolute path
    pub path: String,
    /// None when the final component is missing and that was allowed
    pub kind: Option<NodeKind>,
}

impl Resolved {
    pub fn exists(&self) -> bool {
        self.kind.is_some()
    }
}

/// Whether new content replaces or extends a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Options for recursive deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub force: bool,
}

/// Summary of a node for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    pub meta: NodeMeta,
    pub size: usize,
    pub target: Option<String>,
}

impl Stat {
    fn of(name: &str, path: &str, node: &Node) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: node.kind(),
            meta: node.meta().clone(),
            size: node.size(),
            target: match node {
                Node::Symlink { target, .. } => Some(target.clone()),
                _ => None,
            },
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// The filesystem tree
#[derive(Debug, Clone, PartialEq)]
pub struct Vfs {
    root: Node,
    dirty: bool,
    max_symlink_depth: usize,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// A tree holding only `/` (root:root, 0o755)
    pub fn new() -> Self {
        Self {
            root: Node::directory("root", "root", FileMode::DIR_DEFAULT, now()),
            dirty: false,
            max_symlink_depth: MAX_SYMLINK_DEPTH,
        }
    }

    /// The tree a fresh installation boots with
    pub fn with_default_layout(default_user: &str) -> Self {
        let mut fs = Self::new();
        let t = now();
        let dirs = [
            ("home", Node::directory("root", "root", FileMode::DIR_DEFAULT, t)),
            ("root", Node::directory("root", "root", FileMode::new(0o700), t)),
            ("tmp", Node::directory("root", "root", FileMode::new(0o777), t)),
            ("etc", Node::directory("root", "root", FileMode::DIR_DEFAULT, t)),
        ];
        if let Some(children) = fs.root.children_mut() {
            for (name, node) in dirs {
                children.insert(name.to_string(), node);
            }
        }
        fs.ensure_home(default_user, default_user);
        fs.dirty = true;
        fs
    }

    pub fn from_root(root: Node) -> FsResult<Self> {
        if !root.is_dir() {
            return Err(FsError::Corrupt("root is not a directory".into()));
        }
        Ok(Self {
            root,
            dirty: false,
            max_symlink_depth: MAX_SYMLINK_DEPTH,
        })
    }

    pub fn set_max_symlink_depth(&mut self, depth: usize) {
        self.max_symlink_depth = depth;
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        self.dirty = true;
        &mut self.root
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Home directory for a user
    pub fn home_of(user: &str) -> String {
        if user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", user)
        }
    }

    /// Create `/home/<user>` if missing. Returns true if created.
    pub fn ensure_home(&mut self, user: &str, group: &str) -> bool {
        if user == "root" {
            return false;
        }
        let t = now();
        let Some(home) = self
            .node_mut("/home")
            .and_then(|n| n.children_mut())
        else {
            return false;
        };
        if home.contains_key(user) {
            return false;
        }
        home.insert(
            user.to_string(),
            Node::directory(user, group, FileMode::DIR_DEFAULT, t),
        );
        if let Some(dir) = self.node_mut("/home") {
            dir.touch(t);
        }
        self.dirty = true;
        true
    }

    // ========== Permission checks ==========

    /// Which permission triple applies to `cred` for `node`
    pub fn perm_class(node: &Node, cred: &Credentials) -> PermClass {
        let meta = node.meta();
        if meta.owner == cred.user {
            PermClass::Owner
        } else if cred.in_group(&meta.group) {
            PermClass::Group
        } else {
            PermClass::Other
        }
    }

    pub fn has_permission(node: &Node, cred: &Credentials, perm: Permission) -> bool {
        if cred.is_root() {
            return true;
        }
        node.meta().mode.allows(Self::perm_class(node, cred), perm)
    }

    /// Metadata changes (chmod, chgrp) are reserved to the owner and root
    pub fn can_user_modify(node: &Node, cred: &Credentials) -> bool {
        cred.is_root() || node.meta().owner == cred.user
    }

    /// `rwxr-xr-x` style rendering of a mode
    pub fn format_mode_string(mode: FileMode) -> String {
        mode.to_symbolic()
    }

    // ========== Resolution ==========

    /// Look up a canonical path without permission checks or dereferencing
    pub fn get_node(&self, canonical: &str) -> Option<&Node> {
        let mut current = &self.root;
        for name in path::components(canonical) {
            current = current.children()?.get(name)?;
        }
        Some(current)
    }

    fn node_mut(&mut self, canonical: &str) -> Option<&mut Node> {
        let mut current = &mut self.root;
        for name in path::components(canonical) {
            current = current.children_mut()?.get_mut(name)?;
        }
        Some(current)
    }

    /// Walk an absolute, lexically normalized path. A missing final
    /// component yields `Ok((path, None))`.
    fn walk(
        &self,
        abs: &str,
        cred: &Credentials,
        follow_final: bool,
        depth: usize,
    ) -> Result<(String, Option<&Node>), ResolveError> {
        let comps = path::components(abs);
        let mut current = &self.root;
        let mut current_path = "/".to_string();

        for (i, name) in comps.iter().enumerate() {
            let last = i + 1 == comps.len();
            let Node::Directory { children, .. } = current else {
                return Err(ResolveError::not_dir(current_path));
            };
            if !Self::has_permission(current, cred, Permission::Execute) {
                return Err(ResolveError::denied(current_path));
            }
            let child_path = path::join(&current_path, name);

            match children.get(*name) {
                None if last => return Ok((child_path, None)),
                None => return Err(ResolveError::no_such(child_path)),
                Some(Node::Symlink { target, .. }) if !last || follow_final => {
                    if depth >= self.max_symlink_depth {
                        return Err(ResolveError::TooManyLinks { path: child_path });
                    }
                    let target_abs = path::absolute(target, &current_path);
                    match self.walk(&target_abs, cred, true, depth + 1) {
                        Ok((resolved, Some(node))) => {
                            current = node;
                            current_path = resolved;
                        }
                        Ok((_, None)) | Err(ResolveError::NoSuchPathComponent { .. }) => {
                            return Err(ResolveError::DanglingSymlink { path: child_path });
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(child) => {
                    current = child;
                    current_path = child_path;
                }
            }
        }

        Ok((current_path, Some(current)))
    }

    /// Resolve a user-supplied path
    pub fn resolve(
        &self,
        path: &str,
        access: &Access,
        opts: &ResolveOptions,
    ) -> Result<Resolved, ResolveError> {
        let abs = path::absolute(path, &access.cwd);
        let (canonical, node) = self.walk(&abs, &access.cred, opts.follow, 0)?;

        let Some(node) = node else {
            if opts.allow_missing {
                return Ok(Resolved {
                    path: canonical,
                    kind: None,
                });
            }
            return Err(ResolveError::no_such(abs));
        };

        match (opts.expect, node.kind()) {
            (Some(NodeKind::File), NodeKind::Directory) => {
                return Err(ResolveError::not_file(canonical));
            }
            (Some(NodeKind::Directory), NodeKind::File | NodeKind::Symlink) => {
                return Err(ResolveError::not_dir(canonical));
            }
            _ => {}
        }

        for perm in &opts.require {
            if !Self::has_permission(node, &access.cred, *perm) {
                return Err(ResolveError::denied(canonical));
            }
        }

        Ok(Resolved {
            path: canonical,
            kind: Some(node.kind()),
        })
    }

    /// Resolve, then require the target to exist
    fn resolve_existing(&self, path: &str, access: &Access, opts: &ResolveOptions) -> FsResult<String> {
        let resolved = self.resolve(path, access, opts)?;
        if !resolved.exists() {
            return Err(ResolveError::no_such(resolved.path).into());
        }
        Ok(resolved.path)
    }

    // ========== Reading ==========

    pub fn stat(&self, path: &str, access: &Access, follow: bool) -> FsResult<Stat> {
        let mut opts = ResolveOptions::new();
        opts.follow = follow;
        let canonical = self.resolve_existing(path, access, &opts)?;
        let node = self
            .get_node(&canonical)
            .ok_or_else(|| ResolveError::no_such(canonical.clone()))?;
        Ok(Stat::of(path::basename(&canonical), &canonical, node))
    }

    pub fn exists(&self, path: &str, access: &Access) -> bool {
        matches!(
            self.resolve(path, access, &ResolveOptions::new().allow_missing()),
            Ok(r) if r.exists()
        )
    }

    pub fn read_file(&self, path: &str, access: &Access) -> FsResult<String> {
        let opts = ResolveOptions::new()
            .follow()
            .expect(NodeKind::File)
            .require(Permission::Read);
        let canonical = self.resolve_existing(path, access, &opts)?;
        match self.get_node(&canonical) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            _ => Err(ResolveError::not_file(canonical).into()),
        }
    }

    pub fn read_link(&self, path: &str, access: &Access) -> FsResult<String> {
        let canonical = self.resolve_existing(path, access, &ResolveOptions::new())?;
        match self.get_node(&canonical) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            _ => Err(FsError::Invalid(format!("{}: Not a symbolic link", canonical))),
        }
    }

    /// Directory entries, sorted by name
    pub fn list_dir(&self, path: &str, access: &Access) -> FsResult<Vec<Stat>> {
        let opts = ResolveOptions::new()
            .follow()
            .expect(NodeKind::Directory)
            .require(Permission::Read);
        let canonical = self.resolve_existing(path, access, &opts)?;
        let children = self
            .get_node(&canonical)
            .and_then(Node::children)
            .ok_or_else(|| ResolveError::not_dir(canonical.clone()))?;
        Ok(children
            .iter()
            .map(|(name, node)| Stat::of(name, &path::join(&canonical, name), node))
            .collect())
    }

    /// Names in a canonical directory, skipping directories the user cannot read
    pub fn child_names(&self, canonical: &str, cred: &Credentials) -> Vec<(String, NodeKind)> {
        match self.get_node(canonical) {
            Some(node @ Node::Directory { children, .. })
                if Self::has_permission(node, cred, Permission::Read) =>
            {
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.kind()))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Byte size of a node or subtree
    pub fn node_size(&self, path: &str, access: &Access) -> FsResult<usize> {
        let canonical = self.resolve_existing(path, access, &ResolveOptions::new())?;
        Ok(self.get_node(&canonical).map(Node::size).unwrap_or(0))
    }

    // ========== Mutation ==========

    fn touch_at(&mut self, canonical: &str, t: DateTime<Utc>) {
        if let Some(node) = self.node_mut(canonical) {
            node.touch(t);
        }
    }

    /// Insert a new node under an existing directory, checking write access
    fn insert_child(&mut self, parent: &str, name: &str, node: Node, cred: &Credentials) -> FsResult<()> {
        let dir = self
            .get_node(parent)
            .ok_or_else(|| ResolveError::no_such(parent.to_string()))?;
        let Node::Directory { children, .. } = dir else {
            return Err(ResolveError::not_dir(parent.to_string()).into());
        };
        if !Self::has_permission(dir, cred, Permission::Write) {
            return Err(FsError::denied(parent));
        }
        if children.contains_key(name) {
            return Err(FsError::AlreadyExists {
                path: path::join(parent, name),
            });
        }

        let t = now();
        if let Some(children) = self.node_mut(parent).and_then(Node::children_mut) {
            children.insert(name.to_string(), node);
        }
        self.touch_at(parent, t);
        self.dirty = true;
        Ok(())
    }

    /// Create or update a file. Missing files are created with the caller's
    /// user and primary group and mode 0o644. The parent must exist and be
    /// writable in both cases.
    pub fn write_file(&mut self, path: &str, content: &str, mode: WriteMode, access: &Access) -> FsResult<()> {
        let resolved = self.resolve(path, access, &ResolveOptions::new().follow().allow_missing())?;

        match resolved.kind {
            Some(NodeKind::Directory) => Err(FsError::IsADirectory {
                path: resolved.path,
            }),
            Some(_) => {
                let node = self
                    .get_node(&resolved.path)
                    .ok_or_else(|| ResolveError::no_such(resolved.path.clone()))?;
                if !Self::has_permission(node, &access.cred, Permission::Write) {
                    return Err(FsError::denied(resolved.path));
                }
                let parent = path::parent(&resolved.path);
                let dir = self
                    .get_node(&parent)
                    .ok_or_else(|| ResolveError::no_such(parent.clone()))?;
                if !Self::has_permission(dir, &access.cred, Permission::Write) {
                    return Err(FsError::denied(resolved.path));
                }
                let t = now();
                if let Some(Node::File { meta, content: existing }) = self.node_mut(&resolved.path) {
                    match mode {
                        WriteMode::Overwrite => *existing = content.to_string(),
                        WriteMode::Append => existing.push_str(content),
                    }
                    meta.mtime = t;
                }
                self.dirty = true;
                Ok(())
            }
            None => {
                let parent = path::parent(&resolved.path);
                let name = path::basename(&resolved.path).to_string();
                if name.is_empty() {
                    return Err(FsError::IsADirectory { path: resolved.path });
                }
                let node = Node::file(&access.cred.user, &access.cred.primary_group, content, now());
                self.insert_child(&parent, &name, node, &access.cred)
            }
        }
    }

    /// Update mtime of an existing node or create an empty file
    pub fn touch(&mut self, path: &str, access: &Access) -> FsResult<()> {
        let resolved = self.resolve(path, access, &ResolveOptions::new().follow().allow_missing())?;
        if resolved.exists() {
            let node = self
                .get_node(&resolved.path)
                .ok_or_else(|| ResolveError::no_such(resolved.path.clone()))?;
            if !Self::can_user_modify(node, &access.cred)
                && !Self::has_permission(node, &access.cred, Permission::Write)
            {
                return Err(FsError::denied(resolved.path));
            }
            self.touch_at(&resolved.path, now());
            self.dirty = true;
            Ok(())
        } else {
            self.write_file(path, "", WriteMode::Append, access)
        }
    }

    /// Create a directory. With `parents`, missing ancestors are created and
    /// an existing directory is not an error. Returns whether anything was made.
    pub fn create_directory(&mut self, path: &str, parents: bool, access: &Access) -> FsResult<bool> {
        let abs = path::absolute(path, &access.cwd);

        if !parents {
            let resolved = self.resolve(&abs, access, &ResolveOptions::new().allow_missing())?;
            if resolved.exists() {
                return Err(FsError::AlreadyExists { path: resolved.path });
            }
            let node = Node::directory(&access.cred.user, &access.cred.primary_group, FileMode::DIR_DEFAULT, now());
            self.insert_child(
                &path::parent(&resolved.path),
                path::basename(&resolved.path),
                node,
                &access.cred,
            )?;
            return Ok(true);
        }

        let mut created = false;
        let mut prefix = String::from("/");
        for comp in path::components(&abs) {
            prefix = path::join(&prefix, comp);
            let resolved = self.resolve(&prefix, access, &ResolveOptions::new().follow().allow_missing())?;
            match resolved.kind {
                Some(NodeKind::Directory) => prefix = resolved.path,
                Some(_) => return Err(ResolveError::not_dir(resolved.path).into()),
                None => {
                    let node =
                        Node::directory(&access.cred.user, &access.cred.primary_group, FileMode::DIR_DEFAULT, now());
                    self.insert_child(&path::parent(&resolved.path), comp, node, &access.cred)?;
                    prefix = resolved.path;
                    created = true;
                }
            }
        }
        Ok(created)
    }

    pub fn create_symlink(&mut self, target: &str, link_path: &str, access: &Access) -> FsResult<()> {
        let resolved = self.resolve(link_path, access, &ResolveOptions::new().allow_missing())?;
        if resolved.exists() {
            return Err(FsError::AlreadyExists { path: resolved.path });
        }
        let node = Node::symlink(&access.cred.user, &access.cred.primary_group, target, now());
        self.insert_child(
            &path::parent(&resolved.path),
            path::basename(&resolved.path),
            node,
            &access.cred,
        )
    }

    /// Every directory in a subtree must be writable and traversable for a
    /// non-root user to remove it
    fn check_subtree_removable(node: &Node, node_path: &str, cred: &Credentials) -> FsResult<()> {
        if cred.is_root() {
            return Ok(());
        }
        if let Node::Directory { children, .. } = node {
            if !children.is_empty()
                && (!Self::has_permission(node, cred, Permission::Write)
                    || !Self::has_permission(node, cred, Permission::Execute))
            {
                return Err(FsError::denied(node_path));
            }
            for (name, child) in children {
                Self::check_subtree_removable(child, &path::join(node_path, name), cred)?;
            }
        }
        Ok(())
    }

    /// Remove a node. Symlinks are removed, never their targets.
    pub fn delete(&mut self, path: &str, opts: DeleteOptions, access: &Access) -> FsResult<()> {
        let resolved = match self.resolve(path, access, &ResolveOptions::new().allow_missing()) {
            Ok(r) => r,
            Err(ResolveError::NoSuchPathComponent { .. }) if opts.force => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !resolved.exists() {
            if opts.force {
                return Ok(());
            }
            return Err(ResolveError::no_such(resolved.path).into());
        }
        if resolved.path == "/" {
            return Err(FsError::Invalid("cannot remove '/'".into()));
        }

        let parent = path::parent(&resolved.path);
        let name = path::basename(&resolved.path).to_string();
        let parent_node = self
            .get_node(&parent)
            .ok_or_else(|| ResolveError::no_such(parent.clone()))?;
        if !Self::has_permission(parent_node, &access.cred, Permission::Write) {
            return Err(FsError::denied(parent));
        }

        let node = self
            .get_node(&resolved.path)
            .ok_or_else(|| ResolveError::no_such(resolved.path.clone()))?;
        if let Node::Directory { children, .. } = node {
            if !opts.recursive {
                return Err(FsError::IsADirectory { path: resolved.path });
            }
            if !children.is_empty() {
                Self::check_subtree_removable(node, &resolved.path, &access.cred)?;
            }
        }

        let t = now();
        if let Some(children) = self.node_mut(&parent).and_then(Node::children_mut) {
            children.remove(&name);
        }
        self.touch_at(&parent, t);
        self.dirty = true;
        Ok(())
    }

    /// Remove an empty directory
    pub fn remove_empty_dir(&mut self, path: &str, access: &Access) -> FsResult<()> {
        let canonical = self.resolve_existing(path, access, &ResolveOptions::new().expect(NodeKind::Directory))?;
        let empty = self
            .get_node(&canonical)
            .and_then(Node::children)
            .is_some_and(|c| c.is_empty());
        if !empty {
            return Err(FsError::NotEmpty { path: canonical });
        }
        self.delete(&canonical, DeleteOptions { recursive: true, force: false }, access)
    }

    /// Change the mode of a node; symlinks are changed themselves
    pub fn chmod(&mut self, path: &str, mode: FileMode, access: &Access) -> FsResult<()> {
        self.modify_meta(path, access, |meta| meta.mode = mode)
    }

    /// Change the owner of a node. Only root may give files away.
    pub fn chown(&mut self, path: &str, owner: &str, access: &Access) -> FsResult<()> {
        if !access.cred.is_root() {
            let canonical = self.resolve_existing(path, access, &ResolveOptions::new())?;
            return Err(FsError::denied(canonical));
        }
        self.modify_meta(path, access, |meta| meta.owner = owner.to_string())
    }

    /// Change the group of a node. Owners may only pick groups they belong to.
    pub fn chgrp(&mut self, path: &str, group: &str, access: &Access) -> FsResult<()> {
        if !access.cred.is_root() && !access.cred.in_group(group) {
            let canonical = self.resolve_existing(path, access, &ResolveOptions::new())?;
            return Err(FsError::denied(canonical));
        }
        self.modify_meta(path, access, |meta| meta.group = group.to_string())
    }

    fn modify_meta(&mut self, path: &str, access: &Access, apply: impl FnOnce(&mut NodeMeta)) -> FsResult<()> {
        let canonical = self.resolve_existing(path, access, &ResolveOptions::new())?;
        let node = self
            .get_node(&canonical)
            .ok_or_else(|| ResolveError::no_such(canonical.clone()))?;
        if !Self::can_user_modify(node, &access.cred) {
            return Err(FsError::denied(canonical));
        }
        let t = now();
        if let Some(node) = self.node_mut(&canonical) {
            let meta = node.meta_mut();
            apply(meta);
            meta.mtime = t;
        }
        self.dirty = true;
        Ok(())
    }

    /// Where a copy or move lands: into an existing directory, or at the path
    fn destination(&self, src_canonical: &str, dest: &str, access: &Access) -> FsResult<(String, String)> {
        let resolved = self.resolve(dest, access, &ResolveOptions::new().follow().allow_missing())?;
        match resolved.kind {
            Some(NodeKind::Directory) => Ok((resolved.path, path::basename(src_canonical).to_string())),
            Some(_) => Err(FsError::AlreadyExists { path: resolved.path }),
            None => Ok((
                path::parent(&resolved.path),
                path::basename(&resolved.path).to_string(),
            )),
        }
    }

    /// Move or rename a node
    pub fn rename(&mut self, from: &str, to: &str, access: &Access) -> FsResult<()> {
        let src = self.resolve_existing(from, access, &ResolveOptions::new())?;
        if src == "/" {
            return Err(FsError::Invalid("cannot move '/'".into()));
        }
        let (dest_parent, dest_name) = self.destination(&src, to, access)?;
        let dest = path::join(&dest_parent, &dest_name);
        if path::is_within(&dest, &src) {
            return Err(FsError::Invalid(format!(
                "cannot move '{}' to a subdirectory of itself",
                src
            )));
        }

        let src_parent = path::parent(&src);
        let src_parent_node = self
            .get_node(&src_parent)
            .ok_or_else(|| ResolveError::no_such(src_parent.clone()))?;
        if !Self::has_permission(src_parent_node, &access.cred, Permission::Write) {
            return Err(FsError::denied(src_parent));
        }
        if let Some(existing) = self.get_node(&dest_parent).and_then(Node::children)
            && existing.contains_key(&dest_name)
        {
            return Err(FsError::AlreadyExists { path: dest });
        }

        let t = now();
        let node = self
            .node_mut(&src_parent)
            .and_then(Node::children_mut)
            .and_then(|c| c.remove(path::basename(&src)))
            .ok_or_else(|| ResolveError::no_such(src.clone()))?;

        match self.insert_child(&dest_parent, &dest_name, node.clone(), &access.cred) {
            Ok(()) => {
                self.touch_at(&src_parent, t);
                Ok(())
            }
            Err(e) => {
                // put it back where it was
                if let Some(children) = self.node_mut(&src_parent).and_then(Node::children_mut) {
                    children.insert(path::basename(&src).to_string(), node);
                }
                Err(e)
            }
        }
    }

    /// Copy a file, or a directory tree with `recursive`. Copies belong to the caller.
    pub fn copy(&mut self, from: &str, to: &str, recursive: bool, access: &Access) -> FsResult<()> {
        let src = self.resolve_existing(
            from,
            access,
            &ResolveOptions::new().follow().require(Permission::Read),
        )?;
        let node = self
            .get_node(&src)
            .ok_or_else(|| ResolveError::no_such(src.clone()))?;
        if node.is_dir() && !recursive {
            return Err(FsError::IsADirectory { path: src });
        }

        let (dest_parent, dest_name) = self.destination(&src, to, access)?;
        let dest = path::join(&dest_parent, &dest_name);
        if node.is_dir() && path::is_within(&dest, &src) {
            return Err(FsError::Invalid(format!(
                "cannot copy '{}' into itself",
                src
            )));
        }

        let mut copy = node.clone();
        let cred = &access.cred;
        let mut unreadable = None;
        node.walk(&src, &mut |p, n| {
            if unreadable.is_none() && !Self::has_permission(n, cred, Permission::Read) {
                unreadable = Some(p.to_string());
            }
        });
        if let Some(p) = unreadable {
            return Err(FsError::denied(p));
        }

        let t = now();
        copy.walk_mut(&dest, &mut |_, n| {
            let meta = n.meta_mut();
            meta.owner = cred.user.clone();
            meta.group = cred.primary_group.clone();
            meta.mtime = t;
        });
        self.insert_child(&dest_parent, &dest_name, copy, cred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest() -> Access {
        Access::new(
            "/home/Guest",
            Credentials::new("Guest", "Guest", vec!["Guest".into()]),
        )
    }

    fn other() -> Access {
        Access::new("/", Credentials::new("alice", "alice", vec!["alice".into()]))
    }

    fn fs() -> Vfs {
        Vfs::with_default_layout("Guest")
    }

    #[test]
    fn test_root_is_755_root_owned() {
        let fs = Vfs::new();
        let meta = fs.root().meta();
        assert_eq!(meta.owner, "root");
        assert_eq!(meta.group, "root");
        assert_eq!(meta.mode, FileMode::new(0o755));
    }

    #[test]
    fn test_write_then_read() {
        let mut fs = fs();
        fs.write_file("notes", "a\n", WriteMode::Overwrite, &guest()).unwrap();
        fs.write_file("notes", "b\n", WriteMode::Append, &guest()).unwrap();
        assert_eq!(fs.read_file("/home/Guest/notes", &guest()).unwrap(), "a\nb\n");

        let stat = fs.stat("notes", &guest(), false).unwrap();
        assert_eq!(stat.meta.owner, "Guest");
        assert_eq!(stat.meta.group, "Guest");
        assert_eq!(stat.meta.mode, FileMode::FILE_DEFAULT);
    }

    #[test]
    fn test_write_into_missing_parent_fails() {
        let mut fs = fs();
        let err = fs
            .write_file("nope/file", "x", WriteMode::Overwrite, &guest())
            .unwrap_err();
        assert!(matches!(err, FsError::Resolve(ResolveError::NoSuchPathComponent { .. })));
    }

    #[test]
    fn test_write_to_directory_fails() {
        let mut fs = fs();
        let err = fs.write_file("/tmp", "x", WriteMode::Append, &guest()).unwrap_err();
        assert!(matches!(err, FsError::IsADirectory { .. }));
    }

    #[test]
    fn test_permission_denied_outside_home() {
        let mut fs = fs();
        let err = fs.write_file("/etc/passwd", "x", WriteMode::Overwrite, &guest()).unwrap_err();
        assert!(err.is_permission());
        // /root is 700
        let err = fs.list_dir("/root", &guest()).unwrap_err();
        assert!(err.is_permission());
    }

    #[test]
    fn test_root_bypasses_checks() {
        let mut fs = fs();
        fs.write_file("/home/Guest/secret", "s", WriteMode::Overwrite, &guest()).unwrap();
        fs.chmod("/home/Guest/secret", FileMode::new(0), &guest()).unwrap();
        assert!(fs.read_file("/home/Guest/secret", &guest()).unwrap_err().is_permission());
        assert_eq!(fs.read_file("/home/Guest/secret", &Access::root()).unwrap(), "s");
    }

    #[test]
    fn test_only_owner_may_chmod() {
        let mut fs = fs();
        fs.write_file("/tmp/mine", "x", WriteMode::Overwrite, &guest()).unwrap();
        let err = fs.chmod("/tmp/mine", FileMode::new(0o777), &other()).unwrap_err();
        assert!(err.is_permission());
        fs.chmod("/tmp/mine", FileMode::new(0o600), &guest()).unwrap();
        assert!(fs.read_file("/tmp/mine", &other()).unwrap_err().is_permission());
    }

    #[test]
    fn test_group_class_applies() {
        let mut fs = fs();
        fs.write_file("/tmp/shared", "x", WriteMode::Overwrite, &guest()).unwrap();
        fs.chmod("/tmp/shared", FileMode::new(0o640), &guest()).unwrap();
        let member = Access::new(
            "/",
            Credentials::new("bob", "bob", vec!["bob".into(), "Guest".into()]),
        );
        assert!(fs.read_file("/tmp/shared", &member).is_ok());
        assert!(fs.read_file("/tmp/shared", &other()).is_err());
    }

    #[test]
    fn test_mkdir_parents() {
        let mut fs = fs();
        assert!(fs.create_directory("a/b/c", true, &guest()).unwrap());
        assert!(!fs.create_directory("a/b/c", true, &guest()).unwrap());
        let err = fs.create_directory("a", false, &guest()).unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));
        let stat = fs.stat("/home/Guest/a/b", &guest(), false).unwrap();
        assert_eq!(stat.kind, NodeKind::Directory);
    }

    fn backdate(fs: &mut Vfs, canonical: &str) -> DateTime<Utc> {
        let old = DateTime::<Utc>::UNIX_EPOCH;
        fs.node_mut(canonical).unwrap().meta_mut().mtime = old;
        old
    }

    fn mtime(fs: &Vfs, path: &str) -> DateTime<Utc> {
        fs.stat(path, &Access::root(), false).unwrap().meta.mtime
    }

    #[test]
    fn test_mkdir_updates_parent_mtime() {
        let mut fs = fs();
        let old = backdate(&mut fs, "/home/Guest");
        fs.create_directory("d", false, &guest()).unwrap();
        assert!(mtime(&fs, "/home/Guest") > old);
    }

    #[test]
    fn test_create_delete_rename_touch_parents() {
        let mut fs = fs();
        fs.create_directory("src", false, &guest()).unwrap();
        fs.create_directory("dst", false, &guest()).unwrap();

        let old = backdate(&mut fs, "/home/Guest/src");
        fs.write_file("src/f", "x", WriteMode::Overwrite, &guest()).unwrap();
        assert!(mtime(&fs, "/home/Guest/src") > old);

        let old_src = backdate(&mut fs, "/home/Guest/src");
        let old_dst = backdate(&mut fs, "/home/Guest/dst");
        fs.rename("src/f", "dst/g", &guest()).unwrap();
        assert!(mtime(&fs, "/home/Guest/src") > old_src);
        assert!(mtime(&fs, "/home/Guest/dst") > old_dst);

        let old = backdate(&mut fs, "/home/Guest/dst");
        fs.delete("dst/g", DeleteOptions::default(), &guest()).unwrap();
        assert!(mtime(&fs, "/home/Guest/dst") > old);
    }

    #[test]
    fn test_overwrite_needs_writable_parent() {
        let mut fs = fs();
        fs.create_directory("ro", false, &guest()).unwrap();
        fs.write_file("ro/f", "a\n", WriteMode::Overwrite, &guest()).unwrap();
        fs.chmod("ro", FileMode::new(0o555), &guest()).unwrap();

        for mode in [WriteMode::Overwrite, WriteMode::Append] {
            let err = fs.write_file("ro/f", "x", mode, &guest()).unwrap_err();
            assert!(err.is_permission());
        }
        assert_eq!(fs.read_file("ro/f", &guest()).unwrap(), "a\n");
        fs.write_file("ro/f", "root\n", WriteMode::Overwrite, &Access::root()).unwrap();
        assert_eq!(fs.read_file("ro/f", &guest()).unwrap(), "root\n");
    }

    #[test]
    fn test_write_through_dangling_symlink() {
        let mut fs = fs();
        fs.create_symlink("/nowhere/file", "broken", &guest()).unwrap();
        let err = fs.write_file("broken", "x", WriteMode::Overwrite, &guest()).unwrap_err();
        assert!(matches!(err, FsError::Resolve(ResolveError::DanglingSymlink { .. })));
    }

    #[test]
    fn test_symlink_follow_and_metadata() {
        let mut fs = fs();
        fs.write_file("target", "data", WriteMode::Overwrite, &guest()).unwrap();
        fs.create_symlink("target", "link", &guest()).unwrap();
        assert_eq!(fs.read_file("link", &guest()).unwrap(), "data");

        fs.chmod("link", FileMode::new(0o700), &guest()).unwrap();
        let link = fs.stat("link", &guest(), false).unwrap();
        let target = fs.stat("target", &guest(), false).unwrap();
        assert_eq!(link.kind, NodeKind::Symlink);
        assert_eq!(link.meta.mode, FileMode::new(0o700));
        assert_eq!(target.meta.mode, FileMode::FILE_DEFAULT);
    }

    #[test]
    fn test_dangling_symlink() {
        let mut fs = fs();
        fs.create_symlink("/does/not/exist", "broken", &guest()).unwrap();
        let err = fs.read_file("broken", &guest()).unwrap_err();
        assert!(matches!(err, FsError::Resolve(ResolveError::DanglingSymlink { .. })));
        // the link itself is a legal node
        assert!(fs.stat("broken", &guest(), false).is_ok());
    }

    #[test]
    fn test_symlink_loop_is_bounded() {
        let mut fs = fs();
        fs.create_symlink("b", "a", &guest()).unwrap();
        fs.create_symlink("a", "b", &guest()).unwrap();
        let err = fs.read_file("a", &guest()).unwrap_err();
        assert!(matches!(err, FsError::Resolve(ResolveError::TooManyLinks { .. })));
    }

    #[test]
    fn test_symlinked_directory_traversal() {
        let mut fs = fs();
        fs.create_directory("real", false, &guest()).unwrap();
        fs.write_file("real/f", "x", WriteMode::Overwrite, &guest()).unwrap();
        fs.create_symlink("/home/Guest/real", "alias", &guest()).unwrap();
        let resolved = fs
            .resolve("alias/f", &guest(), &ResolveOptions::new())
            .unwrap();
        assert_eq!(resolved.path, "/home/Guest/real/f");
    }

    #[test]
    fn test_delete_requires_recursive_for_dirs() {
        let mut fs = fs();
        fs.create_directory("d/e", true, &guest()).unwrap();
        let err = fs.delete("d", DeleteOptions::default(), &guest()).unwrap_err();
        assert!(matches!(err, FsError::IsADirectory { .. }));
        fs.delete("d", DeleteOptions { recursive: true, force: false }, &guest()).unwrap();
        assert!(!fs.exists("d", &guest()));
    }

    #[test]
    fn test_delete_missing_with_force() {
        let mut fs = fs();
        assert!(fs.delete("ghost", DeleteOptions::default(), &guest()).is_err());
        assert!(fs.delete("ghost", DeleteOptions { recursive: false, force: true }, &guest()).is_ok());
    }

    #[test]
    fn test_delete_root_refused() {
        let mut fs = fs();
        let err = fs
            .delete("/", DeleteOptions { recursive: true, force: true }, &Access::root())
            .unwrap_err();
        assert!(matches!(err, FsError::Invalid(_)));
    }

    #[test]
    fn test_delete_symlink_keeps_target() {
        let mut fs = fs();
        fs.write_file("t", "x", WriteMode::Overwrite, &guest()).unwrap();
        fs.create_symlink("t", "l", &guest()).unwrap();
        fs.delete("l", DeleteOptions::default(), &guest()).unwrap();
        assert!(fs.exists("t", &guest()));
    }

    #[test]
    fn test_rename_into_directory() {
        let mut fs = fs();
        fs.write_file("f", "x", WriteMode::Overwrite, &guest()).unwrap();
        fs.create_directory("d", false, &guest()).unwrap();
        fs.rename("f", "d", &guest()).unwrap();
        assert_eq!(fs.read_file("d/f", &guest()).unwrap(), "x");
        assert!(!fs.exists("f", &guest()));
    }

    #[test]
    fn test_rename_into_self_refused() {
        let mut fs = fs();
        fs.create_directory("d/sub", true, &guest()).unwrap();
        let err = fs.rename("d", "d/sub", &guest()).unwrap_err();
        assert!(matches!(err, FsError::Invalid(_)));
        assert!(fs.exists("d/sub", &guest()));
    }

    #[test]
    fn test_copy_reowns() {
        let mut fs = fs();
        fs.write_file("/tmp/src", "hello", WriteMode::Overwrite, &other()).unwrap();
        fs.copy("/tmp/src", "mine", false, &guest()).unwrap();
        let stat = fs.stat("mine", &guest(), false).unwrap();
        assert_eq!(stat.meta.owner, "Guest");
        assert_eq!(fs.read_file("mine", &guest()).unwrap(), "hello");
    }

    #[test]
    fn test_copy_directory_needs_recursive() {
        let mut fs = fs();
        fs.create_directory("d", false, &guest()).unwrap();
        assert!(fs.copy("d", "e", false, &guest()).is_err());
        fs.copy("d", "e", true, &guest()).unwrap();
        assert!(fs.exists("e", &guest()));
    }

    #[test]
    fn test_node_size() {
        let mut fs = fs();
        fs.create_directory("d", false, &guest()).unwrap();
        fs.write_file("d/a", "1234", WriteMode::Overwrite, &guest()).unwrap();
        fs.write_file("d/b", "56", WriteMode::Overwrite, &guest()).unwrap();
        assert_eq!(fs.node_size("d", &guest()).unwrap(), 6);
    }

    #[test]
    fn test_traversal_needs_execute() {
        let mut fs = fs();
        fs.create_directory("locked", false, &guest()).unwrap();
        fs.write_file("locked/f", "x", WriteMode::Overwrite, &guest()).unwrap();
        fs.chmod("locked", FileMode::new(0o600), &guest()).unwrap();
        let err = fs.read_file("locked/f", &guest()).unwrap_err();
        assert!(err.is_permission());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut fs = fs();
        fs.mark_clean();
        assert!(!fs.is_dirty());
        fs.touch("new", &guest()).unwrap();
        assert!(fs.is_dirty());
    }
}
