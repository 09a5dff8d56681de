//! Filesystem nodes
//!
//! A node is a tagged variant: file, directory or symlink. Directories own
//! their children exclusively; a symlink only names its target.
//!
//! The serialized form is self-describing:
//! `{"type": "file", "owner", "group", "mode", "mtime", "content"}` and the
//! same for directories (`children`) and symlinks (`target`).

use super::mode::FileMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata every node carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub owner: String,
    pub group: String,
    pub mode: FileMode,
    pub mtime: DateTime<Utc>,
}

impl NodeMeta {
    pub fn new(owner: &str, group: &str, mode: FileMode, mtime: DateTime<Utc>) -> Self {
        Self {
            owner: owner.to_string(),
            group: group.to_string(),
            mode,
            mtime,
        }
    }
}

/// Node type without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
            NodeKind::Symlink => write!(f, "symlink"),
        }
    }
}

/// A stored file, directory or symlink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    File {
        #[serde(flatten)]
        meta: NodeMeta,
        content: String,
    },
    Directory {
        #[serde(flatten)]
        meta: NodeMeta,
        children: BTreeMap<String, Node>,
    },
    Symlink {
        #[serde(flatten)]
        meta: NodeMeta,
        target: String,
    },
}

impl Node {
    pub fn file(owner: &str, group: &str, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Node::File {
            meta: NodeMeta::new(owner, group, FileMode::FILE_DEFAULT, now),
            content: content.into(),
        }
    }

    pub fn directory(owner: &str, group: &str, mode: FileMode, now: DateTime<Utc>) -> Self {
        Node::Directory {
            meta: NodeMeta::new(owner, group, mode, now),
            children: BTreeMap::new(),
        }
    }

    pub fn symlink(owner: &str, group: &str, target: impl Into<String>, now: DateTime<Utc>) -> Self {
        Node::Symlink {
            meta: NodeMeta::new(owner, group, FileMode::SYMLINK_DEFAULT, now),
            target: target.into(),
        }
    }

    pub fn meta(&self) -> &NodeMeta {
        match self {
            Node::File { meta, .. } | Node::Directory { meta, .. } | Node::Symlink { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Node::File { meta, .. } | Node::Directory { meta, .. } | Node::Symlink { meta, .. } => meta,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File { .. } => NodeKind::File,
            Node::Directory { .. } => NodeKind::Directory,
            Node::Symlink { .. } => NodeKind::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Directory { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Node::Directory { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.meta_mut().mtime = now;
    }

    /// Size in bytes: file content, symlink target, or the sum of a subtree
    pub fn size(&self) -> usize {
        match self {
            Node::File { content, .. } => content.len(),
            Node::Symlink { target, .. } => target.len(),
            Node::Directory { children, .. } => children.values().map(Node::size).sum(),
        }
    }

    /// Visit every node in the subtree (pre-order) with its absolute path
    pub fn walk<'a>(&'a self, path: &str, visit: &mut dyn FnMut(&str, &'a Node)) {
        visit(path, self);
        if let Node::Directory { children, .. } = self {
            for (name, child) in children {
                let child_path = super::path::join(path, name);
                child.walk(&child_path, visit);
            }
        }
    }

    /// Mutable variant of [`Node::walk`]
    pub fn walk_mut(&mut self, path: &str, visit: &mut dyn FnMut(&str, &mut Node)) {
        visit(path, self);
        if let Node::Directory { children, .. } = self {
            for (name, child) in children.iter_mut() {
                let child_path = super::path::join(path, name);
                child.walk_mut(&child_path, visit);
            }
        }
    }
}
