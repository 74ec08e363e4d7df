//! Remote tree nodes and change-feed types

use serde::{Deserialize, Serialize};

/// Whether a remote node is a folder or a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// A folder or file in the remote hierarchical store
///
/// Identity is the provider-assigned `id`; it does not change during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Path of the containing folder, empty for the traversal root
    pub parent_path: String,
}

impl RemoteNode {
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
            parent_path: String::new(),
        }
    }

    pub fn file(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::File,
            parent_path: String::new(),
        }
    }

    /// Set the containing folder's path
    pub fn under(mut self, parent_path: impl Into<String>) -> Self {
        self.parent_path = parent_path.into();
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Full path of this node, e.g. `root/2019/drama.json`
    pub fn path(&self) -> String {
        if self.parent_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.parent_path, self.name)
        }
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct ChildPage {
    pub items: Vec<RemoteNode>,
    pub next_page_token: Option<String>,
}

/// Opaque change-feed position issued by the provider
///
/// Never parsed or compared locally; only stored and handed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeCursor(pub String);

impl ChangeCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChangeCursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChangeCursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single entry of the change feed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub file_id: String,
    /// Deleted, trashed or no longer visible
    pub removed: bool,
    pub file: Option<RemoteNode>,
}

impl ChangeEvent {
    pub fn changed(file: RemoteNode) -> Self {
        Self {
            file_id: file.id.clone(),
            removed: false,
            file: Some(file),
        }
    }

    pub fn removed(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            removed: true,
            file: None,
        }
    }
}

/// One page of the change feed
///
/// Either `next_page_token` (more pages follow) or `rotation_token`
/// (feed drained, safe to advance the stored cursor) is set.
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    pub events: Vec<ChangeEvent>,
    pub next_page_token: Option<String>,
    pub rotation_token: Option<ChangeCursor>,
}
