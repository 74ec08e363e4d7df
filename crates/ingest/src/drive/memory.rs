//! In-memory drive implementation
//!
//! Holds a folder tree, file bodies and a scripted change feed. Failures can
//! be queued per operation to exercise retry and isolation paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};

use serde_json::Value;

use super::{ChunkStream, DriveSource};
use crate::error::DriveError;
use crate::models::{ChangeCursor, ChangePage, ChildPage, NodeKind, RemoteNode};

/// An operation that can be made to fail
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DriveOp {
    GetNode(String),
    /// Listing of the folder with this id (any page)
    ListChildren(String),
    OpenDownload(String),
    /// Any chunk of the file with this id
    Chunk(String),
    StartToken,
    /// Change page requested with this token
    ListChanges(String),
}

struct Entry {
    name: String,
    kind: NodeKind,
    content: Vec<u8>,
}

/// In-memory implementation of DriveSource
pub struct InMemoryDrive {
    nodes: RwLock<HashMap<String, Entry>>,
    /// Folder id -> child ids in listing order
    children: RwLock<HashMap<String, Vec<String>>>,
    change_pages: RwLock<HashMap<String, ChangePage>>,
    start_token: RwLock<ChangeCursor>,
    failures: Mutex<HashMap<DriveOp, VecDeque<DriveError>>>,
    calls: Mutex<HashMap<DriveOp, usize>>,
    page_size: usize,
    chunk_size: usize,
}

impl InMemoryDrive {
    /// Create an empty drive
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            change_pages: RwLock::new(HashMap::new()),
            start_token: RwLock::new(ChangeCursor::new("1")),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            page_size: 100,
            chunk_size: 64 * 1024,
        }
    }

    /// Items per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Bytes per download chunk
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Add a folder, optionally inside `parent`
    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) {
        self.insert(id, name, NodeKind::Folder, Vec::new(), parent);
    }

    /// Add a file with raw content
    pub fn add_file(&self, id: &str, name: &str, parent: Option<&str>, content: impl Into<Vec<u8>>) {
        self.insert(id, name, NodeKind::File, content.into(), parent);
    }

    /// Add a file holding a JSON document
    pub fn add_json_file(&self, id: &str, name: &str, parent: Option<&str>, document: &Value) {
        self.add_file(id, name, parent, document.to_string());
    }

    /// Replace the body of an existing file
    pub fn set_content(&self, id: &str, content: impl Into<Vec<u8>>) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = nodes.get_mut(id) {
            entry.content = content.into();
        }
    }

    /// Token returned by `get_start_token`
    pub fn set_start_token(&self, token: &str) {
        *self.start_token.write().unwrap_or_else(PoisonError::into_inner) = ChangeCursor::new(token);
    }

    /// Register the change page served for `token`
    pub fn add_change_page(&self, token: &str, page: ChangePage) {
        self.change_pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), page);
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail(&self, op: DriveOp, error: DriveError) {
        self.fail_times(op, error, 1);
    }

    /// Make the next `times` calls of `op` fail with `error`
    pub fn fail_times(&self, op: DriveOp, error: DriveError, times: usize) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Drop every queued failure
    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// How many times `op` has been attempted
    pub fn call_count(&self, op: &DriveOp) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    fn insert(&self, id: &str, name: &str, kind: NodeKind, content: Vec<u8>, parent: Option<&str>) {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner).insert(
            id.to_string(),
            Entry {
                name: name.to_string(),
                kind,
                content,
            },
        );
        if let Some(parent) = parent {
            self.children
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(parent.to_string())
                .or_default()
                .push(id.to_string());
        }
    }

    /// Record the call and pop a queued failure, if any
    fn check(&self, op: DriveOp) -> Result<(), DriveError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op.clone())
            .or_default() += 1;

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn not_found(id: &str) -> DriveError {
        DriveError::Permanent {
            status: Some(404),
            message: format!("File not found: {id}"),
        }
    }
}

impl Default for InMemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveSource for InMemoryDrive {
    fn get_node(&self, id: &str) -> Result<RemoteNode, DriveError> {
        self.check(DriveOp::GetNode(id.to_string()))?;

        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let entry = nodes.get(id).ok_or_else(|| Self::not_found(id))?;
        Ok(RemoteNode {
            id: id.to_string(),
            name: entry.name.clone(),
            kind: entry.kind,
            parent_path: String::new(),
        })
    }

    fn list_children(
        &self,
        folder: &RemoteNode,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        self.check(DriveOp::ListChildren(folder.id.clone()))?;

        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        if !nodes.get(&folder.id).is_some_and(|e| e.kind == NodeKind::Folder) {
            return Err(Self::not_found(&folder.id));
        }

        let children = self.children.read().unwrap_or_else(PoisonError::into_inner);
        let ids = children.get(&folder.id).map(Vec::as_slice).unwrap_or_default();

        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| DriveError::permanent(format!("invalid page token: {token}")))?,
            None => 0,
        };
        let end = (start + self.page_size).min(ids.len());
        let parent_path = folder.path();

        let items = ids[start.min(end)..end]
            .iter()
            .filter_map(|id| {
                nodes.get(id).map(|entry| RemoteNode {
                    id: id.clone(),
                    name: entry.name.clone(),
                    kind: entry.kind,
                    parent_path: parent_path.clone(),
                })
            })
            .collect();

        Ok(ChildPage {
            items,
            next_page_token: (end < ids.len()).then(|| end.to_string()),
        })
    }

    fn open_download(&self, file_id: &str) -> Result<Box<dyn ChunkStream + '_>, DriveError> {
        self.check(DriveOp::OpenDownload(file_id.to_string()))?;

        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let entry = nodes
            .get(file_id)
            .filter(|e| e.kind == NodeKind::File)
            .ok_or_else(|| Self::not_found(file_id))?;

        Ok(Box::new(MemoryDownload {
            drive: self,
            file_id: file_id.to_string(),
            content: entry.content.clone(),
            offset: 0,
        }))
    }

    fn get_start_token(&self) -> Result<ChangeCursor, DriveError> {
        self.check(DriveOp::StartToken)?;
        Ok(self
            .start_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn list_changes(&self, page_token: &str) -> Result<ChangePage, DriveError> {
        self.check(DriveOp::ListChanges(page_token.to_string()))?;

        let pages = self.change_pages.read().unwrap_or_else(PoisonError::into_inner);
        pages.get(page_token).cloned().ok_or_else(|| DriveError::Permanent {
            status: Some(400),
            message: format!("invalid page token: {page_token}"),
        })
    }
}

/// Download over a snapshot of the file body
struct MemoryDownload<'a> {
    drive: &'a InMemoryDrive,
    file_id: String,
    content: Vec<u8>,
    offset: usize,
}

impl ChunkStream for MemoryDownload<'_> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DriveError> {
        if self.offset >= self.content.len() {
            return Ok(None);
        }

        self.drive.check(DriveOp::Chunk(self.file_id.clone()))?;

        let end = (self.offset + self.drive.chunk_size).min(self.content.len());
        let chunk = self.content[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }
}
