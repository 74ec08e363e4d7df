//! Domain models for remote nodes, change events and ingested records

mod node;
mod record;

pub use node::{ChangeCursor, ChangeEvent, ChangePage, ChildPage, NodeKind, RemoteNode};
pub use record::{NormalizedRecord, StoredRecord};
