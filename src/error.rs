//! Errors raised by the fragment core.
//!
//! Merge and decode errors abort the whole operation so no partial fragment or
//! group is ever handed out. Instance table errors reject a single call and
//! leave every slot as it was.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("cannot merge an empty list of source meshes")]
    EmptyMergeInput,

    #[error("source mesh {index} ('{name}') has no index buffer")]
    MissingIndexBuffer { index: usize, name: String },

    #[error("source mesh {index} ('{name}') references vertex {vertex} but only has {vertex_count}")]
    InvalidSourceIndex {
        index: usize,
        name: String,
        vertex: u32,
        vertex_count: usize,
    },

    #[error("instance slot {slot} holds no instance")]
    InstanceNotFound { slot: usize },

    #[error("no instance is tagged with identifier {id}")]
    UnknownIdentifier { id: u32 },

    #[error("instance request needs slot {requested} but the capacity is {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("malformed buffer at byte {offset}: {reason}")]
    MalformedBuffer { offset: usize, reason: &'static str },

    #[error("index field '{field}' is not a valid offset list for its values")]
    InvalidIndex { field: &'static str },

    #[error("item {item} is listed as both opaque and transparent")]
    OverlappingPartition { item: i32 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, FragmentError>;
