//! Fragment data structures: merged geometry, instances and selections.
//!
//! - `geometry` merges source meshes into one buffer tagged with block ids
//! - `instance` holds the fixed-capacity table of instance transforms
//! - `selection` is the highlight overlay of a picked instance
//! - `fragment` ties geometry, materials, instances and selection together

pub mod fragment;
pub mod geometry;
pub mod instance;
pub mod selection;
