//! flow-fragments
//!
//! Instanced fragment geometry for large multi-part models. Many parts are
//! merged into one buffer per fragment, placed many times through a
//! fixed-capacity instance table, picked back to the originating part through
//! per-vertex block ids and persisted in a compact binary format.
//!
//! High-level modules
//! - `context`: caller-owned viewport, camera and pointer state
//! - `data_structures`: geometry merging, instance tables, selections and fragments
//! - `error`: the error type shared by the core
//! - `pick`: ray casting from the pointer to a picked block
//! - `render`: GPU buffers and draw calls for fragments
//! - `resources`: loading glTF parts and persisted groups
//! - `schema`: the binary record format
//!

pub mod context;
pub mod data_structures;
pub mod error;
pub mod pick;
pub mod render;
pub mod resources;
pub mod schema;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use data_structures::{
    fragment::Fragment,
    geometry::{Material, MergedGeometry, SourceMaterial, SourceMesh, merge},
    instance::{InstanceData, InstanceTable, Placement},
    selection::Selection,
};
pub use error::{FragmentError, Result};
pub use schema::{FragmentsGroup, StreamedGeometry};
pub use wgpu;
pub use winit::dpi::{PhysicalPosition, PhysicalSize};

/// Install the platform logger. Safe to call more than once.
///
/// Native builds log through `env_logger` (filtered with `RUST_LOG`), wasm
/// builds through the browser console.
pub fn init_logger() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }
}
