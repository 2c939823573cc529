//! city-ngin
//!
//! Mesh reconstruction for placed CityGML city models. Imported models are split into
//! renderable scene components per GML file, LOD and feature. This crate regroups those
//! components at another granularity, assigns materials by city object type or attribute,
//! filters them by LOD and type, and turns relief into terrain. All scene changes go through a
//! single mutation thread while the heavy lifting runs on worker tasks.
//!
//! High-level modules
//! - `city_model`: the instanced city model and its asynchronous handle
//! - `context`: settings and external collaborators shared with workers
//! - `convert`: granularity conversion of domain models
//! - `data_structures`: domain models, city objects, materials and the scene graph
//! - `filter`: LOD and feature type filters
//! - `flow`: flow control between workers and the mutation thread
//! - `pick`: city object lookup from raycast hits
//! - `pipelines`: reconstruction, classification and landscape pipelines
//! - `resources`: mesh emission, export and placement
//! - `render`: renderable static mesh descriptions and their packed form
//!

pub mod city_model;
pub mod context;
pub mod convert;
pub mod data_structures;
pub mod filter;
pub mod flow;
pub mod pick;
pub mod pipelines;
pub mod resources;
pub mod render;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::{Vector2, Vector3};
pub use city_model::{CityModelEvent, CityModelHandle, InstancedCityModel};
pub use context::{Context, Settings};
pub use flow::{Job, MainThread, Phase, init_logging, spawn_main_thread};
