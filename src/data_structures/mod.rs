//! Engine data structures: domain models, city objects, materials and the scene graph.
//!
//! - `model` holds the domain-side node/mesh graph that conversion operates on
//! - `city_object` contains city objects, their per-mesh index tables and package classification
//! - `granularity` enumerates the merge policies of the converter
//! - `material` contains engine material references and slot naming
//! - `scene_graph` is the arena of placed components and their static meshes

pub mod city_object;
pub mod granularity;
pub mod material;
pub mod model;
pub mod scene_graph;
