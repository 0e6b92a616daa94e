//! `hexroute` maps application graphs onto hexagonal-torus multi-chip
//! meshes. Given vertices with resource demands, multicast nets between
//! them, and a description of the target machine, it produces placements,
//! resource allocations, and per-chip routing tables: everything a
//! loading layer needs to boot the application. The most common entry
//! point is [`place_and_route`], which runs the whole pipeline;
//! placement, allocation, routing, and table generation are also
//! available as separate stages.

#![warn(missing_docs)]

pub use hexroute_core::*;
