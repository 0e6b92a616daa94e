#![warn(unreachable_pub, missing_debug_implementations)]

//! The core `hexroute` library: place-and-route for hexagonal-torus
//! multi-chip meshes.
//!
//! Given an application graph (vertices with resource demands, multicast
//! nets) and a [`Machine`] description, the pipeline in [`place_and_route`]
//! produces chip placements, per-chip resource allocations, and the
//! routing tables that realise every net. The stages are also usable on
//! their own: [`place`] (simulated annealing), [`allocate`] (greedy
//! ranges), [`route`] (neighbour-exploring routing with A* repair), and
//! [`build_routing_tables`].

#[macro_use]
mod ident;

mod allocate;
mod constraint;
mod geom;
mod link;
mod machine;
mod netlist;
mod place;
mod route;
mod run;
mod table;
mod tree;

#[cfg(test)]
pub(crate) mod testing;

pub use allocate::allocate;
pub use constraint::Constraint;
pub use geom::{
    concentric_hexagons, longest_dimension_first, minimise_xyz, shortest_mesh_path,
    shortest_mesh_path_length, shortest_torus_path, shortest_torus_path_length, to_xyz, Chip,
    LdfSteps,
};
pub use link::{Link, Route, RouteSet, NUM_CORES};
pub use machine::{
    Machine, OutOfBounds, ResourceId, ResourceRegistry, Resources, CORES, SDRAM, SRAM,
};
pub use netlist::{Allocations, Net, NetId, Placements, RouteKey, VertexId};
pub use place::{place, AnnealingKernel, ConstraintError, PlaceError, PlaceOpts, StepStats};
pub use route::{route, RouteError, RouteOpts};
pub use run::{place_and_route, Error, Outputs, Problem};
pub use table::{build_application_map, build_routing_tables, RoutingTableEntry, TableError};
pub use tree::{Descendants, NodeId, RoutingTree};
