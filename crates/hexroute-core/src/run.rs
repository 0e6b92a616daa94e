//! The end-to-end pipeline: place, allocate, route, and lower to tables.

use std::collections::BTreeSet;

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::allocate::allocate;
use crate::constraint::Constraint;
use crate::geom::Chip;
use crate::machine::{Machine, Resources};
use crate::netlist::{Allocations, Net, NetId, Placements, VertexId};
use crate::place::{place, PlaceError, PlaceOpts};
use crate::route::{route, RouteError, RouteOpts};
use crate::table::{
    build_application_map, build_routing_tables, RoutingTableEntry, TableError,
};

/// A complete place-and-route problem.
#[derive(Debug, Clone)]
pub struct Problem {
    /// Each vertex's resource demands. Every vertex must appear here.
    pub vertices_resources: FxHashMap<VertexId, Resources>,
    /// The application binary to load for each vertex, passed through to
    /// the application map untouched. Vertices without one (e.g. pure
    /// peripherals) may be omitted.
    pub vertices_applications: FxHashMap<VertexId, String>,
    /// The nets connecting the vertices. Nets carrying a routing key are
    /// realised in the routing tables.
    pub nets: Vec<Net>,
    /// The machine to map onto.
    pub machine: Machine,
    /// Placement, allocation, and routing constraints.
    pub constraints: Vec<Constraint>,
}

/// Everything needed to load and run a placed-and-routed application.
#[derive(Debug, Clone)]
pub struct Outputs {
    /// Which chip each vertex lives on.
    pub placements: Placements,
    /// The resource ranges allocated to each vertex on its chip.
    pub allocations: Allocations,
    /// Which binaries to load onto which cores of which chips.
    pub application_map: FxHashMap<String, FxHashMap<Chip, BTreeSet<u8>>>,
    /// The routing-table entries for each chip that routes anything.
    pub routing_tables: FxHashMap<Chip, Vec<RoutingTableEntry>>,
}

/// A failure in any stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A net names a vertex with no resource entry.
    #[error("net {net} names vertex {vertex}, which has no resource entry")]
    UndefinedVertex {
        /// The offending net.
        net: NetId,
        /// The vertex missing from `vertices_resources`.
        vertex: VertexId,
    },

    /// Placement failed.
    #[error("placement failed")]
    Place(#[from] PlaceError),

    /// Routing failed.
    #[error("routing failed")]
    Route(#[from] RouteError),

    /// Table building failed.
    #[error("table building failed")]
    Table(#[from] TableError),
}

/// Runs the whole pipeline on a problem.
///
/// All randomness (annealing moves, path tie-breaks) is drawn from `rng`,
/// so a fixed seed gives bit-identical outputs for the same problem.
pub fn place_and_route<R: Rng>(
    problem: &Problem,
    place_opts: &PlaceOpts,
    route_opts: &RouteOpts,
    rng: &mut R,
) -> Result<Outputs, Error> {
    // Every net endpoint must have resources, or the later stages would
    // have nowhere to look things up.
    for (index, net) in problem.nets.iter().enumerate() {
        for &vertex in std::iter::once(&net.source).chain(&net.sinks) {
            if !problem.vertices_resources.contains_key(&vertex) {
                return Err(Error::UndefinedVertex {
                    net: NetId::new(index),
                    vertex,
                });
            }
        }
    }

    let placements = place(
        &problem.vertices_resources,
        &problem.nets,
        &problem.machine,
        &problem.constraints,
        place_opts,
        rng,
    )?;
    let allocations = allocate(
        &problem.vertices_resources,
        &problem.machine,
        &problem.constraints,
        &placements,
    )?;
    let routes = route(
        &problem.nets,
        &problem.machine,
        &problem.constraints,
        &placements,
        &allocations,
        route_opts,
        rng,
    )?;

    let net_keys = problem
        .nets
        .iter()
        .enumerate()
        .filter_map(|(index, net)| net.key.map(|key| (NetId::new(index), key)))
        .collect();
    let routing_tables = build_routing_tables(&routes, &net_keys)?;
    let application_map = build_application_map(
        &problem.vertices_applications,
        &placements,
        &allocations,
        route_opts.core_resource,
    );

    Ok(Outputs {
        placements,
        allocations,
        application_map,
        routing_tables,
    })
}
