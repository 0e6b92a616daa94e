//! Lowering routing trees to per-chip routing tables, and the
//! application-map output.

use std::collections::BTreeSet;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::geom::Chip;
use crate::link::RouteSet;
use crate::machine::ResourceId;
use crate::netlist::{Allocations, NetId, Placements, RouteKey, VertexId};
use crate::tree::RoutingTree;

/// One entry in a chip's routing table.
///
/// A packet whose key matches `key` under `mask` is duplicated to every
/// route in `route`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct RoutingTableEntry {
    /// 32-bit routing key to match after applying the mask.
    pub key: u32,
    /// 32-bit mask applied to the keys of arriving packets.
    pub mask: u32,
    /// Where matching packets are sent.
    pub route: RouteSet,
}

/// A table-building failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// Two nets share a key/mask pair but fork differently at a chip, so
    /// one entry cannot serve both.
    #[error("nets sharing key {key} fork differently at chip {chip}")]
    MultisourceRoute {
        /// The shared key/mask pair.
        key: RouteKey,
        /// The chip at which the nets disagree.
        chip: Chip,
    },

    /// A routing table cannot be reduced to its target size.
    ///
    /// Produced by table minimisers, which sit outside this crate; the
    /// kind lives here so that all table failures share one type.
    #[error("the routing table on {chip} cannot be reduced to {target} entries (best was {best})")]
    MinimisationFailed {
        /// The chip whose table was being minimised.
        chip: Chip,
        /// The entry count asked for.
        target: usize,
        /// The smallest entry count achieved.
        best: usize,
    },
}

/// Builds per-chip routing tables from routed nets.
///
/// Every net with a routing key contributes, at each chip its tree
/// visits, an entry matching the key and carrying the union of the
/// routes leaving that chip (outgoing links and terminal deliveries).
/// Nets sharing a key/mask pair are merged only when they agree at every
/// common chip; a disagreement fails with
/// [`TableError::MultisourceRoute`].
pub fn build_routing_tables(
    routes: &FxHashMap<NetId, RoutingTree>,
    net_keys: &FxHashMap<NetId, RouteKey>,
) -> Result<FxHashMap<Chip, Vec<RoutingTableEntry>>, TableError> {
    let mut tables: FxHashMap<Chip, Vec<RoutingTableEntry>> = FxHashMap::default();
    let mut positions: FxHashMap<(Chip, RouteKey), usize> = FxHashMap::default();

    for &net in routes.keys().sorted() {
        let Some(&key) = net_keys.get(&net) else {
            continue;
        };
        let tree = &routes[&net];
        for node in tree.iter() {
            let chip = tree.chip(node);
            let route = tree
                .children(node)
                .iter()
                .map(|&(route, _)| route)
                .collect::<RouteSet>();
            let entry = RoutingTableEntry {
                key: key.key,
                mask: key.mask,
                route,
            };
            match positions.get(&(chip, key)) {
                Some(&index) => {
                    if tables[&chip][index] != entry {
                        return Err(TableError::MultisourceRoute { key, chip });
                    }
                }
                None => {
                    let table = tables.entry(chip).or_default();
                    positions.insert((chip, key), table.len());
                    table.push(entry);
                }
            }
        }
    }
    Ok(tables)
}

/// Builds the application map: which binary to load on which cores.
///
/// For each vertex with an application named in `vertices_applications`,
/// the vertex's chip and allocated core range are folded into
/// `{application: {chip: {core, ...}}}`.
pub fn build_application_map(
    vertices_applications: &FxHashMap<VertexId, String>,
    placements: &Placements,
    allocations: &Allocations,
    core_resource: ResourceId,
) -> FxHashMap<String, FxHashMap<Chip, BTreeSet<u8>>> {
    let mut map: FxHashMap<String, FxHashMap<Chip, BTreeSet<u8>>> = FxHashMap::default();
    for (&vertex, application) in vertices_applications {
        // Every vertex has been placed and allocated by this point.
        let chip = placements[&vertex];
        let cores = allocations[&vertex]
            .get(&core_resource)
            .cloned()
            .unwrap_or(0..0);
        let entry = map
            .entry(application.clone())
            .or_default()
            .entry(chip)
            .or_default();
        entry.extend(cores.map(|core| core as u8));
    }
    map
}
