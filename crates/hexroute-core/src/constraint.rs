//! Constraints on placement, allocation, and routing.

use std::ops::Range;

use crate::geom::Chip;
use crate::link::Link;
use crate::machine::ResourceId;
use crate::netlist::VertexId;

/// A constraint consumed by the placer, allocator, or router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Keeps a range of a resource out of the allocator's hands, on one
    /// chip or (when `chip` is `None`) on every chip. Reserving core 0 for
    /// the monitor is the conventional use.
    ReserveResource {
        resource: ResourceId,
        reservation: Range<u32>,
        chip: Option<Chip>,
    },
    /// Forces allocations of a resource to start at multiples of
    /// `alignment`.
    AlignResource {
        resource: ResourceId,
        alignment: u32,
    },
    /// Fixes a vertex to a chip.
    Location { vertex: VertexId, chip: Chip },
    /// Routes a sink vertex's packets out of the named link instead of to
    /// the vertex's cores, e.g. for off-mesh peripherals.
    RouteEndpoint { vertex: VertexId, link: Link },
    /// Requires a group of vertices to share a chip. The placer treats the
    /// group as one vertex whose demands are the members' sums.
    SameChip(Vec<VertexId>),
}
