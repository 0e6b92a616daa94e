//! Greedy per-chip resource allocation.
//!
//! Once vertices have chips, each vertex needs a concrete slice of each
//! resource it demands: core indices to boot, memory offsets to write to.
//! Allocation is first-fit in vertex order over each chip's free ranges,
//! which start as `0..capacity` minus any reservations.

use rustc_hash::FxHashMap;

use crate::constraint::Constraint;
use crate::geom::Chip;
use crate::machine::{Machine, ResourceId, Resources};
use crate::netlist::{Allocations, Placements, VertexId};
use crate::place::PlaceError;

/// The free ranges of one resource on one chip.
#[derive(Debug, Clone)]
struct FreeRanges {
    ranges: Vec<std::ops::Range<u32>>,
}

impl FreeRanges {
    fn new(capacity: u32) -> FreeRanges {
        FreeRanges {
            ranges: vec![0..capacity],
        }
    }

    /// Carves a reserved range out of the free space.
    fn reserve(&mut self, reservation: &std::ops::Range<u32>) {
        let mut next = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if reservation.end <= range.start || reservation.start >= range.end {
                next.push(range);
                continue;
            }
            if range.start < reservation.start {
                next.push(range.start..reservation.start);
            }
            if reservation.end < range.end {
                next.push(reservation.end..range.end);
            }
        }
        self.ranges = next;
    }

    /// Takes `amount` units from the first free range with room, starting
    /// at a multiple of `alignment`.
    fn take(&mut self, amount: u32, alignment: u32) -> Option<std::ops::Range<u32>> {
        for (index, range) in self.ranges.iter().enumerate() {
            let start = range.start.next_multiple_of(alignment);
            let Some(end) = start.checked_add(amount) else {
                continue;
            };
            if end > range.end {
                continue;
            }
            let tail = end..range.end;
            let head = range.start..start;
            let allocated = start..end;
            self.ranges.remove(index);
            // Alignment can leave a usable gap before the allocation.
            if head.end > head.start {
                self.ranges.insert(index, head);
            }
            if tail.end > tail.start {
                self.ranges.push(tail);
            }
            return Some(allocated);
        }
        None
    }

    fn available(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| u64::from(r.end) - u64::from(r.start))
            .sum()
    }
}

/// Assigns each vertex a contiguous half-open range of every resource it
/// demands, on the chip it was placed on.
///
/// Reservations ([`Constraint::ReserveResource`]) are excluded from the
/// allocatable space, and [`Constraint::AlignResource`] forces range
/// starts onto multiples of its alignment. Vertices are served in id
/// order. Fails with [`PlaceError::InsufficientResource`] when a chip
/// cannot hold what was placed on it, which only happens if the placement
/// came from elsewhere or alignment padding ate the slack.
pub fn allocate(
    vertices_resources: &FxHashMap<VertexId, Resources>,
    machine: &Machine,
    constraints: &[Constraint],
    placements: &Placements,
) -> Result<Allocations, PlaceError> {
    let mut alignments: FxHashMap<ResourceId, u32> = FxHashMap::default();
    for constraint in constraints {
        if let Constraint::AlignResource {
            resource,
            alignment,
        } = constraint
        {
            alignments.insert(*resource, (*alignment).max(1));
        }
    }

    // Group the vertices by chip, in id order.
    let mut residents: FxHashMap<Chip, Vec<VertexId>> = FxHashMap::default();
    let mut vertices = placements.keys().copied().collect::<Vec<_>>();
    vertices.sort_unstable();
    for &vertex in &vertices {
        residents.entry(placements[&vertex]).or_default().push(vertex);
    }

    let mut allocations = Allocations::default();
    let mut chips = residents.keys().copied().collect::<Vec<_>>();
    chips.sort_unstable();
    for chip in chips {
        // The placer only uses live chips.
        let capacities = machine.resources(chip).unwrap();
        let mut free: FxHashMap<ResourceId, FreeRanges> = capacities
            .iter()
            .map(|(&resource, &capacity)| (resource, FreeRanges::new(capacity)))
            .collect();
        for constraint in constraints {
            let Constraint::ReserveResource {
                resource,
                reservation,
                chip: at,
            } = constraint
            else {
                continue;
            };
            if at.map_or(true, |c| c == chip) {
                if let Some(ranges) = free.get_mut(resource) {
                    ranges.reserve(reservation);
                }
            }
        }

        for &vertex in &residents[&chip] {
            let mut demands = vertices_resources[&vertex]
                .iter()
                .map(|(&k, &v)| (k, v))
                .collect::<Vec<_>>();
            demands.sort_unstable();
            let mut allocation = FxHashMap::default();
            for (resource, amount) in demands {
                let alignment = alignments.get(&resource).copied().unwrap_or(1);
                let ranges = free
                    .entry(resource)
                    .or_insert_with(|| FreeRanges::new(0));
                let range = ranges.take(amount, alignment).ok_or_else(|| {
                    PlaceError::InsufficientResource {
                        resource,
                        required: amount.into(),
                        available: ranges.available(),
                    }
                })?;
                allocation.insert(resource, range);
            }
            allocations.insert(vertex, allocation);
        }
    }
    Ok(allocations)
}
