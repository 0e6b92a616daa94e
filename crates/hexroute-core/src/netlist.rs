//! Vertices, nets, and routing keys.

use rustc_hash::FxHashMap;

use crate::geom::Chip;
use crate::machine::ResourceId;

identifier!(VertexId, usize);
identifier!(NetId, usize);

/// A placement: which chip each vertex lives on.
pub type Placements = FxHashMap<VertexId, Chip>;

/// An allocation: the half-open range of each resource assigned to each
/// vertex on its chip.
pub type Allocations = FxHashMap<VertexId, FxHashMap<ResourceId, std::ops::Range<u32>>>;

/// The key and mask a chip router matches packets against.
///
/// A packet with key `k` matches iff `(k & mask) == key`.
#[derive(
    Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct RouteKey {
    pub key: u32,
    pub mask: u32,
}

impl RouteKey {
    /// Creates a key/mask pair.
    pub const fn new(key: u32, mask: u32) -> RouteKey {
        RouteKey { key, mask }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}/{:#010x}", self.key, self.mask)
    }
}

/// A net: multicast connectivity from one source vertex to many sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct Net {
    /// The vertex packets originate from.
    pub source: VertexId,
    /// The vertices packets are delivered to.
    pub sinks: Vec<VertexId>,
    /// The "strength" of the net, in application-specific units; scales
    /// the net's placement cost.
    pub weight: f64,
    /// The key routing-table entries for this net match on, if the net is
    /// to be realised in the tables.
    pub key: Option<RouteKey>,
}

impl Net {
    /// Creates a net with unit weight and no routing key. The sink list is
    /// copied out of whatever the caller hands in.
    pub fn new(source: VertexId, sinks: impl Into<Vec<VertexId>>) -> Net {
        Net {
            source,
            sinks: sinks.into(),
            weight: 1.0,
            key: None,
        }
    }

    /// Sets the net's weight.
    pub fn with_weight(mut self, weight: f64) -> Net {
        self.weight = weight;
        self
    }

    /// Sets the net's routing key.
    pub fn with_key(mut self, key: RouteKey) -> Net {
        self.key = Some(key);
        self
    }
}
