//! Link directions and packet routes.
//!
//! A chip in the mesh has six directed links, numbered consecutively in
//! anticlockwise order so that the opposite of link `l` is `(l + 3) % 6`.
//! A [`Route`] extends the link directions with the per-chip core
//! destinations a packet can be delivered to.

/// One of the six directed links leaving a chip.
///
/// The integer values match the numbering used by the on-chip router, and
/// the anticlockwise ordering gives the `(l + 3) % 6` opposite rule. There
/// are no north-west or south-east links in a hexagonal mesh.
#[derive(
    Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum Link {
    East = 0,
    NorthEast = 1,
    North = 2,
    West = 3,
    SouthWest = 4,
    South = 5,
}

impl Link {
    /// All links in numeric (anticlockwise) order.
    pub const ALL: [Link; 6] = [
        Link::East,
        Link::NorthEast,
        Link::North,
        Link::West,
        Link::SouthWest,
        Link::South,
    ];

    /// The link in the opposite direction.
    pub fn opposite(self) -> Link {
        Link::ALL[(self as usize + 3) % 6]
    }

    /// The unit vector a hop along this link adds to a chip coordinate.
    pub fn to_vector(self) -> (i32, i32) {
        match self {
            Link::East => (1, 0),
            Link::NorthEast => (1, 1),
            Link::North => (0, 1),
            Link::West => (-1, 0),
            Link::SouthWest => (-1, -1),
            Link::South => (0, -1),
        }
    }

    /// The link taking a chip to the logical neighbour at the given offset.
    ///
    /// Any component with magnitude greater than one is assumed to be a hop
    /// over a wrap-around link: its sign is flipped and its magnitude
    /// clamped to one. For example, in a 4x4 system the vector from (3, 1)
    /// to (0, 1) is (-3, 0), which is logically a single hop east over the
    /// wrap-around link. Returns `None` for offsets (such as the zero
    /// vector) which no link matches.
    pub fn from_vector((x, y): (i32, i32)) -> Option<Link> {
        let clamp = |v: i32| {
            if v.abs() > 1 {
                -v.signum()
            } else {
                v
            }
        };
        match (clamp(x), clamp(y)) {
            (1, 0) => Some(Link::East),
            (1, 1) => Some(Link::NorthEast),
            (0, 1) => Some(Link::North),
            (-1, 0) => Some(Link::West),
            (-1, -1) => Some(Link::SouthWest),
            (0, -1) => Some(Link::South),
            _ => None,
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Link::East => "east",
            Link::NorthEast => "north-east",
            Link::North => "north",
            Link::West => "west",
            Link::SouthWest => "south-west",
            Link::South => "south",
        };
        write!(f, "{name}")
    }
}

/// The number of cores on a chip, and so the largest core index plus one.
pub const NUM_CORES: u8 = 18;

/// A destination a packet can take after arriving at a chip's router:
/// either one of the six outgoing links or delivery to a local core.
///
/// Core 0 is conventionally the monitor core. The `index` values match the
/// bit positions used in routing-table entries: links occupy 0-5 and cores
/// occupy 6-23.
#[derive(
    Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Route {
    /// Forward over the given link.
    Link(Link),
    /// Deliver to the numbered core (0 to 17).
    Core(u8),
}

impl Route {
    /// The route delivering packets to the numbered core.
    ///
    /// Panics if `core` is 18 or more.
    pub fn core(core: u8) -> Route {
        assert!(core < NUM_CORES, "cores are numbered from 0 to 17");
        Route::Core(core)
    }

    /// The position of this route in a routing-table entry's route set.
    pub fn index(self) -> u8 {
        match self {
            Route::Link(link) => link as u8,
            Route::Core(core) => 6 + core,
        }
    }

    /// The route with the given route-set bit position, if it is valid.
    pub fn from_index(index: u8) -> Option<Route> {
        match index {
            0..=5 => Some(Route::Link(Link::ALL[index as usize])),
            6..=23 => Some(Route::Core(index - 6)),
            _ => None,
        }
    }

    /// The link this route forwards over, if it is a link route.
    pub fn as_link(self) -> Option<Link> {
        match self {
            Route::Link(link) => Some(link),
            Route::Core(_) => None,
        }
    }
}

impl From<Link> for Route {
    fn from(link: Link) -> Route {
        Route::Link(link)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Link(link) => write!(f, "{link}"),
            Route::Core(core) => write!(f, "core {core}"),
        }
    }
}

/// A set of [`Route`]s, stored as a 24-bit mask.
///
/// Iteration order is the numeric route order (links first, then cores).
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialOrd,
    Ord,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RouteSet(u32);

impl RouteSet {
    /// The empty set.
    pub const EMPTY: RouteSet = RouteSet(0);

    /// Adds a route to the set. Returns true if it was not already present.
    pub fn insert(&mut self, route: Route) -> bool {
        let bit = 1 << route.index();
        let fresh = self.0 & bit == 0;
        self.0 |= bit;
        fresh
    }

    /// Whether the set contains the given route.
    pub fn contains(self, route: Route) -> bool {
        self.0 & (1 << route.index()) != 0
    }

    /// The union of two sets.
    pub fn union(self, other: RouteSet) -> RouteSet {
        RouteSet(self.0 | other.0)
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The number of routes in the set.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the routes in the set in numeric order.
    pub fn iter(self) -> impl Iterator<Item = Route> {
        (0u8..24).filter_map(move |i| {
            (self.0 & (1 << i) != 0)
                .then(|| Route::from_index(i).unwrap()) // bits above 23 are never set
        })
    }
}

impl FromIterator<Route> for RouteSet {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> RouteSet {
        let mut set = RouteSet::EMPTY;
        for route in iter {
            set.insert(route);
        }
        set
    }
}
