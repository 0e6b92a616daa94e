//! Hexagonal-mesh geometry: coordinates, shortest paths, and traversals.
//!
//! Chips live on a 2D grid but are connected hexagonally, so path
//! arithmetic uses a redundant three-axis `(x, y, z)` form in which a step
//! along the z axis moves diagonally (south-west for +z). A two-axis
//! coordinate lifts to `(x, y, 0)`. Adding or subtracting `(1, 1, 1)`
//! never changes the chip a vector reaches, which is what makes
//! [minimisation](minimise_xyz) meaningful.

use std::cmp::Reverse;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::link::Link;

/// The coordinate of a chip in the mesh.
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
pub struct Chip {
    pub x: i32,
    pub y: i32,
}

impl Chip {
    /// Creates a chip coordinate.
    pub const fn new(x: i32, y: i32) -> Chip {
        Chip { x, y }
    }

    /// The coordinate offset by the given amounts (no wrapping).
    pub fn offset(self, dx: i32, dy: i32) -> Chip {
        Chip::new(self.x + dx, self.y + dy)
    }

    /// The coordinate one hop along `link` (no wrapping).
    pub fn step(self, link: Link) -> Chip {
        let (dx, dy) = link.to_vector();
        self.offset(dx, dy)
    }

    /// The coordinate wrapped into a `width` by `height` torus.
    pub fn wrap(self, width: i32, height: i32) -> Chip {
        Chip::new(self.x.rem_euclid(width), self.y.rem_euclid(height))
    }
}

impl std::fmt::Display for Chip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Lifts a two-axis coordinate into the three-axis form.
pub fn to_xyz(chip: Chip) -> (i32, i32, i32) {
    (chip.x, chip.y, 0)
}

/// Minimises a three-axis vector.
///
/// Subtracts the median component from all three, leaving at most two
/// non-zero components of opposite sign. The result reaches the same chip
/// and its hop count is simply the range of its components.
pub fn minimise_xyz((x, y, z): (i32, i32, i32)) -> (i32, i32, i32) {
    let m = x.min(y).max(x.max(y).min(z));
    (x - m, y - m, z - m)
}

/// The length of a shortest path from `source` to `destination` without
/// using wrap-around links.
pub fn shortest_mesh_path_length(source: (i32, i32, i32), destination: (i32, i32, i32)) -> u32 {
    let x = destination.0 - source.0;
    let y = destination.1 - source.1;
    let z = destination.2 - source.2;
    // Minimisation adds or subtracts (1, 1, 1), which leaves the range of
    // the components untouched. A minimal vector has at most two non-zero
    // components of opposite sign, so the range is the sum of their
    // magnitudes: the hop count.
    (x.max(y).max(z) - x.min(y).min(z)) as u32
}

/// A shortest vector from `source` to `destination` without using
/// wrap-around links.
pub fn shortest_mesh_path(source: (i32, i32, i32), destination: (i32, i32, i32)) -> (i32, i32, i32) {
    minimise_xyz((
        destination.0 - source.0,
        destination.1 - source.1,
        destination.2 - source.2,
    ))
}

/// The length of a shortest path from `source` to `destination` using
/// wrap-around links on a `width` by `height` torus.
pub fn shortest_torus_path_length(
    source: (i32, i32, i32),
    destination: (i32, i32, i32),
    width: i32,
    height: i32,
) -> u32 {
    // The x, y vector from source to destination as if the source were at
    // (0, 0), reduced to two axes.
    let x = destination.0 - source.0;
    let y = destination.1 - source.1;
    let z = destination.2 - source.2;
    let x = (x - z).rem_euclid(width);
    let y = (y - z).rem_euclid(height);

    let no_wrap = x.max(y);
    let wrap_x = width - x + y;
    let wrap_y = x + height - y;
    let wrap_both = (width - x).max(height - y);
    no_wrap.min(wrap_x).min(wrap_y).min(wrap_both) as u32
}

/// A shortest vector from `source` to `destination` using wrap-around
/// links on a `width` by `height` torus.
///
/// When several shortest approaches exist, one is chosen at random with
/// uniform probability. Where the dominant axis is long enough, a random
/// number of z-axis "spirals" is folded in; this never changes the path
/// length.
pub fn shortest_torus_path<R: Rng>(
    source: (i32, i32, i32),
    destination: (i32, i32, i32),
    width: i32,
    height: i32,
    rng: &mut R,
) -> (i32, i32, i32) {
    let (w, h) = (width, height);

    // Reduce the source to (x, y, 0) form, then translate the destination
    // as if the source were at the origin, with both components
    // non-negative.
    let sx = source.0 - source.2;
    let sy = source.1 - source.2;
    let dx = (destination.0 - destination.2 - sx).rem_euclid(w);
    let dy = (destination.1 - destination.2 - sy).rem_euclid(h);

    // The four possible approaches: (distance, vector).
    let approaches = [
        (dx.max(dy), (dx, dy, 0)),                            // No wrap
        (w - dx + dy, (-(w - dx), dy, 0)),                    // Wrap X only
        (dx + h - dy, (dx, -(h - dy), 0)),                    // Wrap Y only
        ((w - dx).max(h - dy), (-(w - dx), -(h - dy), 0)),    // Wrap X and Y
    ];
    let best = approaches.iter().map(|&(d, _)| d).min().unwrap(); // four candidates
    let minimal = approaches
        .iter()
        .filter(|&&(d, _)| d == best)
        .map(|&(_, v)| v)
        .collect::<Vec<_>>();
    let vector = *minimal.choose(rng).unwrap();

    let (mut x, mut y, mut z) = minimise_xyz(vector);

    // Fold in a random number of z-axis spirals where they fit in the
    // dominant axis.
    if x.abs() >= height {
        let max_spirals = x.div_euclid(height);
        let d = rng.gen_range(max_spirals.min(0)..=max_spirals.max(0)) * height;
        x -= d;
        z -= d;
    } else if y.abs() >= width {
        let max_spirals = y.div_euclid(width);
        let d = rng.gen_range(max_spirals.min(0)..=max_spirals.max(0)) * width;
        y -= d;
        z -= d;
    }

    (x, y, z)
}

/// The hops of a longest-dimension-first traversal of `vector` from
/// `start`.
///
/// Axes are walked in descending order of magnitude, ties broken at random
/// via `rng`. Each item is the link taken and the position after the hop;
/// the final position is the traversal's destination. If `dims` is given,
/// positions wrap within the `(width, height)` torus.
pub fn longest_dimension_first<R: Rng>(
    vector: (i32, i32, i32),
    start: Chip,
    dims: Option<(i32, i32)>,
    rng: &mut R,
) -> LdfSteps {
    let mut order = [(0, vector.0), (1, vector.1), (2, vector.2)];
    // Shuffling before the stable sort breaks magnitude ties uniformly.
    order.shuffle(rng);
    order.sort_by_key(|&(_, magnitude)| Reverse(magnitude.abs()));
    LdfSteps {
        order,
        axis: 0,
        taken: 0,
        position: start,
        dims,
    }
}

/// Iterator over the hops of a longest-dimension-first traversal.
///
/// Created by [`longest_dimension_first`].
#[derive(Debug, Clone)]
pub struct LdfSteps {
    order: [(u8, i32); 3],
    axis: usize,
    taken: i32,
    position: Chip,
    dims: Option<(i32, i32)>,
}

impl Iterator for LdfSteps {
    type Item = (Link, Chip);

    fn next(&mut self) -> Option<(Link, Chip)> {
        while self.axis < 3 {
            let (dim, magnitude) = self.order[self.axis];
            if self.taken < magnitude.abs() {
                self.taken += 1;
                let link = match (dim, magnitude > 0) {
                    (0, true) => Link::East,
                    (0, false) => Link::West,
                    (1, true) => Link::North,
                    (1, false) => Link::South,
                    // A +z hop moves one chip down-left.
                    (_, true) => Link::SouthWest,
                    (_, false) => Link::NorthEast,
                };
                let mut next = self.position.step(link);
                if let Some((w, h)) = self.dims {
                    next = next.wrap(w, h);
                }
                self.position = next;
                return Some((link, next));
            }
            self.axis += 1;
            self.taken = 0;
        }
        None
    }
}

/// The coordinates of concentric rings of hexagons around `start`.
///
/// Yields `start` itself, then the ring at each radius from 1 to `radius`
/// in turn, walking each ring anticlockwise; ring `r` contains `6r` chips,
/// for `1 + 3r(r + 1)` in total. Rings are materialised eagerly; callers
/// searching outwards cache the result for a fixed radius.
pub fn concentric_hexagons(radius: u32, start: Chip) -> impl Iterator<Item = Chip> {
    let total = 1 + 3 * radius as usize * (radius as usize + 1);
    let mut out = Vec::with_capacity(total);
    let (mut x, mut y) = (start.x, start.y);
    out.push(start);
    for r in 1..=radius as i32 {
        // Move out to the next ring, then walk around it.
        y -= 1;
        for (dx, dy) in [(1, 1), (0, 1), (-1, 0), (-1, -1), (0, -1), (1, 0)] {
            for _ in 0..r {
                out.push(Chip::new(x, y));
                x += dx;
                y += dy;
            }
        }
    }
    out.into_iter()
}
