//! Multicast routing: NER tree construction and A* repair.
//!
//! Each net gets a shortest-path tree built with Neighbour Exploring
//! Routing (J. Navaridas et al., Parallel Computing 2015): sinks are
//! handled closest-first, and each new sink is connected to the nearest
//! chip the tree already visits, which biases nets towards dense shared
//! trunks. Trees are then patched around dead chips and links by an A*
//! search, and finally each sink's cores (or constrained link) are
//! attached as terminal routes.
//!
//! If the live machine is connected this always succeeds; no attempt is
//! made to manage congestion or routing-table pressure.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use itertools::Itertools;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::constraint::Constraint;
use crate::geom::{
    concentric_hexagons, longest_dimension_first, shortest_mesh_path, shortest_mesh_path_length,
    shortest_torus_path, shortest_torus_path_length, to_xyz, Chip,
};
use crate::link::{Link, Route};
use crate::machine::{Machine, ResourceId, CORES};
use crate::netlist::{Allocations, Net, NetId, Placements};
use crate::tree::{NodeId, RoutingTree};

/// A routing failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// No live path joins a net fragment back to the rest of its tree:
    /// the machine's live chips are not all mutually reachable.
    #[error("the machine is disconnected: no route from {from} towards {to}")]
    DisconnectedSubregion {
        /// The chip the unreachable fragment hangs from.
        from: Chip,
        /// The chip the search was aiming for.
        to: Chip,
    },
}

/// Knobs for the router.
#[derive(Debug, Clone)]
pub struct RouteOpts {
    /// How far around each sink to look for an existing part of the tree
    /// before giving up and routing from the source. The default of 20 is
    /// the figure reported as acceptable in practice in the NER paper;
    /// zero turns the router into plain longest-dimension-first routing.
    pub radius: u32,
    /// The resource whose allocation names a sink's destination cores.
    pub core_resource: ResourceId,
}

impl Default for RouteOpts {
    fn default() -> Self {
        RouteOpts {
            radius: 20,
            core_resource: CORES,
        }
    }
}

/// Builds a routing tree for one net using NER.
///
/// Sinks are connected in order of distance from the source. For each, the
/// concentric-hexagon `ring` offsets are searched for the closest chip
/// already in the tree; the new path then runs longest-dimension-first
/// from that neighbour (or from the source if none is near), reusing any
/// tree nodes it crosses rather than splitting off parallel trunks.
///
/// The machine is assumed fully working here; dead topology is repaired
/// afterwards by [`avoid_dead_links`]. Returns the tree and a lookup from
/// visited chip to its node.
fn ner_net<R: Rng>(
    source: Chip,
    destinations: &[Chip],
    width: i32,
    height: i32,
    wrap: bool,
    ring: &[Chip],
    rng: &mut R,
) -> (RoutingTree, FxHashMap<Chip, NodeId>) {
    let mut tree = RoutingTree::new(source);
    let mut lookup = FxHashMap::default();
    lookup.insert(source, tree.root());

    let distance = |destination: &Chip| {
        if wrap {
            shortest_torus_path_length(to_xyz(source), to_xyz(*destination), width, height)
        } else {
            shortest_mesh_path_length(to_xyz(source), to_xyz(*destination))
        }
    };
    let mut destinations = destinations.to_vec();
    destinations.sort_by_cached_key(distance);

    for destination in destinations {
        // Look outwards from the destination for a nearby chip the tree
        // already visits; fall back on routing all the way from the
        // source.
        let mut neighbour = None;
        for offset in ring {
            let mut chip = destination.offset(offset.x, offset.y);
            if wrap {
                chip = chip.wrap(width, height);
            }
            if chip != destination && lookup.contains_key(&chip) {
                neighbour = Some(chip);
                break;
            }
        }
        let neighbour = neighbour.unwrap_or(source);

        let vector = if wrap {
            shortest_torus_path(to_xyz(neighbour), to_xyz(destination), width, height, rng)
        } else {
            shortest_mesh_path(to_xyz(neighbour), to_xyz(destination))
        };
        let steps =
            longest_dimension_first(vector, neighbour, wrap.then_some((width, height)), rng)
                .collect::<Vec<_>>();

        // If the walk crosses the existing tree, everything before the
        // last crossing would only duplicate existing trunks: grow the
        // tree from the crossing instead.
        let resume = steps.iter().rposition(|(_, chip)| lookup.contains_key(chip));
        let mut last = match resume {
            Some(index) => lookup[&steps[index].1],
            None => lookup[&neighbour],
        };
        for &(link, chip) in &steps[resume.map_or(0, |index| index + 1)..] {
            let node = tree.add_node(chip);
            lookup.insert(chip, node);
            tree.add_child(last, Route::Link(link), node);
            last = node;
        }
    }

    (tree, lookup)
}

/// Whether any hop of the tree crosses a dead link or lands on a dead
/// chip.
fn route_has_dead_links(tree: &RoutingTree, machine: &Machine) -> bool {
    tree.iter().any(|node| {
        tree.children(node).iter().any(|&(route, child)| {
            match (route, child) {
                (Route::Link(link), Some(child)) => {
                    !machine.contains_link(tree.chip(node), link)
                        || !machine.contains_chip(tree.chip(child))
                }
                _ => false,
            }
        })
    })
}

/// Copies a routing tree, leaving out nodes on dead chips and edges over
/// dead links.
///
/// Children of a dead node are folded onto its nearest live ancestor. An
/// edge survives only if its original link still physically connects the
/// (possibly new) parent to the child; the rest are reported as
/// `(parent, child)` chip pairs for [`a_star`] to mend. A dead chip in the
/// tree is assumed to be a through-route casualty, never a destination;
/// the root chip must be live.
fn copy_and_disconnect_tree(
    old: &RoutingTree,
    machine: &Machine,
) -> (RoutingTree, FxHashMap<Chip, NodeId>, Vec<(Chip, Chip)>) {
    let mut tree = RoutingTree::new(old.chip(old.root()));
    let mut lookup = FxHashMap::default();
    lookup.insert(tree.chip(tree.root()), tree.root());
    let mut broken = Vec::new();

    // (parent in the copy, route into the old node, old node)
    let mut queue = VecDeque::from([(None::<NodeId>, None::<Route>, old.root())]);
    while let Some((parent, route, old_node)) = queue.pop_front() {
        let chip = old.chip(old_node);
        let node = if machine.contains_chip(chip) {
            *lookup.entry(chip).or_insert_with(|| tree.add_node(chip))
        } else {
            // A net cannot be sourced from a dead chip.
            parent.unwrap()
        };

        if let Some(parent) = parent {
            if node != parent {
                let parent_chip = tree.chip(parent);
                let link = route.and_then(Route::as_link);
                let connected = link
                    .is_some_and(|link| machine.links_between(parent_chip, chip).any(|l| l == link));
                if connected {
                    tree.add_child(parent, route.unwrap(), node);
                } else {
                    broken.push((parent_chip, chip));
                }
            }
        }

        for &(route, child) in old.children(old_node) {
            match child {
                Some(child) => queue.push_back((Some(node), Some(route), child)),
                None => tree.add_terminal(node, route),
            }
        }
    }

    (tree, lookup, broken)
}

/// Finds a path from any chip in `sources` to `sink` over live links.
///
/// The search expands greedily towards `target` (the heuristic) and stops
/// the moment it touches any source, so it cannot wander into the rest of
/// the tree and form a loop. The returned path starts at the source it
/// found and stops one hop short of `sink`; each element is a chip and
/// the link taken from it towards the sink.
fn a_star(
    sink: Chip,
    target: Chip,
    sources: &FxHashSet<Chip>,
    machine: &Machine,
    wrap: bool,
) -> Result<Vec<(Link, Chip)>, RouteError> {
    let heuristic = |chip: Chip| {
        if wrap {
            shortest_torus_path_length(to_xyz(chip), to_xyz(target), machine.width, machine.height)
        } else {
            shortest_mesh_path_length(to_xyz(chip), to_xyz(target))
        }
    };

    // chip -> the hop taken from it towards the sink (None for the sink).
    let mut visited: FxHashMap<Chip, Option<(Link, Chip)>> = FxHashMap::default();
    visited.insert(sink, None);
    let mut to_visit = BinaryHeap::from([Reverse((heuristic(sink), sink))]);

    let mut selected = None;
    while let Some(Reverse((_, node))) = to_visit.pop() {
        if sources.contains(&node) {
            selected = Some(node);
            break;
        }
        for link in Link::ALL {
            // Walk the search *away* from the sink, so each neighbour's
            // link points back along the eventual packet direction.
            let (dx, dy) = link.to_vector();
            let neighbour = machine.wrap(node.offset(-dx, -dy));
            if !machine.contains_link(neighbour, link) {
                continue;
            }
            if visited.contains_key(&neighbour) {
                continue;
            }
            visited.insert(neighbour, Some((link, node)));
            to_visit.push(Reverse((heuristic(neighbour), neighbour)));
        }
    }

    let Some(source) = selected else {
        return Err(RouteError::DisconnectedSubregion {
            from: sink,
            to: target,
        });
    };

    let mut path = Vec::new();
    let mut chip = source;
    loop {
        // Every chip along the way was entered through `visited`.
        let (link, next) = visited[&chip].unwrap();
        path.push((link, chip));
        if next == sink {
            break;
        }
        chip = next;
    }
    Ok(path)
}

/// Rebuilds a routing tree so that it only uses live chips and links.
///
/// Disconnects everything dead with [`copy_and_disconnect_tree`], then
/// reconnects each broken-off subtree to the rest of the tree with
/// [`a_star`]. Where a repair path crosses the disconnected subtree, the
/// crossed node is severed from its old parent and carried along the new
/// path, so the result stays a tree.
fn avoid_dead_links(
    old: &RoutingTree,
    machine: &Machine,
    wrap: bool,
) -> Result<(RoutingTree, FxHashMap<Chip, NodeId>), RouteError> {
    let (mut tree, mut lookup, broken) = copy_and_disconnect_tree(old, machine);

    for (parent_chip, child_chip) in broken {
        let child = lookup[&child_chip];
        let subtree = tree
            .descendants(child)
            .map(|node| tree.chip(node))
            .collect::<FxHashSet<_>>();
        let sources = lookup
            .keys()
            .copied()
            .filter(|chip| !subtree.contains(chip))
            .collect::<FxHashSet<_>>();

        let path = a_star(child_chip, parent_chip, &sources, machine, wrap)?;

        let (mut pending_link, start) = path[0];
        let mut last = lookup[&start];
        for &(link, chip) in &path[1..] {
            let node = if subtree.contains(&chip) {
                // The path has crossed the disconnected subtree (A* knows
                // nothing of its shape). Sever the crossed node from its
                // parent and fold it into the path instead.
                let node = lookup[&chip];
                let parent = tree
                    .nodes()
                    .find(|&n| tree.children(n).iter().any(|&(_, c)| c == Some(node)));
                if let Some(parent) = parent {
                    tree.remove_child(parent, node);
                }
                node
            } else {
                debug_assert!(!lookup.contains_key(&chip), "repair must not create a cycle");
                let node = tree.add_node(chip);
                lookup.insert(chip, node);
                node
            };
            tree.add_child(last, Route::Link(pending_link), node);
            last = node;
            pending_link = link;
        }
        tree.add_child(last, Route::Link(pending_link), child);
    }

    Ok((tree, lookup))
}

/// Routes every net, producing a routing tree rooted at each net's source
/// chip whose leaves deliver to the sinks' cores (or constrained links).
///
/// Fails with [`RouteError::DisconnectedSubregion`] if some net cannot be
/// realised over the live topology. Tie-breaking in path choice goes
/// through `rng`; the same seed and inputs give identical trees.
pub fn route<R: Rng>(
    nets: &[Net],
    machine: &Machine,
    constraints: &[Constraint],
    placements: &Placements,
    allocations: &Allocations,
    opts: &RouteOpts,
    rng: &mut R,
) -> Result<FxHashMap<NetId, RoutingTree>, RouteError> {
    let wrap = machine.has_wrap_around_links(1.0);

    let mut endpoints: FxHashMap<_, _> = FxHashMap::default();
    for constraint in constraints {
        if let Constraint::RouteEndpoint { vertex, link } = *constraint {
            endpoints.insert(vertex, link);
        }
    }

    // The ring offsets are fixed for a given radius; hoist them out of the
    // per-sink search.
    let ring = concentric_hexagons(opts.radius, Chip::new(0, 0)).collect::<Vec<_>>();

    let mut routes = FxHashMap::default();
    for (index, net) in nets.iter().enumerate() {
        // The placer placed every net endpoint.
        let source = placements[&net.source];
        if !machine.contains_chip(source) {
            return Err(RouteError::DisconnectedSubregion {
                from: source,
                to: source,
            });
        }
        let destinations = net
            .sinks
            .iter()
            .map(|sink| placements[sink])
            .sorted()
            .dedup()
            .collect::<Vec<_>>();

        let (mut tree, mut lookup) = ner_net(
            source,
            &destinations,
            machine.width,
            machine.height,
            wrap,
            &ring,
            rng,
        );

        if route_has_dead_links(&tree, machine) {
            (tree, lookup) = avoid_dead_links(&tree, machine, wrap)?;
        }

        for &sink in &net.sinks {
            // Sinks sit on live chips, so repair never removed their nodes.
            let node = lookup[&placements[&sink]];
            if let Some(&link) = endpoints.get(&sink) {
                tree.add_terminal(node, Route::Link(link));
            } else {
                let cores = allocations
                    .get(&sink)
                    .and_then(|allocation| allocation.get(&opts.core_resource))
                    .cloned()
                    .unwrap_or(0..0);
                for core in cores {
                    tree.add_terminal(node, Route::core(core as u8));
                }
            }
        }

        routes.insert(NetId::new(index), tree);
    }
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::netlist::VertexId;
    use crate::testing;

    use super::*;

    /// Checks a routed tree for structural soundness: correct root, no
    /// repeated chips (so no cycles), hops over real (and live) links,
    /// every destination visited, and no path petering out anywhere else.
    fn check_tree(
        tree: &RoutingTree,
        lookup: &FxHashMap<Chip, NodeId>,
        source: Chip,
        destinations: &[Chip],
        machine: &Machine,
    ) {
        assert_eq!(tree.chip(tree.root()), source);
        assert_eq!(lookup.get(&source), Some(&tree.root()));

        let mut visited = FxHashSet::default();
        for node in tree.iter() {
            let chip = tree.chip(node);
            assert!(visited.insert(chip), "chip {chip} visited twice");
            if chip == source || destinations.contains(&chip) {
                assert_eq!(lookup.get(&chip), Some(&node), "lookup out of step at {chip}");
            }
            let hops = tree
                .children(node)
                .iter()
                .filter_map(|&(route, child)| Some((route.as_link()?, child?)))
                .collect::<Vec<_>>();
            if tree.children(node).is_empty() {
                assert!(
                    chip == source || destinations.contains(&chip),
                    "path ends in the middle of nowhere at {chip}"
                );
            }
            for (link, child) in hops {
                let child_chip = tree.chip(child);
                assert!(
                    machine.links_between(chip, child_chip).any(|l| l == link),
                    "hop {chip} -> {child_chip} does not follow a live {link} link"
                );
            }
        }

        assert!(visited.contains(&source));
        for destination in destinations {
            assert!(visited.contains(destination), "missed {destination}");
        }
    }

    fn ner(
        source: (i32, i32),
        destinations: &[(i32, i32)],
        width: i32,
        height: i32,
        wrap: bool,
        radius: u32,
        seed: u64,
    ) -> (RoutingTree, FxHashMap<Chip, NodeId>) {
        let ring = concentric_hexagons(radius, Chip::new(0, 0)).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(seed);
        let destinations = destinations
            .iter()
            .map(|&(x, y)| Chip::new(x, y))
            .collect::<Vec<_>>();
        ner_net(
            Chip::new(source.0, source.1),
            &destinations,
            width,
            height,
            wrap,
            &ring,
            &mut rng,
        )
    }

    #[test]
    fn ner_childless_net() {
        let (tree, lookup) = ner((0, 0), &[], 1, 1, true, 20, 0);
        assert_eq!(tree.chip(tree.root()), Chip::new(0, 0));
        assert!(tree.children(tree.root()).is_empty());
        assert_eq!(lookup.len(), 1);

        let (tree, lookup) = ner((0, 1), &[], 2, 2, true, 20, 0);
        assert_eq!(tree.chip(tree.root()), Chip::new(0, 1));
        assert_eq!(lookup.len(), 1);
    }

    #[test]
    fn ner_single_and_multiple_destinations() {
        // (source, destinations, width, height, wrap, radius)
        #[allow(clippy::type_complexity)]
        let cases: &[((i32, i32), &[(i32, i32)], i32, i32, bool, u32)] = &[
            // Single destinations in adjacent locations.
            ((1, 1), &[(2, 1)], 3, 3, true, 20),
            ((1, 1), &[(2, 1)], 3, 3, false, 20),
            ((1, 1), &[(0, 1)], 3, 3, true, 20),
            ((1, 1), &[(1, 0)], 3, 3, false, 20),
            ((1, 1), &[(2, 2)], 3, 3, true, 20),
            ((1, 1), &[(0, 0)], 3, 3, false, 20),
            // Non-adjacent, wrapping and not.
            ((0, 0), &[(9, 0)], 10, 10, true, 20),
            ((0, 0), &[(9, 0)], 10, 10, false, 20),
            ((0, 0), &[(0, 9)], 10, 10, true, 20),
            ((0, 0), &[(9, 9)], 10, 10, false, 20),
            // Lines of destinations.
            ((0, 0), &[(1, 0), (2, 0)], 3, 3, true, 20),
            ((0, 0), &[(0, 1), (0, 2)], 3, 3, false, 20),
            ((0, 0), &[(1, 1), (2, 2)], 3, 3, false, 20),
            // Destinations outside the neighbour-search radius.
            ((0, 0), &[(8, 8)], 9, 9, false, 3),
            ((0, 0), &[(5, 5)], 9, 9, true, 3),
            // Pairs within radius of each other but not of the source.
            ((0, 0), &[(10, 10), (11, 11), (30, 30), (31, 31)], 100, 100, false, 1),
            ((0, 0), &[(10, 10), (11, 11), (30, 30), (29, 29)], 40, 40, true, 1),
        ];
        for &(source, destinations, width, height, wrap, radius) in cases {
            let machine = if wrap {
                Machine::new(width, height)
            } else {
                testing::mesh_machine(width, height)
            };
            let (tree, lookup) = ner(source, destinations, width, height, wrap, radius, 99);
            let destinations = destinations
                .iter()
                .map(|&(x, y)| Chip::new(x, y))
                .collect::<Vec<_>>();
            check_tree(
                &tree,
                &lookup,
                Chip::new(source.0, source.1),
                &destinations,
                &machine,
            );
        }
    }

    #[test]
    fn ner_broadcast_and_scatter() {
        // One-to-most nets with a small radius maximise path crossings,
        // which is exactly where trunk reuse has to hold the tree shape
        // together.
        let machine = testing::mesh_machine(6, 6);
        let torus = Machine::new(6, 6);
        for seed in 0..20 {
            let destinations = (0..6)
                .flat_map(|x| (0..6).map(move |y| (x, y)))
                .filter(|&(x, y)| (x, y) != (2, 3) && (x + 7 * y + seed as i32) % 2 == 0)
                .collect::<Vec<_>>();
            for wrap in [false, true] {
                let (tree, lookup) = ner((2, 3), &destinations, 6, 6, wrap, 1, seed);
                let destinations = destinations
                    .iter()
                    .map(|&(x, y)| Chip::new(x, y))
                    .collect::<Vec<_>>();
                let machine = if wrap { &torus } else { &machine };
                check_tree(&tree, &lookup, Chip::new(2, 3), &destinations, machine);
            }
        }
    }

    #[test]
    fn dead_link_detection() {
        let mut machine = Machine::new(10, 10);
        machine.dead_links.insert((Chip::new(0, 0), Link::North));

        let tree = RoutingTree::new(Chip::new(0, 0));
        assert!(!route_has_dead_links(&tree, &machine));

        // A hop in the other direction over the same chips is fine.
        let mut tree = RoutingTree::new(Chip::new(0, 1));
        let child = tree.add_node(Chip::new(0, 0));
        tree.add_child(tree.root(), Route::Link(Link::South), child);
        assert!(!route_has_dead_links(&tree, &machine));

        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let child = tree.add_node(Chip::new(0, 1));
        tree.add_child(tree.root(), Route::Link(Link::North), child);
        assert!(route_has_dead_links(&tree, &machine));

        // A hop onto a dead chip counts too.
        let mut machine = Machine::new(10, 10);
        machine.dead_chips.insert(Chip::new(1, 1));
        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let child = tree.add_node(Chip::new(1, 1));
        tree.add_child(tree.root(), Route::Link(Link::NorthEast), child);
        assert!(route_has_dead_links(&tree, &machine));
    }

    #[test]
    fn disconnect_reports_broken_links() {
        let mut machine = Machine::new(10, 10);
        machine.dead_links.insert((Chip::new(0, 0), Link::North));

        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let east = tree.add_node(Chip::new(1, 0));
        let north = tree.add_node(Chip::new(0, 1));
        let far = tree.add_node(Chip::new(0, 2));
        tree.add_child(tree.root(), Route::Link(Link::East), east);
        tree.add_child(tree.root(), Route::Link(Link::North), north);
        tree.add_child(north, Route::Link(Link::North), far);

        let (copy, lookup, broken) = copy_and_disconnect_tree(&tree, &machine);
        assert_eq!(broken, vec![(Chip::new(0, 0), Chip::new(0, 1))]);
        // All live chips keep their nodes, including the cut-off branch.
        for chip in [(0, 0), (1, 0), (0, 1), (0, 2)] {
            assert!(lookup.contains_key(&Chip::new(chip.0, chip.1)));
        }
        // The intact hop survives with its direction.
        assert_eq!(
            copy.children(copy.root()),
            &[(Route::Link(Link::East), Some(lookup[&Chip::new(1, 0)]))]
        );
        // The severed branch is still internally connected.
        assert_eq!(copy.descendants(lookup[&Chip::new(0, 1)]).count(), 2);
    }

    #[test]
    fn disconnect_folds_out_dead_chips() {
        let mut machine = Machine::new(10, 10);
        machine.dead_chips.insert(Chip::new(1, 1));

        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let dead = tree.add_node(Chip::new(1, 1));
        let east = tree.add_node(Chip::new(2, 1));
        let north = tree.add_node(Chip::new(1, 2));
        tree.add_child(tree.root(), Route::Link(Link::NorthEast), dead);
        tree.add_child(dead, Route::Link(Link::East), east);
        tree.add_child(dead, Route::Link(Link::North), north);

        let (copy, lookup, broken) = copy_and_disconnect_tree(&tree, &machine);
        assert!(!lookup.contains_key(&Chip::new(1, 1)));
        assert_eq!(copy.iter().count(), 1);
        // Both grandchildren re-parented onto the root, neither adjacent.
        let mut broken = broken;
        broken.sort_unstable();
        assert_eq!(
            broken,
            vec![
                (Chip::new(0, 0), Chip::new(1, 2)),
                (Chip::new(0, 0), Chip::new(2, 1)),
            ]
        );
    }

    #[test]
    fn a_star_finds_connected_paths() {
        let working = Machine::new(10, 10);
        let mut lame = Machine::new(10, 10);
        lame.dead_links.insert((Chip::new(0, 0), Link::North));

        // (sink, heuristic target, sources)
        let cases: &[((i32, i32), (i32, i32), &[(i32, i32)])] = &[
            ((1, 0), (0, 0), &[(0, 0)]),
            ((2, 0), (0, 0), &[(0, 0)]),
            ((9, 9), (0, 0), &[(0, 0)]),
            // The direct route is severed by the dead link.
            ((0, 2), (0, 0), &[(0, 0)]),
            // The heuristic target hides behind other sources.
            ((0, 3), (0, 0), &[(0, 2), (0, 1), (0, 0)]),
            ((0, 3), (0, 2), &[(0, 2), (0, 1), (0, 0)]),
            // The heuristic target is far away from nearer sources.
            ((0, 0), (4, 4), &[(4, 4), (0, 1), (0, 2)]),
            ((0, 0), (0, 1), &[(4, 4), (5, 5), (0, 1)]),
        ];

        for machine in [&working, &lame] {
            for wrap in [true, false] {
                for &(sink, target, sources) in cases {
                    let sink = Chip::new(sink.0, sink.1);
                    let target = Chip::new(target.0, target.1);
                    let sources = sources
                        .iter()
                        .map(|&(x, y)| Chip::new(x, y))
                        .collect::<FxHashSet<_>>();
                    let path = a_star(sink, target, &sources, machine, wrap).unwrap();

                    // Starts at exactly one source...
                    assert!(sources.contains(&path[0].1));
                    assert_eq!(
                        path.iter().filter(|(_, chip)| sources.contains(chip)).count(),
                        1
                    );
                    // ...follows live links all the way to the sink...
                    let mut at = path[0];
                    for &(link, chip) in path[1..].iter().chain([&(Link::East, sink)]) {
                        assert!(
                            machine.links_between(at.1, chip).any(|l| l == at.0),
                            "hop {} -> {chip} over a dead or unreal {} link",
                            at.1,
                            at.0
                        );
                        at = (link, chip);
                    }
                    // ...and never revisits a chip or touches the sink.
                    let mut seen = FxHashSet::from_iter([sink]);
                    for &(_, chip) in &path {
                        assert!(seen.insert(chip), "path loops through {chip}");
                    }
                }
            }
        }
    }

    #[test]
    fn a_star_respects_link_direction() {
        // Every link is dead except west out of (1, 0): (0, 0) is
        // unreachable from anywhere, but can still be escaped.
        let mut machine = Machine::new(2, 1);
        for x in 0..2 {
            for link in Link::ALL {
                if !(x == 1 && link == Link::West) {
                    machine.dead_links.insert((Chip::new(x, 0), link));
                }
            }
        }

        let sources = FxHashSet::from_iter([Chip::new(0, 0)]);
        let result = a_star(Chip::new(1, 0), Chip::new(0, 0), &sources, &machine, true);
        assert_eq!(
            result,
            Err(RouteError::DisconnectedSubregion {
                from: Chip::new(1, 0),
                to: Chip::new(0, 0),
            })
        );

        let sources = FxHashSet::from_iter([Chip::new(1, 0)]);
        let path = a_star(Chip::new(0, 0), Chip::new(1, 0), &sources, &machine, true).unwrap();
        assert_eq!(path, vec![(Link::West, Chip::new(1, 0))]);
    }

    #[test]
    fn repair_leaves_clean_trees_alone() {
        let mut machine = Machine::new(10, 10);
        machine.dead_links.insert((Chip::new(0, 0), Link::West));
        machine.dead_chips.insert(Chip::new(1, 1));

        // A tree which skirts the dead chip and link.
        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let a = tree.add_node(Chip::new(0, 1));
        let b = tree.add_node(Chip::new(0, 2));
        let c = tree.add_node(Chip::new(1, 2));
        let d = tree.add_node(Chip::new(0, 3));
        tree.add_child(tree.root(), Route::Link(Link::North), a);
        tree.add_child(a, Route::Link(Link::North), b);
        tree.add_child(b, Route::Link(Link::East), c);
        tree.add_child(b, Route::Link(Link::North), d);

        let (copy, lookup) = avoid_dead_links(&tree, &machine, false).unwrap();
        assert_eq!(copy.iter().count(), 5);
        for node in tree.iter() {
            let chip = tree.chip(node);
            let copied = lookup[&chip];
            let children = |t: &RoutingTree, n| {
                let mut chips = t
                    .children(n)
                    .iter()
                    .filter_map(|&(_, c)| c.map(|c| t.chip(c)))
                    .collect::<Vec<_>>();
                chips.sort_unstable();
                chips
            };
            assert_eq!(children(&tree, node), children(&copy, copied));
        }
    }

    #[test]
    fn repair_reroutes_around_dead_topology() {
        let mut machine = Machine::new(10, 10);
        machine.dead_links.insert((Chip::new(4, 4), Link::North));
        for chip in [(1, 1), (2, 1), (3, 1), (4, 1), (1, 2), (1, 3), (1, 4)] {
            machine.dead_chips.insert(Chip::new(chip.0, chip.1));
        }

        // A hop over the dead link.
        let mut over_link = RoutingTree::new(Chip::new(4, 4));
        let c = over_link.add_node(Chip::new(4, 5));
        over_link.add_child(over_link.root(), Route::Link(Link::North), c);

        // A path straight through the wall of dead chips.
        let mut through_wall = RoutingTree::new(Chip::new(4, 0));
        let c1 = through_wall.add_node(Chip::new(4, 1));
        let c2 = through_wall.add_node(Chip::new(4, 2));
        through_wall.add_child(through_wall.root(), Route::Link(Link::North), c1);
        through_wall.add_child(c1, Route::Link(Link::North), c2);

        // A subtree stranded behind the wall.
        let mut behind_wall = RoutingTree::new(Chip::new(0, 0));
        let w1 = behind_wall.add_node(Chip::new(1, 1));
        let w2 = behind_wall.add_node(Chip::new(2, 2));
        let w3 = behind_wall.add_node(Chip::new(3, 2));
        let w4 = behind_wall.add_node(Chip::new(2, 3));
        behind_wall.add_child(behind_wall.root(), Route::Link(Link::NorthEast), w1);
        behind_wall.add_child(w1, Route::Link(Link::NorthEast), w2);
        behind_wall.add_child(w2, Route::Link(Link::East), w3);
        behind_wall.add_child(w2, Route::Link(Link::North), w4);

        for (tree, live_chips) in [
            (&over_link, vec![(4, 4), (4, 5)]),
            (&through_wall, vec![(4, 0), (4, 2)]),
            (&behind_wall, vec![(0, 0), (2, 2), (3, 2), (2, 3)]),
        ] {
            let (copy, lookup) = avoid_dead_links(tree, &machine, false).unwrap();

            assert_eq!(copy.chip(copy.root()), tree.chip(tree.root()));

            // Every live chip of the original is still reached.
            let reached = copy.chips().collect::<FxHashSet<_>>();
            for &(x, y) in &live_chips {
                assert!(reached.contains(&Chip::new(x, y)), "lost ({x}, {y})");
            }

            // The result is a tree over live links only.
            let mut seen = FxHashSet::default();
            for node in copy.iter() {
                let chip = copy.chip(node);
                assert!(seen.insert(chip), "cycle through {chip}");
                assert!(lookup.get(&chip) == Some(&node));
                for &(route, child) in copy.children(node) {
                    let (Some(link), Some(child)) = (route.as_link(), child) else {
                        continue;
                    };
                    assert!(
                        machine.links_between(chip, copy.chip(child)).any(|l| l == link),
                        "hop {chip} -> {} is not live",
                        copy.chip(child)
                    );
                }
            }
        }
    }

    fn place_two(source: (i32, i32), sink: (i32, i32)) -> (Vec<Net>, Placements, Allocations) {
        let nets = vec![Net::new(VertexId::new(0), [VertexId::new(1)])];
        let placements = [
            (VertexId::new(0), Chip::new(source.0, source.1)),
            (VertexId::new(1), Chip::new(sink.0, sink.1)),
        ]
        .into_iter()
        .collect::<Placements>();
        let allocations = [(
            VertexId::new(1),
            [(CORES, 1..3)].into_iter().collect::<FxHashMap<_, _>>(),
        )]
        .into_iter()
        .collect::<Allocations>();
        (nets, placements, allocations)
    }

    #[test]
    fn route_attaches_sink_cores() {
        let machine = Machine::new(4, 4);
        let (nets, placements, allocations) = place_two((0, 0), (2, 2));
        let mut rng = StdRng::seed_from_u64(0);
        let routes = route(
            &nets,
            &machine,
            &[],
            &placements,
            &allocations,
            &RouteOpts::default(),
            &mut rng,
        )
        .unwrap();

        let tree = &routes[&NetId::ZERO];
        assert_eq!(tree.chip(tree.root()), Chip::new(0, 0));
        let sink = tree
            .iter()
            .find(|&n| tree.chip(n) == Chip::new(2, 2))
            .expect("sink chip not reached");
        let terminals = tree
            .children(sink)
            .iter()
            .filter(|(_, child)| child.is_none())
            .map(|&(route, _)| route)
            .collect::<Vec<_>>();
        assert_eq!(terminals, vec![Route::core(1), Route::core(2)]);
    }

    #[test]
    fn route_honours_endpoint_constraints() {
        let machine = Machine::new(4, 4);
        let (nets, placements, allocations) = place_two((0, 0), (3, 1));
        let constraints = vec![Constraint::RouteEndpoint {
            vertex: VertexId::new(1),
            link: Link::East,
        }];
        let mut rng = StdRng::seed_from_u64(0);
        let routes = route(
            &nets,
            &machine,
            &constraints,
            &placements,
            &allocations,
            &RouteOpts::default(),
            &mut rng,
        )
        .unwrap();

        let tree = &routes[&NetId::ZERO];
        let sink = tree
            .iter()
            .find(|&n| tree.chip(n) == Chip::new(3, 1))
            .expect("sink chip not reached");
        assert_eq!(
            tree.children(sink)
                .iter()
                .filter(|(_, child)| child.is_none())
                .collect::<Vec<_>>(),
            vec![&(Route::Link(Link::East), None)]
        );
    }

    #[test]
    fn route_detours_around_dead_chips() {
        let mut machine = Machine::new(10, 10);
        machine.dead_chips.insert(Chip::new(1, 1));
        let (nets, placements, allocations) = place_two((0, 0), (2, 2));
        let mut rng = StdRng::seed_from_u64(1);
        let routes = route(
            &nets,
            &machine,
            &[],
            &placements,
            &allocations,
            &RouteOpts::default(),
            &mut rng,
        )
        .unwrap();

        let tree = &routes[&NetId::ZERO];
        let chips = tree.chips().collect::<FxHashSet<_>>();
        assert!(!chips.contains(&Chip::new(1, 1)), "routed through a dead chip");
        assert!(chips.contains(&Chip::new(2, 2)));
        // Hops only ever use live links.
        for node in tree.iter() {
            for &(route, child) in tree.children(node) {
                let (Some(link), Some(child)) = (route.as_link(), child) else {
                    continue;
                };
                assert!(machine
                    .links_between(tree.chip(node), tree.chip(child))
                    .any(|l| l == link));
            }
        }
    }

    #[test]
    fn route_fails_on_unreachable_sink() {
        // Every link is dead except west out of (1, 0), so nothing can
        // reach the sink's chip.
        let mut machine = Machine::new(2, 1);
        for x in 0..2 {
            for link in Link::ALL {
                if !(x == 1 && link == Link::West) {
                    machine.dead_links.insert((Chip::new(x, 0), link));
                }
            }
        }
        let (nets, placements, allocations) = place_two((0, 0), (1, 0));
        let mut rng = StdRng::seed_from_u64(0);
        let result = route(
            &nets,
            &machine,
            &[],
            &placements,
            &allocations,
            &RouteOpts::default(),
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(RouteError::DisconnectedSubregion { .. })
        ));
    }

    #[test]
    fn routing_is_deterministic_for_a_seed() {
        let machine = Machine::new(8, 8);
        let sinks = (1..12).map(VertexId::new).collect::<Vec<_>>();
        let nets = vec![Net::new(VertexId::new(0), sinks.clone())];
        let mut placements = Placements::default();
        placements.insert(VertexId::new(0), Chip::new(3, 3));
        for (i, &sink) in sinks.iter().enumerate() {
            placements.insert(sink, Chip::new((i as i32 * 5) % 8, (i as i32 * 3) % 8));
        }
        let allocations = sinks
            .iter()
            .map(|&sink| {
                (
                    sink,
                    [(CORES, 1..2)].into_iter().collect::<FxHashMap<_, _>>(),
                )
            })
            .collect::<Allocations>();

        let shape = |routes: &FxHashMap<NetId, RoutingTree>| {
            let tree = &routes[&NetId::ZERO];
            let mut edges = tree
                .iter()
                .flat_map(|n| {
                    tree.children(n)
                        .iter()
                        .filter_map(|&(route, child)| {
                            child.map(|c| (tree.chip(n), route, tree.chip(c)))
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            edges.sort_unstable_by_key(|&(a, r, b)| (a, b, r.index()));
            edges
        };

        let mut rng = StdRng::seed_from_u64(21);
        let first = route(
            &nets,
            &machine,
            &[],
            &placements,
            &allocations,
            &RouteOpts::default(),
            &mut rng,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let second = route(
            &nets,
            &machine,
            &[],
            &placements,
            &allocations,
            &RouteOpts::default(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(shape(&first), shape(&second));
    }
}
