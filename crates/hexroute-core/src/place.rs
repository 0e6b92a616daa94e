//! Simulated-annealing placement.
//!
//! Placement assigns every vertex a chip such that no chip's resources are
//! over-committed, while minimising the bounding-box cost of the nets. The
//! search is plain simulated annealing over swap moves: pick a vertex,
//! pick a nearby destination chip, evict just enough residents to make
//! room, and accept or reject the exchange by the Metropolis rule.
//!
//! The inner loop lives in [`AnnealingKernel`], which exposes placement
//! state and a [`run_steps`](AnnealingKernel::run_steps) batch interface;
//! [`place`] wraps it in a cooling schedule. Batches are atomic: the
//! schedule only inspects or abandons the state between them.

use std::collections::BTreeMap;
use std::iter::once;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::constraint::Constraint;
use crate::geom::Chip;
use crate::machine::{Machine, ResourceId, Resources};
use crate::netlist::{Net, Placements, VertexId};

/// A placement constraint the machine cannot satisfy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintError {
    /// A vertex is fixed to a dead or out-of-range chip.
    #[error("vertex {vertex} is fixed to chip {chip}, which is not part of the machine")]
    DeadChip {
        /// The fixed vertex.
        vertex: VertexId,
        /// The dead or out-of-range chip.
        chip: Chip,
    },

    /// A vertex is fixed to two different chips, directly or through a
    /// same-chip group.
    #[error("vertex {vertex} is given conflicting fixed locations")]
    Conflicting {
        /// The over-constrained vertex.
        vertex: VertexId,
    },

    /// The vertices fixed to one chip demand more than it has.
    #[error("the vertices fixed to chip {chip} over-subscribe resource {resource}")]
    Oversubscribed {
        /// The over-subscribed chip.
        chip: Chip,
        /// The resource that ran out.
        resource: ResourceId,
    },

    /// A constraint names a vertex with no resource requirements.
    #[error("constraint names vertex {vertex}, which is not in the netlist")]
    UnknownVertex {
        /// The unknown vertex.
        vertex: VertexId,
    },
}

/// A placement failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceError {
    /// The aggregate demand cannot fit on the machine's live chips.
    #[error("insufficient {resource} resources: {required} required, {available} available")]
    InsufficientResource {
        /// The resource that ran out.
        resource: ResourceId,
        /// How much of it the vertices demand.
        required: u64,
        /// How much of it the live chips offer.
        available: u64,
    },

    /// A constraint is unsatisfiable.
    #[error("invalid placement constraint")]
    InvalidConstraint(#[from] ConstraintError),
}

/// Knobs for the annealing schedule. These trade placement quality against
/// run time; none of them change what a valid output is.
#[derive(Debug, Clone)]
pub struct PlaceOpts {
    /// Scales the number of steps per temperature (the inner loop runs
    /// `effort` times the movable-vertex count steps per batch).
    pub effort: f64,
    /// Wall-clock budget. On expiry the best placement seen so far is
    /// returned; the budget is only checked between batches.
    pub timeout: Option<Duration>,
    /// Stop once the temperature has cooled this far.
    pub t_min: f64,
    /// Stop once a batch accepts less than this fraction of its moves.
    pub accept_floor: f64,
}

impl Default for PlaceOpts {
    fn default() -> Self {
        PlaceOpts {
            effort: 1.0,
            timeout: None,
            t_min: 1e-4,
            accept_floor: 5e-3,
        }
    }
}

/// The outcome of one [`AnnealingKernel::run_steps`] batch.
#[derive(Debug, Copy, Clone)]
pub struct StepStats {
    /// How many of the batch's moves were accepted.
    pub accepted: usize,
    /// The mean cost change of the accepted moves (0 if none were).
    pub mean_delta: f64,
    /// The total net cost after the batch.
    pub cost: f64,
}

/// How long the pure-Rust kernel may run before hinting, once, that the
/// problem is large enough to be worth tuning.
const WARN_AFTER: Duration = Duration::from_secs(3 * 60);

/// How many random chips to try for each vertex during initial placement
/// before falling back to a linear scan.
const INITIAL_PLACEMENT_ATTEMPTS: usize = 50;

fn fits(demand: &Resources, spare: &Resources) -> bool {
    demand
        .iter()
        .all(|(key, &need)| spare.get(key).copied().unwrap_or(0) >= need)
}

fn add_resources(target: &mut Resources, amount: &Resources) {
    for (&key, &value) in amount {
        *target.entry(key).or_insert(0) += value;
    }
}

/// Subtracts `amount` from `target`; the caller has already checked the
/// amounts fit.
fn sub_resources(target: &mut Resources, amount: &Resources) {
    for (&key, &value) in amount {
        let entry = target.entry(key).or_insert(0);
        *entry -= value;
    }
}

/// The smallest number of consecutive grid positions (wrapping at
/// `period`) which covers every value. Sorts and dedups `values` in place.
fn circular_span(values: &mut Vec<i32>, period: i32) -> i32 {
    values.sort_unstable();
    values.dedup();
    if values.len() <= 1 {
        return 0;
    }
    let mut max_gap = period - values.last().unwrap() + values.first().unwrap();
    for pair in values.windows(2) {
        max_gap = max_gap.max(pair[1] - pair[0]);
    }
    period - max_gap
}

/// Simulated-annealing placement state and inner loop.
///
/// Holds the current placement, the per-chip residents and spare
/// capacities, and the total net cost, and advances them one candidate
/// swap at a time. The caller owns the temperature schedule and drives the
/// kernel in batches via [`run_steps`](Self::run_steps); given the same
/// seed and inputs the kernel is fully deterministic.
#[derive(Debug)]
pub struct AnnealingKernel<'m> {
    machine: &'m Machine,
    wrap: bool,
    resources: FxHashMap<VertexId, Resources>,
    nets: Vec<Net>,
    vertex_nets: FxHashMap<VertexId, Vec<usize>>,
    fixed: FxHashSet<VertexId>,
    movable: Vec<VertexId>,
    placements: FxHashMap<VertexId, Chip>,
    chip_contents: FxHashMap<Chip, Vec<VertexId>>,
    spare: FxHashMap<Chip, Resources>,
    cost: f64,
    started: Instant,
    warned: bool,
}

impl<'m> AnnealingKernel<'m> {
    /// Builds a kernel over the given problem, placing every non-fixed
    /// vertex on a random chip with room for it.
    ///
    /// `spare` is the starting free capacity of each live chip (machine
    /// capacities minus reservations); the capacities consumed by `fixed`
    /// vertices must already have been deducted. Fails with
    /// [`PlaceError::InsufficientResource`] if some vertex fits nowhere.
    pub fn new<R: Rng>(
        machine: &'m Machine,
        resources: FxHashMap<VertexId, Resources>,
        nets: Vec<Net>,
        fixed: FxHashMap<VertexId, Chip>,
        mut spare: FxHashMap<Chip, Resources>,
        rng: &mut R,
    ) -> Result<Self, PlaceError> {
        let mut placements: FxHashMap<VertexId, Chip> = FxHashMap::default();
        let mut chip_contents: FxHashMap<Chip, Vec<VertexId>> = FxHashMap::default();

        let mut vertices = resources.keys().copied().collect::<Vec<_>>();
        vertices.sort_unstable();

        for &vertex in &vertices {
            if let Some(&chip) = fixed.get(&vertex) {
                placements.insert(vertex, chip);
                chip_contents.entry(chip).or_default().push(vertex);
            }
        }

        // Scatter the movable vertices: a handful of random draws each,
        // then a first-fit scan before giving up.
        let chips = machine.chips().collect::<Vec<_>>();
        for &vertex in &vertices {
            if fixed.contains_key(&vertex) {
                continue;
            }
            let demand = &resources[&vertex];
            let drawn = (!chips.is_empty())
                .then(|| {
                    (0..INITIAL_PLACEMENT_ATTEMPTS)
                        .map(|_| chips[rng.gen_range(0..chips.len())])
                        .find(|chip| fits(demand, &spare[chip]))
                })
                .flatten();
            let chip = drawn
                .or_else(|| chips.iter().copied().find(|chip| fits(demand, &spare[chip])))
                .ok_or_else(|| nowhere_to_place(demand, &spare))?;
            sub_resources(spare.get_mut(&chip).unwrap(), demand);
            placements.insert(vertex, chip);
            chip_contents.entry(chip).or_default().push(vertex);
        }

        let mut vertex_nets: FxHashMap<VertexId, Vec<usize>> = FxHashMap::default();
        for (index, net) in nets.iter().enumerate() {
            for vertex in once(net.source).chain(net.sinks.iter().copied()) {
                vertex_nets.entry(vertex).or_default().push(index);
            }
        }
        for indices in vertex_nets.values_mut() {
            indices.sort_unstable();
            indices.dedup();
        }

        let movable = vertices
            .iter()
            .copied()
            .filter(|v| !fixed.contains_key(v) && vertex_nets.contains_key(v))
            .collect::<Vec<_>>();

        let mut kernel = AnnealingKernel {
            machine,
            wrap: machine.has_wrap_around_links(1.0),
            resources,
            nets,
            vertex_nets,
            fixed: fixed.keys().copied().collect(),
            movable,
            placements,
            chip_contents,
            spare,
            cost: 0.0,
            started: Instant::now(),
            warned: false,
        };
        kernel.cost = (0..kernel.nets.len()).map(|i| kernel.net_cost(i)).sum();
        Ok(kernel)
    }

    /// The total cost of all nets under the current placement.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// The current placement.
    pub fn placements(&self) -> &FxHashMap<VertexId, Chip> {
        &self.placements
    }

    /// The number of vertices the kernel is free to move.
    pub fn movable_count(&self) -> usize {
        self.movable.len()
    }

    /// The bounding-box cost of one net under the current placement.
    ///
    /// A net spanning a `w` by `h` chip window costs
    /// `weight * sqrt((w + 1) * (h + 1)) * alpha(n)` where `alpha`
    /// compensates for the window underestimating the wiring of
    /// high-fan-out nets. On wrap-around machines each axis uses the
    /// smallest covering arc of the torus. Nets whose endpoints share one
    /// chip are free.
    fn net_cost(&self, index: usize) -> f64 {
        let net = &self.nets[index];
        if net.sinks.is_empty() {
            return 0.0;
        }
        let mut xs = Vec::with_capacity(net.sinks.len() + 1);
        let mut ys = Vec::with_capacity(net.sinks.len() + 1);
        for vertex in once(net.source).chain(net.sinks.iter().copied()) {
            // All net endpoints were placed by `new`.
            let chip = self.placements[&vertex];
            xs.push(chip.x);
            ys.push(chip.y);
        }
        let (width, height) = if self.wrap {
            (
                circular_span(&mut xs, self.machine.width),
                circular_span(&mut ys, self.machine.height),
            )
        } else {
            let (&x0, &x1) = (xs.iter().min().unwrap(), xs.iter().max().unwrap());
            let (&y0, &y1) = (ys.iter().min().unwrap(), ys.iter().max().unwrap());
            (x1 - x0, y1 - y0)
        };
        if width == 0 && height == 0 {
            return 0.0;
        }
        let n = net.sinks.len() + 1;
        let alpha = if n > 50 {
            2.7 * (n as f64 / 50.0).sqrt()
        } else {
            2.7
        };
        net.weight * (((width + 1) * (height + 1)) as f64).sqrt() * alpha
    }

    /// The residents of `chip` which, evicted greedily left to right,
    /// would free enough room for `demand`. Fixed residents are skipped.
    /// `None` if no such set exists; empty if the demand already fits.
    fn get_candidate_swap(&self, demand: &Resources, chip: Chip) -> Option<Vec<VertexId>> {
        let mut freed = self.spare[&chip].clone();
        let mut evicted = Vec::new();
        if fits(demand, &freed) {
            return Some(evicted);
        }
        for &resident in self.chip_contents.get(&chip).map(Vec::as_slice).unwrap_or(&[]) {
            if self.fixed.contains(&resident) {
                continue;
            }
            add_resources(&mut freed, &self.resources[&resident]);
            evicted.push(resident);
            if fits(demand, &freed) {
                return Some(evicted);
            }
        }
        None
    }

    /// Exchanges two groups of vertices between two chips, keeping the
    /// placement, per-chip residents, and spare capacities consistent.
    fn swap(&mut self, a: &[VertexId], chip_a: Chip, b: &[VertexId], chip_b: Chip) {
        for (group, from) in [(a, chip_a), (b, chip_b)] {
            for &vertex in group {
                self.chip_contents
                    .get_mut(&from)
                    .unwrap()
                    .retain(|&v| v != vertex);
                add_resources(self.spare.get_mut(&from).unwrap(), &self.resources[&vertex]);
            }
        }
        for (group, to) in [(a, chip_b), (b, chip_a)] {
            for &vertex in group {
                self.placements.insert(vertex, to);
                self.chip_contents.entry(to).or_default().push(vertex);
                sub_resources(self.spare.get_mut(&to).unwrap(), &self.resources[&vertex]);
            }
        }
    }

    /// Attempts a single swap move at the given temperature, drawing the
    /// destination within `distance_limit` chips of the source.
    ///
    /// Returns whether the move was applied and its cost change.
    pub fn step<R: Rng>(
        &mut self,
        distance_limit: i32,
        temperature: f64,
        rng: &mut R,
    ) -> (bool, f64) {
        if self.movable.is_empty() {
            return (false, 0.0);
        }
        let vertex = *self.movable.choose(rng).unwrap();
        let source = self.placements[&vertex];

        let d = distance_limit;
        let (w, h) = (self.machine.width, self.machine.height);
        let target = if self.wrap {
            Chip::new(
                rng.gen_range(source.x - d..=source.x + d),
                rng.gen_range(source.y - d..=source.y + d),
            )
            .wrap(w, h)
        } else {
            Chip::new(
                rng.gen_range((source.x - d).max(0)..=(source.x + d).min(w - 1)),
                rng.gen_range((source.y - d).max(0)..=(source.y + d).min(h - 1)),
            )
        };
        if target == source || !self.machine.contains_chip(target) {
            return (false, 0.0);
        }

        let demand = self.resources[&vertex].clone();
        let Some(evicted) = self.get_candidate_swap(&demand, target) else {
            return (false, 0.0);
        };

        // The room freed at the source must take everything coming back.
        let mut room = self.spare[&source].clone();
        add_resources(&mut room, &demand);
        let mut incoming = Resources::default();
        for other in &evicted {
            add_resources(&mut incoming, &self.resources[other]);
        }
        if !fits(&incoming, &room) {
            return (false, 0.0);
        }

        let mut affected = self.vertex_nets.get(&vertex).cloned().unwrap_or_default();
        for other in &evicted {
            affected.extend(self.vertex_nets.get(other).into_iter().flatten());
        }
        affected.sort_unstable();
        affected.dedup();

        let before: f64 = affected.iter().map(|&i| self.net_cost(i)).sum();
        self.swap(&[vertex], source, &evicted, target);
        let after: f64 = affected.iter().map(|&i| self.net_cost(i)).sum();
        let delta = after - before;

        let accept = delta <= 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();
        if accept {
            self.cost += delta;
            (true, delta)
        } else {
            self.swap(&[vertex], target, &evicted, source);
            (false, delta)
        }
    }

    /// Runs a batch of `n` steps at a fixed temperature and swap window.
    ///
    /// The batch runs to completion: callers wanting to pause, inspect, or
    /// abandon the anneal do so between batches.
    pub fn run_steps<R: Rng>(
        &mut self,
        n: usize,
        distance_limit: i32,
        temperature: f64,
        rng: &mut R,
    ) -> StepStats {
        if !self.warned && self.started.elapsed() >= WARN_AFTER {
            self.warned = true;
            warn!(
                elapsed_secs = self.started.elapsed().as_secs(),
                "placement annealing is taking a long time; consider lowering \
                 PlaceOpts::effort or setting a timeout"
            );
        }
        let mut accepted = 0;
        let mut delta_sum = 0.0;
        for _ in 0..n {
            let (ok, delta) = self.step(distance_limit, temperature, rng);
            if ok {
                accepted += 1;
                delta_sum += delta;
            }
        }
        StepStats {
            accepted,
            mean_delta: if accepted > 0 {
                delta_sum / accepted as f64
            } else {
                0.0
            },
            cost: self.cost,
        }
    }
}

/// Picks the report for a vertex which fits on no chip: the first of its
/// demands no single chip can satisfy.
fn nowhere_to_place(demand: &Resources, spare: &FxHashMap<Chip, Resources>) -> PlaceError {
    let mut demands = demand.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>();
    demands.sort_unstable();
    for &(resource, need) in &demands {
        let available = spare
            .values()
            .map(|r| r.get(&resource).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        if need > available {
            return PlaceError::InsufficientResource {
                resource,
                required: need.into(),
                available: available.into(),
            };
        }
    }
    // No single resource is to blame (or the machine has no live chips at
    // all); report the first demand.
    let (resource, need) = demands.first().copied().unwrap_or((crate::machine::CORES, 0));
    PlaceError::InsufficientResource {
        resource,
        required: need.into(),
        available: 0,
    }
}

/// Vertices merged into one placeable unit by same-chip constraints.
struct MergePlan {
    rep: FxHashMap<VertexId, VertexId>,
}

impl MergePlan {
    fn rep(&self, vertex: VertexId) -> VertexId {
        self.rep.get(&vertex).copied().unwrap_or(vertex)
    }
}

fn merge_groups(
    vertices_resources: &FxHashMap<VertexId, Resources>,
    constraints: &[Constraint],
) -> Result<MergePlan, ConstraintError> {
    let mut group_of: FxHashMap<VertexId, usize> = FxHashMap::default();
    let mut groups: Vec<Vec<VertexId>> = Vec::new();
    for constraint in constraints {
        let Constraint::SameChip(members) = constraint else {
            continue;
        };
        let target = match members.iter().find_map(|v| group_of.get(v)) {
            Some(&g) => g,
            None => {
                groups.push(Vec::new());
                groups.len() - 1
            }
        };
        for &member in members {
            if !vertices_resources.contains_key(&member) {
                return Err(ConstraintError::UnknownVertex { vertex: member });
            }
            match group_of.get(&member).copied() {
                Some(g) if g == target => {}
                Some(g) => {
                    // Two groups share this member; fold one into the other.
                    let moved = std::mem::take(&mut groups[g]);
                    for v in &moved {
                        group_of.insert(*v, target);
                    }
                    groups[target].extend(moved);
                }
                None => {
                    group_of.insert(member, target);
                    groups[target].push(member);
                }
            }
        }
    }

    let mut rep = FxHashMap::default();
    for group in &groups {
        if let Some(&leader) = group.iter().min() {
            for &member in group {
                rep.insert(member, leader);
            }
        }
    }
    Ok(MergePlan { rep })
}

/// The free capacity of every live chip once reservations are taken out.
fn spare_capacity(machine: &Machine, constraints: &[Constraint]) -> FxHashMap<Chip, Resources> {
    let mut spare = machine
        .chips()
        // Live chips always have resources.
        .map(|chip| (chip, machine.resources(chip).unwrap().clone()))
        .collect::<FxHashMap<_, _>>();
    for constraint in constraints {
        let Constraint::ReserveResource {
            resource,
            reservation,
            chip,
        } = constraint
        else {
            continue;
        };
        let amount = reservation.end.saturating_sub(reservation.start);
        let mut reserve = |resources: &mut Resources| {
            if let Some(capacity) = resources.get_mut(resource) {
                *capacity = capacity.saturating_sub(amount);
            }
        };
        match chip {
            Some(chip) => {
                if let Some(resources) = spare.get_mut(chip) {
                    reserve(resources);
                }
            }
            None => {
                for resources in spare.values_mut() {
                    reserve(resources);
                }
            }
        }
    }
    spare
}

/// Places every vertex on a chip.
///
/// Fails with [`PlaceError::InvalidConstraint`] if a fixed vertex lands on
/// a dead chip, is fixed twice, or over-subscribes a chip; fails with
/// [`PlaceError::InsufficientResource`] if the vertices cannot fit on the
/// machine. Otherwise the returned placement respects every chip's
/// capacity for every resource and every location constraint.
///
/// All tie-breaking goes through `rng`: the same seed and inputs always
/// give the same placement.
pub fn place<R: Rng>(
    vertices_resources: &FxHashMap<VertexId, Resources>,
    nets: &[Net],
    machine: &Machine,
    constraints: &[Constraint],
    opts: &PlaceOpts,
    rng: &mut R,
) -> Result<Placements, PlaceError> {
    let merge = merge_groups(vertices_resources, constraints)?;

    // Sum same-chip groups into their representative.
    let mut merged_resources: FxHashMap<VertexId, Resources> = FxHashMap::default();
    let mut vertices = vertices_resources.keys().copied().collect::<Vec<_>>();
    vertices.sort_unstable();
    for &vertex in &vertices {
        let entry = merged_resources.entry(merge.rep(vertex)).or_default();
        add_resources(entry, &vertices_resources[&vertex]);
    }
    let merged_nets = nets
        .iter()
        .map(|net| Net {
            source: merge.rep(net.source),
            sinks: net.sinks.iter().map(|&v| merge.rep(v)).collect(),
            weight: net.weight,
            key: net.key,
        })
        .collect::<Vec<_>>();

    // Collect fixed locations, folded through the merge.
    let mut fixed: FxHashMap<VertexId, Chip> = FxHashMap::default();
    for constraint in constraints {
        let Constraint::Location { vertex, chip } = *constraint else {
            continue;
        };
        if !vertices_resources.contains_key(&vertex) {
            return Err(ConstraintError::UnknownVertex { vertex }.into());
        }
        match fixed.insert(merge.rep(vertex), chip) {
            Some(previous) if previous != chip => {
                return Err(ConstraintError::Conflicting { vertex }.into());
            }
            _ => {}
        }
    }

    // Deduct reservations, then the fixed vertices, from chip capacities.
    let mut spare = spare_capacity(machine, constraints);
    let mut fixed_sorted = fixed.iter().map(|(&v, &c)| (v, c)).collect::<Vec<_>>();
    fixed_sorted.sort_unstable();
    for (vertex, chip) in fixed_sorted {
        if !machine.contains_chip(chip) {
            return Err(ConstraintError::DeadChip { vertex, chip }.into());
        }
        let room = spare.get_mut(&chip).unwrap();
        let mut demands = merged_resources[&vertex].iter().collect::<Vec<_>>();
        demands.sort_unstable_by_key(|&(key, _)| key);
        for (&resource, &need) in demands {
            let capacity = room.entry(resource).or_insert(0);
            if *capacity < need {
                return Err(ConstraintError::Oversubscribed { chip, resource }.into());
            }
            *capacity -= need;
        }
    }

    // An aggregate check first, so that an outright infeasible problem is
    // reported as such rather than as a failed random scatter.
    let mut required: BTreeMap<ResourceId, u64> = BTreeMap::new();
    for (&vertex, resources) in &merged_resources {
        if fixed.contains_key(&vertex) {
            continue;
        }
        for (&key, &amount) in resources {
            *required.entry(key).or_insert(0) += u64::from(amount);
        }
    }
    let mut available: BTreeMap<ResourceId, u64> = BTreeMap::new();
    for resources in spare.values() {
        for (&key, &amount) in resources {
            *available.entry(key).or_insert(0) += u64::from(amount);
        }
    }
    for (&resource, &need) in &required {
        let have = available.get(&resource).copied().unwrap_or(0);
        if need > have {
            return Err(PlaceError::InsufficientResource {
                resource,
                required: need,
                available: have,
            });
        }
    }

    let mut kernel =
        AnnealingKernel::new(machine, merged_resources, merged_nets, fixed, spare, rng)?;
    let best = if kernel.movable_count() > 0 && !kernel.nets.is_empty() {
        anneal(&mut kernel, opts, rng)
    } else {
        kernel.placements().clone()
    };

    // Fan group placements back out to every member.
    Ok(vertices
        .iter()
        .map(|&vertex| (vertex, best[&merge.rep(vertex)]))
        .collect())
}

/// Drives the kernel through a geometric cooling schedule and returns the
/// best placement seen.
fn anneal<R: Rng>(
    kernel: &mut AnnealingKernel<'_>,
    opts: &PlaceOpts,
    rng: &mut R,
) -> FxHashMap<VertexId, Chip> {
    let started = Instant::now();
    let iters = ((opts.effort * kernel.movable_count() as f64).ceil() as usize).max(1);
    let max_dim = kernel.machine.width.max(kernel.machine.height);
    let mut d_limit = max_dim;

    // Burn-in: at infinite temperature every move is accepted. The uphill
    // magnitudes set a starting temperature at which roughly 80% of
    // uphill moves will be accepted.
    let mut uphill = Vec::new();
    for _ in 0..iters {
        let (accepted, delta) = kernel.step(d_limit, f64::INFINITY, rng);
        if accepted && delta > 0.0 {
            uphill.push(delta);
        }
    }
    let mut t = match uphill.len() {
        0 => 1.0,
        n => (uphill.iter().sum::<f64>() / n as f64) / -(0.8f64.ln()),
    };

    let mut best = kernel.placements().clone();
    let mut best_cost = kernel.cost();
    loop {
        let stats = kernel.run_steps(iters, d_limit, t, rng);
        let ratio = stats.accepted as f64 / iters as f64;
        if kernel.cost() < best_cost {
            best_cost = kernel.cost();
            best = kernel.placements().clone();
        }
        debug!(
            temperature = t,
            acceptance = ratio,
            distance_limit = d_limit,
            cost = stats.cost,
            "annealing batch"
        );

        // Narrow the swap window as the acceptance ratio falls, keeping
        // the accept rate near the productive range.
        d_limit = ((d_limit as f64 * (1.0 - 0.44 + ratio)) as i32).clamp(1, max_dim);
        t *= if ratio > 0.96 {
            0.5
        } else if ratio > 0.8 {
            0.9
        } else if ratio > 0.15 {
            0.95
        } else {
            0.8
        };

        if t <= opts.t_min || ratio < opts.accept_floor {
            break;
        }
        if let Some(budget) = opts.timeout {
            if started.elapsed() >= budget {
                debug!("placement timed out; returning the best placement so far");
                break;
            }
        }
    }
    if kernel.cost() < best_cost {
        best = kernel.placements().clone();
    }
    best
}
