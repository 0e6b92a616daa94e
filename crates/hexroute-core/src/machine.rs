//! The machine model: mesh dimensions, per-chip resources, and dead
//! topology.
//!
//! The model assumes that in most systems almost everything is uniform and
//! working: resources are described by a single default map plus a sparse
//! set of per-chip exceptions, and faults by sets of dead chips and dead
//! links.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::geom::Chip;
use crate::link::Link;

identifier!(ResourceId, usize);

/// The conventional resource id for (monitor and application) processor
/// cores. Nothing in the library special-cases it.
pub const CORES: ResourceId = ResourceId::new(0);

/// The conventional resource id for off-die SDRAM, in bytes.
pub const SDRAM: ResourceId = ResourceId::new(1);

/// The conventional resource id for on-die SRAM, in bytes.
pub const SRAM: ResourceId = ResourceId::new(2);

/// A quantity of each resource, keyed by opaque resource id.
pub type Resources = FxHashMap<ResourceId, u32>;

/// Interns resource names to [`ResourceId`]s.
///
/// Resource ids are opaque: the library compares them for equality and
/// nothing more, so applications are free to define their own. The
/// registry pre-registers the three conventional ids ([`CORES`],
/// [`SDRAM`], [`SRAM`]).
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    names: Vec<String>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        ResourceRegistry {
            names: vec!["cores".to_owned(), "sdram".to_owned(), "sram".to_owned()],
        }
    }
}

impl ResourceRegistry {
    /// Returns the id registered for `name`, registering it first if
    /// needed.
    pub fn register(&mut self, name: &str) -> ResourceId {
        match self.names.iter().position(|n| n == name) {
            Some(i) => ResourceId::new(i),
            None => {
                self.names.push(name.to_owned());
                ResourceId::new(self.names.len() - 1)
            }
        }
    }

    /// The name registered for an id, if any.
    pub fn name(&self, id: ResourceId) -> Option<&str> {
        self.names.get(id.inner()).map(String::as_str)
    }
}

/// A lookup of a chip outside the live machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chip {chip} is not part of the machine")]
pub struct OutOfBounds {
    /// The dead or out-of-range coordinate.
    pub chip: Chip,
}

/// The resources available in a machine.
///
/// Chip coordinates form `{0..width-1} x {0..height-1}`; opposite edges
/// may be joined by wrap-around links. The structure is transparent: all
/// fields are public and the methods are utilities over them.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Width of the system in chips.
    pub width: i32,
    /// Height of the system in chips.
    pub height: i32,
    /// Resources available on chips not listed in
    /// `chip_resource_exceptions`.
    pub chip_resources: Resources,
    /// Per-chip deviations from `chip_resources`. Every exception must
    /// carry exactly the same key set as `chip_resources`.
    pub chip_resource_exceptions: FxHashMap<Chip, Resources>,
    /// Chips which are completely unavailable. Links leaving a dead chip
    /// are implicitly dead.
    pub dead_chips: FxHashSet<Chip>,
    /// Dead links. Links have two directions and both should be listed if
    /// the link is dead both ways (the typical case).
    pub dead_links: FxHashSet<(Chip, Link)>,
}

impl Machine {
    /// Creates a fully-working machine with the default chip resources:
    /// 18 cores, 128 MiB of SDRAM and 32 KiB of SRAM.
    pub fn new(width: i32, height: i32) -> Machine {
        assert!(width > 0 && height > 0, "machine dimensions must be positive");
        let chip_resources = [
            (CORES, 18),
            (SDRAM, 128 * 1024 * 1024),
            (SRAM, 32 * 1024),
        ]
        .into_iter()
        .collect();
        Machine {
            width,
            height,
            chip_resources,
            chip_resource_exceptions: FxHashMap::default(),
            dead_chips: FxHashSet::default(),
            dead_links: FxHashSet::default(),
        }
    }

    /// Wraps a coordinate onto the machine's torus.
    pub fn wrap(&self, chip: Chip) -> Chip {
        chip.wrap(self.width, self.height)
    }

    /// Whether the given chip is present and alive.
    pub fn contains_chip(&self, chip: Chip) -> bool {
        (0..self.width).contains(&chip.x)
            && (0..self.height).contains(&chip.y)
            && !self.dead_chips.contains(&chip)
    }

    /// Whether the given link leaving the given chip is present and alive.
    pub fn contains_link(&self, chip: Chip, link: Link) -> bool {
        self.contains_chip(chip) && !self.dead_links.contains(&(chip, link))
    }

    /// The resources available on a chip.
    pub fn resources(&self, chip: Chip) -> Result<&Resources, OutOfBounds> {
        if !self.contains_chip(chip) {
            return Err(OutOfBounds { chip });
        }
        Ok(self
            .chip_resource_exceptions
            .get(&chip)
            .unwrap_or(&self.chip_resources))
    }

    /// Overrides the resources available on a chip.
    pub fn set_resources(&mut self, chip: Chip, resources: Resources) -> Result<(), OutOfBounds> {
        if !self.contains_chip(chip) {
            return Err(OutOfBounds { chip });
        }
        self.chip_resource_exceptions.insert(chip, resources);
        Ok(())
    }

    /// Iterates over the live chips, in a fixed coordinate order.
    pub fn chips(&self) -> impl Iterator<Item = Chip> + '_ {
        (0..self.width)
            .flat_map(|x| (0..self.height).map(move |y| Chip::new(x, y)))
            .filter(|&chip| self.contains_chip(chip))
    }

    /// Iterates over the live links of live chips.
    pub fn links(&self) -> impl Iterator<Item = (Chip, Link)> + '_ {
        self.chips().flat_map(move |chip| {
            Link::ALL
                .into_iter()
                .filter(move |&link| self.contains_link(chip, link))
                .map(move |link| (chip, link))
        })
    }

    /// The live links which take a hop from `a` to `b` (wrap-aware).
    ///
    /// Usually one link at most, but tiny machines can be doubly
    /// connected; links come out in numeric order.
    pub fn links_between(&self, a: Chip, b: Chip) -> impl Iterator<Item = Link> + '_ {
        Link::ALL.into_iter().filter(move |&link| {
            self.wrap(a.step(link)) == b && self.contains_link(a, link) && self.contains_chip(b)
        })
    }

    /// Whether the machine has a usable set of wrap-around links.
    ///
    /// Counts the links whose hop crosses the edge of the system and
    /// returns true iff at least `threshold` of them are alive. Callers
    /// wanting strictly complete wrap-around pass 1.0.
    pub fn has_wrap_around_links(&self, threshold: f64) -> bool {
        let mut total = 0u32;
        let mut live = 0u32;
        for x in 0..self.width {
            for y in 0..self.height {
                let chip = Chip::new(x, y);
                for link in Link::ALL {
                    let next = chip.step(link);
                    if next == self.wrap(next) {
                        continue;
                    }
                    total += 1;
                    if self.contains_link(chip, link) {
                        live += 1;
                    }
                }
            }
        }
        f64::from(live) >= threshold * f64::from(total)
    }

    /// Whether this machine fits within `other`: the dimensions match,
    /// everything alive here is alive there, and every resource capacity
    /// there is at least the capacity here.
    pub fn is_subset(&self, other: &Machine) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        for chip in self.chips() {
            if !other.contains_chip(chip) {
                return false;
            }
            // Lookups cannot fail: the chip is live in both machines.
            let ours = self.resources(chip).unwrap();
            let theirs = other.resources(chip).unwrap();
            let covered = ours
                .iter()
                .all(|(key, &amount)| theirs.get(key).is_some_and(|&have| have >= amount));
            if !covered || ours.len() != theirs.len() {
                return false;
            }
        }
        self.links()
            .all(|(chip, link)| other.contains_link(chip, link))
    }
}

impl PartialEq for Machine {
    fn eq(&self, other: &Machine) -> bool {
        // Exceptions which restate the default resources describe the same
        // system, so equality goes through the effective per-chip
        // resources rather than the raw maps.
        self.width == other.width
            && self.height == other.height
            && self.dead_chips == other.dead_chips
            && self.dead_links == other.dead_links
            && (0..self.width).all(|x| {
                (0..self.height).all(|y| {
                    let chip = Chip::new(x, y);
                    let ours = self.chip_resource_exceptions.get(&chip).unwrap_or(&self.chip_resources);
                    let theirs = other
                        .chip_resource_exceptions
                        .get(&chip)
                        .unwrap_or(&other.chip_resources);
                    ours == theirs
                })
            })
    }
}

impl Eq for Machine {}
