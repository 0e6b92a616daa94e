//! Utilities for writing tests.

use crate::geom::Chip;
use crate::link::Link;
use crate::machine::Machine;

/// A machine with every wrap-around link dead: a plain mesh.
///
/// Default chip resources, all chips alive.
pub fn mesh_machine(width: i32, height: i32) -> Machine {
    let mut machine = Machine::new(width, height);
    for x in 0..width {
        for y in 0..height {
            let chip = Chip::new(x, y);
            for link in Link::ALL {
                let next = chip.step(link);
                if next != next.wrap(width, height) {
                    machine.dead_links.insert((chip, link));
                }
            }
        }
    }
    machine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_machine_has_no_wrap_links() {
        let machine = mesh_machine(4, 3);
        assert!(!machine.has_wrap_around_links(1.0));
        assert!(!machine.has_wrap_around_links(0.01));
        // Interior links are untouched.
        assert!(machine.contains_link(Chip::new(1, 1), Link::East));
        assert!(!machine.contains_link(Chip::new(3, 1), Link::East));
    }
}
