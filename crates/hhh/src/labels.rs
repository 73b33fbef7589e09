//! Prefix-length combination tables for the lattice walk.
//!
//! Each table enumerates the (source, destination) prefix-length pairs of
//! one address family, inversely ordered by the sum of the lengths. The
//! walk depends on this order: a coarser label visited too early would
//! absorb traffic its finer labels should have claimed first.

use odflow::AddrFamily;

pub const IPV4_LABELS: [(u8, u8); 25] = [
    (32, 32),
    (32, 24),
    (24, 32),
    (32, 16),
    (16, 32),
    (24, 24),
    (32, 8),
    (8, 32),
    (24, 16),
    (16, 24),
    (32, 0),
    (0, 32),
    (24, 8),
    (8, 24),
    (16, 16),
    (24, 0),
    (0, 24),
    (16, 8),
    (8, 16),
    (16, 0),
    (0, 16),
    (8, 8),
    (8, 0),
    (0, 8),
    (0, 0),
];

/// IPv6 heuristics: 39 of the 81 combinations over
/// {0, 16, 32, 48, 64, 112, 128}; pairs unlikely to matter are skipped.
pub const IPV6_LABELS: [(u8, u8); 39] = [
    (128, 128),
    (128, 112),
    (112, 128),
    (112, 112),
    (128, 64),
    (64, 128),
    (128, 48),
    (48, 128),
    (112, 64),
    (64, 112),
    (128, 32),
    (32, 128),
    (128, 16),
    (16, 128),
    (128, 0),
    (0, 128),
    (64, 64),
    (64, 32),
    (32, 64),
    (48, 48),
    (64, 16),
    (16, 64),
    (48, 32),
    (32, 48),
    (64, 0),
    (0, 64),
    (48, 16),
    (16, 48),
    (32, 32),
    (48, 0),
    (0, 48),
    (32, 16),
    (16, 32),
    (32, 0),
    (0, 32),
    (16, 16),
    (16, 0),
    (0, 16),
    (0, 0),
];

pub const PROTO_LABELS: [(u8, u8); 5] = [(24, 24), (24, 8), (8, 24), (8, 8), (0, 0)];

pub fn labels_for(af: AddrFamily) -> &'static [(u8, u8)] {
    match af {
        AddrFamily::Inet => &IPV4_LABELS,
        AddrFamily::Inet6 => &IPV6_LABELS,
        AddrFamily::Proto => &PROTO_LABELS,
    }
}

/// The sub-lattice bit-step sequence a refinement chain follows.
pub fn next_step(step: u8) -> u8 {
    match step {
        0 => 4,
        4 => 2,
        2 => 1,
        _ => 0,
    }
}

/// Label of a refinement task: the parent label moved by the step
/// difference along the longer dimension, or both when equal.
pub fn child_label(label: (u8, u8), step: u8, child_step: u8) -> (u8, u8) {
    let diff = child_step as i16 - step as i16;
    let (l0, l1) = (label.0 as i16, label.1 as i16);
    let moved = if l0 == l1 {
        (l0 + diff, l1 + diff)
    } else if l0 > l1 {
        (l0 + diff, l1)
    } else {
        (l0, l1 + diff)
    };
    (moved.0 as u8, moved.1 as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_sum_order(labels: &[(u8, u8)]) {
        for pair in labels.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(
                a.0 as u16 + a.1 as u16 >= b.0 as u16 + b.1 as u16,
                "{:?} before {:?}",
                a,
                b
            );
        }
    }

    #[test]
    fn tables_are_in_non_increasing_sum_order() {
        assert_sum_order(&IPV4_LABELS);
        assert_sum_order(&IPV6_LABELS);
        assert_sum_order(&PROTO_LABELS);
    }

    #[test]
    fn ipv4_table_covers_the_full_grid() {
        for l0 in [0u8, 8, 16, 24, 32] {
            for l1 in [0u8, 8, 16, 24, 32] {
                assert!(IPV4_LABELS.contains(&(l0, l1)), "missing ({}, {})", l0, l1);
            }
        }
    }

    #[test]
    fn step_sequence_descends_to_zero() {
        assert_eq!(next_step(0), 4);
        assert_eq!(next_step(4), 2);
        assert_eq!(next_step(2), 1);
        assert_eq!(next_step(1), 0);
    }

    #[test]
    fn child_labels_move_by_the_step_difference() {
        // first refinement jumps four bits finer on both sides
        assert_eq!(child_label((24, 24), 0, 4), (28, 28));
        // subsequent refinements back off toward the lattice label
        assert_eq!(child_label((28, 28), 4, 2), (26, 26));
        assert_eq!(child_label((26, 26), 2, 1), (25, 25));
        // unequal labels move only the longer side
        assert_eq!(child_label((28, 24), 4, 2), (26, 24));
    }
}
