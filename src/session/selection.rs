//! Tile Selection Policies
//!
//! How a tile is suggested to a participant who has not picked one.
//! Kept apart from the coordinator so clients and tests can swap it.

use rand::seq::SliceRandom;

use crate::canvas::tile::CanvasId;
use crate::core::rng::DeterministicRng;

/// Chooses one index from the empty slots.
pub trait TileSelectionPolicy: Send {
    /// Pick a tile from `empty` (ascending). `None` when nothing is empty.
    fn choose(&mut self, empty: &[usize]) -> Option<usize>;
}

/// Uniform random over the empty slots.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformRandom;

impl TileSelectionPolicy for UniformRandom {
    fn choose(&mut self, empty: &[usize]) -> Option<usize> {
        empty.choose(&mut rand::thread_rng()).copied()
    }
}

/// Reproducible choice from a seeded generator.
#[derive(Debug, Clone)]
pub struct Seeded {
    rng: DeterministicRng,
}

impl Seeded {
    /// Seed directly.
    pub fn new(seed: u64) -> Self {
        Self { rng: DeterministicRng::new(seed) }
    }

    /// Stable per participant and canvas.
    pub fn for_participant(canvas_id: CanvasId, participant: &[u8]) -> Self {
        Self { rng: DeterministicRng::for_participant(canvas_id.as_bytes(), participant) }
    }
}

impl TileSelectionPolicy for Seeded {
    fn choose(&mut self, empty: &[usize]) -> Option<usize> {
        self.rng.choose(empty).copied()
    }
}

/// Lowest empty index.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstEmpty;

impl TileSelectionPolicy for FirstEmpty {
    fn choose(&mut self, empty: &[usize]) -> Option<usize> {
        empty.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_yields_none() {
        assert_eq!(UniformRandom.choose(&[]), None);
        assert_eq!(Seeded::new(1).choose(&[]), None);
        assert_eq!(FirstEmpty.choose(&[]), None);
    }

    #[test]
    fn test_uniform_stays_in_set() {
        let empty = [2, 5, 7];
        let mut policy = UniformRandom;
        for _ in 0..100 {
            assert!(empty.contains(&policy.choose(&empty).unwrap()));
        }
    }

    #[test]
    fn test_uniform_reaches_last_slot() {
        let empty = [0, 1];
        let mut policy = UniformRandom;
        assert!((0..200).any(|_| policy.choose(&empty) == Some(1)));
    }

    #[test]
    fn test_seeded_reproducible() {
        let empty: Vec<usize> = (0..9).collect();
        let id = CanvasId::from_bytes([4; 16]);

        let mut a = Seeded::for_participant(id, b"alice");
        let mut b = Seeded::for_participant(id, b"alice");
        for _ in 0..20 {
            assert_eq!(a.choose(&empty), b.choose(&empty));
        }
    }

    #[test]
    fn test_first_empty() {
        assert_eq!(FirstEmpty.choose(&[3, 4]), Some(3));
    }
}
