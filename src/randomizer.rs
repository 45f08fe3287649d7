use rand::{RngCore, SeedableRng as _, seq::SliceRandom};
use rand_pcg::Pcg32;

use crate::piece::PieceKind;

/// 7-bag piece generator.
///
/// Every run of seven draws starting at a bag boundary yields each kind once.
/// The bag is shuffled with Fisher-Yates through the pluggable `rng`; two
/// randomizers built from the same seed produce the same infinite sequence.
#[derive(Debug, Clone)]
pub struct Randomizer<R = Pcg32> {
    rng: R,
    bag: Vec<PieceKind>,
}

impl Randomizer<Pcg32> {
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(Pcg32::seed_from_u64(seed))
    }

    /// Seeded from OS entropy; not reproducible.
    pub fn from_entropy() -> Self {
        Self::with_rng(Pcg32::from_entropy())
    }
}

impl<R: RngCore> Randomizer<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            bag: Vec::with_capacity(PieceKind::ALL.len()),
        }
    }

    pub fn next(&mut self) -> PieceKind {
        if self.bag.is_empty() {
            self.bag.extend_from_slice(&PieceKind::ALL);
            self.bag.shuffle(&mut self.rng);
        }
        // the bag was just refilled if it was empty
        self.bag.pop().unwrap_or(PieceKind::T)
    }
}
