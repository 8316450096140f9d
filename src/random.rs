//! Reproducible random streams for Lanczos start vectors.
//!
//! A [`RandomStream`] is a seeded `ChaCha8` generator addressed by *draw index*.
//! Draw `i` of a stream always yields the same double, however many draws came
//! before it on this process. [`RandomStream::seek`] jumps straight to a draw
//! index, so every rank can produce exactly its own slice of one global random
//! sequence. The resulting start vector is therefore identical for every
//! process count.
//!
//! An uninitialized stream ([`RandomStream::default`]) refuses to produce
//! numbers and reports [`ErrorKind::InvalidSeed`].

use crate::error::{ErrorKind, Result};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Offset added to the user-facing initial-vector id to form the generator seed.
pub const SEED_OFFSET: u64 = 123_432;

/// Number of 32-bit ChaCha words consumed by one draw.
const WORDS_PER_DRAW: u128 = 2;

/// Which end points a uniform draw may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interval {
    /// `[0, 1)`
    #[default]
    ClosedOpen,
    /// `(0, 1]`
    OpenClosed,
    /// `[0, 1]`
    ClosedClosed,
    /// `(0, 1)`
    OpenOpen,
}

impl Interval {
    fn map(self, bits: u64) -> f64 {
        const TWO_POW_M53: f64 = 1.0 / (1u64 << 53) as f64;
        const TWO_POW_M52: f64 = 1.0 / (1u64 << 52) as f64;
        match self {
            Interval::ClosedOpen => (bits >> 11) as f64 * TWO_POW_M53,
            Interval::OpenClosed => 1.0 - (bits >> 11) as f64 * TWO_POW_M53,
            Interval::ClosedClosed => (bits >> 11) as f64 / ((1u64 << 53) - 1) as f64,
            Interval::OpenOpen => ((bits >> 12) as f64 + 0.5) * TWO_POW_M52,
        }
    }
}

/// A seeded, seekable stream of uniform doubles.
#[derive(Debug, Clone, Default)]
pub struct RandomStream {
    rng: Option<ChaCha8Rng>,
    seed: Option<u64>,
}

impl RandomStream {
    pub fn initialize(seed: u64) -> Self {
        Self {
            rng: Some(ChaCha8Rng::seed_from_u64(seed)),
            seed: Some(seed),
        }
    }

    /// Seeds from an initial-vector id the way the solver's configuration names
    /// it: `SEED_OFFSET + |iv|`.
    pub fn from_initial_iv(iv: i64) -> Self {
        Self::initialize(SEED_OFFSET + iv.unsigned_abs())
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn is_initialized(&self) -> bool {
        self.rng.is_some()
    }

    fn rng(&mut self) -> Result<&mut ChaCha8Rng> {
        self.rng.as_mut().ok_or_else(|| ErrorKind::InvalidSeed.into())
    }

    /// Positions the stream so the next draw is draw number `draw_index`.
    pub fn seek(&mut self, draw_index: u64) -> Result<()> {
        let rng = self.rng()?;
        rng.set_word_pos(draw_index as u128 * WORDS_PER_DRAW);
        Ok(())
    }

    pub fn next_uniform(&mut self, interval: Interval) -> Result<f64> {
        let bits = self.rng()?.next_u64();
        Ok(interval.map(bits))
    }

    /// Fills `out` with consecutive draws.
    pub fn fill_uniform(&mut self, out: &mut [f64], interval: Interval) -> Result<()> {
        let rng = self.rng()?;
        for x in out.iter_mut() {
            *x = interval.map(rng.next_u64());
        }
        Ok(())
    }
}
