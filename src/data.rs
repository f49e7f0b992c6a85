//! Trial data: an ordered list of stimulus blocks.

use rand::Rng;
use rand_distr::{Binomial, Distribution};

use crate::error::{PsiError, Result};

/// One block of trials presented at a single stimulus intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub intensity: f64,
    pub n_trials: u32,
    pub n_correct: u32,
}

impl Block {
    /// Observed proportion of correct responses.
    pub fn proportion(&self) -> f64 {
        if self.n_trials == 0 {
            0.0
        } else {
            self.n_correct as f64 / self.n_trials as f64
        }
    }
}

/// Behavioural data from an `n_alternatives`-alternative task
/// (`n_alternatives == 1` means yes/no).
#[derive(Debug, Clone, PartialEq)]
pub struct TrialData {
    blocks: Vec<Block>,
    n_alternatives: u32,
}

impl TrialData {
    /// Builds a data set from parallel arrays of intensities, trial counts and
    /// correct counts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use psi_asir::data::TrialData;
    ///
    /// let data = TrialData::new(&[1.0, 2.0, 3.0], &[20, 20, 20], &[11, 15, 19], 2).unwrap();
    /// assert_eq!(data.n_blocks(), 3);
    /// assert_eq!(data.n_correct(1), 15);
    /// ```
    pub fn new(
        intensities: &[f64],
        n_trials: &[u32],
        n_correct: &[u32],
        n_alternatives: u32,
    ) -> Result<Self> {
        if n_trials.len() != intensities.len() {
            return Err(PsiError::LengthMismatch {
                what: "n_trials",
                expected: intensities.len(),
                actual: n_trials.len(),
            });
        }
        if n_correct.len() != intensities.len() {
            return Err(PsiError::LengthMismatch {
                what: "n_correct",
                expected: intensities.len(),
                actual: n_correct.len(),
            });
        }
        let blocks = intensities
            .iter()
            .zip(n_trials)
            .zip(n_correct)
            .map(|((&intensity, &n_trials), &n_correct)| Block {
                intensity,
                n_trials,
                n_correct,
            })
            .collect();
        Self::from_blocks(blocks, n_alternatives)
    }

    pub fn from_blocks(blocks: Vec<Block>, n_alternatives: u32) -> Result<Self> {
        if blocks.is_empty() {
            return Err(PsiError::InvalidData("data set has no blocks".into()));
        }
        if n_alternatives == 0 {
            return Err(PsiError::InvalidData(
                "number of alternatives must be at least 1".into(),
            ));
        }
        for (i, block) in blocks.iter().enumerate() {
            if !block.intensity.is_finite() {
                return Err(PsiError::InvalidData(format!(
                    "block {i} has a non-finite intensity"
                )));
            }
            if block.n_correct > block.n_trials {
                return Err(PsiError::InvalidData(format!(
                    "block {i} has {} correct out of {} trials",
                    block.n_correct, block.n_trials
                )));
            }
        }
        Ok(Self {
            blocks,
            n_alternatives,
        })
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn n_alternatives(&self) -> u32 {
        self.n_alternatives
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn intensity(&self, i: usize) -> f64 {
        self.blocks[i].intensity
    }

    pub fn n_trials(&self, i: usize) -> u32 {
        self.blocks[i].n_trials
    }

    pub fn n_correct(&self, i: usize) -> u32 {
        self.blocks[i].n_correct
    }

    pub fn intensities(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.intensity).collect()
    }

    pub fn correct_counts(&self) -> Vec<u32> {
        self.blocks.iter().map(|b| b.n_correct).collect()
    }

    /// Smallest and largest intensity.
    pub fn intensity_range(&self) -> (f64, f64) {
        self.blocks
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), b| {
                (lo.min(b.intensity), hi.max(b.intensity))
            })
    }

    /// Replaces the correct counts, keeping intensities and trial counts.
    pub fn set_correct(&mut self, n_correct: &[u32]) -> Result<()> {
        if n_correct.len() != self.blocks.len() {
            return Err(PsiError::LengthMismatch {
                what: "n_correct",
                expected: self.blocks.len(),
                actual: n_correct.len(),
            });
        }
        for (i, (block, &k)) in self.blocks.iter_mut().zip(n_correct).enumerate() {
            if k > block.n_trials {
                return Err(PsiError::InvalidData(format!(
                    "block {i} has {k} correct out of {} trials",
                    block.n_trials
                )));
            }
            block.n_correct = k;
        }
        Ok(())
    }

    /// Copy of the data with different correct counts.
    pub fn with_correct(&self, n_correct: &[u32]) -> Result<Self> {
        let mut out = self.clone();
        out.set_correct(n_correct)?;
        Ok(out)
    }

    /// Draws binomial correct counts with the data's trial counts and the
    /// per-block success probabilities `probs`.
    pub fn simulate<R: Rng + ?Sized>(&self, probs: &[f64], rng: &mut R) -> Result<Vec<u32>> {
        if probs.len() != self.blocks.len() {
            return Err(PsiError::LengthMismatch {
                what: "probabilities",
                expected: self.blocks.len(),
                actual: probs.len(),
            });
        }
        self.blocks
            .iter()
            .zip(probs)
            .map(|(block, &p)| {
                if p.is_nan() {
                    return Err(PsiError::InvalidData(format!(
                        "success probability at intensity {} is NaN",
                        block.intensity
                    )));
                }
                let binomial = Binomial::new(block.n_trials as u64, p.clamp(0.0, 1.0))
                    .map_err(|e| PsiError::InvalidData(e.to_string()))?;
                Ok(binomial.sample(&mut *rng) as u32)
            })
            .collect()
    }

    /// Copy of the data with block `index` removed.
    pub fn without_block(&self, index: usize) -> Result<Self> {
        if index >= self.blocks.len() {
            return Err(PsiError::InvalidArgument("block index out of range"));
        }
        let blocks = self
            .blocks
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != index)
            .map(|(_, b)| *b)
            .collect();
        Self::from_blocks(blocks, self.n_alternatives)
    }
}
