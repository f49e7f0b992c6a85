//! Seeded, index-parallel evaluation shared by the resampler diagnostics, the
//! bootstrap and the jackknife.
//!
//! Work item `i` always receives a `SmallRng` seeded with `seed + i`, so the
//! results do not depend on how rayon schedules the items.

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Creates a progress bar of length `len`, hidden unless `enabled`.
pub fn progress_bar(len: usize, label: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(label.to_string());
    pb
}

/// Evaluates `f(i, rng_i)` for `i in 0..n` in parallel and collects the
/// results in index order.
pub fn run_indexed<T, F>(n: usize, seed: u64, pb: &ProgressBar, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, &mut SmallRng) -> T + Sync,
{
    let out = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
            let value = f(i, &mut rng);
            pb.inc(1);
            value
        })
        .collect();
    pb.finish_with_message("Done!");
    out
}

/// Like [`run_indexed`], but updates `items` in place and stops at the first
/// error.
pub fn try_for_each_indexed<T, E, F>(items: &mut [T], seed: u64, pb: &ProgressBar, f: F) -> Result<(), E>
where
    T: Send,
    E: Send,
    F: Fn(usize, &mut T, &mut SmallRng) -> Result<(), E> + Sync,
{
    let out = items.par_iter_mut().enumerate().try_for_each(|(i, item)| {
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
        f(i, item, &mut rng)?;
        pb.inc(1);
        Ok(())
    });
    pb.finish_with_message("Done!");
    out
}
