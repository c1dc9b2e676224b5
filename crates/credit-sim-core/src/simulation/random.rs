use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Domain tag separating idiosyncratic debtor streams from the shock stream.
const IDIOSYNCRATIC_STREAM: u64 = 0x6A09_E667_F3BC_C908;

/// Standard normal variate via the Box–Muller transform.
///
/// `u1` is drawn from (0, 1] so the logarithm is always finite.
pub fn box_muller<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).sin()
}

/// SplitMix64 finaliser.
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for the idiosyncratic stream of one (debtor, path) pair.
pub fn substream_seed(run_seed: u64, debtor_index: usize, path_index: usize) -> u64 {
    let mut h = splitmix64(run_seed ^ IDIOSYNCRATIC_STREAM);
    h = splitmix64(h ^ debtor_index as u64);
    splitmix64(h ^ path_index as u64)
}

/// Generator for one (debtor, path) idiosyncratic stream.
pub fn path_rng(run_seed: u64, debtor_index: usize, path_index: usize) -> StdRng {
    StdRng::seed_from_u64(substream_seed(run_seed, debtor_index, path_index))
}
