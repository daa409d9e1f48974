use bevy::prelude::Resource;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Random source shared by every simulation system
#[derive(Resource)]
pub struct SimRng(ChaCha8Rng);

impl SimRng {
    pub fn seeded(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self(ChaCha8Rng::from_entropy())
    }

    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

/// Uniform integer in `[min, max]`, bounds in either order
pub fn random_int<R: Rng + ?Sized>(rng: &mut R, min: i32, max: i32) -> i32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rng.gen_range(lo..=hi)
}

/// Uniform float in `[min, max)`, bounds in either order
pub fn random_float<R: Rng + ?Sized>(rng: &mut R, min: f32, max: f32) -> f32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if hi - lo <= f32::EPSILON {
        return lo;
    }
    rng.gen_range(lo..hi)
}

pub fn random_item<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(rng.gen_range(0..items.len()))
}

pub fn coin_flip<R: Rng + ?Sized>(rng: &mut R) -> bool {
    rng.gen_bool(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_bounds_are_accepted() {
        let mut rng = SimRng::seeded(1);
        for _ in 0..200 {
            let v = random_float(&mut rng, -1.0, -10.0);
            assert!((-10.0..=-1.0).contains(&v));
            let i = random_int(&mut rng, 3, 1);
            assert!((1..=3).contains(&i));
        }
    }

    #[test]
    fn degenerate_range_returns_bound() {
        let mut rng = SimRng::seeded(2);
        assert_eq!(random_float(&mut rng, 4.0, 4.0), 4.0);
        assert_eq!(random_int(&mut rng, 9, 9), 9);
    }

    #[test]
    fn empty_slice_has_no_item() {
        let mut rng = SimRng::seeded(3);
        let empty: [u8; 0] = [];
        assert!(random_item(&mut rng, &empty).is_none());
        assert_eq!(random_item(&mut rng, &[5]), Some(&5));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SimRng::seeded(42);
        let mut b = SimRng::seeded(42);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }
}
