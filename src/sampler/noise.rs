//! Seeded Gaussian noise.
//!
//! All randomness in a generation request flows from one [`ChaCha8Rng`]
//! built from the request seed.

use ndarray::{Array, Dimension, ShapeBuilder};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// Creates the generator for a request seed.
pub fn rng_from_seed(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Draws an array of standard normal samples with the given shape.
pub fn randn<Sh, D>(shape: Sh, rng: &mut ChaCha8Rng) -> Array<f32, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || StandardNormal.sample(&mut *rng))
}

/// Draws standard normal samples shaped like `arr`.
pub fn randn_like<D: Dimension>(arr: &Array<f32, D>, rng: &mut ChaCha8Rng) -> Array<f32, D> {
    randn(arr.raw_dim(), rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn same_seed_same_noise() {
        let a: Array4<f32> = randn((1, 2, 3, 4), &mut rng_from_seed(7));
        let b: Array4<f32> = randn((1, 2, 3, 4), &mut rng_from_seed(7));
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_different_noise() {
        let a: Array4<f32> = randn((1, 2, 3, 4), &mut rng_from_seed(7));
        let b: Array4<f32> = randn((1, 2, 3, 4), &mut rng_from_seed(8));
        assert_ne!(a, b);
    }

    #[test]
    fn roughly_standard_normal() {
        let noise: Array4<f32> = randn((4, 8, 32, 16), &mut rng_from_seed(42));
        let n = noise.len() as f32;
        let mean = noise.sum() / n;
        let var = noise.mapv(|v| (v - mean) * (v - mean)).sum() / n;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.1, "variance {}", var);
    }
}
