pub use ndarray::prelude::*;
pub use rand::Rng;
pub use rand_distr::StandardNormal;

use crate::traits::*;
use num_traits::{Float, FromPrimitive};

impl<T> SampleOps for ndarray::Array2<T>
where
    T: Float + FromPrimitive,
{
    type Mat = Self;
    type Scalar = T;

    fn runif_with<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat {
        Array2::from_shape_simple_fn((dd, nn), || {
            let x: f32 = rng.random();
            T::from(x).unwrap_or_else(T::zero)
        })
    }

    fn rnorm_with<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat {
        Array2::from_shape_simple_fn((dd, nn), || {
            let x: f32 = rng.sample(StandardNormal);
            T::from(x).unwrap_or_else(T::zero)
        })
    }
}
