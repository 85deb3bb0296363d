use rand::Rng;

/// Operations to sample random matrices from an explicit random
/// source, so that a seeded `rng` reproduces the same draws
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif_with<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm_with<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;
}

