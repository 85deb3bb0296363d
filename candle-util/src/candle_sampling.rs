use crate::candle_kernels::KernelError;
use candle_core::Tensor;
use matrix_util::traits::SampleOps;
use ndarray::Array2;
use rand::Rng;

/// Standard normal noise `[nrow, ncol]` drawn from `rng`, placed on
/// the device and dtype of `like`
pub fn randn_with<R: Rng + ?Sized>(like: &Tensor, rng: &mut R) -> anyhow::Result<Tensor> {
    let (nrow, ncol) = like.dims2()?;
    let eps = Array2::<f32>::rnorm_with(nrow, ncol, rng);
    let data: Vec<f32> = eps.iter().copied().collect();
    Ok(Tensor::from_vec(data, (nrow, ncol), like.device())?.to_dtype(like.dtype())?)
}

///
/// Reparameterized sample of the latent Gaussian
///
/// z = mu + exp(log_var / 2) * eps
/// where eps ~ N(0, 1)
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution `[batch, z_dim]`
/// * `z_lnvar` - log variance of Gaussian distribution `[batch, z_dim]`
/// * `rng` - random source for `eps`
pub fn sample_z<R: Rng + ?Sized>(
    z_mean: &Tensor,
    z_lnvar: &Tensor,
    rng: &mut R,
) -> anyhow::Result<Tensor> {
    if z_mean.rank() != 2 || z_mean.dims() != z_lnvar.dims() {
        return Err(KernelError::DimensionMismatch(format!(
            "mean {:?} and log variance {:?} must be the same 2D shape",
            z_mean.dims(),
            z_lnvar.dims()
        ))
        .into());
    }

    let eps = randn_with(z_mean, rng)?;
    Ok((z_mean + (z_lnvar * 0.5)?.exp()? * eps)?)
}
