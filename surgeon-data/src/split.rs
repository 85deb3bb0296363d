use crate::annotated::AnnotatedMatrix;
use crate::error::SurgeonError;
use log::debug;
use matrix_util::utils::shuffled_indices;
use rand::Rng;

/// Shuffle `0..ntot` and cut at `floor(ntot * train_frac)`
///
/// # Returns
/// `(train, valid)` row indices
pub fn train_test_split_indices<R: Rng + ?Sized>(
    ntot: usize,
    train_frac: f64,
    rng: &mut R,
) -> anyhow::Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..=1.0).contains(&train_frac) {
        return Err(SurgeonError::InvalidFraction(train_frac).into());
    }

    let mut indices = shuffled_indices(ntot, rng);
    let ntrain = ((ntot as f64) * train_frac).floor() as usize;
    let valid = indices.split_off(ntrain);
    Ok((indices, valid))
}

/// Random (not stratified) split of cells into training and validation
/// sets
pub fn train_test_split<R: Rng + ?Sized>(
    adata: &AnnotatedMatrix,
    train_frac: f64,
    rng: &mut R,
) -> anyhow::Result<(AnnotatedMatrix, AnnotatedMatrix)> {
    let (train_idx, valid_idx) = train_test_split_indices(adata.n_obs(), train_frac, rng)?;
    debug!(
        "split {} cells into {} train / {} valid",
        adata.n_obs(),
        train_idx.len(),
        valid_idx.len()
    );
    Ok((adata.subset_rows(&train_idx)?, adata.subset_rows(&valid_idx)?))
}
