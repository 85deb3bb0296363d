use crate::candle_kernels::*;
use candle_core::Tensor;
use log::debug;
use matrix_util::utils::partition_by_membership;

/// MMD penalty aligning latent distributions across conditions
///
/// loss = sum_{a < b} mmd(z[cond == a], z[cond == b])
///
/// * `z_nk` - latent embedding `[n, k]`
/// * `conditions` - condition code of each row
/// * `kernel` - kernel of the MMD estimator
///
/// Conditions absent from the batch are skipped; with fewer than
/// two conditions present the penalty is zero.
pub fn mmd_loss_by_condition(
    z_nk: &Tensor,
    conditions: &[usize],
    kernel: &KernelKind,
) -> anyhow::Result<Tensor> {
    let (nn, _) = z_nk.dims2()?;
    if conditions.len() != nn {
        return Err(KernelError::DimensionMismatch(format!(
            "{} condition labels for {} rows",
            conditions.len(),
            nn
        ))
        .into());
    }

    let groups = partition_by_membership(conditions);
    let mut codes: Vec<usize> = groups.keys().copied().collect();
    codes.sort_unstable();

    let parts = codes
        .iter()
        .map(|c| {
            let rows: Vec<u32> = groups[c].iter().map(|&i| i as u32).collect();
            let nrows = rows.len();
            let idx = Tensor::from_vec(rows, nrows, z_nk.device())?;
            Ok(z_nk.index_select(&idx, 0)?)
        })
        .collect::<anyhow::Result<Vec<Tensor>>>()?;

    debug!(
        "mmd over {} conditions with {} kernel",
        parts.len(),
        kernel.name()
    );

    let mut loss = Tensor::zeros((), z_nk.dtype(), z_nk.device())?;
    for a in 0..parts.len() {
        for b in (a + 1)..parts.len() {
            loss = (loss + compute_mmd(&parts[a], &parts[b], kernel)?)?;
        }
    }
    Ok(loss)
}
