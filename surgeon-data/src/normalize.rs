use crate::annotated::*;
use crate::error::SurgeonError;
use crate::hvg::HvgFlavor;
use crate::hvg_batch::*;
use crate::qc::*;
use log::{debug, info};
use matrix_util::summary_stat::median;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeArgs {
    /// categorical `obs` column passed to the hvg selection
    pub batch_key: Option<Box<str>>,
    /// drop genes and cells without any count
    pub filter_min_counts: bool,
    /// scale every cell to a common total
    pub size_factors: bool,
    pub logtrans_input: bool,
    /// `None` uses the median total of non-empty cells
    pub target_sum: Option<f32>,
    /// `0` keeps all genes
    pub n_top_genes: usize,
    pub flavor: HvgFlavor,
    pub n_bins: usize,
}

impl Default for NormalizeArgs {
    fn default() -> Self {
        Self {
            batch_key: None,
            filter_min_counts: true,
            size_factors: true,
            logtrans_input: true,
            target_sum: None,
            n_top_genes: 2000,
            flavor: HvgFlavor::CellRanger,
            n_bins: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeTotalArgs {
    pub target_sum: Option<f32>,
    /// leave genes out of the totals if they take more than
    /// `max_fraction` of some cell's counts
    pub exclude_highly_expressed: bool,
    pub max_fraction: f32,
    /// `obs` column receiving the per-cell totals
    pub key_added: Box<str>,
}

impl Default for NormalizeTotalArgs {
    fn default() -> Self {
        Self {
            target_sum: None,
            exclude_highly_expressed: false,
            max_fraction: 0.05,
            key_added: "size_factors".into(),
        }
    }
}

/// genes taking more than `max_fraction` of the total of any cell
fn highly_expressed_genes(x: &MatrixData, totals: &[f32], max_fraction: f32) -> Vec<bool> {
    let (_, ncols) = x.shape();
    let mut ret = vec![false; ncols];
    match x {
        MatrixData::Dense(xx) => {
            for (row, &tot) in xx.rows().into_iter().zip(totals) {
                for (j, &x_ij) in row.iter().enumerate() {
                    ret[j] |= x_ij > tot * max_fraction;
                }
            }
        }
        MatrixData::Sparse(xx) => {
            for (row, &tot) in xx.row_iter().zip(totals) {
                for (&j, &x_ij) in row.col_indices().iter().zip(row.values()) {
                    ret[j] |= x_ij > tot * max_fraction;
                }
            }
        }
    }
    ret
}

fn row_sums_excluding(x: &MatrixData, excluded: &[bool]) -> Vec<f32> {
    match x {
        MatrixData::Dense(xx) => xx
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(excluded)
                    .filter(|&(_, &ex)| !ex)
                    .map(|(&x_ij, _)| x_ij)
                    .sum()
            })
            .collect(),
        MatrixData::Sparse(xx) => xx
            .row_iter()
            .map(|row| {
                row.col_indices()
                    .iter()
                    .zip(row.values())
                    .filter(|&(&j, _)| !excluded[j])
                    .map(|(_, &x_ij)| x_ij)
                    .sum()
            })
            .collect(),
    }
}

/// Scale each cell so that its total count equals the target sum
///
/// Cells with zero total are left as they are. The per-cell totals
/// (before scaling) are stored in `obs[key_added]` and returned.
pub fn normalize_total(
    adata: &mut AnnotatedMatrix,
    args: &NormalizeTotalArgs,
) -> anyhow::Result<Vec<f32>> {
    let mut counts = adata.x().row_sums().to_vec();

    if args.exclude_highly_expressed {
        let excluded = highly_expressed_genes(adata.x(), &counts, args.max_fraction);
        debug!(
            "{} highly expressed genes left out of the size factors",
            excluded.iter().filter(|&&ex| ex).count()
        );
        counts = row_sums_excluding(adata.x(), &excluded);
    }

    let target = match args.target_sum {
        Some(target) => target,
        None => {
            let nonzero: Vec<f64> = counts
                .iter()
                .filter(|&&c| c > 0.0)
                .map(|&c| c as f64)
                .collect();
            let Some(target) = median(&nonzero) else {
                let msg = if args.exclude_highly_expressed {
                    "no cell has counts left once highly expressed genes are excluded"
                } else {
                    "every cell has zero counts"
                };
                return Err(SurgeonError::EmptyData(msg.to_string()).into());
            };
            target as f32
        }
    };

    let factors: Vec<f32> = counts
        .iter()
        .map(|&c| if c > 0.0 { target / c } else { 1.0 })
        .collect();

    adata.x_mut().scale_rows(&factors)?;
    adata.add_obs(&args.key_added, Column::Numeric(counts.clone()))?;
    Ok(counts)
}

/// `x <- ln(1 + x)`
pub fn log1p(adata: &mut AnnotatedMatrix) {
    adata.x_mut().map_inplace(f32::ln_1p);
}

/// Library-size normalization, log transformation and highly variable
/// gene selection, returning a dense copy
///
/// The returned matrix carries the (filtered, gene-subsetted) counts
/// as `raw` and the size factors in `obs["size_factors"]`.
pub fn normalize(adata: &AnnotatedMatrix, args: &NormalizeArgs) -> anyhow::Result<AnnotatedMatrix> {
    let mut adata = adata.clone();

    if args.filter_min_counts {
        filter_genes_min_counts(&mut adata, 1.0)?;
        filter_cells_min_counts(&mut adata, 1.0)?;
        info!("{} cells x {} genes after filtering", adata.n_obs(), adata.n_vars());
    }

    let mut counts = adata.clone();

    if args.size_factors {
        normalize_total(
            &mut adata,
            &NormalizeTotalArgs {
                target_sum: args.target_sum,
                exclude_highly_expressed: true,
                ..Default::default()
            },
        )?;
    } else {
        adata.add_obs("size_factors", Column::Numeric(vec![1.0; adata.n_obs()]))?;
    }

    if args.logtrans_input {
        log1p(&mut adata);
    }

    if args.n_top_genes > 0 && adata.n_vars() > args.n_top_genes {
        let genes = hvg_batch(
            &adata,
            &HvgBatchArgs {
                batch_key: args.batch_key.clone(),
                target_genes: args.n_top_genes,
                flavor: args.flavor,
                n_bins: args.n_bins,
            },
        )?;
        adata = adata.subset_columns_by_names(&genes)?;
        counts = counts.subset_columns_by_names(&genes)?;
        info!("kept {} highly variable genes", genes.len());
    }

    remove_sparsity(&mut counts);
    remove_sparsity(&mut adata);

    adata.set_raw(counts.into())?;
    Ok(adata)
}
