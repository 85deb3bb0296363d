use crate::annotated::AnnotatedMatrix;
use crate::error::SurgeonError;
use crate::hvg::*;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvgBatchArgs {
    /// categorical `obs` column; `None` treats all cells as one batch
    pub batch_key: Option<Box<str>>,
    pub target_genes: usize,
    pub flavor: HvgFlavor,
    pub n_bins: usize,
}

impl Default for HvgBatchArgs {
    fn default() -> Self {
        Self {
            batch_key: None,
            target_genes: 2000,
            flavor: HvgFlavor::CellRanger,
            n_bins: 20,
        }
    }
}

impl HvgBatchArgs {
    fn hvg_args(&self) -> HvgArgs {
        HvgArgs {
            flavor: self.flavor,
            n_top_genes: Some(self.target_genes),
            n_bins: self.n_bins,
            batch_key: self.batch_key.clone(),
            ..Default::default()
        }
    }
}

/// Pick exactly `target` genes, first those flagged in every batch,
/// then those flagged in one batch fewer, and so on.
///
/// Within a level, genes are ranked by normalized dispersion (`NaN`
/// last). A level that does not fill the remaining slots is taken whole
/// in gene order.
///
/// * `table` - statistics aggregated over `n_batches` batches
/// * `gene_names` - names aligned with `table`
pub fn select_genes_across_batches(
    table: &HvgTable,
    gene_names: &[Box<str>],
    n_batches: usize,
    target: usize,
) -> anyhow::Result<Vec<Box<str>>> {
    if gene_names.len() != table.len() {
        return Err(SurgeonError::ShapeMismatch(format!(
            "{} gene names for {} genes",
            gene_names.len(),
            table.len()
        ))
        .into());
    }

    let nbatches = &table.highly_variable_nbatches;
    let score = &table.dispersions_norm;

    let in_all: Vec<usize> = (0..table.len())
        .filter(|&j| nbatches[j] >= n_batches)
        .collect();
    let mut selected = argsort_desc(&in_all, score);

    if selected.len() >= target {
        selected.truncate(target);
    } else {
        info!("Using {} HVGs from full intersect set", selected.len());

        for not_n in 1..=n_batches {
            let deficit = target - selected.len();
            let level = n_batches - not_n;
            let pool: Vec<usize> = (0..table.len()).filter(|&j| nbatches[j] == level).collect();

            if pool.len() < deficit {
                info!("Using {} HVGs from n_batch-{} set", pool.len(), not_n);
                selected.extend(pool);
            } else {
                info!("Using {} HVGs from n_batch-{} set", deficit, not_n);
                selected.extend(argsort_desc(&pool, score).into_iter().take(deficit));
                break;
            }
        }

        if selected.len() < target {
            return Err(SurgeonError::InsufficientGenes {
                requested: target,
                available: selected.len(),
            }
            .into());
        }
    }

    info!("Using {} HVGs", selected.len());
    Ok(selected.into_iter().map(|j| gene_names[j].clone()).collect())
}

fn count_batches(adata: &AnnotatedMatrix, batch_key: Option<&str>) -> anyhow::Result<usize> {
    match batch_key {
        Some(key) => Ok(adata.obs_categories(key)?.len()),
        None => Ok(1),
    }
}

/// Names of `target_genes` highly variable genes, prioritizing genes
/// that are variable in all batches
///
/// `adata.x` should be log-normalized. `adata` is not modified.
pub fn hvg_batch(adata: &AnnotatedMatrix, args: &HvgBatchArgs) -> anyhow::Result<Vec<Box<str>>> {
    let n_batches = count_batches(adata, args.batch_key.as_deref())?;
    let table = compute_hvg_table(adata, &args.hvg_args())?;
    select_genes_across_batches(&table, adata.var_names(), n_batches, args.target_genes)
}

/// Like [`hvg_batch`], but returns a copy of `adata` restricted to the
/// selected genes (in selection order) with the hvg statistics in `var`
pub fn hvg_batch_subset(
    adata: &AnnotatedMatrix,
    args: &HvgBatchArgs,
) -> anyhow::Result<AnnotatedMatrix> {
    let n_batches = count_batches(adata, args.batch_key.as_deref())?;
    let mut annotated = adata.clone();
    let table = highly_variable_genes(&mut annotated, &args.hvg_args())?;
    let genes =
        select_genes_across_batches(&table, annotated.var_names(), n_batches, args.target_genes)?;
    annotated.subset_columns_by_names(&genes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(nbatches: Vec<usize>, norm: Vec<f64>) -> HvgTable {
        let n = nbatches.len();
        HvgTable {
            means: vec![1.0; n],
            dispersions: vec![1.0; n],
            dispersions_norm: norm,
            highly_variable: vec![false; n],
            highly_variable_intersection: nbatches.iter().map(|&b| b == 2).collect(),
            highly_variable_nbatches: nbatches,
        }
    }

    fn names(n: usize) -> Vec<Box<str>> {
        (0..n).map(|j| format!("g{}", j).into_boxed_str()).collect()
    }

    #[test]
    fn truncates_full_intersection() -> anyhow::Result<()> {
        let tab = table(vec![2, 2, 2, 1], vec![0.1, 0.9, 0.5, 3.0]);
        let genes = select_genes_across_batches(&tab, &names(4), 2, 2)?;
        let expected: Vec<Box<str>> = vec!["g1".into(), "g2".into()];
        assert_eq!(genes, expected);
        Ok(())
    }

    #[test]
    fn small_level_is_taken_whole_in_gene_order() -> anyhow::Result<()> {
        let tab = table(vec![1, 2, 1, 0, 0], vec![0.1, 0.2, 5.0, 1.0, 2.0]);
        let genes = select_genes_across_batches(&tab, &names(5), 2, 4)?;
        let expected: Vec<Box<str>> = ["g1", "g0", "g2", "g4"].iter().map(|&s| s.into()).collect();
        assert_eq!(genes, expected);
        Ok(())
    }
}
