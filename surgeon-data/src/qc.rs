use crate::annotated::*;
use log::debug;
use matrix_util::ndarray_stat::RunningStatistics;
use ndarray::prelude::*;

/// collect column-wise (per-gene) sufficient statistics over cells
/// * `x` - cells x genes matrix
pub fn collect_column_stat(x: &MatrixData) -> RunningStatistics<Ix1> {
    let (_, ncols) = x.shape();
    let mut col_stat = RunningStatistics::new(Ix1(ncols));

    match x {
        MatrixData::Dense(xx) => {
            for x_i in xx.axis_iter(Axis(0)) {
                col_stat.add(&x_i);
            }
        }
        MatrixData::Sparse(xx) => {
            let mut buf = Array1::<f32>::zeros(ncols);
            for row in xx.row_iter() {
                buf.fill(0.0);
                for (&j, &x_ij) in row.col_indices().iter().zip(row.values()) {
                    buf[j] = x_ij;
                }
                col_stat.add(&buf);
            }
        }
    }
    col_stat
}

fn keep_index(stat: &[f32], cutoff: f32) -> Vec<usize> {
    stat.iter()
        .enumerate()
        .filter(|&(_, &x)| x >= cutoff)
        .map(|(i, _)| i)
        .collect()
}

/// Keep genes with total count `>= min_counts` and record
/// `var["n_counts"]`. Returns the kept gene indices.
pub fn filter_genes_min_counts(
    adata: &mut AnnotatedMatrix,
    min_counts: f32,
) -> anyhow::Result<Vec<usize>> {
    let n_counts = adata.x().column_sums().to_vec();
    let kept = keep_index(&n_counts, min_counts);

    debug!(
        "filtered out {} genes with fewer than {} counts",
        adata.n_vars() - kept.len(),
        min_counts
    );

    let mut filtered = adata.subset_columns(&kept)?;
    filtered.add_var(
        "n_counts",
        Column::Numeric(kept.iter().map(|&j| n_counts[j]).collect()),
    )?;
    *adata = filtered;
    Ok(kept)
}

/// Keep genes expressed in `>= min_cells` cells and record
/// `var["n_cells"]`. Returns the kept gene indices.
pub fn filter_genes_min_cells(
    adata: &mut AnnotatedMatrix,
    min_cells: usize,
) -> anyhow::Result<Vec<usize>> {
    let n_cells = collect_column_stat(adata.x()).count_positives().to_vec();
    let kept = keep_index(&n_cells, min_cells as f32);

    debug!(
        "filtered out {} genes expressed in fewer than {} cells",
        adata.n_vars() - kept.len(),
        min_cells
    );

    let mut filtered = adata.subset_columns(&kept)?;
    filtered.add_var(
        "n_cells",
        Column::Count(kept.iter().map(|&j| n_cells[j] as usize).collect()),
    )?;
    *adata = filtered;
    Ok(kept)
}

/// Keep cells with total count `>= min_counts` and record
/// `obs["n_counts"]`. Returns the kept cell indices.
pub fn filter_cells_min_counts(
    adata: &mut AnnotatedMatrix,
    min_counts: f32,
) -> anyhow::Result<Vec<usize>> {
    let n_counts = adata.x().row_sums().to_vec();
    let kept = keep_index(&n_counts, min_counts);

    debug!(
        "filtered out {} cells with fewer than {} counts",
        adata.n_obs() - kept.len(),
        min_counts
    );

    let mut filtered = adata.subset_rows(&kept)?;
    filtered.add_obs(
        "n_counts",
        Column::Numeric(kept.iter().map(|&i| n_counts[i]).collect()),
    )?;
    *adata = filtered;
    Ok(kept)
}
