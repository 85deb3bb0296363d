//! Dispersion-based highly variable gene statistics (seurat and
//! cell_ranger flavors), per batch and aggregated across batches.

use crate::annotated::*;
use crate::error::SurgeonError;
use log::{debug, info};
use matrix_util::summary_stat::*;
use matrix_util::utils::partition_by_membership;
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvgFlavor {
    /// log-scale dispersions of `expm1(x)`, z-scored in equal-width bins
    #[default]
    Seurat,
    /// raw dispersions, robustly scaled in percentile bins
    CellRanger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvgArgs {
    pub flavor: HvgFlavor,
    /// number of genes to flag; `None` uses the thresholds below
    pub n_top_genes: Option<usize>,
    pub n_bins: usize,
    /// categorical `obs` column; `None` treats all cells as one batch
    pub batch_key: Option<Box<str>>,
    pub min_mean: f64,
    pub max_mean: f64,
    pub min_disp: f64,
    /// `None` means unbounded
    pub max_disp: Option<f64>,
}

impl Default for HvgArgs {
    fn default() -> Self {
        Self {
            flavor: HvgFlavor::Seurat,
            n_top_genes: None,
            n_bins: 20,
            batch_key: None,
            min_mean: 0.0125,
            max_mean: 3.0,
            min_disp: 0.5,
            max_disp: None,
        }
    }
}

/// Per-gene statistics, aligned with the genes of the input
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HvgTable {
    pub means: Vec<f64>,
    pub dispersions: Vec<f64>,
    pub dispersions_norm: Vec<f64>,
    pub highly_variable: Vec<bool>,
    /// number of batches in which the gene was flagged
    pub highly_variable_nbatches: Vec<usize>,
    /// flagged in every batch
    pub highly_variable_intersection: Vec<bool>,
}

impl HvgTable {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

struct BatchStat {
    means: Vec<f64>,
    dispersions: Vec<f64>,
    dispersions_norm: Vec<f64>,
    highly_variable: Vec<bool>,
}

/// descending, `NaN` last
fn cmp_desc_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Gene indices sorted by `score` descending, `NaN` last; ties keep
/// their order
pub(crate) fn argsort_desc(genes: &[usize], score: &[f64]) -> Vec<usize> {
    let mut ret = genes.to_vec();
    ret.sort_by(|&a, &b| cmp_desc_nan_last(score[a], score[b]));
    ret
}

/// Bin membership of each mean, right-inclusive intervals
/// `(edges[k], edges[k + 1]]`
fn assign_bins(means: &[f64], edges: &[f64]) -> Vec<usize> {
    means
        .iter()
        .map(|&m| edges.partition_point(|&e| e < m).saturating_sub(1))
        .collect()
}

/// `n_bins` equal-width bins over the range of `means`; the lowest
/// edge is pushed down by 0.1% of the range so the minimum is included
fn equal_width_edges(means: &[f64], n_bins: usize) -> Vec<f64> {
    let n_bins = n_bins.max(1);
    let finite = means.iter().copied().filter(|m| m.is_finite());
    let lb = finite.clone().fold(f64::INFINITY, f64::min);
    let ub = finite.fold(f64::NEG_INFINITY, f64::max);

    if !lb.is_finite() {
        return vec![f64::NEG_INFINITY, f64::INFINITY];
    }

    let (lb, ub, adj) = if lb == ub {
        let pad = |v: f64| if v != 0.0 { 0.001 * v.abs() } else { 0.001 };
        (lb - pad(lb), ub + pad(ub), 0.0)
    } else {
        (lb, ub, 0.001 * (ub - lb))
    };

    let step = (ub - lb) / n_bins as f64;
    let mut edges: Vec<f64> = (0..=n_bins).map(|k| lb + step * k as f64).collect();
    edges[0] -= adj;
    edges[n_bins] = ub;
    edges
}

/// `[-inf, 10th, 15th, ..., 100th percentile, +inf]` of `means`
fn percentile_edges(means: &[f64]) -> Vec<f64> {
    let qq: Vec<f64> = (10..=100).step_by(5).map(|p| p as f64 / 100.0).collect();
    let mut edges = vec![f64::NEG_INFINITY];
    edges.extend(quantiles(means, &qq).into_iter().map(|q| q.unwrap_or(f64::NAN)));
    edges.push(f64::INFINITY);
    edges
}

fn group_by_bin(bins: &[usize], values: &[f64]) -> Vec<Vec<f64>> {
    let nbins = bins.iter().copied().max().map_or(0, |b| b + 1);
    let mut ret = vec![vec![]; nbins];
    for (&b, &v) in bins.iter().zip(values) {
        ret[b].push(v);
    }
    ret
}

fn normalize_seurat(means: &[f64], disp: &[f64], n_bins: usize) -> Vec<f64> {
    let bins = assign_bins(means, &equal_width_edges(means, n_bins));
    let center_scale: Vec<(f64, f64)> = group_by_bin(&bins, disp)
        .iter()
        .map(|dd| {
            let mu = nan_mean(dd).unwrap_or(f64::NAN);
            match nan_std(dd) {
                Some(sd) if !sd.is_nan() => (mu, sd),
                // a lone gene in its bin
                _ => (0.0, mu),
            }
        })
        .collect();

    bins.iter()
        .zip(disp)
        .map(|(&b, &d)| (d - center_scale[b].0) / center_scale[b].1)
        .collect()
}

fn normalize_cell_ranger(means: &[f64], disp: &[f64]) -> Vec<f64> {
    let bins = assign_bins(means, &percentile_edges(means));
    let center_scale: Vec<(f64, f64)> = group_by_bin(&bins, disp)
        .iter()
        .map(|dd| {
            (
                median(dd).unwrap_or(f64::NAN),
                mad(dd).unwrap_or(f64::NAN),
            )
        })
        .collect();

    bins.iter()
        .zip(disp)
        .map(|(&b, &d)| (d - center_scale[b].0) / center_scale[b].1)
        .collect()
}

/// Flag the `n_top` genes with the largest normalized dispersion,
/// including ties at the cutoff
fn flag_top_genes(disp_norm: &[f64], n_top: usize) -> Vec<bool> {
    let mut sorted: Vec<f64> = disp_norm.iter().copied().filter(|d| !d.is_nan()).collect();
    sorted.sort_by(|a, b| cmp_desc_nan_last(*a, *b));

    let n_top = n_top.min(sorted.len());
    if n_top == 0 {
        return vec![false; disp_norm.len()];
    }

    let cutoff = sorted[n_top - 1];
    disp_norm
        .iter()
        .map(|&d| (if d.is_nan() { 0.0 } else { d }) >= cutoff)
        .collect()
}

fn flag_by_thresholds(means: &[f64], disp_norm: &[f64], args: &HvgArgs) -> Vec<bool> {
    let max_disp = args.max_disp.unwrap_or(f64::INFINITY);
    means
        .iter()
        .zip(disp_norm)
        .map(|(&m, &d)| m > args.min_mean && m < args.max_mean && d > args.min_disp && d < max_disp)
        .collect()
}

/// Statistics of one batch `[cells, genes]`
fn single_batch_stat(x: &Array2<f64>, args: &HvgArgs) -> anyhow::Result<BatchStat> {
    let (nobs, _) = x.dim();
    if nobs < 1 {
        return Err(SurgeonError::EmptyData("no cells in batch".to_string()).into());
    }

    let xx = match args.flavor {
        HvgFlavor::Seurat => x.mapv(f64::exp_m1),
        HvgFlavor::CellRanger => x.clone(),
    };

    let mut means = xx
        .mean_axis(Axis(0))
        .ok_or_else(|| SurgeonError::EmptyData("no cells in batch".to_string()))?
        .to_vec();
    let vars = xx.var_axis(Axis(0), 1.0).to_vec();

    means.iter_mut().for_each(|m| {
        if *m == 0.0 {
            *m = 1e-12;
        }
    });

    let mut dispersions: Vec<f64> = vars.iter().zip(&means).map(|(v, m)| v / m).collect();

    let dispersions_norm = match args.flavor {
        HvgFlavor::Seurat => {
            dispersions.iter_mut().for_each(|d| {
                *d = if *d == 0.0 { f64::NAN } else { d.ln() };
            });
            means.iter_mut().for_each(|m| *m = m.ln_1p());
            normalize_seurat(&means, &dispersions, args.n_bins)
        }
        HvgFlavor::CellRanger => normalize_cell_ranger(&means, &dispersions),
    };

    let highly_variable = match args.n_top_genes {
        Some(n_top) => flag_top_genes(&dispersions_norm, n_top),
        None => flag_by_thresholds(&means, &dispersions_norm, args),
    };

    Ok(BatchStat {
        means,
        dispersions,
        dispersions_norm,
        highly_variable,
    })
}

/// One batch restricted to the genes it expresses; the rest get zero
/// statistics and are never flagged
fn expressed_batch_stat(
    x: &MatrixData,
    cells: &[usize],
    args: &HvgArgs,
) -> anyhow::Result<BatchStat> {
    let (_, ngenes) = x.shape();
    let xx = x.select_rows(cells)?.to_dense().mapv(|v| v as f64);

    let expressed: Vec<usize> = xx
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, col)| col.iter().any(|&v| v > 0.0))
        .map(|(j, _)| j)
        .collect();

    let mut ret = BatchStat {
        means: vec![0.0; ngenes],
        dispersions: vec![0.0; ngenes],
        dispersions_norm: vec![0.0; ngenes],
        highly_variable: vec![false; ngenes],
    };

    if expressed.is_empty() {
        return Ok(ret);
    }

    let stat = single_batch_stat(&xx.select(Axis(1), &expressed), args)?;
    for (k, &j) in expressed.iter().enumerate() {
        ret.means[j] = stat.means[k];
        ret.dispersions[j] = stat.dispersions[k];
        ret.dispersions_norm[j] = stat.dispersions_norm[k];
        ret.highly_variable[j] = stat.highly_variable[k];
    }
    Ok(ret)
}

fn mean_across<F>(stats: &[BatchStat], ngenes: usize, field: F) -> Vec<f64>
where
    F: Fn(&BatchStat) -> &[f64],
{
    (0..ngenes)
        .map(|j| {
            let vv: Vec<f64> = stats.iter().map(|s| field(s)[j]).collect();
            nan_mean(&vv).unwrap_or(f64::NAN)
        })
        .collect()
}

fn aggregate_batches(stats: &[BatchStat], ngenes: usize, args: &HvgArgs) -> HvgTable {
    let nbatches = stats.len();
    let means = mean_across(stats, ngenes, |s| s.means.as_slice());
    let dispersions = mean_across(stats, ngenes, |s| s.dispersions.as_slice());
    let dispersions_norm = mean_across(stats, ngenes, |s| s.dispersions_norm.as_slice());

    let highly_variable_nbatches: Vec<usize> = (0..ngenes)
        .map(|j| stats.iter().filter(|s| s.highly_variable[j]).count())
        .collect();

    let highly_variable_intersection: Vec<bool> = highly_variable_nbatches
        .iter()
        .map(|&n| n == nbatches)
        .collect();

    let highly_variable = match args.n_top_genes {
        Some(n_top) => {
            let mut order: Vec<usize> = (0..ngenes).collect();
            order.sort_by(|&a, &b| {
                highly_variable_nbatches[b]
                    .cmp(&highly_variable_nbatches[a])
                    .then_with(|| cmp_desc_nan_last(dispersions_norm[a], dispersions_norm[b]))
            });
            let mut hv = vec![false; ngenes];
            order.into_iter().take(n_top).for_each(|j| hv[j] = true);
            hv
        }
        None => highly_variable_intersection.clone(),
    };

    HvgTable {
        means,
        dispersions,
        dispersions_norm,
        highly_variable,
        highly_variable_nbatches,
        highly_variable_intersection,
    }
}

/// Compute the highly variable gene table of `adata.x`, which is
/// expected to be log-transformed (`log1p`) for the seurat flavor
///
/// With a batch key, every batch is analysed separately (in parallel)
/// and the statistics are averaged across batches.
pub fn compute_hvg_table(adata: &AnnotatedMatrix, args: &HvgArgs) -> anyhow::Result<HvgTable> {
    let ngenes = adata.n_vars();

    let Some(batch_key) = args.batch_key.as_deref() else {
        let xx = adata.x().to_dense().mapv(|v| v as f64);
        let stat = single_batch_stat(&xx, args)?;
        let nbatches: Vec<usize> = stat.highly_variable.iter().map(|&h| h as usize).collect();
        info!(
            "{} highly variable genes out of {}",
            stat.highly_variable.iter().filter(|&&h| h).count(),
            ngenes
        );
        return Ok(HvgTable {
            means: stat.means,
            dispersions: stat.dispersions,
            dispersions_norm: stat.dispersions_norm,
            highly_variable_intersection: stat.highly_variable.clone(),
            highly_variable: stat.highly_variable,
            highly_variable_nbatches: nbatches,
        });
    };

    let labels = adata.obs_categorical(batch_key)?;
    let batches = adata.obs_categories(batch_key)?;
    let membership = partition_by_membership(labels);

    debug!("hvg statistics over {} batches of `{}`", batches.len(), batch_key);

    let stats = batches
        .par_iter()
        .map(|b| {
            let cells = membership.get(b).map(|v| v.as_slice()).unwrap_or_default();
            expressed_batch_stat(adata.x(), cells, args)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let table = aggregate_batches(&stats, ngenes, args);
    info!(
        "{} highly variable genes out of {} ({} in every batch)",
        table.highly_variable.iter().filter(|&&h| h).count(),
        ngenes,
        table.highly_variable_intersection.iter().filter(|&&h| h).count()
    );
    Ok(table)
}

/// Compute the table and annotate `adata.var` with `means`,
/// `dispersions`, `dispersions_norm`, `highly_variable` and, with a
/// batch key, `highly_variable_nbatches` and
/// `highly_variable_intersection`
pub fn highly_variable_genes(
    adata: &mut AnnotatedMatrix,
    args: &HvgArgs,
) -> anyhow::Result<HvgTable> {
    let table = compute_hvg_table(adata, args)?;

    let to_f32 = |xx: &[f64]| Column::Numeric(xx.iter().map(|&x| x as f32).collect());
    adata.add_var("means", to_f32(&table.means))?;
    adata.add_var("dispersions", to_f32(&table.dispersions))?;
    adata.add_var("dispersions_norm", to_f32(&table.dispersions_norm))?;
    adata.add_var(
        "highly_variable",
        Column::Boolean(table.highly_variable.clone()),
    )?;

    if args.batch_key.is_some() {
        adata.add_var(
            "highly_variable_nbatches",
            Column::Count(table.highly_variable_nbatches.clone()),
        )?;
        adata.add_var(
            "highly_variable_intersection",
            Column::Boolean(table.highly_variable_intersection.clone()),
        )?;
    }
    Ok(table)
}
