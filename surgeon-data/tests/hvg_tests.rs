use approx::assert_abs_diff_eq;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use surgeon_data::hvg::*;
use surgeon_data::hvg_batch::*;
use surgeon_data::{AnnotatedMatrix, Column, SurgeonError};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn gene_names(n: usize) -> Vec<Box<str>> {
    (0..n).map(|j| format!("g{}", j).into_boxed_str()).collect()
}

/// 5 genes flagged in all 3 batches, 10 in exactly 2, 5 in none
fn three_batch_table() -> HvgTable {
    let mut nbatches = vec![3; 5];
    nbatches.extend(vec![2; 10]);
    nbatches.extend(vec![0; 5]);

    let dispersions_norm: Vec<f64> = (0..20).map(|j| j as f64 * 0.1).collect();
    let n = nbatches.len();

    HvgTable {
        means: vec![1.0; n],
        dispersions: vec![1.0; n],
        dispersions_norm,
        highly_variable: nbatches.iter().map(|&b| b > 0).collect(),
        highly_variable_intersection: nbatches.iter().map(|&b| b == 3).collect(),
        highly_variable_nbatches: nbatches,
    }
}

#[test]
fn selection_falls_back_to_fewer_batches() -> anyhow::Result<()> {
    init_logger();
    let table = three_batch_table();
    let names = gene_names(20);

    let genes = select_genes_across_batches(&table, &names, 3, 12)?;
    assert_eq!(genes.len(), 12);

    // all-batch genes first, best dispersion first
    let expected_head: Vec<Box<str>> = (0..5).rev().map(|j| names[j].clone()).collect();
    assert_eq!(&genes[..5], &expected_head[..]);

    // then the top 7 of the two-batch genes
    let expected_tail: Vec<Box<str>> = (8..15).rev().map(|j| names[j].clone()).collect();
    assert_eq!(&genes[5..], &expected_tail[..]);
    Ok(())
}

#[test]
fn selection_reaches_unflagged_genes() -> anyhow::Result<()> {
    let table = three_batch_table();
    let genes = select_genes_across_batches(&table, &gene_names(20), 3, 20)?;
    assert_eq!(genes.len(), 20);
    Ok(())
}

#[test]
fn selection_beyond_universe_fails() {
    let table = three_batch_table();
    let err = select_genes_across_batches(&table, &gene_names(20), 3, 21).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SurgeonError>(),
        Some(&SurgeonError::InsufficientGenes {
            requested: 21,
            available: 20
        })
    );
}

#[test]
fn seurat_dispersions_by_hand() -> anyhow::Result<()> {
    // counts per gene: constant, [0, 2, 4], [1, 3, 5]
    let counts = [[1_f32, 0., 1.], [1., 2., 3.], [1., 4., 5.]];
    let xx = Array2::from_shape_fn((3, 3), |(i, j)| counts[i][j].ln_1p());
    let mut adata = AnnotatedMatrix::with_default_names(xx)?;

    let args = HvgArgs {
        n_top_genes: Some(1),
        n_bins: 1,
        ..Default::default()
    };
    let table = highly_variable_genes(&mut adata, &args)?;

    assert_abs_diff_eq!(table.means[0], 2_f64.ln(), epsilon = 1e-5);
    assert_abs_diff_eq!(table.means[1], 3_f64.ln(), epsilon = 1e-5);
    assert_abs_diff_eq!(table.means[2], 4_f64.ln(), epsilon = 1e-5);

    assert!(table.dispersions[0].is_nan());
    assert_abs_diff_eq!(table.dispersions[1], 2_f64.ln(), epsilon = 1e-4);
    assert_abs_diff_eq!(table.dispersions[2], (4_f64 / 3.).ln(), epsilon = 1e-4);

    // two finite dispersions in one bin are +/- 1/sqrt(2) standard deviations apart
    assert!(table.dispersions_norm[0].is_nan());
    assert_abs_diff_eq!(table.dispersions_norm[1], 0.5_f64.sqrt(), epsilon = 1e-4);
    assert_abs_diff_eq!(table.dispersions_norm[2], -(0.5_f64.sqrt()), epsilon = 1e-4);

    assert_eq!(table.highly_variable, vec![false, true, false]);
    assert_eq!(table.highly_variable_nbatches, vec![0, 1, 0]);

    assert_eq!(
        adata.var().get("highly_variable"),
        Some(&Column::Boolean(vec![false, true, false]))
    );
    assert!(adata.var_numeric("dispersions_norm").is_some());
    assert!(adata.var().get("highly_variable_nbatches").is_none());
    Ok(())
}

fn two_batch_data(rng: &mut StdRng) -> anyhow::Result<AnnotatedMatrix> {
    let (ncells, ngenes) = (40, 12);
    let xx = Array2::from_shape_fn((ncells, ngenes), |(_, j)| {
        let scale = (j % 4 + 1) as f32;
        (rng.random_range(0..10) as f32 * scale).ln_1p()
    });
    let mut adata = AnnotatedMatrix::with_default_names(xx)?;
    let batches = (0..ncells)
        .map(|i| Box::<str>::from(if i % 2 == 0 { "b1" } else { "b0" }))
        .collect();
    adata.add_obs("batch", Column::Categorical(batches))?;
    Ok(adata)
}

/// two batches of three cells, counts per gene (log1p-transformed):
///
/// ```text
///        g0       g1       g2       g3
/// a   [0,0,0]  [0,2,4]  [1,3,5]  [2,2,3]
/// b   [0,1,2]  [0,2,4]  [3,3,3]  [2,2,3]
/// ```
///
/// g0 is unexpressed in `a`; g2 has no variance in `b`
fn agreement_data() -> anyhow::Result<AnnotatedMatrix> {
    let counts = [
        [0_f32, 0., 1., 2.],
        [0., 2., 3., 2.],
        [0., 4., 5., 3.],
        [0., 0., 3., 2.],
        [1., 2., 3., 2.],
        [2., 4., 3., 3.],
    ];
    let xx = Array2::from_shape_fn((6, 4), |(i, j)| counts[i][j].ln_1p());
    let mut adata = AnnotatedMatrix::with_default_names(xx)?;
    let batches = (0..6)
        .map(|i| Box::<str>::from(if i < 3 { "a" } else { "b" }))
        .collect();
    adata.add_obs("batch", Column::Categorical(batches))?;
    Ok(adata)
}

#[test]
fn batched_seurat_by_hand() -> anyhow::Result<()> {
    init_logger();
    let mut adata = agreement_data()?;

    // a flags g1 and g2, b flags g0 and g1
    let args = HvgArgs {
        n_top_genes: Some(2),
        n_bins: 1,
        batch_key: Some("batch".into()),
        ..Default::default()
    };
    let table = highly_variable_genes(&mut adata, &args)?;

    assert_eq!(table.highly_variable_nbatches, vec![1, 2, 1, 0]);
    assert_eq!(table.highly_variable_intersection, vec![false, true, false, false]);

    // g0 contributes zeros from batch a
    assert_abs_diff_eq!(table.means[0], 2_f64.ln() / 2., epsilon = 1e-5);
    assert_abs_diff_eq!(table.dispersions[0], 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(table.dispersions_norm[0], 0.1526, epsilon = 1e-3);

    // the NaN dispersion of g2 in batch b is skipped
    assert_abs_diff_eq!(table.dispersions[2], (4_f64 / 3.).ln(), epsilon = 1e-4);
    assert_abs_diff_eq!(table.dispersions_norm[2], 0.4288, epsilon = 1e-3);

    assert_abs_diff_eq!(table.dispersions_norm[1], 0.7630, epsilon = 1e-3);
    assert_abs_diff_eq!(table.dispersions_norm[3], -1.1300, epsilon = 1e-3);

    // g1 agrees in both batches; g2 beats g0 among single-batch genes
    assert_eq!(table.highly_variable, vec![false, true, true, false]);
    assert_eq!(
        adata.var().get("highly_variable_nbatches"),
        Some(&Column::Count(vec![1, 2, 1, 0]))
    );
    Ok(())
}

#[test]
fn hvg_batch_fills_from_single_batch_genes() -> anyhow::Result<()> {
    init_logger();
    let adata = agreement_data()?;
    let args = HvgBatchArgs {
        batch_key: Some("batch".into()),
        target_genes: 2,
        flavor: HvgFlavor::Seurat,
        n_bins: 1,
    };
    let genes = hvg_batch(&adata, &args)?;
    let expected: Vec<Box<str>> = vec!["gene_1".into(), "gene_2".into()];
    assert_eq!(genes, expected);
    Ok(())
}

#[test]
fn cell_ranger_dispersions_by_hand() -> anyhow::Result<()> {
    let counts = [[1_f32, 0., 2., 5.], [2., 1., 2., 0.], [3., 4., 2., 1.]];
    let xx = Array2::from_shape_fn((3, 4), |(i, j)| counts[i][j]);
    let mut adata = AnnotatedMatrix::with_default_names(xx)?;

    let args = HvgArgs {
        flavor: HvgFlavor::CellRanger,
        n_top_genes: Some(2),
        ..Default::default()
    };
    let table = highly_variable_genes(&mut adata, &args)?;

    for (&m, expected) in table.means.iter().zip([2., 5. / 3., 2., 2.]) {
        assert_abs_diff_eq!(m, expected, epsilon = 1e-9);
    }
    for (&d, expected) in table.dispersions.iter().zip([0.5, 2.6, 0., 3.5]) {
        assert_abs_diff_eq!(d, expected, epsilon = 1e-9);
    }

    // g1 sits alone in the lowest percentile bin, so its MAD is zero
    assert!(table.dispersions_norm[1].is_nan());
    assert_abs_diff_eq!(table.dispersions_norm[0], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(table.dispersions_norm[2], -0.6745, epsilon = 1e-4);
    assert_abs_diff_eq!(table.dispersions_norm[3], 4.0469, epsilon = 1e-4);

    // the cutoff is 0 and NaN counts as 0
    assert_eq!(table.highly_variable, vec![true, true, false, true]);
    assert_eq!(table.highly_variable_nbatches, vec![1, 1, 0, 1]);
    Ok(())
}

#[test]
fn hvg_batch_subset_keeps_selection_order() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let adata = two_batch_data(&mut rng)?;

    let args = HvgBatchArgs {
        batch_key: Some("batch".into()),
        target_genes: 6,
        ..Default::default()
    };

    let genes = hvg_batch(&adata, &args)?;
    assert_eq!(genes.len(), 6);

    let sub = hvg_batch_subset(&adata, &args)?;
    assert_eq!(sub.var_names(), &genes[..]);
    assert_eq!(sub.n_obs(), adata.n_obs());
    assert!(sub.var_numeric("dispersions_norm").is_some());
    Ok(())
}

#[test]
fn missing_batch_column() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let adata = two_batch_data(&mut rng)?;
    let args = HvgBatchArgs {
        batch_key: Some("sample".into()),
        ..Default::default()
    };
    let err = hvg_batch(&adata, &args).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SurgeonError>(),
        Some(&SurgeonError::MissingObsColumn("sample".into()))
    );
    Ok(())
}

#[test]
fn args_from_json() -> anyhow::Result<()> {
    let args: HvgBatchArgs = serde_json::from_str(r#"{"flavor": "seurat", "target_genes": 50}"#)?;
    assert_eq!(args.flavor, HvgFlavor::Seurat);
    assert_eq!(args.target_genes, 50);
    assert_eq!(args.n_bins, 20);
    assert_eq!(args.batch_key, None);

    assert_eq!(serde_json::to_string(&HvgFlavor::CellRanger)?, "\"cell_ranger\"");

    let args: HvgArgs = serde_json::from_str("{}")?;
    assert_eq!(args, HvgArgs::default());
    Ok(())
}
