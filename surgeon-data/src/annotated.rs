//! In-memory annotated matrix: a cells × genes matrix with per-cell
//! (`obs`) and per-gene (`var`) metadata, and an optional copy of the
//! unprocessed counts (`raw`).

use crate::error::SurgeonError;
use fnv::FnvHashMap as HashMap;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::prelude::*;
use std::collections::BTreeMap;

pub type CsrMat = CsrMatrix<f32>;

/// The primary data matrix (cells × genes), either dense or sparse
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixData {
    Dense(Array2<f32>),
    Sparse(CsrMat),
}

impl From<Array2<f32>> for MatrixData {
    fn from(x: Array2<f32>) -> Self {
        MatrixData::Dense(x)
    }
}

impl From<CsrMat> for MatrixData {
    fn from(x: CsrMat) -> Self {
        MatrixData::Sparse(x)
    }
}

fn check_indices(indices: &[usize], len: usize) -> anyhow::Result<()> {
    if let Some(&index) = indices.iter().find(|&&i| i >= len) {
        return Err(SurgeonError::IndexOutOfBounds { index, len }.into());
    }
    Ok(())
}

impl MatrixData {
    /// (cells, genes)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            MatrixData::Dense(x) => x.dim(),
            MatrixData::Sparse(x) => (x.nrows(), x.ncols()),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, MatrixData::Sparse(_))
    }

    /// Total of each row (cell)
    pub fn row_sums(&self) -> Array1<f32> {
        match self {
            MatrixData::Dense(x) => x.sum_axis(Axis(1)),
            MatrixData::Sparse(x) => x
                .row_iter()
                .map(|row| row.values().iter().sum::<f32>())
                .collect(),
        }
    }

    /// Total of each column (gene)
    pub fn column_sums(&self) -> Array1<f32> {
        match self {
            MatrixData::Dense(x) => x.sum_axis(Axis(0)),
            MatrixData::Sparse(x) => {
                let mut ret = Array1::zeros(x.ncols());
                for (_, j, &x_ij) in x.triplet_iter() {
                    ret[j] += x_ij;
                }
                ret
            }
        }
    }

    pub fn to_dense(&self) -> Array2<f32> {
        match self {
            MatrixData::Dense(x) => x.clone(),
            MatrixData::Sparse(x) => {
                let mut ret = Array2::zeros((x.nrows(), x.ncols()));
                for (i, j, &x_ij) in x.triplet_iter() {
                    ret[(i, j)] += x_ij;
                }
                ret
            }
        }
    }

    /// Materialize a sparse matrix in place
    pub fn densify(&mut self) {
        if let MatrixData::Sparse(_) = self {
            *self = MatrixData::Dense(self.to_dense());
        }
    }

    /// Rows in the order of `indices` (repeats allowed)
    pub fn select_rows(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let (nrows, ncols) = self.shape();
        check_indices(indices, nrows)?;

        Ok(match self {
            MatrixData::Dense(x) => MatrixData::Dense(x.select(Axis(0), indices)),
            MatrixData::Sparse(x) => {
                let mut coo = CooMatrix::new(indices.len(), ncols);
                for (new_i, &old_i) in indices.iter().enumerate() {
                    let row = x.row(old_i);
                    for (&j, &x_ij) in row.col_indices().iter().zip(row.values()) {
                        coo.push(new_i, j, x_ij);
                    }
                }
                MatrixData::Sparse(CsrMatrix::from(&coo))
            }
        })
    }

    /// Columns in the order of `indices` (repeats allowed)
    pub fn select_columns(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let (nrows, ncols) = self.shape();
        check_indices(indices, ncols)?;

        Ok(match self {
            MatrixData::Dense(x) => MatrixData::Dense(x.select(Axis(1), indices)),
            MatrixData::Sparse(x) => {
                let mut new_positions: Vec<Vec<usize>> = vec![vec![]; ncols];
                for (new_j, &old_j) in indices.iter().enumerate() {
                    new_positions[old_j].push(new_j);
                }
                let mut coo = CooMatrix::new(nrows, indices.len());
                for (i, old_j, &x_ij) in x.triplet_iter() {
                    for &new_j in new_positions[old_j].iter() {
                        coo.push(i, new_j, x_ij);
                    }
                }
                MatrixData::Sparse(CsrMatrix::from(&coo))
            }
        })
    }

    /// `x[i, :] *= factors[i]`
    pub fn scale_rows(&mut self, factors: &[f32]) -> anyhow::Result<()> {
        let (nrows, _) = self.shape();
        if factors.len() != nrows {
            return Err(SurgeonError::ShapeMismatch(format!(
                "{} factors for {} rows",
                factors.len(),
                nrows
            ))
            .into());
        }

        match self {
            MatrixData::Dense(x) => {
                for (mut x_i, &f) in x.axis_iter_mut(Axis(0)).zip(factors) {
                    x_i.mapv_inplace(|v| v * f);
                }
            }
            MatrixData::Sparse(x) => {
                for (mut x_i, &f) in x.row_iter_mut().zip(factors) {
                    x_i.values_mut().iter_mut().for_each(|v| *v *= f);
                }
            }
        }
        Ok(())
    }

    /// Apply `f` to every entry. Sparse storage only visits stored
    /// values, so `f(0)` must be `0`.
    pub fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(f32) -> f32,
    {
        match self {
            MatrixData::Dense(x) => x.mapv_inplace(f),
            MatrixData::Sparse(x) => x.values_mut().iter_mut().for_each(|v| *v = f(*v)),
        }
    }
}

/// A metadata column aligned with either cells or genes
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Categorical(Vec<Box<str>>),
    Numeric(Vec<f32>),
    Boolean(Vec<bool>),
    Count(Vec<usize>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Categorical(v) => v.len(),
            Column::Numeric(v) => v.len(),
            Column::Boolean(v) => v.len(),
            Column::Count(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, indices: &[usize]) -> Self {
        fn pick<T: Clone>(v: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| v[i].clone()).collect()
        }
        match self {
            Column::Categorical(v) => Column::Categorical(pick(v, indices)),
            Column::Numeric(v) => Column::Numeric(pick(v, indices)),
            Column::Boolean(v) => Column::Boolean(pick(v, indices)),
            Column::Count(v) => Column::Count(pick(v, indices)),
        }
    }
}

pub type MetaFrame = BTreeMap<Box<str>, Column>;

fn select_frame(frame: &MetaFrame, indices: &[usize]) -> MetaFrame {
    frame
        .iter()
        .map(|(k, col)| (k.clone(), col.select(indices)))
        .collect()
}

/// Unprocessed counts kept next to the transformed matrix
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounts {
    pub x: MatrixData,
    pub var_names: Vec<Box<str>>,
}

impl From<AnnotatedMatrix> for RawCounts {
    fn from(adata: AnnotatedMatrix) -> Self {
        RawCounts {
            x: adata.x,
            var_names: adata.var_names,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedMatrix {
    x: MatrixData,
    obs_names: Vec<Box<str>>,
    var_names: Vec<Box<str>>,
    obs: MetaFrame,
    var: MetaFrame,
    raw: Option<RawCounts>,
}

impl AnnotatedMatrix {
    /// Create a new annotated matrix without metadata
    ///
    /// * `x` - cells × genes matrix
    /// * `obs_names` - cell names
    /// * `var_names` - gene names
    pub fn new(
        x: impl Into<MatrixData>,
        obs_names: Vec<Box<str>>,
        var_names: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        let x = x.into();
        let (nrows, ncols) = x.shape();
        if nrows != obs_names.len() || ncols != var_names.len() {
            return Err(SurgeonError::ShapeMismatch(format!(
                "matrix {}x{} with {} cell and {} gene names",
                nrows,
                ncols,
                obs_names.len(),
                var_names.len()
            ))
            .into());
        }
        Ok(Self {
            x,
            obs_names,
            var_names,
            obs: MetaFrame::new(),
            var: MetaFrame::new(),
            raw: None,
        })
    }

    /// Name cells `cell_{i}` and genes `gene_{j}`
    pub fn with_default_names(x: impl Into<MatrixData>) -> anyhow::Result<Self> {
        let x = x.into();
        let (nrows, ncols) = x.shape();
        let obs_names = (0..nrows).map(|i| format!("cell_{}", i).into()).collect();
        let var_names = (0..ncols).map(|j| format!("gene_{}", j).into()).collect();
        Self::new(x, obs_names, var_names)
    }

    pub fn n_obs(&self) -> usize {
        self.obs_names.len()
    }

    pub fn n_vars(&self) -> usize {
        self.var_names.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_obs(), self.n_vars())
    }

    pub fn x(&self) -> &MatrixData {
        &self.x
    }

    pub fn x_mut(&mut self) -> &mut MatrixData {
        &mut self.x
    }

    pub fn is_sparse(&self) -> bool {
        self.x.is_sparse()
    }

    pub fn obs_names(&self) -> &[Box<str>] {
        &self.obs_names
    }

    pub fn var_names(&self) -> &[Box<str>] {
        &self.var_names
    }

    pub fn obs(&self) -> &MetaFrame {
        &self.obs
    }

    pub fn var(&self) -> &MetaFrame {
        &self.var
    }

    pub fn raw(&self) -> Option<&RawCounts> {
        self.raw.as_ref()
    }

    pub fn set_raw(&mut self, raw: RawCounts) -> anyhow::Result<()> {
        let (nrows, ncols) = raw.x.shape();
        if nrows != self.n_obs() || ncols != raw.var_names.len() {
            return Err(SurgeonError::ShapeMismatch(format!(
                "raw matrix {}x{} for {} cells and {} raw genes",
                nrows,
                ncols,
                self.n_obs(),
                raw.var_names.len()
            ))
            .into());
        }
        self.raw = Some(raw);
        Ok(())
    }

    pub fn add_obs(&mut self, key: &str, column: Column) -> anyhow::Result<()> {
        if column.len() != self.n_obs() {
            return Err(SurgeonError::ShapeMismatch(format!(
                "obs column `{}` has {} values for {} cells",
                key,
                column.len(),
                self.n_obs()
            ))
            .into());
        }
        self.obs.insert(key.into(), column);
        Ok(())
    }

    pub fn add_var(&mut self, key: &str, column: Column) -> anyhow::Result<()> {
        if column.len() != self.n_vars() {
            return Err(SurgeonError::ShapeMismatch(format!(
                "var column `{}` has {} values for {} genes",
                key,
                column.len(),
                self.n_vars()
            ))
            .into());
        }
        self.var.insert(key.into(), column);
        Ok(())
    }

    /// Per-cell labels of a categorical `obs` column
    pub fn obs_categorical(&self, key: &str) -> anyhow::Result<&[Box<str>]> {
        match self.obs.get(key) {
            Some(Column::Categorical(v)) => Ok(v),
            _ => Err(SurgeonError::MissingObsColumn(key.to_string()).into()),
        }
    }

    /// Sorted distinct values of a categorical `obs` column
    pub fn obs_categories(&self, key: &str) -> anyhow::Result<Vec<Box<str>>> {
        let mut ret = self.obs_categorical(key)?.to_vec();
        ret.sort();
        ret.dedup();
        Ok(ret)
    }

    pub fn obs_numeric(&self, key: &str) -> Option<&[f32]> {
        match self.obs.get(key) {
            Some(Column::Numeric(v)) => Some(v),
            _ => None,
        }
    }

    pub fn var_numeric(&self, key: &str) -> Option<&[f32]> {
        match self.var.get(key) {
            Some(Column::Numeric(v)) => Some(v),
            _ => None,
        }
    }

    /// Index of each requested gene name
    pub fn var_indices<S: AsRef<str>>(&self, names: &[S]) -> anyhow::Result<Vec<usize>> {
        let lookup: HashMap<&str, usize> = self
            .var_names
            .iter()
            .enumerate()
            .map(|(j, name)| (name.as_ref(), j))
            .collect();

        names
            .iter()
            .map(|name| {
                lookup
                    .get(name.as_ref())
                    .copied()
                    .ok_or_else(|| SurgeonError::UnknownGene(name.as_ref().to_string()).into())
            })
            .collect()
    }

    /// Subset cells; `raw` follows the cells
    pub fn subset_rows(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let raw = match self.raw.as_ref() {
            Some(raw) => Some(RawCounts {
                x: raw.x.select_rows(indices)?,
                var_names: raw.var_names.clone(),
            }),
            None => None,
        };

        Ok(Self {
            x: self.x.select_rows(indices)?,
            obs_names: indices.iter().map(|&i| self.obs_names[i].clone()).collect(),
            var_names: self.var_names.clone(),
            obs: select_frame(&self.obs, indices),
            var: self.var.clone(),
            raw,
        })
    }

    /// Subset genes; `raw` keeps every gene
    pub fn subset_columns(&self, indices: &[usize]) -> anyhow::Result<Self> {
        Ok(Self {
            x: self.x.select_columns(indices)?,
            obs_names: self.obs_names.clone(),
            var_names: indices.iter().map(|&j| self.var_names[j].clone()).collect(),
            obs: self.obs.clone(),
            var: select_frame(&self.var, indices),
            raw: self.raw.clone(),
        })
    }

    /// Subset genes by name, in the order of `names`
    pub fn subset_columns_by_names<S: AsRef<str>>(&self, names: &[S]) -> anyhow::Result<Self> {
        let indices = self.var_indices(names)?;
        self.subset_columns(&indices)
    }
}

/// Replace a sparse `x` (and `raw`) by its dense array
pub fn remove_sparsity(adata: &mut AnnotatedMatrix) {
    adata.x.densify();
    if let Some(raw) = adata.raw.as_mut() {
        raw.x.densify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_sparse() -> CsrMat {
        let mut coo = CooMatrix::new(3, 4);
        coo.push(0, 1, 2.0);
        coo.push(1, 0, 1.0);
        coo.push(1, 3, 5.0);
        coo.push(2, 2, 3.0);
        CsrMatrix::from(&coo)
    }

    #[test]
    fn sparse_and_dense_agree() -> anyhow::Result<()> {
        let sparse = MatrixData::Sparse(toy_sparse());
        let dense = MatrixData::Dense(sparse.to_dense());

        assert_eq!(sparse.row_sums(), dense.row_sums());
        assert_eq!(sparse.column_sums(), dense.column_sums());

        let rows = [2, 0];
        assert_eq!(
            sparse.select_rows(&rows)?.to_dense(),
            dense.select_rows(&rows)?.to_dense()
        );

        let cols = [3, 1, 1];
        assert_eq!(
            sparse.select_columns(&cols)?.to_dense(),
            dense.select_columns(&cols)?.to_dense()
        );

        let mut s = sparse.clone();
        let mut d = dense.clone();
        s.scale_rows(&[2.0, 0.5, 1.0])?;
        d.scale_rows(&[2.0, 0.5, 1.0])?;
        assert_eq!(s.to_dense(), d.to_dense());

        assert!(sparse.select_rows(&[3]).is_err());
        Ok(())
    }

    #[test]
    fn remove_sparsity_densifies_matrix_and_raw() -> anyhow::Result<()> {
        let mut adata = AnnotatedMatrix::with_default_names(toy_sparse())?;
        let raw = RawCounts::from(adata.clone());
        adata.set_raw(raw)?;
        assert!(adata.is_sparse());

        remove_sparsity(&mut adata);
        assert!(!adata.is_sparse());
        assert!(!adata.raw().unwrap().x.is_sparse());
        assert_eq!(adata.x().to_dense()[(1, 3)], 5.0);
        Ok(())
    }

    #[test]
    fn subsetting_keeps_metadata_aligned() -> anyhow::Result<()> {
        let mut adata = AnnotatedMatrix::with_default_names(toy_sparse())?;
        adata.add_obs(
            "condition",
            Column::Categorical(vec!["b".into(), "a".into(), "b".into()]),
        )?;
        adata.add_var("score", Column::Numeric(vec![0., 1., 2., 3.]))?;

        let sub = adata.subset_rows(&[1, 2])?.subset_columns_by_names(&["gene_3", "gene_0"])?;
        assert_eq!(sub.shape(), (2, 2));
        let names = |xs: &[&str]| -> Vec<Box<str>> { xs.iter().map(|&x| x.into()).collect() };
        assert_eq!(sub.obs_categorical("condition")?.to_vec(), names(&["a", "b"]));
        assert_eq!(sub.var_numeric("score"), Some(&[3., 0.][..]));
        assert_eq!(sub.x().to_dense(), array![[5., 1.], [0., 0.]]);
        assert_eq!(adata.obs_categories("condition")?, names(&["a", "b"]));

        assert!(adata.subset_columns_by_names(&["nope"]).is_err());
        assert!(adata.obs_categorical("batch").is_err());
        assert!(adata.add_obs("short", Column::Numeric(vec![1.0])).is_err());
        Ok(())
    }
}
