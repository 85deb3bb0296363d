use candle_core::{Tensor, D};

/// Bandwidths of the multi-scale RBF kernel
pub const MULTI_SCALE_SIGMAS: [f64; 19] = [
    1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 1e-1, 1., 5., 10., 15., 20., 25., 30., 35., 100., 1e3, 1e4, 1e5,
    1e6,
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum KernelError {
    #[error("invalid kernel kind: {0}")]
    InvalidKernel(String),

    #[error("raphy kernel needs at least one scale")]
    MissingScales,

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Similarity kernels between two batches of embeddings
#[derive(Debug, Clone, PartialEq)]
pub enum KernelKind {
    /// `exp(-mean_d (x - y)^2 / d)`
    Rbf,
    /// `w * sum_s exp(-|x - y|^2 / s^2)` with `w` the number of scales
    Raphy { scales: Vec<f64> },
    /// mixture of Gaussian kernels over [`MULTI_SCALE_SIGMAS`]
    MultiScaleRbf,
}

impl KernelKind {
    /// Resolve a kernel by its name: `rbf`, `raphy` or
    /// `multi-scale-rbf`. The `scales` are used by `raphy` only.
    pub fn from_name(name: &str, scales: &[f64]) -> anyhow::Result<Self> {
        match name {
            "rbf" => Ok(Self::Rbf),
            "raphy" => Ok(Self::Raphy {
                scales: scales.to_vec(),
            }),
            "multi-scale-rbf" => Ok(Self::MultiScaleRbf),
            _ => Err(KernelError::InvalidKernel(name.to_string()).into()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rbf => "rbf",
            Self::Raphy { .. } => "raphy",
            Self::MultiScaleRbf => "multi-scale-rbf",
        }
    }
}

/// Check that `x` and `y` are `[n, d]` and `[m, d]` and return `d`
pub(crate) fn matched_feature_dim(x: &Tensor, y: &Tensor) -> anyhow::Result<usize> {
    let (_, dx) = x
        .dims2()
        .map_err(|_| KernelError::DimensionMismatch(format!("x must be 2D, got {:?}", x.dims())))?;
    let (_, dy) = y
        .dims2()
        .map_err(|_| KernelError::DimensionMismatch(format!("y must be 2D, got {:?}", y.dims())))?;

    if dx != dy {
        return Err(KernelError::DimensionMismatch(format!(
            "feature dimensions differ: {} vs {}",
            dx, dy
        ))
        .into());
    }
    Ok(dx)
}

/// Pairwise squared Euclidean distance
///
/// D(i,j) = sum_k (x(i,k) - y(j,k))^2
///
/// * `x` - `[n, d]`
/// * `y` - `[m, d]`
///
/// Returns `[n, m]`
pub fn squared_distance(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    matched_feature_dim(x, y)?;
    Ok(x.unsqueeze(1)?.broadcast_sub(y)?.sqr()?.sum(D::Minus1)?)
}

/// Kernel matrix between rows of `x` and rows of `y`
///
/// * `x` - `[n, d]`
/// * `y` - `[m, d]`
/// * `kernel` - which kernel
///
/// Returns `[n, m]`
pub fn compute_kernel(x: &Tensor, y: &Tensor, kernel: &KernelKind) -> anyhow::Result<Tensor> {
    let dim = matched_feature_dim(x, y)?;

    match kernel {
        KernelKind::Rbf => {
            let tiled_x = x.unsqueeze(1)?; // n x 1 x d
            let tiled_y = y.unsqueeze(0)?; // 1 x m x d
            let mean_sq = tiled_x.broadcast_sub(&tiled_y)?.sqr()?.mean(2)?;
            Ok((mean_sq / dim as f64)?.neg()?.exp()?)
        }
        KernelKind::Raphy { scales } => {
            if scales.is_empty() {
                return Err(KernelError::MissingScales.into());
            }
            let dist = squared_distance(x, y)?;
            let weight = scales.len() as f64;

            let mut ret = dist.zeros_like()?;
            for &s in scales {
                ret = (ret + (&dist / (s * s))?.neg()?.exp()?)?;
            }
            Ok((ret * weight)?)
        }
        KernelKind::MultiScaleRbf => {
            let dist = squared_distance(x, y)?;

            let mut ret = dist.zeros_like()?;
            for &sigma in MULTI_SCALE_SIGMAS.iter() {
                let beta = 1. / (2. * sigma);
                ret = (ret + (&dist * beta)?.neg()?.exp()?)?;
            }
            Ok((ret / MULTI_SCALE_SIGMAS.len() as f64)?)
        }
    }
}

/// Maximum Mean Discrepancy between the two samples
///
/// mmd = mean K(x,x) + mean K(y,y) - 2 mean K(x,y)
///
/// Returns a scalar tensor
pub fn compute_mmd(x: &Tensor, y: &Tensor, kernel: &KernelKind) -> anyhow::Result<Tensor> {
    let x_kernel = compute_kernel(x, x, kernel)?;
    let y_kernel = compute_kernel(y, y, kernel)?;
    let xy_kernel = compute_kernel(x, y, kernel)?;

    let ret = (x_kernel.mean_all()? + y_kernel.mean_all()?)?;
    Ok((ret - (xy_kernel.mean_all()? * 2.)?)?)
}
