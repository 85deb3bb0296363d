use ndarray::{Array, ArrayBase, Data, Dimension, NdIndex, Zip};

/// Streaming per-element moments of equally shaped `f32` arrays,
/// e.g., per-gene statistics accumulated one cell at a time
///
/// Non-finite values are skipped, so every element keeps its own
/// count.
///
/// ```
/// use matrix_util::ndarray_stat::RunningStatistics;
/// use ndarray::{array, Ix1};
///
/// let mut stat = RunningStatistics::new(Ix1(2));
/// stat.add(&array![1_f32, 0.]);
/// stat.add(&array![3_f32, 0.]);
/// assert_eq!(stat.mean(), array![2_f32, 0.]);
/// assert_eq!(stat.count_positives(), array![2_f32, 0.]);
/// ```
#[derive(Clone, Debug)]
pub struct RunningStatistics<S: Dimension> {
    npos: Array<f32, S>,
    nobs: Array<f32, S>,
    sum: Array<f32, S>,
    sumsq: Array<f32, S>,
}

impl<S: Dimension> RunningStatistics<S> {
    pub fn new(shape: S) -> Self {
        Self {
            npos: Array::zeros(shape.clone()),
            nobs: Array::zeros(shape.clone()),
            sum: Array::zeros(shape.clone()),
            sumsq: Array::zeros(shape),
        }
    }

    pub fn add<V>(&mut self, xx: &ArrayBase<V, S>)
    where
        V: Data<Elem = f32>,
    {
        Zip::from(&mut self.npos)
            .and(&mut self.nobs)
            .and(&mut self.sum)
            .and(&mut self.sumsq)
            .and(xx)
            .for_each(|npos, nobs, sum, sumsq, &x| {
                if x.is_finite() {
                    *nobs += 1.0;
                    *sum += x;
                    *sumsq += x * x;
                    if x > 0.0 {
                        *npos += 1.0;
                    }
                }
            });
    }

    /// Accumulate a single value at `idx`
    pub fn add_element<I>(&mut self, idx: I, x: f32) -> anyhow::Result<()>
    where
        I: NdIndex<S> + Clone,
    {
        if !x.is_finite() {
            return Ok(());
        }
        let (Some(nobs), Some(sum), Some(sumsq)) = (
            self.nobs.get_mut(idx.clone()),
            self.sum.get_mut(idx.clone()),
            self.sumsq.get_mut(idx.clone()),
        ) else {
            anyhow::bail!("index out of the statistics shape");
        };
        *nobs += 1.0;
        *sum += x;
        *sumsq += x * x;
        if x > 0.0 {
            if let Some(npos) = self.npos.get_mut(idx) {
                *npos += 1.0;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.npos.fill(0.0);
        self.nobs.fill(0.0);
        self.sum.fill(0.0);
        self.sumsq.fill(0.0);
    }

    /// How many values were positive; the number of non-zero entries
    /// for count data
    pub fn count_positives(&self) -> Array<f32, S> {
        self.npos.clone()
    }

    /// How many finite values were seen
    pub fn count(&self) -> Array<f32, S> {
        self.nobs.clone()
    }

    pub fn sum(&self) -> Array<f32, S> {
        self.sum.clone()
    }

    /// `NaN` where nothing was seen
    pub fn mean(&self) -> Array<f32, S> {
        let mut ret = self.sum.clone();
        ret.zip_mut_with(&self.nobs, |s, &n| *s = if n > 0.0 { *s / n } else { f32::NAN });
        ret
    }

    /// Variance with `ddof` delta degrees of freedom (`1` for the
    /// unbiased estimate); `NaN` where at most `ddof` values were seen
    pub fn variance(&self, ddof: f32) -> Array<f32, S> {
        let mut ret = Array::<f32, S>::zeros(self.nobs.raw_dim());
        Zip::from(&mut ret)
            .and(&self.nobs)
            .and(&self.sum)
            .and(&self.sumsq)
            .for_each(|v, &n, &s, &ss| {
                *v = if n > ddof {
                    ((ss - s * s / n) / (n - ddof)).max(0.0)
                } else {
                    f32::NAN
                };
            });
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Ix1, Ix2};

    #[test]
    fn unbiased_variance_and_positives() -> anyhow::Result<()> {
        let mut stat = RunningStatistics::new(Ix1(2));
        stat.add(&array![1_f32, 0.]);
        stat.add(&array![2_f32, 0.]);
        stat.add(&array![3_f32, f32::NAN]);

        let var = stat.variance(1.0);
        assert_abs_diff_eq!(var[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(var[1], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(stat.variance(0.0)[0], 2.0 / 3.0, epsilon = 1e-5);
        assert_eq!(stat.count(), array![3_f32, 2.]);
        assert_eq!(stat.count_positives(), array![3_f32, 0.]);

        stat.add_element(1, 6.0)?;
        assert_abs_diff_eq!(stat.sum()[1], 6.0);
        assert_abs_diff_eq!(stat.count_positives()[1], 1.0);
        assert!(stat.add_element(5, 1.0).is_err());

        stat.clear();
        assert!(stat.mean()[0].is_nan());
        Ok(())
    }

    #[test]
    fn too_few_values_for_ddof() {
        let mut stat = RunningStatistics::new(Ix2(1, 1));
        stat.add(&array![[4_f32]]);
        assert!(stat.variance(1.0)[[0, 0]].is_nan());
        assert_abs_diff_eq!(stat.variance(0.0)[[0, 0]], 0.0);
    }
}
