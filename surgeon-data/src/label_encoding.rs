use crate::annotated::AnnotatedMatrix;
use crate::error::SurgeonError;
use fnv::FnvHashMap as HashMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// condition name -> integer code
pub type LabelMapping = HashMap<Box<str>, usize>;

/// Encode categorical labels as `0..n_classes` following the sorted
/// order of the distinct labels seen by `fit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<Box<str>>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<Box<str>> = labels.iter().map(|s| s.as_ref().into()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[Box<str>] {
        &self.classes
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> anyhow::Result<Vec<usize>> {
        labels
            .iter()
            .map(|s| {
                self.classes
                    .binary_search_by(|c| c.as_ref().cmp(s.as_ref()))
                    .map_err(|_| SurgeonError::UnseenLabel(s.as_ref().to_string()).into())
            })
            .collect()
    }

    pub fn fit_transform<S: AsRef<str>>(labels: &[S]) -> anyhow::Result<(Self, Vec<usize>)> {
        let encoder = Self::fit(labels);
        let codes = encoder.transform(labels)?;
        Ok((encoder, codes))
    }

    pub fn inverse_transform(&self, codes: &[usize]) -> anyhow::Result<Vec<Box<str>>> {
        codes
            .iter()
            .map(|&c| {
                self.classes.get(c).cloned().ok_or_else(|| {
                    SurgeonError::IndexOutOfBounds {
                        index: c,
                        len: self.classes.len(),
                    }
                    .into()
                })
            })
            .collect()
    }
}

/// How condition labels become integer codes
#[derive(Debug, Clone, PartialEq)]
pub enum LabelEncoding {
    /// Look up each label in a given mapping
    ExplicitMapping(LabelMapping),
    /// Reuse an encoder fit before, e.g., on the training data
    FittedEncoder(LabelEncoder),
    /// Fit a new encoder on the labels at hand
    FitNew,
}

/// Encode the `condition_key` column of `adata`
///
/// # Returns
/// * `[n_cells, 1]` codes
/// * the encoding to reuse on other data; `FitNew` comes back as the
///   `FittedEncoder` it produced
///
/// A label missing from an explicit mapping is an error rather than a
/// silent code `0`.
pub fn label_encoder(
    adata: &AnnotatedMatrix,
    encoding: LabelEncoding,
    condition_key: &str,
) -> anyhow::Result<(Array2<usize>, LabelEncoding)> {
    let labels = adata.obs_categorical(condition_key)?;

    let (codes, encoding) = match encoding {
        LabelEncoding::ExplicitMapping(mapping) => {
            let codes = labels
                .iter()
                .map(|s| {
                    mapping
                        .get(s)
                        .copied()
                        .ok_or_else(|| SurgeonError::UnmappedCondition(s.to_string()).into())
                })
                .collect::<anyhow::Result<Vec<usize>>>()?;
            (codes, LabelEncoding::ExplicitMapping(mapping))
        }
        LabelEncoding::FittedEncoder(encoder) => {
            let codes = encoder.transform(labels)?;
            (codes, LabelEncoding::FittedEncoder(encoder))
        }
        LabelEncoding::FitNew => {
            let (encoder, codes) = LabelEncoder::fit_transform(labels)?;
            (codes, LabelEncoding::FittedEncoder(encoder))
        }
    };

    let ncells = codes.len();
    Ok((Array2::from_shape_vec((ncells, 1), codes)?, encoding))
}

/// Codes for every condition except the target ones, numbered in the
/// order they appear in `conditions` after removing the targets
pub fn create_dictionary<S: AsRef<str>, T: AsRef<str>>(
    conditions: &[S],
    target_conditions: &[T],
) -> LabelMapping {
    conditions
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| !target_conditions.iter().any(|t| t.as_ref() == *c))
        .enumerate()
        .map(|(idx, c)| (c.into(), idx))
        .collect()
}
