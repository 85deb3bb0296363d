pub mod annotated; // cells x genes matrix with metadata
pub mod error;
pub mod hvg; // dispersion statistics per batch
pub mod hvg_batch; // gene selection across batches
pub mod label_encoding;
pub mod normalize;
pub mod qc; // filters on counts and expressing cells
pub mod split;

pub use annotated::{AnnotatedMatrix, Column, MatrixData, RawCounts};
pub use error::SurgeonError;
