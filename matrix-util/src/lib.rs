pub mod ndarray_stat; // running sufficient statistics
pub mod ndarray_util; // random matrices
pub mod summary_stat; // median, quantiles, MAD and NaN-aware moments
pub mod traits;
pub mod utils; // membership partitions and shuffled indexes
