use fnv::FnvHashMap as HashMap;
use rand::prelude::SliceRandom;
use rand::Rng;
use std::hash::Hash;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., batch assignment)
/// # Returns
/// A hashmap: group name -> indexes of the elements (in order)
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut pb_elems: HashMap<T, Vec<usize>> = HashMap::default();
    for (cell, k) in membership.iter().enumerate() {
        pb_elems.entry(k.clone()).or_default().push(cell);
    }
    pb_elems
}

/// A random permutation of `0..ntot` drawn from `rng`
pub fn shuffled_indices<R: Rng + ?Sized>(ntot: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..ntot).collect();
    indices.shuffle(rng);
    indices
}
