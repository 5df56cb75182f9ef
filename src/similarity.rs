//! Pairwise cosine distance and top-k / bottom-k selection.
//!
//! Only one convention is used in this crate: cosine **distance**, where
//! smaller means more similar and the range is `[0, 2]`.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimilarityError {
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("vector contains a non-finite component at index {index}")]
    NonFinite { index: usize },
    #[error("vector has zero length, cosine distance is undefined")]
    ZeroVector,
    #[error("vector is empty")]
    Empty,
}

/// Checks a single vector and returns its L2 norm
pub(crate) fn checked_norm(v: &[f32]) -> Result<f64, SimilarityError> {
    if v.is_empty() {
        return Err(SimilarityError::Empty);
    }
    let mut sum = 0f64;
    for (index, &x) in v.iter().enumerate() {
        if !x.is_finite() {
            return Err(SimilarityError::NonFinite { index });
        }
        sum += x as f64 * x as f64;
    }
    if sum == 0. {
        return Err(SimilarityError::ZeroVector);
    }
    Ok(sum.sqrt())
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

/// Distance from precomputed norms, clamped into `[0, 2]` against rounding
fn distance_with_norms(a: &[f32], b: &[f32], na: f64, nb: f64) -> f64 {
    (1. - dot(a, b) / (na * nb)).clamp(0., 2.)
}

/// Cosine distance between two vectors, `1 - cos(a, b)`
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch { expected: a.len(), found: b.len() });
    }
    let na = checked_norm(a)?;
    let nb = checked_norm(b)?;
    Ok(distance_with_norms(a, b, na, nb))
}

/// Scales a vector to unit length in place
pub fn l2_normalize(v: &mut [f32]) -> Result<(), SimilarityError> {
    let norm = checked_norm(v)?;
    for x in v.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
    Ok(())
}

/// Computes, for every id, the distance to every other id, sorted ascending.
///
/// Each unordered pair is evaluated once and recorded for both ends. Ties are
/// broken by candidate id so the output is deterministic. Every vector is
/// validated before any distance is computed.
pub fn calculate_similarity<K>(
    embeddings: &BTreeMap<K, Vec<f32>>,
) -> Result<BTreeMap<K, Vec<(K, f64)>>, SimilarityError>
where
    K: Ord + Clone,
{
    let entries = embeddings.iter().collect::<Vec<_>>();
    let dim = entries.first().map(|(_, v)| v.len()).unwrap_or_default();

    let mut norms = Vec::with_capacity(entries.len());
    for (_, v) in &entries {
        if v.len() != dim {
            return Err(SimilarityError::DimensionMismatch { expected: dim, found: v.len() });
        }
        norms.push(checked_norm(v)?);
    }

    let n = entries.len();
    let mut lists: Vec<Vec<(usize, f64)>> = vec![Vec::with_capacity(n.saturating_sub(1)); n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = distance_with_norms(entries[i].1, entries[j].1, norms[i], norms[j]);
            lists[i].push((j, d));
            lists[j].push((i, d));
        }
    }

    let result = entries
        .iter()
        .zip(lists)
        .map(|((id, _), mut list)| {
            // index order equals key order, so this is the id tie-break
            list.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            let list: Vec<(K, f64)> =
                list.into_iter().map(|(j, d)| (entries[j].0.clone(), d)).collect();
            ((*id).clone(), list)
        })
        .collect();

    Ok(result)
}

/// Ranks `corpus` against one query vector and keeps the `k` nearest.
///
/// The entry keyed by `query_id` is skipped. Same ordering as
/// [`calculate_similarity`]: ascending distance, then id.
pub fn nearest<K>(
    query_id: &K,
    query: &[f32],
    corpus: &BTreeMap<K, Vec<f32>>,
    k: usize,
) -> Result<Vec<(K, f64)>, SimilarityError>
where
    K: Ord + Clone,
{
    let nq = checked_norm(query)?;
    let mut ranked = Vec::with_capacity(corpus.len());
    for (id, v) in corpus {
        if id == query_id {
            continue;
        }
        if v.len() != query.len() {
            return Err(SimilarityError::DimensionMismatch { expected: query.len(), found: v.len() });
        }
        let nv = checked_norm(v)?;
        ranked.push((id, distance_with_norms(query, v, nq, nv)));
    }
    // BTreeMap order plus a stable sort keeps ties in id order
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(ranked.into_iter().take(k).map(|(id, d)| (id.clone(), d)).collect())
}

/// Picks the `k` most similar and `k` least similar ids per product.
///
/// Both come from the same ascending list: the head for the most similar,
/// the tail for the least similar. With `k >= n - 1` both are the full list.
pub fn select_extremes<K>(
    similarities: &BTreeMap<K, Vec<(K, f64)>>,
    k: usize,
) -> (BTreeMap<K, Vec<K>>, BTreeMap<K, Vec<K>>)
where
    K: Ord + Clone,
{
    let mut most = BTreeMap::new();
    let mut least = BTreeMap::new();
    for (id, list) in similarities {
        let head = list.iter().take(k).map(|(c, _)| c.clone()).collect();
        let tail = list[list.len().saturating_sub(k)..].iter().map(|(c, _)| c.clone()).collect();
        most.insert(id.clone(), head);
        least.insert(id.clone(), tail);
    }
    (most, least)
}
