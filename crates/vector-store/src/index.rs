use crate::error::{Result, VectorStoreError};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::cmp::Ordering;

/// Dense cosine-similarity index over all stored embeddings.
///
/// Row `i` of the matrix belongs to `ids()[i]`. The index is immutable once
/// built; mutations produce a fresh index via [`SimilarityIndex::build`].
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    ids: Vec<String>,
    matrix: Array2<f32>,
    norms: Array1<f32>,
}

impl SimilarityIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            matrix: Array2::zeros((0, dimension)),
            norms: Array1::zeros(0),
        }
    }

    /// Builds the matrix from `(id, vector)` rows, preserving their order.
    pub fn build<'a, I>(dimension: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let mut ids = Vec::new();
        let mut flat = Vec::new();
        for (id, vector) in rows {
            check_vector(dimension, vector)?;
            ids.push(id.to_string());
            flat.extend_from_slice(vector);
        }

        let matrix = Array2::from_shape_vec((ids.len(), dimension), flat)
            .map_err(|e| VectorStoreError::Validation(format!("Index shape error: {e}")))?;
        let norms = matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        Ok(Self {
            dimension,
            ids,
            matrix,
            norms,
        })
    }

    /// Returns up to `k` `(row, similarity)` pairs, best first.
    ///
    /// Equal similarities keep row order. Rows or queries with zero norm score 0.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        check_vector(self.dimension, query)?;
        if self.ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = ArrayView1::from(query);
        let query_norm = query.dot(&query).sqrt();
        let dots = self.matrix.dot(&query);

        let mut scores: Vec<(usize, f32)> = dots
            .iter()
            .zip(self.norms.iter())
            .enumerate()
            .map(|(row, (dot, norm))| (row, cosine(*dot, *norm, query_norm)))
            .collect();

        // Stable sort: ties stay in insertion order.
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scores.truncate(k);

        Ok(scores)
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn cosine(dot: f32, row_norm: f32, query_norm: f32) -> f32 {
    if row_norm == 0.0 || query_norm == 0.0 {
        return 0.0;
    }
    let similarity = dot / (row_norm * query_norm);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

pub(crate) fn check_vector(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(VectorStoreError::Validation(
            "embedding contains non-finite values".to_string(),
        ));
    }
    Ok(())
}
