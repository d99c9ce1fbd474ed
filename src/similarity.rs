
use ndarray::{prelude::*};
use ndarray_stats::QuantileExt;
use crate::error::{Error, Result};

/// Cosine neighbourhoods over the rows of an embedding matrix.
pub struct Similarity {
    w: Array2<f64>,
    norms: Array1<f64>,
}

impl Similarity {

    pub fn new(mut w: Array2<f64>) -> Similarity {

        // rows are scaled to unit l2 norm, all-zero rows stay zero
        let norms: Array1<f64> = w.map_axis(Axis(1), |row| row.dot(&row).sqrt());
        for (mut row, &norm) in w.axis_iter_mut(Axis(0)).zip(&norms) {
            if norm > 0.0 {
                row /= norm;
            }
        }

        Self { w, norms }
    }

    pub fn rows(&self) -> usize {
        self.w.nrows()
    }

    /// Smallest and largest row norm before normalization.
    pub fn norm_range(&self) -> Result<(f64, f64)> {
        Ok((*self.norms.min()?, *self.norms.max()?))
    }

    /// Number of rows that embedded to the zero vector.
    pub fn zero_rows(&self) -> usize {
        self.norms.iter().filter(|&&n| n == 0.0).count()
    }

    /// The `k` rows closest to row `index`, most similar first, excluding the row itself.
    pub fn find_k_most_similar(&self, index: usize, k: usize) -> Result<Vec<(usize, f64)>> {

        if index >= self.rows() {
            return Err(Error::Config(format!("row {} out of range for {} rows", index, self.rows())));
        }

        let scores = self.w.dot(&self.w.row(index));
        let mut indexed_scores: Vec<(usize, f64)> = scores.iter().copied().enumerate()
            .filter(|&(i, _)| i != index)
            .collect();

        // sort by most similar in descending order
        indexed_scores.sort_by(|(_, s), (_, t)| t.total_cmp(s));
        indexed_scores.truncate(k);
        Ok(indexed_scores)
    }

}
