
use ndarray::Array1;
use crate::error::{Error, Result};

/// A compressed-sparse-row matrix of `f64` values.
///
/// Row `i` owns the entries `indptr[i]..indptr[i + 1]` of `indices` (column ids)
/// and `data` (values). This is the layout scipy persists with `save_npz`.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    shape: (usize, usize),
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {

    pub fn new(shape: (usize, usize), indptr: Vec<usize>, indices: Vec<usize>, data: Vec<f64>) -> Result<CsrMatrix> {

        let (rows, cols) = shape;
        if indptr.len() != rows + 1 {
            return Err(Error::Config(format!("indptr has {} entries, expected {}", indptr.len(), rows + 1)));
        }
        if indices.len() != data.len() {
            return Err(Error::Config(format!("{} column indices for {} values", indices.len(), data.len())));
        }
        if indptr[0] != 0 || indptr[rows] != data.len() || indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::Config("indptr is not a monotone offset table".to_string()));
        }
        if let Some(j) = indices.iter().find(|&&j| j >= cols) {
            return Err(Error::Config(format!("column index {} out of bounds for {} columns", j, cols)));
        }

        Ok(Self { shape, indptr, indices, data })
    }

    /// Builds a matrix from `(row, col, value)` triplets, summing duplicates.
    pub fn from_triplets(shape: (usize, usize), triplets: &[(usize, usize, f64)]) -> Result<CsrMatrix> {

        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|&(i, j, _)| (i, j));

        let mut indptr = vec![0; shape.0 + 1];
        let mut indices: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut data: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (i, j, v) in sorted {
            if i >= shape.0 || j >= shape.1 {
                return Err(Error::Config(format!("entry ({}, {}) out of bounds for shape {:?}", i, j, shape)));
            }
            if last == Some((i, j)) {
                if let Some(x) = data.last_mut() {
                    *x += v;
                }
                continue;
            }
            indices.push(j);
            data.push(v);
            indptr[i + 1] += 1;
            last = Some((i, j));
        }

        for i in 0..shape.0 {
            indptr[i + 1] += indptr[i];
        }

        CsrMatrix::new(shape, indptr, indices, data)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.0
    }

    pub fn cols(&self) -> usize {
        self.shape.1
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Column ids and values stored in row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.indptr[i]..self.indptr[i + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        match cols.iter().position(|&c| c == j) {
            Some(k) => vals[k],
            None => 0.0
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn row_sums(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.rows(), |i| self.row(i).1.iter().sum())
    }

    pub fn col_sums(&self) -> Array1<f64> {
        let mut sums = Array1::zeros(self.cols());
        for (&j, &v) in self.indices.iter().zip(&self.data) {
            sums[j] += v;
        }
        sums
    }

    /// Same sparsity structure, new values. `data` must hold one value per stored entry.
    pub fn with_data(&self, data: Vec<f64>) -> CsrMatrix {
        assert_eq!(data.len(), self.nnz(), "replacement data must match the stored entries");
        Self {
            shape: self.shape,
            indptr: self.indptr.clone(),
            indices: self.indices.clone(),
            data,
        }
    }

    /// Drops stored entries whose value is exactly zero.
    pub fn eliminate_zeros(self) -> CsrMatrix {

        let mut indptr = Vec::with_capacity(self.indptr.len());
        let mut indices = Vec::with_capacity(self.indices.len());
        let mut data = Vec::with_capacity(self.data.len());
        indptr.push(0);

        for i in 0..self.rows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                if v != 0.0 {
                    indices.push(j);
                    data.push(v);
                }
            }
            indptr.push(data.len());
        }

        Self { shape: self.shape, indptr, indices, data }
    }

    pub fn transpose(&self) -> CsrMatrix {

        let (rows, cols) = self.shape;
        let mut indptr = vec![0; cols + 1];
        for &j in &self.indices {
            indptr[j + 1] += 1;
        }
        for j in 0..cols {
            indptr[j + 1] += indptr[j];
        }

        let mut next = indptr.clone();
        let mut indices = vec![0; self.nnz()];
        let mut data = vec![0.0; self.nnz()];
        for i in 0..rows {
            let (row_cols, vals) = self.row(i);
            for (&j, &v) in row_cols.iter().zip(vals) {
                let slot = next[j];
                indices[slot] = i;
                data[slot] = v;
                next[j] += 1;
            }
        }

        Self { shape: (cols, rows), indptr, indices, data }
    }

    #[cfg(test)]
    pub fn to_dense(&self) -> ndarray::Array2<f64> {
        let mut dense = ndarray::Array2::zeros(self.shape);
        for i in 0..self.rows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                dense[[i, j]] += v;
            }
        }
        dense
    }

}
