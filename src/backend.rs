
use ndarray::{Array2, ArrayView2};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;

/// Value transform applied to every stored entry: `f(row, col, value)`.
pub type EntryFn<'a> = dyn Fn(usize, usize, f64) -> f64 + Sync + 'a;

/// The numeric primitives normalization and reduction are built on.
pub trait ComputeBackend: Send + Sync {

    fn name(&self) -> &'static str;

    /// Returns a matrix with the same structure and `f` applied to each stored entry.
    fn map_entries(&self, matrix: &CsrMatrix, f: &EntryFn) -> CsrMatrix;

    /// Sparse times dense, `matrix · x`.
    fn mul_dense(&self, matrix: &CsrMatrix, x: ArrayView2<f64>) -> Array2<f64>;
}

fn accumulate_row(matrix: &CsrMatrix, x: &ArrayView2<f64>, i: usize, out: &mut [f64]) {
    let (cols, vals) = matrix.row(i);
    for (&j, &v) in cols.iter().zip(vals) {
        for (o, &xj) in out.iter_mut().zip(x.row(j)) {
            *o += v * xj;
        }
    }
}

/// Single-threaded backend on host memory.
#[derive(Debug, Default)]
pub struct HostBackend;

impl ComputeBackend for HostBackend {

    fn name(&self) -> &'static str {
        "host"
    }

    fn map_entries(&self, matrix: &CsrMatrix, f: &EntryFn) -> CsrMatrix {
        let mut data = Vec::with_capacity(matrix.nnz());
        for i in 0..matrix.rows() {
            let (cols, vals) = matrix.row(i);
            data.extend(cols.iter().zip(vals).map(|(&j, &v)| f(i, j, v)));
        }
        matrix.with_data(data)
    }

    fn mul_dense(&self, matrix: &CsrMatrix, x: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(matrix.cols(), x.nrows(), "inner dimensions must agree");
        let k = x.ncols();
        let mut out = Array2::zeros((matrix.rows(), k));
        for (i, mut row) in out.outer_iter_mut().enumerate() {
            // freshly allocated arrays are in standard layout
            if let Some(slice) = row.as_slice_mut() {
                accumulate_row(matrix, &x, i, slice);
            }
        }
        out
    }
}

/// Backend running its primitives on a dedicated rayon pool.
pub struct ParallelBackend {
    pool: ThreadPool,
}

impl ParallelBackend {

    /// `num_threads == 0` lets rayon pick the number of threads.
    pub fn new(num_threads: usize) -> Result<ParallelBackend> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("reducer-{}", i))
            .build()
            .map_err(|e| Error::DeviceUnavailable(format!("cannot build worker pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ComputeBackend for ParallelBackend {

    fn name(&self) -> &'static str {
        "parallel"
    }

    fn map_entries(&self, matrix: &CsrMatrix, f: &EntryFn) -> CsrMatrix {
        let data: Vec<f64> = self.pool.install(|| {
            (0..matrix.rows())
                .into_par_iter()
                .flat_map_iter(|i| {
                    let (cols, vals) = matrix.row(i);
                    cols.iter().zip(vals).map(move |(&j, &v)| f(i, j, v))
                })
                .collect()
        });
        matrix.with_data(data)
    }

    fn mul_dense(&self, matrix: &CsrMatrix, x: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(matrix.cols(), x.nrows(), "inner dimensions must agree");
        let (rows, k) = (matrix.rows(), x.ncols());
        let mut out = vec![0.0; rows * k];
        if k > 0 {
            self.pool.install(|| {
                out.par_chunks_mut(k)
                    .enumerate()
                    .for_each(|(i, chunk)| accumulate_row(matrix, &x, i, chunk));
            });
        }
        Array2::from_shape_vec((rows, k), out).expect("buffer sized rows * k")
    }
}
