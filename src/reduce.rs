
use nalgebra::{DMatrix, SVD};
use ndarray::{s, Array1, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};
use crate::backend::ComputeBackend;
use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;

// singular values below this fraction of the largest are treated as zero
const NEGLIGIBLE: f64 = 1e-10;

/// Parameters of the randomized subspace iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SvdSettings {
    /// extra columns sampled beyond `d`, the block is never narrower than `2d + 1`
    pub oversampling: usize,
    /// power steps taken before convergence is checked
    pub power_iterations: usize,
    /// power steps after which a reduction gives up
    pub max_iterations: usize,
    /// largest accepted residual `|A v - sigma u|`, relative to the top singular value
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for SvdSettings {
    fn default() -> Self {
        Self { oversampling: 10, power_iterations: 4, max_iterations: 300, tolerance: 1e-8, seed: 42 }
    }
}

/// A matrix together with its transpose, shared by every reduction of the matrix.
pub struct Operator<'m> {
    matrix: &'m CsrMatrix,
    transposed: CsrMatrix,
}

impl<'m> Operator<'m> {

    pub fn new(matrix: &'m CsrMatrix) -> Self {
        Self { matrix, transposed: matrix.transpose() }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.matrix.shape()
    }
}

pub struct Reducer<'a> {
    backend: &'a dyn ComputeBackend,
    settings: SvdSettings,
}

impl<'a> Reducer<'a> {

    pub fn new(backend: &'a dyn ComputeBackend, settings: SvdSettings) -> Self {
        Self { backend, settings }
    }

    /// Embeds every row of `matrix` in `d` dimensions as `U * sqrt(Sigma)`,
    /// where `U, Sigma` are the top `d` left singular vectors and values.
    /// Columns come in descending singular value order.
    pub fn reduce(&self, matrix: &CsrMatrix, d: usize) -> Result<Array2<f64>> {
        self.reduce_operator(&Operator::new(matrix), d)
    }

    /// Same as [`Reducer::reduce`] for a matrix reduced to several dimensions.
    pub fn reduce_operator(&self, operator: &Operator, d: usize) -> Result<Array2<f64>> {

        let shape = operator.shape();
        let limit = shape.0.min(shape.1);
        let failed = |reason: String| Error::ReductionFailed { d, shape, reason };

        if d == 0 || d >= limit {
            return Err(failed(format!("d must satisfy 0 < d < {}", limit)));
        }

        info!("performing svd with d={} dimensions...", d);
        let (u, sigma) = self.truncated_svd(operator, d).map_err(failed)?;

        let embeddings = u * &sigma.mapv(f64::sqrt);
        info!("svd complete, embedding shape: {:?}", embeddings.dim());
        Ok(embeddings)
    }

    // block subspace iteration with a Rayleigh-Ritz step on every power step:
    // Q^T A = R Sigma P^T gives the triples (Q R, Sigma, P), accepted once
    // |A p_i - sigma_i Q r_i| <= tolerance * sigma_1 for all i < d
    fn truncated_svd(&self, operator: &Operator, d: usize) -> std::result::Result<(Array2<f64>, Array1<f64>), String> {

        let (rows, cols) = operator.shape();
        let settings = &self.settings;
        let k = (d + settings.oversampling).max(2 * d + 1).min(rows.min(cols));
        let max_iterations = settings.max_iterations.max(settings.power_iterations);

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let omega: Array2<f64> = Array2::random_using((cols, k), StandardNormal, &mut rng);
        let mut q = orthonormalize(self.backend.mul_dense(operator.matrix, omega.view()))?;

        let mut residual = f64::INFINITY;
        for step in 0..=max_iterations {

            let bt = self.backend.mul_dense(&operator.transposed, q.view());
            let (sigma, p, r) = ritz_pairs(&bt)?;
            let u = q.dot(&r);
            let ap = self.backend.mul_dense(operator.matrix, p.view());

            let scale = sigma[0];
            residual = (0..d)
                .filter(|&i| sigma[i] > scale * NEGLIGIBLE)
                .map(|i| {
                    let diff = &ap.column(i) - &(&u.column(i) * sigma[i]);
                    diff.dot(&diff).sqrt()
                })
                .fold(0.0, f64::max);
            debug!("step {}: residual {:.3e}, sigma_1 {:.6}", step, residual, scale);

            if step >= settings.power_iterations && residual <= settings.tolerance * scale {
                debug!("converged after {} power steps with block size {}", step, k);
                let u = u.slice(s![.., ..d]).to_owned();
                if !u.iter().all(|x| x.is_finite()) {
                    return Err("singular vectors hold non-finite values".to_string());
                }
                return Ok((u, sigma.slice(s![..d]).to_owned()));
            }

            // A P spans A A^T Q, the next power step
            q = orthonormalize(ap)?;
        }

        Err(format!("did not converge in {} power steps, residual {:.3e}", max_iterations, residual))
    }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Thin svd `B^T = P Sigma R^T` of the projected matrix, sorted by descending singular value.
fn ritz_pairs(bt: &Array2<f64>) -> std::result::Result<(Array1<f64>, Array2<f64>, Array2<f64>), String> {

    if !bt.iter().all(|x| x.is_finite()) {
        return Err("projected matrix holds non-finite values".to_string());
    }

    let k = bt.ncols();
    let svd = SVD::try_new(to_dmatrix(bt), true, true, f64::EPSILON, 10_000)
        .ok_or_else(|| "dense svd of the projected matrix did not converge".to_string())?;
    let (p, v_t) = match (svd.u, svd.v_t) {
        (Some(p), Some(v_t)) => (p, v_t),
        _ => return Err("dense svd returned no singular vectors".to_string()),
    };

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let sigma: Array1<f64> = order.iter().map(|&c| svd.singular_values[c]).collect();
    let p = Array2::from_shape_fn((bt.nrows(), k), |(i, c)| p[(i, order[c])]);
    let r = Array2::from_shape_fn((k, k), |(i, c)| v_t[(order[c], i)]);
    Ok((sigma, p, r))
}

/// Orthonormal basis of the column space of `y` through a Householder QR.
fn orthonormalize(y: Array2<f64>) -> std::result::Result<Array2<f64>, String> {

    if !y.iter().all(|x| x.is_finite()) {
        return Err("sampled subspace holds non-finite values".to_string());
    }

    let q = to_dmatrix(&y).qr().q();
    Ok(Array2::from_shape_fn((q.nrows(), q.ncols()), |(i, j)| q[(i, j)]))
}
