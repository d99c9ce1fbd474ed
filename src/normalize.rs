
use std::fmt::Display;
use std::str::FromStr;
use ndarray::Array1;
use tracing::info;
use crate::backend::ComputeBackend;
use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;

/// The weighting schemes applied to raw co-occurrence counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Ppmi,
    Tfidf,
    RowNormalize,
}

impl Method {

    pub const ALL: [Method; 3] = [Method::Ppmi, Method::Tfidf, Method::RowNormalize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ppmi => "ppmi",
            Method::Tfidf => "tfidf",
            Method::RowNormalize => "row_normalize",
        }
    }

    /// Parses every name, failing on the first unknown one.
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<Method>> {
        names.iter().map(|name| name.as_ref().parse()).collect()
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Method> {
        match s {
            "ppmi" => Ok(Method::Ppmi),
            "tfidf" => Ok(Method::Tfidf),
            "row_normalize" => Ok(Method::RowNormalize),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `ln(N / (df + 1))` per column, where `df` counts the non-zero entries of
/// the column and `N` is the number of rows.
pub fn inverse_document_frequency(matrix: &CsrMatrix) -> Array1<f64> {

    let mut doc_freq: Array1<f64> = Array1::zeros(matrix.cols());
    for i in 0..matrix.rows() {
        let (cols, vals) = matrix.row(i);
        for (&j, &v) in cols.iter().zip(vals) {
            if v != 0.0 {
                doc_freq[j] += 1.0;
            }
        }
    }

    let n = matrix.rows() as f64;
    doc_freq.mapv(|df| (n / (df + 1.0)).ln())
}

pub struct Normalizer<'a> {
    backend: &'a dyn ComputeBackend,
}

impl<'a> Normalizer<'a> {

    pub fn new(backend: &'a dyn ComputeBackend) -> Self {
        Self { backend }
    }

    /// Normalizes with a method given by name.
    pub fn apply_named(&self, matrix: &CsrMatrix, method: &str) -> Result<CsrMatrix> {
        self.apply(matrix, method.parse()?)
    }

    pub fn apply(&self, matrix: &CsrMatrix, method: Method) -> Result<CsrMatrix> {

        info!("applying {} normalization...", method);
        let normalized = match method {
            Method::Ppmi => self.ppmi(matrix),
            Method::Tfidf => self.tfidf(matrix),
            Method::RowNormalize => self.row_normalize(matrix),
        };
        Ok(normalized)
    }

    fn ppmi(&self, matrix: &CsrMatrix) -> CsrMatrix {

        let total = matrix.sum();
        if total == 0.0 {
            return matrix.with_data(vec![0.0; matrix.nnz()]).eliminate_zeros();
        }

        let row_probs = matrix.row_sums() / total;
        let col_probs = matrix.col_sums() / total;

        // only stored entries are visited, so the log never sees a structural zero
        let pmi = |i: usize, j: usize, x: f64| -> f64 {
            let expected = row_probs[i] * col_probs[j];
            if x <= 0.0 || expected <= 0.0 {
                return 0.0;
            }
            ((x / total) / expected).ln().max(0.0)
        };

        self.backend.map_entries(matrix, &pmi).eliminate_zeros()
    }

    fn tfidf(&self, matrix: &CsrMatrix) -> CsrMatrix {
        let idf = inverse_document_frequency(matrix);
        self.backend.map_entries(matrix, &|_: usize, j: usize, x: f64| x * idf[j])
    }

    fn row_normalize(&self, matrix: &CsrMatrix) -> CsrMatrix {
        let row_sums = matrix.row_sums().mapv(|s| if s == 0.0 { 1.0 } else { s });
        self.backend.map_entries(matrix, &|i: usize, _: usize, x: f64| x / row_sums[i])
    }
}


#[cfg(test)]
mod tests {

    use super::{inverse_document_frequency, Method, Normalizer};
    use crate::backend::{HostBackend, ParallelBackend};
    use crate::error::Error;
    use crate::sparse::CsrMatrix;

    const TOL: f64 = 1e-12;

    fn cooc() -> CsrMatrix {
        // symmetric counts over a 4 word vocabulary, word 3 never co-occurs
        CsrMatrix::from_triplets((4, 4), &[
            (0, 1, 4.0), (1, 0, 4.0),
            (0, 2, 1.0), (2, 0, 1.0),
            (1, 2, 2.0), (2, 1, 2.0),
            (1, 1, 3.0),
        ]).unwrap()
    }

    #[test]
    fn method_names() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert!(matches!("foo".parse::<Method>(), Err(Error::UnsupportedMethod(name)) if name == "foo"));
        assert!(matches!(Method::parse_all(&["ppmi", "foo", "bar"][..]), Err(Error::UnsupportedMethod(name)) if name == "foo"));
    }

    #[test]
    fn unknown_method_rejected() {
        let backend = HostBackend;
        let result = Normalizer::new(&backend).apply_named(&cooc(), "foo");
        assert!(matches!(result, Err(Error::UnsupportedMethod(_))));
    }

    #[test]
    fn row_normalize_rows_sum_to_one() {

        let backend = HostBackend;
        let m = cooc();
        let normalized = Normalizer::new(&backend).apply(&m, Method::RowNormalize).unwrap();
        let sums = normalized.row_sums();

        for i in 0..3 {
            assert!((sums[i] - 1.0).abs() < TOL, "row {} sums to {}", i, sums[i]);
        }
        assert_eq!(sums[3], 0.0);
        assert!((normalized.get(0, 1) - 0.8).abs() < TOL);
    }

    #[test]
    fn ppmi_is_non_negative_and_sparse() {

        let backend = HostBackend;
        let m = cooc();
        let normalized = Normalizer::new(&backend).apply(&m, Method::Ppmi).unwrap();

        assert!(normalized.data().iter().all(|&v| v >= 0.0 && v.is_finite()));
        assert!(normalized.nnz() <= m.nnz());
        for i in 0..4 {
            for j in 0..4 {
                if m.get(i, j) == 0.0 {
                    assert_eq!(normalized.get(i, j), 0.0);
                }
            }
        }

        // total 17, row/col sums [5, 9, 3, 0]
        let expected = ((4.0_f64 / 17.0) / ((5.0 / 17.0) * (9.0 / 17.0))).ln();
        assert!((normalized.get(0, 1) - expected).abs() < TOL);
        // pmi of (1, 1) is ln(3 * 17 / 81) < 0, clamped away
        assert_eq!(normalized.get(1, 1), 0.0);
    }

    #[test]
    fn ppmi_of_empty_matrix() {
        let backend = HostBackend;
        let empty = CsrMatrix::from_triplets((3, 3), &[]).unwrap();
        let normalized = Normalizer::new(&backend).apply(&empty, Method::Ppmi).unwrap();
        assert_eq!(normalized.nnz(), 0);
    }

    #[test]
    fn idf_extremes() {

        // column 0 is present in every row, column 2 in none
        let m = CsrMatrix::from_triplets((3, 3), &[(0, 0, 1.0), (1, 0, 2.0), (2, 0, 5.0), (1, 1, 1.0)]).unwrap();
        let idf = inverse_document_frequency(&m);
        let n = 3.0_f64;

        assert!((idf[0] - (n / (n + 1.0)).ln()).abs() < TOL);
        assert!(idf[0] < 0.0);
        assert!((idf[1] - (n / 2.0).ln()).abs() < TOL);
        assert!((idf[2] - n.ln()).abs() < TOL);
    }

    #[test]
    fn explicit_zeros_do_not_count_as_documents() {
        let m = CsrMatrix::from_triplets((2, 1), &[(0, 0, 0.0), (1, 0, 3.0)]).unwrap();
        let idf = inverse_document_frequency(&m);
        assert!((idf[0] - 1.0_f64.ln()).abs() < TOL);
    }

    #[test]
    fn tfidf_keeps_zero_pattern() {

        let backend = HostBackend;
        let m = cooc();
        let normalized = Normalizer::new(&backend).apply(&m, Method::Tfidf).unwrap();
        let idf = inverse_document_frequency(&m);

        assert_eq!(normalized.indptr(), m.indptr());
        for i in 0..4 {
            for j in 0..4 {
                assert!((normalized.get(i, j) - m.get(i, j) * idf[j]).abs() < TOL);
            }
        }
    }

    #[test]
    fn backends_agree() {

        let host = HostBackend;
        let parallel = ParallelBackend::new(3).unwrap();
        let m = cooc();

        for method in Method::ALL {
            let a = Normalizer::new(&host).apply(&m, method).unwrap();
            let b = Normalizer::new(&parallel).apply(&m, method).unwrap();
            assert_eq!(a, b, "{} differs between backends", method);
        }
    }
}
