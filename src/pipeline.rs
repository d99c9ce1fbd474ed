
// imports
use crate::backend::ComputeBackend;
use crate::config::{BatchParams, FailurePolicy};
use crate::error::{Error, Result};
use crate::manifest::{result_key, Manifest, ProcessingResult};
use crate::normalize::{Method, Normalizer};
use crate::reduce::{Operator, Reducer};
use crate::sparse::CsrMatrix;
use crate::store::{self, InputMatrix, OutputNaming};

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A combination that failed while the batch kept going.
#[derive(Debug)]
pub struct CombinationFailure {
    pub window_size: usize,
    /// `None` when the matrix itself could not be loaded
    pub key: Option<String>,
    pub error: Error,
}

/// Outcome of a batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub manifest_path: PathBuf,
    pub processed: usize,
    pub skipped_windows: Vec<usize>,
    pub failures: Vec<CombinationFailure>,
    pub elapsed: Duration,
}

pub struct Pipeline<'a> {
    params: &'a BatchParams,
    backend: &'a dyn ComputeBackend,
}

impl<'a> Pipeline<'a> {

    pub fn new(params: &'a BatchParams, backend: &'a dyn ComputeBackend) -> Self {
        Self { params, backend }
    }

    // runs the cross product of
    // -> input matrices (one per window size, minus the skipped ones)
    // -> normalization methods
    // -> target dimensions

    pub fn run(&self) -> Result<BatchReport> {

        let timer = Instant::now();
        let params = self.params;

        // reject unknown methods before touching any matrix
        let methods = Method::parse_all(&params.normalizations[..])?;

        fs::create_dir_all(&params.output_dir).map_err(|e| Error::io(&params.output_dir, e))?;
        let inputs = store::discover_inputs(&params.input_dir, &params.input_prefix)?;
        info!("found {} matrices in {}", inputs.len(), params.input_dir.display());

        let mut manifest = Manifest::open(params.output_dir.join(&params.manifest_name))?;
        let mut report = BatchReport {
            manifest_path: manifest.path().to_path_buf(),
            processed: 0,
            skipped_windows: Vec::new(),
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        };

        for input in &inputs {

            if params.skip_windows.contains(&input.window_size) {
                info!("skipping matrix with window size {}", input.window_size);
                report.skipped_windows.push(input.window_size);
                continue;
            }

            info!("processing matrix with window size {}", input.window_size);
            let matrix = match store::read_input::<CsrMatrix>(&input.path) {
                Ok(matrix) => matrix,
                Err(e) => {
                    self.handle_failure(&mut report, input.window_size, None, e)?;
                    continue;
                }
            };
            info!("loaded {:?} matrix with {} stored entries", matrix.shape(), matrix.nnz());

            self.process_matrix(input, &matrix, &methods, &mut manifest, &mut report)?;
        }

        manifest.ensure_written()?;
        report.elapsed = timer.elapsed();
        info!("all processing completed in {:.2} seconds, {} embeddings written to {}",
            report.elapsed.as_secs_f64(), report.processed, report.manifest_path.display());
        if !report.failures.is_empty() {
            warn!("{} combinations failed", report.failures.len());
        }
        Ok(report)
    }

    fn process_matrix(&self,
        input: &InputMatrix,
        matrix: &CsrMatrix,
        methods: &[Method],
        manifest: &mut Manifest,
        report: &mut BatchReport) -> Result<()> {

        let params = self.params;
        let naming = OutputNaming {
            prefix: params.output_prefix.clone(),
            row_normalize_tag: params.row_normalize_tag.clone(),
        };
        let normalizer = Normalizer::new(self.backend);
        let reducer = Reducer::new(self.backend, params.svd);

        for &method in methods {

            // normalization runs once per matrix and method, reduction once per d
            let normalized = normalizer.apply(matrix, method)?;
            let operator = Operator::new(&normalized);

            for &d in &params.dimensions {

                info!("reducing window {} {} matrix to d={} dimensions...", input.window_size, method, d);
                let timer = Instant::now();
                let key = result_key(input.window_size, method.as_str(), d);

                let outcome = reducer.reduce_operator(&operator, d).and_then(|embeddings| {
                    let stem = naming.file_stem(input.window_size, method, d);
                    let path = store::save_output(&params.output_dir, &stem, &embeddings)?;
                    Ok(ProcessingResult::new(input.window_size, method, d, matrix.shape(), embeddings.dim(), &path))
                });

                match outcome {
                    Ok(result) => {
                        debug_assert_eq!(result.embedding_shape[0], result.original_shape[0]);
                        manifest.record(result)?;
                        report.processed += 1;
                        info!("saved {} in {:.2} seconds", key, timer.elapsed().as_secs_f64());
                    }
                    Err(e) => self.handle_failure(report, input.window_size, Some(key), e)?,
                }
            }
        }

        Ok(())
    }

    fn handle_failure(&self, report: &mut BatchReport, window_size: usize, key: Option<String>, error: Error) -> Result<()> {

        let what = key.clone().unwrap_or_else(|| format!("window {}", window_size));
        if self.params.failure_policy == FailurePolicy::Continue && error.is_recoverable() {
            warn!("{} failed, continuing: {}", what, error);
            report.failures.push(CombinationFailure { window_size, key, error });
            return Ok(());
        }

        error!("{} failed: {}", what, error);
        Err(error)
    }
}


#[cfg(test)]
mod tests {

    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;
    use ndarray::Array2;
    use super::Pipeline;
    use crate::backend::{HostBackend, ParallelBackend};
    use crate::config::{BatchParams, FailurePolicy};
    use crate::error::Error;
    use crate::manifest::Manifest;
    use crate::sparse::CsrMatrix;
    use crate::store::{self, write_csr_npz};

    // banded symmetric counts, narrow enough that no column is in every row
    fn window_matrix(window: usize, vocab: usize) -> CsrMatrix {
        let mut triplets = Vec::new();
        for i in 0..vocab {
            for offset in 1..=(window % 4 + 1) {
                let j = (i + offset) % vocab;
                let count = (1 + (i * 7 + offset * 3) % 5) as f64;
                triplets.push((i, j, count));
                triplets.push((j, i, count));
            }
        }
        CsrMatrix::from_triplets((vocab, vocab), &triplets).unwrap()
    }

    fn params_for(root: &Path, windows: &[usize]) -> BatchParams {

        let input_dir = root.join("matrices");
        fs::create_dir_all(&input_dir).unwrap();
        for &w in windows {
            write_csr_npz(&input_dir.join(format!("cooc_matrix_w{}.npz", w)), &window_matrix(w, 12)).unwrap();
        }

        let mut params = BatchParams::new(input_dir, root.join("embeddings"));
        params.dimensions = vec![2, 4];
        params
    }

    #[test]
    fn skipped_windows_never_reach_the_manifest() {

        let dir = tempfile::tempdir().unwrap();
        let mut params = params_for(dir.path(), &[2, 3, 4, 5, 6, 7, 8, 10]);
        params.skip_windows = BTreeSet::from([2, 4, 6, 8]);

        let backend = HostBackend;
        let report = Pipeline::new(&params, &backend).run().unwrap();
        assert_eq!(report.skipped_windows, vec![2, 4, 6, 8]);
        assert!(report.failures.is_empty());

        let manifest = Manifest::load(&report.manifest_path).unwrap();
        let windows: BTreeSet<usize> = manifest.values().map(|r| r.window_size).collect();
        assert_eq!(windows, BTreeSet::from([3, 5, 7, 10]));

        // files x methods x dimensions
        assert_eq!(manifest.len(), 4 * 3 * 2);
        assert_eq!(report.processed, manifest.len());
        for (key, result) in &manifest {
            assert_eq!(key, &result.key());
            assert_eq!(result.embedding_shape[0], result.original_shape[0]);
            assert_eq!(result.embedding_shape[1], result.dimensions);

            let saved: Array2<f64> = store::read_input(Path::new(&result.file_path)).unwrap();
            assert_eq!(saved.dim(), (result.embedding_shape[0], result.embedding_shape[1]));
        }
    }

    #[test]
    fn file_names_follow_the_row_normalize_tag() {

        let dir = tempfile::tempdir().unwrap();
        let mut params = params_for(dir.path(), &[3]);
        params.dimensions = vec![2];

        let backend = HostBackend;
        let report = Pipeline::new(&params, &backend).run().unwrap();
        let manifest = Manifest::load(&report.manifest_path).unwrap();
        assert!(manifest["w3_row_normalize_d2"].file_path.ends_with("embeddings_w3_rownormalize_d2.npy"));
        assert!(manifest["w3_ppmi_d2"].file_path.ends_with("embeddings_w3_ppmi_d2.npy"));

        params.row_normalize_tag = "row_normalize".to_string();
        let report = Pipeline::new(&params, &backend).run().unwrap();
        let manifest = Manifest::load(&report.manifest_path).unwrap();
        assert!(manifest["w3_row_normalize_d2"].file_path.ends_with("embeddings_w3_row_normalize_d2.npy"));
    }

    #[test]
    fn unknown_method_fails_before_any_work() {

        let dir = tempfile::tempdir().unwrap();
        let mut params = params_for(dir.path(), &[3, 5]);
        params.normalizations = vec!["ppmi".to_string(), "foo".to_string()];

        let backend = HostBackend;
        let result = Pipeline::new(&params, &backend).run();
        assert!(matches!(result, Err(Error::UnsupportedMethod(name)) if name == "foo"));

        let manifest_path = params.output_dir.join(&params.manifest_name);
        assert!(!manifest_path.exists() || Manifest::load(&manifest_path).unwrap().is_empty());
    }

    #[test]
    fn abort_policy_keeps_partial_manifest() {

        // d = 12 is out of range for 12 x 12 matrices
        let dir = tempfile::tempdir().unwrap();
        let mut params = params_for(dir.path(), &[3]);
        params.normalizations = vec!["ppmi".to_string()];
        params.dimensions = vec![2, 12, 4];

        let backend = HostBackend;
        let result = Pipeline::new(&params, &backend).run();
        assert!(matches!(result, Err(Error::ReductionFailed { d: 12, .. })));

        let manifest = Manifest::load(&params.output_dir.join(&params.manifest_name)).unwrap();
        assert_eq!(manifest.keys().cloned().collect::<Vec<String>>(), vec!["w3_ppmi_d2".to_string()]);
    }

    #[test]
    fn continue_policy_records_failures() {

        let dir = tempfile::tempdir().unwrap();
        let mut params = params_for(dir.path(), &[3, 5]);
        fs::write(params.input_dir.join("cooc_matrix_w4.npz"), b"not a zip archive").unwrap();
        params.normalizations = vec!["tfidf".to_string()];
        params.dimensions = vec![2, 12];
        params.failure_policy = FailurePolicy::Continue;

        let backend = ParallelBackend::new(2).unwrap();
        let report = Pipeline::new(&params, &backend).run().unwrap();

        assert_eq!(report.processed, 2);
        let failed: Vec<(usize, Option<String>)> = report.failures.iter().map(|f| (f.window_size, f.key.clone())).collect();
        assert_eq!(failed, vec![
            (3, Some("w3_tfidf_d12".to_string())),
            (4, None),
            (5, Some("w5_tfidf_d12".to_string())),
        ]);

        let manifest = Manifest::load(&report.manifest_path).unwrap();
        assert_eq!(manifest.keys().cloned().collect::<Vec<String>>(), vec!["w3_tfidf_d2".to_string(), "w5_tfidf_d2".to_string()]);
    }

    #[test]
    fn rerun_keeps_earlier_results() {

        let dir = tempfile::tempdir().unwrap();
        let mut params = params_for(dir.path(), &[3, 5]);
        params.normalizations = vec!["ppmi".to_string()];
        params.dimensions = vec![2];

        let backend = HostBackend;
        let manifest_path = Pipeline::new(&params, &backend).run().unwrap().manifest_path;

        // a rerun failing on its first matrix leaves the earlier index alone
        fs::write(params.input_dir.join("cooc_matrix_w3.npz"), b"not a zip archive").unwrap();
        assert!(Pipeline::new(&params, &backend).run().is_err());
        let keys = |path: &Path| Manifest::load(path).unwrap().keys().cloned().collect::<Vec<String>>();
        assert_eq!(keys(manifest_path.as_path()), vec!["w3_ppmi_d2", "w5_ppmi_d2"]);

        // skipping the finished window keeps its entry
        params.skip_windows = BTreeSet::from([3]);
        let report = Pipeline::new(&params, &backend).run().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(keys(manifest_path.as_path()), vec!["w3_ppmi_d2", "w5_ppmi_d2"]);
    }

    #[test]
    fn missing_input_dir_is_io_failure() {

        let dir = tempfile::tempdir().unwrap();
        let params = BatchParams::new(dir.path().join("nowhere"), dir.path().join("out"));
        let backend = HostBackend;
        assert!(matches!(Pipeline::new(&params, &backend).run(), Err(Error::Io { .. })));
    }
}
