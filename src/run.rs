
use crate::config::Config;
use crate::error::Result;
use crate::logging::RunLog;
use crate::monitor::{ResourceMonitor, SystemMemory};
use crate::pipeline::{BatchReport, Pipeline};
use tracing::{error, info};

pub struct Run {}

impl Run {

    // the steps of one batch:
    // -> configuration from the json given on the command line
    // -> logging for this run
    // -> device check and backend selection
    // -> the reduction pipeline

    pub fn run(args: &[String]) -> Result<BatchReport> {

        let params = Config::new(args)?.get_params();
        let log = RunLog::start(&params.log_dir)?;
        info!("logging to {}", log.path().display());
        info!("{}", params);

        let outcome = ResourceMonitor::new(SystemMemory::default())
            .select_backend(params.backend, params.num_threads, params.min_free_memory_gb)
            .and_then(|backend| Pipeline::new(&params, backend.as_ref()).run());

        if let Err(e) = &outcome {
            error!("processing failed: {}", e);
        }
        outcome
    }

}


#[cfg(test)]
mod tests {

    use std::fs;
    use serde_json::json;
    use super::Run;
    use crate::error::Error;
    use crate::manifest::Manifest;
    use crate::sparse::CsrMatrix;
    use crate::store::write_csr_npz;

    #[test]
    fn needs_a_config_file() {
        let args = vec!["reducer".to_string()];
        assert!(matches!(Run::run(&args), Err(Error::Config(_))));
    }

    #[test]
    fn end_to_end() {

        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("in");
        fs::create_dir_all(&input_dir).unwrap();

        let triplets: Vec<(usize, usize, f64)> = (0..10)
            .flat_map(|i| [(i, (i + 1) % 10, 2.0), ((i + 1) % 10, i, 2.0), (i, (i + 3) % 10, 1.0)])
            .collect();
        let matrix = CsrMatrix::from_triplets((10, 10), &triplets).unwrap();
        write_csr_npz(&input_dir.join("cooc_matrix_w2.npz"), &matrix).unwrap();
        write_csr_npz(&input_dir.join("cooc_matrix_w3.npz"), &matrix).unwrap();

        let config = json!({
            "input_dir": input_dir,
            "output_dir": dir.path().join("out"),
            "log_dir": dir.path().join("logs"),
            "dimensions": [3],
            "skip_windows": [2],
            "backend": "host",
            "min_free_memory_gb": 0.0
        });
        let config_path = dir.path().join("params.json");
        fs::write(&config_path, config.to_string()).unwrap();

        let args = vec!["reducer".to_string(), config_path.display().to_string()];
        let report = Run::run(&args).unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped_windows, vec![2]);

        let manifest = Manifest::load(&report.manifest_path).unwrap();
        assert!(manifest.contains_key("w3_ppmi_d3"));
        assert!(manifest.contains_key("w3_tfidf_d3"));
        assert!(manifest.contains_key("w3_row_normalize_d3"));
        assert_eq!(fs::read_dir(dir.path().join("logs")).unwrap().count(), 1);
    }
}
