
use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use serde_json::Value;
use crate::error::{Error, Result};
use crate::reduce::SvdSettings;

/// Which compute backend the run asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendChoice {
    Auto,
    Host,
    Parallel,
}

/// What the orchestrator does when a single combination fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// stop the batch on the first error
    Abort,
    /// log the failure, keep going with the next combination
    Continue,
}

#[derive(Clone, Debug)]
pub struct BatchParams {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub input_prefix: String,
    pub output_prefix: String,
    pub manifest_name: String,
    pub dimensions: Vec<usize>,
    pub normalizations: Vec<String>,
    pub skip_windows: BTreeSet<usize>,
    pub row_normalize_tag: String,
    pub failure_policy: FailurePolicy,
    pub backend: BackendChoice,
    pub num_threads: usize,
    pub min_free_memory_gb: f64,
    pub svd: SvdSettings,
}

impl BatchParams {

    /// Defaults for everything but the two directories.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> BatchParams {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            log_dir: PathBuf::from("logs"),
            input_prefix: "cooc_matrix".to_string(),
            output_prefix: "embeddings".to_string(),
            manifest_name: "reduction_results.json".to_string(),
            dimensions: vec![50, 100, 200, 300],
            normalizations: vec!["ppmi".to_string(), "tfidf".to_string(), "row_normalize".to_string()],
            skip_windows: BTreeSet::new(),
            row_normalize_tag: "rownormalize".to_string(),
            failure_policy: FailurePolicy::Abort,
            backend: BackendChoice::Auto,
            num_threads: 0,
            min_free_memory_gb: 1.0,
            svd: SvdSettings::default(),
        }
    }
}

impl Display for BatchParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using parameters:
        input_dir: {}
        output_dir: {}
        log_dir: {}
        input_prefix: {}
        output_prefix: {}
        manifest_name: {}
        dimensions: {:?}
        normalizations: {:?}
        skip_windows: {:?}
        row_normalize_tag: {}
        failure_policy: {:?}
        backend: {:?}
        num_threads: {}
        min_free_memory_gb: {}
        svd: {:?}",
        self.input_dir.display(), self.output_dir.display(), self.log_dir.display(), self.input_prefix,
        self.output_prefix, self.manifest_name, self.dimensions, self.normalizations, self.skip_windows,
        self.row_normalize_tag, self.failure_policy, self.backend, self.num_threads, self.min_free_memory_gb, self.svd
        )
    }
}

pub struct Config {
    params: BatchParams
}

impl Config {

    pub fn get_params(&self) -> BatchParams {
        self.params.clone()
    }

    /// Expects the program name followed by the path to a json file.
    pub fn new(args: &[String]) -> Result<Config> {

        if args.len() != 2 {
            return Err(Error::Config("input should be a path to json file only".to_string()));
        }

        let path = PathBuf::from(&args[1]);
        let f = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let json: Value = serde_json::from_reader(BufReader::new(f)).map_err(|e| Error::io(&path, e))?;
        Config::from_json(&json)
    }

    pub fn from_json(json: &Value) -> Result<Config> {

        // directories are mandatory
        let input_dir = required_str(json, "input_dir")?;
        let output_dir = required_str(json, "output_dir")?;
        let mut params = BatchParams::new(input_dir, output_dir);

        // everything else falls back to the defaults
        if let Some(log_dir) = optional_str(json, "log_dir")? {
            params.log_dir = PathBuf::from(log_dir);
        }
        if let Some(input_prefix) = optional_str(json, "input_prefix")? {
            params.input_prefix = input_prefix;
        }
        if let Some(output_prefix) = optional_str(json, "output_prefix")? {
            params.output_prefix = output_prefix;
        }
        if let Some(manifest_name) = optional_str(json, "manifest_name")? {
            params.manifest_name = manifest_name;
        }
        if let Some(dimensions) = optional_usize_list(json, "dimensions")? {
            params.dimensions = dimensions;
        }
        if let Some(normalizations) = optional_str_list(json, "normalizations")? {
            params.normalizations = normalizations;
        }
        if let Some(skip_windows) = optional_usize_list(json, "skip_windows")? {
            params.skip_windows = skip_windows.into_iter().collect();
        }
        if let Some(tag) = optional_str(json, "row_normalize_tag")? {
            params.row_normalize_tag = tag;
        }
        params.failure_policy = match optional_str(json, "failure_policy")?.as_deref() {
            None | Some("abort") => FailurePolicy::Abort,
            Some("continue") => FailurePolicy::Continue,
            Some(other) => return Err(Error::Config(format!("unknown failure_policy {}", other))),
        };
        params.backend = match optional_str(json, "backend")?.as_deref() {
            None | Some("auto") => BackendChoice::Auto,
            Some("host") => BackendChoice::Host,
            Some("parallel") => BackendChoice::Parallel,
            Some(other) => return Err(Error::Config(format!("unknown backend {}", other))),
        };
        if let Some(num_threads) = optional_usize(json, "num_threads")? {
            params.num_threads = num_threads;
        }
        if let Some(min_free) = optional_f64(json, "min_free_memory_gb")? {
            params.min_free_memory_gb = min_free;
        }
        if let Some(oversampling) = optional_usize(json, "oversampling")? {
            params.svd.oversampling = oversampling;
        }
        if let Some(power_iterations) = optional_usize(json, "power_iterations")? {
            params.svd.power_iterations = power_iterations;
        }
        if let Some(max_iterations) = optional_usize(json, "max_iterations")? {
            params.svd.max_iterations = max_iterations;
        }
        if let Some(tolerance) = optional_f64(json, "tolerance")? {
            params.svd.tolerance = tolerance;
        }
        if let Some(seed) = optional_usize(json, "seed")? {
            params.svd.seed = seed as u64;
        }

        if params.dimensions.iter().any(|&d| d == 0) {
            return Err(Error::Config("dimensions must be positive".to_string()));
        }
        if params.svd.tolerance <= 0.0 {
            return Err(Error::Config("tolerance must be positive".to_string()));
        }

        Ok(Self { params })
    }

}

fn type_error(key: &str, expected: &str) -> Error {
    Error::Config(format!("{} should be {}", key, expected))
}

fn required_str(json: &Value, key: &str) -> Result<String> {
    optional_str(json, key)?.ok_or_else(|| Error::Config(format!("{} was not supplied through json", key)))
}

fn optional_str(json: &Value, key: &str) -> Result<Option<String>> {
    match json.get(key) {
        Some(value) => value.as_str().map(|s| Some(s.to_owned())).ok_or_else(|| type_error(key, "a string")),
        None => Ok(None)
    }
}

fn optional_usize(json: &Value, key: &str) -> Result<Option<usize>> {
    match json.get(key) {
        Some(value) => value.as_u64().map(|n| Some(n as usize)).ok_or_else(|| type_error(key, "a non-negative integer")),
        None => Ok(None)
    }
}

fn optional_f64(json: &Value, key: &str) -> Result<Option<f64>> {
    match json.get(key) {
        Some(value) => value.as_f64().map(Some).ok_or_else(|| type_error(key, "numeric")),
        None => Ok(None)
    }
}

fn optional_usize_list(json: &Value, key: &str) -> Result<Option<Vec<usize>>> {
    match json.get(key) {
        Some(Value::Array(items)) => items.iter()
            .map(|item| item.as_u64().map(|n| n as usize).ok_or_else(|| type_error(key, "a list of non-negative integers")))
            .collect::<Result<Vec<usize>>>()
            .map(Some),
        Some(_) => Err(type_error(key, "a list of non-negative integers")),
        None => Ok(None)
    }
}

fn optional_str_list(json: &Value, key: &str) -> Result<Option<Vec<String>>> {
    match json.get(key) {
        Some(Value::Array(items)) => items.iter()
            .map(|item| item.as_str().map(|s| s.to_owned()).ok_or_else(|| type_error(key, "a list of strings")))
            .collect::<Result<Vec<String>>>()
            .map(Some),
        Some(_) => Err(type_error(key, "a list of strings")),
        None => Ok(None)
    }
}
