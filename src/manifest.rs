
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::info;
use crate::error::{Error, Result};
use crate::normalize::Method;

/// Metadata of one embedding file produced by the batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub window_size: usize,
    pub normalization: String,
    pub dimensions: usize,
    pub original_shape: [usize; 2],
    pub embedding_shape: [usize; 2],
    pub file_path: String,
}

pub fn result_key(window_size: usize, method: &str, d: usize) -> String {
    format!("w{}_{}_d{}", window_size, method, d)
}

impl ProcessingResult {

    pub fn new(window_size: usize, method: Method, d: usize, original_shape: (usize, usize), embedding_shape: (usize, usize), file_path: &Path) -> Self {
        Self {
            window_size,
            normalization: method.as_str().to_string(),
            dimensions: d,
            original_shape: [original_shape.0, original_shape.1],
            embedding_shape: [embedding_shape.0, embedding_shape.1],
            file_path: file_path.display().to_string(),
        }
    }

    /// `w<N>_<method>_d<D>`
    pub fn key(&self) -> String {
        result_key(self.window_size, &self.normalization, self.dimensions)
    }
}

/// The JSON manifest of a batch run, rewritten on every recorded entry so the
/// file on disk always holds a complete document.
pub struct Manifest {
    path: PathBuf,
    entries: BTreeMap<String, ProcessingResult>,
    // keys produced by this run
    recorded: BTreeSet<String>,
}

impl Manifest {

    /// Opens the manifest at `path`. Entries already in the file stay until this
    /// run produces the same key again, and nothing is written before the first record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Manifest> {

        let path = path.into();
        let entries = if path.exists() { Manifest::load(&path)? } else { BTreeMap::new() };
        if !entries.is_empty() {
            info!("keeping {} entries of an earlier run in {}", entries.len(), path.display());
        }
        Ok(Self { path, entries, recorded: BTreeSet::new() })
    }

    pub fn load(path: &Path) -> Result<BTreeMap<String, ProcessingResult>> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| Error::io(path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, ProcessingResult> {
        &self.entries
    }

    /// Number of entries recorded by this run.
    pub fn recorded(&self) -> usize {
        self.recorded.len()
    }

    /// Adds `result`, replacing an entry of an earlier run, and writes the manifest through.
    pub fn record(&mut self, result: ProcessingResult) -> Result<()> {

        let key = result.key();
        if self.recorded.contains(&key) {
            return Err(Error::DuplicateEntry(key));
        }
        let previous = self.entries.insert(key.clone(), result);

        if let Err(e) = self.persist() {
            // keep memory and disk in agreement
            match previous {
                Some(previous) => self.entries.insert(key, previous),
                None => self.entries.remove(&key),
            };
            return Err(e);
        }
        self.recorded.insert(key);
        Ok(())
    }

    /// Writes the manifest when no file exists yet, so every finished run leaves one.
    pub fn ensure_written(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.persist()
    }

    // written next to the target and renamed over it, a crash never leaves half a document
    fn persist(&self) -> Result<()> {

        let tmp = self.path.with_extension("json.tmp");
        {
            let f = File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
            let mut writer = BufWriter::new(f);
            serde_json::to_writer_pretty(&mut writer, &self.entries).map_err(|e| Error::io(&tmp, e))?;
            writer.flush().map_err(|e| Error::io(&tmp, e))?;
            writer.get_ref().sync_all().map_err(|e| Error::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| Error::io(&self.path, e))
    }
}
