
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy, NpzReader};
use crate::error::{Error, Result, StorageError};
use crate::normalize::Method;
use crate::sparse::CsrMatrix;

/// A co-occurrence matrix file and the window size encoded in its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputMatrix {
    pub path: PathBuf,
    pub window_size: usize,
}

/// Parses `N` out of `<prefix>_w<N>.npz`.
pub fn parse_window_size(file_name: &str, prefix: &str) -> Option<usize> {
    let digits = file_name
        .strip_prefix(prefix)?
        .strip_prefix("_w")?
        .strip_suffix(".npz")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lists the matrix files of `input_dir` in ascending window order.
pub fn discover_inputs(input_dir: &Path, prefix: &str) -> Result<Vec<InputMatrix>> {

    let entries = fs::read_dir(input_dir).map_err(|e| Error::io(input_dir, e))?;
    let mut inputs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(input_dir, e))?.path();
        let window_size = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => parse_window_size(name, prefix),
            None => None
        };
        if let Some(window_size) = window_size {
            inputs.push(InputMatrix { path, window_size });
        }
    }

    inputs.sort_by_key(|input| input.window_size);
    Ok(inputs)
}

/// Deterministic names of the embedding files.
#[derive(Clone, Debug)]
pub struct OutputNaming {
    pub prefix: String,
    /// file name tag used for row normalization, `rownormalize` in older runs
    pub row_normalize_tag: String,
}

impl OutputNaming {

    pub fn tag(&self, method: Method) -> &str {
        match method {
            Method::RowNormalize => &self.row_normalize_tag,
            other => other.as_str(),
        }
    }

    /// `<prefix>_w<N>_<tag>_d<D>`, without extension.
    pub fn file_stem(&self, window_size: usize, method: Method, d: usize) -> String {
        format!("{}_w{}_{}_d{}", self.prefix, window_size, self.tag(method), d)
    }
}

pub fn read_input<R: ReadFile>(file_path: &Path) -> Result<R> {
    R::read_file(file_path)
}

/// Saves `item` as `<output_dir>/<file_stem>.<ext>` and returns the written path.
pub fn save_output<S: SaveFile>(output_dir: &Path, file_stem: &str, item: &S) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
    let path = output_dir.join(format!("{}.{}", file_stem, S::EXTENSION));
    item.save_file(&path)?;
    Ok(path)
}

pub trait ReadFile: Sized {
    fn read_file(file_path: &Path) -> Result<Self>;
}

pub trait SaveFile {
    const EXTENSION: &'static str;
    fn save_file(&self, file_path: &Path) -> Result<()>;
}

impl ReadFile for CsrMatrix {
    fn read_file(file_path: &Path) -> Result<Self> {
        read_csr(file_path).map_err(|e| Error::io(file_path, e))
    }
}

impl ReadFile for Array2<f64> {
    fn read_file(file_path: &Path) -> Result<Self> {
        read_npy(file_path).map_err(|e| Error::io(file_path, e))
    }
}

impl SaveFile for Array2<f64> {
    const EXTENSION: &'static str = "npy";
    fn save_file(&self, file_path: &Path) -> Result<()> {
        write_npy(file_path, self).map_err(|e| Error::io(file_path, e))
    }
}

// scipy `save_npz` stores the arrays data, indices, indptr, shape and format;
// depending on the numpy version the zip entries carry a `.npy` suffix or not
fn entry_name(names: &[String], key: &str) -> std::result::Result<String, StorageError> {
    names.iter()
        .find(|name| name.trim_end_matches(".npy") == key)
        .cloned()
        .ok_or_else(|| StorageError::Malformed(format!("no `{}` array, only csr archives are supported", key)))
}

fn read_csr(file_path: &Path) -> std::result::Result<CsrMatrix, StorageError> {

    let f = File::open(file_path)?;
    let mut npz = NpzReader::new(BufReader::new(f))?;
    let names = npz.names()?;

    let shape = read_integers(&mut npz, &entry_name(&names, "shape")?)?;
    let indptr = read_integers(&mut npz, &entry_name(&names, "indptr")?)?;
    let indices = read_integers(&mut npz, &entry_name(&names, "indices")?)?;
    let data = read_floats(&mut npz, &entry_name(&names, "data")?)?;

    if shape.len() != 2 {
        return Err(StorageError::Malformed(format!("expected a 2d shape, found {:?}", shape)));
    }
    let shape = (to_usize(shape[0])?, to_usize(shape[1])?);
    let indptr = indptr.into_iter().map(to_usize).collect::<std::result::Result<Vec<usize>, _>>()?;
    let indices = indices.into_iter().map(to_usize).collect::<std::result::Result<Vec<usize>, _>>()?;

    CsrMatrix::new(shape, indptr, indices, data).map_err(|e| StorageError::Malformed(e.to_string()))
}

fn to_usize(v: i64) -> std::result::Result<usize, StorageError> {
    usize::try_from(v).map_err(|_| StorageError::Malformed(format!("negative index {}", v)))
}

// integer arrays are int32 for small matrices and int64 otherwise
fn read_integers<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> std::result::Result<Vec<i64>, StorageError> {

    let as_i64: std::result::Result<Array1<i64>, _> = npz.by_name(name);
    if let Ok(a) = as_i64 {
        return Ok(a.to_vec());
    }
    let as_i32: std::result::Result<Array1<i32>, _> = npz.by_name(name);
    if let Ok(a) = as_i32 {
        return Ok(a.iter().map(|&v| i64::from(v)).collect());
    }
    let as_u32: std::result::Result<Array1<u32>, _> = npz.by_name(name);
    if let Ok(a) = as_u32 {
        return Ok(a.iter().map(|&v| i64::from(v)).collect());
    }

    let as_u64: Array1<u64> = npz.by_name(name)?;
    as_u64.iter()
        .map(|&v| i64::try_from(v).map_err(|_| StorageError::Malformed(format!("index {} overflows", v))))
        .collect()
}

// counts come as floats or integers depending on how the matrix was built
fn read_floats<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> std::result::Result<Vec<f64>, StorageError> {

    let as_f64: std::result::Result<Array1<f64>, _> = npz.by_name(name);
    if let Ok(a) = as_f64 {
        return Ok(a.to_vec());
    }
    let as_f32: std::result::Result<Array1<f32>, _> = npz.by_name(name);
    if let Ok(a) = as_f32 {
        return Ok(a.iter().map(|&v| f64::from(v)).collect());
    }
    let as_i32: std::result::Result<Array1<i32>, _> = npz.by_name(name);
    if let Ok(a) = as_i32 {
        return Ok(a.iter().map(|&v| f64::from(v)).collect());
    }

    let as_i64: Array1<i64> = npz.by_name(name)?;
    Ok(as_i64.iter().map(|&v| v as f64).collect())
}


/// Writes `matrix` the way scipy's `save_npz` lays out a csr matrix.
#[cfg(test)]
pub(crate) fn write_csr_npz(path: &Path, matrix: &CsrMatrix) -> std::result::Result<(), StorageError> {

    use ndarray_npy::NpzWriter;

    let to_i32 = |values: &[usize]| Array1::from_iter(values.iter().map(|&v| v as i32));
    let (rows, cols) = matrix.shape();

    let mut npz = NpzWriter::new_compressed(File::create(path)?);
    npz.add_array("indices", &to_i32(matrix.indices()))?;
    npz.add_array("indptr", &to_i32(matrix.indptr()))?;
    npz.add_array("shape", &Array1::from(vec![rows as i64, cols as i64]))?;
    npz.add_array("data", &Array1::from(matrix.data().to_vec()))?;
    npz.finish()?;
    Ok(())
}
