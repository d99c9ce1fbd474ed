use std::{env, path::Path, process::ExitCode};
use ndarray::Array2;
use cooc_reducer::{read_input, Manifest, Result, Similarity};


// this executable checks the embeddings listed in a reduction manifest:
// every file must exist and hold an array of the recorded shape, whose row count
// matches the matrix it came from.
// optionally lists the k nearest rows (cosine) to a given row of every embedding.
// example: ... output/reduction_results.json 17 10

fn main() -> ExitCode {

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 && args.len() != 4 {
        eprintln!("usage: inspect <manifest.json> [row k]");
        return ExitCode::FAILURE;
    }

    let neighbours = match args.get(2).zip(args.get(3)) {
        Some((row, k)) => match (row.parse::<usize>(), k.parse::<usize>()) {
            (Ok(row), Ok(k)) => Some((row, k)),
            _ => {
                eprintln!("row and k should be non-negative integers");
                return ExitCode::FAILURE;
            }
        },
        None => None
    };

    match inspect(Path::new(&args[1]), neighbours) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(problems) => {
            eprintln!("{} entries do not match the manifest", problems);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}


fn inspect(manifest_path: &Path, neighbours: Option<(usize, usize)>) -> Result<usize> {

    let manifest = Manifest::load(manifest_path)?;
    println!("{} entries in {}", manifest.len(), manifest_path.display());

    let mut problems = 0;
    for (key, result) in &manifest {

        let w: Array2<f64> = match read_input(Path::new(&result.file_path)) {
            Ok(w) => w,
            Err(e) => {
                println!("{} : cannot read embeddings: {}", key, e);
                problems += 1;
                continue;
            }
        };

        let (rows, dims) = w.dim();
        if [rows, dims] != result.embedding_shape || rows != result.original_shape[0] || dims != result.dimensions {
            println!("{} : stored shape {:?}, manifest says {:?} from {:?}", key, w.dim(), result.embedding_shape, result.original_shape);
            problems += 1;
            continue;
        }

        let sim = Similarity::new(w);
        let (min_norm, max_norm) = sim.norm_range()?;
        println!("{} : {} x {}, row norms in [{:.4}, {:.4}], {} zero rows", key, rows, dims, min_norm, max_norm, sim.zero_rows());

        if let Some((row, k)) = neighbours {
            for (i, (other, score)) in sim.find_k_most_similar(row, k)?.iter().enumerate() {
                println!("    {} : {} ? {} = {:.4}", i, row, other, score);
            }
        }
    }

    Ok(problems)
}
