
use std::env;
use std::process::ExitCode;
use cooc_reducer::Run;

fn main() -> ExitCode {

    let args: Vec<String> = env::args().collect();
    match Run::run(&args) {
        Ok(report) if report.failures.is_empty() => {
            println!("all matrices processed successfully");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            println!("processed {} embeddings, {} combinations failed", report.processed, report.failures.len());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("failed to process matrices: {}", e);
            ExitCode::FAILURE
        }
    }
}
