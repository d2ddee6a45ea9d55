//! Plan engine - scheduling for project plans

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = plan_engine::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
