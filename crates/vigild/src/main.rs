//! Entry point for the `vigild` daemon.

use std::process::ExitCode;

fn main() -> ExitCode {
    match vigild::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed when launch fails early.
            eprintln!("vigild: {error}");
            ExitCode::FAILURE
        }
    }
}
