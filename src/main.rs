#[macro_use]
extern crate tracing;

mod app;
mod cli;

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match app::run::main_with_error().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("httptime: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
