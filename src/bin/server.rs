//! Askbox server binary.
//! Run with: cargo run --bin askbox-server

use std::process::ExitCode;

use askbox::start_askbox;

fn main() -> ExitCode {
    start_askbox::run()
}
