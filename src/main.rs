//! Binary entrypoint for the askbox chat server.

use std::process::ExitCode;

use askbox::start_askbox;

fn main() -> ExitCode {
    start_askbox::run()
}
