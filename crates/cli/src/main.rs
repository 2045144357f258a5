use std::process::ExitCode;

fn main() -> ExitCode {
    budgex_cli::run()
}
