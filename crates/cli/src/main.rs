use std::process::ExitCode;

fn main() -> ExitCode {
    academy_cli::run()
}
