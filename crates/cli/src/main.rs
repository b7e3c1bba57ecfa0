use std::process::ExitCode;

fn main() -> ExitCode {
    relatedrec_cli::run()
}
