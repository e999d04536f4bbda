use std::process::ExitCode;

fn main() -> ExitCode {
    tutorbot_cli::run()
}
