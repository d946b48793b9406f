use std::process::ExitCode;

fn main() -> ExitCode {
    match chubbyd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
