use std::process::ExitCode;

fn main() -> ExitCode {
    match cname_rollup::cli::run_rollup_cli(std::env::args_os()) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("cname-rollup: {err}");
            ExitCode::FAILURE
        }
    }
}
