use std::process::ExitCode;

fn main() -> ExitCode {
    match lib_event_bus_demo::init() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Application error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
