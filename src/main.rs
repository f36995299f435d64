use cvewatch::application::Application;

use std::process::ExitCode;

fn main() -> ExitCode {
    let mut application = Application::new();
    application.read_argv();
    application.init_logging();
    application.run()
}
