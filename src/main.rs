use pipeline_shell::{Editor, Interpreter, ShellConfig, logging};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config: ShellConfig = argh::from_env();
    logging::init_logging(config.verbose);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pipeline_shell: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ShellConfig) -> anyhow::Result<()> {
    let mut editor = Editor::new(!config.no_history)?;
    Interpreter::new(config).repl(&mut editor)
}
