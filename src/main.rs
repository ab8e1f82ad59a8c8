mod app;
mod cli;
mod compositor;
mod config;
mod console;
mod ctl;
mod display;
mod font;
mod logger;
mod pane;
mod tab;
mod term;

use std::process::ExitCode;

fn main() -> ExitCode {
    let args = cli::Cli::parse_args();

    if let Some(token) = args.command.as_deref() {
        if cli::is_help(token) {
            print!("{}", cli::HELP);
            return ExitCode::SUCCESS;
        }
        let Some(command) = ctl::Command::parse(token) else {
            eprintln!("vtmux: unknown command '{token}' (try --help)");
            return ExitCode::FAILURE;
        };
        match ctl::dispatch(command) {
            Ok(true) => return ExitCode::SUCCESS,
            // No server answered; fall through and become the server.
            Ok(false) => {}
            Err(e) => {
                eprintln!("vtmux: could not deliver command: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if ctl::server_running() {
        eprintln!("vtmux: an instance is already running (try --help for commands)");
        return ExitCode::FAILURE;
    }

    run_server()
}

fn run_server() -> ExitCode {
    if let Err(e) = logger::init() {
        eprintln!("vtmux: cannot open {}: {e}", logger::LOG_PATH);
        return ExitCode::FAILURE;
    }
    let config = config::Config::load();

    let mut engine = match app::App::init(config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("startup failed: {e}");
            eprintln!("vtmux: startup failed: {e} (details in {})", logger::LOG_PATH);
            return ExitCode::FAILURE;
        }
    };

    let result = engine.run();
    // Teardown before touching stderr: the drop restores the console.
    drop(engine);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            eprintln!("vtmux: {e} (details in {})", logger::LOG_PATH);
            ExitCode::FAILURE
        }
    }
}
