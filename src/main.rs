//! `reforkd --config <path>` binds listeners and runs the master loop with
//! `StaticFileApp` as the application factory. `--test-config` parses and
//! validates the configuration, prints the dashboard, and exits without
//! binding anything.

use std::process::ExitCode;

use reforkd::app::StaticFileApp;
use reforkd::config::{display, validate, ResolvedConfig};
use reforkd::master::Master;

struct Cli {
    config_path: String,
    test_config: bool,
}

fn parse_args() -> Option<Cli> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut test_config = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--test-config" => test_config = true,
            _ => {}
        }
    }
    Some(Cli { config_path: config_path?, test_config })
}

fn main() -> ExitCode {
    let cli = match parse_args() {
        Some(cli) => cli,
        None => {
            eprintln!("usage: reforkd --config <path> [--test-config]");
            return ExitCode::FAILURE;
        }
    };

    let source = match std::fs::read_to_string(&cli.config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("reforkd: cannot read {}: {e}", cli.config_path);
            return ExitCode::FAILURE;
        }
    };

    let config = match ResolvedConfig::load(&source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let conflicts = validate::validate_listeners(&config);
    for conflict in &conflicts {
        eprintln!("\x1b[1;31mlistener conflict\x1b[0m: {}", conflict.message);
    }

    if cli.test_config {
        if conflicts.is_empty() {
            display::display_config(&config);
            return ExitCode::SUCCESS;
        }
        return ExitCode::FAILURE;
    }

    if !conflicts.is_empty() {
        eprintln!("reforkd: refusing to start with unresolved listener conflicts");
        return ExitCode::FAILURE;
    }

    let app = StaticFileApp::new(config.document_root.clone());
    let master = match Master::new(config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("reforkd: failed to initialize master: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = master.run(&app);
    ExitCode::from(code as u8)
}
