mod cli;

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use harmony_checker::{dump_graph, verify};
use harmony_vm::program::{Program, parse_literal};
use harmony_vm::value::Value;

use crate::cli::{Cli, parse_pair};

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> eyre::Result<bool> {
    let mut consts: Vec<(String, Value)> = Vec::new();
    for spec in &cli.constants {
        let (name, expr) = parse_pair(spec, 'c')?;
        let value = parse_literal(&expr)?;
        consts.push((name, value));
    }
    let mut mods: Vec<(String, String)> = Vec::new();
    for spec in &cli.modules {
        mods.push(parse_pair(spec, 'm')?);
    }

    let mut clean = true;
    for file in &cli.files {
        let program = Program::load(file, &consts, &mods)?;

        if cli.listing {
            print!("{}", program.listing());
            continue;
        }

        let (report, exploration) = verify(&program, cli.blocking)?;
        print!("{}", report.render());

        if cli.dump {
            let dump = json!({
                "report": &report,
                "graph": dump_graph(&exploration.graph),
            });
            std::fs::write("harmony.json", serde_json::to_string_pretty(&dump)?)?;
            info!(path = "harmony.json", "state graph written");
        }

        if !report.ok() {
            clean = false;
        }
    }
    Ok(clean)
}
