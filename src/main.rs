//! Salesforce Apex client CLI
//!
//! Configuration tooling for the connection registry: validates
//! connections and prints them with secrets masked.

use std::process::ExitCode;

use clap::Parser;

use salesforce_apex::{
    cli::{Cli, Command},
    config::Config,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::ConfigTest { connection } => run_config_test(&config, connection.as_deref()),
    }
}

/// Validate connections and print them with secrets masked
fn run_config_test(config: &Config, only: Option<&str>) -> ExitCode {
    let mut names: Vec<&str> = match only {
        Some(name) => vec![name],
        None => config.connections.keys().map(String::as_str).collect(),
    };
    names.sort_unstable();

    if names.is_empty() {
        eprintln!("❌ No connections configured");
        return ExitCode::FAILURE;
    }

    if !config.connections.contains_key(&config.default_connection) {
        eprintln!(
            "❌ Default connection [{}] is not configured",
            config.default_connection
        );
        return ExitCode::FAILURE;
    }

    let mut failures = 0;
    for name in names {
        let connection = match config.connection(name) {
            Ok(connection) => connection,
            Err(e) => {
                eprintln!("❌ {e}");
                failures += 1;
                continue;
            }
        };

        match connection.validate(name) {
            Ok(()) => {
                println!("✅ Connection [{name}] is valid");
                match serde_yaml::to_string(&connection.redacted()) {
                    Ok(yaml) => {
                        for line in yaml.lines() {
                            println!("   {line}");
                        }
                    }
                    Err(e) => {
                        eprintln!("❌ Failed to render connection [{name}]: {e}");
                        failures += 1;
                    }
                }
            }
            Err(e) => {
                eprintln!("❌ {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        eprintln!("\n{failures} connection(s) failed validation");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
