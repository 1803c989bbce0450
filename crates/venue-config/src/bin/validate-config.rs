//! Config validation CLI tool
//!
//! Validates a venue configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use venue_api::PlatformCategory;
use venue_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a venue configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            default_path
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match venue_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", venue_config::CURRENT_CONFIG_VERSION);
            println!("  Database: {}", config.service.database_path.display());
            println!("  Machines: {}", config.machines.len());
            for category in PlatformCategory::ALL {
                let count = config
                    .machines
                    .iter()
                    .filter(|m| m.category == category)
                    .count();
                println!("    {}: {}", category, count);
            }

            if !config.machines.is_empty() {
                println!();
                println!("Machines:");
                for machine in &config.machines {
                    println!(
                        "  - {} [{}]: {}",
                        machine.id,
                        machine.category,
                        machine.label.as_deref().unwrap_or("-")
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                venue_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                venue_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                venue_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                venue_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        venue_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
