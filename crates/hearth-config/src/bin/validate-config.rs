//! Config validation CLI tool
//!
//! Validates a hearthd configuration file and reports any errors.

use hearth_config::{ConfigError, MemberRole, CURRENT_CONFIG_VERSION};
use hearth_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a hearthd configuration file.");
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match hearth_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Families: {}", config.families.len());
            println!("  Children: {}", config.child_count());

            for family in &config.families {
                println!();
                println!("{} ({}):", family.name, family.id);
                for member in &family.members {
                    match &member.role {
                        MemberRole::Guardian => {
                            println!("  - {} [guardian]", member.display_name);
                        }
                        MemberRole::Child { policy } => {
                            println!(
                                "  - {} [child] screen {} / day, spend {} / day, {} / month, auto-approve <= {} {}{}",
                                member.display_name,
                                format_duration(policy.max_daily_screen_time),
                                policy.daily_spending_limit,
                                policy.monthly_spending_limit,
                                policy.auto_approval_threshold,
                                policy.currency,
                                if policy.require_approval_for_purchases {
                                    ""
                                } else {
                                    " (approval not required)"
                                },
                            );
                        }
                    }
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
