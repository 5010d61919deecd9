//! secrules - security rule reduction CLI
//!
//! # Usage
//!
//! ```bash
//! secrules reduce rules.txt                       # Print the reduced allow list
//! secrules reduce rules.txt --format json         # ...as rule records
//! secrules reduce rules.json --output allow.txt   # Write it atomically
//! secrules check rules.txt --direction in --protocol tcp --addr 10.0.0.1 --port 22
//! secrules diff old.txt new.txt                   # Compare two rule files
//! secrules cidrs 192.168.22.0 192.168.23.0        # Minimal CIDR cover
//! secrules init                                   # Write a default config file
//! ```

use clap::{Parser, Subcommand};
use secrules::config::{self, AppConfig, OutputFormat};
use secrules::core::records::{load_rule_file, save_rule_file, to_records_json};
use secrules::validators;
use secrules::{Action, Direction, Error, IpRange, Ipv4Range, Ipv6Range, Protocol, RuleSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "secrules")]
#[command(about = "Reduce prioritized allow/deny rules to an equivalent allow list", long_about = None)]
#[command(version, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Config file (defaults to the XDG config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or save the reduced allow list of a rule file
    Reduce {
        /// Rule file (.json for records, anything else for rule text)
        file: PathBuf,
        /// Output format (text or json); overrides the config
        #[arg(short, long)]
        format: Option<OutputFormat>,
        /// Write the result here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Decide a single packet against a rule file
    Check {
        file: PathBuf,
        #[arg(short, long)]
        direction: Direction,
        #[arg(short, long)]
        protocol: Protocol,
        #[arg(short, long)]
        addr: IpAddr,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Diff the reduced allow lists of two rule files
    Diff { a: PathBuf, b: PathBuf },
    /// Print the minimal CIDR cover of an address range
    Cidrs { start: IpAddr, end: IpAddr },
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

fn log_level(verbose: u8, config: &AppConfig) -> tracing::Level {
    match verbose {
        0 => config.log_level.parse().unwrap_or(tracing::Level::WARN),
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose, &app_config))
        .with_writer(std::io::stderr)
        .init();

    match handle_cli(cli.command, cli.config.as_deref(), &app_config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(e: &Error) {
    let translation = e.translate();
    eprintln!("Error: {}", translation.user_message);
    for suggestion in &translation.suggestions {
        eprintln!("  - {suggestion}");
    }
}

fn load(path: &Path, config: &AppConfig) -> secrules::Result<RuleSet> {
    load_rule_file(path, config.default_priority)
}

fn handle_cli(command: Commands, config_path: Option<&Path>, app_config: &AppConfig) -> secrules::Result<()> {
    match command {
        Commands::Reduce { file, format, output } => {
            let reduced = load(&file, app_config)?.allow_list();
            if let Some(output) = output {
                save_rule_file(&output, &reduced)?;
                println!("✓ Wrote {} rule(s) to {}", reduced.len(), output.display());
                return Ok(());
            }
            match format.unwrap_or(app_config.output_format) {
                OutputFormat::Text => print!("{reduced}"),
                OutputFormat::Json => println!("{}", to_records_json(&reduced)?),
            }
        }
        Commands::Check {
            file,
            direction,
            protocol,
            addr,
            port,
        } => {
            if protocol == Protocol::Any {
                return Err(Error::validation("protocol", "check needs tcp, udp or icmp"));
            }
            let rules = load(&file, app_config)?;
            let verdict = rules.evaluate(direction, protocol, addr, port);
            println!(
                "{}",
                match verdict {
                    Action::Allow => "✓ allow",
                    Action::Deny => "✗ deny",
                }
            );

            let host = match addr {
                IpAddr::V4(a) => IpRange::V4(Ipv4Range::host(a)),
                IpAddr::V6(a) => IpRange::V6(Ipv6Range::host(a)),
            };
            let notes = port
                .and_then(validators::check_well_known_port)
                .into_iter()
                .chain(validators::check_reserved_range(&host));
            for note in notes {
                println!("  note: {note}");
            }
        }
        Commands::Diff { a, b } => {
            let left = load(&a, app_config)?.allow_list();
            let right = load(&b, app_config)?.allow_list();
            let (old_text, new_text) = (left.to_string(), right.to_string());

            let diff = similar::TextDiff::from_lines(&old_text, &new_text);
            for change in diff.iter_all_changes() {
                let sign = match change.tag() {
                    similar::ChangeTag::Delete => "- ",
                    similar::ChangeTag::Insert => "+ ",
                    similar::ChangeTag::Equal => "  ",
                };
                print!("{sign}{change}");
            }

            if left.same_rules(&right) {
                println!("✓ Equivalent");
            } else {
                println!("✗ Not equivalent");
            }
        }
        Commands::Cidrs { start, end } => {
            let range: IpRange = format!("{start}-{end}").parse()?;
            for net in range.to_ip_nets() {
                println!("{net}");
            }
        }
        Commands::Init { force } => {
            let existing = config_path.map(Path::to_path_buf).or_else(config::default_config_path);
            if !force && existing.as_deref().is_some_and(Path::exists) {
                return Err(Error::validation(
                    "config",
                    "config file already exists (use --force to overwrite)",
                ));
            }
            let path = config::save_config(&AppConfig::default(), config_path)?;
            println!("✓ Wrote default config to {}", path.display());
        }
    }
    Ok(())
}
