// src/main.rs

use clap::Parser;
use dopamine::cli::{Cli, Commands};
use dopamine::commands;
use dopamine::resolver::Heuristics;
use dopamine::Error;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(dir) = &cli.directory {
        if let Err(e) = std::env::set_current_dir(dir) {
            eprintln!("dop: NOK - cannot enter {}: {e}.", dir.display());
            return ExitCode::from(1);
        }
    }

    let topic = topic(&cli.command);
    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.hint() {
                Some(hint) => eprintln!("{topic}: NOK - {e}. Try to run {hint}."),
                None => eprintln!("{topic}: NOK - {e}."),
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn topic(command: &Commands) -> &'static str {
    match command {
        Commands::Login { .. } => "Login",
        Commands::Profile { .. } => "Profile",
        Commands::Options { .. } => "Options",
        Commands::Resolve { .. } => "Resolve",
        Commands::Source { .. } => "Source",
        Commands::Build { .. } => "Build",
        Commands::Stage { .. } => "Stage",
        Commands::Publish { .. } => "Publish",
        Commands::Search { .. } => "Search",
        Commands::Revision => "Revision",
    }
}

fn dispatch(command: Commands) -> dopamine::Result<()> {
    match command {
        Commands::Login { registry, token } => commands::login::run(registry, token),
        Commands::Profile {
            name,
            discover,
            add_missing,
            debug,
            release,
            set,
            export,
            describe,
        } => commands::profile::run(commands::profile::ProfileArgs {
            name,
            discover,
            add_missing,
            debug,
            release,
            set,
            export,
            describe,
        }),
        Commands::Options { clear, print, values } => commands::options::run(clear, print, values),
        Commands::Resolve {
            force,
            prefer_system: _,
            prefer_cache,
            prefer_local,
            pick_highest,
            no_network,
            no_system,
            options,
            build_type,
            os,
            arch,
        } => {
            let heuristics = if pick_highest {
                Heuristics::PickHighest
            } else if prefer_local {
                Heuristics::PreferLocal
            } else if prefer_cache {
                Heuristics::PreferCache
            } else {
                Heuristics::PreferSystem
            };
            commands::resolve::run(commands::resolve::ResolveArgs {
                force,
                heuristics,
                no_network,
                no_system,
                options,
                build_type,
                os,
                arch,
            })
        }
        Commands::Source { force } => commands::source::run(force),
        Commands::Build {
            force,
            no_network,
            profile,
        } => commands::build::run(force, no_network, profile),
        Commands::Stage {
            dest,
            profile,
            options,
        } => commands::stage::run(dest, profile, options),
        Commands::Publish {
            check_profile,
            skip_cvs_clean,
            options,
        } => commands::publish::run(check_profile, skip_cvs_clean, options),
        Commands::Search {
            regex,
            case_sensitive,
            name_only,
            extended,
            latest_only,
            limit,
            all,
            pattern,
        } => commands::search::run(
            regex,
            case_sensitive,
            name_only,
            extended,
            latest_only,
            limit,
            all,
            pattern,
        ),
        Commands::Revision => commands::revision::run(),
    }
}

/// 1 for user-correctable failures, 2 for internal ones.
fn exit_code(e: &Error) -> u8 {
    match e {
        Error::Io(_) | Error::IoContext { .. } | Error::Json(_) => 2,
        _ => 1,
    }
}
