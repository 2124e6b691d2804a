// src/cli.rs

//! CLI definitions for the dop client
//!
//! Command-line surface only; implementations live in the `commands`
//! module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dop")]
#[command(author, version, about = "Language-agnostic source/binary package manager", long_about = None)]
pub struct Cli {
    /// Run as if started in DIR
    #[arg(short = 'C', long = "directory", global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Persist a registry credential
    Login {
        /// Registry URL the token belongs to
        #[arg(short = 'R', long = "registry")]
        registry: Option<String>,

        /// CLI token created on the registry
        token: String,
    },

    /// Read or write the active build profile
    Profile {
        /// Profile base name to activate or create
        name: Option<String>,

        /// Auto-detect tools on this host
        #[arg(long)]
        discover: bool,

        /// Discover only the tools the recipe needs and the profile lacks
        #[arg(long)]
        add_missing: bool,

        /// Switch the profile to a debug build type
        #[arg(long)]
        debug: bool,

        /// Switch the profile to a release build type
        #[arg(long)]
        release: bool,

        /// Set a tool explicitly: TOOL[=EXE]
        #[arg(long = "set", value_name = "TOOL[=EXE]")]
        set: Vec<String>,

        /// Write the profile to the named file
        #[arg(long, value_name = "NAME")]
        export: Option<PathBuf>,

        /// Print the full profile
        #[arg(long)]
        describe: bool,
    },

    /// Manage the option file
    Options {
        /// Remove every stored option
        #[arg(long)]
        clear: bool,

        /// Print the stored options
        #[arg(long)]
        print: bool,

        /// Options to set, `key=value` (values: true/false/<int>/<string>)
        #[arg(value_name = "KEY=VALUE")]
        values: Vec<String>,
    },

    /// Resolve dependencies and write dop.lock
    Resolve {
        /// Recompute even when the lock file is fresh
        #[arg(long)]
        force: bool,

        /// Prefer system-installed packages (default)
        #[arg(long, conflicts_with_all = ["prefer_cache", "prefer_local", "pick_highest"])]
        prefer_system: bool,

        /// Prefer cached recipes over system packages
        #[arg(long, conflicts_with_all = ["prefer_local", "pick_highest"])]
        prefer_cache: bool,

        /// Use only what is already on local disk when possible
        #[arg(long, conflicts_with = "pick_highest")]
        prefer_local: bool,

        /// Always pick the highest satisfying version
        #[arg(long)]
        pick_highest: bool,

        /// Never touch the network
        #[arg(long)]
        no_network: bool,

        /// Never satisfy dependencies from system packages
        #[arg(long)]
        no_system: bool,

        /// Set an option for this resolution, `key=value`
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Override the build type: debug or release
        #[arg(long, value_name = "TYPE")]
        build_type: Option<String>,

        /// Override the host OS: Linux, OSX or Windows
        #[arg(long, value_name = "OS")]
        os: Option<String>,

        /// Override the host architecture
        #[arg(long, value_name = "ARCH")]
        arch: Option<String>,
    },

    /// Ensure the source directory is present
    Source {
        /// Re-fetch even when sources look fresh
        #[arg(long)]
        force: bool,
    },

    /// Build the package for the current configuration
    Build {
        /// Rebuild even when up to date
        #[arg(long)]
        force: bool,

        /// Never touch the network
        #[arg(long)]
        no_network: bool,

        /// Build with the named profile instead of the active one
        #[arg(short = 'p', long)]
        profile: Option<String>,
    },

    /// Build dependencies and self, installing into DEST
    Stage {
        /// Destination tree
        dest: PathBuf,

        /// Build with the named profile instead of the active one
        #[arg(short = 'p', long)]
        profile: Option<String>,

        /// Set an option, `key=value`
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Archive the recipe, verify it builds, upload to the registry
    Publish {
        /// Verify the integrity build with the named profile
        #[arg(long, value_name = "PROFILE")]
        check_profile: Option<String>,

        /// Skip the version-control cleanliness check
        #[arg(long)]
        skip_cvs_clean: bool,

        /// Set an option for the integrity build, `key=value`
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Query the registry catalog
    Search {
        /// Treat PATTERN as a regular expression
        #[arg(short = 'r', long)]
        regex: bool,

        /// Match case-sensitively
        #[arg(short = 'c', long)]
        case_sensitive: bool,

        /// Match package names only
        #[arg(short = 'N', long, conflicts_with = "extended")]
        name_only: bool,

        /// Include per-revision details in the output
        #[arg(short = 'E', long)]
        extended: bool,

        /// Only report the latest version of each package
        #[arg(short = 'L', long)]
        latest_only: bool,

        /// Limit the number of packages returned
        #[arg(short = 'l', long, value_name = "N")]
        limit: Option<u32>,

        /// List every package in the catalog
        #[arg(short = 'A', long, conflicts_with = "pattern")]
        all: bool,

        /// Pattern to search for
        pattern: Option<String>,
    },

    /// Print the recipe revision
    Revision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_asserts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resolve_flags() {
        let cli = Cli::parse_from([
            "dop",
            "resolve",
            "--pick-highest",
            "--no-network",
            "-o",
            "zlib/shared=true",
        ]);
        match cli.command {
            Commands::Resolve {
                pick_highest,
                no_network,
                options,
                ..
            } => {
                assert!(pick_highest);
                assert!(no_network);
                assert_eq!(options, vec!["zlib/shared=true".to_string()]);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_global_directory() {
        let cli = Cli::parse_from(["dop", "-C", "/tmp/pkg", "revision"]);
        assert_eq!(cli.directory.as_deref(), Some(std::path::Path::new("/tmp/pkg")));
        assert!(matches!(cli.command, Commands::Revision));
    }

    #[test]
    fn test_conflicting_heuristics_rejected() {
        let result = Cli::try_parse_from(["dop", "resolve", "--prefer-system", "--pick-highest"]);
        assert!(result.is_err());
    }
}
