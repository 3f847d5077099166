//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand, parser::ValueSource};

use chapterdl_core::{ChapterNumber, DEFAULT_CONCURRENCY};

/// Fetch serialized chapter releases and keep a clean local library.
///
/// Chapters are downloaded from the catalog, unpacked, stripped of credits
/// pages and duplicates, and their pages renumbered in reading order.
#[derive(Parser, Debug)]
#[command(name = "chapterdl")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Library root chapters are stored under
    #[arg(short = 'O', long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Maximum chapters fetched at once (1-100)
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Config file (defaults to $XDG_CONFIG_HOME/chapterdl/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write settings given on the command line back to the config file
    #[arg(long, global = true)]
    pub save: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch chapters of one collection
    Fetch(FetchArgs),

    /// Fetch new chapters of followed collections
    Update {
        /// Collections to update (all subscriptions when empty)
        collections: Vec<String>,

        /// Also update collections with no local chapters
        #[arg(short, long)]
        force: bool,
    },

    /// Follow collections
    Subscribe {
        /// Collection names
        #[arg(required = true)]
        names: Vec<String>,

        /// Catalog path of the collection (single name only)
        #[arg(long)]
        url: Option<String>,
    },

    /// Stop following collections
    Unsubscribe {
        /// Collection names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Remove credits pages and duplicate files
    Clean {
        /// Folders to clean recursively
        #[arg(required = true)]
        folders: Vec<PathBuf>,
    },

    /// Renumber page files in natural order
    Rename {
        /// Folders whose subfolders are renamed
        #[arg(required = true)]
        folders: Vec<PathBuf>,

        /// Only rename folders that contain no subfolders
        #[arg(long)]
        only_node_dirs: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Collection name as listed in the catalog
    pub collection: String,

    /// First chapter (resumes after the latest local chapter when omitted)
    #[arg(short = 'c', long = "chapter")]
    pub start: Option<ChapterNumber>,

    /// Last chapter (defaults to the first chapter)
    #[arg(short = 'C', long = "to", requires = "start")]
    pub end: Option<ChapterNumber>,

    /// Catalog path overriding the one derived from the name
    #[arg(long)]
    pub url: Option<String>,

    /// Keep chapters as zip archives
    #[arg(long)]
    pub zip: bool,
}

/// Which global values were given on the command line rather than defaulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliValueSources {
    pub output_dir: bool,
    pub concurrency: bool,
}

/// Parses process arguments, recording which values came from the command line.
pub fn parse_cli_with_sources() -> (Cli, CliValueSources) {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = CliValueSources {
        output_dir: is_commandline_value(&matches, "output_dir"),
        concurrency: is_commandline_value(&matches, "concurrency"),
    };
    (cli, sources)
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn test_cli_fetch_parses_range() {
        let cli = parse(&["chapterdl", "fetch", "One Piece", "-c", "5", "-C", "7.5"]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.collection, "One Piece");
        assert_eq!(args.start, ChapterNumber::new(5.0));
        assert_eq!(args.end, ChapterNumber::new(7.5));
        assert!(!args.zip);
    }

    #[test]
    fn test_cli_fetch_end_requires_start() {
        let err = parse(&["chapterdl", "fetch", "Naruto", "-C", "9"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_fetch_rejects_non_numeric_chapter() {
        let err = parse(&["chapterdl", "fetch", "Naruto", "-c", "ten"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_default_globals() {
        let cli = parse(&["chapterdl", "update"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(!cli.save);
        assert_eq!(cli.concurrency, 5);
        assert!(cli.output_dir.is_none());
    }

    #[test]
    fn test_cli_globals_accepted_after_subcommand() {
        let cli = parse(&["chapterdl", "update", "-vv", "--concurrency", "20", "-O", "lib"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.concurrency, 20);
        assert_eq!(cli.output_dir, Some(PathBuf::from("lib")));
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        for value in ["0", "101"] {
            let err = parse(&["chapterdl", "--concurrency", value, "update"]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_update_collects_names_and_force() {
        let cli = parse(&["chapterdl", "update", "A", "B", "--force"]).unwrap();
        let Command::Update { collections, force } = cli.command else {
            panic!("expected update");
        };
        assert_eq!(collections, vec!["A".to_string(), "B".to_string()]);
        assert!(force);
    }

    #[test]
    fn test_cli_subscribe_requires_names() {
        let err = parse(&["chapterdl", "subscribe"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_rename_only_node_dirs_flag() {
        let cli = parse(&["chapterdl", "rename", "lib", "--only-node-dirs"]).unwrap();
        let Command::Rename {
            folders,
            only_node_dirs,
        } = cli.command
        else {
            panic!("expected rename");
        };
        assert_eq!(folders, vec![PathBuf::from("lib")]);
        assert!(only_node_dirs);
    }

    #[test]
    fn test_cli_missing_subcommand_is_error() {
        let err = parse(&["chapterdl"]).unwrap_err();
        assert!(matches!(
            err.kind(),
            clap::error::ErrorKind::MissingSubcommand
                | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        ));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = parse(&["chapterdl", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = parse(&["chapterdl", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
