use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "jsonkeep",
    about = "Read and edit JSON files with jsonkeep",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with store settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write compact JSON instead of indented
    #[arg(long, global = true)]
    pub compact: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the value at a path
    Get(GetArgs),
    /// Write a value at a path, creating missing parents
    Set(SetArgs),
    /// Remove the value at a path
    Rm(RmArgs),
    /// List the keys of the container at a path
    Keys(KeysArgs),
    /// Delete the file
    Drop(DropArgs),
}

#[derive(Args)]
pub struct GetArgs {
    pub file: PathBuf,
    /// Dot-separated path, e.g. `users.0.name`; omit for the whole document
    pub path: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    pub file: PathBuf,
    pub path: String,
    /// JSON value; anything that does not parse as JSON is stored as a string
    pub value: String,
}

#[derive(Args)]
pub struct RmArgs {
    pub file: PathBuf,
    pub path: String,
}

#[derive(Args)]
pub struct KeysArgs {
    pub file: PathBuf,
    pub path: Option<String>,
}

#[derive(Args)]
pub struct DropArgs {
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_get_whole_document() {
        let cli = Cli::try_parse_from(["jsonkeep", "get", "data.json"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("data.json"));
            assert!(args.path.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_set_with_global_flags() {
        let cli = Cli::try_parse_from([
            "jsonkeep", "set", "data.json", "a.b", "[1,2]", "--compact", "-v",
        ])
        .unwrap();
        assert!(cli.compact);
        assert!(cli.verbose);
        if let Command::Set(args) = cli.command {
            assert_eq!(args.path, "a.b");
            assert_eq!(args.value, "[1,2]");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_config_flag() {
        let cli =
            Cli::try_parse_from(["jsonkeep", "--config", "keep.toml", "drop", "data.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("keep.toml")));
        assert!(matches!(cli.command, Command::Drop(_)));
    }

    #[test]
    fn set_requires_value() {
        assert!(Cli::try_parse_from(["jsonkeep", "set", "data.json", "a"]).is_err());
    }
}
