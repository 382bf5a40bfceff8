//! CLI argument parsing for the collecta-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "collecta-worker", about = "Collecta debt-collection backend worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Register a user and print a development identity token
    IssueToken {
        /// User id placed in the token subject
        #[arg(long)]
        uid: String,
        /// admin, collector or user
        #[arg(long, default_value = "user")]
        role: String,
        /// Email address recorded for the user
        #[arg(long)]
        email: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["collecta-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["collecta-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["collecta-worker", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_issue_token_parses() {
        let cli = Cli::parse_from(["collecta-worker", "issue-token", "--uid", "col-7", "--role", "collector"]);
        match cli.command {
            Some(Command::IssueToken { uid, role, email }) => {
                assert_eq!(uid, "col-7");
                assert_eq!(role, "collector");
                assert!(email.is_none());
            }
            _ => panic!("expected issue-token"),
        }
    }

    #[test]
    fn test_cli_issue_token_requires_uid() {
        assert!(Cli::try_parse_from(["collecta-worker", "issue-token"]).is_err());
    }
}
