use clap::{Args, Parser, Subcommand};

use crate::readwise::DEFAULT_BASE_URL;

#[derive(Debug, Parser)]
#[command(
    name = "readwise-sync",
    version,
    about = "Sync Readwise books and highlights into a local SQLite database"
)]
pub struct Cli {
    /// Readwise API token.
    #[arg(long, env = "READWISE_API_KEY", hide_env_values = true, global = true)]
    pub api_token: Option<String>,

    /// Path to the SQLite database.
    #[arg(long, default_value = "~/.readwise/readwise.db", global = true)]
    pub database: String,

    /// API base URL.
    #[arg(long, default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Full sync of all books and highlights.
    Sync {
        /// Ignore the stored watermark and re-fetch everything.
        #[arg(long)]
        force: bool,
    },

    /// Sync highlights made within a trailing window of hours.
    Incremental {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Poll for new highlights on an interval.
    Poll(PollArgs),

    /// Show database totals and the last completed run.
    Status,

    /// List recent sync runs, newest first.
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Delete the local database and start over.
    ResetDb {
        /// Skip the confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Args)]
pub struct PollArgs {
    /// Poll a single time and exit.
    #[arg(long)]
    pub once: bool,

    /// Seconds between polls.
    #[arg(long, default_value_t = 300)]
    pub interval: u64,

    /// Hours to look back on the first poll.
    #[arg(long, default_value_t = 1)]
    pub lookback: u32,

    /// Failure backoffs before resuming the normal interval.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Do not persist the poll checkpoint.
    #[arg(long)]
    pub no_state: bool,

    /// Checkpoint file location.
    #[arg(long, default_value = "~/.readwise/poller_state.json")]
    pub state_file: String,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn poll_defaults() {
        let cli = Cli::try_parse_from(["readwise-sync", "poll"]).unwrap();
        match cli.command {
            Command::Poll(args) => {
                assert!(!args.once);
                assert_eq!(args.interval, 300);
                assert_eq!(args.lookback, 1);
                assert_eq!(args.max_retries, 3);
                assert!(!args.no_state);
            }
            other => panic!("expected poll, got {other:?}"),
        }
    }

    #[test]
    fn sync_accepts_force() {
        let cli = Cli::try_parse_from(["readwise-sync", "sync", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::Sync { force: true }));
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "readwise-sync",
            "status",
            "--database",
            "/tmp/test.db",
            "--api-token",
            "t0ken",
        ])
        .unwrap();
        assert_eq!(cli.database, "/tmp/test.db");
        assert_eq!(cli.api_token.as_deref(), Some("t0ken"));
    }
}
