use std::path::PathBuf;

use crate::cli::Cli;

/// Resolved runtime settings, derived from CLI flags and environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub database: PathBuf,
    pub base_url: String,
    pub log_level: String,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            api_token: cli.api_token.clone().unwrap_or_default(),
            database: expand_tilde(&cli.database),
            base_url: cli.base_url.trim_end_matches('/').to_string(),
            log_level: cli.log_level.clone(),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn make_cli(args: &[&str]) -> Cli {
        let mut argv = vec!["readwise-sync"];
        argv.extend_from_slice(args);
        argv.push("status");
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/lib/rw.db"), PathBuf::from("/var/lib/rw.db"));
    }

    #[test]
    fn expand_tilde_resolves_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x/y.db"), home.join("x/y.db"));
        }
    }

    #[test]
    fn base_url_is_normalized() {
        let cli = make_cli(&["--base-url", "https://example.com/api/v2/"]);
        let config = Config::from_cli(&cli);
        assert_eq!(config.base_url, "https://example.com/api/v2");
    }

    #[test]
    fn database_path_is_expanded() {
        let cli = make_cli(&["--database", "/tmp/rw/test.db"]);
        let config = Config::from_cli(&cli);
        assert_eq!(config.database, PathBuf::from("/tmp/rw/test.db"));
    }
}
