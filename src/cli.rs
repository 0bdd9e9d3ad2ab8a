use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "simtrade")]
#[command(version)]
#[command(about = "Simulated equities trading desk with a real-time WebSocket channel", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "SIMTRADE_CONFIG_DIR")]
    pub config_dir: String,

    /// Keep the ledger in memory instead of PostgreSQL
    #[arg(long)]
    pub memory: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP/WebSocket server and the pending order sweeper (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Run a single sweep over pending orders and exit
    SweepOnce,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["simtrade"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.memory);
    }

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["simtrade", "--memory", "sweep-once"]).unwrap();
        assert_eq!(cli.command, Some(Commands::SweepOnce));
        assert!(cli.memory);

        let cli = Cli::try_parse_from(["simtrade", "-c", "/etc/simtrade", "migrate"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Migrate));
        assert_eq!(cli.config_dir, "/etc/simtrade");
    }
}
