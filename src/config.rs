// Application configuration, loaded from environment variables and CLI flags.

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Base URL of the generation/judging oracle service.
    pub oracle_url: String,
    /// Rounds per battle (each round is one turn per agent).
    pub total_rounds: u32,
    /// Pacing delay between streamed turns, in milliseconds. Cosmetic only;
    /// set to 0 to disable.
    pub stream_turn_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:arena.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `ORACLE_URL` - Oracle service base URL (default: `http://127.0.0.1:8601`)
    /// - `TOTAL_ROUNDS` - Rounds per battle (default: 5)
    /// - `STREAM_TURN_DELAY_MS` - Pause between streamed turns (default: 1500)
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:arena.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let oracle_url = std::env::var("ORACLE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8601".to_string());

        let total_rounds = std::env::var("TOTAL_ROUNDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::battle::DEFAULT_TOTAL_ROUNDS);

        let stream_turn_delay_ms = std::env::var("STREAM_TURN_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1500);

        Config {
            database_url,
            port,
            oracle_url,
            total_rounds,
            stream_turn_delay_ms,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_value() {
        let args: Vec<String> = vec!["prog".into(), "--port".into(), "8080".into()];
        assert_eq!(
            Config::parse_cli_value(&args, "--port"),
            Some("8080".to_string())
        );
        assert_eq!(Config::parse_cli_value(&args, "--missing"), None);
    }
}
