use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Scorer service
    pub scorer_endpoint: String,
    pub scorer_key: String,

    // Agent + enrichment collaborators. Empty agent endpoint means the
    // feed worker writes the memory table directly.
    pub agent_endpoint: String,
    pub enrichment_endpoint: String,
    pub agent_id: uuid::Uuid,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Pipeline tuning
    pub processor_parallelism: usize,
    pub feed_parallelism: usize,
    pub fetch_timeout: Duration,
    pub relevance_threshold: i32,
    pub min_text_bytes: usize,
    pub max_attempts: i32,
    pub feed_max_attempts: i32,
    pub run_deadline: Duration,
    pub per_host_min_spacing: Duration,
    pub stuck_timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            scorer_endpoint: required_env("SCORER_ENDPOINT"),
            scorer_key: required_env("SCORER_KEY"),
            agent_endpoint: env::var("AGENT_ENDPOINT").unwrap_or_default(),
            enrichment_endpoint: env::var("ENRICHMENT_ENDPOINT").unwrap_or_default(),
            agent_id: env::var("AGENT_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(uuid::Uuid::nil),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            processor_parallelism: parsed_env("PROCESSOR_PARALLELISM", 8),
            feed_parallelism: parsed_env("FEED_PARALLELISM", 4),
            fetch_timeout: Duration::from_millis(parsed_env("FETCH_TIMEOUT_MS", 15_000)),
            relevance_threshold: parsed_env("RELEVANCE_THRESHOLD", 60),
            min_text_bytes: parsed_env("MIN_TEXT_BYTES", 500),
            max_attempts: parsed_env("MAX_ATTEMPTS", 3),
            feed_max_attempts: parsed_env("FEED_MAX_ATTEMPTS", 5),
            run_deadline: Duration::from_millis(parsed_env("RUN_DEADLINE_MS", 1_800_000)),
            per_host_min_spacing: Duration::from_millis(parsed_env(
                "PER_HOST_MIN_SPACING_MS",
                500,
            )),
            stuck_timeout: Duration::from_millis(parsed_env("STUCK_TIMEOUT_MS", 600_000)),
            max_body_bytes: parsed_env("MAX_BODY_BYTES", 10 * 1024 * 1024),
            user_agent: env::var("USER_AGENT").unwrap_or_else(|_| {
                "patchwork-discovery/0.1 (+https://patchwork.dev; discovery pipeline)".to_string()
            }),
        }
    }

    /// Log the length of each sensitive value for debugging, never the value.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("SCORER_ENDPOINT", &self.scorer_endpoint),
            ("SCORER_KEY", &self.scorer_key),
            ("AGENT_ENDPOINT", &self.agent_endpoint),
            ("ENRICHMENT_ENDPOINT", &self.enrichment_endpoint),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
