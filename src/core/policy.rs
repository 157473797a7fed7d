// Runtime policy: every threshold, limit and word-list the engine consults.
// Built once at startup and passed by Arc to every component - there is no
// process-wide default instance.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Owner bypasses every gate check and may run admin commands.
    pub owner_id: i64,

    // Rate limiting
    pub max_messages_per_minute: usize,
    pub max_messages_per_hour: usize,
    pub max_api_calls_per_minute: usize,

    // Anti-spam
    pub max_message_length: usize,
    pub max_identical_messages: usize,
    pub spam_score_threshold: i32,
    pub auto_ban_spam_score: i32,
    pub max_caps_ratio: f64,
    pub profanity_filter: bool,
    pub link_filter: bool,
    pub caps_filter: bool,

    // Account trust
    pub verification_enabled: bool,
    /// Ids above this are treated as recently created accounts. A weak,
    /// platform-specific proxy; recalibrate per deployment.
    pub new_account_id_floor: i64,
    pub suspicious_username_tokens: Vec<String>,
    pub promo_keywords: Vec<String>,

    /// Case-insensitive regex patterns; each match adds its own score.
    pub spam_patterns: Vec<String>,
    pub profanity_words: Vec<String>,
    pub shortlink_domains: Vec<String>,

    // Persistence
    pub data_file: PathBuf,
    pub backup_dir: PathBuf,
    pub max_backup_files: usize,
    pub auto_backup_interval_secs: u64,
    pub sweep_interval_secs: u64,

    // Completion relay
    pub completion_url: String,
    pub completion_persona: String,
    pub max_reply_length: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            owner_id: 0,

            max_messages_per_minute: 10,
            max_messages_per_hour: 100,
            max_api_calls_per_minute: 5,

            max_message_length: 4000,
            max_identical_messages: 3,
            spam_score_threshold: 5,
            auto_ban_spam_score: 10,
            max_caps_ratio: 0.7,
            profanity_filter: true,
            link_filter: true,
            caps_filter: true,

            verification_enabled: true,
            new_account_id_floor: 5_000_000_000,
            suspicious_username_tokens: str_vec(&[
                "bot", "spam", "fake", "test", "promo", "ad", "marketing",
            ]),
            promo_keywords: str_vec(&["free", "win", "prize", "money", "bitcoin", "crypto"]),

            spam_patterns: str_vec(&[
                r"\b(viagra|cialis|casino|lottery|winner|congratulations)\b",
                r"\b(click here|free money|make money fast|get rich quick)\b",
                r"\b(bitcoin|crypto|investment|forex|trading)\b.*\b(guaranteed|profit|returns)\b",
                r"https?://(?:bit\.ly|tinyurl|t\.co|short\.link)/",
                r"\b(join now|limited time|act now|urgent|hurry)\b",
            ]),
            profanity_words: str_vec(&["spam", "scam", "fake"]),
            shortlink_domains: str_vec(&["bit.ly", "tinyurl", "t.co", "short.link", "goo.gl"]),

            data_file: PathBuf::from("data/warden_state.json"),
            backup_dir: PathBuf::from("data/backups"),
            max_backup_files: 10,
            auto_backup_interval_secs: 3600,
            sweep_interval_secs: 300,

            completion_url: "https://api.ryzumi.vip/api/ai/v2/chatgpt".to_string(),
            completion_persona: "You are a helpful, concise assistant.".to_string(),
            max_reply_length: 4000,
        }
    }
}

impl PolicyConfig {
    /// Coded defaults overridden by `WARDEN_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("WARDEN_OWNER_ID") {
            config.owner_id = v;
        }
        if let Some(v) = env_parse("WARDEN_MAX_MESSAGES_PER_MINUTE") {
            config.max_messages_per_minute = v;
        }
        if let Some(v) = env_parse("WARDEN_MAX_MESSAGES_PER_HOUR") {
            config.max_messages_per_hour = v;
        }
        if let Some(v) = env_parse("WARDEN_MAX_API_CALLS_PER_MINUTE") {
            config.max_api_calls_per_minute = v;
        }
        if let Some(v) = env_parse("WARDEN_MAX_MESSAGE_LENGTH") {
            config.max_message_length = v;
        }
        if let Some(v) = env_parse("WARDEN_SPAM_SCORE_THRESHOLD") {
            config.spam_score_threshold = v;
        }
        if let Some(v) = env_parse("WARDEN_AUTO_BAN_SPAM_SCORE") {
            config.auto_ban_spam_score = v;
        }
        if let Some(v) = env_parse("WARDEN_NEW_ACCOUNT_ID_FLOOR") {
            config.new_account_id_floor = v;
        }
        if let Some(v) = env_parse("WARDEN_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = v;
        }
        if let Some(v) = env_parse("WARDEN_AUTO_BACKUP_INTERVAL_SECS") {
            config.auto_backup_interval_secs = v;
        }
        if let Ok(v) = std::env::var("WARDEN_DATA_FILE") {
            config.data_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARDEN_BACKUP_DIR") {
            config.backup_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARDEN_COMPLETION_URL") {
            config.completion_url = v;
        }
        if let Ok(v) = std::env::var("WARDEN_COMPLETION_PERSONA") {
            config.completion_persona = v;
        }

        config
    }
}

fn str_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
