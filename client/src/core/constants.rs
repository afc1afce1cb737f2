//! Application-wide defaults and environment variable names.

pub const APP_NAME: &str = "docpilot";

// Defaults
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MODEL: &str = "openai_gpt_3_5_turbo";

/// Run-log step whose final output carries the retrieved source documents.
pub const SOURCE_STEP_NAME: &str = "FindDocs";

/// Model variants the service can route a turn to.
pub const MODEL_VARIANTS: &[&str] = &[
    "openai_gpt_3_5_turbo",
    "anthropic_claude_3_haiku",
    "google_gemini_pro",
    "fireworks_mixtral",
    "cohere_command",
];

// Feedback keys
pub const FEEDBACK_SCORE_KEY: &str = "user_score";
pub const FEEDBACK_CLICK_KEY: &str = "user_click";

/// Generic assistant message appended when a turn fails.
pub const TURN_FAILURE_TEXT: &str =
    "Sorry, something went wrong while answering your question. Please try again later.";

// Config files
pub const CONFIG_FILE_NAME: &str = "docpilot.json";
pub const APP_DOT_FOLDER: &str = ".docpilot";

// Environment variables
pub const ENV_LOG: &str = "DOCPILOT_LOG";
pub const ENV_ENDPOINT: &str = "DOCPILOT_ENDPOINT";
pub const ENV_MODEL: &str = "DOCPILOT_MODEL";
pub const ENV_TIMEOUT_SECS: &str = "DOCPILOT_TIMEOUT_SECS";
pub const ENV_CONFIG: &str = "DOCPILOT_CONFIG";
