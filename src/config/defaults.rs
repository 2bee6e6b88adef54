//! System-wide default constants.
//!
//! Grouped by subsystem; the `RelayConfig` section defaults read from here.

// ============================================================================
// Server
// ============================================================================

pub const BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Largest accepted multipart upload (bytes). 20 MiB.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// ============================================================================
// Storage
// ============================================================================

/// Sled database directory.
pub const DATA_DIR: &str = "./data";

/// Uploaded and generated images, also served under `/captures`.
pub const CAPTURES_DIR: &str = "./public/captures";

// ============================================================================
// Vision
// ============================================================================

pub const VISION_BASE_URL: &str = "http://localhost:11434";

pub const VISION_MODEL: &str = "granite3.2-vision";

pub const VISION_PROMPT: &str = "Describe what you see in this image in detail. \
Focus on the main subjects, actions, setting, and any notable details.";

// ============================================================================
// Generator
// ============================================================================

/// Extension given to generated image files.
pub const GENERATOR_OUTPUT_EXTENSION: &str = "webp";

/// Environment variable that overrides `[generator] api_key`.
pub const GENERATOR_API_KEY_ENV: &str = "RELAY_GENERATOR_API_KEY";

// ============================================================================
// Queue
// ============================================================================

/// How often the drain scheduler looks for pending captures (seconds).
pub const QUEUE_POLL_INTERVAL_SECS: u64 = 5;

/// Deadline for each describer / generator call (seconds).
pub const CALL_TIMEOUT_SECS: u64 = 180;

// ============================================================================
// Pacing
// ============================================================================

/// Minimum time between stage start and the description broadcast (ms).
pub const DESCRIPTION_FLOOR_MS: u64 = 10_000;

/// Minimum time between stage start and the generation broadcast (ms).
pub const GENERATION_FLOOR_MS: u64 = 5_000;

// ============================================================================
// Events
// ============================================================================

/// Events buffered per websocket subscriber before it lags.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Config discovery
// ============================================================================

pub const CONFIG_ENV: &str = "RELAY_CONFIG";

pub const CONFIG_FILE: &str = "relay_config.toml";
