//! Shared configuration defaults and environment overrides.
//!
//! Keeps the default values in one place so the store, the CLI and tests
//! agree on them.

/// Default page size when a caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on any requested page size.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Default number of pending continuation sessions kept per container.
pub const DEFAULT_MAX_PENDING_CONTINUATIONS: usize = 1024;

/// Environment variable names.
pub mod env_vars {
    use super::{DEFAULT_MAX_PENDING_CONTINUATIONS, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

    pub const PAGE_SIZE: &str = "DOCQUERY_PAGE_SIZE";
    pub const MAX_CONTINUATIONS: &str = "DOCQUERY_MAX_CONTINUATIONS";
    /// `true` switches the CLI to JSON log output.
    pub const LOG_JSON: &str = "DOCQUERY_LOG_JSON";

    /// Default page size from the environment, or the built-in default.
    pub fn page_size() -> usize {
        std::env::var(PAGE_SIZE)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(|n| n.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Pending continuation capacity from the environment, or the default.
    pub fn max_continuations() -> usize {
        std::env::var(MAX_CONTINUATIONS)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_PENDING_CONTINUATIONS)
    }

    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}
