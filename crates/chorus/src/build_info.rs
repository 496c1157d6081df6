//! Build metadata reported by `--version` and `/health`.

use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("CHORUS_BUILD_COMMIT") {
    Some(c) => c,
    None => "unknown",
};

/// Version plus commit, e.g. `0.1.0 (abc1234)`.
pub fn version_string() -> String {
    format!("{} ({})", VERSION, COMMIT)
}

/// Body of the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub sessions: usize,
}

impl Health {
    pub fn ok(sessions: usize) -> Self {
        Self {
            status: "ok",
            version: VERSION,
            commit: COMMIT,
            sessions,
        }
    }
}
