//! Cache configuration.
//!
//! Controls list page size and like-count reconciliation via `boardsync.toml`:
//!
//! ```toml
//! [cache]
//! page_size = 10
//! trust_server_like_count = true
//! ```

use serde::Deserialize;

const DEFAULT_PAGE_SIZE: u32 = 10;
/// Largest page the board server will serve.
pub const MAX_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Posts requested per list page.
    pub page_size: u32,
    /// Overwrite the optimistic like state with the server's answer.
    pub trust_server_like_count: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            trust_server_like_count: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            page_size: settings.page_size,
            trust_server_like_count: settings.trust_server_like_count,
        }
    }
}

impl CacheConfig {
    /// Page size clamped into the range the server accepts.
    pub fn page_limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.page_limit(), 10);
        assert!(config.trust_server_like_count);
    }

    #[test]
    fn page_limit_is_clamped() {
        let zero = CacheConfig {
            page_size: 0,
            ..CacheConfig::default()
        };
        let huge = CacheConfig {
            page_size: 500,
            ..CacheConfig::default()
        };
        assert_eq!(zero.page_limit(), 1);
        assert_eq!(huge.page_limit(), MAX_PAGE_SIZE);
    }
}
