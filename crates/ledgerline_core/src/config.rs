//! Outbox configuration.

/// Configuration for an [`Outbox`](crate::Outbox).
#[derive(Debug, Clone)]
pub struct Config {
    /// Page size used when republishing unsent ledger entries.
    pub unsent_page_size: usize,

    /// Whether to attach a change feed observer on open.
    pub enable_feed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unsent_page_size: 100,
            enable_feed: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unsent republish page size.
    #[must_use]
    pub const fn unsent_page_size(mut self, value: usize) -> Self {
        self.unsent_page_size = value;
        self
    }

    /// Sets whether a change feed is attached.
    #[must_use]
    pub const fn enable_feed(mut self, value: bool) -> Self {
        self.enable_feed = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new().unsent_page_size(7).enable_feed(false);
        assert_eq!(config.unsent_page_size, 7);
        assert!(!config.enable_feed);
        assert!(Config::default().enable_feed);
    }
}
