//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Root directory of the entry store.
    pub data_dir: PathBuf,
    /// Maximum number of items (updates plus deletions) per batch.
    pub max_batch_items: usize,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            data_dir: data_dir.into(),
            max_batch_items: 5000,
            body_limit: 16 * 1024 * 1024,
        }
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    /// Sets the maximum request body size.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 3000)), "data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.max_batch_items, 5000);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap(), "/srv/journal")
            .with_max_batch_items(10)
            .with_body_limit(1024);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.data_dir, PathBuf::from("/srv/journal"));
        assert_eq!(config.max_batch_items, 10);
        assert_eq!(config.body_limit, 1024);
    }
}
