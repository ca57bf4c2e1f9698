use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::ports::{ChatStore, CodeMailer, FileStore};
use crate::registry::SessionRegistry;
use crate::throttle::AuthThrottle;

/// Everything a connection task needs, built once at startup and shared by
/// reference with every connection.
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub store: Arc<dyn ChatStore>,
    pub mailer: Arc<dyn CodeMailer>,
    pub files: Arc<dyn FileStore>,
    pub throttle: AuthThrottle,
    pub started_at: Instant,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ChatStore>,
        mailer: Arc<dyn CodeMailer>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        let throttle = AuthThrottle::new(config.auth_rate, config.auth_burst);
        Self {
            config,
            registry: SessionRegistry::new(),
            store,
            mailer,
            files,
            throttle,
            started_at: Instant::now(),
        }
    }
}
