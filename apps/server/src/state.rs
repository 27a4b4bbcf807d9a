use storage::Storage;

use crate::auth::TokenKeys;
use crate::config::ServerConfig;

/// Shared by every worker through `web::Data`
pub struct AppState {
    pub storage: Storage,
    pub keys: TokenKeys,
    pub min_interval_seconds: u32,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(storage: Storage, config: &ServerConfig) -> Self {
        Self {
            storage,
            keys: TokenKeys::new(&config.secret_key, config.token_expire_minutes),
            min_interval_seconds: config.min_interval_seconds,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}
