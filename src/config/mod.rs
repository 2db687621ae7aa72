//! Service configuration

mod schema;
mod store;

pub use schema::{AppConfig, AuthConfig, DatabaseConfig, RelayConfig, ServerConfig, VideoConfig};
pub use store::{ConfigStore, ENV_BIND, ENV_DATABASE_URL, ENV_SECRET_KEY};
