//! Built-in middleware: request logging, panic recovery, CORS, rate
//! limiting and static file service. All of them are ordinary
//! [`MiddlewareFunc`](crate::MiddlewareFunc) values consuming the public
//! `Context` contract.

mod cors;
mod logger;
mod rate_limiter;
mod recovery;
mod static_files;

pub use cors::{cors, cors_with_config, CorsConfig};
pub use logger::logger;
pub use rate_limiter::{
  rate_limiter, RateLimiterMemoryStore, RateLimiterMemoryStoreConfig, RateLimiterStore,
};
pub use recovery::{recovery, recovery_with_config, RecoveryConfig};
pub use static_files::{static_directory, static_server};
