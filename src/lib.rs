pub mod client_identity;
pub mod config;
pub mod element;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod pagination;
pub mod response_cache;
pub mod seed;
pub mod server;
pub mod store;
pub mod throttle;

pub use config::Config;
pub use element::Element;
pub use error::{ApiError, Result};
pub use handlers::{AppState, SharedState};
pub use server::create_app;
pub use store::{ElementStore, SqliteElementStore};
