pub mod auth_token;
pub mod config;
pub mod error;
pub mod grant;
pub mod handlers;
pub mod middleware;
pub mod state;
pub mod store;
pub mod users;

pub use state::AppServices;
