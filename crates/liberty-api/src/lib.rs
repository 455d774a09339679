pub mod applications;
pub mod auth;
pub mod chat;
pub mod eligibility;
pub mod email;
pub mod error;
pub mod grants;
pub mod market;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;
pub mod subscriptions;

pub use error::ApiError;
pub use routes::build_router;
pub use state::{ApiConfig, AppState, AppStateInner};
