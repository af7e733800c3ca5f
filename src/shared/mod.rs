pub mod config;
pub mod database;
pub mod inference;
pub mod logging;
pub mod models;

pub use database::init_session_store;
pub use models::AppState;
