//! Client side of Bantay Maynila: a community bulletin for the districts of Manila.
//!
//! Every screen keeps a local projection of one table (posts, happenings, news) that is loaded
//! once on mount and then kept current by the table's change feed. The projections live in
//! [`mirror`]; this crate supplies the records, the Supabase backend, and the screen logic
//! around them.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod images;
pub mod models;
pub mod pagination;
pub mod screens;
pub mod search;
pub mod supabase;

use std::sync::LazyLock;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::AppError;
pub use supabase::SupabaseClient;

// Forced through LOGGER so repeated init_logging calls are harmless.
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    log::info!("Logging initialized");
});

pub fn init_logging() {
    LazyLock::force(&LOGGER);
}
