//! Mirrors the `posts` table and logs per-category counts as changes arrive.
//!
//! Usage: `bantay-watch [config.toml]`. Settings can also come from `BANTAY_*` environment
//! variables or a `.env` file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bantay_client::models::{Category, Post};
use bantay_client::{AppConfig, SupabaseClient, init_logging};
use mirror::data_model::Placement;
use mirror::{OrderBy, ProjectionSpec, ProjectionSync};

fn log_counts(sync: &ProjectionSync<Post, SupabaseClient>) {
    let counts = sync.handle().counts();
    log::info!(
        "posts: {} news, {} alerts, {} hotlines",
        counts.get(&Category::News),
        counts.get(&Category::Alert),
        counts.get(&Category::Hotline),
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_logging();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(path.as_deref()).context("loading configuration")?;
    let client = SupabaseClient::new(config.supabase.clone(), config.realtime.clone());

    let spec = ProjectionSpec::<Post>::new()
        .order(OrderBy::desc("created_at"))
        .placement(Placement::NewestFirst)
        .seed(Category::ALL);
    let mut posts = ProjectionSync::mount(client, spec)
        .await
        .context("subscribing to posts")?;
    log_counts(&posts);

    loop {
        tokio::select! {
            applied = posts.next_change() => match applied {
                Some(applied) => {
                    log::debug!("{applied:?}");
                    log_counts(&posts);
                }
                None => {
                    log::warn!("Change feed closed, resyncing");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    posts.resync().await.context("resubscribing to posts")?;
                    log_counts(&posts);
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    match posts.verify_counts().await {
        Ok(None) => log::info!("Counts match the backend"),
        Ok(Some(drift)) => log::warn!("Counts drifted: {drift:?}"),
        Err(e) => log::warn!("Could not verify counts: {e}"),
    }
    posts.teardown();
    Ok(())
}
