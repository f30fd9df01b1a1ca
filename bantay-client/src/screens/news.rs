use chrono::{DateTime, Duration, Utc};
use mirror::data_model::{Applied, LoadOutcome, Placement};
use mirror::{Filter, OrderBy, ProjectionHandle, ProjectionSpec, ProjectionSync};

use super::Backend;
use crate::AppError;
use crate::models::NewsArticle;

/// How far back the news list reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DateWindow {
    #[default]
    All,
    Last7Days,
    Last30Days,
    Last90Days,
}

impl DateWindow {
    pub const ALL: [DateWindow; 4] = [
        DateWindow::All,
        DateWindow::Last7Days,
        DateWindow::Last30Days,
        DateWindow::Last90Days,
    ];

    pub fn days(&self) -> Option<i64> {
        match self {
            DateWindow::All => None,
            DateWindow::Last7Days => Some(7),
            DateWindow::Last30Days => Some(30),
            DateWindow::Last90Days => Some(90),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DateWindow::All => "All",
            DateWindow::Last7Days => "Last 7 days",
            DateWindow::Last30Days => "Last 30 days",
            DateWindow::Last90Days => "Last 90 days",
        }
    }

    /// `created_at >= now - days`, or nothing for [`DateWindow::All`].
    pub fn filter(&self, now: DateTime<Utc>) -> Option<Filter> {
        let since = now - Duration::days(self.days()?);
        Some(Filter::gte("created_at", since.to_rfc3339()))
    }
}

pub struct NewsFeed<B> {
    news: ProjectionSync<NewsArticle, B>,
    window: DateWindow,
}

impl<B: Backend> NewsFeed<B> {
    pub async fn mount(
        backend: B,
        window: DateWindow,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let mut spec = ProjectionSpec::<NewsArticle>::new()
            .order(OrderBy::desc("created_at"))
            .placement(Placement::NewestFirst);
        if let Some(filter) = window.filter(now) {
            spec = spec.filter(filter);
        }
        let news = ProjectionSync::mount(backend, spec).await?;
        Ok(Self { news, window })
    }

    pub fn handle(&self) -> ProjectionHandle<NewsArticle> {
        self.news.handle()
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    pub async fn set_window(
        &mut self,
        window: DateWindow,
        now: DateTime<Utc>,
    ) -> Result<LoadOutcome, AppError> {
        log::info!("News window set to {}", window.label());
        let outcome = self
            .news
            .set_filter(window.filter(now).into_iter().collect())
            .await?;
        self.window = window;
        Ok(outcome)
    }

    pub fn articles(&self) -> Vec<NewsArticle> {
        self.news.handle().rows().into_iter().collect()
    }

    pub async fn next_change(&mut self) -> Option<Applied<()>> {
        self.news.next_change().await
    }

    pub fn teardown(&mut self) {
        self.news.teardown();
    }
}
