use mirror::data_model::{Applied, ChangeKind, LoadOutcome, Placement, Record};
use mirror::{EventKinds, Filter, OrderBy, ProjectionHandle, ProjectionSpec, ProjectionSync};

use super::Backend;
use crate::AppError;
use crate::config::AppConfig;
use crate::models::{Category, Post};
use crate::pagination::{Page, Paginator};

/// Alerts on the resident home screen, newest first, a page at a time.
pub struct AlertFeed<B> {
    alerts: ProjectionSync<Post, B>,
    paginator: Paginator,
}

impl<B: Backend> AlertFeed<B> {
    pub async fn mount(backend: B, config: &AppConfig) -> Result<Self, AppError> {
        let spec = ProjectionSpec::<Post>::new()
            .filter(Filter::eq(Post::PARTITION_FIELD, Category::Alert.as_str()))
            .order(OrderBy::desc("created_at"))
            .kinds(EventKinds::Only(ChangeKind::Insert))
            .placement(Placement::NewestFirst)
            .seed([Category::Alert]);
        let alerts = ProjectionSync::mount(backend, spec).await?;
        Ok(Self {
            alerts,
            paginator: Paginator::new(config.page_size),
        })
    }

    pub fn handle(&self) -> ProjectionHandle<Post> {
        self.alerts.handle()
    }

    pub fn alerts(&self) -> Vec<Post> {
        self.alerts.handle().rows().into_iter().collect()
    }

    pub fn page(&self) -> Page<Post> {
        self.paginator.page(&self.alerts())
    }

    pub fn next_page(&mut self) {
        let len = self.alerts.handle().len();
        self.paginator.next(len);
    }

    pub fn previous_page(&mut self) {
        let len = self.alerts.handle().len();
        self.paginator.previous(len);
    }

    pub async fn reload(&self) -> LoadOutcome {
        self.alerts.reload().await
    }

    pub async fn next_change(&mut self) -> Option<Applied<Category>> {
        self.alerts.next_change().await
    }

    pub fn teardown(&mut self) {
        self.alerts.teardown();
    }
}
