use std::collections::BTreeMap;

use mirror::data_model::{Applied, ChangeEvent, PartitionCounts, Placement, Record};
use mirror::{Filter, OrderBy, ProjectionHandle, ProjectionSpec, ProjectionSync};

use super::{
    Backend, discard_image, encode, keep_upload_if_written, resolve_image, upload, uploaded,
};
use crate::AppError;
use crate::auth;
use crate::config::AppConfig;
use crate::images::ImageFile;
use crate::models::{Category, ImageChange, Post, PostDraft, PostPatch, UserCounts};
use crate::pagination::{Page, Paginator};
use crate::search;

#[derive(Clone, Debug, Default)]
struct Tab {
    query: String,
    paginator: Paginator,
}

/// The admin dashboard: every post, grouped into news, alert and hotline tabs.
pub struct Dashboard<B> {
    posts: ProjectionSync<Post, B>,
    news_bucket: String,
    user_counts: UserCounts,
    active_tab: Category,
    tabs: BTreeMap<Category, Tab>,
}

impl<B: Backend> Dashboard<B> {
    pub async fn mount(backend: B, config: &AppConfig) -> Result<Self, AppError> {
        log::info!("Initializing dashboard data...");
        let spec = ProjectionSpec::<Post>::new()
            .order(OrderBy::asc("created_at"))
            .placement(Placement::Append)
            .seed(Category::ALL);
        let posts = ProjectionSync::mount(backend, spec).await?;

        let tab = Tab {
            query: String::new(),
            paginator: Paginator::new(config.page_size),
        };
        let mut dashboard = Self {
            posts,
            news_bucket: config.storage.news_bucket.clone(),
            user_counts: UserCounts::default(),
            active_tab: Category::News,
            tabs: Category::ALL.into_iter().map(|c| (c, tab.clone())).collect(),
        };
        dashboard.refresh_user_counts().await;
        Ok(dashboard)
    }

    pub fn handle(&self) -> ProjectionHandle<Post> {
        self.posts.handle()
    }

    pub fn counts(&self) -> PartitionCounts<Category> {
        self.posts.handle().counts()
    }

    pub fn user_counts(&self) -> UserCounts {
        self.user_counts
    }

    /// Failures are logged and keep the previous counts.
    pub async fn refresh_user_counts(&mut self) {
        match auth::user_counts(self.posts.backend()).await {
            Ok(counts) => self.user_counts = counts,
            Err(e) => log::error!("Error fetching user counts: {e}"),
        }
    }

    pub fn active_tab(&self) -> Category {
        self.active_tab
    }

    pub fn set_active_tab(&mut self, category: Category) {
        self.active_tab = category;
    }

    pub fn search(&self, category: Category) -> &str {
        self.tabs.get(&category).map_or("", |tab| tab.query.as_str())
    }

    pub fn set_search(&mut self, category: Category, query: impl Into<String>) {
        let tab = self.tabs.entry(category).or_default();
        tab.query = query.into();
        tab.paginator.reset();
    }

    /// The posts of one tab that match its search, in display order.
    pub fn posts(&self, category: Category) -> Vec<Post> {
        let query = self.search(category);
        self.posts
            .handle()
            .rows()
            .iter()
            .filter(|post| post.category == category && search::matches(*post, query))
            .cloned()
            .collect()
    }

    pub fn page(&self, category: Category) -> Page<Post> {
        let posts = self.posts(category);
        self.tabs
            .get(&category)
            .map(|tab| tab.paginator)
            .unwrap_or_default()
            .page(&posts)
    }

    pub fn next_page(&mut self, category: Category) {
        let len = self.posts(category).len();
        self.tabs.entry(category).or_default().paginator.next(len);
    }

    pub fn previous_page(&mut self, category: Category) {
        let len = self.posts(category).len();
        self.tabs.entry(category).or_default().paginator.previous(len);
    }

    /// Creates a post. An image is only uploaded for news posts. The new row shows up once the
    /// change feed delivers it.
    pub async fn create_post(
        &self,
        draft: PostDraft,
        image: Option<ImageFile>,
    ) -> Result<(), AppError> {
        log::info!("Creating new {} post", draft.category);
        self.try_create_post(draft, image)
            .await
            .inspect_err(|e| log::error!("Error creating post: {e}"))
    }

    async fn try_create_post(
        &self,
        mut draft: PostDraft,
        image: Option<ImageFile>,
    ) -> Result<(), AppError> {
        draft.validate()?;
        let backend = self.posts.backend();
        match image {
            Some(image) if draft.category.has_image() => {
                draft.image = Some(upload(backend, &self.news_bucket, &image).await?);
            }
            Some(_) => log::warn!("Ignoring image for a {} post", draft.category),
            None => {}
        }
        let written = async {
            let row = encode(Post::TABLE, &draft)?;
            backend.insert(Post::TABLE, vec![row]).await?;
            Ok::<(), AppError>(())
        }
        .await;
        keep_upload_if_written(backend, &self.news_bucket, draft.image.as_deref(), written).await
    }

    /// Updates title and content, and for news posts the image. A replaced or removed image is
    /// deleted from storage after the row is updated.
    pub async fn edit_post(
        &self,
        id: i64,
        patch: PostPatch,
        image: ImageChange,
    ) -> Result<(), AppError> {
        log::info!("Updating post {id}");
        self.try_edit_post(id, patch, image)
            .await
            .inspect_err(|e| log::error!("Error updating post: {e}"))
    }

    async fn try_edit_post(
        &self,
        id: i64,
        patch: PostPatch,
        image: ImageChange,
    ) -> Result<(), AppError> {
        patch.validate()?;
        let handle = self.posts.handle();
        let post = handle
            .get(&id)
            .ok_or_else(|| AppError::NotFound("That post no longer exists.".to_string()))?;
        let backend = self.posts.backend();

        let new_image = if post.category.has_image() {
            resolve_image(backend, &self.news_bucket, post.image.as_deref(), &image).await?
        } else {
            post.image.clone()
        };
        let written = backend
            .update(
                Post::TABLE,
                &Filter::eq("id", id),
                patch.to_json(post.category, new_image.as_deref()),
            )
            .await
            .map_err(AppError::from);
        let fresh = if post.category.has_image() {
            uploaded(&image, new_image.as_deref())
        } else {
            None
        };
        keep_upload_if_written(backend, &self.news_bucket, fresh, written).await?;

        if let Some(old) = post.image.as_deref().filter(|old| new_image.as_deref() != Some(*old)) {
            discard_image(backend, &self.news_bucket, old).await;
        }

        let updated = patch.applied_to(&post, new_image.as_deref());
        handle.apply(
            &ChangeEvent::Update {
                record: updated,
                prior: Some(post),
            },
            None,
        );
        Ok(())
    }

    /// Deletes a post and its image.
    pub async fn delete_post(&self, id: i64) -> Result<(), AppError> {
        log::info!("Deleting post: {id}");
        self.try_delete_post(id)
            .await
            .inspect_err(|e| log::error!("Error deleting post: {e}"))
    }

    async fn try_delete_post(&self, id: i64) -> Result<(), AppError> {
        let handle = self.posts.handle();
        let post = handle
            .get(&id)
            .ok_or_else(|| AppError::NotFound("That post no longer exists.".to_string()))?;
        let backend = self.posts.backend();
        backend
            .delete(Post::TABLE, &Filter::eq("id", id))
            .await?;
        if let Some(image) = post.image.as_deref() {
            discard_image(backend, &self.news_bucket, image).await;
        }
        handle.apply(
            &ChangeEvent::Delete {
                id,
                prior: Some(post),
            },
            None,
        );
        log::info!("Post deleted successfully: {id}");
        Ok(())
    }

    pub async fn next_change(&mut self) -> Option<Applied<Category>> {
        self.posts.next_change().await
    }

    pub fn teardown(&mut self) {
        self.posts.teardown();
    }
}

#[cfg(test)]
mod tests {
    use mirror::BlobStorage;
    use mirror::memory::MemoryBackend;
    use serde_json::json;

    use super::*;

    fn post(id: i64, category: &str, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "content": format!("{title} details"),
            "category": category,
            "created_at": format!("2024-11-{:02}T08:00:00Z", id.clamp(1, 28)),
        })
    }

    async fn mounted(backend: &MemoryBackend) -> Dashboard<MemoryBackend> {
        Dashboard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mount_counts_posts_and_users() {
        let backend = MemoryBackend::default();
        backend.seed(
            "posts",
            vec![
                post(1, "news", "Road works"),
                post(2, "alert", "Flooding"),
                post(3, "alert", "Fire"),
            ],
        );
        backend.seed(
            "users",
            vec![
                json!({"id": 1, "username": "a", "firstname": "A", "lastname": "A", "email": "a@x.ph", "role": "admin"}),
                json!({"id": 2, "username": "b", "firstname": "B", "lastname": "B", "email": "b@x.ph", "role": "user"}),
            ],
        );

        let dashboard = mounted(&backend).await;
        let counts = dashboard.counts();
        assert_eq!(counts.get(&Category::News), 1);
        assert_eq!(counts.get(&Category::Alert), 2);
        assert_eq!(counts.get(&Category::Hotline), 0);
        assert_eq!(dashboard.user_counts(), UserCounts { total: 2, admin: 1 });
        assert_eq!(dashboard.active_tab(), Category::News);
    }

    #[tokio::test]
    async fn test_rows_that_dont_decode_leave_the_rest_visible() {
        let backend = MemoryBackend::default();
        let mut legacy = post(3, "alerts", "Old alert");
        legacy["content"] = json!(null);
        let mut blank = post(4, "hotline", "No content");
        blank["content"] = json!(null);
        backend.seed(
            "posts",
            vec![
                post(1, "news", "Road works"),
                post(2, "alert", "Flooding"),
                legacy,
                blank,
            ],
        );

        let dashboard = mounted(&backend).await;
        let counts = dashboard.counts();
        assert_eq!(counts.get(&Category::News), 1);
        assert_eq!(counts.get(&Category::Alert), 1);
        assert_eq!(counts.get(&Category::Hotline), 0);
        assert_eq!(dashboard.handle().len(), 2);
    }

    #[tokio::test]
    async fn test_created_news_post_arrives_through_the_feed() {
        let backend = MemoryBackend::default();
        backend.seed("posts", vec![post(1, "news", "Road works")]);
        let mut dashboard = mounted(&backend).await;

        let draft = PostDraft::new(Category::News, "Clean-up drive", "Saturday at 7am");
        let image = ImageFile::new(vec![0xff, 0xd8], "JPG");
        dashboard.create_post(draft, Some(image)).await.unwrap();

        let applied = dashboard.next_change().await.unwrap();
        assert_eq!(
            applied,
            Applied::Inserted {
                partition: Category::News
            }
        );
        assert_eq!(dashboard.counts().get(&Category::News), 2);

        // Appended after the existing post.
        let posts = dashboard.posts(Category::News);
        assert_eq!(posts[1].title, "Clean-up drive");
        let url = posts[1].image.clone().unwrap();
        let key = backend.key_from_public_url("news", &url).unwrap();
        assert!(key.ends_with(".jpg"));
        assert_eq!(backend.object("news", &key).unwrap().content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_images_are_ignored_for_alerts() {
        let backend = MemoryBackend::default();
        let mut dashboard = mounted(&backend).await;

        let draft = PostDraft::new(Category::Alert, "Typhoon", "Signal no. 2");
        dashboard
            .create_post(draft, Some(ImageFile::new(vec![1], "png")))
            .await
            .unwrap();
        dashboard.next_change().await.unwrap();

        let alert = &dashboard.posts(Category::Alert)[0];
        assert_eq!(alert.image, None);
        assert!(backend.rows("posts")[0].get("image").is_none());
    }

    #[tokio::test]
    async fn test_invalid_draft_writes_nothing() {
        let backend = MemoryBackend::default();
        let dashboard = mounted(&backend).await;

        let result = dashboard
            .create_post(PostDraft::new(Category::Hotline, " ", "911"), None)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(backend.rows("posts").is_empty());
    }

    #[tokio::test]
    async fn test_edit_replaces_image_and_applies_locally() {
        let backend = MemoryBackend::default();
        let old_url = backend
            .upload("news", "old.png", vec![1], "image/png")
            .await
            .unwrap();
        let mut row = post(1, "news", "Road works");
        row["image"] = json!(old_url);
        backend.seed("posts", vec![row]);
        let mut dashboard = mounted(&backend).await;

        let patch = PostPatch {
            title: "Road works extended".to_string(),
            content: "Until Friday".to_string(),
        };
        let replacement = ImageFile::new(vec![2], "png");
        dashboard
            .edit_post(1, patch, ImageChange::Replace(replacement))
            .await
            .unwrap();

        let edited = dashboard.handle().get(&1).unwrap();
        assert_eq!(edited.title, "Road works extended");
        assert_ne!(edited.image.as_deref(), Some(old_url.as_str()));
        assert!(backend.object("news", "old.png").is_none());

        // The feed echo of the same update changes nothing.
        dashboard.next_change().await.unwrap();
        assert_eq!(dashboard.handle().get(&1).unwrap(), edited);
        assert_eq!(dashboard.counts().get(&Category::News), 1);
    }

    #[tokio::test]
    async fn test_rejected_insert_removes_the_uploaded_image() {
        let backend = MemoryBackend::default();
        let dashboard = mounted(&backend).await;

        backend.fail_next_mutation("permission denied");
        let draft = PostDraft::new(Category::News, "Clean-up drive", "Saturday at 7am");
        let result = dashboard
            .create_post(draft, Some(ImageFile::new(vec![1], "png")))
            .await;
        assert!(matches!(result, Err(AppError::Mutation(_))));
        assert!(backend.rows("posts").is_empty());
        assert!(backend.object_keys("news").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_edit_keeps_the_old_image_and_drops_the_new_one() {
        let backend = MemoryBackend::default();
        let old_url = backend
            .upload("news", "old.png", vec![1], "image/png")
            .await
            .unwrap();
        let mut row = post(1, "news", "Road works");
        row["image"] = json!(old_url);
        backend.seed("posts", vec![row]);
        let dashboard = mounted(&backend).await;

        backend.fail_next_mutation("permission denied");
        let patch = PostPatch {
            title: "Road works extended".to_string(),
            content: "Until Friday".to_string(),
        };
        let result = dashboard
            .edit_post(1, patch, ImageChange::Replace(ImageFile::new(vec![2], "png")))
            .await;
        assert!(matches!(result, Err(AppError::Mutation(_))));
        assert_eq!(backend.object_keys("news"), vec!["old.png".to_string()]);
        let unchanged = dashboard.handle().get(&1).unwrap();
        assert_eq!(unchanged.title, "Road works");
        assert_eq!(unchanged.image.as_deref(), Some(old_url.as_str()));
    }

    #[tokio::test]
    async fn test_edit_of_missing_post_is_not_found() {
        let backend = MemoryBackend::default();
        let dashboard = mounted(&backend).await;
        let patch = PostPatch {
            title: "t".to_string(),
            content: "c".to_string(),
        };
        let result = dashboard.edit_post(9, patch, ImageChange::Keep).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_image() {
        let backend = MemoryBackend::default();
        let url = backend
            .upload("news", "photo.png", vec![1], "image/png")
            .await
            .unwrap();
        let mut row = post(1, "news", "Road works");
        row["image"] = json!(url);
        backend.seed("posts", vec![row, post(2, "alert", "Flooding")]);
        let mut dashboard = mounted(&backend).await;

        dashboard.delete_post(1).await.unwrap();
        assert_eq!(dashboard.counts().get(&Category::News), 0);
        assert!(backend.object("news", "photo.png").is_none());

        dashboard.next_change().await.unwrap();
        assert_eq!(dashboard.counts().get(&Category::News), 0);
        assert_eq!(dashboard.counts().get(&Category::Alert), 1);
    }

    #[tokio::test]
    async fn test_image_removal_failure_does_not_fail_delete() {
        let backend = MemoryBackend::default();
        let url = backend
            .upload("news", "photo.png", vec![1], "image/png")
            .await
            .unwrap();
        let mut row = post(1, "news", "Road works");
        row["image"] = json!(url);
        backend.seed("posts", vec![row]);
        let dashboard = mounted(&backend).await;

        backend.fail_next_remove("bucket offline");
        dashboard.delete_post(1).await.unwrap();
        assert!(backend.rows("posts").is_empty());
    }

    #[tokio::test]
    async fn test_search_and_paging_per_tab() {
        let backend = MemoryBackend::default();
        let mut rows: Vec<_> = (1..=7)
            .map(|id| post(id, "hotline", &format!("Barangay {id}")))
            .collect();
        rows.push(post(8, "news", "Barangay assembly"));
        backend.seed("posts", rows);
        let mut dashboard = mounted(&backend).await;

        let page = dashboard.page(Category::Hotline);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total_pages, 2);

        dashboard.next_page(Category::Hotline);
        let page = dashboard.page(Category::Hotline);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.items.len(), 2);

        dashboard.set_search(Category::Hotline, "BARANGAY 7");
        let page = dashboard.page(Category::Hotline);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 7);

        // Other tabs keep their own state.
        assert_eq!(dashboard.search(Category::News), "");
        assert_eq!(dashboard.posts(Category::News).len(), 1);
    }
}
