use mirror::data_model::{Applied, ChangeEvent, ChangeKind, LoadOutcome, PartitionCounts, Placement, Record};
use mirror::{EventKinds, Filter, OrderBy, ProjectionHandle, ProjectionSpec, ProjectionSync};

use super::{
    Backend, discard_image, keep_upload_if_written, resolve_image, upload, uploaded,
};
use crate::AppError;
use crate::config::AppConfig;
use crate::images::ImageFile;
use crate::models::{Happening, HappeningDraft, ImageChange, Region};
use crate::search;

fn newest_first() -> ProjectionSpec<Happening> {
    ProjectionSpec::<Happening>::new()
        .order(OrderBy::desc("created_at"))
        .seed(Region::ALL)
}

/// The admin view of happenings, one region tab at a time.
pub struct RegionBoard<B> {
    happenings: ProjectionSync<Happening, B>,
    bucket: String,
    region: Option<Region>,
}

impl<B: Backend> RegionBoard<B> {
    /// Mounts with no region selected, showing every happening.
    pub async fn mount(backend: B, config: &AppConfig) -> Result<Self, AppError> {
        let spec = newest_first().placement(Placement::NewestFirst);
        let happenings = ProjectionSync::mount(backend, spec).await?;
        Ok(Self {
            happenings,
            bucket: config.storage.happenings_bucket.clone(),
            region: None,
        })
    }

    pub fn handle(&self) -> ProjectionHandle<Happening> {
        self.happenings.handle()
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    /// Switches tabs. The rows are cleared and reloaded for the new region, and the change feed
    /// is reopened with the region as its filter.
    pub async fn select_region(&mut self, region: Option<Region>) -> Result<LoadOutcome, AppError> {
        log::info!(
            "Showing happenings for {}",
            region.map_or("every region", |r| r.name())
        );
        let filters = region
            .map(|r| Filter::eq(Happening::PARTITION_FIELD, r.name()))
            .into_iter()
            .collect();
        let outcome = self.happenings.set_filter(filters).await?;
        self.region = region;
        Ok(outcome)
    }

    pub fn happenings(&self) -> Vec<Happening> {
        self.happenings.handle().rows().into_iter().collect()
    }

    pub fn counts(&self) -> PartitionCounts<Region> {
        self.happenings.handle().counts()
    }

    /// Creates a happening in the selected region.
    pub async fn create_happening(
        &self,
        draft: HappeningDraft,
        image: Option<ImageFile>,
    ) -> Result<(), AppError> {
        self.try_create(draft, image)
            .await
            .inspect_err(|e| log::error!("Error creating happening: {e}"))
    }

    async fn try_create(
        &self,
        draft: HappeningDraft,
        image: Option<ImageFile>,
    ) -> Result<(), AppError> {
        let region = self
            .region
            .ok_or_else(|| AppError::validation("Select a region first."))?;
        draft.validate()?;
        let backend = self.happenings.backend();
        let image = match image {
            Some(image) => Some(upload(backend, &self.bucket, &image).await?),
            None => None,
        };
        let written = backend
            .insert(
                Happening::TABLE,
                vec![draft.to_json(region, image.as_deref())],
            )
            .await
            .map_err(AppError::from);
        keep_upload_if_written(backend, &self.bucket, image.as_deref(), written).await?;
        log::info!("Created happening in {region}");
        Ok(())
    }

    pub async fn edit_happening(
        &self,
        id: i64,
        draft: HappeningDraft,
        image: ImageChange,
    ) -> Result<(), AppError> {
        self.try_edit(id, draft, image)
            .await
            .inspect_err(|e| log::error!("Error updating happening: {e}"))
    }

    async fn try_edit(
        &self,
        id: i64,
        draft: HappeningDraft,
        image: ImageChange,
    ) -> Result<(), AppError> {
        draft.validate()?;
        let handle = self.happenings.handle();
        let happening = handle
            .get(&id)
            .ok_or_else(|| AppError::NotFound("That happening no longer exists.".to_string()))?;
        let backend = self.happenings.backend();

        let new_image =
            resolve_image(backend, &self.bucket, happening.image.as_deref(), &image).await?;
        let mut patch = draft.to_json(happening.region, new_image.as_deref());
        if new_image.is_none() {
            patch["image"] = serde_json::Value::Null;
        }
        let written = backend
            .update(Happening::TABLE, &Filter::eq("id", id), patch)
            .await
            .map_err(AppError::from);
        keep_upload_if_written(
            backend,
            &self.bucket,
            uploaded(&image, new_image.as_deref()),
            written,
        )
        .await?;

        if let Some(old) = happening
            .image
            .as_deref()
            .filter(|old| new_image.as_deref() != Some(*old))
        {
            discard_image(backend, &self.bucket, old).await;
        }

        let updated = Happening {
            title: draft.title,
            content: draft.content,
            image: new_image,
            ..happening.clone()
        };
        handle.apply(
            &ChangeEvent::Update {
                record: updated,
                prior: Some(happening),
            },
            None,
        );
        Ok(())
    }

    pub async fn delete_happening(&self, id: i64) -> Result<(), AppError> {
        self.try_delete(id)
            .await
            .inspect_err(|e| log::error!("Error deleting happening: {e}"))
    }

    async fn try_delete(&self, id: i64) -> Result<(), AppError> {
        let handle = self.happenings.handle();
        let happening = handle
            .get(&id)
            .ok_or_else(|| AppError::NotFound("That happening no longer exists.".to_string()))?;
        let backend = self.happenings.backend();
        backend
            .delete(Happening::TABLE, &Filter::eq("id", id))
            .await?;
        if let Some(image) = happening.image.as_deref() {
            discard_image(backend, &self.bucket, image).await;
        }
        handle.apply(
            &ChangeEvent::Delete {
                id,
                prior: Some(happening),
            },
            None,
        );
        Ok(())
    }

    pub async fn next_change(&mut self) -> Option<Applied<Region>> {
        self.happenings.next_change().await
    }

    pub fn teardown(&mut self) {
        self.happenings.teardown();
    }
}

/// The read-only feed residents see. New happenings go on top; edits and deletes made after
/// mount are picked up on the next reload.
pub struct HappeningFeed<B> {
    happenings: ProjectionSync<Happening, B>,
    region: Option<Region>,
    query: String,
}

impl<B: Backend> HappeningFeed<B> {
    pub async fn mount(backend: B) -> Result<Self, AppError> {
        let spec = newest_first()
            .kinds(EventKinds::Only(ChangeKind::Insert))
            .placement(Placement::Prepend);
        let happenings = ProjectionSync::mount(backend, spec).await?;
        Ok(Self {
            happenings,
            region: None,
            query: String::new(),
        })
    }

    pub fn handle(&self) -> ProjectionHandle<Happening> {
        self.happenings.handle()
    }

    pub fn set_region(&mut self, region: Option<Region>) {
        self.region = region;
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// Happenings in the chosen region that match the search.
    pub fn visible(&self) -> Vec<Happening> {
        let rows = self.happenings.handle().rows();
        let in_region = rows
            .iter()
            .filter(|h| self.region.is_none_or(|region| h.region == region));
        search::filter(in_region, &self.query)
    }

    pub async fn reload(&self) -> LoadOutcome {
        self.happenings.reload().await
    }

    pub async fn next_change(&mut self) -> Option<Applied<Region>> {
        self.happenings.next_change().await
    }

    pub fn teardown(&mut self) {
        self.happenings.teardown();
    }
}

#[cfg(test)]
mod tests {
    use mirror::{BlobStorage, MutationBackend};
    use mirror::memory::MemoryBackend;
    use serde_json::json;

    use super::*;

    fn happening(id: i64, region: &str, title: &str, day: u32) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "content": format!("{title} in {region}"),
            "region": region,
            "created_at": format!("2024-11-{day:02}T10:00:00Z"),
        })
    }

    fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::default();
        backend.seed(
            "happenings",
            vec![
                happening(1, "Tondo", "Fiesta", 1),
                happening(2, "Santa Ana", "Market day", 3),
                happening(3, "Tondo", "Blood drive", 2),
            ],
        );
        backend
    }

    #[tokio::test]
    async fn test_board_lists_newest_first_and_counts_regions() {
        let board = RegionBoard::mount(seeded(), &AppConfig::default())
            .await
            .unwrap();
        let ids: Vec<i64> = board.happenings().iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(board.counts().get(&Region::Tondo), 2);
        assert_eq!(board.counts().get(&Region::SantaAna), 1);
        assert_eq!(board.counts().get(&Region::Paco), 0);
    }

    #[tokio::test]
    async fn test_selecting_a_region_reloads_and_refilters_the_feed() {
        let backend = seeded();
        let mut board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();

        let outcome = board.select_region(Some(Region::Tondo)).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Applied(2));
        assert_eq!(board.region(), Some(Region::Tondo));
        assert!(board.happenings().iter().all(|h| h.region == Region::Tondo));
        assert_eq!(backend.subscriber_count("happenings"), 1);

        // Only Tondo inserts reach the board now.
        backend
            .insert("happenings", vec![happening(4, "Paco", "Concert", 5)])
            .await
            .unwrap();
        backend
            .insert("happenings", vec![happening(5, "Tondo", "Cleanup", 6)])
            .await
            .unwrap();
        board.next_change().await.unwrap();
        let ids: Vec<i64> = board.happenings().iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn test_failed_region_switch_stays_on_the_current_region() {
        let backend = seeded();
        let mut board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();
        board.select_region(Some(Region::Tondo)).await.unwrap();

        backend.fail_next_subscribe("down");
        let result = board.select_region(Some(Region::Paco)).await;
        assert!(matches!(result, Err(AppError::Subscription(_))));
        assert_eq!(board.region(), Some(Region::Tondo));
        let ids: Vec<i64> = board.happenings().iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![3, 1]);

        backend
            .insert("happenings", vec![happening(4, "Tondo", "Cleanup", 6)])
            .await
            .unwrap();
        assert_eq!(
            board.next_change().await,
            Some(Applied::Inserted {
                partition: Region::Tondo
            })
        );
    }

    #[tokio::test]
    async fn test_create_requires_a_region() {
        let backend = seeded();
        let board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();
        let result = board
            .create_happening(HappeningDraft::new("Parade", "Main road"), None)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(backend.rows("happenings").len(), 3);
    }

    #[tokio::test]
    async fn test_create_with_image_in_selected_region() {
        let backend = seeded();
        let mut board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();
        board.select_region(Some(Region::Paco)).await.unwrap();

        board
            .create_happening(
                HappeningDraft::new("Parade", "Main road"),
                Some(ImageFile::new(vec![7], "png")),
            )
            .await
            .unwrap();
        board.next_change().await.unwrap();

        let created = &board.happenings()[0];
        assert_eq!(created.region, Region::Paco);
        let key = backend
            .key_from_public_url("happenings", created.image.as_deref().unwrap())
            .unwrap();
        assert!(backend.object("happenings", &key).is_some());
    }

    #[tokio::test]
    async fn test_rejected_create_removes_the_uploaded_image() {
        let backend = seeded();
        let mut board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();
        board.select_region(Some(Region::Paco)).await.unwrap();

        backend.fail_next_mutation("permission denied");
        let result = board
            .create_happening(
                HappeningDraft::new("Parade", "Main road"),
                Some(ImageFile::new(vec![7], "png")),
            )
            .await;
        assert!(matches!(result, Err(AppError::Mutation(_))));
        assert!(backend.object_keys("happenings").is_empty());
        assert_eq!(backend.rows("happenings").len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_edit_removes_the_replacement_image() {
        let backend = MemoryBackend::default();
        let url = backend
            .upload("happenings", "banner.png", vec![1], "image/png")
            .await
            .unwrap();
        let mut row = happening(1, "Tondo", "Fiesta", 1);
        row["image"] = json!(url);
        backend.seed("happenings", vec![row]);
        let board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();

        backend.fail_next_mutation("permission denied");
        let result = board
            .edit_happening(
                1,
                HappeningDraft::new("Fiesta", "Moved"),
                ImageChange::Replace(ImageFile::new(vec![2], "jpg")),
            )
            .await;
        assert!(matches!(result, Err(AppError::Mutation(_))));
        assert_eq!(
            backend.object_keys("happenings"),
            vec!["banner.png".to_string()]
        );
        assert_eq!(board.handle().get(&1).unwrap().content, "Fiesta in Tondo");
    }

    #[tokio::test]
    async fn test_edit_removing_image_clears_the_column() {
        let backend = MemoryBackend::default();
        let url = backend
            .upload("happenings", "banner.png", vec![1], "image/png")
            .await
            .unwrap();
        let mut row = happening(1, "Tondo", "Fiesta", 1);
        row["image"] = json!(url);
        backend.seed("happenings", vec![row]);
        let board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();

        board
            .edit_happening(1, HappeningDraft::new("Fiesta", "Moved"), ImageChange::Remove)
            .await
            .unwrap();

        assert_eq!(backend.rows("happenings")[0]["image"], json!(null));
        assert!(backend.object("happenings", "banner.png").is_none());
        let edited = board.handle().get(&1).unwrap();
        assert_eq!(edited.content, "Moved");
        assert_eq!(edited.image, None);
    }

    #[tokio::test]
    async fn test_delete_updates_counts_immediately() {
        let backend = seeded();
        let board = RegionBoard::mount(backend.clone(), &AppConfig::default())
            .await
            .unwrap();
        board.delete_happening(3).await.unwrap();
        assert_eq!(board.counts().get(&Region::Tondo), 1);
        assert_eq!(backend.rows("happenings").len(), 2);
    }

    #[tokio::test]
    async fn test_feed_prepends_inserts_and_ignores_updates() {
        let backend = seeded();
        let mut feed = HappeningFeed::mount(backend.clone()).await.unwrap();

        backend
            .update("happenings", &Filter::eq("id", 1), json!({"title": "Renamed"}))
            .await
            .unwrap();
        backend
            .insert("happenings", vec![happening(4, "Paco", "Concert", 4)])
            .await
            .unwrap();

        // The update never reaches an insert-only feed, so the first change is the insert.
        assert_eq!(
            feed.next_change().await,
            Some(Applied::Inserted {
                partition: Region::Paco
            })
        );
        let visible = feed.visible();
        assert_eq!(visible[0].id, 4);
        assert_eq!(visible.iter().find(|h| h.id == 1).unwrap().title, "Fiesta");
    }

    #[tokio::test]
    async fn test_feed_filters_by_region_and_search_locally() {
        let mut feed = HappeningFeed::mount(seeded()).await.unwrap();

        feed.set_region(Some(Region::Tondo));
        assert_eq!(feed.visible().len(), 2);

        feed.set_search("blood");
        let visible = feed.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, 3);

        feed.set_region(None);
        feed.set_search("");
        assert_eq!(feed.visible().len(), 3);
    }
}
