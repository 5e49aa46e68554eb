use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{total_pages, NormalizedVideo, PageWindow, UpsertOutcome, Video, VideoFilter, VideoPage, VideoStore};

pub(crate) const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS videos (
        id BIGSERIAL PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        published_at TIMESTAMPTZ NOT NULL,
        thumbnail_url TEXT NOT NULL DEFAULT '',
        channel_title TEXT NOT NULL DEFAULT '',
        revision BIGINT NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CHECK (created_at <= updated_at)
    )"#,
    "CREATE INDEX IF NOT EXISTS videos_published_at_idx ON videos (published_at DESC)",
    "CREATE INDEX IF NOT EXISTS videos_channel_published_at_idx ON videos (channel_title, published_at DESC)",
];

const VIDEO_COLUMNS: &str =
    "id, external_id, title, description, published_at, thumbnail_url, channel_title, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgVideoStore {
    pool: PgPool,
    max_page_size: u32,
}

impl PgVideoStore {
    pub fn new(pool: PgPool, max_page_size: u32) -> Self {
        Self { pool, max_page_size }
    }

    #[tracing::instrument(name = "Ensure Postgres schema", skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &VideoFilter) {
    builder.push(" WHERE TRUE");
    if let Some(pattern) = filter.title_pattern() {
        builder.push(" AND title ILIKE ").push_bind(pattern).push(" ESCAPE '\\'");
    }
    if let Some(pattern) = filter.channel_pattern() {
        builder.push(" AND channel_title ILIKE ").push_bind(pattern).push(" ESCAPE '\\'");
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    #[tracing::instrument(name = "Upsert video", skip(self, video), fields(external_id = %video.external_id))]
    async fn upsert(&self, video: &NormalizedVideo) -> Result<UpsertOutcome, sqlx::Error> {
        let revision = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO videos
                   (external_id, title, description, published_at, thumbnail_url, channel_title, revision, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $7)
               ON CONFLICT (external_id) DO UPDATE SET
                   title = EXCLUDED.title,
                   description = EXCLUDED.description,
                   published_at = EXCLUDED.published_at,
                   thumbnail_url = EXCLUDED.thumbnail_url,
                   channel_title = EXCLUDED.channel_title,
                   revision = videos.revision + 1,
                   updated_at = GREATEST(EXCLUDED.updated_at, videos.created_at)
               RETURNING revision"#,
        )
        .bind(&video.external_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.published_at)
        .bind(&video.thumbnail_url)
        .bind(&video.channel_title)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome { created: revision == 1 })
    }

    #[tracing::instrument(name = "Query videos", skip(self))]
    async fn query(&self, filter: &VideoFilter, page: u32, page_size: u32) -> Result<VideoPage, sqlx::Error> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM videos");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let (page_size, window) = PageWindow::resolve(page, page_size, self.max_page_size);
        let items = match window {
            Some(window) if window.offset < total => {
                let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM videos", VIDEO_COLUMNS));
                push_filters(&mut select, filter);
                select
                    .push(" ORDER BY published_at DESC, id ASC LIMIT ")
                    .push_bind(i64::from(window.page_size))
                    .push(" OFFSET ")
                    .push_bind(window.offset);
                select.build_query_as::<Video>().fetch_all(&self.pool).await?
            }
            _ => Vec::new(),
        };

        Ok(VideoPage {
            items,
            page,
            page_size,
            total,
            total_pages: total_pages(total, page_size),
        })
    }

    async fn get(&self, external_id: &str) -> Result<Option<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>(&format!(
            "SELECT {} FROM videos WHERE external_id = $1",
            VIDEO_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    #[tracing::instrument(name = "Delete video", skip(self))]
    async fn delete(&self, external_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM videos WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Delete videos older than cutoff", skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM videos WHERE published_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }
}
