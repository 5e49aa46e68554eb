use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{total_pages, NormalizedVideo, PageWindow, UpsertOutcome, Video, VideoFilter, VideoPage, VideoStore};

// Timestamps are stored as microseconds since the epoch so that ordering and
// cutoff comparisons are plain integer comparisons.
pub(crate) const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS videos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        published_at INTEGER NOT NULL,
        thumbnail_url TEXT NOT NULL DEFAULT '',
        channel_title TEXT NOT NULL DEFAULT '',
        revision INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (created_at <= updated_at)
    )"#,
    "CREATE INDEX IF NOT EXISTS videos_published_at_idx ON videos (published_at DESC)",
    "CREATE INDEX IF NOT EXISTS videos_channel_published_at_idx ON videos (channel_title, published_at DESC)",
];

const VIDEO_COLUMNS: &str =
    "id, external_id, title, description, published_at, thumbnail_url, channel_title, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    id: i64,
    external_id: String,
    title: String,
    description: String,
    published_at: i64,
    thumbnail_url: String,
    channel_title: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<VideoRow> for Video {
    type Error = sqlx::Error;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        Ok(Video {
            id: row.id,
            external_id: row.external_id,
            title: row.title,
            description: row.description,
            published_at: from_micros("published_at", row.published_at)?,
            thumbnail_url: row.thumbnail_url,
            channel_title: row.channel_title,
            created_at: from_micros("created_at", row.created_at)?,
            updated_at: from_micros("updated_at", row.updated_at)?,
        })
    }
}

fn from_micros(column: &str, micros: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| sqlx::Error::Decode(format!("{} out of range: {}", column, micros).into()))
}

#[derive(Clone, Debug)]
pub struct SqliteVideoStore {
    pool: SqlitePool,
    max_page_size: u32,
}

impl SqliteVideoStore {
    pub fn new(pool: SqlitePool, max_page_size: u32) -> Self {
        Self { pool, max_page_size }
    }

    #[tracing::instrument(name = "Ensure SQLite schema", skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &VideoFilter) {
    builder.push(" WHERE 1 = 1");
    // LIKE is case-insensitive for ASCII in SQLite.
    if let Some(pattern) = filter.title_pattern() {
        builder.push(" AND title LIKE ").push_bind(pattern).push(" ESCAPE '\\'");
    }
    if let Some(pattern) = filter.channel_pattern() {
        builder.push(" AND channel_title LIKE ").push_bind(pattern).push(" ESCAPE '\\'");
    }
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    #[tracing::instrument(name = "Upsert video", skip(self, video), fields(external_id = %video.external_id))]
    async fn upsert(&self, video: &NormalizedVideo) -> Result<UpsertOutcome, sqlx::Error> {
        let revision = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO videos
                   (external_id, title, description, published_at, thumbnail_url, channel_title, revision, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
               ON CONFLICT (external_id) DO UPDATE SET
                   title = excluded.title,
                   description = excluded.description,
                   published_at = excluded.published_at,
                   thumbnail_url = excluded.thumbnail_url,
                   channel_title = excluded.channel_title,
                   revision = videos.revision + 1,
                   updated_at = MAX(excluded.updated_at, videos.created_at)
               RETURNING revision"#,
        )
        .bind(&video.external_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.published_at.timestamp_micros())
        .bind(&video.thumbnail_url)
        .bind(&video.channel_title)
        .bind(Utc::now().timestamp_micros())
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome { created: revision == 1 })
    }

    #[tracing::instrument(name = "Query videos", skip(self))]
    async fn query(&self, filter: &VideoFilter, page: u32, page_size: u32) -> Result<VideoPage, sqlx::Error> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM videos");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let (page_size, window) = PageWindow::resolve(page, page_size, self.max_page_size);
        let items = match window {
            Some(window) if window.offset < total => {
                let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM videos", VIDEO_COLUMNS));
                push_filters(&mut select, filter);
                select
                    .push(" ORDER BY published_at DESC, id ASC LIMIT ")
                    .push_bind(i64::from(window.page_size))
                    .push(" OFFSET ")
                    .push_bind(window.offset);
                select
                    .build_query_as::<VideoRow>()
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(Video::try_from)
                    .collect::<Result<Vec<_>, _>>()?
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
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {} FROM videos WHERE external_id = ?1",
            VIDEO_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Video::try_from).transpose()
    }

    #[tracing::instrument(name = "Delete video", skip(self))]
    async fn delete(&self, external_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM videos WHERE external_id = ?1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Delete videos older than cutoff", skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM videos WHERE published_at < ?1")
            .bind(cutoff.timestamp_micros())
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
