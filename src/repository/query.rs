use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::domain::Video;
use crate::utils::normalizations::{normalize_for_matching, normalize_tag};
use super::videos_repo::DbVideo;
use super::RepositoryError;

const SORTABLE_FIELDS: &[&str] = &[
    "title", "artist", "album", "year", "director", "genre", "status", "created_at", "updated_at",
];

/// Fluent builder over the videos table. Text predicates are
/// case-insensitive substring matches; `search` switches the select onto
/// the FTS index. Soft-deleted rows are excluded unless asked for.
pub struct VideoQuery {
    pool: SqlitePool,
    likes: Vec<(&'static str, String)>,
    exacts: Vec<(&'static str, String)>,
    year: Option<i64>,
    year_range: Option<(i64, i64)>,
    tag: Option<String>,
    collection: Option<String>,
    fts: Option<String>,
    include_deleted: bool,
    order_by: Option<(&'static str, bool)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl VideoQuery {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            likes: Vec::new(),
            exacts: Vec::new(),
            year: None,
            year_range: None,
            tag: None,
            collection: None,
            fts: None,
            include_deleted: false,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn artist(mut self, artist: &str) -> Self {
        self.likes.push(("artist", artist.to_string()));
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.likes.push(("title", title.to_string()));
        self
    }

    pub fn album(mut self, album: &str) -> Self {
        self.likes.push(("album", album.to_string()));
        self
    }

    pub fn genre(mut self, genre: &str) -> Self {
        self.likes.push(("genre", genre.to_string()));
        self
    }

    pub fn director(mut self, director: &str) -> Self {
        self.likes.push(("director", director.to_string()));
        self
    }

    pub fn year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }

    /// Inclusive on both ends.
    pub fn year_range(mut self, start: i64, end: i64) -> Self {
        self.year_range = Some((start, end));
        self
    }

    pub fn imvdb_id(mut self, id: &str) -> Self {
        self.exacts.push(("imvdb_video_id", id.to_string()));
        self
    }

    pub fn youtube_id(mut self, id: &str) -> Self {
        self.exacts.push(("youtube_id", id.to_string()));
        self
    }

    pub fn vimeo_id(mut self, id: &str) -> Self {
        self.exacts.push(("vimeo_id", id.to_string()));
        self
    }

    pub fn file_path(mut self, path: &str) -> Self {
        self.exacts.push(("video_file_path", path.to_string()));
        self
    }

    pub fn status(mut self, status: crate::domain::VideoStatus) -> Self {
        self.exacts.push(("status", status.as_str().to_string()));
        self
    }

    pub fn download_source(mut self, source: &str) -> Self {
        self.exacts.push(("download_source", source.to_string()));
        self
    }

    pub fn tag(mut self, tag_name: &str) -> Self {
        self.tag = Some(normalize_tag(tag_name));
        self
    }

    pub fn collection(mut self, collection_name: &str) -> Self {
        self.collection = Some(normalize_for_matching(collection_name));
        self
    }

    /// Full-text search; syntax is whatever FTS5 accepts (AND/OR/NOT,
    /// quoted phrases, column filters).
    pub fn search(mut self, query: &str) -> Self {
        self.fts = Some(query.to_string());
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Orders by a whitelisted field; anything else is logged and ignored.
    pub fn order_by(mut self, field: &str, desc: bool) -> Self {
        match SORTABLE_FIELDS.iter().find(|f| **f == field) {
            Some(column) => self.order_by = Some((column, desc)),
            None => log::warn!("ignoring invalid order_by field: {field}"),
        }
        self
    }

    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn offset(mut self, count: i64) -> Self {
        self.offset = Some(count);
        self
    }

    pub async fn execute(self) -> Result<Vec<Video>, RepositoryError> {
        let mut qbuilder = self.build(false)?;

        let rows = qbuilder
            .build_query_as::<DbVideo>()
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|row| Video::try_from(row).map_err(RepositoryError::VideoDataMapping))
            .collect()
    }

    /// Count with limit/offset removed.
    pub async fn count(self) -> Result<i64, RepositoryError> {
        let mut qbuilder = self.build(true)?;

        qbuilder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    fn build(&self, count_only: bool) -> Result<QueryBuilder<'_, Sqlite>, RepositoryError> {
        if let Some(fts) = &self.fts {
            if fts.trim().is_empty() {
                return Err(RepositoryError::InvalidQuery("empty search query".to_string()));
            }
        }

        let select = if count_only { "SELECT COUNT(*)" } else { "SELECT v.*" };
        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(select);

        if self.fts.is_some() {
            qbuilder.push(" FROM videos v JOIN videos_fts ON videos_fts.rowid = v.id");
        } else {
            qbuilder.push(" FROM videos v");
        }

        qbuilder.push(" WHERE 1 = 1");

        if let Some(fts) = &self.fts {
            qbuilder.push(" AND videos_fts MATCH ").push_bind(fts);
        }

        for (column, value) in &self.likes {
            qbuilder
                .push(format!(" AND LOWER(v.{column}) LIKE LOWER("))
                .push_bind(format!("%{value}%"))
                .push(")");
        }

        for (column, value) in &self.exacts {
            qbuilder.push(format!(" AND v.{column} = ")).push_bind(value);
        }

        if let Some(year) = self.year {
            qbuilder.push(" AND v.year = ").push_bind(year);
        }

        if let Some((start, end)) = self.year_range {
            qbuilder
                .push(" AND v.year BETWEEN ")
                .push_bind(start)
                .push(" AND ")
                .push_bind(end);
        }

        if let Some(tag) = &self.tag {
            qbuilder
                .push(
                    " AND v.id IN (SELECT vt.video_id FROM video_tags vt \
                     JOIN tags t ON t.id = vt.tag_id WHERE t.normalized_name = ",
                )
                .push_bind(tag)
                .push(")");
        }

        if let Some(collection) = &self.collection {
            qbuilder
                .push(
                    " AND v.id IN (SELECT vc.video_id FROM video_collections vc \
                     JOIN collections c ON c.id = vc.collection_id WHERE c.normalized_name = ",
                )
                .push_bind(collection)
                .push(")");
        }

        if !self.include_deleted {
            qbuilder.push(" AND v.is_deleted = 0");
        }

        if !count_only {
            if let Some((column, desc)) = self.order_by {
                let direction = if desc { "DESC" } else { "ASC" };
                qbuilder.push(format!(" ORDER BY v.{column} {direction}"));
            }

            if let Some(limit) = self.limit {
                qbuilder.push(" LIMIT ").push_bind(limit);
            }
            if let Some(offset) = self.offset {
                qbuilder.push(" OFFSET ").push_bind(offset);
            }
        }

        Ok(qbuilder)
    }
}
