//! Exogenous items and narratives.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_dec, get_enum, get_opt_dec, get_opt_enum, get_ts, to_millis, DbError, DbResult};
use crate::exogenous::{ExogenousItem, Narrative};

pub struct ExogenousRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ExogenousRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert by URL. An existing row keeps its classification; only the
    /// fetch time is refreshed. Returns true when the item is new.
    pub async fn upsert_item(&self, item: &ExogenousItem) -> DbResult<bool> {
        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM exogenous_items WHERE url = ?1")
            .bind(&item.url)
            .fetch_one(self.pool)
            .await?;

        sqlx::query(
            r#"INSERT INTO exogenous_items
                (source, title, url, summary, published_at, fetched_at, status)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(url) DO UPDATE SET
                 fetched_at = excluded.fetched_at"#,
        )
        .bind(&item.source)
        .bind(&item.title)
        .bind(&item.url)
        .bind(&item.summary)
        .bind(to_millis(item.published_at))
        .bind(to_millis(item.fetched_at))
        .bind(item.status.as_str())
        .execute(self.pool)
        .await?;

        Ok(existing == 0)
    }

    /// Pending items, newest first.
    pub async fn pending_items(&self, limit: i64) -> DbResult<Vec<ExogenousItem>> {
        let rows = sqlx::query(
            "SELECT * FROM exogenous_items WHERE status = 'PENDING'
             ORDER BY published_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Persist the outcome of a classification attempt.
    pub async fn save_classification(&self, item: &ExogenousItem) -> DbResult<()> {
        let id = item
            .id
            .ok_or_else(|| DbError::NotFound(format!("unsaved item {}", item.url)))?;
        sqlx::query(
            r#"UPDATE exogenous_items SET
                 status = ?1, direction = ?2, confidence = ?3, horizon = ?4,
                 theme = ?5, error = ?6
               WHERE id = ?7"#,
        )
        .bind(item.status.as_str())
        .bind(item.direction.map(|d| d.as_str()))
        .bind(item.confidence.map(|c| c.to_string()))
        .bind(item.horizon.map(|h| h.as_str()))
        .bind(&item.theme)
        .bind(&item.error)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Items published at or after `since`, oldest first.
    pub async fn items_since(&self, since: DateTime<Utc>) -> DbResult<Vec<ExogenousItem>> {
        let rows = sqlx::query(
            "SELECT * FROM exogenous_items WHERE published_at >= ?1 ORDER BY published_at ASC, id ASC",
        )
        .bind(to_millis(since))
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Newest first.
    pub async fn recent_items(&self, limit: i64) -> DbResult<Vec<ExogenousItem>> {
        let rows = sqlx::query(
            "SELECT * FROM exogenous_items ORDER BY published_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Store recomputed contributions.
    pub async fn save_contributions(&self, items: &[ExogenousItem]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            if let Some(id) = item.id {
                sqlx::query("UPDATE exogenous_items SET contribution = ?1 WHERE id = ?2")
                    .bind(item.contribution.to_string())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace every narrative with `narratives` and relink member items.
    /// Returns the narratives with their new ids.
    pub async fn replace_narratives(&self, narratives: &[Narrative]) -> DbResult<Vec<Narrative>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE exogenous_items SET narrative_id = NULL")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM narratives").execute(&mut *tx).await?;

        let mut saved = Vec::with_capacity(narratives.len());
        for n in narratives {
            let keywords = serde_json::to_string(&n.keywords)
                .map_err(|e| DbError::Decode(format!("keywords: {e}")))?;
            let result = sqlx::query(
                r#"INSERT INTO narratives
                    (key, label, keywords, direction, score, item_count,
                     first_seen, last_seen, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                   ON CONFLICT(key) DO UPDATE SET
                     label = excluded.label,
                     keywords = excluded.keywords,
                     direction = excluded.direction,
                     score = excluded.score,
                     item_count = excluded.item_count,
                     first_seen = excluded.first_seen,
                     last_seen = excluded.last_seen,
                     updated_at = excluded.updated_at"#,
            )
            .bind(&n.key)
            .bind(&n.label)
            .bind(keywords)
            .bind(n.direction.as_str())
            .bind(n.score.to_string())
            .bind(n.item_count)
            .bind(to_millis(n.first_seen))
            .bind(to_millis(n.last_seen))
            .bind(to_millis(n.updated_at))
            .execute(&mut *tx)
            .await?;
            let id = result.last_insert_rowid();

            for item_id in &n.item_ids {
                sqlx::query("UPDATE exogenous_items SET narrative_id = ?1 WHERE id = ?2")
                    .bind(id)
                    .bind(item_id)
                    .execute(&mut *tx)
                    .await?;
            }

            saved.push(Narrative {
                id: Some(id),
                ..n.clone()
            });
        }

        tx.commit().await?;
        Ok(saved)
    }

    /// All narratives, strongest (by absolute score) first.
    pub async fn narratives(&self) -> DbResult<Vec<Narrative>> {
        let rows = sqlx::query("SELECT * FROM narratives").fetch_all(self.pool).await?;

        let links: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT narrative_id, id FROM exogenous_items WHERE narrative_id IS NOT NULL ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        let mut members: HashMap<i64, Vec<i64>> = HashMap::new();
        for (narrative_id, item_id) in links {
            members.entry(narrative_id).or_default().push(item_id);
        }

        let mut out = rows
            .iter()
            .map(|row| narrative_from_row(row, &mut members))
            .collect::<DbResult<Vec<_>>>()?;
        out.sort_by(|a, b| b.score.abs().cmp(&a.score.abs()).then(a.key.cmp(&b.key)));
        Ok(out)
    }
}

fn item_from_row(row: &SqliteRow) -> DbResult<ExogenousItem> {
    Ok(ExogenousItem {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        summary: row.try_get("summary")?,
        published_at: get_ts(row, "published_at")?,
        fetched_at: get_ts(row, "fetched_at")?,
        status: get_enum(row, "status")?,
        direction: get_opt_enum(row, "direction")?,
        confidence: get_opt_dec(row, "confidence")?,
        horizon: get_opt_enum(row, "horizon")?,
        theme: row.try_get("theme")?,
        error: row.try_get("error")?,
        contribution: get_dec(row, "contribution")?,
        narrative_id: row.try_get("narrative_id")?,
    })
}

fn narrative_from_row(
    row: &SqliteRow,
    members: &mut HashMap<i64, Vec<i64>>,
) -> DbResult<Narrative> {
    let id: i64 = row.try_get("id")?;
    let keywords: String = row.try_get("keywords")?;
    Ok(Narrative {
        id: Some(id),
        key: row.try_get("key")?,
        label: row.try_get("label")?,
        keywords: serde_json::from_str(&keywords)
            .map_err(|e| DbError::Decode(format!("keywords: {e}")))?,
        direction: get_enum(row, "direction")?,
        score: get_dec(row, "score")?,
        item_count: row.try_get("item_count")?,
        first_seen: get_ts(row, "first_seen")?,
        last_seen: get_ts(row, "last_seen")?,
        updated_at: get_ts(row, "updated_at")?,
        item_ids: members.remove(&id).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::{ClassificationStatus, Direction, Horizon};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn item(url: &str, hours_ago: i64) -> ExogenousItem {
        ExogenousItem::new(
            "coindesk",
            "Bitcoin ETF inflows",
            url,
            "summary",
            Utc::now() - Duration::hours(hours_ago),
        )
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_url() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.exogenous();
        assert!(repo.upsert_item(&item("https://a/1", 1)).await.unwrap());
        assert!(!repo.upsert_item(&item("https://a/1", 1)).await.unwrap());
        assert!(repo.upsert_item(&item("https://a/2", 2)).await.unwrap());
        assert_eq!(repo.recent_items(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reupsert_keeps_classification() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.exogenous();
        repo.upsert_item(&item("https://a/1", 1)).await.unwrap();

        let mut pending = repo.pending_items(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        let it = &mut pending[0];
        it.status = ClassificationStatus::Classified;
        it.direction = Some(Direction::Bullish);
        it.confidence = Some(dec!(0.8));
        it.horizon = Some(Horizon::Short);
        it.theme = Some("etf".to_string());
        repo.save_classification(it).await.unwrap();

        repo.upsert_item(&item("https://a/1", 1)).await.unwrap();
        assert!(repo.pending_items(10).await.unwrap().is_empty());
        let stored = &repo.recent_items(1).await.unwrap()[0];
        assert_eq!(stored.direction, Some(Direction::Bullish));
        assert_eq!(stored.confidence, Some(dec!(0.8)));
    }

    #[tokio::test]
    async fn test_items_since_window() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.exogenous();
        repo.upsert_item(&item("https://a/old", 100)).await.unwrap();
        repo.upsert_item(&item("https://a/new", 2)).await.unwrap();
        let recent = repo.items_since(Utc::now() - Duration::hours(72)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].url, "https://a/new");
    }

    #[tokio::test]
    async fn test_replace_narratives_relinks_items() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.exogenous();
        repo.upsert_item(&item("https://a/1", 1)).await.unwrap();
        let stored = repo.recent_items(1).await.unwrap();
        let item_id = stored[0].id.unwrap();

        let now = Utc::now();
        let narrative = Narrative {
            id: None,
            key: "n-1".to_string(),
            label: "etf".to_string(),
            keywords: vec!["bitcoin".to_string(), "etf".to_string()],
            direction: Direction::Bullish,
            score: dec!(0.4),
            item_count: 1,
            first_seen: now,
            last_seen: now,
            updated_at: now,
            item_ids: vec![item_id],
        };

        let saved = repo.replace_narratives(&[narrative.clone()]).await.unwrap();
        assert!(saved[0].id.is_some());

        // Replacing again leaves exactly one narrative.
        repo.replace_narratives(&[narrative]).await.unwrap();
        let loaded = repo.narratives().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].keywords, vec!["bitcoin", "etf"]);
        assert_eq!(loaded[0].item_ids, vec![item_id]);

        let linked = repo.recent_items(1).await.unwrap();
        assert_eq!(linked[0].narrative_id, loaded[0].id);

        repo.replace_narratives(&[]).await.unwrap();
        assert!(repo.narratives().await.unwrap().is_empty());
        assert!(repo.recent_items(1).await.unwrap()[0].narrative_id.is_none());
    }

    #[tokio::test]
    async fn test_save_contributions() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.exogenous();
        repo.upsert_item(&item("https://a/1", 1)).await.unwrap();
        let mut items = repo.recent_items(1).await.unwrap();
        items[0].contribution = dec!(-0.123456);
        repo.save_contributions(&items).await.unwrap();
        assert_eq!(repo.recent_items(1).await.unwrap()[0].contribution, dec!(-0.123456));
    }
}
