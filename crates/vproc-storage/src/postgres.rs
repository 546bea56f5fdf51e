//! Postgres storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use vproc_models::{
    caption_id, frame_id, scene_id, segment_id, Frame, FrameAnalysis, Scene, TranscriptSegment,
    VideoId, VideoStatus,
};

use crate::backend::StorageBackend;
use crate::error::StorageResult;

/// Render an embedding as a pgvector text literal (`[v1,v2,...]`).
pub fn vector_literal(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

/// Stores artifacts in the `videos`, `scenes`, `frames`, `transcript_segments`
/// and `frame_captions` tables.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn scene_ids(&self, video_id: &VideoId) -> StorageResult<HashMap<i32, String>> {
        let rows = sqlx::query("SELECT idx, id FROM scenes WHERE video_id = $1")
            .bind(video_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut ids = HashMap::with_capacity(rows.len());
        for row in rows {
            ids.insert(row.try_get::<i32, _>("idx")?, row.try_get::<String, _>("id")?);
        }
        Ok(ids)
    }

    async fn count_by_status(&self, table: &str) -> StorageResult<serde_json::Value> {
        let rows = sqlx::query(&format!(
            "SELECT status, COUNT(*) AS count FROM {} GROUP BY status",
            table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = serde_json::Map::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, json!(count));
        }
        Ok(serde_json::Value::Object(counts))
    }

    async fn count_rows(&self, table: &str) -> StorageResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl StorageBackend for PostgresStorage {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get_source_path(&self, video_id: &VideoId) -> StorageResult<Option<String>> {
        let path: Option<String> =
            sqlx::query_scalar("SELECT original_path FROM videos WHERE id = $1")
                .bind(video_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(path)
    }

    async fn record_normalized(
        &self,
        video_id: &VideoId,
        normalized_path: &str,
        duration_sec: f64,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE videos SET normalized_path = $1, duration_sec = $2, status = $3 WHERE id = $4",
        )
        .bind(normalized_path)
        .bind(duration_sec)
        .bind(VideoStatus::Normalized.as_str())
        .bind(video_id.as_str())
        .execute(&self.pool)
        .await?;

        debug!(video_id = %video_id, "Recorded normalized path");
        Ok(())
    }

    /// Upsert the scene list. Scenes past the new count are deleted together
    /// with their frames and captions.
    async fn record_scenes(&self, video_id: &VideoId, scenes: &[Scene]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        let scene_count = scenes.len() as i32;

        sqlx::query(
            r#"
            DELETE FROM frame_captions WHERE frame_id IN (
                SELECT f.id FROM frames f JOIN scenes s ON f.scene_id = s.id
                WHERE s.video_id = $1 AND s.idx >= $2
            )
            "#,
        )
        .bind(video_id.as_str())
        .bind(scene_count)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM frames WHERE scene_id IN (SELECT id FROM scenes WHERE video_id = $1 AND idx >= $2)",
        )
        .bind(video_id.as_str())
        .bind(scene_count)
        .execute(&mut *tx)
        .await?;
        let pruned = sqlx::query("DELETE FROM scenes WHERE video_id = $1 AND idx >= $2")
            .bind(video_id.as_str())
            .bind(scene_count)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for scene in scenes {
            sqlx::query(
                r#"
                INSERT INTO scenes (id, video_id, idx, t_start, t_end)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (video_id, idx)
                DO UPDATE SET t_start = EXCLUDED.t_start, t_end = EXCLUDED.t_end
                "#,
            )
            .bind(scene_id(video_id, scene.idx as usize))
            .bind(video_id.as_str())
            .bind(scene.idx as i32)
            .bind(scene.t_start)
            .bind(scene.t_end)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(video_id = %video_id, pruned, "Recorded {} scenes", scenes.len());
        Ok(())
    }

    /// Upsert the frame list. Frames of this video missing from the new list
    /// are deleted with their captions.
    async fn record_frames(&self, video_id: &VideoId, frames: &[Frame]) -> StorageResult<()> {
        let scene_ids = self.scene_ids(video_id).await?;

        let mut rows = Vec::with_capacity(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            match scene_ids.get(&(frame.scene_idx as i32)) {
                Some(scene_row_id) => rows.push((frame_id(video_id, i), scene_row_id, frame)),
                None => warn!(
                    video_id = %video_id,
                    scene_idx = frame.scene_idx,
                    "Skipping frame for unknown scene"
                ),
            }
        }
        let keep: Vec<String> = rows.iter().map(|(id, _, _)| id.clone()).collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM frame_captions WHERE frame_id IN (
                SELECT f.id FROM frames f JOIN scenes s ON f.scene_id = s.id
                WHERE s.video_id = $1 AND NOT (f.id = ANY($2))
            )
            "#,
        )
        .bind(video_id.as_str())
        .bind(&keep)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM frames f USING scenes s
            WHERE f.scene_id = s.id AND s.video_id = $1 AND NOT (f.id = ANY($2))
            "#,
        )
        .bind(video_id.as_str())
        .bind(&keep)
        .execute(&mut *tx)
        .await?;

        for (id, scene_row_id, frame) in &rows {
            sqlx::query(
                r#"
                INSERT INTO frames (id, scene_id, t_frame, path, phash)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    scene_id = EXCLUDED.scene_id,
                    t_frame = EXCLUDED.t_frame,
                    path = EXCLUDED.path,
                    phash = EXCLUDED.phash
                "#,
            )
            .bind(id)
            .bind(*scene_row_id)
            .bind(frame.timestamp)
            .bind(&frame.path)
            .bind(&frame.phash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(video_id = %video_id, "Recorded {} frames", rows.len());
        Ok(())
    }

    /// Upsert the transcript by segment ordinal.
    ///
    /// Rows whose ID or time span is not in the new transcript are deleted
    /// first, so the `(video_id, t_start, t_end)` key cannot clash with a
    /// row that is about to be rewritten. Embeddings survive only where the
    /// text is unchanged.
    async fn record_transcript(
        &self,
        video_id: &VideoId,
        segments: &[TranscriptSegment],
    ) -> StorageResult<()> {
        let mut ids = Vec::with_capacity(segments.len());
        let mut starts = Vec::with_capacity(segments.len());
        let mut ends = Vec::with_capacity(segments.len());
        let mut rows = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let duplicate = starts
                .iter()
                .zip(&ends)
                .any(|(s, e)| *s == segment.t_start && *e == segment.t_end);
            if duplicate {
                warn!(
                    video_id = %video_id,
                    "Skipping segment {} with a repeated time span", i
                );
                continue;
            }
            ids.push(segment_id(video_id, i));
            starts.push(segment.t_start);
            ends.push(segment.t_end);
            rows.push(segment);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM transcript_segments t
            WHERE t.video_id = $1 AND NOT EXISTS (
                SELECT 1 FROM UNNEST($2::text[], $3::float8[], $4::float8[]) AS n(id, t_start, t_end)
                WHERE n.id = t.id AND n.t_start = t.t_start AND n.t_end = t.t_end
            )
            "#,
        )
        .bind(video_id.as_str())
        .bind(&ids)
        .bind(&starts)
        .bind(&ends)
        .execute(&mut *tx)
        .await?;

        for (id, segment) in ids.iter().zip(&rows) {
            sqlx::query(
                r#"
                INSERT INTO transcript_segments (id, video_id, t_start, t_end, text)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    t_start = EXCLUDED.t_start,
                    t_end = EXCLUDED.t_end,
                    text = EXCLUDED.text,
                    embedding = CASE
                        WHEN transcript_segments.text = EXCLUDED.text THEN transcript_segments.embedding
                        ELSE NULL
                    END
                "#,
            )
            .bind(id)
            .bind(video_id.as_str())
            .bind(segment.t_start)
            .bind(segment.t_end)
            .bind(&segment.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(video_id = %video_id, "Recorded {} transcript segments", rows.len());
        Ok(())
    }

    /// Upsert the caption for a frame. The stored embedding is dropped when
    /// the caption or its entities change.
    async fn record_frame_caption(
        &self,
        frame_id: &str,
        analysis: &FrameAnalysis,
    ) -> StorageResult<Option<String>> {
        let frame_exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM frames WHERE id = $1")
            .bind(frame_id)
            .fetch_optional(&self.pool)
            .await?;
        if frame_exists.is_none() {
            warn!(frame_id = %frame_id, "Skipping caption for unknown frame");
            return Ok(None);
        }

        let id = caption_id(frame_id);
        let entities = json!({
            "controls": analysis.controls,
            "text_on_screen": analysis.text_on_screen,
        });

        sqlx::query(
            r#"
            INSERT INTO frame_captions (id, frame_id, caption, entities)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                caption = EXCLUDED.caption,
                entities = EXCLUDED.entities,
                embedding = CASE
                    WHEN frame_captions.caption = EXCLUDED.caption
                        AND frame_captions.entities = EXCLUDED.entities
                    THEN frame_captions.embedding
                    ELSE NULL
                END
            "#,
        )
        .bind(&id)
        .bind(frame_id)
        .bind(&analysis.caption)
        .bind(entities)
        .execute(&self.pool)
        .await?;

        Ok(Some(id))
    }

    async fn attach_transcript_embedding(
        &self,
        segment_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()> {
        sqlx::query("UPDATE transcript_segments SET embedding = $1::vector WHERE id = $2")
            .bind(vector_literal(embedding))
            .bind(segment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn attach_caption_embedding(
        &self,
        caption_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()> {
        sqlx::query("UPDATE frame_captions SET embedding = $1::vector WHERE id = $2")
            .bind(vector_literal(embedding))
            .bind(caption_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_stats(&self) -> StorageResult<serde_json::Value> {
        Ok(json!({
            "backend": self.name(),
            "jobs": self.count_by_status("jobs").await?,
            "videos": self.count_by_status("videos").await?,
            "scenes": self.count_rows("scenes").await?,
            "frames": self.count_rows("frames").await?,
            "transcript_segments": self.count_rows("transcript_segments").await?,
            "frame_captions": self.count_rows("frame_captions").await?,
        }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
