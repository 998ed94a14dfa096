//! Bulk DB Loader (C1).
//!
//! Group-inserts feature rows as a single parameterized statement batch and
//! invokes named stored procedures with one of three result shapes. No
//! retries at this layer: connection and execution faults are reported with
//! the statement name and row count so callers can decide whether to abort
//! the handler or surface the error upward.

use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::error::{AppError, Result};
use crate::models::rows::{
    NoteRow, PitchRow, RecordingAnalyzerParamsRow, RecordingBaseParamsRow, SpectralRow, StepLogRow,
    Volume10msRow, Volume1msRow, VolumeAggregateRow,
};
use crate::models::RecordingId;

/// Thin wrapper around a `PgPool`. Connections are acquired per statement
/// and returned immediately; nothing is held across an `.await` suspension
/// point beyond the single statement being executed.
#[derive(Clone)]
pub struct BulkLoader {
    pool: PgPool,
}

impl BulkLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bulk_insert<T, F>(
        &self,
        statement_name: &'static str,
        table: &str,
        columns: &[&str],
        rows: &[T],
        push_row: F,
    ) -> Result<u64>
    where
        F: Fn(&mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>, &T),
    {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {table} ({}) ", columns.join(", ")));

        qb.push_values(rows, |mut b, row| {
            push_row(&mut b, row);
        });

        qb.build()
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| {
                tracing::error!(statement = statement_name, rows = rows.len(), error = %e, "bulk insert failed");
                AppError::Database(e)
            })
    }

    pub async fn insert_spectral_rows(&self, rows: &[SpectralRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_SPECTRAL",
            "engine_load_fft",
            &[
                "recording_id",
                "frame_no",
                "start_ms",
                "end_ms",
                "bucket_no",
                "hz_lo",
                "hz_hi",
                "bucket_width_hz",
                "fft_value",
                "sample_rate",
            ],
            rows,
            |b, r| {
                b.push_bind(r.recording_id)
                    .push_bind(r.frame_no)
                    .push_bind(r.start_ms)
                    .push_bind(r.end_ms)
                    .push_bind(r.bucket_no)
                    .push_bind(r.hz_lo)
                    .push_bind(r.hz_hi)
                    .push_bind(r.bucket_width_hz)
                    .push_bind(r.magnitude)
                    .push_bind(r.sample_rate);
            },
        )
        .await
    }

    pub async fn insert_pitch_rows(&self, rows: &[PitchRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_PITCH",
            "engine_load_hz",
            &[
                "recording_id",
                "frame_no",
                "start_ms",
                "end_ms",
                "source_method",
                "hz",
                "confidence",
            ],
            rows,
            |b, r| {
                b.push_bind(r.recording_id)
                    .push_bind(r.frame_no)
                    .push_bind(r.start_ms)
                    .push_bind(r.end_ms)
                    .push_bind(r.source.as_tag())
                    .push_bind(r.hz)
                    .push_bind(r.confidence);
            },
        )
        .await
    }

    pub async fn insert_note_rows(&self, rows: &[NoteRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_NOTE",
            "engine_load_note",
            &[
                "recording_id",
                "frame_no",
                "start_ms",
                "end_ms",
                "note_midi_pitch_no",
                "volume_midi_velocity_no",
                "source_method",
            ],
            rows,
            |b, r| {
                b.push_bind(r.recording_id)
                    .push_bind(r.frame_no)
                    .push_bind(r.start_ms)
                    .push_bind(r.end_ms)
                    .push_bind(r.midi_pitch)
                    .push_bind(r.midi_velocity)
                    .push_bind("ONS");
            },
        )
        .await
    }

    pub async fn insert_volume_aggregate_rows(&self, rows: &[VolumeAggregateRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_VOLUME_AGG",
            "engine_load_volume",
            &["recording_id", "audio_chunk_no", "start_ms", "volume", "volume_in_db"],
            rows,
            |b, r| {
                b.push_bind(r.recording_id)
                    .push_bind(r.chunk_no)
                    .push_bind(r.start_ms)
                    .push_bind(r.rms)
                    .push_bind(r.db);
            },
        )
        .await
    }

    pub async fn insert_volume_10ms_rows(&self, rows: &[Volume10msRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_VOLUME_10MS",
            "engine_load_volume_10_ms",
            &[
                "recording_id",
                "start_ms",
                "end_ms",
                "volume",
                "volume_in_db",
                "audio_frame_no",
                "sample_rate",
            ],
            rows,
            |b, r| {
                b.push_bind(r.recording_id)
                    .push_bind(r.start_ms)
                    .push_bind(r.end_ms)
                    .push_bind(r.rms)
                    .push_bind(r.db)
                    .push_bind(r.frame_no)
                    .push_bind(r.sample_rate);
            },
        )
        .await
    }

    pub async fn insert_volume_1ms_rows(&self, rows: &[Volume1msRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_VOLUME_1MS",
            "engine_load_volume_1_ms",
            &[
                "recording_id",
                "start_ms",
                "volume",
                "volume_in_db",
                "audio_frame_no",
                "sample_rate",
            ],
            rows,
            |b, r| {
                b.push_bind(r.recording_id)
                    .push_bind(r.start_ms)
                    .push_bind(r.rms)
                    .push_bind(r.db)
                    .push_bind(r.frame_no)
                    .push_bind(r.sample_rate);
            },
        )
        .await
    }

    /// Group-insert a batch of process-wide diagnostic rows (C13). Callers
    /// never await this directly on the hot path; the metadata log's
    /// background task is the only caller.
    pub async fn insert_step_log_rows(&self, rows: &[StepLogRow]) -> Result<u64> {
        self.bulk_insert(
            "INSERT_STEP_LOG",
            "engine_step_log",
            &[
                "dt_added",
                "step_name",
                "function_name",
                "file_name",
                "recording_id",
                "audio_chunk_no",
                "frame_no",
            ],
            rows,
            |b, r| {
                b.push_bind(r.dt_added)
                    .push_bind(&r.step_name)
                    .push_bind(&r.function_name)
                    .push_bind(&r.file_name)
                    .push_bind(r.recording_id)
                    .push_bind(r.audio_chunk_no)
                    .push_bind(r.frame_no);
            },
        )
        .await
    }

    /// First of the two START-time stored-procedure calls (Scanner 3A):
    /// mode, violinist id, and output file name for a recording that an
    /// upstream admin facade has already created.
    pub async fn load_recording_base_params(
        &self,
        recording_id: RecordingId,
    ) -> Result<Option<RecordingBaseParamsRow>> {
        sqlx::query_as("SELECT * FROM engine_load_recording_params($1)")
            .bind(recording_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(recording_id, error = %e, "engine_load_recording_params failed");
                AppError::Database(e)
            })
    }

    /// Second START-time call for COMPOSE-mode recordings.
    pub async fn load_compose_params(&self, recording_id: RecordingId) -> Result<Option<RecordingAnalyzerParamsRow>> {
        sqlx::query_as("SELECT * FROM engine_load_compose_params($1)")
            .bind(recording_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(recording_id, error = %e, "engine_load_compose_params failed");
                AppError::Database(e)
            })
    }

    /// Second START-time call for PLAY/PRACTICE-mode recordings.
    pub async fn load_play_practice_params(
        &self,
        recording_id: RecordingId,
    ) -> Result<Option<RecordingAnalyzerParamsRow>> {
        sqlx::query_as("SELECT * FROM engine_load_play_practice_params($1)")
            .bind(recording_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(recording_id, error = %e, "engine_load_play_practice_params failed");
                AppError::Database(e)
            })
    }

    /// Invoke a stored procedure that returns nothing, e.g.
    /// `loader.call_procedure_no_result("CALL engine_end_of_recording($1)", |q| q.bind(recording_id))`.
    pub async fn call_procedure_no_result<'q>(
        &self,
        name: &'static str,
        sql: &'q str,
        bind: impl FnOnce(
            sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<()> {
        let query = bind(sqlx::query(sql));
        query.execute(&self.pool).await.map(|_| ()).map_err(|e| {
            tracing::error!(procedure = name, error = %e, "stored procedure call failed");
            AppError::Database(e)
        })
    }

    /// Invoke a stored procedure expected to return at most one row.
    pub async fn call_procedure_one_row<T>(&self, sql: &'static str) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        sqlx::query_as(sql).fetch_optional(&self.pool).await.map_err(|e| {
            tracing::error!(procedure = sql, error = %e, "stored procedure call failed");
            AppError::Database(e)
        })
    }

    /// Invoke a stored procedure expected to return multiple rows.
    pub async fn call_procedure_many_rows<T>(&self, sql: &'static str) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        sqlx::query_as(sql).fetch_all(&self.pool).await.map_err(|e| {
            tracing::error!(procedure = sql, error = %e, "stored procedure call failed");
            AppError::Database(e)
        })
    }
}
