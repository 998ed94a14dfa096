//! Process-wide metadata logger (C13).
//!
//! Every pipeline step pushes a typed row onto an unbounded channel and
//! moves on; a single background task drains the channel and bulk-inserts
//! whatever has accumulated since its last flush. Logging can never
//! back-pressure the tick loop or a handler: the channel send is the only
//! thing callers do, and it never awaits the database.

use tokio::sync::mpsc;

use crate::models::rows::StepLogRow;
use crate::services::db::BulkLoader;

const MAX_BATCH: usize = 256;

#[derive(Clone)]
pub struct MetadataLog {
    tx: mpsc::UnboundedSender<StepLogRow>,
}

impl MetadataLog {
    /// Spawns the background writer and returns a cheap, cloneable handle.
    pub fn spawn(loader: BulkLoader) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StepLogRow>();

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(MAX_BATCH);
            while let Some(row) = rx.recv().await {
                batch.push(row);
                while batch.len() < MAX_BATCH {
                    match rx.try_recv() {
                        Ok(row) => batch.push(row),
                        Err(_) => break,
                    }
                }
                if let Err(e) = loader.insert_step_log_rows(&batch).await {
                    tracing::error!(error = %e, rows = batch.len(), "metadata log flush failed");
                }
                batch.clear();
            }
        });

        Self { tx }
    }

    /// Enqueue one diagnostic row. Fire-and-forget: a closed channel (only
    /// possible during shutdown, after the writer task has already exited)
    /// is logged and otherwise ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &self,
        step_name: &str,
        function_name: &str,
        file_name: &str,
        recording_id: Option<i64>,
        audio_chunk_no: Option<i64>,
        frame_no: Option<i64>,
    ) {
        let row = StepLogRow {
            dt_added: chrono::Utc::now(),
            step_name: step_name.to_string(),
            function_name: function_name.to_string(),
            file_name: file_name.to_string(),
            recording_id,
            audio_chunk_no,
            frame_no,
        };
        if self.tx.send(row).is_err() {
            tracing::warn!("metadata log channel closed, dropping diagnostic row");
        }
    }
}

/// Shorthand that fills in `step_name`/`function_name`/`file_name` from the
/// call site, mirroring the decorator-based step logging the source used.
#[macro_export]
macro_rules! log_step {
    ($log:expr, $step:expr, $recording_id:expr, $chunk_no:expr, $frame_no:expr) => {
        $log.log($step, $crate::function_name!(), file!(), $recording_id, $chunk_no, $frame_no)
    };
}

#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        name.strip_suffix("::f").unwrap_or(name)
    }};
}
