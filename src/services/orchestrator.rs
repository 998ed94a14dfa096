//! Orchestrator (C11): a single cooperative tick loop that scans the
//! Recording State Store for unprocessed work and dispatches it without
//! blocking the next tick. Three scanners drain the message queue (START,
//! FRAME, STOP); a fourth dispatches split frames to the five analyzers; a
//! fifth finalizes recordings once every frame is analyzed and the stop
//! grace period has elapsed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::models::frame::{SplitFrameMeta, SplitFramePayload};
use crate::models::message::MessageKind;
use crate::models::recording::AnalyzerFlags;
use crate::models::RecordingId;
use crate::services::analyzers::{OnsetClient, PitchAAnalyzer, PitchBAnalyzer, SpectralAnalyzer};
use crate::services::db::BulkLoader;
use crate::services::finalizer;
use crate::services::metadata_log::MetadataLog;
use crate::services::resampler::resample_pcm16;
use crate::services::state_store::RecordingStateStore;

/// How long after STOP a recording must sit fully-analyzed before the
/// finalizer is allowed to run. Gives in-flight analyzer tasks launched by
/// the previous tick a chance to land their rows first.
const FINALIZE_GRACE: chrono::Duration = chrono::Duration::seconds(5);

/// Owns the five analyzers used by the split-frame scanner. Spectral and
/// Pitch-A keep mutable scratch state so they're confined to a blocking
/// thread behind a std mutex; Pitch-B's ONNX session pool and the onset
/// HTTP client are already safe to share and await directly.
struct AnalyzerSuite {
    spectral: Arc<StdMutex<SpectralAnalyzer>>,
    pitch_a: Arc<StdMutex<PitchAAnalyzer>>,
    pitch_b: Arc<PitchBAnalyzer>,
    onset: OnsetClient,
}

pub struct Orchestrator {
    store: Arc<RecordingStateStore>,
    db: BulkLoader,
    metadata_log: MetadataLog,
    analyzers: AnalyzerSuite,
    semaphore: Arc<Semaphore>,
    working_dir: PathBuf,
    tick_interval: Duration,
    cancellation: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<RecordingStateStore>,
        db: BulkLoader,
        metadata_log: MetadataLog,
        pitch_b: Arc<PitchBAnalyzer>,
        onset: OnsetClient,
        working_dir: PathBuf,
        tick_interval_ms: u64,
        cancellation: CancellationToken,
    ) -> Self {
        let cores = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4);
        Self {
            store,
            db,
            metadata_log,
            analyzers: AnalyzerSuite {
                spectral: Arc::new(StdMutex::new(SpectralAnalyzer::new())),
                pitch_a: Arc::new(StdMutex::new(PitchAAnalyzer::new())),
                pitch_b,
                onset,
            },
            semaphore: Arc::new(Semaphore::new(cores.saturating_sub(1).max(1))),
            working_dir,
            tick_interval: Duration::from_millis(tick_interval_ms),
            cancellation,
        }
    }

    /// Runs until `cancellation` fires. Intended to be spawned as its own
    /// task; every scanner dispatches handler work onto its own task so a
    /// slow frame never delays the next tick.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        let budget_ms = self.tick_interval.as_millis() as u64;
        let mut tick_count: u64 = 0;
        let mut window_elapsed_ms: u64 = 0;
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    tracing::info!("orchestrator shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let started = Utc::now();
                    self.scan_start_messages().await;
                    self.scan_frame_messages().await;
                    self.scan_stop_messages().await;
                    self.scan_split_frames().await;
                    self.scan_finalize().await;
                    let elapsed_ms = Utc::now().signed_duration_since(started).num_milliseconds().max(0) as u64;

                    if elapsed_ms > budget_ms {
                        tracing::warn!(elapsed_ms, budget_ms, "tick overrun");
                        self.metadata_log.log("tick_behind_schedule", "run", "orchestrator.rs", None, None, None);
                    }

                    tick_count += 1;
                    window_elapsed_ms += elapsed_ms;

                    if tick_count % 100 == 0 {
                        let avg_tick_ms = window_elapsed_ms / 100;
                        let verdict = if avg_tick_ms as f64 > budget_ms as f64 * 1.5 { "SLOW" } else { "GOOD" };
                        tracing::info!(
                            ticks = tick_count,
                            window_elapsed_ms,
                            avg_tick_ms,
                            verdict,
                            "tick performance summary"
                        );
                        self.metadata_log.log("tick_performance_summary", "run", "orchestrator.rs", None, None, None);
                        window_elapsed_ms = 0;
                    }
                }
            }
        }
    }

    /// Scanner 3A. Loads recording parameters via two stored-procedure
    /// calls (base params, then mode-specific analyzer flags), seeds the
    /// config into the state store, and logs the config row.
    async fn scan_start_messages(&self) {
        for message in self.store.unqueued_messages(MessageKind::Start).await {
            self.store.mark_message_queued(message.id).await;

            let Some(recording_id) = message.recording_id else {
                self.store.remove_message(message.id).await;
                continue;
            };

            let store = Arc::clone(&self.store);
            let db = self.db.clone();
            let log = self.metadata_log.clone();

            tokio::spawn(async move {
                let base = match db.load_recording_base_params(recording_id).await {
                    Ok(Some(row)) => row,
                    Ok(None) => {
                        tracing::warn!(recording_id, "no base recording params, using defaults");
                        crate::models::rows::RecordingBaseParamsRow {
                            mode: "PRACTICE".into(),
                            violinist_id: 0,
                            output_file_name: format!("recording_{recording_id}.wav"),
                        }
                    }
                    Err(e) => {
                        tracing::error!(recording_id, error = %e, "failed to load base recording params");
                        store.remove_message(message.id).await;
                        return;
                    }
                };

                let mode = crate::models::recording::RecordingMode::parse_loose(&base.mode);

                let analyzer_params = match mode {
                    crate::models::recording::RecordingMode::Compose => db.load_compose_params(recording_id).await,
                    _ => db.load_play_practice_params(recording_id).await,
                };
                let analyzer_params = match analyzer_params {
                    Ok(Some(row)) => row,
                    Ok(None) => crate::models::rows::RecordingAnalyzerParamsRow {
                        run_spectral: true,
                        run_pitch_a: true,
                        run_pitch_b: true,
                        run_onset: false,
                        run_volume: true,
                    },
                    Err(e) => {
                        tracing::error!(recording_id, error = %e, "failed to load analyzer params");
                        store.remove_message(message.id).await;
                        return;
                    }
                };

                let flags = AnalyzerFlags {
                    run_spectral: analyzer_params.run_spectral,
                    run_pitch_a: analyzer_params.run_pitch_a,
                    run_pitch_b: analyzer_params.run_pitch_b,
                    run_onset: analyzer_params.run_onset,
                    run_volume: analyzer_params.run_volume,
                };

                let config = crate::models::recording::RecordingConfig::new(
                    recording_id,
                    mode,
                    base.violinist_id,
                    base.output_file_name,
                    flags,
                );
                store.seed_recording(config).await;

                log.log("START", "scan_start_messages", "orchestrator.rs", Some(recording_id), None, None);
                store.remove_message(message.id).await;
            });
        }
    }

    /// Scanner 3B. Normalizes each FRAME message's payload to raw PCM16,
    /// feeds it through the recording's aligner, and stores every produced
    /// split frame.
    async fn scan_frame_messages(&self) {
        for message in self.store.unqueued_messages(MessageKind::Frame).await {
            self.store.mark_message_queued(message.id).await;

            let Some(recording_id) = message.recording_id else {
                self.store.remove_message(message.id).await;
                continue;
            };
            let Some(bytes) = message.bytes.clone() else {
                self.store.remove_message(message.id).await;
                continue;
            };

            let store = Arc::clone(&self.store);
            let db = self.db.clone();
            let log = self.metadata_log.clone();
            let working_dir = self.working_dir.clone();

            tokio::spawn(async move {
                store.mark_message_started(message.id).await;

                let pcm16 = match message.encoding {
                    Some(crate::models::frame::FrameEncoding::Base64) => {
                        use base64::Engine;
                        match base64::engine::general_purpose::STANDARD.decode(&bytes) {
                            Ok(decoded) => decoded,
                            Err(e) => {
                                tracing::warn!(recording_id, error = %e, "invalid base64 frame payload");
                                store.remove_message(message.id).await;
                                return;
                            }
                        }
                    }
                    Some(crate::models::frame::FrameEncoding::Hex) => match hex::decode(&bytes) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            tracing::warn!(recording_id, error = %e, "invalid hex frame payload");
                            store.remove_message(message.id).await;
                            return;
                        }
                    },
                    _ => bytes,
                };

                let digest = crate::services::digest::content_digest(&pcm16);
                let pre_split = crate::models::frame::PreSplitFrame {
                    recording_id,
                    client_frame_no: message.audio_frame_no.unwrap_or(0),
                    size_bytes: pcm16.len(),
                    encoding: message.encoding.unwrap_or(crate::models::frame::FrameEncoding::Raw),
                    digest,
                    received_at: message.received_at,
                    paired_at: Some(Utc::now()),
                    split_at: None,
                    bytes: pcm16.clone(),
                };
                store.insert_pre_split_frame(pre_split).await;

                let produced = store.split_via_aligner(recording_id, &pcm16).await;
                if let Some(client_frame_no) = message.audio_frame_no {
                    store.mark_pre_split_split(recording_id, client_frame_no).await;
                }

                let Some(flags) = store.recording_config(recording_id).await.map(|c| c.flags) else {
                    store.remove_message(message.id).await;
                    return;
                };

                for (frame_no, frame_bytes) in produced {
                    finalizer::write_fragment(&working_dir, recording_id, frame_no, &frame_bytes).ok();

                    let digest = crate::services::digest::content_digest(&frame_bytes);
                    let meta = SplitFrameMeta::new(
                        recording_id,
                        frame_no,
                        frame_bytes.len(),
                        crate::models::frame::FrameEncoding::Raw,
                        digest,
                        flags,
                        false,
                    );
                    let payload = SplitFramePayload { raw_pcm16_44100: frame_bytes, ..Default::default() };
                    store.insert_split_frame(meta, payload).await;
                    log.log("SPLIT", "scan_frame_messages", "orchestrator.rs", Some(recording_id), None, Some(frame_no));
                }

                let _ = &db;
                store.remove_message(message.id).await;
            });
        }
    }

    /// Scanner 3C.
    async fn scan_stop_messages(&self) {
        for message in self.store.unqueued_messages(MessageKind::Stop).await {
            self.store.mark_message_queued(message.id).await;
            if let Some(recording_id) = message.recording_id {
                self.store.mark_recording_stopped(recording_id).await;
                self.metadata_log.log(
                    "STOP",
                    "scan_stop_messages",
                    "orchestrator.rs",
                    Some(recording_id),
                    None,
                    None,
                );
            }
            self.store.remove_message(message.id).await;
        }
    }

    /// Scanner 6: dispatches every unqueued split frame through the five
    /// analyzers enabled for its recording, then bulk-inserts whatever rows
    /// came back.
    async fn scan_split_frames(&self) {
        for (recording_id, frame_no) in self.store.unqueued_split_frames().await {
            self.store.mark_split_frame_queued(recording_id, frame_no).await;

            let store = Arc::clone(&self.store);
            let db = self.db.clone();
            let log = self.metadata_log.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let spectral = Arc::clone(&self.analyzers.spectral);
            let pitch_a = Arc::clone(&self.analyzers.pitch_a);
            let pitch_b = Arc::clone(&self.analyzers.pitch_b);
            let onset = self.analyzers.onset.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                store.update_split_frame_meta(recording_id, frame_no, |m| {
                    m.dt_processing_start = Some(Utc::now());
                }).await;

                let Some(meta) = store.split_frame_meta(recording_id, frame_no).await else { return };
                let Some(payload) = store.split_frame_payload(recording_id, frame_no).await else { return };

                store.update_split_frame_meta(recording_id, frame_no, |m| {
                    m.dt_resample_start = Some(Utc::now());
                }).await;
                let audio_22050 = resample_pcm16(&payload.raw_pcm16_44100, 44_100, 22_050);
                let audio_16000 = resample_pcm16(&payload.raw_pcm16_44100, 44_100, 16_000);
                store.set_split_frame_resampled(recording_id, frame_no, audio_22050.clone(), audio_16000.clone()).await;
                store.update_split_frame_meta(recording_id, frame_no, |m| {
                    m.dt_resample_end = Some(Utc::now());
                }).await;

                let flags: AnalyzerFlags = meta.flags;
                let start_ms = meta.start_ms();

                // C3-C7 fan out concurrently, each under its own clone of the
                // shared handles; none of them block on another.
                let spectral_fut = async {
                    if !flags.run_spectral {
                        return;
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| m.dt_start_spectral = Some(Utc::now())).await;
                    let audio = audio_16000.clone();
                    let spectral = Arc::clone(&spectral);
                    let rows = tokio::task::spawn_blocking(move || {
                        spectral.lock().unwrap().analyze(&audio, 16_000, recording_id, frame_no)
                    }).await.unwrap_or_default();
                    let cnt = rows.len() as u32;
                    if let Err(e) = db.insert_spectral_rows(&rows).await {
                        tracing::error!(recording_id, frame_no, error = %e, "spectral insert failed");
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| {
                        m.dt_end_spectral = Some(Utc::now());
                        m.spectral_record_cnt = cnt;
                    }).await;
                    log.log("SPECTRAL", "scan_split_frames", "orchestrator.rs", Some(recording_id), None, Some(frame_no));
                };

                let pitch_a_fut = async {
                    if !flags.run_pitch_a {
                        return;
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| m.dt_start_pitch_a = Some(Utc::now())).await;
                    let audio = audio_22050.clone();
                    let pitch_a = Arc::clone(&pitch_a);
                    let rows = tokio::task::spawn_blocking(move || {
                        pitch_a.lock().unwrap().analyze(&audio, recording_id, frame_no, start_ms)
                    }).await.unwrap_or_default();
                    let cnt = rows.len() as u32;
                    if let Err(e) = db.insert_pitch_rows(&rows).await {
                        tracing::error!(recording_id, frame_no, error = %e, "pitch-a insert failed");
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| {
                        m.dt_end_pitch_a = Some(Utc::now());
                        m.pitch_a_record_cnt = cnt;
                    }).await;
                    log.log("PITCH_A", "scan_split_frames", "orchestrator.rs", Some(recording_id), None, Some(frame_no));
                };

                let pitch_b_fut = async {
                    if !flags.run_pitch_b {
                        return;
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| m.dt_start_pitch_b = Some(Utc::now())).await;
                    let rows = pitch_b.analyze(&audio_16000, recording_id, frame_no, start_ms).await;
                    let cnt = rows.len() as u32;
                    if let Err(e) = db.insert_pitch_rows(&rows).await {
                        tracing::error!(recording_id, frame_no, error = %e, "pitch-b insert failed");
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| {
                        m.dt_end_pitch_b = Some(Utc::now());
                        m.pitch_b_record_cnt = cnt;
                    }).await;
                    log.log("PITCH_B", "scan_split_frames", "orchestrator.rs", Some(recording_id), None, Some(frame_no));
                };

                let volume_fut = async {
                    if !flags.run_volume {
                        return;
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| m.dt_start_volume = Some(Utc::now())).await;
                    let agg = crate::services::analyzers::volume::volume_aggregate(
                        &audio_22050, recording_id, frame_no, start_ms, crate::services::analyzers::volume::VOLUME_SAMPLE_RATE,
                    );
                    let ten_ms = crate::services::analyzers::volume::volume_10ms_series(
                        &audio_22050, recording_id, frame_no, start_ms, crate::services::analyzers::volume::VOLUME_SAMPLE_RATE,
                    );
                    let one_ms = crate::services::analyzers::volume::volume_1ms_series(
                        &audio_22050, recording_id, frame_no, start_ms, crate::services::analyzers::volume::VOLUME_SAMPLE_RATE,
                    );
                    if let Some(row) = agg {
                        if let Err(e) = db.insert_volume_aggregate_rows(&[row]).await {
                            tracing::error!(recording_id, frame_no, error = %e, "volume aggregate insert failed");
                        }
                    }
                    let ten_ms_cnt = ten_ms.len() as u32;
                    let one_ms_cnt = one_ms.len() as u32;
                    if let Err(e) = db.insert_volume_10ms_rows(&ten_ms).await {
                        tracing::error!(recording_id, frame_no, error = %e, "volume 10ms insert failed");
                    }
                    if let Err(e) = db.insert_volume_1ms_rows(&one_ms).await {
                        tracing::error!(recording_id, frame_no, error = %e, "volume 1ms insert failed");
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| {
                        m.dt_end_volume = Some(Utc::now());
                        m.volume_10ms_record_cnt = ten_ms_cnt;
                        m.volume_1ms_record_cnt = one_ms_cnt;
                    }).await;
                    log.log("VOLUME", "scan_split_frames", "orchestrator.rs", Some(recording_id), None, Some(frame_no));
                };

                let onset_fut = async {
                    if !flags.run_onset {
                        return;
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| m.dt_start_onset = Some(Utc::now())).await;
                    let wav_bytes = finalizer::encode_fragment_wav(&payload.raw_pcm16_44100);
                    let rows = onset.transcribe(wav_bytes, recording_id, frame_no, start_ms).await;
                    let cnt = rows.len() as u32;
                    if let Err(e) = db.insert_note_rows(&rows).await {
                        tracing::error!(recording_id, frame_no, error = %e, "note insert failed");
                    }
                    store.update_split_frame_meta(recording_id, frame_no, |m| {
                        m.dt_end_onset = Some(Utc::now());
                        m.onset_record_cnt = cnt;
                    }).await;
                    log.log("ONSET", "scan_split_frames", "orchestrator.rs", Some(recording_id), None, Some(frame_no));
                };

                futures::join!(spectral_fut, pitch_a_fut, pitch_b_fut, volume_fut, onset_fut);

                store.update_split_frame_meta(recording_id, frame_no, |m| {
                    m.dt_processing_end = Some(Utc::now());
                }).await;

                if let Some(meta) = store.split_frame_meta(recording_id, frame_no).await {
                    if meta.is_fully_analyzed() {
                        store.release_split_frame_payload(recording_id, frame_no).await;
                    }
                }
            });
        }
    }

    /// Scanner 7.
    async fn scan_finalize(&self) {
        for recording_id in self.store.recordings_ready_to_finalize(FINALIZE_GRACE).await {
            let store = Arc::clone(&self.store);
            let db = self.db.clone();
            let working_dir = self.working_dir.clone();

            tokio::spawn(async move {
                if let Err(e) = finalize_one(store.as_ref(), &db, &working_dir, recording_id).await {
                    tracing::error!(recording_id, error = %e, "finalize failed");
                }
            });
        }
    }
}

async fn finalize_one(
    store: &RecordingStateStore,
    db: &BulkLoader,
    working_dir: &std::path::Path,
    recording_id: RecordingId,
) -> crate::error::Result<()> {
    let mut frame_nos = store.split_frame_numbers(recording_id).await;

    if let Some((frame_no, bytes, _short)) = store.flush_aligner(recording_id).await {
        finalizer::write_fragment(working_dir, recording_id, frame_no, &bytes).ok();
        frame_nos.push(frame_no);
        frame_nos.sort_unstable();
    }

    let Some(config) = store.recording_config(recording_id).await else { return Ok(()) };

    finalizer::concatenate(working_dir, recording_id, &frame_nos, &config.output_file_name)?;

    db.call_procedure_no_result(
        "END_OF_RECORDING",
        "CALL engine_end_of_recording($1)",
        |q| q.bind(recording_id),
    )
    .await
    .ok();

    finalizer::cleanup_working_tree(working_dir, recording_id).ok();
    store.remove_recording(recording_id).await;

    Ok(())
}
