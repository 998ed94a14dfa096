//! Finalizer (C12): per-chunk WAV fragment I/O during frame processing, and
//! whole-recording WAV concatenation plus working-directory cleanup once a
//! recording is ready to close out.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{AppError, Result};
use crate::models::RecordingId;

const SAMPLE_RATE: u32 = 44_100;
const BITS_PER_SAMPLE: u16 = 16;

fn spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    }
}

fn recording_dir(working_dir: &Path, recording_id: RecordingId) -> PathBuf {
    working_dir.join(recording_id.to_string())
}

fn frames_dir(working_dir: &Path, recording_id: RecordingId) -> PathBuf {
    recording_dir(working_dir, recording_id).join("frames")
}

fn fragment_path(working_dir: &Path, recording_id: RecordingId, frame_no: i64) -> PathBuf {
    frames_dir(working_dir, recording_id).join(format!("{frame_no:010}.wav"))
}

/// Writes one split frame's raw PCM16 44.1 kHz bytes as a standalone WAV
/// fragment, addressed by frame number so finalize can concatenate them in
/// order regardless of processing order.
pub fn write_fragment(working_dir: &Path, recording_id: RecordingId, frame_no: i64, pcm16: &[u8]) -> Result<()> {
    let dir = frames_dir(working_dir, recording_id);
    std::fs::create_dir_all(&dir)?;

    let mut writer = WavWriter::create(fragment_path(working_dir, recording_id, frame_no), spec())
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    for sample in pcm16.chunks_exact(2) {
        let s = i16::from_le_bytes([sample[0], sample[1]]);
        writer
            .write_sample(s)
            .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    }
    writer
        .finalize()
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    Ok(())
}

/// Encodes a raw PCM16 44.1 kHz buffer as an in-memory WAV, for posting to
/// the onset/note microservice (C6). Never touches disk.
pub fn encode_fragment_wav(pcm16: &[u8]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec()).expect("in-memory wav writer");
        for sample in pcm16.chunks_exact(2) {
            let s = i16::from_le_bytes([sample[0], sample[1]]);
            let _ = writer.write_sample(s);
        }
        let _ = writer.finalize();
    }
    cursor.into_inner()
}

/// Concatenates every fragment in `frame_nos` order into the recording's
/// final output WAV. When a recording produced zero split frames (a STOP
/// that arrives before any full frame), writes a one-sample silent WAV as a
/// deliberate sentinel rather than failing: a zero-byte or missing file
/// reads as an error downstream, a one-sample silent clip does not.
pub fn concatenate(
    working_dir: &Path,
    recording_id: RecordingId,
    frame_nos: &[i64],
    output_file_name: &str,
) -> Result<PathBuf> {
    let dir = recording_dir(working_dir, recording_id);
    std::fs::create_dir_all(&dir)?;
    let output_path = dir.join(output_file_name);

    let mut writer = WavWriter::create(&output_path, spec())
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

    if frame_nos.is_empty() {
        writer
            .write_sample(0i16)
            .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    } else {
        for &frame_no in frame_nos {
            let path = fragment_path(working_dir, recording_id, frame_no);
            let mut reader = match hound::WavReader::open(&path) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(recording_id, frame_no, error = %e, "missing fragment during concatenation");
                    continue;
                }
            };
            for sample in reader.samples::<i16>() {
                let sample = sample
                    .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
                writer
                    .write_sample(sample)
                    .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            }
        }
    }

    writer
        .finalize()
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    Ok(output_path)
}

/// Removes the per-frame fragment directory (and any leftover pre-split or
/// chunk staging directories) once the final WAV has been written,
/// retaining only the recording's directory and its final output file.
pub fn cleanup_working_tree(working_dir: &Path, recording_id: RecordingId) -> Result<()> {
    let dir = recording_dir(working_dir, recording_id);
    for sub in ["frames", "presplit", "chunks"] {
        let path = dir.join(sub);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn write_and_read_back_a_fragment() {
        let dir = tempdir();
        let bytes = pcm16_bytes(&[100, -100, 200, -200]);
        write_fragment(dir.path(), 1, 1, &bytes).unwrap();

        let mut reader = hound::WavReader::open(fragment_path(dir.path(), 1, 1)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -100, 200, -200]);
    }

    #[test]
    fn concatenation_orders_fragments_by_frame_no() {
        let dir = tempdir();
        write_fragment(dir.path(), 1, 2, &pcm16_bytes(&[2, 2])).unwrap();
        write_fragment(dir.path(), 1, 1, &pcm16_bytes(&[1, 1])).unwrap();

        let out = concatenate(dir.path(), 1, &[1, 2], "out.wav").unwrap();
        let mut reader = hound::WavReader::open(out).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 1, 2, 2]);
    }

    #[test]
    fn empty_recording_produces_one_sample_silent_sentinel() {
        let dir = tempdir();
        let out = concatenate(dir.path(), 7, &[], "out.wav").unwrap();
        let mut reader = hound::WavReader::open(out).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0]);
    }

    #[test]
    fn cleanup_removes_fragment_directory_but_keeps_output() {
        let dir = tempdir();
        write_fragment(dir.path(), 3, 1, &pcm16_bytes(&[1, 1])).unwrap();
        concatenate(dir.path(), 3, &[1], "out.wav").unwrap();
        cleanup_working_tree(dir.path(), 3).unwrap();

        assert!(!frames_dir(dir.path(), 3).exists());
        assert!(recording_dir(dir.path(), 3).join("out.wav").exists());
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
