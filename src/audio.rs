//! Microphone capture built on cpal.
//!
//! The capture side streams mono samples off the device thread, assembles
//! them into fixed-size frames, and delivers whole records centered on the
//! moment they were requested. The rest of the pipeline never touches cpal
//! or device sample rates.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::constants::audio::{frames_for_duration, PREDICT_BUFFER_FRAMES, SAMPLES_PER_FRAME};
use crate::types::Frame;

/// Recent frames kept for seeding centered records.
const HISTORY_FRAMES: usize = PREDICT_BUFFER_FRAMES;

struct RecordRequest {
    target_frames: usize,
    collected: Vec<Frame>,
    pause_after: bool,
}

/// Frame assembly shared with the capture thread: partial-frame samples, a
/// short history of recent frames, and the record request in flight.
struct CaptureBuffer {
    pending: Vec<f32>,
    history: VecDeque<Frame>,
    request: Option<RecordRequest>,
}

impl CaptureBuffer {
    fn new() -> Self {
        Self {
            pending: Vec::with_capacity(SAMPLES_PER_FRAME),
            history: VecDeque::with_capacity(HISTORY_FRAMES),
            request: None,
        }
    }

    /// Start collecting a record of `target_frames`, seeded with up to half
    /// the target from recent history so the record is centered on the
    /// request moment.
    fn begin(&mut self, target_frames: usize, pause_after: bool) {
        let past = target_frames / 2;
        let start = self.history.len().saturating_sub(past);
        let collected: Vec<Frame> = self.history.iter().skip(start).copied().collect();
        self.request = Some(RecordRequest {
            target_frames,
            collected,
            pause_after,
        });
    }

    /// Absorb mono samples. Once the request in flight has all its frames,
    /// the completed record is returned along with its pause flag.
    fn feed(&mut self, samples: &[f32]) -> Option<(Vec<Frame>, bool)> {
        let mut completed = None;
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() < SAMPLES_PER_FRAME {
                continue;
            }
            let mut frame = [0.0f32; SAMPLES_PER_FRAME];
            frame.copy_from_slice(&self.pending);
            self.pending.clear();

            if self.history.len() >= HISTORY_FRAMES {
                self.history.pop_front();
            }
            self.history.push_back(frame);

            if completed.is_some() {
                continue;
            }
            if let Some(request) = self.request.as_mut() {
                request.collected.push(frame);
                if request.collected.len() >= request.target_frames {
                    let request = self.request.take();
                    completed = request.map(|r| (r.collected, r.pause_after));
                }
            }
        }
        completed
    }
}

struct CaptureShared {
    buffer: CaptureBuffer,
    paused: bool,
}

/// Handle to the running input stream. Dropping it stops capture.
pub struct AudioCapture {
    _stream: cpal::Stream,
    shared: Arc<Mutex<CaptureShared>>,
}

impl AudioCapture {
    /// Open the input device and start streaming at `sample_rate` (other
    /// native rates are resampled). Capture begins paused; `resume` enables
    /// it once a record is wanted.
    pub fn install<F>(
        sample_rate: u32,
        preferred_device: Option<&str>,
        callback: F,
    ) -> Result<Self>
    where
        F: Fn(&[Frame]) + Send + Sync + 'static,
    {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => host
                .input_devices()
                .context("no input devices available")?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .with_context(|| format!("input device '{name}' not found"))?,
            None => host
                .default_input_device()
                .context("no default input device available")?,
        };
        println!("🎤 Using audio input device: {}", device.name()?);

        let default_config = device
            .default_input_config()
            .context("failed to get default input config")?;
        let mut config: StreamConfig = default_config.into();
        let mut native_rate = config.sample_rate.0;
        let supported = device
            .supported_input_configs()
            .context("failed to query supported input configs")?;
        for candidate in supported {
            if candidate.min_sample_rate().0 <= sample_rate
                && candidate.max_sample_rate().0 >= sample_rate
            {
                config.sample_rate = cpal::SampleRate(sample_rate);
                native_rate = sample_rate;
                break;
            }
        }
        if native_rate != sample_rate {
            println!("⚠️  {native_rate} Hz capture will be resampled to {sample_rate} Hz");
        }

        let channels = usize::from(config.channels.max(1));
        let shared = Arc::new(Mutex::new(CaptureShared {
            buffer: CaptureBuffer::new(),
            paused: true,
        }));
        let shared_cb = shared.clone();
        let callback = Arc::new(callback);

        let err_fn = |err| eprintln!("🔴 Audio stream error: {err}");
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let mono = if native_rate == sample_rate {
                        mono
                    } else {
                        resample(&mono, native_rate, sample_rate)
                    };
                    let completed = {
                        let Ok(mut shared) = shared_cb.lock() else {
                            return;
                        };
                        if shared.paused {
                            return;
                        }
                        let completed = shared.buffer.feed(&mono);
                        if matches!(completed, Some((_, true))) {
                            shared.paused = true;
                        }
                        completed
                    };
                    // The pipeline callback runs outside the capture lock.
                    if let Some((record, _)) = completed {
                        callback(&record);
                    }
                },
                err_fn,
                None,
            )
            .context(
                "failed to build input stream; check microphone permissions and availability",
            )?;
        stream.play().context("failed to start audio stream")?;

        Ok(Self {
            _stream: stream,
            shared,
        })
    }

    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
    }

    /// Request one record of `duration_ms` centered on this moment, then
    /// pause once it has been delivered.
    pub fn record(&self, duration_ms: u64) {
        self.lock()
            .buffer
            .begin(frames_for_duration(duration_ms), true);
    }

    /// Request one record of `duration_ms` centered on this moment and keep
    /// capturing afterwards.
    pub fn record_sym(&self, duration_ms: u64) {
        self.lock()
            .buffer
            .begin(frames_for_duration(duration_ms), false);
    }

    fn lock(&self) -> MutexGuard<'_, CaptureShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Average interleaved channels down to mono.
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

/// Linear-interpolation resampling; good enough for level detection and
/// correlation against templates captured the same way.
fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let src_floor = src_idx.floor() as usize;
        let src_ceil = (src_floor + 1).min(input.len() - 1);
        let frac = (src_idx - src_floor as f64) as f32;
        output.push(input[src_floor] * (1.0 - frac) + input[src_ceil] * frac);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(value: f32) -> Vec<f32> {
        vec![value; SAMPLES_PER_FRAME]
    }

    #[test]
    fn frames_assemble_across_chunk_boundaries() {
        let mut buffer = CaptureBuffer::new();
        buffer.begin(1, false);
        // Deliver one frame's worth of samples in ragged chunks.
        let samples = frame_of(0.5);
        assert!(buffer.feed(&samples[..100]).is_none());
        assert!(buffer.feed(&samples[100..1000]).is_none());
        let (record, pause) = buffer.feed(&samples[1000..]).expect("record expected");
        assert_eq!(record.len(), 1);
        assert_eq!(record[0][0], 0.5);
        assert!(!pause);
    }

    #[test]
    fn records_are_centered_on_the_request_moment() {
        let mut buffer = CaptureBuffer::new();
        // Build up history: frames filled with 1.0, 2.0, ... 6.0.
        for i in 1..=6 {
            buffer.feed(&frame_of(i as f32));
        }
        buffer.begin(PREDICT_BUFFER_FRAMES, false);
        // Future frames continue the sequence.
        let mut record = None;
        for i in 7..=20 {
            if let Some((frames, _)) = buffer.feed(&frame_of(i as f32)) {
                record = Some(frames);
                break;
            }
        }
        let record = record.expect("record expected");
        assert_eq!(record.len(), PREDICT_BUFFER_FRAMES);
        // Half the target (4 frames) comes from history, the rest is new.
        let values: Vec<f32> = record.iter().map(|f| f[0]).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn short_history_records_still_reach_full_length() {
        let mut buffer = CaptureBuffer::new();
        buffer.feed(&frame_of(1.0));
        buffer.begin(PREDICT_BUFFER_FRAMES, false);
        let mut record = None;
        for i in 2..=20 {
            if let Some((frames, _)) = buffer.feed(&frame_of(i as f32)) {
                record = Some(frames);
                break;
            }
        }
        assert_eq!(record.expect("record expected").len(), PREDICT_BUFFER_FRAMES);
    }

    #[test]
    fn training_records_request_a_pause() {
        let mut buffer = CaptureBuffer::new();
        buffer.begin(frames_for_duration(75), true);
        let mut outcome = None;
        for _ in 0..4 {
            if let Some(done) = buffer.feed(&frame_of(0.1)) {
                outcome = Some(done);
                break;
            }
        }
        let (record, pause) = outcome.expect("record expected");
        assert_eq!(record.len(), frames_for_duration(75));
        assert!(pause);
    }

    #[test]
    fn downmix_averages_stereo_pairs() {
        let samples = [1.0f32, -1.0, 0.5, 0.5];
        assert_eq!(downmix(&samples, 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&samples, 1), samples.to_vec());
    }

    #[test]
    fn resample_halves_the_length_for_double_rate() {
        let input: Vec<f32> = (0..480).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = resample(&input, 48_000, 24_000);
        assert_eq!(output.len(), 240);
    }
}
