//! The owning engine: collects training data, trains, then scans live or
//! replayed audio for keystrokes and feeds the classification worker.
//!
//! All shared state hangs off this struct; the CLI layer calls its methods
//! and the capture side calls [`Engine::on_audio`] from its own thread.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::background::BackgroundLevel;
use crate::classifier::PredictionState;
use crate::constants::audio::{PREDICT_BUFFER_FRAMES, SAMPLES_PER_FRAME, TRAIN_BUFFER_FRAMES};
use crate::constants::worker::{
    IDLE_POLL_MS, MAX_QUEUE_ITEMS, REPLAY_OVERLAP_FRAMES, REPLAY_QUEUE_HIGH_WATER,
};
use crate::detector::detect_keystrokes;
use crate::kbd::ReplayReader;
use crate::trainer::{train_all, TrainStats, TrainedModel};
use crate::types::{Frame, Key, Waveform};
use crate::worker::{ClassifyWorker, WorkItem, WorkQueue};

/// Where the prediction subsystem currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CollectingTrain,
    Training,
    PredictingLive,
    PredictingReplay,
}

pub struct Engine {
    phase: Phase,
    threshold_cc: f64,
    threshold_background: f32,

    histories: BTreeMap<Key, Vec<Waveform>>,
    prototypes: Arc<BTreeMap<Key, Waveform>>,
    stats: BTreeMap<Key, TrainStats>,
    failed: Vec<Key>,

    background: BackgroundLevel,
    queue: WorkQueue,
    prediction: Arc<Mutex<PredictionState>>,
    worker: Option<ClassifyWorker>,
    want_capture: bool,
}

impl Engine {
    pub fn new(threshold_cc: f64, threshold_background: f32) -> Self {
        Self {
            phase: Phase::CollectingTrain,
            threshold_cc,
            threshold_background,
            histories: BTreeMap::new(),
            prototypes: Arc::new(BTreeMap::new()),
            stats: BTreeMap::new(),
            failed: Vec::new(),
            background: BackgroundLevel::new(),
            queue: WorkQueue::new(),
            prediction: Arc::new(Mutex::new(PredictionState::new())),
            worker: None,
            want_capture: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Append one labeled training capture. Only meaningful before
    /// [`Engine::train`]; the history is never touched afterwards.
    pub fn add_training_record(&mut self, key: Key, frames: &[Frame]) {
        if self.phase != Phase::CollectingTrain {
            return;
        }
        if frames.len() != TRAIN_BUFFER_FRAMES {
            eprintln!(
                "⚠️  Unexpected training record of {} frames, expected {}",
                frames.len(),
                TRAIN_BUFFER_FRAMES
            );
            return;
        }
        let mut waveform = Vec::with_capacity(frames.len() * SAMPLES_PER_FRAME);
        for frame in frames {
            waveform.extend_from_slice(frame);
        }
        self.histories.entry(key).or_default().push(waveform);
    }

    /// Align and average every collected key, then start the worker and
    /// switch to live prediction. Fails when nothing could be trained.
    pub fn train(&mut self) -> Result<()> {
        self.phase = Phase::Training;
        let TrainedModel {
            prototypes,
            stats,
            failed,
        } = train_all(&self.histories);
        if prototypes.is_empty() {
            bail!("no key could be trained from the provided recordings");
        }
        self.prototypes = Arc::new(prototypes);
        self.stats = stats;
        self.failed = failed;
        self.worker = Some(ClassifyWorker::spawn(
            self.queue.clone(),
            self.prototypes.clone(),
            self.threshold_cc,
            self.prediction.clone(),
        ));
        self.phase = Phase::PredictingLive;
        self.want_capture = true;
        Ok(())
    }

    /// Capture callback: track the background level over every sample, scan
    /// the buffer for keystroke candidates, and queue any hits.
    ///
    /// In live mode the queue is trimmed to its cap on push, dropping the
    /// oldest pending work; replay relies on the producer pausing instead.
    pub fn on_audio(&mut self, frames: &[Frame]) {
        if !matches!(self.phase, Phase::PredictingLive | Phase::PredictingReplay) {
            return;
        }

        let mut ampl = Vec::with_capacity(frames.len() * SAMPLES_PER_FRAME);
        for frame in frames {
            ampl.extend_from_slice(frame);
        }
        for &sample in &ampl {
            self.background.push(sample.abs());
        }

        let positions = detect_keystrokes(&ampl, self.background.mean(), self.threshold_background);
        if !positions.is_empty() {
            let item = WorkItem { ampl, positions };
            if self.phase == Phase::PredictingLive {
                if self.queue.push_bounded(item, MAX_QUEUE_ITEMS) > 0 {
                    print!("!");
                    let _ = io::stdout().flush();
                }
            } else {
                self.queue.push(item);
            }
        }

        self.want_capture = true;
    }

    /// Whether the live loop should request the next centered capture.
    pub fn take_capture_request(&mut self) -> bool {
        let want = self.want_capture && self.phase == Phase::PredictingLive;
        if want {
            self.want_capture = false;
        }
        want
    }

    /// Feed a recorded sample stream through detection as overlapping
    /// prediction-sized buffers, waiting for the queue to drain at the end.
    ///
    /// With `wait_for_queue`, reading pauses while enough work is already
    /// pending; nothing is ever dropped during replay.
    pub fn replay(&mut self, path: &Path, wait_for_queue: bool) -> Result<()> {
        if self.worker.is_none() {
            bail!("replay requested before training");
        }
        println!("🔁 Replaying audio from '{}'", path.display());
        self.phase = Phase::PredictingReplay;
        let mut reader = ReplayReader::open(path)?;

        let mut record: Vec<Frame> = Vec::new();
        loop {
            if wait_for_queue && self.queue.len() >= REPLAY_QUEUE_HIGH_WATER {
                thread::sleep(Duration::from_millis(IDLE_POLL_MS));
                continue;
            }

            if record.len() > REPLAY_OVERLAP_FRAMES {
                record.drain(..record.len() - REPLAY_OVERLAP_FRAMES);
            }
            while record.len() < PREDICT_BUFFER_FRAMES {
                match reader.read_frame()? {
                    Some(frame) => record.push(frame),
                    None => break,
                }
            }
            if record.len() < PREDICT_BUFFER_FRAMES {
                if record.len() > REPLAY_OVERLAP_FRAMES {
                    println!("    Skipping partial buffer of {} frames", record.len());
                }
                break;
            }

            self.on_audio(&record);
        }

        while !self.queue.is_empty() {
            thread::sleep(Duration::from_millis(IDLE_POLL_MS));
        }
        println!("✅ Replay done");
        self.phase = Phase::PredictingLive;
        Ok(())
    }

    /// Stop the classification worker. Called on shutdown; the worker
    /// finishes its current item and exits.
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    pub fn prediction_state(&self) -> Arc<Mutex<PredictionState>> {
        self.prediction.clone()
    }

    pub fn train_stats(&self) -> &BTreeMap<Key, TrainStats> {
        &self.stats
    }

    pub fn failed_keys(&self) -> &[Key] {
        &self.failed
    }

    pub fn trained_keys(&self) -> usize {
        self.prototypes.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn background_mean(&self) -> f64 {
        self.background.mean()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::audio::SAMPLES_PER_WAVEFORM;

    fn burst_record(freq_hz: f32, start: usize) -> Vec<Frame> {
        let mut samples = vec![0.0f32; SAMPLES_PER_WAVEFORM];
        let len = 600usize;
        for i in 0..len {
            let idx = start + i;
            if idx >= samples.len() {
                break;
            }
            let t = idx as f32 / 24_000.0;
            let window = (std::f32::consts::PI * i as f32 / len as f32).sin().powi(2);
            samples[idx] = window * (2.0 * std::f32::consts::PI * freq_hz * t).sin();
        }
        samples
            .chunks_exact(SAMPLES_PER_FRAME)
            .map(|chunk| {
                let mut frame = [0.0f32; SAMPLES_PER_FRAME];
                frame.copy_from_slice(chunk);
                frame
            })
            .collect()
    }

    fn trained_engine() -> Engine {
        let mut engine = Engine::new(0.5, 10.0);
        for i in 0..4 {
            engine.add_training_record(b'a' as Key, &burst_record(2_000.0, 1000 + 7 * i));
        }
        engine.train().unwrap();
        engine
    }

    #[test]
    fn phases_advance_through_training() {
        let mut engine = Engine::new(0.5, 10.0);
        assert_eq!(engine.phase(), Phase::CollectingTrain);
        for i in 0..4 {
            engine.add_training_record(b'a' as Key, &burst_record(2_000.0, 1000 + 7 * i));
        }
        engine.train().unwrap();
        assert_eq!(engine.phase(), Phase::PredictingLive);
        assert_eq!(engine.trained_keys(), 1);
        assert!(engine.failed_keys().is_empty());
    }

    #[test]
    fn training_with_no_recordings_fails() {
        let mut engine = Engine::new(0.5, 10.0);
        assert!(engine.train().is_err());
    }

    #[test]
    fn records_are_ignored_after_training() {
        let mut engine = trained_engine();
        engine.add_training_record(b'z' as Key, &burst_record(3_000.0, 1000));
        assert!(!engine.histories.contains_key(&(b'z' as Key)));
    }

    #[test]
    fn silence_produces_no_work_and_no_predictions() {
        let mut engine = trained_engine();
        let silent = vec![[0.0f32; SAMPLES_PER_FRAME]; PREDICT_BUFFER_FRAMES];
        for _ in 0..50 {
            engine.on_audio(&silent);
        }
        // Give the worker a moment; there is nothing for it to pick up.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.queue_len(), 0);
        let state = engine.prediction_state();
        assert!(state.lock().unwrap().predicted.is_none());
        assert_eq!(engine.background_mean(), 0.0);
    }

    #[test]
    fn live_queue_never_exceeds_its_cap() {
        let mut engine = trained_engine();
        // A spiky buffer that always yields one candidate position.
        let mut frames = vec![[0.0f32; SAMPLES_PER_FRAME]; PREDICT_BUFFER_FRAMES];
        frames[4][0] = 1.0;
        for _ in 0..100 {
            engine.on_audio(&frames);
            assert!(engine.queue_len() <= MAX_QUEUE_ITEMS);
        }
        // The worker eventually drains whatever survived the drops.
        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        while engine.queue_len() > 0 {
            assert!(
                std::time::Instant::now() < deadline,
                "queue never drained: {} left",
                engine.queue_len()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }
}
