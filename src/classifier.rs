//! Matches detected keystroke candidates against the trained prototypes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::audio::{SAMPLES_PER_FRAME, SAMPLES_PER_WAVEFORM};
use crate::constants::classifier::{HISTORY_SLOTS, RUNNER_UP_RATIO};
use crate::ncc::find_best_cc;
use crate::types::{Key, Waveform};

/// One emitted prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub key: Key,
    pub cc: f64,
}

/// Everything a fired prediction carries: the winner, the per-key scores
/// it beat, and a waveform snippet around the matched stroke.
#[derive(Debug, Clone)]
pub struct PredictionUpdate {
    pub prediction: Prediction,
    pub scores: BTreeMap<Key, f64>,
    pub snippet: Waveform,
}

/// State the worker publishes and the display side reads: the latest
/// prediction, per-key confidences relative to the winner, a rolling
/// history of winners with their strong runners-up, and the last matched
/// waveform snippet.
pub struct PredictionState {
    pub predicted: Option<Prediction>,
    pub confidence: BTreeMap<Key, f64>,
    pub confidence_display: BTreeMap<Key, f64>,
    pub history: Vec<Vec<Key>>,
    pub history_begin: usize,
    pub last_waveform: Waveform,
}

impl PredictionState {
    pub fn new() -> Self {
        Self {
            predicted: None,
            confidence: BTreeMap::new(),
            confidence_display: BTreeMap::new(),
            history: vec![Vec::new(); HISTORY_SLOTS],
            history_begin: 0,
            last_waveform: vec![0.0; SAMPLES_PER_WAVEFORM],
        }
    }

    /// Fold a worker update in; called with the state mutex held.
    pub fn apply(&mut self, update: PredictionUpdate) {
        let maxcc = update.prediction.cc;
        let winner = update.prediction.key;

        let slot = self.history_begin;
        self.history[slot].clear();
        self.history[slot].push(winner);
        for (&key, &cc) in &update.scores {
            let ratio = cc / maxcc;
            self.confidence.insert(key, ratio);
            self.confidence_display.insert(key, ratio.powi(4));
            if key != winner && ratio > RUNNER_UP_RATIO {
                self.history[slot].push(key);
            }
        }
        self.history_begin = (slot + 1) % HISTORY_SLOTS;

        self.predicted = Some(update.prediction);
        self.last_waveform = update.snippet;
    }
}

impl Default for PredictionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Scores candidate positions against an immutable prototype map.
///
/// Repeats of the exact same `(key, cc)` pair are swallowed so one
/// keystroke seen through several overlapping buffers only reports once.
pub struct Classifier {
    prototypes: Arc<BTreeMap<Key, Waveform>>,
    threshold_cc: f64,
    last: Option<Prediction>,
}

impl Classifier {
    pub fn new(prototypes: Arc<BTreeMap<Key, Waveform>>, threshold_cc: f64) -> Self {
        Self {
            prototypes,
            threshold_cc,
            last: None,
        }
    }

    /// Score `ampl` at candidate position `pos` against every prototype.
    /// Returns an update when the best score clears the threshold and
    /// differs from the previous prediction.
    pub fn classify(&mut self, ampl: &[f32], pos: usize) -> Option<PredictionUpdate> {
        let align_window = SAMPLES_PER_FRAME / 2;
        // The detector keeps candidates two frames away from either end;
        // anything else (hand-built work items) is skipped.
        if pos < SAMPLES_PER_FRAME + align_window
            || pos + SAMPLES_PER_FRAME + align_window > ampl.len()
        {
            return None;
        }
        let scmp0 = pos - SAMPLES_PER_FRAME;
        let scmp1 = pos + SAMPLES_PER_FRAME;

        let mut best: Option<(Key, f64, i32)> = None;
        let mut scores = BTreeMap::new();
        for (&key, prototype) in self.prototypes.iter() {
            let (cc, offset) = find_best_cc(prototype, ampl, scmp0, scmp1, align_window);
            scores.insert(key, cc);
            if best.map_or(true, |(_, best_cc, _)| cc > best_cc) {
                best = Some((key, cc, offset));
            }
        }
        let (key, maxcc, offset) = best?;

        if maxcc <= self.threshold_cc {
            return None;
        }
        let prediction = Prediction { key, cc: maxcc };
        let changed = self.last != Some(prediction);
        self.last = Some(prediction);
        if !changed {
            return None;
        }

        Some(PredictionUpdate {
            prediction,
            scores,
            snippet: capture_snippet(ampl, pos, offset),
        })
    }
}

/// Waveform-sized snippet of `ampl` centered on the matched stroke;
/// samples outside the buffer are zero-filled.
fn capture_snippet(ampl: &[f32], pos: usize, offset: i32) -> Waveform {
    let center = pos as i64 + offset as i64;
    let half = (SAMPLES_PER_WAVEFORM / 2) as i64;
    let mut snippet = vec![0.0f32; SAMPLES_PER_WAVEFORM];
    for (i, slot) in snippet.iter_mut().enumerate() {
        let idx = center - half + i as i64;
        if idx >= 0 && (idx as usize) < ampl.len() {
            *slot = ampl[idx as usize];
        }
    }
    snippet
}
