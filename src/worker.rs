//! Work queue and the background classification thread.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::classifier::{Classifier, PredictionState};
use crate::constants::worker::IDLE_POLL_MS;
use crate::types::{key_label, Key, Waveform};

/// A capture buffer plus the candidate positions detected inside it.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub ampl: Vec<f32>,
    pub positions: Vec<usize>,
}

/// FIFO of pending work, shared between the detection side and the worker.
/// One mutex guards it; nothing else is ever locked while holding it.
#[derive(Clone, Default)]
pub struct WorkQueue {
    inner: Arc<Mutex<VecDeque<WorkItem>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: WorkItem) {
        self.lock().push_back(item);
    }

    /// Push an item, then drop the oldest entries until at most `max`
    /// remain. Returns how many were dropped.
    pub fn push_bounded(&self, item: WorkItem, max: usize) -> usize {
        let mut queue = self.lock();
        queue.push_back(item);
        let mut dropped = 0;
        while queue.len() > max {
            queue.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn pop(&self) -> Option<WorkItem> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to the single consumer thread that classifies queued work.
pub struct ClassifyWorker {
    handle: Option<thread::JoinHandle<()>>,
    finish: Arc<AtomicBool>,
}

impl ClassifyWorker {
    /// Start the worker. It polls the queue, classifies every candidate
    /// position of each item in order, and publishes fired predictions
    /// into `state`.
    pub fn spawn(
        queue: WorkQueue,
        prototypes: Arc<BTreeMap<Key, Waveform>>,
        threshold_cc: f64,
        state: Arc<Mutex<PredictionState>>,
    ) -> Self {
        let finish = Arc::new(AtomicBool::new(false));
        let finish_flag = finish.clone();
        let handle = thread::spawn(move || {
            let mut classifier = Classifier::new(prototypes, threshold_cc);
            while !finish_flag.load(Ordering::Relaxed) {
                let Some(item) = queue.pop() else {
                    thread::sleep(Duration::from_millis(IDLE_POLL_MS));
                    continue;
                };
                for &pos in &item.positions {
                    if let Some(update) = classifier.classify(&item.ampl, pos) {
                        println!(
                            "    Prediction: '{}'        ({:.5})",
                            key_label(update.prediction.key),
                            update.prediction.cc
                        );
                        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
                        guard.apply(update);
                    }
                }
            }
        });
        Self {
            handle: Some(handle),
            finish,
        }
    }

    /// Ask the worker to exit and wait for it. The current item finishes;
    /// nothing else is picked up.
    pub fn shutdown(&mut self) {
        self.finish.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ClassifyWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
