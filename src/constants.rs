/// Application-wide constants for capture geometry, detection, and training

pub mod audio {
    /// Mono capture rate the whole pipeline is calibrated for.
    pub const SAMPLE_RATE: u32 = 24_000;

    /// Samples delivered per capture frame.
    pub const SAMPLES_PER_FRAME: usize = 1024;

    /// Length of one training capture, in milliseconds.
    pub const TRAIN_BUFFER_MS: u64 = 75;

    /// Length of one prediction capture, in milliseconds.
    pub const PREDICT_BUFFER_MS: u64 = 200;

    /// A capture of `duration_ms` is delivered as `2·ceil(samples/frame) − 1`
    /// frames so it can be centered on the request moment.
    pub const fn frames_for_duration(duration_ms: u64) -> usize {
        let samples = (SAMPLE_RATE as u64 * duration_ms / 1000) as usize;
        2 * ((samples + SAMPLES_PER_FRAME - 1) / SAMPLES_PER_FRAME) - 1
    }

    /// Frames per training buffer (3 at 24 kHz).
    pub const TRAIN_BUFFER_FRAMES: usize = frames_for_duration(TRAIN_BUFFER_MS);

    /// Frames per prediction buffer (9 at 24 kHz).
    pub const PREDICT_BUFFER_FRAMES: usize = frames_for_duration(PREDICT_BUFFER_MS);

    /// Samples in one stored key waveform.
    pub const SAMPLES_PER_WAVEFORM: usize = SAMPLES_PER_FRAME * TRAIN_BUFFER_FRAMES;
}

pub mod detector {
    /// Capacity of the rolling background-level ring.
    pub const RING_BUFFER_SIZE: usize = 131_072;

    /// Default multiplier over the background mean a sample must clear to
    /// count as a keystroke candidate.
    pub const DEFAULT_BACKGROUND_THRESHOLD: f32 = 10.0;
    pub const MIN_BACKGROUND_THRESHOLD: f32 = 0.1;
    pub const MAX_BACKGROUND_THRESHOLD: f32 = 300.0;
}

pub mod trainer {
    /// Half-width of the offset search while pairing training waveforms.
    pub const ALIGN_WINDOW: usize = 64;

    /// Pairs whose best offset lands beyond this many samples are left out
    /// of the anchor score.
    pub const MAX_ANCHOR_OFFSET: i32 = 50;

    /// A key needs at least this many recordings to train at all.
    pub const MIN_RECORDINGS: usize = 3;

    /// Keys whose average pairwise correlation ends up below this are
    /// rejected as too incoherent to predict.
    pub const MIN_AVERAGE_CC: f64 = 0.5;
}

pub mod classifier {
    /// Default correlation a candidate must beat to become a prediction.
    pub const DEFAULT_CC_THRESHOLD: f64 = 0.5;
    pub const MIN_CC_THRESHOLD: f64 = 0.1;
    pub const MAX_CC_THRESHOLD: f64 = 1.0;

    /// Runners-up scoring within this fraction of the winner share its
    /// history slot.
    pub const RUNNER_UP_RATIO: f64 = 0.9;

    /// Slots kept in the rolling prediction history.
    pub const HISTORY_SLOTS: usize = 24;
}

pub mod worker {
    /// Live-microphone cap on queued work items; the oldest items are
    /// dropped past this so classification stays near real time.
    pub const MAX_QUEUE_ITEMS: usize = 30;

    /// Replay pauses feeding new buffers while this many items are pending.
    pub const REPLAY_QUEUE_HIGH_WATER: usize = 3;

    /// Frames shared between consecutive replay buffers.
    pub const REPLAY_OVERLAP_FRAMES: usize = 5;

    /// Idle poll interval for the classification worker.
    pub const IDLE_POLL_MS: u64 = 1;
}
