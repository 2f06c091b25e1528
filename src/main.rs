use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use keysound::audio::AudioCapture;
use keysound::config::Config;
use keysound::constants::audio::{PREDICT_BUFFER_MS, SAMPLE_RATE};
use keysound::engine::Engine;
use keysound::kbd::TrainingReader;
use keysound::types::key_label;

const EXIT_BAD_HEADER: i32 = -1;
const EXIT_FILE_OPEN: i32 = -2;
const EXIT_NO_INPUT: i32 = -127;

/// Guess which key was pressed from the sound it makes: train per-key
/// templates from labeled captures, then classify keystrokes heard on the
/// microphone or in a replayed recording.
#[derive(Parser)]
#[command(name = "keysound", version, about)]
struct Args {
    /// Labeled training captures, consumed in order.
    #[arg(value_name = "INPUT.kbd")]
    inputs: Vec<PathBuf>,

    /// Replay a raw audio capture before listening to the microphone.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Keep feeding replay buffers without waiting for the queue to drain.
    #[arg(long)]
    no_replay_wait: bool,

    /// Minimum prediction correlation, 0.1-1.0 (overrides the config file).
    #[arg(long, value_name = "CC")]
    threshold_cc: Option<f64>,

    /// Keystroke threshold as a multiple of the background level, 0.1-300
    /// (overrides the config file).
    #[arg(long, value_name = "MULT")]
    threshold_background: Option<f32>,

    /// Capture device name (overrides the config file).
    #[arg(long, value_name = "NAME")]
    device: Option<String>,
}

fn main() {
    let args = Args::parse();
    if args.inputs.is_empty() {
        eprintln!("Usage: keysound input.kbd [input2.kbd ...]");
        process::exit(EXIT_NO_INPUT);
    }

    let mut config = Config::load_or_create().unwrap_or_else(|err| {
        eprintln!("⚠️  Failed to load config ({err:#}), using defaults");
        Config::default()
    });
    if let Some(cc) = args.threshold_cc {
        config.detection.threshold_cc = cc;
    }
    if let Some(background) = args.threshold_background {
        config.detection.threshold_background = background;
    }
    if args.device.is_some() {
        config.capture.input_device = args.device.clone();
    }
    config.clamp_thresholds();

    let mut engine = Engine::new(
        config.detection.threshold_cc,
        config.detection.threshold_background,
    );

    println!("📥 Collecting training data");
    for path in &args.inputs {
        println!("Opening file '{}'", path.display());
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("Failed to open input file '{}': {err}", path.display());
                process::exit(EXIT_FILE_OPEN);
            }
        };
        let mut reader = match TrainingReader::new(file, path) {
            Ok(reader) => reader,
            Err(err) => {
                eprintln!("❌ {err:#}");
                process::exit(EXIT_BAD_HEADER);
            }
        };
        read_training_records(&mut reader, path, &mut engine);
    }

    if let Err(err) = run(engine, &args, &config) {
        eprintln!("❌ {err:#}");
        process::exit(1);
    }
}

/// Feed every record of one training file into the engine, echoing the key
/// labels as they stream past. A malformed tail skips the rest of the file
/// rather than aborting the whole run.
fn read_training_records(reader: &mut TrainingReader, path: &Path, engine: &mut Engine) {
    let mut records = 0usize;
    loop {
        match reader.read_record() {
            Ok(Some((key, frames))) => {
                records += 1;
                match char::from_u32(key as u32).filter(|c| c.is_ascii_graphic()) {
                    Some(c) => print!("{c}"),
                    None => print!("·"),
                }
                let _ = std::io::stdout().flush();
                engine.add_training_record(key, &frames);
            }
            Ok(None) => break,
            Err(err) => {
                eprintln!("\n⚠️  Skipping rest of '{}': {err:#}", path.display());
                break;
            }
        }
    }
    println!("\n    {records} records read");
}

fn run(mut engine: Engine, args: &Args, config: &Config) -> Result<()> {
    engine.train()?;
    report_training(&engine);

    // A replayed capture needs no microphone, so it runs before install.
    if let Some(replay) = &args.replay {
        engine.replay(replay, !args.no_replay_wait)?;
    }

    let engine = Arc::new(Mutex::new(engine));
    let cb_engine = engine.clone();
    let capture = AudioCapture::install(
        SAMPLE_RATE,
        config.capture.input_device.as_deref(),
        move |frames| {
            cb_engine
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .on_audio(frames);
        },
    )?;

    println!("🔮 Ready to predict. Keep pressing keys and the guesses below");
    println!("   will follow what the microphone hears.");
    capture.resume();

    loop {
        let want = engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_capture_request();
        if want {
            capture.record_sym(PREDICT_BUFFER_MS);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn report_training(engine: &Engine) {
    println!("📊 Training statistics");
    for (key, stats) in engine.train_stats() {
        println!(
            "    Key: {:>9}   Average CC: {:.6}   Waveforms: {:3} / {:3}",
            key_label(*key),
            stats.average_cc,
            stats.waveforms_used,
            stats.waveforms_total
        );
    }
    if !engine.failed_keys().is_empty() {
        let names: Vec<String> = engine
            .failed_keys()
            .iter()
            .map(|&k| key_label(k))
            .collect();
        println!("    Not trained: {}", names.join(" "));
    }
}
