//! Binary `.kbd` readers: labeled training captures and raw replay audio.
//!
//! Both formats are streams of little-endian `f32` samples. Training files
//! start with an `i32` frames-per-record header and interleave an `i32` key
//! code before each record; replay files are bare samples.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::constants::audio::{SAMPLES_PER_FRAME, TRAIN_BUFFER_FRAMES};
use crate::types::{Frame, Key};

/// Reader for labeled training captures.
#[derive(Debug)]
pub struct TrainingReader {
    reader: BufReader<File>,
    frames_per_record: usize,
}

impl TrainingReader {
    /// Wrap an already-opened file, validating that its header frame count
    /// matches this build's training buffer size.
    pub fn new(file: File, path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(file);
        let mut header = [0u8; 4];
        reader
            .read_exact(&mut header)
            .with_context(|| format!("failed to read header of '{}'", path.display()))?;
        let frames = i32::from_le_bytes(header);
        if frames != TRAIN_BUFFER_FRAMES as i32 {
            bail!(
                "buffer size in '{}' is {} frames, expected {}",
                path.display(),
                frames,
                TRAIN_BUFFER_FRAMES
            );
        }
        Ok(Self {
            reader,
            frames_per_record: frames as usize,
        })
    }

    /// Next `(key, frames)` record, or `None` at a clean end of file.
    pub fn read_record(&mut self) -> Result<Option<(Key, Vec<Frame>)>> {
        let mut key_bytes = [0u8; 4];
        if !read_exact_or_eof(&mut self.reader, &mut key_bytes)? {
            return Ok(None);
        }
        let key = i32::from_le_bytes(key_bytes);

        let mut frames = Vec::with_capacity(self.frames_per_record);
        for _ in 0..self.frames_per_record {
            match read_frame(&mut self.reader)? {
                Some(frame) => frames.push(frame),
                None => bail!("training record for key {key} is truncated"),
            }
        }
        Ok(Some((key, frames)))
    }
}

/// Reader for raw replay audio. A trailing partial frame is dropped.
pub struct ReplayReader {
    reader: BufReader<File>,
}

impl ReplayReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file '{}'", path.display()))?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Next full frame of samples, or `None` at end of file.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut bytes = [0u8; SAMPLES_PER_FRAME * 4];
        let mut filled = 0;
        while filled < bytes.len() {
            let n = self
                .reader
                .read(&mut bytes[filled..])
                .context("replay read failed")?;
            if n == 0 {
                return Ok(None);
            }
            filled += n;
        }
        Ok(Some(decode_frame(&bytes)))
    }
}

/// Fill `buf` completely, or report a clean EOF when no bytes were left.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).context("read failed")?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            bail!("unexpected end of file mid-record");
        }
        filled += n;
    }
    Ok(true)
}

fn read_frame(reader: &mut impl Read) -> Result<Option<Frame>> {
    let mut bytes = [0u8; SAMPLES_PER_FRAME * 4];
    if !read_exact_or_eof(reader, &mut bytes)? {
        return Ok(None);
    }
    Ok(Some(decode_frame(&bytes)))
}

fn decode_frame(bytes: &[u8]) -> Frame {
    let mut frame = [0.0f32; SAMPLES_PER_FRAME];
    for (sample, chunk) in frame.iter_mut().zip(bytes.chunks_exact(4)) {
        *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    frame
}
