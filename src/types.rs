//! Shared aliases for the recognizer's data model.

use crate::constants::audio::SAMPLES_PER_FRAME;

/// Physical key identity: the ASCII code of the key.
pub type Key = i32;

/// One frame of mono samples as delivered by the capture side.
pub type Frame = [f32; SAMPLES_PER_FRAME];

/// One captured or averaged key sound, `SAMPLES_PER_WAVEFORM` samples long.
pub type Waveform = Vec<f32>;

/// Printable name for a key in status lines.
pub fn key_label(key: Key) -> String {
    match key {
        9 => "Tab".to_string(),
        10 | 13 => "Enter".to_string(),
        27 => "Esc".to_string(),
        32 => "Space".to_string(),
        127 => "Backspace".to_string(),
        33..=126 => char::from_u32(key as u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| format!("#{key}")),
        _ => format!("#{key}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_keys_use_their_glyph() {
        assert_eq!(key_label(b'a' as Key), "a");
        assert_eq!(key_label(b'/' as Key), "/");
    }

    #[test]
    fn special_keys_get_names() {
        assert_eq!(key_label(32), "Space");
        assert_eq!(key_label(13), "Enter");
        assert_eq!(key_label(-1), "#-1");
    }
}
