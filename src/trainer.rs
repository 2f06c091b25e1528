//! Builds one prototype waveform per key from its labeled recordings.
//!
//! Training runs in five steps per key: center every recording on its
//! loudest sample, correlate all pairs, pick the anchor recording the rest
//! agree with most, shift everything onto the anchor, and average with
//! correlation-squared weights. Keys whose recordings never cohere are
//! reported and left out of the prototype map.

use std::collections::BTreeMap;

use crate::constants::audio::{SAMPLES_PER_FRAME, SAMPLES_PER_WAVEFORM};
use crate::constants::trainer::{ALIGN_WINDOW, MAX_ANCHOR_OFFSET, MIN_AVERAGE_CC, MIN_RECORDINGS};
use crate::ncc::find_best_cc;
use crate::types::{key_label, Key, Waveform};

/// Per-key summary of how training went.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainStats {
    /// Recordings that sat within the anchor's offset cutoff.
    pub waveforms_used: usize,
    pub waveforms_total: usize,
    /// Root-mean-square pairwise correlation against the chosen anchor.
    pub average_cc: f64,
}

/// Outcome of training every collected key.
pub struct TrainedModel {
    pub prototypes: BTreeMap<Key, Waveform>,
    pub stats: BTreeMap<Key, TrainStats>,
    pub failed: Vec<Key>,
}

struct KeyTraining {
    prototype: Waveform,
    stats: TrainStats,
    accepted: bool,
}

/// Train every key in `histories` and normalize the surviving prototypes to
/// a common peak amplitude so their scores stay comparable.
pub fn train_all(histories: &BTreeMap<Key, Vec<Waveform>>) -> TrainedModel {
    println!("🎹 Training {} keys", histories.len());

    let mut prototypes = BTreeMap::new();
    let mut stats = BTreeMap::new();
    let mut failed = Vec::new();

    for (&key, recordings) in histories {
        if recordings.len() < MIN_RECORDINGS {
            println!(
                "    - Key '{}' has only {} recordings, need at least {}",
                key_label(key),
                recordings.len(),
                MIN_RECORDINGS
            );
            failed.push(key);
            continue;
        }

        let outcome = train_key(key, recordings);
        stats.insert(key, outcome.stats);
        if outcome.accepted {
            prototypes.insert(key, outcome.prototype);
        } else {
            failed.push(key);
        }
    }

    normalize_prototypes(&mut prototypes);

    if failed.is_empty() {
        println!("✅ All {} keys trained", prototypes.len());
    } else {
        let names: Vec<String> = failed.iter().map(|&k| key_label(k)).collect();
        println!("⚠️  Failed to train: {}", names.join(" "));
    }

    TrainedModel {
        prototypes,
        stats,
        failed,
    }
}

fn train_key(key: Key, recordings: &[Waveform]) -> KeyTraining {
    let n_waveforms = recordings.len();
    println!("    - Training key '{}'", key_label(key));
    println!("    - History size = {n_waveforms} waveforms");
    println!(
        "    - Total samples available = {}",
        n_waveforms * SAMPLES_PER_WAVEFORM
    );

    // Step 1: center each recording on its strongest sample. The
    // center-of-energy estimate is computed alongside for reporting only;
    // it spreads much wider on noisy captures.
    let (peaks_max, peaks_sum) = estimate_peaks(recordings);
    println!(
        "    - Peak stdev: {:.1} (max) vs {:.1} (sum), using 'max'",
        stdev(&peaks_max),
        stdev(&peaks_sum)
    );

    let center = SAMPLES_PER_WAVEFORM / 2;
    let mut aligned: Vec<Waveform> = recordings
        .iter()
        .zip(&peaks_max)
        .map(|(waveform, &peak)| shift_waveform(waveform, peak as i32 - center as i32))
        .collect();

    // Step 2: correlate every pair around the shared center window.
    let is0 = center - SAMPLES_PER_FRAME;
    let is1 = center + SAMPLES_PER_FRAME;
    let mut ccs = vec![vec![(1.0f64, 0i32); n_waveforms]; n_waveforms];
    for i in 0..n_waveforms {
        for j in (i + 1)..n_waveforms {
            let (cc, offset) = find_best_cc(&aligned[i], &aligned[j], is0, is1, ALIGN_WINDOW);
            ccs[j][i] = (cc, offset);
            ccs[i][j] = (cc, -offset);
        }
    }

    // Step 3: the anchor is the recording with the highest total squared
    // correlation among partners within the offset cutoff.
    let mut best_anchor = 0usize;
    let mut best_ccsum = -1.0f64;
    let mut best_ntrain = 0usize;
    for anchor in 0..n_waveforms {
        let mut ccsum = 0.0f64;
        let mut ntrain = 0usize;
        for j in 0..n_waveforms {
            let (cc, offset) = ccs[j][anchor];
            if offset.abs() > MAX_ANCHOR_OFFSET {
                continue;
            }
            ntrain += 1;
            ccsum += cc * cc;
        }
        if ccsum > best_ccsum {
            best_anchor = anchor;
            best_ccsum = ccsum;
            best_ntrain = ntrain;
        }
    }
    let average_cc = (best_ccsum / best_ntrain as f64).sqrt();
    println!(
        "    - Aligning all waveforms to waveform {best_anchor} (average cc = {average_cc:.4})"
    );

    // Step 4: shift everything onto the anchor; the anchor stays untouched.
    for j in 0..n_waveforms {
        if j == best_anchor {
            continue;
        }
        let (_, offset) = ccs[j][best_anchor];
        aligned[j] = shift_waveform(&aligned[j], offset);
    }

    #[cfg(feature = "waveform-plots")]
    dump_plot(
        &format!("waveform_one_{key}.plot"),
        &aligned.iter().map(|w| w.as_slice()).collect::<Vec<_>>(),
    );

    // Step 5: correlation-squared weighted average over all recordings,
    // the anchor included at weight 1.
    let mut acc = vec![0.0f64; SAMPLES_PER_WAVEFORM];
    let mut norm = 0.0f64;
    for j in 0..n_waveforms {
        let (cc, _) = ccs[j][best_anchor];
        let weight = cc * cc;
        norm += weight;
        for (a, &s) in acc.iter_mut().zip(aligned[j].iter()) {
            *a += weight * s as f64;
        }
    }
    let prototype: Waveform = acc.iter().map(|&a| (a / norm) as f32).collect();

    #[cfg(feature = "waveform-plots")]
    dump_plot(&format!("waveform_avg_{key}.plot"), &[&prototype]);

    // The effective recording count is the sum of squared correlations; a
    // key whose recordings never cohere is rejected.
    let accepted = average_cc >= MIN_AVERAGE_CC && norm >= n_waveforms as f64 / 3.0;

    KeyTraining {
        prototype,
        stats: TrainStats {
            waveforms_used: best_ntrain,
            waveforms_total: n_waveforms,
            average_cc,
        },
        accepted,
    }
}

/// Peak position of each recording by the `max` estimate (loudest sample)
/// and the `sum` estimate (center of energy).
fn estimate_peaks(recordings: &[Waveform]) -> (Vec<usize>, Vec<usize>) {
    let mut by_max = Vec::with_capacity(recordings.len());
    let mut by_sum = Vec::with_capacity(recordings.len());
    for waveform in recordings {
        let mut asum = 0.0f64;
        let mut aisum = 0.0f64;
        let mut imax = 0usize;
        let mut amax = 0.0f64;
        for (i, &s) in waveform.iter().enumerate() {
            let a = s.abs() as f64;
            let a2 = a * a;
            asum += a2;
            aisum += a2 * i as f64;
            if a > amax {
                amax = a;
                imax = i;
            }
        }
        by_max.push(imax);
        by_sum.push(if asum > 0.0 {
            (aisum / asum) as usize
        } else {
            waveform.len() / 2
        });
    }
    (by_max, by_sum)
}

fn stdev(data: &[usize]) -> f64 {
    let n = data.len() as f64;
    let mut sum = 0.0f64;
    let mut sum2 = 0.0f64;
    for &p in data {
        let p = p as f64;
        sum += p;
        sum2 += p * p;
    }
    sum /= n;
    sum2 /= n;
    (sum2 - sum * sum).max(0.0).sqrt()
}

/// `shifted[i] = waveform[i + offset]`, zero outside the original range.
/// The valid span is computed once and copied as a slice.
fn shift_waveform(waveform: &[f32], offset: i32) -> Waveform {
    let len = waveform.len();
    let mut shifted = vec![0.0f32; len];
    let dst_begin = (-offset).max(0) as usize;
    let dst_end = (len as i32 - offset).clamp(0, len as i32) as usize;
    if dst_begin < dst_end {
        let src_begin = (dst_begin as i32 + offset) as usize;
        shifted[dst_begin..dst_end]
            .copy_from_slice(&waveform[src_begin..src_begin + (dst_end - dst_begin)]);
    }
    shifted
}

/// Rescale every prototype so its absolute peak matches the loudest one;
/// per-key loudness then no longer skews classification scores.
fn normalize_prototypes(prototypes: &mut BTreeMap<Key, Waveform>) {
    let ampl_max = prototypes
        .values()
        .flatten()
        .fold(0.0f32, |m, &v| m.max(v.abs()));
    if ampl_max <= 0.0 {
        return;
    }
    for prototype in prototypes.values_mut() {
        let cur_max = prototype.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        if cur_max <= 0.0 {
            continue;
        }
        let scale = ampl_max / cur_max;
        for v in prototype.iter_mut() {
            *v *= scale;
        }
    }
}

#[cfg(feature = "waveform-plots")]
fn dump_plot(path: &str, waveforms: &[&[f32]]) {
    use std::io::Write;
    let Ok(file) = std::fs::File::create(path) else {
        eprintln!("⚠️  Could not create {path}");
        return;
    };
    let mut out = std::io::BufWriter::new(file);
    for waveform in waveforms {
        for v in *waveform {
            let _ = writeln!(out, "{v}");
        }
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::audio::SAMPLES_PER_WAVEFORM;

    /// Hann-windowed sine burst: a clean stand-in for a key click with an
    /// unambiguous amplitude peak at the burst center.
    fn burst_waveform(freq_hz: f32, start: usize, noise_seed: u64) -> Waveform {
        let mut waveform = vec![0.0f32; SAMPLES_PER_WAVEFORM];
        let len = 600usize;
        for i in 0..len {
            let idx = start + i;
            if idx >= waveform.len() {
                break;
            }
            let t = idx as f32 / 24_000.0;
            let window = (std::f32::consts::PI * i as f32 / len as f32).sin().powi(2);
            waveform[idx] = window * (2.0 * std::f32::consts::PI * freq_hz * t).sin();
        }
        let mut rng = noise_seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
        for v in waveform.iter_mut() {
            rng = rng.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
            let uniform = (rng >> 40) as f32 / (1u64 << 24) as f32 - 0.5;
            *v += 0.01 * uniform;
        }
        waveform
    }

    fn history(freq_hz: f32, count: usize) -> Vec<Waveform> {
        (0..count)
            .map(|i| burst_waveform(freq_hz, 1000 + 7 * i, i as u64 + 1))
            .collect()
    }

    #[test]
    fn coherent_recordings_train_with_high_average_cc() {
        let mut histories = BTreeMap::new();
        histories.insert(b'a' as Key, history(2_000.0, 5));
        let model = train_all(&histories);

        assert!(model.failed.is_empty());
        let stats = model.stats[&(b'a' as Key)];
        assert!(stats.average_cc >= 0.95, "average cc = {}", stats.average_cc);
        assert_eq!(stats.waveforms_total, 5);

        // Peak centering puts the prototype's maximum at the waveform middle.
        let prototype = &model.prototypes[&(b'a' as Key)];
        let peak = prototype
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        let center = SAMPLES_PER_WAVEFORM / 2;
        assert!(
            peak.abs_diff(center) <= 8,
            "prototype peak at {peak}, expected near {center}"
        );
    }

    #[test]
    fn prototype_correlates_with_its_inputs() {
        let recordings = history(2_000.0, 5);
        let mut histories = BTreeMap::new();
        histories.insert(b'a' as Key, recordings.clone());
        let model = train_all(&histories);

        let prototype = &model.prototypes[&(b'a' as Key)];
        let stats = model.stats[&(b'a' as Key)];
        let center = SAMPLES_PER_WAVEFORM / 2;
        for recording in &recordings {
            // Center each input the way training does before comparing.
            let peak = recording
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .map(|(i, _)| i)
                .unwrap();
            let centered = shift_waveform(recording, peak as i32 - center as i32);
            let (cc, _) = find_best_cc(
                prototype,
                &centered,
                center - SAMPLES_PER_FRAME,
                center + SAMPLES_PER_FRAME,
                ALIGN_WINDOW,
            );
            assert!(
                cc >= stats.average_cc - 0.05,
                "cc = {cc}, average = {}",
                stats.average_cc
            );
        }
    }

    #[test]
    fn too_few_recordings_fail_without_a_prototype() {
        let mut histories = BTreeMap::new();
        histories.insert(b'a' as Key, history(2_000.0, 5));
        histories.insert(b'b' as Key, history(4_000.0, 2));
        let model = train_all(&histories);

        assert_eq!(model.failed, vec![b'b' as Key]);
        assert!(model.prototypes.contains_key(&(b'a' as Key)));
        assert!(!model.prototypes.contains_key(&(b'b' as Key)));
        assert!(!model.stats.contains_key(&(b'b' as Key)));
    }

    #[test]
    fn prototypes_share_one_peak_amplitude() {
        let quiet: Vec<Waveform> = history(2_000.0, 4)
            .into_iter()
            .map(|w| w.iter().map(|&v| v * 0.2).collect())
            .collect();
        let mut histories = BTreeMap::new();
        histories.insert(b'a' as Key, history(3_000.0, 4));
        histories.insert(b'b' as Key, quiet);
        let model = train_all(&histories);

        let peaks: Vec<f32> = model
            .prototypes
            .values()
            .map(|p| p.iter().fold(0.0f32, |m, &v| m.max(v.abs())))
            .collect();
        assert_eq!(peaks.len(), 2);
        assert!(
            (peaks[0] - peaks[1]).abs() < 1e-4,
            "peaks differ: {peaks:?}"
        );
    }

    #[test]
    fn shift_pads_with_zeros() {
        let waveform: Waveform = (0..8).map(|i| i as f32).collect();
        assert_eq!(
            shift_waveform(&waveform, 3),
            vec![3.0, 4.0, 5.0, 6.0, 7.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(
            shift_waveform(&waveform, -2),
            vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
        );
        assert_eq!(shift_waveform(&waveform, 0), waveform);
        assert_eq!(shift_waveform(&waveform, 100), vec![0.0; 8]);
    }
}
