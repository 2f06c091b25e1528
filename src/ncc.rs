//! Normalized cross-correlation between key waveforms.
//!
//! The kernel compares a fixed, center-anchored window of one waveform
//! against a sliding window of another and reports the offset where the
//! Pearson correlation peaks. This is the inner loop of both training
//! (pairing recordings of the same key) and prediction (matching a live
//! buffer against every prototype).

use std::thread;

/// Sum and sum-of-squares over `waveform[is0..is1]`, computed once per
/// search so the fixed window is not re-accumulated for every offset.
fn calc_sum(waveform: &[f32], is0: usize, is1: usize) -> (f64, f64) {
    let mut sum = 0.0f64;
    let mut sum2 = 0.0f64;
    for &a in &waveform[is0..is1] {
        let a = a as f64;
        sum += a;
        sum2 += a * a;
    }
    (sum, sum2)
}

/// Pearson correlation of `is1 - is0` paired samples, with the sums of
/// `waveform0`'s window precomputed. A flat window (non-positive
/// denominator) or a non-finite result comes back as −1.
fn calc_cc(
    waveform0: &[f32],
    waveform1: &[f32],
    sum0: f64,
    sum02: f64,
    is00: usize,
    is0: usize,
    is1: usize,
) -> f64 {
    let n = is1 - is0;
    let mut sum1 = 0.0f64;
    let mut sum12 = 0.0f64;
    let mut sum01 = 0.0f64;
    for is in 0..n {
        let a0 = waveform0[is00 + is] as f64;
        let a1 = waveform1[is0 + is] as f64;
        sum1 += a1;
        sum12 += a1 * a1;
        sum01 += a0 * a1;
    }

    let n = n as f64;
    let nom = sum01 * n - sum0 * sum1;
    let den2a = sum02 * n - sum0 * sum0;
    let den2b = sum12 * n - sum1 * sum1;
    if den2a <= 0.0 || den2b <= 0.0 {
        return -1.0;
    }
    let cc = nom / (den2a * den2b).sqrt();
    if cc.is_finite() {
        cc
    } else {
        -1.0
    }
}

/// Best correlation of `waveform0`'s center window against
/// `waveform1[is0+o .. is1+o]` over every offset `o` in
/// `[-align_window, align_window)`, returned as `(cc, offset)`.
///
/// Offsets are striped across one scanner thread per available core; each
/// scanner keeps its local best and the reduction prefers the earliest
/// offset in scan order on ties. Callers must keep `is0 - align_window`
/// and `is1 + align_window` inside `waveform1`.
pub fn find_best_cc(
    waveform0: &[f32],
    waveform1: &[f32],
    is0: usize,
    is1: usize,
    align_window: usize,
) -> (f64, i32) {
    let n = is1 - is0;
    let is00 = waveform0.len() / 2 - n / 2;
    let (sum0, sum02) = calc_sum(waveform0, is00, is00 + n);

    let n_workers = thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    let aw = align_window as i32;

    let mut locals: Vec<(f64, i32)> = Vec::with_capacity(n_workers);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..n_workers)
            .map(|w| {
                scope.spawn(move || {
                    let mut best_cc = -1.0f64;
                    let mut best_o = -1i32;
                    let mut o = -aw + w as i32;
                    while o < aw {
                        let cc = calc_cc(
                            waveform0,
                            waveform1,
                            sum0,
                            sum02,
                            is00,
                            (is0 as i64 + o as i64) as usize,
                            (is1 as i64 + o as i64) as usize,
                        );
                        if cc > best_cc {
                            best_cc = cc;
                            best_o = o;
                        }
                        o += n_workers as i32;
                    }
                    (best_cc, best_o)
                })
            })
            .collect();
        for handle in handles {
            if let Ok(local) = handle.join() {
                locals.push(local);
            }
        }
    });

    let mut best = (-1.0f64, -1i32);
    for (cc, o) in locals {
        if cc > best.0 || (cc == best.0 && o < best.1) {
            best = (cc, o);
        }
    }
    best
}
