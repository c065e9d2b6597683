//! Buffer summing and gain helpers used by the graph's render loop.

/*
Summing Junctions
=================

Every graph input is a summing junction: when several nodes connect to the
same destination, their output blocks are ADDED before the destination
processes them. Nothing attenuates the sum, so ten voices at full scale can
reach ten times full scale at the master gain. The compressor and limiter
at the end of the master chain exist to catch exactly that.

    voice A  [ 0.8,  0.5]
    voice B  [ 0.6, -0.2]
    ─────────────────────
    master   [ 1.4,  0.3]   ← exceeds ±1.0 before the limiter

Gain stages multiply sample by sample, so an automated gain (an envelope,
a smoothed fader move) is just a second buffer of per-sample factors.
*/

/// Add signal B into signal A in place.
#[inline]
pub fn sum_in_place(a: &mut [f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());

    for (sa, &sb) in a.iter_mut().zip(b.iter()) {
        *sa += sb;
    }
}

/// Multiply a buffer by per-sample gain factors.
#[inline]
pub fn multiply_in_place(buffer: &mut [f32], gains: &[f32]) {
    debug_assert_eq!(buffer.len(), gains.len());

    for (s, &g) in buffer.iter_mut().zip(gains.iter()) {
        *s *= g;
    }
}

/// Multiply a buffer by a constant gain.
#[inline]
pub fn scale_in_place(buffer: &mut [f32], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for s in buffer.iter_mut() {
        *s *= gain;
    }
}
