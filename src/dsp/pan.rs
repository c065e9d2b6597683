use std::f32::consts::FRAC_PI_2;

/*
Equal-Power Stereo Panning
==========================

Panning a stereo signal never discards a channel; it folds one side into
the other. With pan p in [-1, 1]:

  p ≤ 0 (toward left)            p > 0 (toward right)
    x = p + 1                      x = p
    L' = L + R·cos(x·π/2)          L' = L·cos(x·π/2)
    R' = R·sin(x·π/2)              R' = R + L·sin(x·π/2)

At p = 0 both channels pass unchanged. At p = -1 the right channel is folded
entirely into the left. The sin/cos pair keeps total power constant as the
fold progresses.
*/

/// Pan one stereo frame.
#[inline]
pub fn pan_frame(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

/// Pan a stereo block in place, one pan value per frame.
pub fn pan_block(left: &mut [f32], right: &mut [f32], pan: &[f32]) {
    debug_assert_eq!(left.len(), right.len());
    debug_assert_eq!(left.len(), pan.len());

    for ((l, r), &p) in left.iter_mut().zip(right.iter_mut()).zip(pan.iter()) {
        let (nl, nr) = pan_frame(*l, *r, p);
        *l = nl;
        *r = nr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_is_passthrough() {
        let (l, r) = pan_frame(0.3, -0.6, 0.0);
        assert!((l - 0.3).abs() < 1e-6);
        assert!((r + 0.6).abs() < 1e-6);
    }

    #[test]
    fn hard_left_folds_right_into_left() {
        let (l, r) = pan_frame(0.5, 0.5, -1.0);
        assert!((l - 1.0).abs() < 1e-6);
        assert!(r.abs() < 1e-6);
    }

    #[test]
    fn hard_right_folds_left_into_right() {
        let (l, r) = pan_frame(0.5, 0.5, 1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_pan_is_clamped() {
        assert_eq!(pan_frame(0.5, 0.5, 7.0), pan_frame(0.5, 0.5, 1.0));
    }
}
