//! Sample-accurate parameter automation.

/*
Parameter Automation
====================

Every continuously variable control in the graph (gain, pan, delay time,
filter cutoff, dynamics thresholds) is an `AudioParam`. Instead of jumping
to a new value, callers schedule changes against the audio clock and the
param evaluates its timeline once per sample while rendering.

Vocabulary
----------

  event         One scheduled change, anchored at an absolute audio-clock
                time (seconds).

  anchor        The (time, value) pair where the previous event finished.
                Linear ramps interpolate from the anchor to their target.

  time constant How quickly a set-target event approaches its target. After
                one time constant the remaining distance has shrunk to 1/e
                (about 37%), after five it is below 1%.


Event Kinds
-----------

  SetValue      value jumps at `time`

  LinearRamp    value moves in a straight line from the anchor, reaching
                `value` exactly at `time`

  SetTarget     starting at `time`, value decays exponentially toward
                `target`:

                    v(t) = target + (v0 - target) * e^(-(t - time) / tc)

                This is the click-free way to "move to a new value" and is
                what the router and master bus use for every UI change. It
                stays in effect until the next event begins.


  value
    peak ┤      ╱╲
         │     ╱  ╲______________
  sustain┤    ╱                  ╲_
         │   ╱                     ╲__
       0 ┼──╱─────────────────────────╲___──→ t
           Set  Ramp   Ramp         SetTarget
           (0)  (peak) (sustain)    (0, release)

A synth envelope is just four events on the gain param.
*/

#[derive(Debug, Clone, Copy, PartialEq)]
enum Automation {
    SetValue {
        time: f64,
        value: f32,
    },
    LinearRamp {
        time: f64,
        value: f32,
    },
    SetTarget {
        time: f64,
        target: f32,
        time_constant: f64,
        /// Value in effect when the event began, captured lazily
        from: Option<f32>,
    },
}

impl Automation {
    fn time(&self) -> f64 {
        match *self {
            Automation::SetValue { time, .. }
            | Automation::LinearRamp { time, .. }
            | Automation::SetTarget { time, .. } => time,
        }
    }
}

/// An automatable control value evaluated against the audio clock.
#[derive(Debug, Clone)]
pub struct AudioParam {
    value: f32,
    min: f32,
    max: f32,
    events: Vec<Automation>,
    anchor_time: f64,
    anchor_value: f32,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self::with_range(value, f32::MIN, f32::MAX)
    }

    pub fn with_range(value: f32, min: f32, max: f32) -> Self {
        let value = value.clamp(min, max);
        Self {
            value,
            min,
            max,
            events: Vec::new(),
            anchor_time: 0.0,
            anchor_value: value,
        }
    }

    /// The most recently computed value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Final value the timeline settles on once every event has run.
    pub fn target(&self) -> f32 {
        match self.events.last() {
            Some(Automation::SetValue { value, .. }) | Some(Automation::LinearRamp { value, .. }) => {
                *value
            }
            Some(Automation::SetTarget { target, .. }) => *target,
            None => self.value,
        }
    }

    /// Jump immediately, discarding all scheduled events.
    pub fn set_value(&mut self, value: f32) {
        let value = value.clamp(self.min, self.max);
        self.events.clear();
        self.value = value;
        self.anchor_value = value;
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation::SetValue { time, value: value.clamp(self.min, self.max) });
    }

    /// Ramp from the previous event's end point. Schedule a set-value first
    /// when the param has no earlier event on its timeline.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation::LinearRamp { time, value: value.clamp(self.min, self.max) });
    }

    /// Approach `target` exponentially from `start`. A non-positive time
    /// constant degrades to a plain set-value.
    pub fn set_target_at_time(&mut self, target: f32, start: f64, time_constant: f64) {
        let target = target.clamp(self.min, self.max);
        if time_constant <= 0.0 || !time_constant.is_finite() {
            self.set_value_at_time(target, start);
            return;
        }
        self.insert(Automation::SetTarget {
            time: start,
            target,
            time_constant,
            from: None,
        });
    }

    /// Drop every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// True when no automation is pending.
    pub fn is_static(&self) -> bool {
        self.events.is_empty()
    }

    fn insert(&mut self, event: Automation) {
        let time = event.time();
        let index = self.events.partition_point(|e| e.time() <= time);
        self.events.insert(index, event);
    }

    /// Evaluate the timeline at `time`, consuming events that have finished.
    ///
    /// Must be called with non-decreasing times.
    pub fn value_at(&mut self, time: f64) -> f32 {
        loop {
            let Some(&event) = self.events.first() else {
                self.value = self.anchor_value;
                break;
            };

            match event {
                Automation::SetValue { time: at, value } => {
                    if time < at {
                        self.value = self.anchor_value;
                        break;
                    }
                    self.finish_event(at, value);
                }
                Automation::LinearRamp { time: at, value } => {
                    if time >= at {
                        self.finish_event(at, value);
                        continue;
                    }
                    let span = at - self.anchor_time;
                    self.value = if span <= 0.0 {
                        value
                    } else {
                        let progress = ((time - self.anchor_time) / span).clamp(0.0, 1.0) as f32;
                        self.anchor_value + (value - self.anchor_value) * progress
                    };
                    break;
                }
                Automation::SetTarget {
                    time: at,
                    target,
                    time_constant,
                    from,
                } => {
                    if time < at {
                        self.value = self.anchor_value;
                        break;
                    }
                    let from = match from {
                        Some(v) => v,
                        None => {
                            let v = self.anchor_value;
                            if let Some(Automation::SetTarget { from, .. }) = self.events.first_mut() {
                                *from = Some(v);
                            }
                            v
                        }
                    };
                    let curve = |t: f64| {
                        let decay = (-(t - at) / time_constant).exp() as f32;
                        target + (from - target) * decay
                    };

                    // Superseded once the following event begins
                    if let Some(next_time) = self.events.get(1).map(Automation::time) {
                        if time >= next_time {
                            self.finish_event(next_time.max(at), curve(next_time.max(at)));
                            continue;
                        }
                    }

                    self.value = curve(time);
                    break;
                }
            }
        }

        self.value = self.value.clamp(self.min, self.max);
        self.value
    }

    fn finish_event(&mut self, time: f64, value: f32) {
        self.events.remove(0);
        self.anchor_time = time;
        self.anchor_value = value;
        self.value = value;
    }

    /// Fill `out` with per-sample values starting at `start_time`.
    pub fn fill(&mut self, out: &mut [f32], start_time: f64, sample_rate: f32) {
        if self.events.is_empty() {
            out.fill(self.anchor_value.clamp(self.min, self.max));
            self.value = self.anchor_value;
            return;
        }
        let dt = 1.0 / sample_rate as f64;
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = self.value_at(start_time + i as f64 * dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_param_holds_value() {
        let mut p = AudioParam::new(0.5);
        assert_eq!(p.value_at(0.0), 0.5);
        assert_eq!(p.value_at(10.0), 0.5);
        assert!(p.is_static());
    }

    #[test]
    fn repeated_glides_on_a_stopped_clock_replace_each_other() {
        let mut p = AudioParam::new(0.0);
        p.set_target_at_time(1.0, 0.0, 0.01);
        p.value_at(0.5);
        // Clock frozen at 0.5, as while the context is suspended
        for i in 0..100 {
            p.cancel_scheduled_values(0.5);
            p.set_target_at_time(i as f32 / 100.0, 0.5, 0.01);
        }
        assert!(p.events.len() <= 2, "timeline grew to {}", p.events.len());
        assert_eq!(p.target(), 0.99);
    }

    #[test]
    fn set_value_at_time_waits_for_time() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(1.0, 0.5);
        assert_eq!(p.value_at(0.25), 0.0);
        assert_eq!(p.value_at(0.5), 1.0);
        assert!(p.is_static());
    }

    #[test]
    fn linear_ramp_interpolates_from_previous_event() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 1.0);
        p.linear_ramp_to_value_at_time(1.0, 2.0);
        assert_eq!(p.value_at(1.0), 0.0);
        assert!((p.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(p.value_at(2.0), 1.0);
        assert_eq!(p.value_at(3.0), 1.0);
    }

    #[test]
    fn set_target_decays_exponentially() {
        let mut p = AudioParam::new(1.0);
        p.set_target_at_time(0.0, 0.0, 0.1);
        let after_one_tc = p.value_at(0.1);
        assert!((after_one_tc - (-1.0f32).exp()).abs() < 1e-4, "got {after_one_tc}");
        let later = p.value_at(2.0);
        assert!(later < 1e-6);
        assert_eq!(p.target(), 0.0);
    }

    #[test]
    fn set_target_hands_over_to_next_event() {
        let mut p = AudioParam::new(1.0);
        p.set_target_at_time(0.0, 0.0, 0.1);
        p.linear_ramp_to_value_at_time(1.0, 1.0);
        p.set_value_at_time(0.25, 0.5);
        // The set-value at 0.5s ends the target curve and anchors the ramp
        let at_half = p.value_at(0.5);
        assert!((at_half - 0.25).abs() < 1e-6);
        assert!((p.value_at(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cancel_drops_future_events() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(1.0, 1.0);
        p.set_value_at_time(2.0, 2.0);
        p.cancel_scheduled_values(1.5);
        assert_eq!(p.value_at(5.0), 1.0);
    }

    #[test]
    fn values_are_clamped_to_range() {
        let mut p = AudioParam::with_range(0.0, -1.0, 1.0);
        p.set_value(4.0);
        assert_eq!(p.value(), 1.0);
        p.set_value_at_time(-3.0, 0.0);
        assert_eq!(p.value_at(0.0), -1.0);
    }

    #[test]
    fn fill_writes_per_sample_curve() {
        let mut p = AudioParam::new(0.0);
        p.linear_ramp_to_value_at_time(1.0, 4.0 / 8.0);
        let mut out = [0.0f32; 8];
        p.fill(&mut out, 0.0, 8.0);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert_eq!(out[4], 1.0);
        assert_eq!(out[7], 1.0);
    }
}
