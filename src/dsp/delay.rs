/// Circular delay line sized for a fixed maximum delay.
///
/// Reads support fractional delays with linear interpolation so the delay
/// time can be automated without zipper noise.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    /// `max_delay_samples` is the longest delay that can be read back.
    pub fn new(max_delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay_samples.max(1) + 2],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len() - 2
    }

    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    /// Read `delay` samples behind the most recent write.
    pub fn read_interpolated(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(0.0, self.capacity() as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;

        // write_pos points one past the newest sample
        let newest = (self.write_pos + len - 1) % len;
        let a = self.buffer[(newest + len - whole) % len];
        let b = self.buffer[(newest + len - whole - 1) % len];
        a + (b - a) * frac
    }

    /// Write `sample` and return the value `delay` samples earlier.
    ///
    /// A delay of zero passes the input straight through.
    pub fn next_sample(&mut self, sample: f32, delay: f32) -> f32 {
        self.write(sample);
        self.read_interpolated(delay)
    }

    /// Recirculating delay: the output is fed back into the line scaled by
    /// `feedback`. Delays shorter than one sample cannot recirculate and
    /// behave like `next_sample`.
    pub fn next_sample_with_feedback(&mut self, sample: f32, delay: f32, feedback: f32) -> f32 {
        if delay < 1.0 || feedback == 0.0 {
            return self.next_sample(sample, delay);
        }
        // The newest stored sample is one step old, hence `delay - 1`
        let out = self.read_interpolated(delay - 1.0);
        self.write(sample + feedback * out);
        out
    }

    pub fn render(&mut self, buffer: &mut [f32], delay_samples: usize) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample(*sample, delay_samples as f32);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
