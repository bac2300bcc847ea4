/// Smoothed audio level over byte frequency bins, with a hysteresis "speaking" flag.
///
/// Advisory only: nothing in the session gates audio/video state on it.
#[derive(Debug, Clone)]
pub struct AudioMeter {
    level: f32,
    smoothing: f32,
    on_threshold: f32,
    off_threshold: f32,
    speaking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    pub level: f32,
    pub speaking: bool,
    /// The speaking flag flipped on this sample
    pub changed: bool,
}

impl Default for AudioMeter {
    fn default() -> Self {
        Self::new(0.6, 0.12, 0.06)
    }
}

impl AudioMeter {
    pub fn new(smoothing: f32, on_threshold: f32, off_threshold: f32) -> Self {
        Self {
            level: 0.0,
            smoothing: smoothing.clamp(0.0, 0.99),
            on_threshold,
            off_threshold: off_threshold.min(on_threshold),
            speaking: false,
        }
    }

    pub fn sample(&mut self, bins: &[u8]) -> MeterReading {
        let instant = if bins.is_empty() {
            0.0
        } else {
            let sum: u32 = bins.iter().map(|&b| b as u32).sum();
            sum as f32 / (bins.len() as f32 * 255.0)
        };

        self.level = self.smoothing * self.level + (1.0 - self.smoothing) * instant;

        let was_speaking = self.speaking;
        if self.speaking {
            if self.level < self.off_threshold {
                self.speaking = false;
            }
        } else if self.level > self.on_threshold {
            self.speaking = true;
        }

        MeterReading {
            level: self.level,
            speaking: self.speaking,
            changed: was_speaking != self.speaking,
        }
    }

    /// Drops to silence, e.g. when the microphone is muted.
    pub fn reset(&mut self) -> bool {
        let was_speaking = self.speaking;
        self.level = 0.0;
        self.speaking = false;
        was_speaking
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }
}
