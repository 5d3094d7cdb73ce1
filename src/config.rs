use crate::error::{RenderError, RenderResult};

/// Seed used when the caller does not pick one, so that renders are reproducible.
pub const DEFAULT_SEED: u64 = 0x5eed_c0ff_ee15_b0a7;

/// Tunables of the renderer core.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Number of intersect/shade/shadow iterations per displayed frame.
    pub bounce_count: u32,
    /// How many frames may be encoded ahead of device completion. Also the number of
    /// uniform and random-pool slots.
    pub frames_in_flight: usize,
    /// Seed of the per-frame random pool generator.
    pub seed: u64,
    /// Largest single device buffer the renderer will allocate.
    pub max_allocation_bytes: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            bounce_count: 3,
            frames_in_flight: 3,
            seed: DEFAULT_SEED,
            max_allocation_bytes: 1 << 30,
        }
    }
}

impl RendererConfig {
    pub fn bounces(mut self, bounce_count: u32) -> Self {
        self.bounce_count = bounce_count;
        self
    }

    pub fn frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn max_allocation_bytes(mut self, bytes: u64) -> Self {
        self.max_allocation_bytes = bytes;
        self
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.bounce_count == 0 {
            return Err(RenderError::InvalidConfig(
                "bounce_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.bounce_count, 3);
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_slots_and_zero_bounces() {
        assert!(matches!(
            RendererConfig::default().frames_in_flight(0).validate(),
            Err(RenderError::InvalidConfig(_))
        ));
        assert!(matches!(
            RendererConfig::default().bounces(0).validate(),
            Err(RenderError::InvalidConfig(_))
        ));
    }
}
