//! Preemption rate limiting: a rolling-window budget plus a cooldown.

use std::collections::VecDeque;

use crate::config::PriorityConfig;

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    activations: VecDeque<f64>,
    last_activation: Option<f64>,
}

impl RateLimiter {
    /// Activations still inside the window ending at `now`.
    pub fn count_in_window(&self, now: f64, config: &PriorityConfig) -> usize {
        self.activations
            .iter()
            .filter(|t| now - **t < config.rate_window)
            .count()
    }

    pub fn window_exhausted(&self, now: f64, config: &PriorityConfig) -> bool {
        self.count_in_window(now, config) >= config.max_preemptions_per_window
    }

    pub fn in_cooldown(&self, now: f64, config: &PriorityConfig) -> bool {
        self.last_activation
            .is_some_and(|t| now - t < config.cooldown)
    }

    pub fn can_activate(&self, now: f64, config: &PriorityConfig) -> bool {
        !self.window_exhausted(now, config) && !self.in_cooldown(now, config)
    }

    pub fn record(&mut self, now: f64, config: &PriorityConfig) {
        while self
            .activations
            .front()
            .is_some_and(|t| now - *t >= config.rate_window)
        {
            self.activations.pop_front();
        }
        self.activations.push_back(now);
        self.last_activation = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_activation_in_window_refused() {
        let config = PriorityConfig::default();
        let mut limiter = RateLimiter::default();
        limiter.record(0.0, &config);
        limiter.record(20.0, &config);
        assert!(!limiter.can_activate(40.0, &config));
        assert!(limiter.window_exhausted(40.0, &config));
        // The first activation ages out of the window at t=60.
        assert!(limiter.can_activate(60.0, &config));
    }

    #[test]
    fn test_cooldown_blocks_back_to_back() {
        let config = PriorityConfig::default();
        let mut limiter = RateLimiter::default();
        limiter.record(0.0, &config);
        assert!(limiter.in_cooldown(5.0, &config));
        assert!(!limiter.can_activate(5.0, &config));
        assert!(limiter.can_activate(10.0, &config));
    }

    #[test]
    fn test_count_does_not_mutate() {
        let config = PriorityConfig::default();
        let mut limiter = RateLimiter::default();
        limiter.record(0.0, &config);
        assert_eq!(limiter.count_in_window(100.0, &config), 0);
        assert_eq!(limiter.count_in_window(30.0, &config), 1);
    }
}
