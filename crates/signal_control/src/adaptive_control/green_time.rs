//! Green-time allocation and the congestion-aware switch threshold.

use crate::config::AdaptiveConfig;

use super::types::GreenEnvelope;

/// Ratio the opposing group's pressure must exceed before a switch.
///
/// Falls linearly from `switch_threshold_high` at `low_congestion_pressure`
/// total pressure to `switch_threshold_low` at `high_congestion_pressure`.
pub fn dynamic_switch_threshold(total_pressure: f64, config: &AdaptiveConfig) -> f64 {
    let span = config.high_congestion_pressure - config.low_congestion_pressure;
    let t = if span > 0.0 {
        ((total_pressure - config.low_congestion_pressure) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };
    config.switch_threshold_high - t * (config.switch_threshold_high - config.switch_threshold_low)
}

/// Upper bound for a green. Lowered to the critical cap while another
/// direction has waited past the critical threshold with a queue.
pub fn green_ceiling(envelope: &GreenEnvelope, critical_wait: bool, config: &AdaptiveConfig) -> f64 {
    if critical_wait {
        config
            .critical_green_cap
            .min(envelope.max_green)
            .max(envelope.min_green)
    } else {
        envelope.max_green
    }
}

/// `min + alpha * queue + repayment`, clamped to `[min_green, ceiling]`.
pub fn green_time(
    queue_pcu: f64,
    repayment: f64,
    envelope: &GreenEnvelope,
    ceiling: f64,
    config: &AdaptiveConfig,
) -> f64 {
    let raw = envelope.min_green + config.alpha * queue_pcu.max(0.0) + repayment.max(0.0);
    raw.clamp(envelope.min_green, ceiling.max(envelope.min_green))
}
