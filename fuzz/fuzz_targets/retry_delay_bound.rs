#![no_main]

use floe_retry::{calculate_delay, RetryStrategyConfig, RetryStrategyType};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

fuzz_target!(|data: (u32, u8, u64, u64)| {
    let (attempt, strategy_byte, base_ms, max_ms) = data;

    let attempt = attempt % 100 + 1; // 1-100
    let strategy = match strategy_byte % 3 {
        0 => RetryStrategyType::Exponential,
        1 => RetryStrategyType::Linear,
        _ => RetryStrategyType::Constant,
    };
    let base_delay = Duration::from_millis(base_ms % 10_000 + 1);
    let max_delay = Duration::from_millis(max_ms % 300_000 + 100);

    let config = RetryStrategyConfig { strategy, max_attempts: 100, base_delay, max_delay, jitter: 0.0 };

    let delay = calculate_delay(&config, attempt);

    // Invariant: the computed delay never exceeds the configured ceiling.
    assert!(delay <= max_delay);

    // Constant strategy always returns base_delay, clamped to max_delay.
    if strategy == RetryStrategyType::Constant {
        assert_eq!(delay, base_delay.min(max_delay));
    }

    // Exponential/linear delays are monotonically non-decreasing in attempt
    // number, up to the ceiling.
    if attempt > 1 {
        let prior = calculate_delay(&config, attempt - 1);
        if strategy != RetryStrategyType::Constant {
            assert!(delay >= prior || delay == max_delay);
        }
    }
});
