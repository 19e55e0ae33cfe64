use std::sync::atomic::{AtomicI64, Ordering};

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Last id handed out by this process
static LAST_SNOWFLAKE: AtomicI64 = AtomicI64::new(0);

/// Generate a Snowflake-style i64 for use as record ID.
///
/// Layout (53 bits, fits in JavaScript's Number.MAX_SAFE_INTEGER):
///   - 41 bits: milliseconds since 2024-01-01 UTC (~69 years)
///   - 12 bits: sequence, starting at a random offset below 2048 each ms
///
/// Strictly increasing within a process: a burst of more than the remaining
/// sequence space in one millisecond borrows from the next millisecond.
pub fn snowflake_id() -> i64 {
    use rand::Rng;
    // Custom epoch: 2024-01-01 00:00:00 UTC
    const EPOCH_MS: i64 = 1_704_067_200_000;
    let ts = (now_millis() - EPOCH_MS) & 0x1FF_FFFF_FFFF; // 41 bits
    let start: i64 = rand::thread_rng().gen_range(0..0x800);
    let candidate = (ts << 12) | start;

    let mut last = LAST_SNOWFLAKE.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(last + 1);
        match LAST_SNOWFLAKE.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

/// Whole days from `now` until `until` (both Unix millis), negative once passed
pub fn days_until(until_millis: i64, now_millis: i64) -> i64 {
    (until_millis - now_millis).div_euclid(86_400_000)
}
