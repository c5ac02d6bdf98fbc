//! Tests for the retry delay policies.

use std::time::Duration;

use prioqueue::ratelimit::{ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter};

#[test]
fn exponential_backoff_doubles_per_key() {
    let limiter = ItemExponentialFailureRateLimiter::new(
        Duration::from_millis(5),
        Duration::from_secs(1000),
    );

    assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
    assert_eq!(limiter.when(&"a"), Duration::from_millis(10));
    assert_eq!(limiter.when(&"a"), Duration::from_millis(20));
    assert_eq!(limiter.when(&"b"), Duration::from_millis(5));

    assert_eq!(limiter.num_requeues(&"a"), 3);
    assert_eq!(limiter.num_requeues(&"b"), 1);
}

#[test]
fn exponential_backoff_is_capped() {
    let limiter =
        ItemExponentialFailureRateLimiter::new(Duration::from_millis(100), Duration::from_millis(250));

    assert_eq!(limiter.when(&1), Duration::from_millis(100));
    assert_eq!(limiter.when(&1), Duration::from_millis(200));
    assert_eq!(limiter.when(&1), Duration::from_millis(250));
    for _ in 0..64 {
        assert_eq!(limiter.when(&1), Duration::from_millis(250));
    }
}

#[test]
fn forget_resets_backoff() {
    let limiter = ItemExponentialFailureRateLimiter::default();
    limiter.when(&"k");
    limiter.when(&"k");

    limiter.forget(&"k");
    assert_eq!(limiter.num_requeues(&"k"), 0);
    assert_eq!(
        limiter.when(&"k"),
        ItemExponentialFailureRateLimiter::<&str>::DEFAULT_BASE_DELAY
    );
}

#[test]
fn max_of_takes_longest_delay() {
    let limiter: MaxOfRateLimiter<&str> = MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_secs(1),
        )),
        Box::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(50),
            Duration::from_millis(60),
        )),
    ]);

    assert_eq!(limiter.when(&"k"), Duration::from_millis(50));
    assert_eq!(limiter.when(&"k"), Duration::from_millis(60));
    assert_eq!(limiter.num_requeues(&"k"), 2);

    limiter.forget(&"k");
    assert_eq!(limiter.num_requeues(&"k"), 0);
}
