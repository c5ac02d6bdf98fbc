use std::time::Duration;

use prioqueue::config::Config;

// Environment variables are process-wide, so every case lives in one test.
#[test]
fn config_from_env_defaults_overrides_and_errors() {
    unsafe {
        std::env::remove_var("PRIOQ_QUEUE_NAME");
        std::env::remove_var("PRIOQ_BASE_DELAY_MS");
        std::env::remove_var("PRIOQ_MAX_DELAY_MS");
        std::env::remove_var("LOG_LEVEL");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.queue_name, "default");
    assert_eq!(config.base_delay, Duration::from_millis(5));
    assert_eq!(config.max_delay, Duration::from_secs(1000));
    assert_eq!(config.log_level, "info");

    unsafe {
        std::env::set_var("PRIOQ_QUEUE_NAME", "reconciler");
        std::env::set_var("PRIOQ_BASE_DELAY_MS", "20");
        std::env::set_var("PRIOQ_MAX_DELAY_MS", "60000");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.queue_name, "reconciler");
    assert_eq!(config.base_delay, Duration::from_millis(20));
    assert_eq!(config.max_delay, Duration::from_secs(60));

    unsafe {
        std::env::set_var("PRIOQ_BASE_DELAY_MS", "soon");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("PRIOQ_BASE_DELAY_MS", "100");
        std::env::set_var("PRIOQ_MAX_DELAY_MS", "10");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("PRIOQ_QUEUE_NAME");
        std::env::remove_var("PRIOQ_BASE_DELAY_MS");
        std::env::remove_var("PRIOQ_MAX_DELAY_MS");
    }
}

#[test]
fn config_builds_rate_limiter() {
    use prioqueue::ratelimit::RateLimiter;

    let config = Config {
        queue_name: "q".to_string(),
        base_delay: Duration::from_millis(7),
        max_delay: Duration::from_millis(10),
        otel_endpoint: None,
        log_level: "info".to_string(),
    };
    let limiter = config.rate_limiter::<u32>();
    assert_eq!(limiter.when(&1), Duration::from_millis(7));
    assert_eq!(limiter.when(&1), Duration::from_millis(10));
}
