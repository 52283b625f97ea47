use std::{sync::Arc, time::Duration};

use anyhow::Result;
use dispatch_service::{
    clients::{
        rate_limiter::RateLimiter,
        store::{InMemoryStore, SharedStore},
    },
    error::DispatchError,
    models::{provider::Channel, rate_limit::RateLimitConfig},
};
use futures_util::future::join_all;
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};

fn limiter(max_requests: u64, window: Duration) -> RateLimiter {
    let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
    RateLimiter::new(
        store,
        RateLimitConfig {
            max_requests,
            window,
        },
    )
}

/// Test: Call 1001 in a 1000-per-window ceiling is rejected
#[tokio::test]
async fn test_ceiling_plus_one_is_rate_limited() -> Result<()> {
    let limiter = limiter(1_000, Duration::from_secs(60));

    for _ in 0..1_000 {
        limiter.check_and_increment("acme", Channel::Email).await?;
    }

    match limiter.check_and_increment("acme", Channel::Email).await {
        Err(DispatchError::RateLimited {
            tenant_id,
            channel,
            limit,
            retry_after,
        }) => {
            assert_eq!(tenant_id, "acme");
            assert_eq!(channel, Channel::Email);
            assert_eq!(limit, 1_000);
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("Expected RateLimited, got {:?}", other),
    }

    Ok(())
}

/// Test: Counters are independent per tenant and per channel
#[tokio::test]
async fn test_windows_are_keyed_by_tenant_and_channel() -> Result<()> {
    let limiter = limiter(1, Duration::from_secs(60));

    assert_ok!(limiter.check_and_increment("acme", Channel::Email).await);
    assert_err!(limiter.check_and_increment("acme", Channel::Email).await);

    assert_ok!(limiter.check_and_increment("acme", Channel::Sms).await);
    assert_ok!(limiter.check_and_increment("globex", Channel::Email).await);

    Ok(())
}

/// Test: The window rolls over and admits calls again
#[tokio::test]
async fn test_window_rollover_resets_count() -> Result<()> {
    let limiter = limiter(3, Duration::from_millis(100));

    for _ in 0..3 {
        limiter.check_and_increment("acme", Channel::Push).await?;
    }
    assert_err!(limiter.check_and_increment("acme", Channel::Push).await);

    sleep(Duration::from_millis(150)).await;

    let window = limiter.check_and_increment("acme", Channel::Push).await?;
    assert_eq!(window.count, 1);

    Ok(())
}

/// Test: Concurrent callers never get more than the ceiling through
#[tokio::test]
async fn test_concurrent_increments_respect_ceiling() -> Result<()> {
    let limiter = limiter(25, Duration::from_secs(60));

    let admitted = join_all((0..100).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.check_and_increment("acme", Channel::Sms).await })
    }))
    .await
    .into_iter()
    .filter(|result| matches!(result, Ok(Ok(_))))
    .count();

    assert_eq!(admitted, 25);

    Ok(())
}

/// Test: A provider's own ceiling is enforced separately from tenants
#[tokio::test]
async fn test_provider_ceiling() -> Result<()> {
    let limiter = limiter(1_000, Duration::from_secs(60));

    assert!(limiter.try_acquire_provider("twilio", 2).await);
    assert!(limiter.try_acquire_provider("twilio", 2).await);
    assert!(!limiter.try_acquire_provider("twilio", 2).await);
    assert!(limiter.try_acquire_provider("sendgrid", 2).await);

    Ok(())
}
