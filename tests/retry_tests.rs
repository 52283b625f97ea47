use anyhow::{Result, anyhow};
use dispatch_service::{
    models::retry::RetryConfig,
    utils::{retry_when, retry_with_backoff},
};
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use tokio::time::Instant;

fn config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 20,
        max_delay_ms: 100,
        backoff_multiplier: 2,
    }
}

/// Test: Successful operations complete without retry
#[tokio::test]
async fn test_successful_operation_no_retry() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config(3), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("success")
        }
    })
    .await?;

    assert_eq!(result, "success");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        1,
        "Should only attempt once"
    );

    Ok(())
}

/// Test: Transient failures are retried with backoff
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config(5), || {
        let counter = Arc::clone(&counter);
        async move {
            let attempts = counter.fetch_add(1, Ordering::SeqCst);

            if attempts < 2 {
                Err(anyhow!("Transient error"))
            } else {
                Ok("success")
            }
        }
    })
    .await?;

    assert_eq!(result, "success");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        3,
        "Should retry 2 times then succeed"
    );

    Ok(())
}

/// Test: Permanent failures exhaust retries
#[tokio::test]
async fn test_permanent_failures_exhaust_retries() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config(3), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("Permanent error"))
        }
    })
    .await;

    assert!(result.is_err(), "Should fail after max attempts");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Backoff waits between attempts but stays bounded by the max delay
#[tokio::test]
async fn test_backoff_waits_between_attempts() -> Result<()> {
    let start = Instant::now();

    let _ = retry_with_backoff(&config(3), || async {
        Err::<(), _>(anyhow!("Always fails"))
    })
    .await;

    // Two sleeps: ~20ms then ~40ms, each jittered by at most 10%.
    let elapsed = start.elapsed().as_millis();
    assert!(elapsed >= 50, "Expected backoff sleeps, took {}ms", elapsed);
    assert!(elapsed < 1_000, "Backoff ran too long: {}ms", elapsed);

    Ok(())
}

/// Test: Errors the predicate rejects are returned after a single attempt
#[tokio::test]
async fn test_retry_when_stops_on_non_retryable_error() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_when(
        &config(5),
        |e: &anyhow::Error| e.to_string().contains("throttled"),
        || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("rejected"))
            }
        },
    )
    .await;

    assert!(result.is_err());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Retryable errors are retried until the operation recovers
#[tokio::test]
async fn test_retry_when_retries_matching_errors() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_when(
        &config(5),
        |e: &anyhow::Error| e.to_string().contains("throttled"),
        || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow!("throttled"))
                } else {
                    Ok(42)
                }
            }
        },
    )
    .await?;

    assert_eq!(result, 42);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);

    Ok(())
}
