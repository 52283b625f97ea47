use std::time::{Duration, Instant};

use anyhow::Result;
use dispatch_service::{
    error::DispatchError,
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        delivery::{AttemptOutcome, DeliveryStatus},
        message::{NotificationMessage, RenderedPayload},
        provider::Channel,
        rate_limit::RateLimitConfig,
        retry::FailoverConfig,
    },
};
use tokio::time::sleep;

use crate::common::{Behaviour, Harness, Settings, email_message, email_provider, sms_message, sms_provider};

/// Test: A healthy primary delivers on the first attempt
#[tokio::test]
async fn test_delivers_through_primary() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1), email_provider("mailgun", 2)])?;
    let message = email_message("acme");

    let result = harness.dispatcher.send(&message).await?;

    assert_eq!(result.notification_id, message.id);
    assert_eq!(result.provider, "sendgrid");
    assert_eq!(result.channel, Channel::Email);
    assert_eq!(result.message_id, "sendgrid-1");
    assert_eq!(result.status, DeliveryStatus::Accepted);
    assert_eq!(result.attempts.len(), 1);
    assert!(result.attempts[0].is_success());
    assert_eq!(harness.adapter("mailgun").sends(), 0);

    Ok(())
}

/// Test: A single 500 records one failure and leaves the breaker closed
#[tokio::test]
async fn test_single_failure_keeps_breaker_closed() -> Result<()> {
    let harness = Harness::new(vec![sms_provider("twilio", 1)])?;
    harness.adapter("twilio").set_behaviour(Behaviour::Fail);

    let result = harness.dispatcher.send(&sms_message("acme")).await;

    match result {
        Err(DispatchError::FailoverExhausted { channel, attempts }) => {
            assert_eq!(channel, Channel::Sms);
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].outcome, AttemptOutcome::Failure);
            assert!(attempts[0].error.as_deref().unwrap_or_default().contains("500"));
        }
        other => panic!("Expected FailoverExhausted, got {:?}", other.map(|r| r.provider)),
    }

    let snapshot = harness.breaker.get_state("twilio").await?;
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(snapshot.state, CircuitState::Closed);

    Ok(())
}

/// Test: A failing primary fails over to the backup, skipping the failed one
#[tokio::test]
async fn test_fails_over_to_backup() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1), email_provider("mailgun", 2)])?;
    harness.adapter("sendgrid").set_behaviour(Behaviour::Fail);

    let result = harness.dispatcher.send(&email_message("acme")).await?;

    assert_eq!(result.provider, "mailgun");
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].provider, "sendgrid");
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failure);
    assert_eq!(result.attempts[1].provider, "mailgun");
    assert_eq!(harness.adapter("sendgrid").sends(), 1);
    assert_eq!(harness.breaker.get_state("sendgrid").await?.failure_count, 1);

    Ok(())
}

/// Test: With only the last provider healthy, the chain completes inside the budget
#[tokio::test]
async fn test_failover_chain_completes_within_budget() -> Result<()> {
    let harness = Harness::new(vec![
        email_provider("first", 1),
        email_provider("second", 2),
        email_provider("third", 3),
    ])?;
    for name in ["first", "second"] {
        let adapter = harness.adapter(name);
        adapter.set_behaviour(Behaviour::Fail);
        adapter.set_send_delay(Duration::from_millis(300));
    }

    let started = Instant::now();
    let result = harness.dispatcher.send(&email_message("acme")).await?;

    assert_eq!(result.provider, "third");
    assert_eq!(result.attempts.len(), 3);
    assert!(started.elapsed() < FailoverConfig::default().budget);

    Ok(())
}

/// Test: Hanging providers cannot stretch the chain past the budget
#[tokio::test]
async fn test_budget_bounds_hanging_providers() -> Result<()> {
    let harness = Harness::with_settings(
        vec![email_provider("first", 1), email_provider("second", 2)],
        Settings {
            failover: FailoverConfig {
                budget: Duration::from_millis(400),
                ..FailoverConfig::default()
            },
            ..Settings::default()
        },
    )?;
    for name in ["first", "second"] {
        harness.adapter(name).set_send_delay(Duration::from_secs(5));
    }

    let started = Instant::now();
    let result = harness.dispatcher.send(&email_message("acme")).await;

    assert!(matches!(result, Err(DispatchError::FailoverExhausted { .. })));
    assert!(
        started.elapsed() < Duration::from_millis(800),
        "Took {:?}",
        started.elapsed()
    );

    Ok(())
}

/// Test: A budget that runs out while a half-open backup is health-checked leaves its slot free
#[tokio::test]
async fn test_budget_spent_during_health_check_frees_half_open_slot() -> Result<()> {
    let harness = Harness::with_settings(
        vec![email_provider("first", 1), email_provider("second", 2)],
        Settings {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(1),
            },
            failover: FailoverConfig {
                budget: Duration::from_millis(400),
                ..FailoverConfig::default()
            },
            ..Settings::default()
        },
    )?;

    harness.breaker.record_failure("second").await;
    sleep(Duration::from_millis(1_100)).await;

    harness.adapter("first").set_behaviour(Behaviour::Fail);
    harness.adapter("first").set_send_delay(Duration::from_millis(300));
    harness.adapter("second").set_probe_delay(Duration::from_millis(300));

    let result = harness.dispatcher.send(&email_message("acme")).await;

    assert!(matches!(result, Err(DispatchError::FailoverExhausted { .. })));
    assert_eq!(harness.adapter("second").sends(), 0);
    assert!(
        harness.breaker.is_available("second").await,
        "The next dispatch may probe the recovering provider"
    );

    Ok(())
}

/// Test: Attempts stop at the configured maximum
#[tokio::test]
async fn test_attempts_bounded_by_max_attempts() -> Result<()> {
    let harness = Harness::with_settings(
        vec![
            sms_provider("a", 1),
            sms_provider("b", 2),
            sms_provider("c", 3),
            sms_provider("d", 4),
        ],
        Settings {
            failover: FailoverConfig {
                max_attempts: 2,
                ..FailoverConfig::default()
            },
            ..Settings::default()
        },
    )?;
    for name in ["a", "b", "c", "d"] {
        harness.adapter(name).set_behaviour(Behaviour::Fail);
    }

    let result = harness.dispatcher.send(&sms_message("acme")).await;

    match result {
        Err(DispatchError::FailoverExhausted { attempts, .. }) => assert_eq!(attempts.len(), 2),
        _ => panic!("Expected FailoverExhausted"),
    }
    assert_eq!(harness.adapter("c").sends(), 0);
    assert_eq!(harness.adapter("d").sends(), 0);

    Ok(())
}

/// Test: A vendor rejection is surfaced immediately without failover or breaker impact
#[tokio::test]
async fn test_invalid_request_does_not_fail_over() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1), email_provider("mailgun", 2)])?;
    harness.adapter("sendgrid").set_behaviour(Behaviour::Reject);

    let result = harness.dispatcher.send(&email_message("acme")).await;

    assert!(matches!(result, Err(DispatchError::InvalidRequest(_))));
    assert_eq!(harness.adapter("mailgun").sends(), 0);
    assert_eq!(harness.breaker.get_state("sendgrid").await?.failure_count, 0);

    Ok(())
}

/// Test: A malformed payload is rejected before any provider is called
#[tokio::test]
async fn test_malformed_payload_is_rejected_up_front() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1)])?;
    let message = NotificationMessage::new(
        Channel::Email,
        "acme",
        RenderedPayload::new("not-an-address", "Hello").with_subject("Hi"),
    );

    let result = harness.dispatcher.send(&message).await;

    assert!(matches!(result, Err(DispatchError::InvalidRequest(_))));
    assert_eq!(harness.adapter("sendgrid").sends(), 0);

    Ok(())
}

/// Test: A tenant over its ceiling is rejected without touching providers
#[tokio::test]
async fn test_rate_limited_is_propagated() -> Result<()> {
    let harness = Harness::with_settings(
        vec![email_provider("sendgrid", 1)],
        Settings {
            rate_limit: RateLimitConfig {
                max_requests: 2,
                window: Duration::from_secs(60),
            },
            ..Settings::default()
        },
    )?;

    harness.dispatcher.send(&email_message("acme")).await?;
    harness.dispatcher.send(&email_message("acme")).await?;
    let result = harness.dispatcher.send(&email_message("acme")).await;

    assert!(matches!(result, Err(DispatchError::RateLimited { .. })));
    assert_eq!(harness.adapter("sendgrid").sends(), 2);

    harness.dispatcher.send(&email_message("globex")).await?;

    Ok(())
}

/// Test: A provider at its own rate ceiling is skipped, not counted as a failure
#[tokio::test]
async fn test_provider_ceiling_skips_to_backup() -> Result<()> {
    let harness = Harness::new(vec![
        email_provider("sendgrid", 1).with_rate_limit(1),
        email_provider("mailgun", 2),
    ])?;

    let first = harness.dispatcher.send(&email_message("acme")).await?;
    let second = harness.dispatcher.send(&email_message("acme")).await?;

    assert_eq!(first.provider, "sendgrid");
    assert_eq!(second.provider, "mailgun");
    assert_eq!(second.attempts[0].outcome, AttemptOutcome::Skipped);
    assert_eq!(harness.breaker.get_state("sendgrid").await?.failure_count, 0);

    Ok(())
}

/// Test: Every attempt reaches the audit sink
#[tokio::test]
async fn test_attempts_are_audited() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1), email_provider("mailgun", 2)])?;
    harness.adapter("sendgrid").set_behaviour(Behaviour::Fail);

    harness.dispatcher.send(&email_message("acme")).await?;
    sleep(Duration::from_millis(50)).await;

    let audited = harness.audit.attempts();
    assert_eq!(audited.len(), 2);
    assert!(audited.iter().any(|a| a.provider == "sendgrid" && !a.is_success()));
    assert!(audited.iter().any(|a| a.provider == "mailgun" && a.is_success()));

    Ok(())
}

/// Test: Status queries go to the adapter that accepted the message
#[tokio::test]
async fn test_status_proxies_to_adapter() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1)])?;

    let status = harness.dispatcher.status("sendgrid", "sendgrid-1").await?;
    assert_eq!(status, DeliveryStatus::Delivered);

    let unknown = harness.dispatcher.status("nope", "x").await;
    assert!(matches!(unknown, Err(DispatchError::InvalidRequest(_))));

    Ok(())
}
