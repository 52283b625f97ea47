use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use dispatch_service::{
    clients::{
        audit::{AuditSink, MemoryAuditSink},
        circuit_breaker::CircuitBreaker,
        health::HealthChecker,
        history::AttemptHistory,
        rate_limiter::RateLimiter,
        store::{InMemoryStore, SharedStore},
    },
    error::DispatchError,
    models::{
        circuit_breaker::CircuitBreakerConfig,
        delivery::{DeliveryStatus, SendReceipt},
        health::{HealthCheckConfig, HealthRecord},
        message::{NotificationMessage, RenderedPayload},
        provider::{Channel, ProviderConfig},
        rate_limit::RateLimitConfig,
        retry::FailoverConfig,
    },
    providers::{ProviderAdapter, registry::ProviderRegistry},
    services::{dispatcher::Dispatcher, selector::ProviderSelector},
};
use serde_json::json;

/// What a scripted adapter does when asked to send.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    /// Vendor outage, e.g. a 500.
    Fail,
    /// Vendor rejects the payload, e.g. a 400.
    Reject,
}

pub struct MockAdapter {
    name: String,
    channel: Channel,
    behaviour: Mutex<Behaviour>,
    send_delay: Mutex<Duration>,
    healthy: Mutex<bool>,
    probe_delay: Mutex<Duration>,
    reported_latency_ms: Mutex<u64>,
    sends: AtomicU32,
    probes: AtomicU32,
}

impl MockAdapter {
    pub fn new(name: &str, channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            channel,
            behaviour: Mutex::new(Behaviour::Succeed),
            send_delay: Mutex::new(Duration::ZERO),
            healthy: Mutex::new(true),
            probe_delay: Mutex::new(Duration::ZERO),
            reported_latency_ms: Mutex::new(5),
            sends: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        })
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = delay;
    }

    pub fn set_reported_latency_ms(&self, latency_ms: u64) {
        *self.reported_latency_ms.lock().unwrap() = latency_ms;
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _payload: &RenderedPayload) -> Result<SendReceipt, DispatchError> {
        let call = self.sends.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behaviour = self.behaviour.lock().unwrap().clone();
        match behaviour {
            Behaviour::Succeed => Ok(SendReceipt {
                message_id: format!("{}-{}", self.name, call),
                status: DeliveryStatus::Accepted,
                vendor_response: json!({ "provider": self.name, "call": call }),
            }),
            Behaviour::Fail => Err(DispatchError::unavailable(&self.name, "status 500")),
            Behaviour::Reject => Err(DispatchError::InvalidRequest(format!(
                "{} rejected request: status 400",
                self.name
            ))),
        }
    }

    async fn get_status(&self, _message_id: &str) -> Result<DeliveryStatus, DispatchError> {
        Ok(DeliveryStatus::Delivered)
    }

    async fn check_health(&self) -> HealthRecord {
        self.probes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let latency_ms = *self.reported_latency_ms.lock().unwrap();
        if *self.healthy.lock().unwrap() {
            HealthRecord::healthy(&self.name, latency_ms)
        } else {
            HealthRecord::unhealthy(&self.name, latency_ms, "probe returned 503".to_string())
        }
    }
}

/// Component configs for a test harness.
#[derive(Clone, Default)]
pub struct Settings {
    pub breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub health: HealthCheckConfig,
    pub failover: FailoverConfig,
}

/// Every component wired to one in-memory store and scripted adapters.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<ProviderRegistry>,
    pub breaker: CircuitBreaker,
    pub rate_limiter: RateLimiter,
    pub health: HealthChecker,
    pub selector: ProviderSelector,
    pub dispatcher: Dispatcher,
    pub history: Arc<AttemptHistory>,
    pub audit: Arc<MemoryAuditSink>,
    pub adapters: HashMap<String, Arc<MockAdapter>>,
}

impl Harness {
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self> {
        Self::with_settings(providers, Settings::default())
    }

    pub fn with_settings(providers: Vec<ProviderConfig>, settings: Settings) -> Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<dyn SharedStore> = store.clone();

        let mut registry = ProviderRegistry::new();
        let mut adapters = HashMap::new();
        for provider in providers {
            let adapter = MockAdapter::new(&provider.name, provider.channel);
            adapters.insert(provider.name.clone(), Arc::clone(&adapter));
            registry.insert(provider, adapter)?;
        }
        let registry = Arc::new(registry);

        let history = Arc::new(AttemptHistory::default());
        let audit = Arc::new(MemoryAuditSink::new());
        let audit_sink: Arc<dyn AuditSink> = audit.clone();

        let breaker = CircuitBreaker::new(Arc::clone(&shared), settings.breaker);
        let rate_limiter = RateLimiter::new(Arc::clone(&shared), settings.rate_limit);
        let health = HealthChecker::new(
            Arc::clone(&shared),
            Arc::clone(&registry),
            Arc::clone(&history),
            settings.health.clone(),
        );
        let selector = ProviderSelector::new(
            Arc::clone(&registry),
            breaker.clone(),
            health.clone(),
            Arc::clone(&shared),
            settings.health.interval,
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            selector.clone(),
            breaker.clone(),
            rate_limiter.clone(),
            Arc::clone(&history),
            audit_sink,
            settings.failover,
        );

        Ok(Self {
            store,
            registry,
            breaker,
            rate_limiter,
            health,
            selector,
            dispatcher,
            history,
            audit,
            adapters,
        })
    }

    pub fn shared_store(&self) -> Arc<dyn SharedStore> {
        self.store.clone()
    }

    pub fn adapter(&self, name: &str) -> Arc<MockAdapter> {
        Arc::clone(&self.adapters[name])
    }

    /// Drives `provider` past the default failure threshold.
    pub async fn open_circuit(&self, provider: &str) {
        for _ in 0..CircuitBreakerConfig::default().failure_threshold {
            self.breaker.record_failure(provider).await;
        }
    }
}

pub fn email_provider(name: &str, priority: u32) -> ProviderConfig {
    ProviderConfig::new(name, "mock", Channel::Email, priority)
}

pub fn sms_provider(name: &str, priority: u32) -> ProviderConfig {
    ProviderConfig::new(name, "mock", Channel::Sms, priority)
}

pub fn email_message(tenant_id: &str) -> NotificationMessage {
    NotificationMessage::new(
        Channel::Email,
        tenant_id,
        RenderedPayload::new("jane@example.com", "Your order has shipped")
            .with_subject("Order update"),
    )
}

pub fn sms_message(tenant_id: &str) -> NotificationMessage {
    NotificationMessage::new(
        Channel::Sms,
        tenant_id,
        RenderedPayload::new("+14155550100", "Your code is 123456"),
    )
}
