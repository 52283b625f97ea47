use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{Error, Result, anyhow};
use tracing::info;

use crate::{
    models::{
        provider::{Channel, ProviderConfig, sort_by_preference},
        retry::RetryConfig,
    },
    providers::{
        ProviderAdapter, fcm::FcmAdapter, mailgun::MailgunAdapter, sendgrid::SendGridAdapter,
        twilio::TwilioAdapter,
    },
};

/// Builds an adapter for one configured provider.
pub type AdapterFactory =
    fn(&ProviderConfig, &RetryConfig) -> Result<Arc<dyn ProviderAdapter>, Error>;

/// Configured providers and their adapters, fixed after startup.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, AdapterFactory>,
    providers: Vec<ProviderConfig>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut factories: HashMap<String, AdapterFactory> = HashMap::new();
        factories.insert("sendgrid".to_string(), SendGridAdapter::build);
        factories.insert("mailgun".to_string(), MailgunAdapter::build);
        factories.insert("twilio".to_string(), TwilioAdapter::build);
        factories.insert("fcm".to_string(), FcmAdapter::build);

        Self {
            factories,
            providers: Vec::new(),
            adapters: HashMap::new(),
        }
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[ProviderConfig], retry: &RetryConfig) -> Result<Self, Error> {
        let mut registry = Self::new();
        for config in configs {
            registry.add(config.clone(), retry)?;
        }
        Ok(registry)
    }

    /// Makes another adapter kind available to `add`.
    pub fn register_kind(&mut self, kind: &str, factory: AdapterFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    /// Resolves the provider's kind to a factory and builds its adapter.
    pub fn add(&mut self, config: ProviderConfig, retry: &RetryConfig) -> Result<(), Error> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| anyhow!("Unknown provider kind '{}' for '{}'", config.kind, config.name))?;

        let adapter = factory(&config, retry)?;
        self.insert(config, adapter)
    }

    /// Registers an already-built adapter.
    pub fn insert(
        &mut self,
        config: ProviderConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), Error> {
        if self.adapters.contains_key(&config.name) {
            return Err(anyhow!("Duplicate provider name '{}'", config.name));
        }

        if config.weight == 0 {
            return Err(anyhow!("Provider '{}' must have a positive weight", config.name));
        }

        if adapter.channel() != config.channel {
            return Err(anyhow!(
                "Provider '{}' is configured for {} but its adapter serves {}",
                config.name,
                config.channel,
                adapter.channel()
            ));
        }

        info!(
            provider = %config.name,
            kind = %config.kind,
            channel = %config.channel,
            priority = config.priority,
            "Provider registered"
        );

        self.adapters.insert(config.name.clone(), adapter);
        self.providers.push(config);
        Ok(())
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Providers serving `channel`, in preference order.
    pub fn candidates(&self, channel: Channel) -> Vec<ProviderConfig> {
        let mut candidates: Vec<ProviderConfig> = self
            .providers
            .iter()
            .filter(|p| p.channel == channel)
            .cloned()
            .collect();
        sort_by_preference(&mut candidates);
        candidates
    }

    pub fn channels(&self) -> HashSet<Channel> {
        self.providers.iter().map(|p| p.channel).collect()
    }
}
