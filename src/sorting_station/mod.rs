//! Directory of messengers keyed by apikey.
//!
//! Built once at startup from [`Settings`] and shared through application
//! state. Lookups never take a global lock; a messenger becomes visible only
//! after it is fully constructed.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::{DeliveryConfig, Settings};
use crate::error::{AppError, Result};
use crate::messenger::Messenger;

pub struct SortingStation {
    messengers: DashMap<String, Arc<Messenger>>,
    delivery: DeliveryConfig,
}

impl SortingStation {
    pub fn new(delivery: DeliveryConfig) -> Self {
        Self {
            messengers: DashMap::new(),
            delivery,
        }
    }

    /// Provision every application listed in the settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let station = Self::new(settings.delivery);

        for entry in settings.all_messengers() {
            station.create_messenger(&entry.apikey, &entry.apisecret)?;
        }

        if station.is_empty() {
            tracing::warn!("No messengers configured; every API call will be rejected");
        }

        Ok(station)
    }

    /// Provision a new application. Apikeys are unique.
    pub fn create_messenger(&self, apikey: &str, apisecret: &str) -> Result<Arc<Messenger>> {
        if apikey.is_empty() || apisecret.is_empty() {
            return Err(AppError::InvalidConfig(
                "apikey and apisecret must not be empty".to_string(),
            ));
        }

        match self.messengers.entry(apikey.to_string()) {
            Entry::Occupied(_) => Err(AppError::DuplicateApiKey(apikey.to_string())),
            Entry::Vacant(slot) => {
                let messenger = Arc::new(Messenger::new(apikey, apisecret, self.delivery));
                slot.insert(messenger.clone());
                tracing::info!(apikey = %apikey, "Messenger provisioned");
                Ok(messenger)
            }
        }
    }

    /// Remove an application. Its live connections stay open until their sockets close.
    pub fn remove_messenger(&self, apikey: &str) -> Option<Arc<Messenger>> {
        let removed = self.messengers.remove(apikey).map(|(_, m)| m);
        if removed.is_some() {
            tracing::info!(apikey = %apikey, "Messenger removed");
        }
        removed
    }

    /// `None` means "unknown key", which callers report as an auth failure
    pub fn get_messenger_by_apikey(&self, apikey: &str) -> Option<Arc<Messenger>> {
        self.messengers.get(apikey).map(|m| m.clone())
    }

    pub fn messengers(&self) -> Vec<Arc<Messenger>> {
        self.messengers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messengers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messengers.is_empty()
    }

    /// Live connections across every application
    pub fn total_connections(&self) -> usize {
        self.messengers.iter().map(|e| e.value().get_user_count()).sum()
    }

    /// Active channels across every application
    pub fn total_channels(&self) -> usize {
        self.messengers
            .iter()
            .map(|e| e.value().channels().channel_count())
            .sum()
    }
}
