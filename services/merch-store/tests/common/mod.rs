//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use merch_store::auth::CredentialVerifier;
use merch_store::metrics::Metrics;
use merch_store::services::{AuthenticatedUser, MerchService, ServiceSettings};
use merch_store::store::MerchStore;
use std::sync::Arc;
use std::time::Duration;

/// Stores passwords with a fixed prefix so tests skip the cost of Argon2.
pub struct PlainVerifier;

impl CredentialVerifier for PlainVerifier {
    fn hash(&self, password: &str) -> merch_store::Result<String> {
        Ok(format!("plain:{}", password))
    }

    fn verify(&self, hash: &str, password: &str) -> merch_store::Result<bool> {
        Ok(hash.strip_prefix("plain:") == Some(password))
    }
}

pub fn service_for(store: Arc<dyn MerchStore>) -> Arc<MerchService> {
    service_with_timeout(store, Duration::from_secs(5))
}

pub fn service_with_timeout(store: Arc<dyn MerchStore>, unit_of_work_timeout: Duration) -> Arc<MerchService> {
    Arc::new(MerchService::new(
        store,
        Arc::new(PlainVerifier),
        Arc::new(Metrics::new().unwrap()),
        ServiceSettings {
            starting_balance: 1000,
            unit_of_work_timeout,
        },
    ))
}

pub fn user(name: &str) -> AuthenticatedUser {
    AuthenticatedUser(name.to_string())
}
