// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Process-wide provider client construction: global provider
//! clients are process-scoped resources with explicit init at startup;
//! agents receive them by reference, never construct their own.
//!
//! Credential resolution for the STT transport uses
//! `GOOGLE_APPLICATION_CREDENTIALS` (a path to a service-account JSON
//! document) or `GOOGLE_APPLICATION_CREDENTIALS_BODY` (the document
//! inline). Exchanging that document for a short-lived OAuth2 bearer
//! token is itself part of the cloud STT provider's wire contract, which
//! is out of scope here — described only by the
//! request/response contract the core depends on. `kittd` therefore
//! only resolves *which* credential document to use and fails fast with
//! a clear `Configuration` error if neither env var is set; wiring a
//! real token exchange onto [`GrpcSttClient`]'s channel is left to the
//! production deployment, the same way the real room SDK is left to
//! [`kitt_agent::room::RoomClient`]'s real implementation.

use std::sync::Arc;

use kitt_core::{KittError, Result};
use kitt_providers::transcriber::{GrpcSttClient, SttClient};
use kitt_providers::{ChatCompleter, Synthesizer};
use tonic::transport::Channel;

const STT_ENDPOINT: &str = "https://speech.googleapis.com";

/// Everything an [`kitt_agent::agent::AgentConfig`] needs from the
/// process-wide providers, bundled so the Supervisor constructs it once
/// at startup and clones `Arc`s into every room's config.
pub struct ProviderClients {
    pub stt_client: Arc<dyn SttClient>,
    pub synthesizer: Arc<Synthesizer>,
    pub chat_completer: Arc<ChatCompleter>,
}

impl ProviderClients {
    /// Builds the shared provider clients from environment-resolved
    /// credentials and the loaded `openai_api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Google credential document is missing or
    /// unreadable.
    pub fn connect(openai_api_key: &str) -> Result<Self> {
        resolve_google_credentials()?;
        let channel = Channel::from_static(STT_ENDPOINT).connect_lazy();
        Ok(Self {
            stt_client: Arc::new(GrpcSttClient::new(channel)),
            synthesizer: Arc::new(Synthesizer::new(openai_api_key.to_string())),
            chat_completer: Arc::new(ChatCompleter::new(openai_api_key)),
        })
    }
}

/// Resolves the raw Google service-account credential document from
/// `GOOGLE_APPLICATION_CREDENTIALS_BODY` (inline) or
/// `GOOGLE_APPLICATION_CREDENTIALS` (a file path). Returns the
/// document's contents so a production token exchange can consume it;
/// `kittd` itself does not parse it further.
///
/// # Errors
///
/// Returns a `Configuration` error if neither env var is set, or if the
/// file named by `GOOGLE_APPLICATION_CREDENTIALS` cannot be read.
pub fn resolve_google_credentials() -> Result<String> {
    if let Ok(body) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS_BODY") {
        return Ok(body);
    }
    match std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        Ok(path) => std::fs::read_to_string(&path)
            .map_err(|e| KittError::Configuration(format!("failed to read GOOGLE_APPLICATION_CREDENTIALS at {path}: {e}"))),
        Err(_) => Err(KittError::Configuration(
            "neither GOOGLE_APPLICATION_CREDENTIALS nor GOOGLE_APPLICATION_CREDENTIALS_BODY is set".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn resolve_google_credentials_prefers_inline_body() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS_BODY", "{\"type\":\"service_account\"}");
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");
        assert_eq!(resolve_google_credentials().expect("resolves"), "{\"type\":\"service_account\"}");
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS_BODY");
    }

    #[test]
    fn resolve_google_credentials_errors_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS_BODY");
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");
        assert!(resolve_google_credentials().is_err());
    }
}
