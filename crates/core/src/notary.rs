//! Notarization of dataset digests with an external traceability service.

use crate::config::NotaryConfig;
use crate::constants::{NOTARY_CREATE_ACTION, NOTARY_HASH_ALGORITHM};
use lakeset_hashing::DatasetHashes;
use lakeset_types::DatasetId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum NotarizationError {
    #[error("login failed: {0}")]
    Login(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotarizedResource {
    pub resource_id: String,
    pub hash_algorithm: String,
    pub hash: String,
}

/// Digests of one dataset as sent to the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotarizationRequest {
    pub dataset_id: String,
    pub action_type: String,
    pub resources: Vec<NotarizedResource>,
}

impl NotarizationRequest {
    /// Request for a newly created dataset: the index, images and e-forms digests followed by
    /// one resource per study, in dataset order.
    pub fn dataset_created(id: &DatasetId, hashes: &DatasetHashes) -> Self {
        let resource = |resource_id: String, hash: &lakeset_types::Sha256Hash| NotarizedResource {
            resource_id,
            hash_algorithm: NOTARY_HASH_ALGORITHM.to_owned(),
            hash: hash.to_hex(),
        };
        let mut resources = vec![
            resource(format!("{id}/index"), &hashes.index),
            resource(format!("{id}/images"), &hashes.images),
            resource(format!("{id}/eforms"), &hashes.eforms),
        ];
        resources.extend(
            hashes
                .studies
                .iter()
                .map(|(study_id, hash)| resource(format!("{id}/studies/{study_id}"), hash)),
        );
        Self {
            dataset_id: id.to_string(),
            action_type: NOTARY_CREATE_ACTION.to_owned(),
            resources,
        }
    }
}

/// Destination of dataset digests.
pub trait NotarizationSink: Send + Sync + std::fmt::Debug {
    fn notarize(&self, request: &NotarizationRequest) -> Result<(), NotarizationError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Blocking HTTP client: logs in with the password grant, then posts the request.
#[derive(Debug)]
pub struct HttpNotarizer {
    client: reqwest::blocking::Client,
    config: NotaryConfig,
}

impl HttpNotarizer {
    pub fn new(config: NotaryConfig) -> Result<Self, NotarizationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn login(&self) -> Result<String, NotarizationError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.config.client_id.as_str()),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .map_err(|e| NotarizationError::Login(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotarizationError::Login(format!(
                "token endpoint answered {status}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .map_err(|e| NotarizationError::Login(format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }
}

impl NotarizationSink for HttpNotarizer {
    fn notarize(&self, request: &NotarizationRequest) -> Result<(), NotarizationError> {
        let token = self.login()?;
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(token)
            .json(request)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NotarizationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(
            "notarized {} resources of dataset {}",
            request.resources.len(),
            request.dataset_id
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    /// Sink that keeps every request, optionally failing instead.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingNotarizer {
        requests: Mutex<Vec<NotarizationRequest>>,
        reject_with: Option<u16>,
    }

    impl RecordingNotarizer {
        pub(crate) fn rejecting(status: u16) -> Self {
            Self {
                requests: Mutex::default(),
                reject_with: Some(status),
            }
        }

        pub(crate) fn requests(&self) -> Vec<NotarizationRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl NotarizationSink for RecordingNotarizer {
        fn notarize(&self, request: &NotarizationRequest) -> Result<(), NotarizationError> {
            if let Some(status) = self.reject_with {
                return Err(NotarizationError::Rejected {
                    status,
                    body: "rejected".into(),
                });
            }
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            Ok(())
        }
    }
}
