//! Authenticated request pipeline.
//!
//! Every outbound call gets the current access token as a bearer credential.
//! When the backend answers 401 the pipeline exchanges the refresh token for a
//! new pair and replays the call once. A second 401, a missing refresh token,
//! or a failed exchange ends the session.

use crate::config::Endpoints;
use crate::credentials::{CredentialPair, CredentialStore};
use crate::error::ChatError;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, StreamingResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backend payloads arrive either bare or wrapped as `{success, data}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiEnvelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(data) => data,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenewalRequest {
    refresh_token: String,
}

#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn HttpTransport>,
    credentials: CredentialStore,
    refresh_path: String,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: CredentialStore,
        endpoints: &Endpoints,
    ) -> Self {
        Self {
            transport,
            credentials,
            refresh_path: endpoints.refresh.clone(),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Runs a request and fails on any non-2xx status.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ChatError> {
        let transport = self.transport.clone();
        let response = self
            .with_renewal(
                request,
                move |request| {
                    let transport = transport.clone();
                    async move { transport.send(request).await }
                },
                ApiResponse::is_unauthorized,
            )
            .await?;
        if !response.is_success() {
            return Err(ChatError::Http {
                status: response.status,
                message: response.error_message(),
            });
        }
        Ok(response)
    }

    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ChatError> {
        self.execute(request)
            .await?
            .json::<ApiEnvelope<T>>()
            .map(ApiEnvelope::into_inner)
    }

    /// For routes that establish a session (login, register): no bearer and no
    /// renewal, so a 401 is reported as the backend's own message.
    pub async fn execute_unauthenticated<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ChatError> {
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ChatError::Http {
                status: response.status,
                message: response.error_message(),
            });
        }
        response
            .json::<ApiEnvelope<T>>()
            .map(ApiEnvelope::into_inner)
    }

    /// Opens a streaming call. The body is handed back untouched.
    pub async fn open_stream(&self, request: ApiRequest) -> Result<StreamingResponse, ChatError> {
        let transport = self.transport.clone();
        let response = self
            .with_renewal(
                request,
                move |request| {
                    let transport = transport.clone();
                    async move { transport.open_stream(request).await }
                },
                StreamingResponse::is_unauthorized,
            )
            .await?;
        if !response.is_success() {
            return Err(ChatError::StreamFailure(format!(
                "failed to send message (HTTP {})",
                response.status
            )));
        }
        Ok(response)
    }

    async fn with_renewal<T, F, Fut>(
        &self,
        mut request: ApiRequest,
        call: F,
        unauthorized: fn(&T) -> bool,
    ) -> Result<T, ChatError>
    where
        F: Fn(ApiRequest) -> Fut,
        Fut: Future<Output = Result<T, ChatError>>,
    {
        request.set_bearer(self.credentials.access_token().as_deref());
        let first = call(request.clone()).await?;
        if !unauthorized(&first) {
            return Ok(first);
        }

        // From here on the call counts as retried: whatever the replay
        // answers, no second renewal happens.
        debug!(method = %request.method, path = %request.path, "unauthorized, renewing credentials");
        let renewed = self.renew().await?;
        request.set_bearer(Some(&renewed.access_token));
        let retried = call(request.clone()).await?;
        if unauthorized(&retried) {
            warn!(path = %request.path, "still unauthorized after renewal, ending session");
            self.credentials.clear();
            return Err(ChatError::SessionExpired);
        }
        Ok(retried)
    }

    async fn renew(&self) -> Result<CredentialPair, ChatError> {
        let Some(refresh_token) = self.credentials.refresh_token() else {
            warn!("no refresh token available, ending session");
            self.credentials.clear();
            return Err(ChatError::SessionExpired);
        };

        let request = ApiRequest::post(self.refresh_path.as_str())
            .json(&RenewalRequest { refresh_token })?;
        let outcome = match self.transport.send(request).await {
            Ok(response) if response.is_success() => response
                .json::<ApiEnvelope<CredentialPair>>()
                .map(ApiEnvelope::into_inner),
            Ok(response) => Err(ChatError::Http {
                status: response.status,
                message: response.error_message(),
            }),
            Err(err) => Err(err),
        };

        let pair = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "credential renewal failed, ending session");
                self.credentials.clear();
                return Err(ChatError::SessionExpired);
            }
        };
        if let Err(err) = self.credentials.replace_pair(pair.clone()) {
            warn!(error = %err, "could not keep renewed credentials");
            return Err(ChatError::SessionExpired);
        }
        info!("credentials renewed");
        Ok(pair)
    }
}
