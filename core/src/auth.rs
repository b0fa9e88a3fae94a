use crate::config::Endpoints;
use crate::credentials::{CredentialPair, CredentialStore, Identity};
use crate::error::ChatError;
use crate::pipeline::RequestPipeline;
use crate::transport::ApiRequest;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize)]
pub struct RegisterData {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
struct AuthPayload {
    user: Identity,
    tokens: CredentialPair,
}

/// Sign-in and sign-out. The only code path that puts credentials into the
/// store; renewal lives in the pipeline.
#[derive(Clone)]
pub struct AuthClient {
    pipeline: RequestPipeline,
    credentials: CredentialStore,
    endpoints: Endpoints,
}

impl AuthClient {
    pub fn new(pipeline: RequestPipeline, credentials: CredentialStore, endpoints: Endpoints) -> Self {
        Self {
            pipeline,
            credentials,
            endpoints,
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.credentials.identity()
    }

    /// Reloads a persisted session, if a complete one exists.
    pub fn restore(&self) -> Option<Identity> {
        self.credentials.restore()
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Identity, ChatError> {
        let request = ApiRequest::post(self.endpoints.login.as_str()).json(credentials)?;
        self.establish(request).await
    }

    pub async fn register(&self, data: &RegisterData) -> Result<Identity, ChatError> {
        let request = ApiRequest::post(self.endpoints.register.as_str()).json(data)?;
        self.establish(request).await
    }

    /// Tells the backend, then forgets the session whatever it answered.
    pub async fn logout(&self) {
        if self.credentials.is_authenticated() {
            if let Err(err) = self
                .pipeline
                .execute(ApiRequest::post(self.endpoints.logout.as_str()))
                .await
            {
                warn!(error = %err, "logout request failed, clearing local session anyway");
            }
        }
        self.credentials.clear();
        info!("signed out");
    }

    pub async fn current_user(&self) -> Result<Identity, ChatError> {
        self.pipeline
            .execute_json(ApiRequest::get(self.endpoints.me.as_str()))
            .await
    }

    async fn establish(&self, request: ApiRequest) -> Result<Identity, ChatError> {
        let payload: AuthPayload = self.pipeline.execute_unauthenticated(request).await?;
        self.credentials.set(payload.tokens, payload.user.clone())?;
        info!(user = %payload.user.email, role = ?payload.user.role, "signed in");
        Ok(payload.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Role;
    use crate::transport::{ScriptedReply, ScriptedTransport};
    use reqwest::Method;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn user_json(role: &str) -> Value {
        json!({
            "id": "u1", "email": "ada@example.com", "name": "Ada", "role": role,
            "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"
        })
    }

    fn client() -> (ScriptedTransport, CredentialStore, AuthClient) {
        let transport = ScriptedTransport::new();
        let credentials = CredentialStore::in_memory();
        let endpoints = Endpoints::default();
        let pipeline = RequestPipeline::new(
            Arc::new(transport.clone()),
            credentials.clone(),
            &endpoints,
        );
        let auth = AuthClient::new(pipeline, credentials.clone(), endpoints);
        (transport, credentials, auth)
    }

    #[tokio::test]
    async fn login_stores_session() {
        let (transport, credentials, auth) = client();
        transport.enqueue(
            Method::POST,
            "/auth/login",
            ScriptedReply::json(
                200,
                json!({ "success": true, "data": { "user": user_json("ADMIN"), "tokens": { "accessToken": "a", "refreshToken": "r" } } }),
            ),
        );

        let identity = auth
            .login(&LoginCredentials::new("ada@example.com", "pw"))
            .await
            .unwrap();

        assert_eq!(identity.role, Role::Admin);
        assert!(identity.is_admin());
        assert_eq!(credentials.get(), Some(CredentialPair::new("a", "r")));
        assert_eq!(
            transport.requests()[0].body,
            Some(json!({ "email": "ada@example.com", "password": "pw" }))
        );
    }

    #[tokio::test]
    async fn rejected_login_does_not_attempt_renewal() {
        let (transport, credentials, auth) = client();
        transport.enqueue(
            Method::POST,
            "/auth/login",
            ScriptedReply::json(401, json!({ "success": false, "message": "Invalid credentials" })),
        );

        let err = auth
            .login(&LoginCredentials::new("ada@example.com", "wrong"))
            .await
            .unwrap_err();

        assert_eq!(err.user_message(), "Invalid credentials");
        assert_eq!(transport.request_count(&Method::POST, "/auth/refresh"), 0);
        assert!(!credentials.is_authenticated());
    }

    #[tokio::test]
    async fn register_signs_in_as_member() {
        let (transport, credentials, auth) = client();
        transport.enqueue(
            Method::POST,
            "/auth/register",
            ScriptedReply::json(
                201,
                json!({ "data": { "user": user_json("MEMBER"), "tokens": { "accessToken": "a", "refreshToken": "r" } } }),
            ),
        );

        let identity = auth
            .register(&RegisterData {
                email: "ada@example.com".into(),
                password: "pw".into(),
                name: "Ada".into(),
            })
            .await
            .unwrap();

        assert!(identity.is_member());
        assert_eq!(credentials.identity(), Some(identity));
    }

    #[tokio::test]
    async fn logout_clears_even_when_backend_is_unreachable() {
        let (transport, credentials, auth) = client();
        credentials
            .set(CredentialPair::new("a", "r"), crate::credentials::test_identity())
            .unwrap();
        transport.enqueue(
            Method::POST,
            "/auth/logout",
            ScriptedReply::Unreachable("connection refused".into()),
        );

        auth.logout().await;

        assert!(!credentials.is_authenticated());
        assert_eq!(transport.requests()[0].header("Authorization"), Some("Bearer a"));
    }

    #[tokio::test]
    async fn current_user_is_unwrapped() {
        let (transport, credentials, auth) = client();
        credentials
            .set(CredentialPair::new("a", "r"), crate::credentials::test_identity())
            .unwrap();
        transport.enqueue(
            Method::GET,
            "/auth/me",
            ScriptedReply::json(200, json!({ "success": true, "data": user_json("MEMBER") })),
        );

        let me = auth.current_user().await.unwrap();
        assert_eq!(me.name, "Ada");
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", LoginCredentials::new("ada@example.com", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
