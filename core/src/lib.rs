pub mod auth;
pub mod config;
pub mod conversations;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod timeline;
pub mod transport;

pub use auth::{AuthClient, LoginCredentials, RegisterData};
pub use config::{ClientSettings, ConfigError, Endpoints};
pub use conversations::{ConversationDetail, ConversationSummary, ConversationsClient};
pub use credentials::{CredentialPair, CredentialStore, Identity, Role};
pub use decoder::{StreamDecoder, StreamEvent};
pub use error::ChatError;
pub use pipeline::RequestPipeline;
pub use session::{SendPhase, SessionController, SessionUpdate};
pub use store::KeyValueStore;
pub use timeline::{Message, MessageId, ProvisionalId, Timeline};
pub use transport::{HttpTransport, ReqwestTransport, ScriptedReply, ScriptedTransport};

use std::sync::Arc;

/// Everything a front end needs, wired from one set of settings.
#[derive(Clone)]
pub struct Client {
    pub credentials: CredentialStore,
    pub auth: AuthClient,
    pub session: SessionController,
}

impl Client {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: CredentialStore,
        endpoints: Endpoints,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<SessionUpdate>) {
        let pipeline = RequestPipeline::new(transport, credentials.clone(), &endpoints);
        let auth = AuthClient::new(pipeline.clone(), credentials.clone(), endpoints.clone());
        let (session, updates) = SessionController::new(pipeline, credentials.clone(), endpoints);
        (
            Self {
                credentials,
                auth,
                session,
            },
            updates,
        )
    }

    /// Builds the production client: reqwest transport, on-disk credentials.
    pub fn from_settings(
        settings: &ClientSettings,
    ) -> anyhow::Result<(Self, tokio::sync::mpsc::UnboundedReceiver<SessionUpdate>)> {
        let transport = ReqwestTransport::new(settings.api_url.clone(), settings.timeout)?;
        let credentials = CredentialStore::open(KeyValueStore::new(settings.session_dir())?);
        Ok(Self::new(
            Arc::new(transport),
            credentials,
            settings.endpoints.clone(),
        ))
    }
}
