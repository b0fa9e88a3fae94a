use crate::config::Endpoints;
use crate::error::ChatError;
use crate::pipeline::RequestPipeline;
use crate::timeline::Message;
use crate::transport::ApiRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Serialize)]
struct TitleBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

/// History and conversation routes, all through the authenticated pipeline.
#[derive(Clone)]
pub struct ConversationsClient {
    pipeline: RequestPipeline,
    endpoints: Endpoints,
}

impl ConversationsClient {
    pub fn new(pipeline: RequestPipeline, endpoints: Endpoints) -> Self {
        Self {
            pipeline,
            endpoints,
        }
    }

    pub async fn chat_history(&self) -> Result<Vec<Message>, ChatError> {
        let messages: Vec<Message> = self
            .pipeline
            .execute_json(ApiRequest::get(self.endpoints.history.as_str()))
            .await?;
        debug!(count = messages.len(), "loaded chat history");
        Ok(messages)
    }

    pub async fn clear_chat_history(&self) -> Result<(), ChatError> {
        self.pipeline
            .execute(ApiRequest::delete(self.endpoints.history.as_str()))
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.pipeline
            .execute_json(ApiRequest::get(self.endpoints.conversations.as_str()))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<ConversationDetail, ChatError> {
        self.pipeline
            .execute_json(ApiRequest::get(self.endpoints.conversation(id)))
            .await
    }

    pub async fn create(&self, title: Option<&str>) -> Result<ConversationSummary, ChatError> {
        let request =
            ApiRequest::post(self.endpoints.conversations.as_str()).json(&TitleBody { title })?;
        self.pipeline.execute_json(request).await
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<ConversationSummary, ChatError> {
        let request = ApiRequest::patch(self.endpoints.conversation(id)).json(&TitleBody {
            title: Some(title),
        })?;
        self.pipeline.execute_json(request).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ChatError> {
        self.pipeline
            .execute(ApiRequest::delete(self.endpoints.conversation(id)))
            .await?;
        Ok(())
    }
}
