//! Session controller: drives one send at a time through the pipeline, the
//! decoder and the timeline, and reports every change to the UI.

use crate::config::Endpoints;
use crate::conversations::ConversationsClient;
use crate::credentials::CredentialStore;
use crate::decoder::{event_stream, StreamEvent};
use crate::error::ChatError;
use crate::pipeline::RequestPipeline;
use crate::timeline::{Message, MessageId, ProvisionalId, Timeline};
use crate::transport::ApiRequest;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    Sending,
    Streaming,
}

/// Notifications for the UI layer, in the order the changes happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    MessageAdded(Message),
    ResponseDelta { id: MessageId, delta: String },
    MessagePromoted { from: MessageId, message: Message },
    MessageRemoved(MessageId),
    TimelineReplaced(Vec<Message>),
    TimelineCleared,
    PhaseChanged(SendPhase),
    SendFailed { message: String },
    SessionExpired,
}

#[derive(Serialize)]
struct SendBody<'a> {
    content: &'a str,
}

struct Flight {
    phase: SendPhase,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
pub struct SessionController {
    pipeline: RequestPipeline,
    credentials: CredentialStore,
    conversations: ConversationsClient,
    endpoints: Endpoints,
    timeline: Arc<RwLock<Timeline>>,
    flight: Arc<Mutex<Flight>>,
    last_error: Arc<RwLock<Option<String>>>,
    updates: UnboundedSender<SessionUpdate>,
}

impl SessionController {
    pub fn new(
        pipeline: RequestPipeline,
        credentials: CredentialStore,
        endpoints: Endpoints,
    ) -> (Self, UnboundedReceiver<SessionUpdate>) {
        let (updates, updates_rx) = unbounded_channel();
        let conversations = ConversationsClient::new(pipeline.clone(), endpoints.clone());
        (
            Self {
                pipeline,
                credentials,
                conversations,
                endpoints,
                timeline: Arc::new(RwLock::new(Timeline::new())),
                flight: Arc::new(Mutex::new(Flight {
                    phase: SendPhase::Idle,
                    cancel: None,
                })),
                last_error: Arc::new(RwLock::new(None)),
                updates,
            },
            updates_rx,
        )
    }

    pub fn timeline(&self) -> Vec<Message> {
        self.timeline.read().messages().to_vec()
    }

    pub fn phase(&self) -> SendPhase {
        self.flight.lock().phase
    }

    pub fn in_flight(&self) -> Option<ProvisionalId> {
        self.timeline.read().in_flight()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn conversations(&self) -> &ConversationsClient {
        &self.conversations
    }

    /// Sends `content` and streams the reply into the timeline.
    ///
    /// Dropping the returned future abandons the send; the optimistic entry
    /// is rolled back either way.
    pub async fn send(&self, content: impl Into<String>) -> Result<Message, ChatError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.credentials.access_token().is_none() {
            let err = ChatError::SessionExpired;
            self.report(&err);
            return Err(err);
        }

        let (id, cancel_rx) = match self.begin(&content) {
            Ok(started) => started,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };
        let mut flight = InFlight {
            controller: self,
            id,
            armed: true,
        };

        match self.stream_reply(id, &content, cancel_rx).await {
            Ok(message) => {
                flight.armed = false;
                self.set_phase(SendPhase::Idle);
                *self.last_error.write() = None;
                info!(message_id = %message.id, "reply completed");
                Ok(message)
            }
            Err(err) => {
                drop(flight);
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Abandons the send in flight, if any.
    pub fn cancel(&self) -> bool {
        let sender = self.flight.lock().cancel.take();
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.timeline.write().clear();
        *self.last_error.write() = None;
        self.notify(SessionUpdate::TimelineCleared);
    }

    pub async fn load_history(&self) -> Result<usize, ChatError> {
        let messages = self.guarded(self.conversations.chat_history().await)?;
        Ok(self.replace_timeline(messages))
    }

    pub async fn clear_history(&self) -> Result<(), ChatError> {
        self.guarded(self.conversations.clear_chat_history().await)?;
        self.clear();
        Ok(())
    }

    pub async fn open_conversation(&self, id: &str) -> Result<usize, ChatError> {
        let detail = self.guarded(self.conversations.get(id).await)?;
        debug!(conversation = %detail.id, "opened conversation");
        Ok(self.replace_timeline(detail.messages))
    }

    fn replace_timeline(&self, messages: Vec<Message>) -> usize {
        let count = messages.len();
        self.timeline.write().replace_all(messages.clone());
        self.notify(SessionUpdate::TimelineReplaced(messages));
        count
    }

    fn begin(&self, content: &str) -> Result<(ProvisionalId, oneshot::Receiver<()>), ChatError> {
        let mut flight = self.flight.lock();
        if flight.phase != SendPhase::Idle {
            return Err(ChatError::ConflictingSend);
        }
        let (id, added) = {
            let mut timeline = self.timeline.write();
            let id = timeline.start_optimistic(content)?;
            (id, timeline.get(&MessageId::Provisional(id)).cloned())
        };
        let (cancel_tx, cancel_rx) = oneshot::channel();
        flight.phase = SendPhase::Sending;
        flight.cancel = Some(cancel_tx);
        drop(flight);

        if let Some(message) = added {
            self.notify(SessionUpdate::MessageAdded(message));
        }
        self.notify(SessionUpdate::PhaseChanged(SendPhase::Sending));
        Ok((id, cancel_rx))
    }

    async fn stream_reply(
        &self,
        id: ProvisionalId,
        content: &str,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> Result<Message, ChatError> {
        let request =
            ApiRequest::post(self.endpoints.message_stream.as_str()).json(&SendBody { content })?;
        let response = tokio::select! {
            response = self.pipeline.open_stream(request) => response.map_err(|err| match err {
                ChatError::SessionExpired | ChatError::StreamFailure(_) => err,
                ChatError::Transport(reason) => ChatError::StreamFailure(reason),
                other => ChatError::StreamFailure(other.user_message()),
            })?,
            _ = &mut cancel_rx => return Err(ChatError::Cancelled),
        };
        self.set_phase(SendPhase::Streaming);

        let provisional = MessageId::Provisional(id);
        let mut events = Box::pin(event_stream(response.body));
        loop {
            let next = tokio::select! {
                next = events.next() => next,
                _ = &mut cancel_rx => return Err(ChatError::Cancelled),
            };
            match next {
                Some(Ok(StreamEvent::Chunk { text })) => {
                    let applied = self.timeline.write().apply_chunk(&id, &text);
                    if !applied {
                        debug!("optimistic entry discarded while streaming");
                        return Err(ChatError::Cancelled);
                    }
                    self.notify(SessionUpdate::ResponseDelta {
                        id: provisional.clone(),
                        delta: text,
                    });
                }
                Some(Ok(StreamEvent::Completion {
                    durable_id,
                    created_at,
                })) => {
                    let promoted = {
                        let mut timeline = self.timeline.write();
                        let stamp = created_at.unwrap_or_else(Utc::now);
                        if timeline.promote(&id, durable_id.clone(), stamp) {
                            timeline.get(&MessageId::Durable(durable_id)).cloned()
                        } else {
                            None
                        }
                    };
                    let Some(message) = promoted else {
                        return Err(ChatError::Cancelled);
                    };
                    self.notify(SessionUpdate::MessagePromoted {
                        from: provisional,
                        message: message.clone(),
                    });
                    return Ok(message);
                }
                Some(Ok(StreamEvent::Failure { reason })) => {
                    return Err(ChatError::StreamFailure(reason));
                }
                Some(Err(ChatError::StreamFailure(reason))) => {
                    return Err(ChatError::StreamFailure(reason));
                }
                Some(Err(err)) => return Err(ChatError::StreamFailure(err.to_string())),
                None => {
                    return Err(ChatError::StreamFailure(
                        "connection closed before the reply completed".to_string(),
                    ));
                }
            }
        }
    }

    fn guarded<T>(&self, result: Result<T, ChatError>) -> Result<T, ChatError> {
        if let Err(err) = &result {
            if err.is_session_expired() {
                warn!("session expired during request");
                *self.last_error.write() = Some(err.user_message());
                self.notify(SessionUpdate::SessionExpired);
            }
        }
        result
    }

    fn report(&self, err: &ChatError) {
        warn!(error = %err, "send failed");
        let message = err.user_message();
        *self.last_error.write() = Some(message.clone());
        self.notify(SessionUpdate::SendFailed { message });
        if err.is_session_expired() {
            self.notify(SessionUpdate::SessionExpired);
        }
    }

    fn set_phase(&self, phase: SendPhase) {
        {
            let mut flight = self.flight.lock();
            flight.phase = phase;
            if phase == SendPhase::Idle {
                flight.cancel = None;
            }
        }
        self.notify(SessionUpdate::PhaseChanged(phase));
    }

    fn notify(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!("session update receiver dropped");
        }
    }
}

/// Rolls back the optimistic entry unless the send completed.
struct InFlight<'a> {
    controller: &'a SessionController,
    id: ProvisionalId,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self.controller.timeline.write().rollback(&self.id);
        if let Some(message) = removed {
            debug!(id = %message.id, "rolled back optimistic entry");
            self.controller
                .notify(SessionUpdate::MessageRemoved(message.id));
        }
        self.controller.set_phase(SendPhase::Idle);
    }
}
