use chrono::{DateTime, Local, Utc};
use rapport_core::{ConversationSummary, Identity, Message, SessionUpdate};

/// Where a rendered update belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Written as-is, without a trailing newline.
    Inline(String),
    Line(String),
    Error(String),
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = DateTime::from(time);
    local.format("%b %e, %H:%M").to_string()
}

pub fn render_message(message: &Message, show_timestamps: bool) -> String {
    let mut out = String::new();
    if show_timestamps {
        out.push_str(&format!("[{}] ", format_timestamp(message.created_at)));
    }
    out.push_str(&format!("You: {}\n", message.content));
    match message.response.as_deref() {
        Some(response) if !response.is_empty() => {
            out.push_str(&format!("Rapport: {response}\n"));
        }
        _ if message.id.is_provisional() => out.push_str("Rapport: …\n"),
        _ => {}
    }
    out
}

pub fn render_timeline(messages: &[Message], show_timestamps: bool) -> String {
    if messages.is_empty() {
        return "No messages yet. Say hello!\n".to_string();
    }
    messages
        .iter()
        .map(|message| render_message(message, show_timestamps))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_conversations(conversations: &[ConversationSummary]) -> String {
    if conversations.is_empty() {
        return "No conversations.\n".to_string();
    }
    let mut out = String::new();
    for conversation in conversations {
        out.push_str(&format!(
            "{}  {} ({} messages, updated {})\n",
            conversation.id,
            conversation.title,
            conversation.message_count,
            format_timestamp(conversation.updated_at)
        ));
    }
    out
}

pub fn render_identity(identity: &Identity) -> String {
    let role = if identity.is_admin() { "admin" } else { "member" };
    format!("{} <{}> ({role})", identity.name, identity.email)
}

/// Turns live session updates into terminal output. Timeline bookkeeping
/// updates render nothing.
pub fn render_update(update: &SessionUpdate) -> Option<Output> {
    match update {
        SessionUpdate::ResponseDelta { delta, .. } => Some(Output::Inline(delta.clone())),
        SessionUpdate::MessagePromoted { .. } => Some(Output::Line(String::new())),
        SessionUpdate::SendFailed { message } => Some(Output::Error(format!("error: {message}"))),
        SessionUpdate::SessionExpired => Some(Output::Error(
            "Run `rapport login` to start a new session.".to_string(),
        )),
        SessionUpdate::MessageAdded(_)
        | SessionUpdate::MessageRemoved(_)
        | SessionUpdate::TimelineReplaced(_)
        | SessionUpdate::TimelineCleared
        | SessionUpdate::PhaseChanged(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_core::{MessageId, ProvisionalId};

    fn message(id: MessageId, response: Option<&str>) -> Message {
        Message {
            id,
            content: "hello".into(),
            response: response.map(str::to_owned),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn completed_message_shows_both_sides() {
        let rendered = render_message(&message(MessageId::Durable("m1".into()), Some("Hi there")), false);
        assert_eq!(rendered, "You: hello\nRapport: Hi there\n");
    }

    #[test]
    fn pending_message_shows_placeholder() {
        let rendered = render_message(
            &message(MessageId::Provisional(ProvisionalId::generate()), Some("")),
            false,
        );
        assert!(rendered.ends_with("Rapport: …\n"));
    }

    #[test]
    fn empty_timeline_has_a_hint() {
        assert_eq!(render_timeline(&[], true), "No messages yet. Say hello!\n");
    }

    #[test]
    fn deltas_stream_inline_and_failures_go_to_stderr() {
        let delta = SessionUpdate::ResponseDelta {
            id: MessageId::Durable("m1".into()),
            delta: "Hi".into(),
        };
        assert_eq!(render_update(&delta), Some(Output::Inline("Hi".into())));
        assert_eq!(
            render_update(&SessionUpdate::SendFailed {
                message: "rate limited".into()
            }),
            Some(Output::Error("error: rate limited".into()))
        );
        assert_eq!(render_update(&SessionUpdate::TimelineCleared), None);
    }
}
