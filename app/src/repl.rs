/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Quit,
    Help,
    History,
    Clear,
    Conversations,
    Open(String),
    /// A slash command we don't know, or one missing its argument.
    Unknown(String),
    Message(String),
}

pub const HELP: &str = "/history  /clear  /conversations  /open <id>  /quit";

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let input = line.trim();
        match input {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/help" => Self::Help,
            "/history" => Self::History,
            "/clear" => Self::Clear,
            "/conversations" => Self::Conversations,
            command if command.starts_with('/') => match command.strip_prefix("/open ") {
                Some(id) if !id.trim().is_empty() => Self::Open(id.trim().to_string()),
                _ => Self::Unknown(command.to_string()),
            },
            text => Self::Message(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_commands_parse() {
        assert_eq!(ReplCommand::parse("  /history "), ReplCommand::History);
        assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("/open  c-12 "), ReplCommand::Open("c-12".into()));
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
    }

    #[test]
    fn mistyped_slash_commands_are_not_sent() {
        assert_eq!(
            ReplCommand::parse("/histroy"),
            ReplCommand::Unknown("/histroy".into())
        );
        assert_eq!(ReplCommand::parse("/open"), ReplCommand::Unknown("/open".into()));
        assert_eq!(ReplCommand::parse("/open   "), ReplCommand::Unknown("/open".into()));
    }

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            ReplCommand::parse("hello /there"),
            ReplCommand::Message("hello /there".into())
        );
    }
}
