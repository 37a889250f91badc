#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashCommand {
    Apps,
    Fork,
    Mcp,
    Review,
    Compact,
    New,
    Resume,
    Status,
}

impl SlashCommand {
    const ALL: [SlashCommand; 8] = [
        SlashCommand::Apps,
        SlashCommand::Fork,
        SlashCommand::Mcp,
        SlashCommand::Review,
        SlashCommand::Compact,
        SlashCommand::New,
        SlashCommand::Resume,
        SlashCommand::Status,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlashCommand::Apps => "/apps",
            SlashCommand::Fork => "/fork",
            SlashCommand::Mcp => "/mcp",
            SlashCommand::Review => "/review",
            SlashCommand::Compact => "/compact",
            SlashCommand::New => "/new",
            SlashCommand::Resume => "/resume",
            SlashCommand::Status => "/status",
        }
    }
}

/// Classifies message text. Matching is case-insensitive on the trimmed text
/// and requires the command to be followed by whitespace or the end of input,
/// so `/newer` stays plain text. `/apps` only counts when apps are enabled.
pub fn parse_slash_command(text: &str, apps_enabled: bool) -> Option<SlashCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    SlashCommand::ALL.into_iter().find(|command| {
        if *command == SlashCommand::Apps && !apps_enabled {
            return false;
        }
        matches_command_prefix(trimmed, command.as_str())
    })
}

/// Text following the command word, trimmed. Empty when there is none.
pub fn slash_command_remainder(text: &str, command: SlashCommand) -> &str {
    let trimmed = text.trim();
    if !matches_command_prefix(trimmed, command.as_str()) {
        return "";
    }
    trimmed[command.as_str().len()..].trim()
}

fn matches_command_prefix(trimmed: &str, name: &str) -> bool {
    let Some(head) = trimmed.get(..name.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(name) {
        return false;
    }
    trimmed[name.len()..]
        .chars()
        .next()
        .is_none_or(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_commands_case_insensitively() {
        assert_eq!(parse_slash_command("/review", false), Some(SlashCommand::Review));
        assert_eq!(parse_slash_command("  /FORK  ", false), Some(SlashCommand::Fork));
        assert_eq!(
            parse_slash_command("/New write tests", false),
            Some(SlashCommand::New)
        );
        assert_eq!(parse_slash_command("/status", false), Some(SlashCommand::Status));
        assert_eq!(parse_slash_command("/compact", false), Some(SlashCommand::Compact));
        assert_eq!(parse_slash_command("/resume", false), Some(SlashCommand::Resume));
        assert_eq!(parse_slash_command("/mcp", false), Some(SlashCommand::Mcp));
    }

    #[test]
    fn requires_word_boundary() {
        assert_eq!(parse_slash_command("/newer", false), None);
        assert_eq!(parse_slash_command("/reviewing things", false), None);
    }

    #[test]
    fn unknown_slash_text_is_plain() {
        assert_eq!(parse_slash_command("/unknown", false), None);
        assert_eq!(parse_slash_command("hello /new", false), None);
        assert_eq!(parse_slash_command("", false), None);
    }

    #[test]
    fn apps_depends_on_feature_flag() {
        assert_eq!(parse_slash_command("/apps", false), None);
        assert_eq!(parse_slash_command("/apps", true), Some(SlashCommand::Apps));
    }

    #[test]
    fn remainder_strips_command_word() {
        assert_eq!(
            slash_command_remainder("  /new   fix the build ", SlashCommand::New),
            "fix the build"
        );
        assert_eq!(slash_command_remainder("/new", SlashCommand::New), "");
        assert_eq!(slash_command_remainder("plain", SlashCommand::New), "");
    }

    #[test]
    fn non_ascii_text_does_not_panic() {
        assert_eq!(parse_slash_command("/ñew", false), None);
        assert_eq!(parse_slash_command("/é", false), None);
    }
}
