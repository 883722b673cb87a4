use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, EXPORT_COMMAND, IMAGE_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SAVE_COMMAND,
};

/// One line of REPL input, classified.
///
/// `action` is `noop` for blank input, `send` for plain text, `unknown` for an
/// unrecognised slash command, or the action of a registered command.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.command_args.insert(key.to_string(), value.into());
        self
    }

    /// String argument, empty when absent.
    pub fn arg(&self, key: &str) -> &str {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                return Intent::new(spec.action, text).with_arg(spec.arg_key, arg);
            }

            if command == IMAGE_COMMAND.command {
                let mut intent = Intent::new(IMAGE_COMMAND.action, text);
                if !arg.is_empty() {
                    intent.prompt = Some(arg.to_string());
                }
                return intent;
            }

            if command == SAVE_COMMAND.command {
                let mut parts = parse_path_args(arg).into_iter();
                let id = parts.next().unwrap_or_default();
                let dir = parts.collect::<Vec<_>>().join(" ");
                let intent = Intent::new(SAVE_COMMAND.action, text).with_arg(SAVE_COMMAND.arg_key, id);
                return if dir.is_empty() {
                    intent
                } else {
                    intent.with_arg("dir", dir)
                };
            }

            if command == EXPORT_COMMAND.command {
                let path = parse_single_path_arg(arg);
                let intent = Intent::new(EXPORT_COMMAND.action, text);
                return if path.is_empty() {
                    intent
                } else {
                    intent.with_arg(EXPORT_COMMAND.arg_key, path)
                };
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", command)
                .with_arg("arg", arg);
        }
    }

    let mut intent = Intent::new("send", text);
    intent.prompt = Some(text.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("").action, "noop");
        assert_eq!(parse_intent("   \t").action, "noop");
    }

    #[test]
    fn plain_text_is_sent_verbatim() {
        let intent = parse_intent("  e4, your move  ");
        assert_eq!(intent.action, "send");
        assert_eq!(intent.prompt.as_deref(), Some("  e4, your move  "));

        let lone_slash = parse_intent(" / what");
        assert_eq!(lone_slash.prompt.as_deref(), Some(" / what"));
    }

    #[test]
    fn lone_slash_is_sent_as_text() {
        assert_eq!(parse_intent("/ what").action, "send");
    }

    #[test]
    fn parse_setting_commands() {
        let speed = parse_intent("/speed very_fast");
        assert_eq!(speed.action, "set_speed");
        assert_eq!(speed.command_args["speed"], json!("very_fast"));

        let mode = parse_intent("/MODE script writer");
        assert_eq!(mode.action, "set_mode");
        assert_eq!(mode.arg("mode"), "script writer");

        assert_eq!(parse_intent("/persona dazai").arg("persona"), "dazai");
        assert_eq!(parse_intent("/theme lila").arg("theme"), "lila");
        assert_eq!(parse_intent("/nsfw off").arg("state"), "off");

        let unlock = parse_intent("/unlock 0211");
        assert_eq!(unlock.action, "unlock_nsfw");
        assert_eq!(unlock.arg("code"), "0211");
    }

    #[test]
    fn parse_image_prompt() {
        let image = parse_intent("/image  a neon city at dusk ");
        assert_eq!(image.action, "generate_image");
        assert_eq!(image.prompt.as_deref(), Some("a neon city at dusk"));
        assert_eq!(parse_intent("/image").prompt, None);
    }

    #[test]
    fn parse_save_with_quoted_dir() {
        let save = parse_intent("/save 1700-abc \"/tmp/my pictures\"");
        assert_eq!(save.action, "save_image");
        assert_eq!(save.command_args["id"], json!("1700-abc"));
        assert_eq!(save.command_args["dir"], json!("/tmp/my pictures"));

        let bare = parse_intent("/save 1700-abc");
        assert!(!bare.command_args.contains_key("dir"));
    }

    #[test]
    fn parse_export_path_is_optional() {
        assert!(parse_intent("/export").command_args.is_empty());
        assert_eq!(
            parse_intent("/export \"/tmp/chat log.html\"").arg("path"),
            "/tmp/chat log.html"
        );
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/settings").action, "show_settings");
        assert_eq!(parse_intent("/gallery").action, "show_gallery");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
