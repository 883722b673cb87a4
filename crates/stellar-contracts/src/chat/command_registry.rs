#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose argument is kept verbatim under `arg_key`.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "speed",
        action: "set_speed",
        arg_key: "speed",
    },
    CommandSpec {
        command: "mode",
        action: "set_mode",
        arg_key: "mode",
    },
    CommandSpec {
        command: "persona",
        action: "set_persona",
        arg_key: "persona",
    },
    CommandSpec {
        command: "theme",
        action: "set_theme",
        arg_key: "theme",
    },
    CommandSpec {
        command: "nsfw",
        action: "set_nsfw",
        arg_key: "state",
    },
    CommandSpec {
        command: "unlock",
        action: "unlock_nsfw",
        arg_key: "code",
    },
];

pub(crate) const IMAGE_COMMAND: CommandSpec = CommandSpec {
    command: "image",
    action: "generate_image",
    arg_key: "prompt",
};

pub(crate) const SAVE_COMMAND: CommandSpec = CommandSpec {
    command: "save",
    action: "save_image",
    arg_key: "id",
};

pub(crate) const EXPORT_COMMAND: CommandSpec = CommandSpec {
    command: "export",
    action: "export",
    arg_key: "path",
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "settings",
        action: "show_settings",
        arg_key: "",
    },
    CommandSpec {
        command: "gallery",
        action: "show_gallery",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[(&str, &str)] = &[
    ("/help", "list commands"),
    ("/settings", "show current settings"),
    ("/speed <tier>", "deep_thinking | normal | fast | very_fast | extremely_fast"),
    ("/mode <mode>", "chat | chess | coding | script_writer"),
    ("/persona <name>", "none | dazai | chuuya | atsushi | akutagawa | ranpo | ..."),
    ("/theme <theme>", "dark | light | lila"),
    ("/nsfw on|off", "toggle relaxed safety (on needs /unlock)"),
    ("/unlock <code>", "enter the NSFW access code"),
    ("/image <prompt>", "generate an image into the gallery"),
    ("/gallery", "list generated images, newest first"),
    ("/save <id> [dir]", "write a gallery image to disk"),
    ("/export [path]", "write the transcript as HTML"),
    ("/quit", "end the session"),
];
