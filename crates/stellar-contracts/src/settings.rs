use std::fmt;

use serde::{Deserialize, Serialize};

/// Access code for the NSFW toggle.
///
/// This is a UI gate that keeps the toggle from being flipped by accident. It
/// is compared in plain text on the client and is not access control.
const NSFW_ACCESS_CODE: &str = "0211";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeedTier {
    DeepThinking,
    #[default]
    Normal,
    Fast,
    VeryFast,
    ExtremelyFast,
}

impl SpeedTier {
    pub const ALL: [SpeedTier; 5] = [
        SpeedTier::DeepThinking,
        SpeedTier::Normal,
        SpeedTier::Fast,
        SpeedTier::VeryFast,
        SpeedTier::ExtremelyFast,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_key(raw).as_str() {
            "deep_thinking" | "deep" | "thinking" => Some(Self::DeepThinking),
            "normal" => Some(Self::Normal),
            "fast" => Some(Self::Fast),
            "very_fast" => Some(Self::VeryFast),
            "extremely_fast" | "ultra" | "ultra_fast" => Some(Self::ExtremelyFast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepThinking => "deep_thinking",
            Self::Normal => "normal",
            Self::Fast => "fast",
            Self::VeryFast => "very_fast",
            Self::ExtremelyFast => "extremely_fast",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DeepThinking => "Deep Thinking",
            Self::Normal => "Normal",
            Self::Fast => "Fast",
            Self::VeryFast => "Very Fast",
            Self::ExtremelyFast => "Extremely Fast",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DeepThinking => "Gemini 3.0 Pro • Highest Intelligence (Slow)",
            Self::Normal => "Gemini 2.5 Flash • Balanced (Recommended)",
            Self::Fast => "Gemini 2.5 Flash • Optimized Latency",
            Self::VeryFast => "Gemini Flash Lite • Lowest Latency",
            Self::ExtremelyFast => "Gemini Flash Lite • Minimalist Responses",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    Chat,
    Chess,
    Coding,
    ScriptWriter,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Chat, Mode::Chess, Mode::Coding, Mode::ScriptWriter];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_key(raw).as_str() {
            "chat" => Some(Self::Chat),
            "chess" => Some(Self::Chess),
            "coding" | "code" => Some(Self::Coding),
            "script_writer" | "script" | "screenwriter" => Some(Self::ScriptWriter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Chess => "chess",
            Self::Coding => "coding",
            Self::ScriptWriter => "script_writer",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Chat => "Chat Mode",
            Self::Chess => "Chess Mode",
            Self::Coding => "Coding Mode",
            Self::ScriptWriter => "Script Writer",
        }
    }

    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Chess => "Your move (e.g., e4, Nf3)...",
            Self::Coding => "Ask for code or architectural advice...",
            Self::ScriptWriter => "Describe a scene or dialogue...",
            Self::Chat => "Message Stellar AI...",
        }
    }

    pub fn greeting(&self) -> &'static str {
        match self {
            Self::Chess => {
                "Chess Engine initialized. I'll play black unless you ask otherwise."
            }
            Self::Coding => "Coding Mode active. Ready to engineer solutions.",
            Self::ScriptWriter => "Screenwriter Mode active. Ready to draft.",
            Self::Chat => "Select a persona or start typing to begin.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    #[default]
    None,
    Dazai,
    Chuuya,
    Atsushi,
    Akutagawa,
    Ranpo,
    Fyodor,
    Nikolai,
    Kunikida,
    Yosano,
    Poe,
}

impl Persona {
    pub const ALL: [Persona; 11] = [
        Persona::None,
        Persona::Dazai,
        Persona::Chuuya,
        Persona::Atsushi,
        Persona::Akutagawa,
        Persona::Ranpo,
        Persona::Fyodor,
        Persona::Nikolai,
        Persona::Kunikida,
        Persona::Yosano,
        Persona::Poe,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let key = normalize_key(raw);
        if matches!(key.as_str(), "none" | "default" | "stellar" | "stellar_ai") {
            return Some(Self::None);
        }
        Self::ALL
            .into_iter()
            .find(|persona| persona.as_str() == key)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Dazai => "dazai",
            Self::Chuuya => "chuuya",
            Self::Atsushi => "atsushi",
            Self::Akutagawa => "akutagawa",
            Self::Ranpo => "ranpo",
            Self::Fyodor => "fyodor",
            Self::Nikolai => "nikolai",
            Self::Kunikida => "kunikida",
            Self::Yosano => "yosano",
            Self::Poe => "poe",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::None => "Stellar AI",
            Self::Dazai => "Osamu Dazai",
            Self::Chuuya => "Chuuya Nakahara",
            Self::Atsushi => "Atsushi Nakajima",
            Self::Akutagawa => "Ryunosuke Akutagawa",
            Self::Ranpo => "Ranpo Edogawa",
            Self::Fyodor => "Fyodor Dostoevsky",
            Self::Nikolai => "Nikolai Gogol",
            Self::Kunikida => "Doppo Kunikida",
            Self::Yosano => "Akiko Yosano",
            Self::Poe => "Edgar Allan Poe",
        }
    }

    pub fn tagline(&self) -> &'static str {
        match self {
            Self::None => "Default Assistant",
            Self::Dazai => "Enigmatic & Suicidal",
            Self::Chuuya => "Gravity Manipulator",
            Self::Atsushi => "The Weretiger",
            Self::Akutagawa => "Silent Rabid Dog",
            Self::Ranpo => "Super Deduction",
            Self::Fyodor => "Crime and Punishment",
            Self::Nikolai => "The Clown",
            Self::Kunikida => "The Idealist",
            Self::Yosano => "Thou Shalt Not Die",
            Self::Poe => "Guild Architect",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Theme {
    #[default]
    Dark,
    Light,
    Lila,
}

impl Theme {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_key(raw).as_str() {
            "dark" => Some(Self::Dark),
            "light" => Some(Self::Light),
            "lila" | "alternate" => Some(Self::Lila),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
            Self::Lila => "lila",
        }
    }
}

/// Safety policy forwarded to the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyPolicy {
    #[default]
    Standard,
    Permissive,
}

impl SafetyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Permissive => "permissive",
        }
    }
}

/// Session-wide settings, owned by the session controller and lent out by
/// reference to everything that builds requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub speed: SpeedTier,
    pub mode: Mode,
    pub persona: Persona,
    pub theme: Theme,
    nsfw_enabled: bool,
}

impl Settings {
    pub fn new(speed: SpeedTier, mode: Mode, persona: Persona, theme: Theme) -> Self {
        Self {
            speed,
            mode,
            persona,
            theme,
            nsfw_enabled: false,
        }
    }

    pub fn nsfw_enabled(&self) -> bool {
        self.nsfw_enabled
    }

    /// Turns the NSFW toggle on when `attempt` matches the access code.
    ///
    /// Returns whether the toggle is now on.
    pub fn unlock_nsfw(&mut self, attempt: &str) -> bool {
        if attempt == NSFW_ACCESS_CODE {
            self.nsfw_enabled = true;
        }
        self.nsfw_enabled
    }

    /// Turning the toggle off never needs the code.
    pub fn disable_nsfw(&mut self) {
        self.nsfw_enabled = false;
    }

    pub fn safety_policy(&self) -> SafetyPolicy {
        if self.nsfw_enabled {
            SafetyPolicy::Permissive
        } else {
            SafetyPolicy::Standard
        }
    }

    pub fn status_line(&self) -> String {
        let mode = self.mode.as_str().replace('_', " ").to_ascii_uppercase();
        let safety = if self.nsfw_enabled {
            "UNRESTRICTED"
        } else {
            "SECURE"
        };
        let persona = match self.persona {
            Persona::None => "STANDARD".to_string(),
            other => other.as_str().to_ascii_uppercase(),
        };
        format!("{mode} • {safety} • {persona}")
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "speed={} mode={} persona={} theme={} nsfw={}",
            self.speed.as_str(),
            self.mode.as_str(),
            self.persona.as_str(),
            self.theme.as_str(),
            self.nsfw_enabled
        )
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}
