use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use stellar_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use stellar_contracts::conversation::Role;
use stellar_contracts::gallery::GeneratedImage;
use stellar_contracts::render::{markdown_to_html, markdown_to_terminal, render_message};
use stellar_contracts::settings::{Mode, Persona, Settings, SpeedTier, Theme};
use stellar_engine::{ChatSession, ImageOutcome, SessionConfig};

#[derive(Debug, Parser)]
#[command(name = "stellar", version, about = "Stellar AI terminal client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat session.
    Chat(ChatArgs),
    /// One streamed answer, then exit.
    Ask(AskArgs),
    /// Generate one image and save it.
    Image(ImageArgs),
    /// Print the board carried by a message.
    Board(BoardArgs),
    /// Print the system instruction for the given settings.
    Compose(ComposeArgs),
}

#[derive(Debug, Clone, Args)]
struct SettingsArgs {
    #[arg(long, default_value = "normal", value_parser = parse_speed)]
    speed: SpeedTier,
    #[arg(long, default_value = "chat", value_parser = parse_mode)]
    mode: Mode,
    #[arg(long, default_value = "none", value_parser = parse_persona)]
    persona: Persona,
    #[arg(long, default_value = "dark", value_parser = parse_theme)]
    theme: Theme,
    /// Access code that turns on relaxed safety settings.
    #[arg(long)]
    nsfw_code: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = "stellar-out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    settings: SettingsArgs,
    #[arg(long)]
    dryrun: bool,
    /// Print replies as rendered markdown once complete instead of streaming.
    #[arg(long)]
    render: bool,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    settings: SettingsArgs,
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    render: bool,
}

#[derive(Debug, Parser)]
struct ImageArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    settings: SettingsArgs,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct BoardArgs {
    text: String,
    #[arg(long)]
    html: bool,
}

#[derive(Debug, Parser)]
struct ComposeArgs {
    #[command(flatten)]
    settings: SettingsArgs,
    /// Also print the resolved model, budget and safety policy as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_speed(raw: &str) -> Result<SpeedTier, String> {
    SpeedTier::parse(raw).ok_or_else(|| format!("unknown speed tier '{raw}'"))
}

fn parse_mode(raw: &str) -> Result<Mode, String> {
    Mode::parse(raw).ok_or_else(|| format!("unknown mode '{raw}'"))
}

fn parse_persona(raw: &str) -> Result<Persona, String> {
    Persona::parse(raw).ok_or_else(|| format!("unknown persona '{raw}'"))
}

fn parse_theme(raw: &str) -> Result<Theme, String> {
    Theme::parse(raw).ok_or_else(|| format!("unknown theme '{raw}'"))
}

impl SettingsArgs {
    fn to_settings(&self) -> Settings {
        let mut settings = Settings::new(self.speed, self.mode, self.persona, self.theme);
        if let Some(code) = self.nsfw_code.as_deref() {
            if !settings.unlock_nsfw(code) {
                eprintln!("Incorrect access code; safety settings unchanged.");
            }
        }
        settings
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stellar error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args),
        Command::Image(args) => run_image(args),
        Command::Board(args) => run_board(args),
        Command::Compose(args) => run_compose(args),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = ChatSession::new(SessionConfig {
        settings: args.settings.to_settings(),
        events_path: Some(events_path),
        dryrun: args.dryrun,
        session_id: None,
    })?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Stellar AI chat started. Type /help for commands.");
    println!("{}", session.settings().mode.greeting());
    println!("[{}]", session.settings().status_line());

    loop {
        print!("{} > ", session.settings().mode.placeholder());
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => continue,
            "help" => print_help(),
            "show_settings" => print_settings(session.settings()),
            "set_speed" => {
                let raw = intent.arg("speed");
                match SpeedTier::parse(raw) {
                    Some(speed) => {
                        session.change_settings(|settings| settings.speed = speed)?;
                        println!("Speed: {} ({})", speed.label(), speed.description());
                    }
                    None => println!(
                        "Unknown speed tier '{raw}'. Options: {}",
                        join_options(SpeedTier::ALL.iter().map(SpeedTier::as_str))
                    ),
                }
            }
            "set_mode" => {
                let raw = intent.arg("mode");
                match Mode::parse(raw) {
                    Some(mode) => {
                        session.change_settings(|settings| settings.mode = mode)?;
                        println!("{}: {}", mode.label(), mode.greeting());
                    }
                    None => println!(
                        "Unknown mode '{raw}'. Options: {}",
                        join_options(Mode::ALL.iter().map(Mode::as_str))
                    ),
                }
            }
            "set_persona" => {
                let raw = intent.arg("persona");
                match Persona::parse(raw) {
                    Some(persona) => {
                        session.change_settings(|settings| settings.persona = persona)?;
                        println!("Persona: {} ({})", persona.display_name(), persona.tagline());
                    }
                    None => println!(
                        "Unknown persona '{raw}'. Options: {}",
                        join_options(Persona::ALL.iter().map(Persona::as_str))
                    ),
                }
            }
            "set_theme" => {
                let raw = intent.arg("theme");
                match Theme::parse(raw) {
                    Some(theme) => {
                        session.change_settings(|settings| settings.theme = theme)?;
                        println!("Theme: {}", theme.as_str());
                    }
                    None => println!("Unknown theme '{raw}'. Options: dark light lila"),
                }
            }
            "set_nsfw" => match intent.arg("state").to_ascii_lowercase().as_str() {
                "off" => {
                    session.change_settings(Settings::disable_nsfw)?;
                    println!("Safety filters restored.");
                }
                "on" if session.settings().nsfw_enabled() => {
                    println!("Unrestricted mode is already on.");
                }
                "on" => println!("Enter the access code with /unlock <code>."),
                _ => println!("Usage: /nsfw on|off"),
            },
            "unlock_nsfw" => {
                let code = intent.arg("code").to_string();
                let mut unlocked = false;
                session.change_settings(|settings| unlocked = settings.unlock_nsfw(&code))?;
                if unlocked {
                    println!("Unrestricted mode enabled.");
                } else {
                    println!("Incorrect access code.");
                }
            }
            "generate_image" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    println!("Usage: /image <prompt>");
                    continue;
                };
                println!("Generating image...");
                report_image(session.generate_image(prompt)?);
            }
            "show_gallery" => print_gallery(&session),
            "save_image" => {
                let id = intent.arg("id");
                if id.is_empty() {
                    println!("Usage: /save <id> [dir]");
                    continue;
                }
                let Some(image) = session.gallery().get(id) else {
                    println!("No image with id {id}. See /gallery.");
                    continue;
                };
                let dir = match intent.arg("dir") {
                    "" => args.out.clone(),
                    dir => PathBuf::from(dir),
                };
                match image.save_to(&dir) {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(err) => eprintln!("Save failed: {err:#}"),
                }
            }
            "export" => {
                let path = match intent.arg("path") {
                    "" => args.out.join("stellar-transcript.html"),
                    path => PathBuf::from(path),
                };
                match write_transcript(&session, &path) {
                    Ok(()) => println!("Transcript written to {}", path.display()),
                    Err(err) => eprintln!("Export failed: {err:#}"),
                }
            }
            "quit" => break,
            "send" => {
                let Some(text) = intent.prompt.as_deref() else {
                    continue;
                };
                if let Err(err) = send_and_print(&mut session, text, args.render) {
                    eprintln!("{err:#}");
                }
            }
            _ => println!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg("command")
            ),
        }
    }

    session.finish()?;
    Ok(())
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let mut session = ChatSession::new(SessionConfig {
        settings: args.settings.to_settings(),
        events_path: args.events.clone(),
        dryrun: args.dryrun,
        session_id: None,
    })?;
    let failed = send_and_print(&mut session, &args.prompt, args.render)?;
    session.finish()?;
    Ok(if failed { 1 } else { 0 })
}

fn run_image(args: ImageArgs) -> Result<i32> {
    let mut session = ChatSession::new(SessionConfig {
        settings: args.settings.to_settings(),
        events_path: args.events.clone(),
        dryrun: args.dryrun,
        session_id: None,
    })?;
    let outcome = session.generate_image(&args.prompt)?;
    let created = matches!(outcome, ImageOutcome::Created { .. });
    report_image(outcome);
    if let Some(image) = session.gallery().latest().filter(|_| created) {
        let path = image.save_to(&args.out)?;
        println!("{}", path.display());
    }
    session.finish()?;
    Ok(if created { 0 } else { 1 })
}

fn run_board(args: BoardArgs) -> Result<i32> {
    let rendered = render_message(&args.text);
    let Some(board) = rendered.board else {
        bail!("no [[FEN: ...]] marker found");
    };
    if args.html {
        println!("{}", board.to_html());
    } else {
        if !rendered.content.is_empty() {
            println!("{}\n", markdown_to_terminal(&rendered.content));
        }
        print!("{}", board.to_text());
    }
    Ok(0)
}

fn run_compose(args: ComposeArgs) -> Result<i32> {
    let session = ChatSession::new(SessionConfig {
        settings: args.settings.to_settings(),
        ..SessionConfig::default()
    })?;
    let config = session.request_config()?;
    if args.json {
        let summary = json!({
            "model": config.model,
            "thinking_budget": config.thinking_budget,
            "safety": config.safety.as_str(),
            "system_instruction": config.system_instruction,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", config.system_instruction);
    }
    Ok(0)
}

/// Sends one message and prints the reply. Returns whether the reply failed.
fn send_and_print(session: &mut ChatSession, text: &str, render: bool) -> Result<bool> {
    let mut stdout = io::stdout();
    let outcome = session.send(text, &mut |chunk| {
        if !render {
            print!("{chunk}");
            let _ = stdout.flush();
        }
    })?;

    if let Some(cause) = outcome.error.as_deref() {
        if !render && outcome.chunks > 0 {
            println!();
        }
        eprintln!("{cause}");
        println!("{}", markdown_to_terminal(&outcome.text));
        return Ok(true);
    }

    let rendered = render_message(&outcome.text);
    if render {
        println!("{}", markdown_to_terminal(&rendered.content));
    } else {
        println!();
    }
    if let Some(board) = rendered.board.as_ref() {
        println!();
        print!("{}", board.to_text());
    }
    Ok(false)
}

fn report_image(outcome: ImageOutcome) {
    match outcome {
        ImageOutcome::Created {
            image_id,
            model,
            warning,
            ..
        } => {
            if let Some(warning) = warning {
                eprintln!("{warning}");
            }
            println!("Image {image_id} added to the gallery ({model}).");
        }
        ImageOutcome::Failed { message, cause } => {
            eprintln!("{cause}");
            println!("{message}");
        }
    }
}

fn print_help() {
    println!("Commands:");
    for (usage, summary) in CHAT_HELP_COMMANDS {
        println!("  {usage:<18} {summary}");
    }
    println!("Anything else is sent as a message.");
}

fn print_settings(settings: &Settings) {
    println!(
        "Speed:   {} ({})",
        settings.speed.label(),
        settings.speed.description()
    );
    println!("Mode:    {}", settings.mode.label());
    println!(
        "Persona: {} ({})",
        settings.persona.display_name(),
        settings.persona.tagline()
    );
    println!("Theme:   {}", settings.theme.as_str());
    println!("Status:  {}", settings.status_line());
}

fn print_gallery(session: &ChatSession) {
    if session.gallery().is_empty() {
        println!("No images yet. Try /image <prompt>.");
        return;
    }
    for image in session.gallery().iter() {
        println!(
            "  {}  {}  {}",
            image.id,
            image.created_at.format("%H:%M:%S"),
            image.prompt
        );
    }
}

fn join_options<'a>(options: impl Iterator<Item = &'a str>) -> String {
    options.collect::<Vec<_>>().join(" ")
}

fn write_transcript(session: &ChatSession, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, transcript_html(session))
        .with_context(|| format!("failed to write {}", path.display()))
}

fn theme_css(theme: Theme) -> &'static str {
    match theme {
        Theme::Dark => "body{background:#0b0b12;color:#e6e6f0}.model{background:#171726}.user{background:#23233a}",
        Theme::Light => "body{background:#f7f7fa;color:#1b1b24}.model{background:#ffffff}.user{background:#e8e8f2}",
        Theme::Lila => "body{background:#1d1429;color:#f0e6ff}.model{background:#2a1d3d}.user{background:#3b2a55}",
    }
}

const BASE_CSS: &str = "body{font-family:sans-serif;max-width:860px;margin:2rem auto;padding:0 1rem}\
.msg{border-radius:12px;padding:.75rem 1rem;margin:.75rem 0}.who{font-size:.75rem;opacity:.7}\
.error{border:1px solid #c0392b}pre{overflow-x:auto;padding:.5rem;background:rgba(0,0,0,.25)}\
.board{display:inline-block;margin-top:.5rem}.grid{display:grid;grid-template-columns:repeat(8,2.5rem)}\
.sq{width:2.5rem;height:2.5rem;display:flex;align-items:center;justify-content:center;font-size:1.8rem}\
.light{background:#e8d9b5}.dark{background:#a57a52}.white{color:#fff;text-shadow:0 0 2px #000}.black{color:#000}\
.to-move{font-size:.8rem;margin-top:.25rem}.gallery img{width:200px;margin:.25rem;border-radius:8px}";

fn transcript_html(session: &ChatSession) -> String {
    let settings = session.settings();
    let mut out = String::new();
    out.push_str("<!doctype html><html><head><meta charset='utf-8'><title>Stellar AI</title><style>");
    out.push_str(BASE_CSS);
    out.push_str(theme_css(settings.theme));
    out.push_str("</style></head><body>");
    out.push_str(&format!(
        "<h1>Stellar AI</h1><p class='who'>{}</p>",
        escape_html(&settings.status_line())
    ));

    for message in session.conversation().messages() {
        let (class, who) = match message.role {
            Role::User => ("user", "You"),
            Role::Model | Role::System => ("model", settings.persona.display_name()),
        };
        let error_class = if message.is_error { " error" } else { "" };
        let rendered = render_message(&message.text);
        out.push_str(&format!(
            "<div class='msg {class}{error_class}'><div class='who'>{} · {}</div>",
            escape_html(who),
            message.timestamp.format("%Y-%m-%d %H:%M")
        ));
        out.push_str(&markdown_to_html(&rendered.content));
        if let Some(board) = rendered.board.as_ref() {
            out.push_str(&board.to_html());
        }
        out.push_str("</div>");
    }

    if !session.gallery().is_empty() {
        out.push_str("<h2>Gallery</h2><div class='gallery'>");
        for image in session.gallery().iter() {
            out.push_str(&gallery_item_html(image));
        }
        out.push_str("</div>");
    }

    out.push_str("</body></html>\n");
    out
}

fn gallery_item_html(image: &GeneratedImage) -> String {
    let uri = escape_html(&image.data_uri);
    let prompt = escape_html(&image.prompt);
    format!(
        "<a download='{}' href='{uri}'><img src='{uri}' alt='{prompt}' title='{prompt}'></a>",
        escape_html(&image.download_name())
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
