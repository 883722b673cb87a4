use std::collections::BTreeMap;
use std::env;
use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use stellar_contracts::conversation::{Conversation, HistoryTurn, CHAT_ERROR_TEXT};
use stellar_contracts::events::{self, payload, EventWriter};
use stellar_contracts::gallery::{encode_data_uri, Gallery, GeneratedImage, IMAGE_ERROR_TEXT};
use stellar_contracts::instructions::compose;
use stellar_contracts::models::ModelSelector;
use stellar_contracts::settings::{SafetyPolicy, Settings};
use uuid::Uuid;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const CHAT_TIMEOUT_SECS: u64 = 300;
const IMAGE_TIMEOUT_SECS: u64 = 120;
const DRYRUN_IMAGE_SIZE: u32 = 256;
const DRYRUN_CHESS_FEN: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub history: Vec<HistoryTurn>,
    pub message: String,
    pub system_instruction: String,
    pub safety: SafetyPolicy,
    pub thinking_budget: Option<u32>,
}

/// Streams one reply. Chunks are handed to `on_chunk` in arrival order; an
/// `Err` after some chunks means the stream broke mid-reply.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn stream_chat(&self, request: &ChatRequest, on_chunk: &mut dyn FnMut(&str)) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub safety: SafetyPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ImageRequest) -> Result<ImageBytes>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    chat: BTreeMap<String, Box<dyn ChatProvider>>,
    image: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_chat<P: ChatProvider + 'static>(&mut self, provider: P) {
        self.chat
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn register_image<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.image
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn chat(&self, name: &str) -> Option<&dyn ChatProvider> {
        self.chat.get(name).map(|provider| provider.as_ref())
    }

    pub fn image(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.image.get(name).map(|provider| provider.as_ref())
    }
}

pub fn default_provider_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register_chat(GeminiChatProvider::new());
    registry.register_chat(DryrunChatProvider);
    registry.register_image(ImagenProvider::new());
    registry.register_image(GeminiImageProvider::new());
    registry.register_image(DryrunImageProvider);
    registry
}

/// Safety settings for a policy. Standard sends none and leaves the service
/// defaults in place.
pub fn safety_settings(policy: SafetyPolicy) -> Option<Vec<Value>> {
    match policy {
        SafetyPolicy::Standard => None,
        SafetyPolicy::Permissive => Some(
            HARM_CATEGORIES
                .into_iter()
                .map(|category| {
                    json!({
                        "category": category,
                        "threshold": "BLOCK_NONE",
                    })
                })
                .collect(),
        ),
    }
}

pub struct GeminiChatProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiChatProvider {
    pub fn new() -> Self {
        Self::with_config(api_base_from_env(&["GEMINI_API_BASE"]), gemini_api_key())
    }

    pub fn with_config(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}:streamGenerateContent",
            self.api_base,
            model_path(model)
        )
    }

    fn build_payload(request: &ChatRequest) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role,
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": request.message }],
        }));

        let mut payload = Map::new();
        payload.insert("contents".to_string(), Value::Array(contents));
        if !request.system_instruction.trim().is_empty() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": request.system_instruction }] }),
            );
        }
        if let Some(safety) = safety_settings(request.safety) {
            payload.insert("safetySettings".to_string(), Value::Array(safety));
        }
        if let Some(budget) = request.thinking_budget.filter(|budget| *budget > 0) {
            payload.insert(
                "generationConfig".to_string(),
                json!({ "thinkingConfig": { "thinkingBudget": budget } }),
            );
        }
        Value::Object(payload)
    }
}

impl ChatProvider for GeminiChatProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn stream_chat(&self, request: &ChatRequest, on_chunk: &mut dyn FnMut(&str)) -> Result<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint(&request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("alt", "sse"), ("key", api_key)])
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini chat request failed ({endpoint})"))?;
        let response = ensure_success("Gemini chat", response)?;
        decode_sse_stream(BufReader::new(response), on_chunk)?;
        Ok(())
    }
}

/// Reads a server-sent event body and forwards every text part in order.
///
/// Returns how many chunks were forwarded.
pub fn decode_sse_stream<R: BufRead>(
    reader: R,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<usize> {
    let mut forwarded = 0;
    for line in reader.lines() {
        let line = line.context("Gemini stream read failed")?;
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            break;
        }
        let chunk: Value =
            serde_json::from_str(data).context("Gemini stream returned an invalid JSON chunk")?;
        for text in stream_chunk_texts(&chunk)? {
            on_chunk(&text);
            forwarded += 1;
        }
    }
    Ok(forwarded)
}

fn stream_chunk_texts(chunk: &Value) -> Result<Vec<String>> {
    if let Some(reason) = chunk
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        bail!("Gemini blocked the prompt ({reason})");
    }
    if let Some(error) = chunk.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("Gemini stream error: {message}");
    }

    let parts = chunk
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(parts
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect())
}

pub struct ImagenProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl ImagenProvider {
    pub fn new() -> Self {
        Self::with_config(
            api_base_from_env(&["IMAGEN_API_BASE", "GEMINI_API_BASE"]),
            non_empty_env("IMAGEN_API_KEY").or_else(gemini_api_key),
        )
    }

    pub fn with_config(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http: HttpClient::new(),
        }
    }

    fn build_payload(request: &ImageRequest) -> Value {
        let mut parameters = Map::new();
        parameters.insert("sampleCount".to_string(), json!(1));
        parameters.insert("outputMimeType".to_string(), json!("image/png"));
        if request.safety == SafetyPolicy::Permissive {
            parameters.insert("safetySetting".to_string(), json!("block_only_high"));
        }
        json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": parameters,
        })
    }

    fn extract_predictions(response_payload: &Value) -> Result<Vec<ImageBytes>> {
        let mut out = Vec::new();
        let predictions = response_payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in predictions {
            let Some(obj) = row.as_object() else {
                continue;
            };
            let Some(encoded) = obj
                .get("bytesBase64Encoded")
                .or_else(|| obj.get("bytes_base64_encoded"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("Imagen image base64 decode failed")?;
            out.push(ImageBytes {
                bytes,
                mime_type: obj
                    .get("mimeType")
                    .or_else(|| obj.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        Ok(out)
    }
}

impl ImageProvider for ImagenProvider {
    fn name(&self) -> &str {
        "imagen"
    }

    fn generate(&self, request: &ImageRequest) -> Result<ImageBytes> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("IMAGEN_API_KEY, GEMINI_API_KEY, or GOOGLE_API_KEY not set");
        };
        let endpoint = format!("{}/{}:predict", self.api_base, model_path(&request.model));
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(IMAGE_TIMEOUT_SECS))
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Imagen request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Imagen", response)?;
        Self::extract_predictions(&response_payload)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Imagen returned no images"))
    }
}

pub struct GeminiImageProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiImageProvider {
    pub fn new() -> Self {
        Self::with_config(api_base_from_env(&["GEMINI_API_BASE"]), gemini_api_key())
    }

    pub fn with_config(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http: HttpClient::new(),
        }
    }

    fn build_payload(request: &ImageRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": [{ "text": request.prompt }] }]),
        );
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseModalities": ["IMAGE"] }),
        );
        if let Some(safety) = safety_settings(request.safety) {
            payload.insert("safetySettings".to_string(), Value::Array(safety));
        }
        Value::Object(payload)
    }

    fn extract_image_items(response_payload: &Value) -> Result<Vec<ImageBytes>> {
        if let Some(reason) = response_payload
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            bail!("Gemini blocked the image prompt ({reason})");
        }
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();

        for candidate in candidates {
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                out.push(ImageBytes { bytes, mime_type });
            }
        }

        Ok(out)
    }
}

impl ImageProvider for GeminiImageProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ImageRequest) -> Result<ImageBytes> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = format!(
            "{}/{}:generateContent",
            self.api_base,
            model_path(&request.model)
        );
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(IMAGE_TIMEOUT_SECS))
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini image request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_image_items(&response_payload)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Gemini returned no images"))
    }
}

/// Offline chat: answers with a canned reply, word by word.
pub struct DryrunChatProvider;

impl DryrunChatProvider {
    fn reply_for(request: &ChatRequest) -> String {
        if request.system_instruction.contains("[[FEN:") {
            return format!(
                "You opened with \"{}\". I answer e5.\n\n[[FEN: {DRYRUN_CHESS_FEN}]]",
                request.message
            );
        }
        format!(
            "**Dryrun** reply from `{}` after {} prior turns: {}",
            request.model,
            request.history.len(),
            request.message
        )
    }
}

impl ChatProvider for DryrunChatProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn stream_chat(&self, request: &ChatRequest, on_chunk: &mut dyn FnMut(&str)) -> Result<()> {
        let reply = Self::reply_for(request);
        for piece in reply.split_inclusive(' ') {
            on_chunk(piece);
        }
        Ok(())
    }
}

/// Offline images: a solid PNG whose colour is derived from the prompt.
pub struct DryrunImageProvider;

impl ImageProvider for DryrunImageProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageRequest) -> Result<ImageBytes> {
        if request.prompt.trim().is_empty() {
            bail!("dryrun image prompt is empty");
        }
        Ok(ImageBytes {
            bytes: dryrun_png(&request.prompt)?,
            mime_type: Some("image/png".to_string()),
        })
    }
}

/// One provider and model to try for an image.
#[derive(Clone, Copy)]
pub struct ImageLeg<'a> {
    pub provider: &'a dyn ImageProvider,
    pub model: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub data_uri: String,
    pub mime_type: String,
    pub provider: String,
    pub model: String,
    pub used_fallback: bool,
    /// Why the primary leg was skipped, when the fallback served the image.
    pub warning: Option<String>,
}

/// Tries `primary`, then `fallback` once with the same prompt and policy.
pub fn generate_with_fallback(
    primary: ImageLeg<'_>,
    fallback: ImageLeg<'_>,
    prompt: &str,
    safety: SafetyPolicy,
) -> Result<FallbackOutcome> {
    let primary_err = match attempt_image_leg(primary, prompt, safety) {
        Ok(outcome) => return Ok(outcome),
        Err(err) => err,
    };
    let primary_cause = error_chain_text(&primary_err, 240);

    match attempt_image_leg(fallback, prompt, safety) {
        Ok(mut outcome) => {
            outcome.used_fallback = true;
            outcome.warning = Some(format!(
                "{} ({}) failed, served by {} ({}): {primary_cause}",
                primary.provider.name(),
                primary.model,
                fallback.provider.name(),
                fallback.model
            ));
            Ok(outcome)
        }
        Err(fallback_err) => bail!(
            "{} failed: {primary_cause}; fallback {} failed: {}",
            primary.model,
            fallback.model,
            error_chain_text(&fallback_err, 240)
        ),
    }
}

fn attempt_image_leg(leg: ImageLeg<'_>, prompt: &str, safety: SafetyPolicy) -> Result<FallbackOutcome> {
    let request = ImageRequest {
        model: leg.model.to_string(),
        prompt: prompt.to_string(),
        safety,
    };
    let image = leg.provider.generate(&request)?;
    if image.bytes.is_empty() {
        bail!("{} returned an empty image", leg.provider.name());
    }
    let mime_type = image_mime_type(image.mime_type.as_deref()).to_string();
    Ok(FallbackOutcome {
        data_uri: encode_data_uri(&mime_type, &image.bytes),
        mime_type,
        provider: leg.provider.name().to_string(),
        model: leg.model.to_string(),
        used_fallback: false,
        warning: None,
    })
}

const IMAGE_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// Maps a provider-reported MIME type onto a known image type, `image/png` otherwise.
fn image_mime_type(reported: Option<&str>) -> &'static str {
    let Some(reported) = reported else {
        return IMAGE_MIME_TYPES[0];
    };
    let reported = reported.trim().to_ascii_lowercase();
    IMAGE_MIME_TYPES
        .into_iter()
        .find(|known| *known == reported)
        .unwrap_or(IMAGE_MIME_TYPES[0])
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub settings: Settings,
    pub events_path: Option<PathBuf>,
    pub dryrun: bool,
    pub session_id: Option<String>,
}

/// Everything the next chat request needs from the current settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequestConfig {
    pub model: String,
    pub provider: String,
    pub system_instruction: String,
    pub safety: SafetyPolicy,
    pub thinking_budget: Option<u32>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub reply_id: String,
    pub text: String,
    pub chunks: usize,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Created {
        image_id: String,
        provider: String,
        model: String,
        warning: Option<String>,
    },
    Failed {
        message: &'static str,
        cause: String,
    },
}

/// Owns the settings, transcript and gallery of one session and drives the
/// providers for chat and image requests.
pub struct ChatSession {
    settings: Settings,
    conversation: Conversation,
    gallery: Gallery,
    events: EventWriter,
    selector: ModelSelector,
    providers: ProviderRegistry,
    dryrun: bool,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_providers(config, default_provider_registry())
    }

    pub fn with_providers(config: SessionConfig, providers: ProviderRegistry) -> Result<Self> {
        let session_id = config
            .session_id
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4().simple()));
        let writer = match config.events_path {
            Some(path) => EventWriter::new(path, session_id),
            None => EventWriter::disabled(session_id),
        };
        writer.emit(
            events::SESSION_STARTED,
            payload([
                ("settings", serde_json::to_value(&config.settings)?),
                ("dryrun", json!(config.dryrun)),
            ]),
        )?;

        Ok(Self {
            settings: config.settings,
            conversation: Conversation::new(),
            gallery: Gallery::new(),
            events: writer,
            selector: ModelSelector::new(None),
            providers,
            dryrun: config.dryrun,
        })
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Applies `change` and logs the new settings when anything differs.
    pub fn change_settings(&mut self, change: impl FnOnce(&mut Settings)) -> Result<bool> {
        let before = self.settings.clone();
        change(&mut self.settings);
        if self.settings == before {
            return Ok(false);
        }
        self.events.emit(
            events::SETTINGS_CHANGED,
            payload([("settings", serde_json::to_value(&self.settings)?)]),
        )?;
        Ok(true)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn request_config(&self) -> Result<ChatRequestConfig> {
        let tier = self.selector.registry.tier_config(self.settings.speed);
        let requested = if self.dryrun {
            "dryrun-text"
        } else {
            tier.model.as_str()
        };
        let selection = self
            .selector
            .select(Some(requested), "text")
            .map_err(anyhow::Error::msg)?;
        Ok(ChatRequestConfig {
            model: selection.model.name,
            provider: selection.model.provider,
            system_instruction: compose(&self.settings),
            safety: self.settings.safety_policy(),
            thinking_budget: if self.dryrun { None } else { tier.thinking_budget },
            fallback_reason: selection.fallback_reason,
        })
    }

    /// Sends `text` and streams the reply into the transcript.
    ///
    /// Blank input or a reply already in flight is an error with no side
    /// effects. A provider failure is not: the reply is replaced by the fixed
    /// error text and the outcome carries the cause.
    pub fn send(&mut self, text: &str, on_chunk: &mut dyn FnMut(&str)) -> Result<SendOutcome> {
        let config = self.request_config()?;
        let start = self.conversation.begin_exchange(text)?;
        let reply_id = start.reply_id.clone();
        let request = ChatRequest {
            model: config.model.clone(),
            history: start.history,
            message: start.user_text,
            system_instruction: config.system_instruction,
            safety: config.safety,
            thinking_budget: config.thinking_budget,
        };

        if let Err(err) = self.events.emit(
            events::CHAT_STARTED,
            payload([
                ("reply_id", json!(reply_id)),
                ("model", json!(request.model)),
                ("provider", json!(config.provider)),
                ("history_turns", json!(request.history.len())),
                ("safety", json!(request.safety.as_str())),
                ("thinking_budget", json!(request.thinking_budget)),
            ]),
        ) {
            self.conversation.fail();
            return Err(err);
        }

        let mut chunks = 0usize;
        let mut log_error: Option<anyhow::Error> = None;
        let result = match self.providers.chat(&config.provider) {
            Some(provider) => {
                let conversation = &mut self.conversation;
                let log = &self.events;
                provider.stream_chat(&request, &mut |chunk: &str| {
                    conversation.append_chunk(chunk);
                    on_chunk(chunk);
                    chunks += 1;
                    if let Err(err) = log.emit(
                        events::CHAT_CHUNK,
                        payload([
                            ("reply_id", json!(reply_id)),
                            ("index", json!(chunks)),
                            ("chars", json!(chunk.chars().count())),
                        ]),
                    ) {
                        log_error.get_or_insert(err);
                    }
                })
            }
            None => Err(anyhow!(
                "no chat provider registered for '{}'",
                config.provider
            )),
        };

        match result {
            Ok(()) => {
                self.conversation.finish();
                if let Some(err) = log_error {
                    return Err(err);
                }
                let text = self
                    .conversation
                    .messages()
                    .iter()
                    .rev()
                    .find(|message| message.id == reply_id)
                    .map(|message| message.text.clone())
                    .unwrap_or_default();
                self.events.emit(
                    events::CHAT_FINISHED,
                    payload([
                        ("reply_id", json!(reply_id)),
                        ("chunks", json!(chunks)),
                        ("chars", json!(text.chars().count())),
                    ]),
                )?;
                Ok(SendOutcome {
                    reply_id,
                    text,
                    chunks,
                    error: None,
                })
            }
            Err(err) => {
                self.conversation.fail();
                let cause = error_chain_text(&err, 512);
                self.events.emit(
                    events::CHAT_FAILED,
                    payload([
                        ("reply_id", json!(reply_id)),
                        ("chunks", json!(chunks)),
                        ("error", json!(cause)),
                    ]),
                )?;
                Ok(SendOutcome {
                    reply_id,
                    text: CHAT_ERROR_TEXT.to_string(),
                    chunks,
                    error: Some(cause),
                })
            }
        }
    }

    /// Generates one image, trying the fallback model once when the primary
    /// fails. Created images are prepended to the gallery.
    pub fn generate_image(&mut self, prompt: &str) -> Result<ImageOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("image prompt is empty");
        }
        let route = self
            .selector
            .image_route(self.dryrun)
            .map_err(anyhow::Error::msg)?;
        let safety = self.settings.safety_policy();
        let prompt_hash = prompt_digest(prompt);
        self.events.emit(
            events::IMAGE_REQUESTED,
            payload([
                ("prompt_hash", json!(prompt_hash)),
                ("primary", json!(route.primary.name)),
                ("fallback", json!(route.fallback.name)),
                ("safety", json!(safety.as_str())),
            ]),
        )?;

        let primary = self
            .providers
            .image(&route.primary.provider)
            .ok_or_else(|| anyhow!("no image provider registered for '{}'", route.primary.provider))?;
        let fallback = self
            .providers
            .image(&route.fallback.provider)
            .ok_or_else(|| anyhow!("no image provider registered for '{}'", route.fallback.provider))?;
        let result = generate_with_fallback(
            ImageLeg {
                provider: primary,
                model: &route.primary.name,
            },
            ImageLeg {
                provider: fallback,
                model: &route.fallback.name,
            },
            prompt,
            safety,
        );

        match result {
            Ok(outcome) => {
                if let Some(warning) = outcome.warning.as_ref() {
                    self.events.emit(
                        events::IMAGE_FALLBACK,
                        payload([
                            ("prompt_hash", json!(prompt_hash)),
                            ("model", json!(outcome.model)),
                            ("warning", json!(warning)),
                        ]),
                    )?;
                }
                let image = GeneratedImage::from_data_uri(prompt, outcome.data_uri);
                let image_id = image.id.clone();
                self.events.emit(
                    events::IMAGE_CREATED,
                    payload([
                        ("image_id", json!(image_id)),
                        ("provider", json!(outcome.provider)),
                        ("model", json!(outcome.model)),
                        ("mime_type", json!(outcome.mime_type)),
                        ("used_fallback", json!(outcome.used_fallback)),
                    ]),
                )?;
                self.gallery.prepend(image);
                Ok(ImageOutcome::Created {
                    image_id,
                    provider: outcome.provider,
                    model: outcome.model,
                    warning: outcome.warning,
                })
            }
            Err(err) => {
                let cause = error_chain_text(&err, 512);
                self.events.emit(
                    events::IMAGE_FAILED,
                    payload([("prompt_hash", json!(prompt_hash)), ("error", json!(cause))]),
                )?;
                Ok(ImageOutcome::Failed {
                    message: IMAGE_ERROR_TEXT,
                    cause,
                })
            }
        }
    }

    pub fn finish(&self) -> Result<()> {
        self.events.emit(
            events::SESSION_FINISHED,
            payload([
                ("messages", json!(self.conversation.len())),
                ("images", json!(self.gallery.len())),
            ]),
        )?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn gemini_api_key() -> Option<String> {
    non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
}

fn api_base_from_env(keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| non_empty_env(key))
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

fn model_path(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    }
}

fn ensure_success(provider: &str, response: HttpResponse) -> Result<HttpResponse> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    bail!(
        "{provider} request failed ({code}): {}",
        truncate_text(&body, 512)
    );
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let response = ensure_success(provider, response)?;
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// One-line summary of an error and its causes, deduplicated and truncated.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn dryrun_png(prompt: &str) -> Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt);
    let image = RgbImage::from_pixel(DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE, Rgb([r, g, b]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode dryrun image")?;
    Ok(out.into_inner())
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn prompt_digest(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..6])
}
