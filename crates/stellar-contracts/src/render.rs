use std::sync::OnceLock;

use pulldown_cmark::{html, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::Regex;

use crate::board::BoardPosition;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\[FEN: (.*?)\]\]").expect("marker pattern")
    })
}

/// A message split into its markdown body and optional board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub content: String,
    pub board: Option<BoardPosition>,
}

/// Pulls the first `[[FEN: ...]]` marker out of `text`.
///
/// Returns the text with that marker removed and trimmed, plus the raw
/// payload. Without a match the text comes back untouched.
pub fn extract_marker(text: &str) -> (String, Option<String>) {
    let Some(captures) = marker_pattern().captures(text) else {
        return (text.to_string(), None);
    };
    let (Some(whole), Some(payload)) = (captures.get(0), captures.get(1)) else {
        return (text.to_string(), None);
    };
    let mut content = String::with_capacity(text.len());
    content.push_str(&text[..whole.start()]);
    content.push_str(&text[whole.end()..]);
    (content.trim().to_string(), Some(payload.as_str().to_string()))
}

pub fn render_message(text: &str) -> RenderedMessage {
    let (content, payload) = extract_marker(text);
    RenderedMessage {
        content,
        board: payload.as_deref().map(BoardPosition::parse),
    }
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

/// Renders markdown to HTML. Raw HTML in the source is emitted as escaped text.
pub fn markdown_to_html(content: &str) -> String {
    let parser = Parser::new_ext(content, markdown_options()).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Flattens markdown into plain terminal text.
///
/// Emphasis markers are dropped, headings are underlined, list items get a
/// bullet, and fenced code is indented by four spaces under a language tag.
pub fn markdown_to_terminal(content: &str) -> String {
    let mut out = String::new();
    let mut list_depth: usize = 0;
    let mut ordered: Vec<Option<u64>> = Vec::new();
    let mut in_code_block = false;
    let mut heading: Option<HeadingLevel> = None;
    let mut heading_text = String::new();

    for event in Parser::new_ext(content, markdown_options()) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading = Some(level);
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                let underline = if heading == Some(HeadingLevel::H1) {
                    '='
                } else {
                    '-'
                };
                out.push_str(&heading_text);
                out.push('\n');
                out.push_str(&underline.to_string().repeat(heading_text.chars().count()));
                out.push_str("\n\n");
                heading = None;
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        out.push_str(&format!("    [{lang}]\n"));
                    }
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push('\n');
            }
            Event::Start(Tag::List(start)) => {
                list_depth += 1;
                ordered.push(start);
            }
            Event::End(TagEnd::List(_)) => {
                list_depth = list_depth.saturating_sub(1);
                ordered.pop();
                if list_depth == 0 {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
                match ordered.last_mut() {
                    Some(Some(number)) => {
                        out.push_str(&format!("{number}. "));
                        *number += 1;
                    }
                    _ => out.push_str("• "),
                }
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if list_depth == 0 {
                    out.push_str("\n\n");
                }
            }
            Event::Text(text) => {
                if heading.is_some() {
                    heading_text.push_str(&text);
                } else if in_code_block {
                    for line in text.lines() {
                        out.push_str("    ");
                        out.push_str(line);
                        out.push('\n');
                    }
                } else {
                    out.push_str(&text);
                }
            }
            Event::Code(code) => {
                let snippet = format!("`{code}`");
                if heading.is_some() {
                    heading_text.push_str(&snippet);
                } else {
                    out.push_str(&snippet);
                }
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("────────\n\n"),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::{extract_marker, markdown_to_html, markdown_to_terminal, render_message};

    #[test]
    fn marker_is_removed_and_remaining_text_trimmed() {
        let (content, payload) =
            extract_marker("I play e5.\n\n[[FEN: 8/8/8/4k3/8/8/8/4K3 w]]\n");
        assert_eq!(content, "I play e5.");
        assert_eq!(payload.as_deref(), Some("8/8/8/4k3/8/8/8/4K3 w"));
    }

    #[test]
    fn only_first_marker_is_extracted() {
        let (content, payload) = extract_marker("[[FEN: 8/8 w]] mid [[FEN: 4k3 b]]");
        assert_eq!(payload.as_deref(), Some("8/8 w"));
        assert_eq!(content, "mid [[FEN: 4k3 b]]");
    }

    #[test]
    fn absent_or_malformed_marker_yields_no_board() {
        for text in [
            "plain text",
            "[[FEN 8/8/8]]",
            "[[FEN: 8/8/8",
            "[FEN: 8/8]",
            "[[FEN: 8/8\n/8]]",
        ] {
            let rendered = render_message(text);
            assert!(rendered.board.is_none(), "unexpected board for {text:?}");
            assert_eq!(rendered.content, text);
        }
    }

    #[test]
    fn rendered_message_carries_board_and_content() {
        let rendered = render_message("Your move.[[FEN: 8/8/8/4k3/8/8/8/4K3 w]]");
        assert_eq!(rendered.content, "Your move.");
        let board = rendered.board.unwrap_or_else(|| panic!("board expected"));
        assert_eq!(board.occupied(), 2);
        assert_eq!(board.side_label(), "White to move");
    }

    #[test]
    fn marker_only_message_has_empty_content() {
        let rendered = render_message("  [[FEN: 8/8/8/8/8/8/8/8 b]]  ");
        assert!(rendered.content.is_empty());
        assert!(rendered.board.is_some());
    }

    #[test]
    fn markdown_html_renders_code_and_emphasis() {
        let html = markdown_to_html("**bold** and `code`\n\n```rust\nfn main() {}\n```");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<code>code</code>"));
        assert!(html.contains("language-rust"));
    }

    #[test]
    fn markdown_html_escapes_raw_html() {
        let html = markdown_to_html("hi <img src=x onerror=alert(1)>\n\n<div>block</div>");
        assert!(!html.contains("<img"));
        assert!(!html.contains("<div>"));
        assert!(html.contains("&lt;img"));
    }

    #[test]
    fn terminal_rendering_flattens_markdown() {
        let text = markdown_to_terminal(
            "# Title\n\nSome *soft* words.\n\n- one\n- two\n\n```py\nprint(1)\n```",
        );
        assert!(text.starts_with("Title\n====="));
        assert!(text.contains("Some soft words."));
        assert!(text.contains("• one\n• two"));
        assert!(text.contains("    [py]\n    print(1)"));
    }
}
