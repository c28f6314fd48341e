//! Rough token estimation.
//!
//! No tokenizer is loaded; each character is weighted by the Unicode script
//! it belongs to, which is close enough for budget decisions across CJK and
//! Latin-heavy conversations alike.

use unicode_script::{Script, UnicodeScript};

use crate::llm::{ChatRequest, ToolDefinition};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Han,
    Kana,
    Cyrillic,
    Arabic,
    Latin,
    Digit,
    Symbol,
    Punct,
    Space,
    Other,
}

impl CharClass {
    fn of(c: char) -> Self {
        match c.script() {
            Script::Han => Self::Han,
            Script::Hiragana | Script::Katakana | Script::Hangul => Self::Kana,
            Script::Cyrillic => Self::Cyrillic,
            Script::Arabic if !c.is_numeric() => Self::Arabic,
            Script::Latin => Self::Latin,
            _ if c.is_numeric() => Self::Digit,
            _ if is_symbol(c) => Self::Symbol,
            _ if c.is_ascii_punctuation() || is_wide_punct(c as u32) => Self::Punct,
            _ if c.is_whitespace() => Self::Space,
            _ => Self::Other,
        }
    }

    fn weight(self) -> f64 {
        match self {
            Self::Han => 1.0 / 1.2,
            Self::Kana => 1.0 / 1.5,
            Self::Cyrillic => 1.0 / 3.0,
            Self::Arabic => 1.0 / 2.5,
            Self::Latin => 1.0 / 3.5,
            Self::Digit => 1.0 / 4.0,
            Self::Symbol => 1.0,
            Self::Punct => 1.0 / 2.0,
            Self::Space => 1.0 / 5.0,
            Self::Other => 1.0 / 2.0,
        }
    }
}

/// Math, modifier and other symbols. Currency signs are not included.
fn is_symbol(c: char) -> bool {
    matches!(c, '+' | '<' | '=' | '>' | '|' | '~' | '^' | '`')
        || matches!(c as u32,
            0x00A6 | 0x00A8 | 0x00A9 | 0x00AC | 0x00AE..=0x00B1 | 0x00B4 | 0x00B8 | 0x00D7 | 0x00F7
            | 0x02C2..=0x02C5 | 0x02D2..=0x02DF
            | 0x2100..=0x214F | 0x2190..=0x23FF | 0x2500..=0x27BF | 0x2900..=0x2BFF
            | 0x3200..=0x33FF | 0xFF0B | 0xFF1C..=0xFF1E | 0xFF5C | 0xFF5E
            | 0x1F000..=0x1FAFF)
}

fn is_wide_punct(cp: u32) -> bool {
    matches!(cp,
        0x00A1 | 0x00A7 | 0x00AB | 0x00B6 | 0x00B7 | 0x00BB | 0x00BF
        | 0x2010..=0x2027 | 0x2030..=0x205E
        | 0x3001..=0x3003 | 0x3008..=0x3011 | 0x3014..=0x301F | 0x30FB
        | 0xFE10..=0xFE19 | 0xFE30..=0xFE4F
        | 0xFF01..=0xFF03 | 0xFF05..=0xFF0A | 0xFF0C..=0xFF0F | 0xFF1A | 0xFF1B | 0xFF1F | 0xFF20
        | 0xFF3B..=0xFF3D | 0xFF3F | 0xFF5B | 0xFF5D | 0xFF5F..=0xFF65)
}

/// Estimate the token count of one piece of text.
///
/// Empty text costs nothing; any non-empty text costs at least one token.
pub fn estimate_text(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let tokens: f64 = text.chars().map(|c| CharClass::of(c).weight()).sum();
    tokens as usize + 1
}

/// Estimate the token count of a message list plus the tool schemas that
/// will be sent with it.
pub fn estimate_messages(messages: &[Message], tools: &[ToolDefinition]) -> usize {
    let messages: usize = messages.iter().map(|m| estimate_text(&m.wire_text())).sum();
    let tools: usize = tools.iter().map(estimate_tool).sum();
    messages + tools
}

/// Estimate a full request as it will go on the wire.
pub fn estimate_request(request: &ChatRequest) -> usize {
    estimate_messages(&request.messages, &request.tools)
}

fn estimate_tool(tool: &ToolDefinition) -> usize {
    let mut text = String::with_capacity(tool.name.len() + tool.description.len() + 64);
    text.push_str(&tool.name);
    text.push_str(&tool.description);
    text.push_str(&tool.parameters.to_string());
    estimate_text(&text)
}
