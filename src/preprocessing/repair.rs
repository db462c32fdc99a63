//! Textual JSON repairs.
//!
//! Each repair is a pure `&str -> String` transform over a string-aware
//! token stream, so nothing inside a double-quoted string is ever rewritten.
//! Every transform is idempotent and leaves well-formed JSON untouched.
//! [`RepairPipeline::standard`] composes them in a fixed order.

use tracing::trace;

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Open(char),
    Close(char),
    Colon,
    Comma,
    Equals,
    Str { terminated: bool },
    SingleStr { terminated: bool },
    Word,
    Space,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    pub kind: Kind,
    pub text: &'a str,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '+' | '-' | '.')
}

/// Returns the byte index just past the closing quote, and whether one was found.
pub(crate) fn scan_string(input: &str, start: usize, quote: char) -> (usize, bool) {
    let mut escaped = false;
    for (offset, c) in input[start + 1..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == quote {
            return (start + 1 + offset + c.len_utf8(), true);
        }
    }
    (input.len(), false)
}

pub(crate) fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(c) = input[i..].chars().next() {
        let start = i;
        let kind = match c {
            '{' | '[' => {
                i += 1;
                Kind::Open(c)
            }
            '}' | ']' => {
                i += 1;
                Kind::Close(c)
            }
            ':' => {
                i += 1;
                Kind::Colon
            }
            ',' => {
                i += 1;
                Kind::Comma
            }
            '=' => {
                i += 1;
                Kind::Equals
            }
            '"' | '\'' => {
                let (end, terminated) = scan_string(input, i, c);
                i = end;
                if c == '"' {
                    Kind::Str { terminated }
                } else {
                    Kind::SingleStr { terminated }
                }
            }
            c if c.is_whitespace() => {
                i += run_length(&input[i..], char::is_whitespace);
                Kind::Space
            }
            c if is_word_char(c) => {
                i += run_length(&input[i..], is_word_char);
                Kind::Word
            }
            _ => {
                i += c.len_utf8();
                Kind::Other
            }
        };
        tokens.push(Token {
            kind,
            text: &input[start..i],
        });
    }

    tokens
}

fn run_length(s: &str, pred: impl Fn(char) -> bool) -> usize {
    s.char_indices()
        .find(|(_, c)| !pred(*c))
        .map(|(idx, _)| idx)
        .unwrap_or(s.len())
}

fn ends_value(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Close(_) | Kind::Str { .. } | Kind::SingleStr { .. } | Kind::Word
    )
}

fn starts_value(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Open(_) | Kind::Str { .. } | Kind::SingleStr { .. } | Kind::Word
    )
}

fn closer_for(open: char) -> char {
    if open == '{' {
        '}'
    } else {
        ']'
    }
}

/// Appends `closer`, first dropping a dangling comma or completing a
/// dangling `key:` with `null`.
fn push_closer(out: &mut String, closer: char) {
    let trimmed = out.trim_end();
    let trimmed_len = trimmed.len();
    if trimmed.ends_with(',') {
        out.truncate(trimmed_len - 1);
    } else if trimmed.ends_with(':') {
        out.push_str(" null");
    }
    out.push(closer);
}

// ============================================================================
// Repair Trait
// ============================================================================

pub trait Repair: Send + Sync {
    fn apply(&self, input: &str) -> String;
    fn name(&self) -> &str;
}

/// Removes a leading byte-order mark and surrounding whitespace.
pub struct StripBom;

impl Repair for StripBom {
    fn apply(&self, input: &str) -> String {
        input.trim_start_matches('\u{feff}').trim().to_string()
    }

    fn name(&self) -> &str {
        "StripBom"
    }
}

/// `'abc'` becomes `"abc"`, escaping inner double quotes.
pub struct SingleQuoteStrings;

impl Repair for SingleQuoteStrings {
    fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for token in tokenize(input) {
            let Kind::SingleStr { terminated } = token.kind else {
                out.push_str(token.text);
                continue;
            };

            let inner_end = if terminated { token.text.len() - 1 } else { token.text.len() };
            let inner = &token.text[1..inner_end];

            out.push('"');
            let mut chars = inner.chars().peekable();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some('\'') => out.push('\''),
                        Some(next) => {
                            out.push('\\');
                            out.push(next);
                        }
                        None => out.push_str("\\\\"),
                    },
                    '"' => out.push_str("\\\""),
                    _ => out.push(c),
                }
            }
            if terminated {
                out.push('"');
            }
        }
        out
    }

    fn name(&self) -> &str {
        "SingleQuoteStrings"
    }
}

/// `key=value` becomes `key:value`.
pub struct EqualsToColon;

impl Repair for EqualsToColon {
    fn apply(&self, input: &str) -> String {
        tokenize(input)
            .iter()
            .map(|t| if t.kind == Kind::Equals { ":" } else { t.text })
            .collect()
    }

    fn name(&self) -> &str {
        "EqualsToColon"
    }
}

/// Inserts a comma between two adjacent values with no separator, e.g.
/// `}{`, `][`, `}"`, `"{` or `1 "b"`.
pub struct InsertMissingCommas;

impl Repair for InsertMissingCommas {
    fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len() + 16);
        let mut pending_space = String::new();
        let mut previous: Option<Kind> = None;

        for token in tokenize(input) {
            if token.kind == Kind::Space {
                pending_space.push_str(token.text);
                continue;
            }
            if previous.map_or(false, ends_value) && starts_value(token.kind) {
                out.push(',');
            }
            out.push_str(&pending_space);
            pending_space.clear();
            out.push_str(token.text);
            previous = Some(token.kind);
        }
        out.push_str(&pending_space);
        out
    }

    fn name(&self) -> &str {
        "InsertMissingCommas"
    }
}

/// Quotes bare identifiers in key position: `{a: 1}` becomes `{"a": 1}`.
pub struct QuoteBareKeys;

impl Repair for QuoteBareKeys {
    fn apply(&self, input: &str) -> String {
        let tokens = tokenize(input);
        let significant: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind != Kind::Space)
            .map(|(i, _)| i)
            .collect();

        let mut quote = vec![false; tokens.len()];
        for (pos, &idx) in significant.iter().enumerate() {
            if tokens[idx].kind != Kind::Word {
                continue;
            }
            let after_separator = match pos.checked_sub(1) {
                None => true,
                Some(prev) => matches!(tokens[significant[prev]].kind, Kind::Open('{') | Kind::Comma),
            };
            let before_colon = significant
                .get(pos + 1)
                .map_or(false, |&next| tokens[next].kind == Kind::Colon);
            quote[idx] = after_separator && before_colon;
        }

        let mut out = String::with_capacity(input.len() + 16);
        for (i, token) in tokens.iter().enumerate() {
            if quote[i] {
                out.push('"');
                out.push_str(token.text);
                out.push('"');
            } else {
                out.push_str(token.text);
            }
        }
        out
    }

    fn name(&self) -> &str {
        "QuoteBareKeys"
    }
}

/// Drops commas directly before a closing bracket.
pub struct StripTrailingCommas;

impl Repair for StripTrailingCommas {
    fn apply(&self, input: &str) -> String {
        let tokens = tokenize(input);
        let mut out = String::with_capacity(input.len());
        for (i, token) in tokens.iter().enumerate() {
            if token.kind == Kind::Comma {
                let next = tokens[i + 1..].iter().find(|t| t.kind != Kind::Space);
                if matches!(next.map(|t| t.kind), Some(Kind::Close(_))) {
                    continue;
                }
            }
            out.push_str(token.text);
        }
        out
    }

    fn name(&self) -> &str {
        "StripTrailingCommas"
    }
}

/// Makes the document a single balanced `{}` or `[]` value: closes an
/// unterminated string, drops stray closers, appends missing ones, wraps
/// bare `key: value` pairs in `{}` and multiple top-level values in `[]`.
pub struct BalanceAndWrap;

impl BalanceAndWrap {
    fn has_top_level_colon(tokens: &[Token<'_>]) -> bool {
        let mut depth = 0usize;
        for token in tokens {
            match token.kind {
                Kind::Open(_) => depth += 1,
                Kind::Close(_) => depth = depth.saturating_sub(1),
                Kind::Colon if depth == 0 => return true,
                _ => {}
            }
        }
        false
    }
}

impl Repair for BalanceAndWrap {
    fn apply(&self, input: &str) -> String {
        let tokens = tokenize(input);
        let first = match tokens.iter().find(|t| t.kind != Kind::Space) {
            Some(token) => token.kind,
            None => return input.to_string(),
        };

        let wrap_object = !matches!(first, Kind::Open(_)) && Self::has_top_level_colon(&tokens);

        let mut out = String::with_capacity(input.len() + 8);
        let mut stack: Vec<char> = Vec::new();
        if wrap_object {
            out.push('{');
            stack.push('}');
        }
        let mut top_level_values = 0usize;

        for token in &tokens {
            match token.kind {
                Kind::Open(c) => {
                    if stack.is_empty() {
                        top_level_values += 1;
                    }
                    stack.push(closer_for(c));
                    out.push_str(token.text);
                }
                Kind::Close(c) => {
                    // Unmatched closers are dropped; a closer for an outer
                    // bracket first closes everything still open inside it.
                    if let Some(pos) = stack.iter().rposition(|&expected| expected == c) {
                        while stack.len() > pos {
                            if let Some(expected) = stack.pop() {
                                push_closer(&mut out, expected);
                            }
                        }
                    }
                }
                Kind::Str { terminated: false } | Kind::SingleStr { terminated: false } => {
                    if stack.is_empty() {
                        top_level_values += 1;
                    }
                    out.push_str(token.text);
                    let trailing_backslashes =
                        token.text.chars().rev().take_while(|&c| c == '\\').count();
                    if trailing_backslashes % 2 == 1 {
                        out.push('\\');
                    }
                    out.push(if token.kind == (Kind::Str { terminated: false }) { '"' } else { '\'' });
                }
                Kind::Str { .. } | Kind::SingleStr { .. } | Kind::Word => {
                    if stack.is_empty() {
                        top_level_values += 1;
                    }
                    out.push_str(token.text);
                }
                _ => out.push_str(token.text),
            }
        }

        while let Some(expected) = stack.pop() {
            push_closer(&mut out, expected);
        }

        if top_level_values > 1 {
            let mut wrapped = String::with_capacity(out.len() + 2);
            wrapped.push('[');
            wrapped.push_str(&out);
            push_closer(&mut wrapped, ']');
            return wrapped;
        }
        out
    }

    fn name(&self) -> &str {
        "BalanceAndWrap"
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct RepairPipeline {
    steps: Vec<Box<dyn Repair>>,
}

impl RepairPipeline {
    pub fn new(steps: Vec<Box<dyn Repair>>) -> Self {
        Self { steps }
    }

    /// BOM strip, quote normalization, `=` to `:`, missing commas, bare keys,
    /// trailing commas, then bracket balancing.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(StripBom),
            Box::new(SingleQuoteStrings),
            Box::new(EqualsToColon),
            Box::new(InsertMissingCommas),
            Box::new(QuoteBareKeys),
            Box::new(StripTrailingCommas),
            Box::new(BalanceAndWrap),
        ])
    }

    pub fn apply(&self, input: &str) -> String {
        let mut current = input.to_string();
        for step in &self.steps {
            let next = step.apply(&current);
            if next != current {
                trace!("repair step {} changed input", step.name());
            }
            current = next;
        }
        current
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl Default for RepairPipeline {
    fn default() -> Self {
        Self::standard()
    }
}
