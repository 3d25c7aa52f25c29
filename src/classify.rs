//! Per-line classification for the screenplay dialect.
//!
//! Each physical line maps to exactly one [`LineKind`]. The classifier looks
//! at the line itself, the caller's stack of open blocks, and whether the next
//! physical line is blank. It never changes any of them.

use winnow::ascii::space0;
use winnow::combinator::{alt, delimited, preceded, separated_pair};
use winnow::prelude::*;
use winnow::token::{rest, take_till, take_until};

/// A physical source line with its indentation measured and stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// 1-based.
    pub number: usize,
    /// Columns of leading whitespace; a tab counts as four.
    pub indent: usize,
    pub text: &'a str,
}

impl<'a> Line<'a> {
    pub fn new(number: usize, raw: &'a str) -> Self {
        let mut indent = 0;
        for ch in raw.chars() {
            match ch {
                ' ' => indent += 1,
                '\t' => indent += 4,
                '\u{feff}' => {}
                _ => break,
            }
        }
        Self {
            number,
            indent,
            text: raw.trim_start_matches('\u{feff}').trim(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

pub fn split_lines(input: &str) -> Vec<Line<'_>> {
    input
        .lines()
        .enumerate()
        .map(|(idx, raw)| Line::new(idx + 1, raw))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Frontmatter,
    Conditional,
    Loop,
    Decision,
    Option,
    Dialogue,
}

#[derive(Debug, Clone, Copy)]
pub struct LineContext<'a> {
    /// Outermost first.
    pub open_blocks: &'a [BlockKind],
    pub next_is_blank: bool,
}

impl LineContext<'_> {
    fn innermost(&self) -> Option<BlockKind> {
        self.open_blocks.last().copied()
    }

    /// Bare all-caps scene headings are only recognised outside any block.
    fn at_top_level(&self) -> bool {
        !self.open_blocks.iter().any(|b| {
            matches!(
                b,
                BlockKind::Conditional
                    | BlockKind::Loop
                    | BlockKind::Decision
                    | BlockKind::Option
                    | BlockKind::Dialogue
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control<'a> {
    If(&'a str),
    Elif(&'a str),
    Else,
    Loop(&'a str),
    End,
}

impl Control<'_> {
    pub fn keyword(&self) -> &'static str {
        match self {
            Control::If(_) => "(IF:)",
            Control::Elif(_) => "(ELIF:)",
            Control::Else => "(ELSE)",
            Control::Loop(_) => "(LOOP:)",
            Control::End => "(END)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLine<'a> {
    pub display: Option<&'a str>,
    pub target: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionLine<'a> {
    pub label: &'a str,
    pub description: Option<&'a str>,
    pub target: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineSegment<'a> {
    Text(&'a str),
    Choice { label: &'a str, target: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    FrontmatterDelimiter,
    StateGroup(&'a str),
    StateEntry {
        key: &'a str,
        value: &'a str,
        indented: bool,
    },
    MalformedState,
    SectionHeading(&'a str),
    SceneHeading(&'a str),
    Control(Control<'a>),
    StateChange(&'a str),
    Asset {
        kind: &'a str,
        args: &'a str,
    },
    DecisionPrompt(&'a str),
    ChoiceOption(OptionLine<'a>),
    InlineChoices(Vec<InlineSegment<'a>>),
    Jump(JumpLine<'a>),
    CharacterCue(&'a str),
    Dialogue(&'a str),
    Parenthetical(&'a str),
    Blank,
    Action(&'a str),
}

const SCENE_PREFIXES: &[&str] = &["INT./EXT.", "INT.", "EXT.", "EST.", "I/E"];

pub fn classify<'a>(line: &Line<'a>, ctx: &LineContext<'_>) -> LineKind<'a> {
    let text = line.text;
    let innermost = ctx.innermost();

    if text == "===" {
        return LineKind::FrontmatterDelimiter;
    }

    if innermost == Some(BlockKind::Frontmatter) {
        if let Some(group) = text.strip_prefix("$$") {
            return LineKind::StateGroup(group.trim());
        }
        if let Some(entry) = text.strip_prefix('$') {
            return match entry.split_once(':') {
                Some((key, value)) if !key.trim().is_empty() => LineKind::StateEntry {
                    key: key.trim(),
                    value: value.trim(),
                    indented: line.indent > 0,
                },
                _ => LineKind::MalformedState,
            };
        }
    }

    if text.is_empty() {
        return LineKind::Blank;
    }

    if let Some(label) = text.strip_prefix('#') {
        let label = label.trim_start_matches('#').trim();
        if !label.is_empty() {
            return LineKind::SectionHeading(label);
        }
    }

    if is_scene_prefixed(text) {
        return LineKind::SceneHeading(text);
    }

    if let Some(forced) = text.strip_prefix('.') {
        if forced.starts_with(char::is_alphanumeric) {
            return LineKind::SceneHeading(forced.trim());
        }
    }

    if let Some(control) = parse_control(text) {
        return LineKind::Control(control);
    }

    if let Some(body) = text.strip_prefix('~') {
        return LineKind::StateChange(body.trim());
    }

    if let Some(body) = text.strip_prefix('!') {
        let body = body.trim();
        let (kind, args) = match body.split_once(':') {
            Some((kind, args)) => (kind.trim(), args.trim()),
            None => match body.split_once(char::is_whitespace) {
                Some((kind, args)) => (kind.trim(), args.trim()),
                None => (body, ""),
            },
        };
        return LineKind::Asset { kind, args };
    }

    if let Some(prompt) = text.strip_prefix('?') {
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            return LineKind::DecisionPrompt(prompt);
        }
    }

    if let Some(body) = text.strip_prefix('+') {
        return LineKind::ChoiceOption(parse_option(body.trim()));
    }

    if let Some(segments) = split_inline_choices(text) {
        return LineKind::InlineChoices(segments);
    }

    if let Some(jump) = parse_jump(text) {
        return LineKind::Jump(jump);
    }

    if ctx.next_is_blank && ctx.at_top_level() && !text.starts_with('(') && is_all_caps(text) {
        return LineKind::SceneHeading(text);
    }

    if !ctx.next_is_blank && innermost != Some(BlockKind::Dialogue) && is_character_cue(text) {
        return LineKind::CharacterCue(text);
    }

    let parenthetical = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .map(str::trim);

    if innermost == Some(BlockKind::Dialogue) {
        return match parenthetical {
            Some(inner) => LineKind::Parenthetical(inner),
            None => LineKind::Dialogue(text),
        };
    }

    if let Some(inner) = parenthetical {
        return LineKind::Parenthetical(inner);
    }

    LineKind::Action(text)
}

pub(crate) fn is_scene_prefixed(text: &str) -> bool {
    SCENE_PREFIXES.iter().any(|prefix| {
        text.strip_prefix(*prefix)
            .map(|rest| rest.starts_with(char::is_whitespace) && !rest.trim().is_empty())
            .unwrap_or(false)
    })
}

pub(crate) fn is_all_caps(text: &str) -> bool {
    text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase)
}

/// `BOB`, `DR. WHO`, `BOB (V.O.)`. Letters, digits, spaces and `.'-`, ending
/// in a letter or digit, with an optional parenthesised extension.
fn is_character_cue(text: &str) -> bool {
    let name = match text.find('(') {
        Some(idx) if text.ends_with(')') => text[..idx].trim_end(),
        Some(_) => return false,
        None => text,
    };
    let allowed = |c: char| c.is_uppercase() || c.is_ascii_digit() || " .'-".contains(c);
    name.chars().any(char::is_alphabetic)
        && name.chars().all(allowed)
        && name
            .chars()
            .last()
            .map(|c| c.is_alphanumeric())
            .unwrap_or(false)
}

fn parse_control(text: &str) -> Option<Control<'_>> {
    match text {
        "(ELSE)" => return Some(Control::Else),
        "(END)" => return Some(Control::End),
        _ => {}
    }
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let (keyword, condition) = inner.split_once(':')?;
    let condition = condition.trim();
    match keyword.trim() {
        "IF" => Some(Control::If(condition)),
        "ELIF" => Some(Control::Elif(condition)),
        "LOOP" => Some(Control::Loop(condition)),
        _ => None,
    }
}

fn jump_target<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    preceded(("->", space0, '#'), rest).parse_next(input)
}

fn bare_jump<'s>(input: &mut &'s str) -> ModalResult<JumpLine<'s>> {
    jump_target
        .map(|target| JumpLine {
            display: None,
            target,
        })
        .parse_next(input)
}

fn explicit_jump<'s>(input: &mut &'s str) -> ModalResult<JumpLine<'s>> {
    preceded("->", (take_until(1.., "->"), jump_target))
        .map(|(display, target)| JumpLine {
            display: Some(display),
            target,
        })
        .parse_next(input)
}

fn implicit_jump<'s>(input: &mut &'s str) -> ModalResult<JumpLine<'s>> {
    (take_until(1.., "->"), jump_target)
        .map(|(display, target)| JumpLine {
            display: Some(display),
            target,
        })
        .parse_next(input)
}

/// Recognises the three jump spellings. The display text never includes the
/// arrow or the target.
pub fn parse_jump(text: &str) -> Option<JumpLine<'_>> {
    let jump = alt((bare_jump, explicit_jump, implicit_jump))
        .parse(text)
        .ok()?;
    let target = jump.target.trim();
    if target.is_empty() || target.contains(char::is_whitespace) {
        return None;
    }
    let display = jump.display.map(str::trim).filter(|d| !d.is_empty());
    if jump.display.is_some() && display.is_none() {
        return None;
    }
    Some(JumpLine { display, target })
}

fn bracket_label<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    delimited('[', take_till(0.., ']'), ']').parse_next(input)
}

/// The text after `+`.
fn parse_option(body: &str) -> OptionLine<'_> {
    let mut input = body;
    if let Ok(label) = bracket_label.parse_next(&mut input) {
        let remainder = input.trim();
        let label = label.trim();
        return match parse_jump(remainder) {
            Some(jump) => OptionLine {
                label,
                description: jump.display,
                target: Some(jump.target),
            },
            None => OptionLine {
                label,
                description: Some(remainder).filter(|d| !d.is_empty()),
                target: None,
            },
        };
    }

    match parse_jump(body) {
        Some(JumpLine {
            display: Some(label),
            target,
        }) => OptionLine {
            label,
            description: None,
            target: Some(target),
        },
        Some(JumpLine {
            display: None,
            target,
        }) => OptionLine {
            label: target,
            description: None,
            target: Some(target),
        },
        None => OptionLine {
            label: body,
            description: None,
            target: None,
        },
    }
}

fn inline_choice<'s>(input: &mut &'s str) -> ModalResult<(&'s str, &'s str)> {
    delimited(
        '[',
        separated_pair(
            take_till(1.., ['|', ']', '[']),
            '|',
            take_till(1.., [']', '[']),
        ),
        ']',
    )
    .parse_next(input)
}

/// Splits a line into text and `[Label|Target]` choices. `None` when the line
/// holds no choice at all.
pub fn split_inline_choices(text: &str) -> Option<Vec<InlineSegment<'_>>> {
    let mut out = Vec::new();
    let mut found = false;
    let mut last = 0;
    let mut idx = 0;

    while let Some(offset) = text[idx..].find('[') {
        let start = idx + offset;
        let mut input = &text[start..];
        match inline_choice.parse_next(&mut input) {
            Ok((label, target)) => {
                let end = text.len() - input.len();
                let before = text[last..start].trim();
                if !before.is_empty() {
                    out.push(InlineSegment::Text(before));
                }
                out.push(InlineSegment::Choice {
                    label: label.trim(),
                    target: target.trim().trim_start_matches('#').trim(),
                });
                found = true;
                last = end;
                idx = end;
            }
            Err(_) => idx = start + 1,
        }
    }

    if !found {
        return None;
    }
    let after = text[last..].trim();
    if !after.is_empty() {
        out.push(InlineSegment::Text(after));
    }
    Some(out)
}
