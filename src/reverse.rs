//! Parser for Twee 3 passages with SugarCube macros.
//!
//! Pipe links that sit next to each other are rebuilt into decisions; this is
//! the one place where the target dialect cannot say what the source said, so
//! the rebuilt shape is only ever an approximation of the original decision.

use std::collections::HashMap;

use log::debug;
use winnow::ascii::{alpha1, space0, space1};
use winnow::combinator::{alt, delimited, opt, preceded, repeat, terminated};
use winnow::prelude::*;
use winnow::token::{any, none_of, rest, take_till, take_until};

use crate::ast::*;
use crate::classify::{split_lines, Line};
use crate::config::Config;
use crate::error::{ParseError, ParseErrorKind};
use crate::expr::{parse_assignment, Expr};

const METADATA_PASSAGES: &[&str] = &["StoryTitle", "StoryData"];

pub fn parse(input: &str, config: &Config) -> Result<Document, ParseError> {
    let passages = split_passages(input);

    let scenes: HashMap<String, String> = passages
        .iter()
        .filter(|p| p.has_tag(&config.scene_tag))
        .map(|p| (p.title.clone(), scene_slug(&p.title)))
        .collect();

    let mut nodes = Vec::new();
    for passage in &passages {
        if METADATA_PASSAGES.contains(&passage.title.as_str()) {
            debug!("skipping metadata passage {}", passage.title);
            continue;
        }
        if passage.header.is_some() && passage.title == config.init_passage {
            nodes.extend(parse_init(passage));
            continue;
        }

        if passage.header.is_some() && !passage.has_tag(&config.prologue_tag) {
            if passage.has_tag(&config.scene_tag) {
                nodes.push(Node::SceneHeading {
                    text: passage.title.clone(),
                });
            } else {
                nodes.push(Node::SectionHeading {
                    label: passage.title.clone(),
                });
            }
        }

        let mut body = BodyParser::new(config, &scenes);
        for line in &passage.lines {
            body.handle(line)?;
        }
        nodes.extend(body.finish()?);
    }

    Ok(Document::new(nodes))
}

struct Passage<'a> {
    /// `None` for text that precedes the first header.
    header: Option<usize>,
    title: String,
    tags: Vec<&'a str>,
    lines: Vec<Line<'a>>,
}

impl Passage<'_> {
    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| *t == tag)
    }
}

fn split_passages(input: &str) -> Vec<Passage<'_>> {
    let mut passages: Vec<Passage<'_>> = Vec::new();
    let mut preamble: Vec<Line<'_>> = Vec::new();

    for line in split_lines(input) {
        if let Some(header) = line.text.strip_prefix("::") {
            let (title, tags) = parse_header(header);
            passages.push(Passage {
                header: Some(line.number),
                title,
                tags,
                lines: Vec::new(),
            });
            continue;
        }
        match passages.last_mut() {
            Some(passage) => passage.lines.push(line),
            None => preamble.push(line),
        }
    }

    if preamble.iter().any(|l| !l.is_blank()) {
        passages.insert(
            0,
            Passage {
                header: None,
                title: String::new(),
                tags: Vec::new(),
                lines: preamble,
            },
        );
    }
    passages
}

/// `Title [tag other] {"position":"1,1"}`. A backslash escapes the next
/// character of the title.
fn parse_header(header: &str) -> (String, Vec<&str>) {
    let header = header.trim();
    let without_meta = match find_unescaped(header, '{') {
        Some(idx) => header[..idx].trim_end(),
        None => header,
    };
    match find_unescaped(without_meta, '[') {
        Some(idx) => {
            let tags = without_meta[idx + 1..]
                .split(']')
                .next()
                .unwrap_or("")
                .split_whitespace()
                .collect();
            (unescape_title(without_meta[..idx].trim()), tags)
        }
        None => (unescape_title(without_meta.trim()), Vec::new()),
    }
}

fn find_unescaped(text: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == target => return Some(idx),
            _ => {}
        }
    }
    None
}

fn unescape_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut chars = title.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

fn parse_init(passage: &Passage<'_>) -> Vec<Node> {
    let mut entries = Vec::new();
    let mut raws = Vec::new();

    for line in passage.lines.iter().filter(|l| !l.is_blank()) {
        let assignment = split_macro(line.text)
            .filter(|(name, _)| *name == "set")
            .and_then(|(_, args)| parse_assignment(args))
            .filter(|(_, op, _)| *op == AssignOp::Assign);

        let Some((target, _, operand)) = assignment else {
            raws.push(Node::Raw {
                text: line.text.to_string(),
            });
            continue;
        };

        match operand.strip_prefix('{').and_then(|o| o.strip_suffix('}')) {
            Some(object) => {
                for field in split_top_level(object, ',') {
                    let Some((key, value)) = split_once_top_level(field, ':') else {
                        continue;
                    };
                    let mut path = target.segments.clone();
                    path.extend(
                        decode_value(key)
                            .split('.')
                            .map(|s| s.trim().to_string()),
                    );
                    entries.push(StateEntry {
                        path,
                        value: decode_value(value),
                    });
                }
            }
            None => entries.push(StateEntry {
                path: target.segments.clone(),
                value: decode_value(operand),
            }),
        }
    }

    let mut nodes = vec![Node::StateBlock(StateBlock { entries })];
    nodes.extend(raws);
    nodes
}

/// JSON string literals are unescaped; everything else is kept as written.
fn decode_value(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('"') {
        if let Ok(decoded) = serde_json::from_str::<String>(value) {
            return decoded;
        }
    }
    value.to_string()
}

struct RunLink {
    label: Option<String>,
    target: Option<String>,
    body: Vec<Node>,
    /// Came from a `<<link>>` block rather than a `[[...]]` link.
    block: bool,
}

/// One nesting level: finished nodes plus the link run still being gathered.
#[derive(Default)]
struct Level {
    nodes: Vec<Node>,
    run: Vec<RunLink>,
}

impl Level {
    fn push(&mut self, node: Node, config: &Config) {
        self.flush(config);
        self.nodes.push(node);
    }

    fn flush(&mut self, config: &Config) {
        if self.run.is_empty() {
            return;
        }
        let mut pending: Vec<RunLink> = Vec::new();
        for link in std::mem::take(&mut self.run) {
            let is_continue = link.body.is_empty()
                && link.target.is_some()
                && link
                    .label
                    .as_deref()
                    .map(|l| config.is_continue_label(l))
                    .unwrap_or(false);
            if is_continue {
                self.emit_run(std::mem::take(&mut pending));
                self.nodes.push(Node::Jump(Jump {
                    display: None,
                    target: link.target.unwrap_or_default(),
                }));
            } else {
                pending.push(link);
            }
        }
        self.emit_run(pending);
    }

    fn emit_run(&mut self, mut run: Vec<RunLink>) {
        if run.len() == 1 && !run[0].block {
            if let Some(link) = run.pop() {
                self.nodes.push(Node::Jump(Jump {
                    display: link.label,
                    target: link.target.unwrap_or_default(),
                }));
            }
            return;
        }
        if run.is_empty() {
            return;
        }
        debug!("rebuilding {} adjacent links as a decision", run.len());
        let options = run
            .into_iter()
            .map(|link| ChoiceOption {
                label: link
                    .label
                    .or_else(|| link.target.clone())
                    .unwrap_or_default(),
                description: None,
                body: link.body,
                target: link.target,
            })
            .collect();
        self.nodes.push(Node::Decision(Decision {
            prompt: String::new(),
            options,
        }));
    }

    fn finish(mut self, config: &Config) -> Vec<Node> {
        self.flush(config);
        self.nodes
    }
}

struct IfFrame {
    opened_at: usize,
    opened: String,
    branches: Vec<Branch>,
    kind: BranchKind,
    condition: Option<Expr>,
    level: Level,
}

struct ForFrame {
    opened_at: usize,
    opened: String,
    condition: Expr,
    level: Level,
}

struct LinkFrame {
    opened_at: usize,
    opened: String,
    label: String,
    target: Option<String>,
    level: Level,
}

enum Frame {
    If(IfFrame),
    For(ForFrame),
    Link(LinkFrame),
}

impl Frame {
    fn closer(&self) -> &'static str {
        match self {
            Frame::If(_) => "<</if>>",
            Frame::For(_) => "<</for>>",
            Frame::Link(_) => "<</link>>",
        }
    }
}

struct BodyParser<'c> {
    config: &'c Config,
    scenes: &'c HashMap<String, String>,
    root: Level,
    frames: Vec<Frame>,
}

impl<'c> BodyParser<'c> {
    fn new(config: &'c Config, scenes: &'c HashMap<String, String>) -> Self {
        Self {
            config,
            scenes,
            root: Level::default(),
            frames: Vec::new(),
        }
    }

    fn level(&mut self) -> &mut Level {
        match self.frames.last_mut() {
            Some(Frame::If(f)) => &mut f.level,
            Some(Frame::For(f)) => &mut f.level,
            Some(Frame::Link(f)) => &mut f.level,
            None => &mut self.root,
        }
    }

    fn push(&mut self, node: Node) {
        let config = self.config;
        self.level().push(node, config);
    }

    fn push_link(&mut self, link: RunLink) {
        self.level().run.push(link);
    }

    fn flush(&mut self) {
        let config = self.config;
        self.level().flush(config);
    }

    fn resolve(&self, target: &str) -> String {
        let target = target.trim();
        self.scenes
            .get(target)
            .cloned()
            .unwrap_or_else(|| target.to_string())
    }

    fn handle(&mut self, line: &Line<'_>) -> Result<(), ParseError> {
        let text = line.text;
        if text.is_empty() {
            self.flush();
            return Ok(());
        }

        if let Some(opener) = text.strip_suffix("<</link>>") {
            if let Some(("link", args)) = split_macro(opener.trim_end()) {
                self.handle_macro(line, "link", args)?;
                return self.handle_macro(line, "/link", "");
            }
        }

        if let Some((name, args)) = split_macro(text) {
            return self.handle_macro(line, name, args);
        }

        if text.starts_with("<!--") && text.ends_with("-->") {
            let node = match asset_comment.parse(text) {
                Ok((kind, args)) => Node::AssetDirective(AssetDirective { kind, args }),
                Err(_) => Node::Raw {
                    text: text.to_string(),
                },
            };
            self.push(node);
            return Ok(());
        }

        if let Ok(src) = img_tag.parse(text) {
            self.push(Node::AssetDirective(AssetDirective {
                kind: AssetKind::Show,
                args: vec![src],
            }));
            return Ok(());
        }

        if let Some(comment) = text.strip_prefix("/*").and_then(|t| t.strip_suffix("*/")) {
            self.push(Node::Raw {
                text: comment.trim().to_string(),
            });
            return Ok(());
        }

        if let Some(segments) = split_links(text) {
            for segment in segments {
                match segment {
                    LinkSegment::Text(text) => self.push(Node::Action {
                        text: text.to_string(),
                    }),
                    LinkSegment::Pipe { label, target } => {
                        let target = self.resolve(target);
                        self.push_link(RunLink {
                            label: label.map(str::to_string),
                            target: Some(target),
                            body: Vec::new(),
                            block: false,
                        });
                    }
                    LinkSegment::Arrow { label, target } => {
                        let target = self.resolve(target);
                        self.push(Node::InlineChoice(InlineChoice {
                            label: label.to_string(),
                            target,
                        }));
                    }
                }
            }
            return Ok(());
        }

        let node = if let Ok((speaker, speech)) = dialogue_line.parse(text) {
            Node::Dialogue(Dialogue {
                speaker: speaker.trim().to_string(),
                text: speech.trim().to_string(),
            })
        } else if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            Node::Parenthetical {
                text: inner.trim().to_string(),
            }
        } else {
            Node::Action {
                text: text.to_string(),
            }
        };
        self.push(node);
        Ok(())
    }

    fn handle_macro(&mut self, line: &Line<'_>, name: &str, args: &str) -> Result<(), ParseError> {
        match name {
            "if" => {
                self.flush();
                self.frames.push(Frame::If(IfFrame {
                    opened_at: line.number,
                    opened: line.text.to_string(),
                    branches: Vec::new(),
                    kind: BranchKind::If,
                    condition: Some(Expr::parse_prefixed(args)),
                    level: Level::default(),
                }));
            }
            "elseif" | "else" => {
                let config = self.config;
                let Some(Frame::If(frame)) = self.frames.last_mut() else {
                    return Err(self.misplaced(line, name));
                };
                if frame.kind == BranchKind::Else {
                    let kind = if name == "else" {
                        ParseErrorKind::DuplicateElse {
                            opened_at: frame.opened_at,
                        }
                    } else {
                        ParseErrorKind::ElifAfterElse {
                            opened_at: frame.opened_at,
                        }
                    };
                    return Err(ParseError::new(line.number, kind));
                }
                let (kind, condition) = if name == "else" {
                    (BranchKind::Else, None)
                } else {
                    (BranchKind::Elif, Some(Expr::parse_prefixed(args)))
                };
                let level = std::mem::take(&mut frame.level);
                let finished = Branch {
                    kind: std::mem::replace(&mut frame.kind, kind),
                    condition: std::mem::replace(&mut frame.condition, condition),
                    body: level.finish(config),
                };
                frame.branches.push(finished);
            }
            "/if" | "endif" => match self.frames.pop() {
                Some(Frame::If(mut frame)) => {
                    frame.branches.push(Branch {
                        kind: frame.kind,
                        condition: frame.condition,
                        body: frame.level.finish(self.config),
                    });
                    self.push(Node::Conditional(Conditional {
                        branches: frame.branches,
                    }));
                }
                other => return Err(self.restore_and_fail(other, line, name)),
            },
            "for" => {
                self.flush();
                self.frames.push(Frame::For(ForFrame {
                    opened_at: line.number,
                    opened: line.text.to_string(),
                    condition: Expr::parse_prefixed(args),
                    level: Level::default(),
                }));
            }
            "/for" => match self.frames.pop() {
                Some(Frame::For(frame)) => {
                    self.push(Node::Loop(Loop {
                        condition: frame.condition,
                        body: frame.level.finish(self.config),
                    }));
                }
                other => return Err(self.restore_and_fail(other, line, name)),
            },
            "link" => match link_args.parse(args) {
                Ok((label, target)) => {
                    let target = target.map(|t| self.resolve(&t));
                    self.frames.push(Frame::Link(LinkFrame {
                        opened_at: line.number,
                        opened: line.text.to_string(),
                        label,
                        target,
                        level: Level::default(),
                    }));
                }
                Err(_) => self.push(Node::Raw {
                    text: line.text.to_string(),
                }),
            },
            "/link" => match self.frames.pop() {
                Some(Frame::Link(frame)) => {
                    let body = frame.level.finish(self.config);
                    self.push_link(RunLink {
                        label: Some(frame.label),
                        target: frame.target,
                        body,
                        block: true,
                    });
                }
                other => return Err(self.restore_and_fail(other, line, name)),
            },
            "set" => {
                let node = match parse_assignment(args) {
                    Some((target, op, operand)) => Node::StateChange(StateChange {
                        is_local: target.is_local(),
                        target: target.with_dollar(),
                        op,
                        expr: Expr::parse_prefixed(operand),
                    }),
                    None => Node::Raw {
                        text: line.text.to_string(),
                    },
                };
                self.push(node);
            }
            "goto" => {
                let node = match goto_target.parse(args) {
                    Ok(target) => Node::Jump(Jump {
                        display: None,
                        target: self.resolve(&target),
                    }),
                    Err(_) => Node::Raw {
                        text: line.text.to_string(),
                    },
                };
                self.push(node);
            }
            "bg" | "show" | "audio" => {
                let parsed = match name {
                    "bg" => terminated(quoted, space0)
                        .parse(args)
                        .map(|arg| (AssetKind::Bg, arg)),
                    "show" => terminated(quoted, space0)
                        .parse(args)
                        .map(|arg| (AssetKind::Show, arg)),
                    _ => terminated(quoted, (space1, "play", space0))
                        .parse(args)
                        .map(|arg| (AssetKind::Music, arg)),
                };
                let node = match parsed {
                    Ok((kind, arg)) => Node::AssetDirective(AssetDirective {
                        kind,
                        args: vec![arg],
                    }),
                    Err(_) => Node::Raw {
                        text: line.text.to_string(),
                    },
                };
                self.push(node);
            }
            _ => self.push(Node::Raw {
                text: line.text.to_string(),
            }),
        }
        Ok(())
    }

    fn restore_and_fail(&mut self, popped: Option<Frame>, line: &Line<'_>, name: &str) -> ParseError {
        if let Some(frame) = popped {
            self.frames.push(frame);
        }
        self.misplaced(line, name)
    }

    fn misplaced(&self, line: &Line<'_>, name: &str) -> ParseError {
        let found = format!("<<{name}>>");
        let kind = match self.frames.last() {
            Some(frame) => ParseErrorKind::MismatchedKeyword {
                found,
                expected: frame.closer(),
            },
            None => ParseErrorKind::UnexpectedKeyword { found },
        };
        ParseError::new(line.number, kind)
    }

    fn finish(mut self) -> Result<Vec<Node>, ParseError> {
        if let Some(frame) = self.frames.pop() {
            let (opened_at, opened) = match &frame {
                Frame::If(f) => (f.opened_at, f.opened.clone()),
                Frame::For(f) => (f.opened_at, f.opened.clone()),
                Frame::Link(f) => (f.opened_at, f.opened.clone()),
            };
            return Err(ParseError::new(
                opened_at,
                ParseErrorKind::UnterminatedBlock {
                    opened,
                    expected: frame.closer(),
                },
            ));
        }
        Ok(self.root.finish(self.config))
    }
}

/// Splits a line that is exactly one macro into its name and arguments.
fn split_macro(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix("<<")?.strip_suffix(">>")?;
    if inner.contains("<<") {
        return None;
    }
    let inner = inner.trim();
    let (name, args) = inner
        .split_once(char::is_whitespace)
        .unwrap_or((inner, ""));
    Some((name, args.trim()))
}

fn quoted(input: &mut &str) -> ModalResult<String> {
    delimited(
        '"',
        repeat::<_, _, (), _, _>(
            0..,
            alt((preceded('\\', any).void(), none_of(['"', '\\']).void())),
        )
        .take(),
        '"',
    )
    .map(|raw: &str| {
        serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
    })
    .parse_next(input)
}

fn link_args(input: &mut &str) -> ModalResult<(String, Option<String>)> {
    terminated((quoted, opt(preceded(space1, quoted))), space0).parse_next(input)
}

fn goto_target(input: &mut &str) -> ModalResult<String> {
    terminated(
        alt((
            quoted,
            delimited("[[", take_until(1.., "]]"), "]]").map(str::to_string),
        )),
        space0,
    )
    .parse_next(input)
}

fn asset_comment(input: &mut &str) -> ModalResult<(AssetKind, Vec<String>)> {
    delimited(
        ("<!--", space0, "asset", space1),
        (
            alpha1.verify_map(AssetKind::from_keyword),
            repeat(0.., preceded(space1, quoted)),
        ),
        (space0, "-->"),
    )
    .parse_next(input)
}

fn dialogue_line<'s>(input: &mut &'s str) -> ModalResult<(&'s str, &'s str)> {
    (
        delimited("**", take_until(1.., "**"), "**"),
        preceded((':', space0), rest),
    )
        .parse_next(input)
}

/// `<img src="x.png">`, optionally self-closed, with any other attributes.
fn img_tag(input: &mut &str) -> ModalResult<String> {
    delimited(
        ("<img", space1, take_until(0.., "src"), "src", space0, '=', space0),
        quoted,
        (take_till(0.., '>'), '>', space0),
    )
    .parse_next(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkSegment<'a> {
    Text(&'a str),
    /// `[[Label|Target]]` or `[[Target]]`.
    Pipe {
        label: Option<&'a str>,
        target: &'a str,
    },
    /// `[[Label->Target]]` or `[[Target<-Label]]`.
    Arrow { label: &'a str, target: &'a str },
}

fn split_links(text: &str) -> Option<Vec<LinkSegment<'_>>> {
    if !text.contains("[[") {
        return None;
    }
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        let Some(len) = link_end(&rest[start + 2..]) else {
            break;
        };
        let before = rest[..start].trim();
        if !before.is_empty() {
            out.push(LinkSegment::Text(before));
        }
        let inner = &rest[start + 2..start + 2 + len];
        // SugarCube setter components: `[[Label|Target][$x to 1]]`
        let inner = inner.split("][").next().unwrap_or(inner);
        out.push(link_segment(inner));
        rest = &rest[start + 2 + len + 2..];
    }
    let after = rest.trim();
    if !after.is_empty() {
        out.push(LinkSegment::Text(after));
    }
    Some(out)
}

/// Length of the link body up to its closing `]]`. Brackets inside the body
/// must balance; `][` starts a setter component.
fn link_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut idx = 0;
    while idx < bytes.len() {
        match (bytes[idx], bytes.get(idx + 1)) {
            (b'[', _) => depth += 1,
            (b']', _) if depth > 0 => depth -= 1,
            (b']', Some(b']')) => return Some(idx),
            (b']', Some(b'[')) => idx += 1,
            _ => {}
        }
        idx += 1;
    }
    None
}

fn link_segment(inner: &str) -> LinkSegment<'_> {
    if let Some((label, target)) = inner.split_once('|') {
        return LinkSegment::Pipe {
            label: Some(label.trim()),
            target: target.trim(),
        };
    }
    if let Some((label, target)) = inner.rsplit_once("->") {
        return LinkSegment::Arrow {
            label: label.trim(),
            target: target.trim(),
        };
    }
    if let Some((target, label)) = inner.split_once("<-") {
        return LinkSegment::Arrow {
            label: label.trim(),
            target: target.trim(),
        };
    }
    LinkSegment::Pipe {
        label: None,
        target: inner.trim(),
    }
}

/// Byte offsets of `sep` outside of quotes and brackets.
fn top_level_separators(s: &str, sep: char) -> Vec<usize> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[' | '{' | '(') => depth += 1,
            (None, ']' | '}' | ')') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => found.push(idx),
            _ => {}
        }
    }
    found
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for idx in top_level_separators(s, sep) {
        parts.push(&s[start..idx]);
        start = idx + sep.len_utf8();
    }
    parts.push(&s[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn split_once_top_level(s: &str, sep: char) -> Option<(&str, &str)> {
    let idx = *top_level_separators(s, sep).first()?;
    Some((s[..idx].trim(), s[idx + sep.len_utf8()..].trim()))
}
