use serde::{Deserialize, Serialize};
use winnow::ascii::space0;
use winnow::combinator::{alt, delimited, not, opt, separated, terminated};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

use crate::ast::AssignOp;

/// Words that look like identifiers but are never variable references.
const RESERVED: &[&str] = &[
    "true", "false", "null", "undefined", "and", "or", "not", "is", "isnot", "eq", "neq", "gt",
    "gte", "lt", "lte", "to", "def", "ndef", "typeof", "new", "this",
];

/// A dotted variable path stored without its `$` sigil.
///
/// `had_dollar` remembers whether the author wrote the sigil, so a roundtrip
/// through a dialect that always requires it can be told apart from a real
/// change of meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarPath {
    pub segments: Vec<String>,
    pub had_dollar: bool,
}

impl VarPath {
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>, had_dollar: bool) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            had_dollar,
        }
    }

    /// Parses `$player.hp` or `player.hp`. The whole input must be a path.
    pub fn parse(text: &str) -> Option<Self> {
        var_path.parse(text.trim()).ok()
    }

    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Temporary (`_name`) variables.
    pub fn is_local(&self) -> bool {
        self.segments
            .first()
            .map(|s| s.starts_with('_'))
            .unwrap_or(false)
    }

    pub fn render(&self, force_dollar: bool) -> String {
        if force_dollar || self.had_dollar {
            format!("${}", self.dotted())
        } else {
            self.dotted()
        }
    }

    pub fn with_dollar(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            had_dollar: true,
        }
    }
}

/// An opaque expression. Never evaluated, only scanned for variable references.
///
/// `text` holds the expression with every reference's `$` removed; `refs`
/// lists the references in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Expr {
    pub text: String,
    pub refs: Vec<VarPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprMatch {
    Same,
    /// Identical apart from which references carried a `$`.
    DollarOnly,
    Different,
}

impl Expr {
    /// Keeps the author's choice of `$` per reference.
    pub fn parse(raw: &str) -> Self {
        let mut text = String::new();
        let mut refs = Vec::new();
        for piece in scan(raw.trim()) {
            match piece {
                Piece::Text(t) => text.push_str(&t),
                Piece::Var(path) => {
                    text.push_str(&path.dotted());
                    refs.push(path);
                }
            }
        }
        Self { text, refs }
    }

    /// Parses an expression from a dialect where every reference is prefixed,
    /// so every reference is recorded with `had_dollar = true`.
    pub fn parse_prefixed(raw: &str) -> Self {
        let mut expr = Self::parse(raw);
        for r in &mut expr.refs {
            r.had_dollar = true;
        }
        expr
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn render(&self, force_dollar: bool) -> String {
        let mut out = String::with_capacity(self.text.len() + self.refs.len());
        let mut refs = self.refs.iter();
        for piece in scan(&self.text) {
            match piece {
                Piece::Text(t) => out.push_str(&t),
                Piece::Var(path) => {
                    let had_dollar = refs.next().map(|r| r.had_dollar).unwrap_or(false);
                    if force_dollar || had_dollar {
                        out.push('$');
                    }
                    out.push_str(&path.dotted());
                }
            }
        }
        out
    }

    /// Renders with every reference passed through `var` and the text between
    /// references through `text`.
    pub fn render_with(
        &self,
        var: impl Fn(&VarPath) -> String,
        text: impl Fn(&str) -> String,
    ) -> String {
        let mut out = String::with_capacity(self.text.len());
        for piece in scan(&self.text) {
            match piece {
                Piece::Text(t) => out.push_str(&text(&t)),
                Piece::Var(path) => out.push_str(&var(&path)),
            }
        }
        out
    }

    pub fn with_prefixed_variables(&self) -> Self {
        Self {
            text: self.text.clone(),
            refs: self.refs.iter().map(VarPath::with_dollar).collect(),
        }
    }

    pub fn compare(&self, other: &Expr) -> ExprMatch {
        if self.text != other.text || self.refs.len() != other.refs.len() {
            return ExprMatch::Different;
        }
        let same_paths = self
            .refs
            .iter()
            .zip(&other.refs)
            .all(|(a, b)| a.segments == b.segments);
        if !same_paths {
            return ExprMatch::Different;
        }
        if self
            .refs
            .iter()
            .zip(&other.refs)
            .any(|(a, b)| a.had_dollar != b.had_dollar)
        {
            ExprMatch::DollarOnly
        } else {
            ExprMatch::Same
        }
    }
}

enum Piece {
    Text(String),
    Var(VarPath),
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn scan(expr: &str) -> Vec<Piece> {
    let chars: Vec<char> = expr.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut buf = String::new();
    let mut out: Vec<Piece> = Vec::new();

    let flush_text = |buf: &mut String, out: &mut Vec<Piece>| {
        if !buf.is_empty() {
            out.push(Piece::Text(std::mem::take(buf)));
        }
    };

    while i < len {
        let ch = chars[i];

        if ch == '"' || ch == '\'' {
            buf.push(ch);
            i += 1;
            while i < len {
                let c = chars[i];
                buf.push(c);
                i += 1;
                if c == '\\' && i < len {
                    buf.push(chars[i]);
                    i += 1;
                    continue;
                }
                if c == ch {
                    break;
                }
            }
            continue;
        }

        if ch.is_ascii_digit() {
            while i < len && (is_ident_char(chars[i]) || chars[i] == '.') {
                buf.push(chars[i]);
                i += 1;
            }
            continue;
        }

        let dollar = ch == '$' && i + 1 < len && is_ident_start(chars[i + 1]);
        if dollar || is_ident_start(ch) {
            let start = if dollar { i + 1 } else { i };
            let mut j = start;
            while j < len
                && (is_ident_char(chars[j])
                    || (chars[j] == '.' && j + 1 < len && is_ident_start(chars[j + 1])))
            {
                j += 1;
            }
            let ident: String = chars[start..j].iter().collect();

            let mut k = j;
            while k < len && chars[k].is_whitespace() {
                k += 1;
            }
            let is_call = k < len && chars[k] == '(';
            let head = ident.split('.').next().unwrap_or("").to_lowercase();
            let reserved = RESERVED.contains(&head.as_str());
            let member = i > 0 && chars[i - 1] == '.';

            if is_call || reserved || member {
                if dollar {
                    buf.push('$');
                }
                buf.push_str(&ident);
            } else {
                flush_text(&mut buf, &mut out);
                out.push(Piece::Var(VarPath::new(ident.split('.'), dollar)));
            }
            i = j;
            continue;
        }

        buf.push(ch);
        i += 1;
    }

    flush_text(&mut buf, &mut out);
    out
}

fn identifier<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (
        take_while(1, is_ident_start),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

fn var_path(input: &mut &str) -> ModalResult<VarPath> {
    (opt('$'), separated(1.., identifier, '.'))
        .map(|(sigil, segments): (Option<char>, Vec<&str>)| {
            VarPath::new(segments, sigil.is_some())
        })
        .parse_next(input)
}

fn assign_op(input: &mut &str) -> ModalResult<AssignOp> {
    alt((
        "++".value(AssignOp::Increment),
        "--".value(AssignOp::Decrement),
        "+=".value(AssignOp::AddAssign),
        "-=".value(AssignOp::SubAssign),
        terminated("to", not(take_while(1, is_ident_char))).value(AssignOp::Assign),
        terminated('=', not('=')).value(AssignOp::Assign),
    ))
    .parse_next(input)
}

fn assignment<'s>(input: &mut &'s str) -> ModalResult<(VarPath, AssignOp, &'s str)> {
    (var_path, delimited(space0, assign_op, space0), rest).parse_next(input)
}

/// Splits `player.hp -= 5` into target, operator and operand.
///
/// `to` is accepted as a spelling of `=`. Returns `None` when the text is not
/// an assignment, or when an operand is missing or superfluous.
pub fn parse_assignment(body: &str) -> Option<(VarPath, AssignOp, &str)> {
    let (target, op, operand) = assignment.parse(body.trim()).ok()?;
    let operand = operand.trim();
    match op {
        AssignOp::Increment | AssignOp::Decrement if !operand.is_empty() => None,
        AssignOp::Assign | AssignOp::AddAssign | AssignOp::SubAssign if operand.is_empty() => {
            None
        }
        _ => Some((target, op, operand)),
    }
}
