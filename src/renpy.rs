//! Ren'Py script writer.
//!
//! Sections and scenes become labels, decisions become `menu:` blocks and
//! expressions are rewritten into Python. There is no reader for this
//! dialect.

use std::collections::HashMap;

use log::{debug, warn};

use crate::ast::*;
use crate::expr::{Expr, VarPath};

const INDENT: &str = "    ";
const ENTRY_LABEL: &str = "start";

/// Forward conversion state: screenplay AST in, Ren'Py script out.
///
/// Consumed by [`RenpyState::convert`]; build a new one per document.
#[derive(Default)]
pub struct RenpyState {
    /// Section labels, scene texts and scene slugs to label names.
    labels: HashMap<String, String>,
    lines: Vec<String>,
    depth: usize,
    in_label: bool,
}

impl RenpyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(mut self, doc: &Document) -> String {
        self.collect_labels(&doc.nodes);

        for node in &doc.nodes {
            match node {
                Node::SceneHeading { text } => self.open_label(label_name(text)),
                Node::SectionHeading { label } => self.open_label(label_name(label)),
                Node::StateBlock(block) if !self.in_label => self.write_state(block),
                other => {
                    if !self.in_label {
                        self.open_label(ENTRY_LABEL.to_string());
                    }
                    self.write_node(other);
                }
            }
        }
        if self.in_label {
            self.line("return");
        }

        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    fn collect_labels(&mut self, nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::SectionHeading { label } => {
                    self.labels.insert(label.clone(), label_name(label));
                }
                Node::SceneHeading { text } => {
                    let name = label_name(text);
                    self.labels.insert(scene_slug(text), name.clone());
                    self.labels.insert(text.clone(), name);
                }
                _ => {}
            }
        }
    }

    fn resolve(&self, target: &str) -> String {
        match self.labels.get(target) {
            Some(name) => name.clone(),
            None => {
                warn!("jump target {target:?} names no section or scene; deriving a label from it");
                label_name(target)
            }
        }
    }

    /// The first label is always `start`; a script that opens with a heading
    /// gets a `start` label that jumps to it.
    fn open_label(&mut self, name: String) {
        if !self.in_label && name != ENTRY_LABEL {
            self.push_label(ENTRY_LABEL);
            self.line(format!("jump {name}"));
        }
        self.push_label(&name);
    }

    fn push_label(&mut self, name: &str) {
        if !self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.lines.push(format!("label {name}:"));
        self.depth = 1;
        self.in_label = true;
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.lines
            .push(format!("{}{}", INDENT.repeat(self.depth), text.as_ref()));
    }

    fn block(&mut self, nodes: &[Node]) {
        self.depth += 1;
        if nodes.is_empty() {
            self.line("pass");
        }
        for node in nodes {
            self.write_node(node);
        }
        self.depth -= 1;
    }

    fn write_node(&mut self, node: &Node) {
        match node {
            Node::Action { text } => self.line(say(text)),
            Node::Parenthetical { text } => self.line(say(&format!("({text})"))),
            Node::Dialogue(d) => self.line(format!("{} {}", say(&d.speaker), say(&d.text))),
            Node::SceneHeading { text } => {
                warn!("scene heading {text:?} nested in a block is written as narration");
                self.line(say(text));
            }
            Node::SectionHeading { label } => {
                warn!("section heading {label:?} nested in a block is written as narration");
                self.line(say(label));
            }
            Node::StateBlock(block) => self.write_state(block),
            Node::StateChange(change) => self.line(format!("$ {}", python_assignment(change))),
            Node::Conditional(c) => {
                for branch in &c.branches {
                    let condition = branch
                        .condition
                        .as_ref()
                        .map(python_expr)
                        .unwrap_or_default();
                    match branch.kind {
                        BranchKind::If => self.line(format!("if {condition}:")),
                        BranchKind::Elif => self.line(format!("elif {condition}:")),
                        BranchKind::Else => self.line("else:"),
                    }
                    self.block(&branch.body);
                }
            }
            Node::Loop(l) => {
                self.line(format!("while {}:", python_expr(&l.condition)));
                self.block(&l.body);
            }
            Node::Jump(jump) => {
                if let Some(display) = &jump.display {
                    self.line(say(display));
                }
                let target = self.resolve(&jump.target);
                self.line(format!("jump {target}"));
            }
            Node::Decision(d) => self.write_decision(d),
            Node::InlineChoice(choice) => {
                let target = self.resolve(&choice.target);
                self.line("menu:");
                self.depth += 1;
                self.line(format!("{}:", say(&choice.label)));
                self.depth += 1;
                self.line(format!("jump {target}"));
                self.depth -= 2;
            }
            Node::AssetDirective(asset) => self.write_asset(asset),
            Node::Raw { text } => self.line(format!("# {text}")),
        }
    }

    fn write_decision(&mut self, d: &Decision) {
        self.line("menu:");
        self.depth += 1;
        if !d.prompt.is_empty() {
            self.line(say(&d.prompt));
        }

        let dropped = d.options.iter().filter(|o| o.description.is_some()).count();
        if dropped > 0 {
            debug!("dropping {dropped} option descriptions from menu {:?}", d.prompt);
        }

        for option in &d.options {
            self.line(format!("{}:", say(&option.label)));
            self.depth += 1;
            for node in &option.body {
                self.write_node(node);
            }
            match &option.target {
                Some(target) => {
                    let target = self.resolve(target);
                    self.line(format!("jump {target}"));
                }
                None if option.body.is_empty() => self.line("pass"),
                None => {}
            }
            self.depth -= 1;
        }
        self.depth -= 1;
    }

    fn write_asset(&mut self, asset: &AssetDirective) {
        let Some(file) = asset.args.first() else {
            self.line(format!("# {}", asset.kind.keyword()));
            return;
        };
        let looped = asset.args[1..].iter().any(|a| a.eq_ignore_ascii_case("loop"));
        match asset.kind {
            AssetKind::Bg => self.line(format!("scene expression {}", string_literal(file))),
            AssetKind::Show => self.line(format!("show expression {}", string_literal(file))),
            AssetKind::Music if looped => {
                self.line(format!("play music {} loop", string_literal(file)))
            }
            AssetKind::Music => self.line(format!("play music {}", string_literal(file))),
            AssetKind::Sfx => self.line(format!("play sound {}", string_literal(file))),
            AssetKind::Hide => self.line(format!("# HIDE: {}", asset.args.join(", "))),
        }
    }

    /// `default` outside labels, `$` assignments inside one.
    fn write_state(&mut self, block: &StateBlock) {
        enum Item<'b> {
            Scalar(&'b str, &'b str),
            Group(&'b str, Vec<&'b StateEntry>),
        }

        let mut items: Vec<Item<'_>> = Vec::new();
        let mut group_index: HashMap<&str, usize> = HashMap::new();

        for entry in &block.entries {
            match entry.path.as_slice() {
                [] => {}
                [key] => items.push(Item::Scalar(key, &entry.value)),
                [head, ..] => match group_index.get(head.as_str()) {
                    Some(&idx) => {
                        if let Item::Group(_, members) = &mut items[idx] {
                            members.push(entry);
                        }
                    }
                    None => {
                        group_index.insert(head.as_str(), items.len());
                        items.push(Item::Group(head, vec![entry]));
                    }
                },
            }
        }

        let keyword = if self.in_label { "$" } else { "default" };
        for item in items {
            match item {
                Item::Scalar(name, value) => {
                    self.line(format!("{keyword} {name} = {}", python_value(value)))
                }
                Item::Group(name, members) => {
                    let fields: Vec<String> = members
                        .iter()
                        .map(|e| {
                            format!(
                                "{}: {}",
                                string_literal(&e.path[1..].join(".")),
                                python_value(&e.value)
                            )
                        })
                        .collect();
                    self.line(format!("{keyword} {name} = {{{}}}", fields.join(", ")));
                }
            }
        }
    }
}

/// Lower-case ASCII identifier; anything else collapses to `_`.
fn label_name(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        out.push_str("label");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "l_");
    }
    out
}

fn string_literal(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Say-statement text; `[` and `{` open interpolation and text tags.
fn say(text: &str) -> String {
    string_literal(&text.replace('[', "[[").replace('{', "{{"))
}

fn python_value(value: &str) -> String {
    let value = value.trim();
    let numeric = value
        .strip_prefix('-')
        .unwrap_or(value)
        .starts_with(|c: char| c.is_ascii_digit())
        && value.parse::<f64>().is_ok();
    match value {
        "true" => "True".to_string(),
        "false" => "False".to_string(),
        "null" => "None".to_string(),
        _ if numeric => value.to_string(),
        _ if value.starts_with('[') && value.ends_with(']') => value.to_string(),
        _ => string_literal(value),
    }
}

fn python_path(path: &VarPath) -> String {
    let mut segments = path.segments.iter();
    let mut out = segments.next().cloned().unwrap_or_default();
    for segment in segments {
        out.push_str(&format!("[{}]", string_literal(segment)));
    }
    out
}

fn python_expr(expr: &Expr) -> String {
    expr.render_with(python_path, python_operators)
        .trim()
        .to_string()
}

fn python_assignment(change: &StateChange) -> String {
    let target = python_path(&change.target);
    match change.op {
        AssignOp::Increment => format!("{target} += 1"),
        AssignOp::Decrement => format!("{target} -= 1"),
        AssignOp::Assign => format!("{target} = {}", python_expr(&change.expr)),
        op => format!("{target} {} {}", op.symbol(), python_expr(&change.expr)),
    }
}

fn python_word(word: &str) -> &str {
    match word {
        "true" => "True",
        "false" => "False",
        "null" | "undefined" => "None",
        "eq" | "is" => "==",
        "neq" | "isnot" => "!=",
        "gt" => ">",
        "gte" => ">=",
        "lt" => "<",
        "lte" => "<=",
        other => other,
    }
}

fn push_spaced(out: &mut String, word: &str, next: Option<char>) {
    if !out.ends_with(char::is_whitespace) && !out.ends_with('(') {
        out.push(' ');
    }
    out.push_str(word);
    if !next.map(char::is_whitespace).unwrap_or(false) {
        out.push(' ');
    }
}

/// Rewrites SugarCube/JavaScript operators and literals between variable
/// references. String literals pass through untouched.
fn python_operators(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if ch == '"' || ch == '\'' {
            let mut end = rest.len();
            let mut escaped = false;
            for (idx, c) in rest.char_indices().skip(1) {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    c if c == ch => {
                        end = idx + c.len_utf8();
                        break;
                    }
                    _ => {}
                }
            }
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            out.push_str(python_word(&rest[..len]));
            rest = &rest[len..];
            continue;
        }

        let (consumed, word) = if rest.starts_with("===") {
            (3, Some("=="))
        } else if rest.starts_with("!==") {
            (3, Some("!="))
        } else if rest.starts_with("!=") {
            (2, Some("!="))
        } else if rest.starts_with("&&") {
            (2, None)
        } else if rest.starts_with("||") {
            (2, None)
        } else if ch == '!' {
            (1, None)
        } else {
            (0, None)
        };

        match (consumed, word) {
            (0, _) => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
            (n, Some(symbol)) => {
                out.push_str(symbol);
                rest = &rest[n..];
            }
            (n, None) => {
                let keyword = match &rest[..n] {
                    "&&" => "and",
                    "||" => "or",
                    _ => "not",
                };
                rest = &rest[n..];
                push_spaced(&mut out, keyword, rest.chars().next());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(nodes: Vec<Node>) -> String {
        let _ = pretty_env_logger::try_init();
        RenpyState::new().convert(&Document::new(nodes))
    }

    #[test]
    fn test_label_names() {
        assert_eq!(label_name("INT. FOREST - NIGHT"), "int_forest_night");
        assert_eq!(label_name("GAME_OVER"), "game_over");
        assert_eq!(label_name("1st Floor"), "l_1st_floor");
        assert_eq!(label_name("..."), "label");
    }

    #[test]
    fn test_python_expressions() {
        assert_eq!(
            python_expr(&Expr::parse("$player.hp <= 0 && !$cursed")),
            "player[\"hp\"] <= 0 and not cursed"
        );
        assert_eq!(
            python_expr(&Expr::parse("gold gte 10 || name === \"a && b\"")),
            "gold >= 10 or name == \"a && b\""
        );
        assert_eq!(python_expr(&Expr::parse("met is true")), "met == True");
    }

    #[test]
    fn test_script_opening_with_heading_gets_start_label() {
        let out = convert(vec![
            Node::SectionHeading {
                label: "Hall".to_string(),
            },
            Node::Action {
                text: "A [rusty] {door}.".to_string(),
            },
            Node::Raw {
                text: "~ nonsense".to_string(),
            },
        ]);
        assert_eq!(
            out,
            "label start:\n    jump hall\n\nlabel hall:\n    \"A [[rusty] {{door}.\"\n    # ~ nonsense\n    return\n"
        );
    }

    #[test]
    fn test_options_with_bodies_and_empty_branches() {
        let out = convert(vec![
            Node::Decision(Decision {
                prompt: String::new(),
                options: vec![
                    ChoiceOption {
                        label: "Rest".to_string(),
                        description: Some("Sit a while.".to_string()),
                        body: vec![Node::StateChange(StateChange {
                            target: VarPath::new(["turns"], false),
                            op: AssignOp::Increment,
                            expr: Expr::default(),
                            is_local: false,
                        })],
                        target: Some("Hall".to_string()),
                    },
                    ChoiceOption {
                        label: "Wait".to_string(),
                        description: None,
                        body: Vec::new(),
                        target: None,
                    },
                ],
            }),
            Node::Conditional(Conditional {
                branches: vec![Branch {
                    kind: BranchKind::If,
                    condition: Some(Expr::parse("turns > 3")),
                    body: Vec::new(),
                }],
            }),
            Node::AssetDirective(AssetDirective {
                kind: AssetKind::Music,
                args: vec!["battle.ogg".to_string(), "loop".to_string()],
            }),
        ]);
        assert_eq!(
            out,
            "label start:\n    menu:\n        \"Rest\":\n            $ turns += 1\n            jump hall\n        \"Wait\":\n            pass\n    if turns > 3:\n        pass\n    play music \"battle.ogg\" loop\n    return\n"
        );
        assert!(!out.contains("Sit a while."));
    }

    #[test]
    fn test_state_defaults() {
        let entry = |path: &str, value: &str| StateEntry {
            path: path.split('.').map(str::to_string).collect(),
            value: value.to_string(),
        };
        let out = convert(vec![Node::StateBlock(StateBlock {
            entries: vec![
                entry("gold", "10"),
                entry("player.hp", "20"),
                entry("met", "false"),
                entry("player.name", "Ayla"),
            ],
        })]);
        assert_eq!(
            out,
            "default gold = 10\ndefault player = {\"hp\": 20, \"name\": \"Ayla\"}\ndefault met = False\n"
        );
    }
}
