use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::ast::*;
use crate::config::Config;

/// Forward conversion state: screenplay AST in, Twee passages out.
///
/// A state is consumed by [`ConverterState::convert`]; build a new one per
/// document.
pub struct ConverterState {
    config: Config,
    sections: HashSet<String>,
    /// Scene anchor slug to scene heading text.
    scenes: HashMap<String, String>,
    lines: Vec<String>,
    in_content_passage: bool,
    last_was_link: bool,
}

impl Default for ConverterState {
    fn default() -> Self {
        Self::with_config(&Config::default())
    }
}

impl ConverterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &Config) -> Self {
        Self {
            config: config.clone(),
            sections: HashSet::new(),
            scenes: HashMap::new(),
            lines: Vec::new(),
            in_content_passage: false,
            last_was_link: false,
        }
    }

    pub fn convert(mut self, doc: &Document) -> String {
        self.collect_targets(&doc.nodes);

        for node in &doc.nodes {
            match node {
                Node::StateBlock(block) => {
                    let header = format!(":: {}", self.config.init_passage);
                    self.open_passage(header);
                    self.write_state(block);
                    self.in_content_passage = false;
                }
                Node::SceneHeading { text } => {
                    let header = format!(":: {} [{}]", escape_title(text), self.config.scene_tag);
                    self.open_passage(header);
                    self.in_content_passage = true;
                }
                Node::SectionHeading { label } => {
                    self.open_passage(format!(":: {}", escape_title(label)));
                    self.in_content_passage = true;
                }
                other => {
                    if !self.in_content_passage {
                        let header = format!(
                            ":: {} [{}]",
                            self.config.prologue_passage, self.config.prologue_tag
                        );
                        self.open_passage(header);
                        self.in_content_passage = true;
                    }
                    self.write_node(other);
                }
            }
        }

        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    fn collect_targets(&mut self, nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::SectionHeading { label } => {
                    self.sections.insert(label.clone());
                }
                Node::SceneHeading { text } => {
                    self.scenes
                        .entry(scene_slug(text))
                        .or_insert_with(|| text.clone());
                }
                _ => {}
            }
        }
    }

    fn resolve(&self, target: &str) -> String {
        if self.sections.contains(target) {
            return target.to_string();
        }
        if let Some(title) = self.scenes.get(target) {
            return title.clone();
        }
        if self.scenes.values().any(|title| title == target) {
            return target.to_string();
        }
        warn!("jump target {target:?} names no section or scene; passing it through");
        target.to_string()
    }

    fn open_passage(&mut self, header: String) {
        if !self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.lines.push(header);
        self.last_was_link = false;
    }

    fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
        self.last_was_link = false;
    }

    fn link_line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
        self.last_was_link = true;
    }

    /// Keeps two link groups from reading back as a single run.
    fn separate_links(&mut self) {
        if self.last_was_link {
            self.lines.push(String::new());
            self.last_was_link = false;
        }
    }

    fn write_nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.write_node(node);
        }
    }

    fn write_node(&mut self, node: &Node) {
        match node {
            Node::Action { text } => self.line(text.as_str()),
            Node::Raw { text } => self.line(format!("/* {} */", text.replace("*/", "* /"))),
            Node::Parenthetical { text } => self.line(format!("({text})")),
            Node::Dialogue(d) => {
                if d.text.is_empty() {
                    self.line(format!("**{}**:", d.speaker));
                } else {
                    self.line(format!("**{}**: {}", d.speaker, d.text));
                }
            }
            Node::SceneHeading { text } => {
                warn!("scene heading {text:?} nested in a block is written as text");
                self.line(text.as_str());
            }
            Node::SectionHeading { label } => {
                warn!("section heading {label:?} nested in a block is written as text");
                self.line(label.as_str());
            }
            Node::StateBlock(block) => self.write_state(block),
            Node::StateChange(change) => self.line(render_set(change)),
            Node::Conditional(c) => {
                for branch in &c.branches {
                    let condition = branch
                        .condition
                        .as_ref()
                        .map(|e| e.render(true))
                        .unwrap_or_default();
                    match branch.kind {
                        BranchKind::If => self.line(format!("<<if {condition}>>")),
                        BranchKind::Elif => self.line(format!("<<elseif {condition}>>")),
                        BranchKind::Else => self.line("<<else>>"),
                    }
                    self.write_nodes(&branch.body);
                }
                self.line("<</if>>");
            }
            Node::Loop(l) => {
                self.line(format!("<<for {}>>", l.condition.render(true)));
                self.write_nodes(&l.body);
                self.line("<</for>>");
            }
            Node::Jump(jump) => {
                self.separate_links();
                let label = jump
                    .display
                    .clone()
                    .unwrap_or_else(|| self.config.continue_label().to_string());
                let target = self.resolve(&jump.target);
                self.link_line(format!("[[{label}|{target}]]"));
            }
            Node::Decision(d) => self.write_decision(d),
            Node::InlineChoice(choice) => {
                let target = self.resolve(&choice.target);
                self.line(format!("[[{}->{}]]", choice.label, target));
            }
            Node::AssetDirective(asset) => {
                let mut text = format!("<!-- asset {}", asset.kind.keyword());
                for arg in &asset.args {
                    text.push(' ');
                    text.push_str(&quote(arg));
                }
                text.push_str(" -->");
                self.line(text);
            }
        }
    }

    fn write_decision(&mut self, d: &Decision) {
        if d.prompt.is_empty() {
            self.separate_links();
        } else {
            self.line(d.prompt.as_str());
        }

        let dropped = d.options.iter().filter(|o| o.description.is_some()).count();
        if dropped > 0 {
            debug!("dropping {dropped} option descriptions from decision {:?}", d.prompt);
        }

        for option in &d.options {
            let target = option.target.as_deref().map(|t| self.resolve(t));
            match target {
                Some(target) if option.body.is_empty() => {
                    self.link_line(format!("[[{}|{}]]", option.label, target));
                }
                target => {
                    let opener = match target {
                        Some(target) => {
                            format!("<<link {} {}>>", quote(&option.label), quote(&target))
                        }
                        None => format!("<<link {}>>", quote(&option.label)),
                    };
                    self.line(opener);
                    self.write_nodes(&option.body);
                    self.link_line("<</link>>");
                }
            }
        }
    }

    fn write_state(&mut self, block: &StateBlock) {
        enum Item<'b> {
            Scalar(&'b StateEntry),
            Group(&'b str, Vec<&'b StateEntry>),
        }

        let mut items: Vec<Item<'_>> = Vec::new();
        let mut group_index: HashMap<&str, usize> = HashMap::new();

        for entry in &block.entries {
            match entry.path.as_slice() {
                [] => {}
                [_] => items.push(Item::Scalar(entry)),
                [head, ..] => match group_index.get(head.as_str()) {
                    Some(&idx) => {
                        if let Item::Group(_, members) = &mut items[idx] {
                            members.push(entry);
                        }
                    }
                    None => {
                        group_index.insert(head.as_str(), items.len());
                        items.push(Item::Group(head.as_str(), vec![entry]));
                    }
                },
            }
        }

        for item in items {
            match item {
                Item::Scalar(entry) => self.line(format!(
                    "<<set ${} to {}>>",
                    entry.path.join("."),
                    encode_value(&entry.value)
                )),
                Item::Group(head, members) => {
                    let fields: Vec<String> = members
                        .iter()
                        .map(|e| {
                            format!(
                                "{}: {}",
                                object_key(&e.path[1..].join(".")),
                                encode_value(&e.value)
                            )
                        })
                        .collect();
                    self.line(format!("<<set ${head} to {{ {} }}>>", fields.join(", ")));
                }
            }
        }
    }
}

fn render_set(change: &StateChange) -> String {
    let target = change.target.render(true);
    match change.op {
        AssignOp::Increment | AssignOp::Decrement => {
            format!("<<set {}{}>>", target, change.op.symbol())
        }
        AssignOp::Assign => format!("<<set {} to {}>>", target, change.expr.render(true)),
        op => format!("<<set {} {} {}>>", target, op.symbol(), change.expr.render(true)),
    }
}

/// Passage names escape the characters that would start tags or metadata.
fn escape_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        if matches!(ch, '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn object_key(key: &str) -> String {
    let mut chars = key.chars();
    let is_ident = chars
        .next()
        .map(|c| c.is_alphabetic() || c == '_' || c == '$')
        .unwrap_or(false)
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if is_ident {
        key.to_string()
    } else {
        quote(key)
    }
}

/// Numbers, booleans, `null`, arrays and objects go through as written;
/// anything else becomes a string literal.
fn encode_value(value: &str) -> String {
    let value = value.trim();
    let numeric = value
        .strip_prefix('-')
        .unwrap_or(value)
        .starts_with(|c: char| c.is_ascii_digit())
        && value.parse::<f64>().is_ok();
    let literal = matches!(value, "true" | "false" | "null")
        || (value.starts_with('[') && value.ends_with(']'))
        || (value.starts_with('{') && value.ends_with('}'));
    if numeric || literal {
        value.to_string()
    } else {
        quote(value)
    }
}
