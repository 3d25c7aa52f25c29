use serde::{Deserialize, Serialize};

use crate::expr::{Expr, VarPath};

/// A parsed script: the ordered top-level nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    SceneHeading { text: String },
    SectionHeading { label: String },
    Dialogue(Dialogue),
    Action { text: String },
    Parenthetical { text: String },
    StateBlock(StateBlock),
    StateChange(StateChange),
    Conditional(Conditional),
    Loop(Loop),
    Jump(Jump),
    Decision(Decision),
    InlineChoice(InlineChoice),
    AssetDirective(AssetDirective),
    Raw { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    pub speaker: String,
    pub text: String,
}

/// Frontmatter state declarations, in source order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateBlock {
    pub entries: Vec<StateEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub path: Vec<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub target: VarPath,
    pub op: AssignOp,
    /// Empty for `++` and `--`.
    pub expr: Expr,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "+=")]
    AddAssign,
    #[serde(rename = "-=")]
    SubAssign,
    #[serde(rename = "++")]
    Increment,
    #[serde(rename = "--")]
    Decrement,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::AddAssign => "+=",
            AssignOp::SubAssign => "-=",
            AssignOp::Increment => "++",
            AssignOp::Decrement => "--",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, AssignOp::Increment | AssignOp::Decrement)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub kind: BranchKind,
    /// `None` only for `else`.
    pub condition: Option<Expr>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    If,
    Elif,
    Else,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub condition: Expr,
    pub body: Vec<Node>,
}

/// `-> #X`, `text -> #X` and `->text-> #X` all collapse to this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jump {
    pub display: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub prompt: String,
    pub options: Vec<ChoiceOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    pub description: Option<String>,
    pub body: Vec<Node>,
    /// Set by the single-line form `+ [Label] text -> #Target`.
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineChoice {
    pub label: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDirective {
    pub kind: AssetKind,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetKind {
    Bg,
    Show,
    Hide,
    Music,
    Sfx,
}

impl AssetKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.trim().to_uppercase().as_str() {
            "BG" => Some(AssetKind::Bg),
            "SHOW" => Some(AssetKind::Show),
            "HIDE" => Some(AssetKind::Hide),
            "MUSIC" => Some(AssetKind::Music),
            "SFX" => Some(AssetKind::Sfx),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            AssetKind::Bg => "BG",
            AssetKind::Show => "SHOW",
            AssetKind::Hide => "HIDE",
            AssetKind::Music => "MUSIC",
            AssetKind::Sfx => "SFX",
        }
    }
}

impl Node {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::SceneHeading { .. } => "SceneHeading",
            Node::SectionHeading { .. } => "SectionHeading",
            Node::Dialogue(_) => "Dialogue",
            Node::Action { .. } => "Action",
            Node::Parenthetical { .. } => "Parenthetical",
            Node::StateBlock(_) => "StateBlock",
            Node::StateChange(_) => "StateChange",
            Node::Conditional(_) => "Conditional",
            Node::Loop(_) => "Loop",
            Node::Jump(_) => "Jump",
            Node::Decision(_) => "Decision",
            Node::InlineChoice(_) => "InlineChoice",
            Node::AssetDirective(_) => "AssetDirective",
            Node::Raw { .. } => "Raw",
        }
    }

    /// One-line description used in fidelity reports.
    pub fn summary(&self) -> String {
        match self {
            Node::SceneHeading { text } => format!("SceneHeading({text})"),
            Node::SectionHeading { label } => format!("SectionHeading(#{label})"),
            Node::Dialogue(d) => format!("Dialogue({}: {})", d.speaker, d.text),
            Node::Action { text } => format!("Action({text})"),
            Node::Parenthetical { text } => format!("Parenthetical({text})"),
            Node::StateBlock(b) => format!("StateBlock({} entries)", b.entries.len()),
            Node::StateChange(s) => {
                if s.op.is_unary() {
                    format!("StateChange({}{})", s.target.render(false), s.op.symbol())
                } else {
                    format!(
                        "StateChange({} {} {})",
                        s.target.render(false),
                        s.op.symbol(),
                        s.expr.render(false)
                    )
                }
            }
            Node::Conditional(c) => {
                let first = c
                    .branches
                    .first()
                    .and_then(|b| b.condition.as_ref())
                    .map(|e| e.render(false))
                    .unwrap_or_default();
                format!("Conditional(if {first}; {} branches)", c.branches.len())
            }
            Node::Loop(l) => format!(
                "Loop({}; {} nodes)",
                l.condition.render(false),
                l.body.len()
            ),
            Node::Jump(j) => match &j.display {
                Some(text) => format!("Jump({text} -> #{})", j.target),
                None => format!("Jump(-> #{})", j.target),
            },
            Node::Decision(d) => {
                let labels: Vec<&str> = d.options.iter().map(|o| o.label.as_str()).collect();
                format!("Decision({:?}; [{}])", d.prompt, labels.join(", "))
            }
            Node::InlineChoice(c) => format!("InlineChoice([{}|{}])", c.label, c.target),
            Node::AssetDirective(a) => {
                format!("AssetDirective({}: {})", a.kind.keyword(), a.args.join(", "))
            }
            Node::Raw { text } => format!("Raw({text})"),
        }
    }

    /// Rebuilds the node with every variable reference marked as `$`-prefixed.
    pub fn with_prefixed_variables(&self) -> Node {
        match self {
            Node::StateChange(s) => Node::StateChange(StateChange {
                target: s.target.with_dollar(),
                op: s.op,
                expr: s.expr.with_prefixed_variables(),
                is_local: s.is_local,
            }),
            Node::Conditional(c) => Node::Conditional(Conditional {
                branches: c
                    .branches
                    .iter()
                    .map(|b| Branch {
                        kind: b.kind,
                        condition: b.condition.as_ref().map(Expr::with_prefixed_variables),
                        body: prefixed(&b.body),
                    })
                    .collect(),
            }),
            Node::Loop(l) => Node::Loop(Loop {
                condition: l.condition.with_prefixed_variables(),
                body: prefixed(&l.body),
            }),
            Node::Decision(d) => Node::Decision(Decision {
                prompt: d.prompt.clone(),
                options: d
                    .options
                    .iter()
                    .map(|o| ChoiceOption {
                        label: o.label.clone(),
                        description: o.description.clone(),
                        body: prefixed(&o.body),
                        target: o.target.clone(),
                    })
                    .collect(),
            }),
            other => other.clone(),
        }
    }
}

fn prefixed(nodes: &[Node]) -> Vec<Node> {
    nodes.iter().map(Node::with_prefixed_variables).collect()
}

impl Document {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn with_prefixed_variables(&self) -> Document {
        Document {
            nodes: prefixed(&self.nodes),
        }
    }
}

/// Anchor label for a scene heading: upper-cased, runs of anything that is
/// not a letter or digit collapsed to `_`.
///
/// `INT. FOREST - NIGHT` becomes `INT_FOREST_NIGHT`.
pub fn scene_slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
