//! Positional comparison of an original tree against its roundtrip.
//!
//! There is no fuzzy realignment. The only expansion recognised is the one
//! the forward converter always produces: a decision prompt written out as a
//! line of text in front of the rebuilt links.

use crate::ast::*;
use crate::expr::{Expr, ExprMatch};
use crate::types::{Category, Divergence};

pub fn diff(original: &Document, roundtrip: &Document) -> Vec<Divergence> {
    let mut differ = Differ::default();
    differ.sequence(&original.nodes, &roundtrip.nodes, "");
    differ.out
}

#[derive(Default)]
struct Differ {
    out: Vec<Divergence>,
}

impl Differ {
    fn record(
        &mut self,
        category: Category,
        location: &str,
        original: Option<String>,
        roundtrip: Option<String>,
    ) {
        self.out.push(Divergence {
            category,
            location: location.to_string(),
            original,
            roundtrip,
        });
    }

    fn sequence(&mut self, original: &[Node], roundtrip: &[Node], prefix: &str) {
        let (mut i, mut j) = (0, 0);
        while i < original.len() && j < roundtrip.len() {
            let location = format!("{prefix}[{i}]");
            if let Some(consumed) = self.prompt_expansion(&original[i], &roundtrip[j..], &location) {
                i += 1;
                j += consumed;
                continue;
            }
            self.node(&original[i], &roundtrip[j], &location);
            i += 1;
            j += 1;
        }
        for (k, node) in original.iter().enumerate().skip(i) {
            self.record(
                Category::Missing,
                &format!("{prefix}[{k}]"),
                Some(node.summary()),
                None,
            );
        }
        for (k, node) in roundtrip.iter().enumerate().skip(j) {
            self.record(
                Category::Extra,
                &format!("{prefix}[{k}]"),
                None,
                Some(node.summary()),
            );
        }
    }

    /// `Decision(prompt)` against `Action(prompt)` followed by the links that
    /// came back. Returns how many roundtrip nodes were consumed.
    fn prompt_expansion(&mut self, original: &Node, roundtrip: &[Node], location: &str) -> Option<usize> {
        let Node::Decision(decision) = original else {
            return None;
        };
        let (Some(Node::Action { text }), Some(links)) = (roundtrip.first(), roundtrip.get(1)) else {
            return None;
        };
        if decision.prompt.is_empty() || *text != decision.prompt {
            return None;
        }

        match links {
            Node::Decision(rebuilt) => {
                self.record(
                    Category::DecisionCollapsed,
                    location,
                    Some(original.summary()),
                    Some(format!("{} + {}", roundtrip[0].summary(), links.summary())),
                );
                self.options(decision, rebuilt, location);
                Some(2)
            }
            Node::Jump(_) => {
                self.record(
                    Category::DecisionCollapsed,
                    location,
                    Some(original.summary()),
                    Some(format!("{} + {}", roundtrip[0].summary(), links.summary())),
                );
                Some(2)
            }
            _ => None,
        }
    }

    fn node(&mut self, original: &Node, roundtrip: &Node, location: &str) {
        match (original, roundtrip) {
            (Node::Decision(a), Node::Decision(b)) => {
                let prompt_lost = a.prompt != b.prompt;
                let descriptions_lost = a
                    .options
                    .iter()
                    .zip(&b.options)
                    .any(|(x, y)| x.description != y.description);
                if prompt_lost || descriptions_lost {
                    self.record(
                        Category::DecisionCollapsed,
                        location,
                        Some(original.summary()),
                        Some(roundtrip.summary()),
                    );
                }
                self.options(a, b, location);
            }
            (Node::Decision(_), Node::Jump(_) | Node::Action { .. }) => {
                self.record(
                    Category::DecisionCollapsed,
                    location,
                    Some(original.summary()),
                    Some(roundtrip.summary()),
                );
            }
            (Node::Conditional(a), Node::Conditional(b)) => {
                if a.branches.len() != b.branches.len() {
                    self.shift(original, roundtrip, location);
                }
                for (k, (x, y)) in a.branches.iter().zip(&b.branches).enumerate() {
                    let at = format!("{location}.branches[{k}]");
                    if x.kind != y.kind {
                        self.record(
                            Category::StructuralShift,
                            &at,
                            Some(format!("{:?}", x.kind)),
                            Some(format!("{:?}", y.kind)),
                        );
                    }
                    match (&x.condition, &y.condition) {
                        (Some(cx), Some(cy)) => self.expr(cx, cy, &format!("{at}.condition")),
                        (None, None) => {}
                        (cx, cy) => self.record(
                            Category::StructuralShift,
                            &format!("{at}.condition"),
                            cx.as_ref().map(|e| e.render(false)),
                            cy.as_ref().map(|e| e.render(false)),
                        ),
                    }
                    self.sequence(&x.body, &y.body, &format!("{at}.body"));
                }
            }
            (Node::Loop(a), Node::Loop(b)) => {
                self.expr(&a.condition, &b.condition, &format!("{location}.condition"));
                self.sequence(&a.body, &b.body, &format!("{location}.body"));
            }
            (Node::StateChange(a), Node::StateChange(b)) => {
                let same_shape = a.target.segments == b.target.segments && a.op == b.op;
                let expr = a.expr.compare(&b.expr);
                if !same_shape || expr == ExprMatch::Different {
                    self.unclassified(original, roundtrip, location);
                } else if a.target.had_dollar != b.target.had_dollar || expr == ExprMatch::DollarOnly {
                    self.record(
                        Category::VariableFormatting,
                        location,
                        Some(original.summary()),
                        Some(roundtrip.summary()),
                    );
                }
            }
            (a, b) if a.kind_name() != b.kind_name() => self.shift(a, b, location),
            (a, b) => {
                if a != b {
                    self.unclassified(a, b, location);
                }
            }
        }
    }

    fn options(&mut self, original: &Decision, roundtrip: &Decision, location: &str) {
        if original.options.len() != roundtrip.options.len() {
            self.record(
                Category::StructuralShift,
                &format!("{location}.options"),
                Some(format!("{} options", original.options.len())),
                Some(format!("{} options", roundtrip.options.len())),
            );
        }
        for (k, (x, y)) in original.options.iter().zip(&roundtrip.options).enumerate() {
            let at = format!("{location}.options[{k}]");
            if x.label != y.label || x.target != y.target {
                self.record(
                    Category::Unclassified,
                    &at,
                    Some(option_summary(x)),
                    Some(option_summary(y)),
                );
            }
            self.sequence(&x.body, &y.body, &format!("{at}.body"));
        }
    }

    fn expr(&mut self, original: &Expr, roundtrip: &Expr, location: &str) {
        let category = match original.compare(roundtrip) {
            ExprMatch::Same => return,
            ExprMatch::DollarOnly => Category::VariableFormatting,
            ExprMatch::Different => Category::Unclassified,
        };
        self.record(
            category,
            location,
            Some(original.render(false)),
            Some(roundtrip.render(false)),
        );
    }

    fn shift(&mut self, original: &Node, roundtrip: &Node, location: &str) {
        self.record(
            Category::StructuralShift,
            location,
            Some(original.summary()),
            Some(roundtrip.summary()),
        );
    }

    fn unclassified(&mut self, original: &Node, roundtrip: &Node, location: &str) {
        self.record(
            Category::Unclassified,
            location,
            Some(original.summary()),
            Some(roundtrip.summary()),
        );
    }
}

fn option_summary(option: &ChoiceOption) -> String {
    match &option.target {
        Some(target) => format!("[{}] -> #{}", option.label, target),
        None => format!("[{}]", option.label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::VarPath;

    fn action(text: &str) -> Node {
        Node::Action {
            text: text.to_string(),
        }
    }

    fn option(label: &str, description: Option<&str>) -> ChoiceOption {
        ChoiceOption {
            label: label.to_string(),
            description: description.map(str::to_string),
            body: Vec::new(),
            target: Some(label.to_string()),
        }
    }

    #[test]
    fn test_identical_documents_are_clean() {
        let doc = Document::new(vec![action("a"), action("b")]);
        assert!(diff(&doc, &doc.clone()).is_empty());
    }

    #[test]
    fn test_prompt_expansion_is_one_record() {
        let original = Document::new(vec![
            Node::Decision(Decision {
                prompt: "What now?".to_string(),
                options: vec![option("Fight", Some("Swing.")), option("Flee", Some("Run."))],
            }),
            action("after"),
        ]);
        let roundtrip = Document::new(vec![
            action("What now?"),
            Node::Decision(Decision {
                prompt: String::new(),
                options: vec![option("Fight", None), option("Flee", None)],
            }),
            action("after"),
        ]);
        let out = diff(&original, &roundtrip);
        assert_eq!(out.len(), 1, "{out:?}");
        assert_eq!(out[0].category, Category::DecisionCollapsed);
        assert_eq!(out[0].location, "[0]");
    }

    #[test]
    fn test_variable_formatting_in_nested_condition() {
        let original = Document::new(vec![Node::Conditional(Conditional {
            branches: vec![Branch {
                kind: BranchKind::If,
                condition: Some(Expr::parse("player.hp <= 0")),
                body: vec![Node::StateChange(StateChange {
                    target: VarPath::new(["hp"], false),
                    op: AssignOp::Assign,
                    expr: Expr::parse("0"),
                    is_local: false,
                })],
            }],
        })]);
        let roundtrip = original.with_prefixed_variables();
        let out = diff(&original, &roundtrip);
        let locations: Vec<(&str, Category)> = out
            .iter()
            .map(|d| (d.location.as_str(), d.category))
            .collect();
        assert_eq!(
            locations,
            vec![
                ("[0].branches[0].condition", Category::VariableFormatting),
                ("[0].branches[0].body[0]", Category::VariableFormatting),
            ]
        );
    }

    #[test]
    fn test_shift_missing_and_extra() {
        let original = Document::new(vec![
            action("a"),
            Node::Jump(Jump {
                display: None,
                target: "X".to_string(),
            }),
            action("c"),
        ]);
        let roundtrip = Document::new(vec![action("a"), action("b")]);
        let out = diff(&original, &roundtrip);
        let categories: Vec<Category> = out.iter().map(|d| d.category).collect();
        assert_eq!(categories, vec![Category::StructuralShift, Category::Missing]);
        assert_eq!(out[1].location, "[2]");

        let out = diff(&roundtrip, &original);
        assert_eq!(out.last().map(|d| d.category), Some(Category::Extra));
    }

    #[test]
    fn test_decision_to_jump_is_collapsed() {
        let original = Document::new(vec![Node::Decision(Decision {
            prompt: String::new(),
            options: vec![option("Go", None)],
        })]);
        let roundtrip = Document::new(vec![Node::Jump(Jump {
            display: Some("Go".to_string()),
            target: "Go".to_string(),
        })]);
        let out = diff(&original, &roundtrip);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category, Category::DecisionCollapsed);
    }

    #[test]
    fn test_content_change_is_unclassified() {
        let out = diff(
            &Document::new(vec![action("a")]),
            &Document::new(vec![action("b")]),
        );
        assert_eq!(out[0].category, Category::Unclassified);
        assert_eq!(out[0].original.as_deref(), Some("Action(a)"));
    }
}
