use crate::ast::*;
use crate::classify::{is_all_caps, is_scene_prefixed};

const INDENT: usize = 4;

/// Writes a document back out in the screenplay dialect.
///
/// Reparsing the output yields the same document for anything the source
/// parser itself produces.
pub fn print(doc: &Document) -> String {
    let mut printer = Printer::default();
    printer.write(&doc.nodes, 0);
    while printer.out.last().map(|l| l.is_empty()).unwrap_or(false) {
        printer.out.pop();
    }
    let mut text = printer.out.join("\n");
    text.push('\n');
    text
}

#[derive(Default)]
struct Printer {
    out: Vec<String>,
}

impl Printer {
    fn line(&mut self, indent: usize, text: &str) {
        self.out.push(format!("{}{}", " ".repeat(indent), text));
    }

    fn blank(&mut self) {
        if self.out.last().map(|l| !l.is_empty()).unwrap_or(false) {
            self.out.push(String::new());
        }
    }

    fn write(&mut self, nodes: &[Node], indent: usize) {
        let mut idx = 0;
        while idx < nodes.len() {
            idx += self.write_at(nodes, idx, indent);
        }
    }

    /// Writes the node at `idx` and returns how many nodes it consumed.
    fn write_at(&mut self, nodes: &[Node], idx: usize, indent: usize) -> usize {
        match &nodes[idx] {
            Node::Dialogue(_) | Node::Parenthetical { .. } => {
                if let Some(consumed) = self.write_dialogue(nodes, idx, indent) {
                    return consumed;
                }
                if let Node::Parenthetical { text } = &nodes[idx] {
                    self.line(indent, &format!("({text})"));
                    self.blank();
                }
            }
            Node::StateBlock(block) => self.write_state(block),
            Node::SceneHeading { text } => {
                self.blank();
                if is_scene_prefixed(text) || (is_all_caps(text) && !text.starts_with('(')) {
                    self.line(indent, text);
                } else {
                    self.line(indent, &format!(".{text}"));
                }
                self.blank();
            }
            Node::SectionHeading { label } => {
                self.blank();
                self.line(indent, &format!("# {label}"));
                self.blank();
            }
            Node::Action { text } => {
                self.line(indent, text);
                self.blank();
            }
            Node::Raw { text } => self.line(indent, text),
            Node::StateChange(change) => {
                let target = change.target.render(false);
                if change.op.is_unary() {
                    self.line(indent, &format!("~ {}{}", target, change.op.symbol()));
                } else {
                    self.line(
                        indent,
                        &format!(
                            "~ {} {} {}",
                            target,
                            change.op.symbol(),
                            change.expr.render(false)
                        ),
                    );
                }
            }
            Node::Conditional(c) => {
                for branch in &c.branches {
                    let condition = branch
                        .condition
                        .as_ref()
                        .map(|e| e.render(false))
                        .unwrap_or_default();
                    let opener = match branch.kind {
                        BranchKind::If => format!("(IF: {condition})"),
                        BranchKind::Elif => format!("(ELIF: {condition})"),
                        BranchKind::Else => "(ELSE)".to_string(),
                    };
                    self.line(indent, &opener);
                    self.write(&branch.body, indent + INDENT);
                }
                self.line(indent, "(END)");
            }
            Node::Loop(l) => {
                self.line(indent, &format!("(LOOP: {})", l.condition.render(false)));
                self.write(&l.body, indent + INDENT);
                self.line(indent, "(END)");
            }
            Node::Jump(jump) => match &jump.display {
                Some(display) => self.line(indent, &format!("{} -> #{}", display, jump.target)),
                None => self.line(indent, &format!("-> #{}", jump.target)),
            },
            Node::Decision(d) => {
                if !d.prompt.is_empty() {
                    self.line(indent, &format!("? {}", d.prompt));
                }
                for option in &d.options {
                    let mut text = format!("+ [{}]", option.label);
                    if let Some(description) = &option.description {
                        text.push(' ');
                        text.push_str(description);
                    }
                    match &option.target {
                        // A target on the `+` line would end the option there.
                        Some(target) if !option.body.is_empty() => {
                            self.line(indent, &text);
                            self.write(&option.body, indent + INDENT);
                            self.line(indent + INDENT, &format!("-> #{target}"));
                        }
                        Some(target) => {
                            text.push_str(&format!(" -> #{target}"));
                            self.line(indent, &text);
                        }
                        None => {
                            self.line(indent, &text);
                            self.write(&option.body, indent + INDENT);
                        }
                    }
                }
                self.blank();
            }
            Node::InlineChoice(choice) => {
                self.line(indent, &format!("[{}|#{}]", choice.label, choice.target));
            }
            Node::AssetDirective(asset) => {
                self.line(
                    indent,
                    &format!("! {}: {}", asset.kind.keyword(), asset.args.join(", ")),
                );
            }
        }
        1
    }

    /// A cue followed by its speech, folding in the parentheticals the parser
    /// split out of the same block.
    fn write_dialogue(&mut self, nodes: &[Node], idx: usize, indent: usize) -> Option<usize> {
        let (speaker, mut consumed) = match (&nodes[idx], nodes.get(idx + 1)) {
            (Node::Dialogue(d), _) => (d.speaker.as_str(), 0),
            (Node::Parenthetical { .. }, Some(Node::Dialogue(d))) => (d.speaker.as_str(), 0),
            _ => return None,
        };

        self.blank();
        self.line(indent, speaker);
        if let Node::Dialogue(d) = &nodes[idx] {
            if !d.text.is_empty() {
                self.line(indent, &d.text);
            }
            consumed = 1;
        }

        while let (Some(Node::Parenthetical { text }), Some(Node::Dialogue(d))) =
            (nodes.get(idx + consumed), nodes.get(idx + consumed + 1))
        {
            if d.speaker != speaker {
                break;
            }
            self.line(indent, &format!("({text})"));
            self.line(indent, &d.text);
            consumed += 2;
        }

        self.blank();
        Some(consumed)
    }

    fn write_state(&mut self, block: &StateBlock) {
        let mut group: Option<&str> = None;
        for entry in &block.entries {
            match entry.path.as_slice() {
                [] => {}
                [key] => {
                    group = None;
                    self.line(0, &format!("$ {}: {}", key, entry.value));
                }
                [head, rest @ ..] => {
                    if group != Some(head.as_str()) {
                        self.line(0, &format!("$$ {head}"));
                        group = Some(head.as_str());
                    }
                    self.line(INDENT, &format!("$ {}: {}", rest.join("."), entry.value));
                }
            }
        }
        self.line(0, "===");
        self.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn reprint(source: &str) -> (Document, String) {
        let doc = parser::parse(source).unwrap();
        let printed = print(&doc);
        (doc, printed)
    }

    #[test]
    fn test_print_reparses_to_same_document() {
        let source = "$ gold: 10\n$$ player\n    $ hp: 20\n===\n\nINT. FOREST - NIGHT\n\nGOBLIN\n(snarling)\nHalt!\n(grinning)\nPay up.\n\n? What do you do?\n+ [Pay] Hand over the coins.\n    ~ gold -= 5\n    -> #Road\n+ [Fight] Draw steel. -> #Fight\n\n(IF: $player.hp <= 0)\n    You fall. -> #GAME_OVER\n(ELSE)\n    (LOOP: turns < 3)\n        ~ turns++\n    (END)\n(END)\n! MUSIC: battle.ogg, loop\n[Look around|#Clearing]\n\n# Fight\n\nSteel rings.\n";
        let (doc, printed) = reprint(source);
        let again = parser::parse(&printed).unwrap();
        assert_eq!(again, doc, "printed:\n{printed}");
    }

    #[test]
    fn test_print_keeps_author_prefixes() {
        let (_, printed) = reprint("~ $gold += bonus\n(IF: player.hp <= 0)\nDown.\n(END)\n");
        assert!(printed.starts_with("~ $gold += bonus\n(IF: player.hp <= 0)\n"));
    }

    #[test]
    fn test_print_prefixed_document() {
        let doc = parser::parse("~ gold += bonus\n").unwrap().with_prefixed_variables();
        assert_eq!(print(&doc), "~ $gold += $bonus\n");
    }
}
