use log::{debug, trace};

use crate::ast::*;
use crate::classify::{
    classify, split_lines, BlockKind, Control, InlineSegment, Line, LineContext, LineKind,
    OptionLine,
};
use crate::error::{ParseError, ParseErrorKind};
use crate::expr::{parse_assignment, Expr};

/// Parses a screenplay-dialect script into a [`Document`].
///
/// Fails on the first structural error; no partial document is returned.
pub fn parse(input: &str) -> Result<Document, ParseError> {
    let lines = split_lines(input);
    let mut parser = Parser::default();

    if let Some(first) = lines.iter().find(|l| !l.is_blank()) {
        if first.text.starts_with('$') {
            parser.frames.push(Frame::Frontmatter(FrontmatterFrame {
                opened_at: first.number,
                entries: Vec::new(),
                group: None,
            }));
        }
    }

    for (idx, line) in lines.iter().enumerate() {
        let next_is_blank = lines.get(idx + 1).map(Line::is_blank).unwrap_or(true);
        let open_blocks = parser.open_blocks_for(line);
        let kind = classify(
            line,
            &LineContext {
                open_blocks: &open_blocks,
                next_is_blank,
            },
        );
        trace!("line {}: {:?}", line.number, kind);
        parser.handle(line, kind)?;
    }

    parser.finish()
}

struct FrontmatterFrame {
    opened_at: usize,
    entries: Vec<StateEntry>,
    group: Option<String>,
}

struct ConditionalFrame {
    opened_at: usize,
    opened: String,
    branches: Vec<Branch>,
    kind: BranchKind,
    condition: Option<Expr>,
    body: Vec<Node>,
}

struct LoopFrame {
    opened_at: usize,
    opened: String,
    condition: Expr,
    body: Vec<Node>,
}

struct DecisionFrame {
    opened_at: usize,
    indent: usize,
    prompt: String,
    options: Vec<ChoiceOption>,
}

struct OptionFrame {
    indent: usize,
    label: String,
    description: Option<String>,
    body: Vec<Node>,
}

struct DialogueFrame {
    speaker: String,
    text: String,
    emitted: bool,
}

enum Frame {
    Frontmatter(FrontmatterFrame),
    Conditional(ConditionalFrame),
    Loop(LoopFrame),
    Decision(DecisionFrame),
    Option(OptionFrame),
    Dialogue(DialogueFrame),
}

impl Frame {
    fn block_kind(&self) -> BlockKind {
        match self {
            Frame::Frontmatter(_) => BlockKind::Frontmatter,
            Frame::Conditional(_) => BlockKind::Conditional,
            Frame::Loop(_) => BlockKind::Loop,
            Frame::Decision(_) => BlockKind::Decision,
            Frame::Option(_) => BlockKind::Option,
            Frame::Dialogue(_) => BlockKind::Dialogue,
        }
    }
}

#[derive(Default)]
struct Parser {
    frames: Vec<Frame>,
    root: Vec<Node>,
}

impl Parser {
    /// Blocks the line is nested in. Decisions and options that a non-blank
    /// line at this indent would close are left out; `+` lines never reach
    /// the rules that read this.
    fn open_blocks_for(&self, line: &Line<'_>) -> Vec<BlockKind> {
        let mut kept = self.frames.len();
        if !line.is_blank() {
            while let Some(frame) = kept.checked_sub(1).map(|i| &self.frames[i]) {
                match frame {
                    Frame::Option(o) if line.indent <= o.indent => kept -= 1,
                    Frame::Decision(_) => kept -= 1,
                    _ => break,
                }
            }
        }
        self.frames[..kept].iter().map(Frame::block_kind).collect()
    }

    fn handle(&mut self, line: &Line<'_>, kind: LineKind<'_>) -> Result<(), ParseError> {
        if let Some(Frame::Frontmatter(_)) = self.frames.last() {
            return self.handle_frontmatter(line, kind);
        }

        self.settle(line, &kind)?;

        match kind {
            LineKind::Blank => {}
            LineKind::FrontmatterDelimiter => self.emit(Node::Raw {
                text: line.text.to_string(),
            }),
            LineKind::StateGroup(_) | LineKind::StateEntry { .. } | LineKind::MalformedState => {
                self.emit(Node::Raw {
                    text: line.text.to_string(),
                })
            }
            LineKind::SectionHeading(label) => {
                self.check_heading(line, label)?;
                self.emit(Node::SectionHeading {
                    label: label.to_string(),
                });
            }
            LineKind::SceneHeading(text) => {
                self.check_heading(line, text)?;
                self.emit(Node::SceneHeading {
                    text: text.to_string(),
                });
            }
            LineKind::Control(control) => self.handle_control(line, control)?,
            LineKind::StateChange(body) => {
                let node = match parse_assignment(body) {
                    Some((target, op, operand)) => Node::StateChange(StateChange {
                        is_local: target.is_local(),
                        target,
                        op,
                        expr: Expr::parse(operand),
                    }),
                    None => Node::Raw {
                        text: line.text.to_string(),
                    },
                };
                self.emit(node);
            }
            LineKind::Asset { kind, args } => {
                let node = match AssetKind::from_keyword(kind) {
                    Some(kind) => Node::AssetDirective(AssetDirective {
                        kind,
                        args: split_asset_args(args),
                    }),
                    None => Node::Raw {
                        text: line.text.to_string(),
                    },
                };
                self.emit(node);
            }
            LineKind::DecisionPrompt(prompt) => {
                self.frames.push(Frame::Decision(DecisionFrame {
                    opened_at: line.number,
                    indent: line.indent,
                    prompt: prompt.to_string(),
                    options: Vec::new(),
                }));
            }
            LineKind::ChoiceOption(option) => self.handle_option(line, option),
            LineKind::InlineChoices(segments) => {
                for segment in segments {
                    let node = match segment {
                        InlineSegment::Text(text) => Node::Action {
                            text: text.to_string(),
                        },
                        InlineSegment::Choice { label, target } => {
                            Node::InlineChoice(InlineChoice {
                                label: label.to_string(),
                                target: target.to_string(),
                            })
                        }
                    };
                    self.emit(node);
                }
            }
            LineKind::Jump(jump) => self.emit(Node::Jump(Jump {
                display: jump.display.map(str::to_string),
                target: jump.target.to_string(),
            })),
            LineKind::CharacterCue(name) => {
                self.frames.push(Frame::Dialogue(DialogueFrame {
                    speaker: name.to_string(),
                    text: String::new(),
                    emitted: false,
                }));
            }
            LineKind::Dialogue(text) => match self.frames.last_mut() {
                Some(Frame::Dialogue(d)) => {
                    if !d.text.is_empty() {
                        d.text.push(' ');
                    }
                    d.text.push_str(text);
                }
                _ => self.emit(Node::Action {
                    text: text.to_string(),
                }),
            },
            LineKind::Parenthetical(text) => {
                self.flush_dialogue();
                self.emit(Node::Parenthetical {
                    text: text.to_string(),
                });
            }
            LineKind::Action(text) => self.emit(Node::Action {
                text: text.to_string(),
            }),
        }
        Ok(())
    }

    fn handle_frontmatter(&mut self, line: &Line<'_>, kind: LineKind<'_>) -> Result<(), ParseError> {
        let malformed = || {
            ParseError::new(
                line.number,
                ParseErrorKind::MalformedFrontmatter {
                    text: line.text.to_string(),
                },
            )
        };

        match kind {
            LineKind::Blank => Ok(()),
            LineKind::FrontmatterDelimiter => {
                if let Some(Frame::Frontmatter(fm)) = self.frames.pop() {
                    debug!("frontmatter closed with {} entries", fm.entries.len());
                    self.root.push(Node::StateBlock(StateBlock {
                        entries: fm.entries,
                    }));
                }
                Ok(())
            }
            LineKind::StateGroup(name) => {
                let name = name.trim_end_matches(':').trim();
                if name.is_empty() {
                    return Err(malformed());
                }
                if let Some(Frame::Frontmatter(fm)) = self.frames.last_mut() {
                    fm.group = Some(name.to_string());
                }
                Ok(())
            }
            LineKind::StateEntry {
                key,
                value,
                indented,
            } => {
                if let Some(Frame::Frontmatter(fm)) = self.frames.last_mut() {
                    if !indented {
                        fm.group = None;
                    }
                    let mut path: Vec<String> = Vec::new();
                    if let Some(group) = &fm.group {
                        path.extend(group.split('.').map(str::to_string));
                    }
                    path.extend(key.split('.').map(|s| s.trim().to_string()));
                    fm.entries.push(StateEntry {
                        path,
                        value: unquote(value).to_string(),
                    });
                }
                Ok(())
            }
            _ => Err(malformed()),
        }
    }

    /// Closes dialogue, option and decision frames that the incoming line ends.
    fn settle(&mut self, line: &Line<'_>, kind: &LineKind<'_>) -> Result<(), ParseError> {
        let blank = matches!(kind, LineKind::Blank);
        let heading = matches!(kind, LineKind::SectionHeading(_) | LineKind::SceneHeading(_));
        let branch_keyword = matches!(
            kind,
            LineKind::Control(Control::Elif(_) | Control::Else | Control::End)
        );

        loop {
            match self.frames.last() {
                Some(Frame::Dialogue(_))
                    if !matches!(kind, LineKind::Dialogue(_) | LineKind::Parenthetical(_)) =>
                {
                    self.close_dialogue();
                }
                Some(Frame::Option(o))
                    if !blank && (line.indent <= o.indent || heading || branch_keyword) =>
                {
                    self.close_option();
                }
                Some(Frame::Decision(d)) if !blank => {
                    let keeps_open = matches!(kind, LineKind::ChoiceOption(_)) && line.indent >= d.indent;
                    if keeps_open {
                        return Ok(());
                    }
                    self.close_decision()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn finish(mut self) -> Result<Document, ParseError> {
        loop {
            match self.frames.last() {
                Some(Frame::Dialogue(_)) => self.close_dialogue(),
                Some(Frame::Option(_)) => self.close_option(),
                Some(Frame::Decision(_)) => self.close_decision()?,
                Some(Frame::Frontmatter(fm)) => {
                    return Err(ParseError::new(
                        fm.opened_at,
                        ParseErrorKind::UnterminatedFrontmatter {
                            opened_at: fm.opened_at,
                        },
                    ))
                }
                Some(Frame::Conditional(c)) => {
                    return Err(ParseError::new(
                        c.opened_at,
                        ParseErrorKind::UnterminatedBlock {
                            opened: c.opened.clone(),
                            expected: "(END)",
                        },
                    ))
                }
                Some(Frame::Loop(l)) => {
                    return Err(ParseError::new(
                        l.opened_at,
                        ParseErrorKind::UnterminatedBlock {
                            opened: l.opened.clone(),
                            expected: "(END)",
                        },
                    ))
                }
                None => return Ok(Document::new(self.root)),
            }
        }
    }

    fn check_heading(&self, line: &Line<'_>, heading: &str) -> Result<(), ParseError> {
        let open = self.frames.iter().rev().find_map(|f| match f {
            Frame::Conditional(c) => Some(c.opened_at),
            Frame::Loop(l) => Some(l.opened_at),
            _ => None,
        });
        match open {
            Some(opened_at) => Err(ParseError::new(
                line.number,
                ParseErrorKind::HeadingInsideBlock {
                    heading: heading.to_string(),
                    opened_at,
                },
            )),
            None => Ok(()),
        }
    }

    fn handle_control(&mut self, line: &Line<'_>, control: Control<'_>) -> Result<(), ParseError> {
        match control {
            Control::If(condition) => {
                self.frames.push(Frame::Conditional(ConditionalFrame {
                    opened_at: line.number,
                    opened: line.text.to_string(),
                    branches: Vec::new(),
                    kind: BranchKind::If,
                    condition: Some(Expr::parse(condition)),
                    body: Vec::new(),
                }));
                Ok(())
            }
            Control::Loop(condition) => {
                self.frames.push(Frame::Loop(LoopFrame {
                    opened_at: line.number,
                    opened: line.text.to_string(),
                    condition: Expr::parse(condition),
                    body: Vec::new(),
                }));
                Ok(())
            }
            Control::Elif(_) | Control::Else => {
                let Some(Frame::Conditional(c)) = self.frames.last_mut() else {
                    return Err(self.misplaced(line, control));
                };
                if c.kind == BranchKind::Else {
                    let kind = match control {
                        Control::Else => ParseErrorKind::DuplicateElse {
                            opened_at: c.opened_at,
                        },
                        _ => ParseErrorKind::ElifAfterElse {
                            opened_at: c.opened_at,
                        },
                    };
                    return Err(ParseError::new(line.number, kind));
                }
                let (kind, condition) = match control {
                    Control::Elif(condition) => (BranchKind::Elif, Some(Expr::parse(condition))),
                    _ => (BranchKind::Else, None),
                };
                let finished = Branch {
                    kind: std::mem::replace(&mut c.kind, kind),
                    condition: std::mem::replace(&mut c.condition, condition),
                    body: std::mem::take(&mut c.body),
                };
                c.branches.push(finished);
                Ok(())
            }
            Control::End => match self.frames.pop() {
                Some(Frame::Conditional(mut c)) => {
                    c.branches.push(Branch {
                        kind: c.kind,
                        condition: c.condition,
                        body: c.body,
                    });
                    self.emit(Node::Conditional(Conditional {
                        branches: c.branches,
                    }));
                    Ok(())
                }
                Some(Frame::Loop(l)) => {
                    self.emit(Node::Loop(Loop {
                        condition: l.condition,
                        body: l.body,
                    }));
                    Ok(())
                }
                Some(other) => {
                    self.frames.push(other);
                    Err(self.misplaced(line, control))
                }
                None => Err(self.misplaced(line, control)),
            },
        }
    }

    fn misplaced(&self, line: &Line<'_>, control: Control<'_>) -> ParseError {
        let found = control.keyword().to_string();
        let kind = match self.frames.last() {
            Some(Frame::Loop(_)) => ParseErrorKind::MismatchedKeyword {
                found,
                expected: "(END)",
            },
            _ => ParseErrorKind::UnexpectedKeyword { found },
        };
        ParseError::new(line.number, kind)
    }

    fn handle_option(&mut self, line: &Line<'_>, option: OptionLine<'_>) {
        if !matches!(self.frames.last(), Some(Frame::Decision(_))) {
            debug!(
                "line {}: option without a prompt, opening an unprompted decision",
                line.number
            );
            self.frames.push(Frame::Decision(DecisionFrame {
                opened_at: line.number,
                indent: line.indent,
                prompt: String::new(),
                options: Vec::new(),
            }));
        }

        match option.target {
            Some(target) => {
                if let Some(Frame::Decision(d)) = self.frames.last_mut() {
                    d.options.push(ChoiceOption {
                        label: option.label.to_string(),
                        description: option.description.map(str::to_string),
                        body: Vec::new(),
                        target: Some(target.to_string()),
                    });
                }
            }
            None => self.frames.push(Frame::Option(OptionFrame {
                indent: line.indent,
                label: option.label.to_string(),
                description: option.description.map(str::to_string),
                body: Vec::new(),
            })),
        }
    }

    fn flush_dialogue(&mut self) {
        let node = match self.frames.last_mut() {
            Some(Frame::Dialogue(d)) if !d.text.is_empty() => {
                d.emitted = true;
                Node::Dialogue(Dialogue {
                    speaker: d.speaker.clone(),
                    text: std::mem::take(&mut d.text),
                })
            }
            Some(Frame::Dialogue(d)) => {
                d.emitted = true;
                return;
            }
            _ => return,
        };
        self.emit(node);
    }

    fn close_dialogue(&mut self) {
        if let Some(Frame::Dialogue(d)) = self.frames.pop() {
            if !d.text.is_empty() || !d.emitted {
                self.emit(Node::Dialogue(Dialogue {
                    speaker: d.speaker,
                    text: d.text,
                }));
            }
        }
    }

    fn close_option(&mut self) {
        if let Some(Frame::Option(o)) = self.frames.pop() {
            if let Some(Frame::Decision(d)) = self.frames.last_mut() {
                d.options.push(ChoiceOption {
                    label: o.label,
                    description: o.description,
                    body: o.body,
                    target: None,
                });
            }
        }
    }

    fn close_decision(&mut self) -> Result<(), ParseError> {
        if let Some(Frame::Decision(d)) = self.frames.pop() {
            if d.options.is_empty() {
                return Err(ParseError::new(
                    d.opened_at,
                    ParseErrorKind::EmptyDecision { prompt: d.prompt },
                ));
            }
            self.emit(Node::Decision(Decision {
                prompt: d.prompt,
                options: d.options,
            }));
        }
        Ok(())
    }

    /// Appends to the innermost open body, or the document root.
    fn emit(&mut self, node: Node) {
        for frame in self.frames.iter_mut().rev() {
            match frame {
                Frame::Conditional(c) => return c.body.push(node),
                Frame::Loop(l) => return l.body.push(node),
                Frame::Option(o) => return o.body.push(node),
                Frame::Frontmatter(_) | Frame::Decision(_) | Frame::Dialogue(_) => {}
            }
        }
        self.root.push(node);
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn split_asset_args(args: &str) -> Vec<String> {
    args.split(',')
        .map(|a| unquote(a).to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Vec<Node> {
        let _ = pretty_env_logger::try_init();
        parse(input).unwrap().nodes
    }

    fn parse_err(input: &str) -> ParseError {
        let _ = pretty_env_logger::try_init();
        parse(input).unwrap_err()
    }

    #[test]
    fn test_frontmatter_groups_and_quotes() {
        let nodes = parse_ok(
            "$ gold: 10\n$$ player\n    $ hp: 20\n    $ name: \"Ayla\"\n$ flags.met: false\n===\n\nThe road is quiet.\n",
        );
        let Node::StateBlock(block) = &nodes[0] else {
            panic!("expected state block, got {:?}", nodes[0]);
        };
        let paths: Vec<String> = block.entries.iter().map(|e| e.path.join(".")).collect();
        assert_eq!(paths, vec!["gold", "player.hp", "player.name", "flags.met"]);
        assert_eq!(block.entries[2].value, "Ayla");
        assert_eq!(
            nodes[1],
            Node::Action {
                text: "The road is quiet.".to_string()
            }
        );
    }

    #[test]
    fn test_frontmatter_errors() {
        let err = parse_err("$ gold: 10\nThe road is quiet.\n");
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, ParseErrorKind::MalformedFrontmatter { .. }));

        let err = parse_err("\n$ gold: 10\n$ hp: 3\n");
        assert_eq!(
            err,
            ParseError::new(2, ParseErrorKind::UnterminatedFrontmatter { opened_at: 2 })
        );

        let err = parse_err("$ gold\n===\n");
        assert!(matches!(err.kind, ParseErrorKind::MalformedFrontmatter { .. }));
    }

    #[test]
    fn test_stray_delimiter_is_raw() {
        let nodes = parse_ok("Before.\n===\nAfter.\n");
        assert_eq!(
            nodes[1],
            Node::Raw {
                text: "===".to_string()
            }
        );
    }

    #[test]
    fn test_inline_jump_is_single_node() {
        let nodes = parse_ok("The door slams shut -> #GAME_OVER\n");
        assert_eq!(
            nodes,
            vec![Node::Jump(Jump {
                display: Some("The door slams shut".to_string()),
                target: "GAME_OVER".to_string(),
            })]
        );
    }

    #[test]
    fn test_conditional_branches() {
        let nodes = parse_ok(
            "(IF: player.hp <= 0)\nYou fall.\n(ELIF: player.hp < 5)\nYou stagger.\n(ELSE)\nYou stand.\n(END)\n",
        );
        let Node::Conditional(c) = &nodes[0] else {
            panic!("expected conditional");
        };
        let kinds: Vec<BranchKind> = c.branches.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BranchKind::If, BranchKind::Elif, BranchKind::Else]);
        assert_eq!(
            c.branches[0].condition.as_ref().map(|e| e.text.as_str()),
            Some("player.hp <= 0")
        );
        assert!(c.branches[2].condition.is_none());
        assert_eq!(c.branches[1].body.len(), 1);
    }

    #[test]
    fn test_unterminated_if_reports_opening_line() {
        let err = parse_err("Intro.\n\n(IF: x > 1)\nInside.\n(LOOP: y < 2)\n~ y++\n(END)\n");
        assert_eq!(err.line, 3);
        assert!(matches!(
            err.kind,
            ParseErrorKind::UnterminatedBlock {
                expected: "(END)",
                ..
            }
        ));
    }

    #[test]
    fn test_keyword_errors() {
        assert_eq!(
            parse_err("Text.\n(END)\n"),
            ParseError::new(
                2,
                ParseErrorKind::UnexpectedKeyword {
                    found: "(END)".to_string()
                }
            )
        );
        assert_eq!(
            parse_err("(LOOP: i < 3)\n(ELSE)\n(END)\n"),
            ParseError::new(
                2,
                ParseErrorKind::MismatchedKeyword {
                    found: "(ELSE)".to_string(),
                    expected: "(END)"
                }
            )
        );
        assert_eq!(
            parse_err("(IF: a)\n(ELSE)\n(ELSE)\n(END)\n"),
            ParseError::new(3, ParseErrorKind::DuplicateElse { opened_at: 1 })
        );
        assert_eq!(
            parse_err("(IF: a)\n(ELSE)\n(ELIF: b)\n(END)\n"),
            ParseError::new(3, ParseErrorKind::ElifAfterElse { opened_at: 1 })
        );
    }

    #[test]
    fn test_heading_inside_block() {
        let err = parse_err("(IF: a)\n\n# Fight\n(END)\n");
        assert_eq!(err.line, 3);
        assert!(matches!(
            err.kind,
            ParseErrorKind::HeadingInsideBlock { opened_at: 1, .. }
        ));
    }

    #[test]
    fn test_decision_with_described_options() {
        let nodes = parse_ok(
            "? What do you do?\n+ [Fight] Draw your sword. -> #Fight\n+ [Flee] Run for the trees. -> #Flee\n\n# Fight\n",
        );
        let Node::Decision(d) = &nodes[0] else {
            panic!("expected decision");
        };
        assert_eq!(d.prompt, "What do you do?");
        assert_eq!(d.options.len(), 2);
        assert_eq!(d.options[0].description.as_deref(), Some("Draw your sword."));
        assert_eq!(d.options[1].target.as_deref(), Some("Flee"));
        assert_eq!(
            nodes[1],
            Node::SectionHeading {
                label: "Fight".to_string()
            }
        );
    }

    #[test]
    fn test_option_bodies_by_indentation() {
        let nodes = parse_ok(
            "? Which way?\n+ [Left]\n    ~ gold += 5\n\n    You find coins.\n+ [Right]\n    Nothing here.\nThe path ends.\n",
        );
        let Node::Decision(d) = &nodes[0] else {
            panic!("expected decision");
        };
        assert_eq!(d.options[0].body.len(), 2);
        assert!(matches!(d.options[0].body[0], Node::StateChange(_)));
        assert_eq!(d.options[1].body.len(), 1);
        assert_eq!(
            nodes[1],
            Node::Action {
                text: "The path ends.".to_string()
            }
        );
    }

    #[test]
    fn test_caps_lines_inside_blocks_stay_content() {
        let nodes = parse_ok("(IF: player.hp <= 0)\n    GAME OVER\n\n    -> #Start\n(END)\n");
        let Node::Conditional(c) = &nodes[0] else {
            panic!("expected conditional, got {:?}", nodes[0]);
        };
        assert_eq!(
            c.branches[0].body,
            vec![
                Node::Action {
                    text: "GAME OVER".to_string()
                },
                Node::Jump(Jump {
                    display: None,
                    target: "Start".to_string(),
                }),
            ]
        );

        let nodes = parse_ok("? Now?\n+ [Yell]\n    AAARGH\n\n    You feel better.\n+ [Wait] -> #W\n");
        assert_eq!(nodes.len(), 1, "{nodes:?}");
        let Node::Decision(d) = &nodes[0] else {
            panic!("expected decision");
        };
        assert_eq!(d.prompt, "Now?");
        assert_eq!(d.options.len(), 2);
        assert_eq!(
            d.options[0].body,
            vec![
                Node::Action {
                    text: "AAARGH".to_string()
                },
                Node::Action {
                    text: "You feel better.".to_string()
                },
            ]
        );
        assert_eq!(d.options[1].target.as_deref(), Some("W"));
    }

    #[test]
    fn test_bare_scene_after_decision() {
        let nodes = parse_ok("? Now?\n+ [Wait] -> #W\n\nTHE CAVE\n\nDrip.\n");
        assert!(matches!(nodes[0], Node::Decision(_)));
        assert_eq!(
            nodes[1],
            Node::SceneHeading {
                text: "THE CAVE".to_string()
            }
        );
    }

    #[test]
    fn test_caps_speech_after_cue() {
        let nodes = parse_ok("GUARD\nHALT\nWho goes there?\n");
        assert_eq!(
            nodes,
            vec![Node::Dialogue(Dialogue {
                speaker: "GUARD".to_string(),
                text: "HALT Who goes there?".to_string(),
            })]
        );
    }

    #[test]
    fn test_option_without_prompt_synthesises_decision() {
        let nodes = parse_ok("+ [Wait] -> #Wait\n+ [Go] -> #Go\n");
        let Node::Decision(d) = &nodes[0] else {
            panic!("expected decision");
        };
        assert_eq!(d.prompt, "");
        assert_eq!(d.options.len(), 2);
    }

    #[test]
    fn test_empty_decision_fails_at_prompt() {
        let err = parse_err("Intro.\n? Now what?\nNothing.\n");
        assert_eq!(
            err,
            ParseError::new(
                2,
                ParseErrorKind::EmptyDecision {
                    prompt: "Now what?".to_string()
                }
            )
        );
    }

    #[test]
    fn test_decision_closes_before_end() {
        let nodes = parse_ok("(IF: ready)\n? Go?\n+ [Yes] -> #Yes\n(END)\n");
        let Node::Conditional(c) = &nodes[0] else {
            panic!("expected conditional");
        };
        assert!(matches!(c.branches[0].body[0], Node::Decision(_)));
    }

    #[test]
    fn test_dialogue_with_parenthetical() {
        let nodes = parse_ok("GOBLIN\nYou shall\nnot pass.\n(grinning)\nUnless you pay.\n\nHe waits.\n");
        assert_eq!(
            nodes,
            vec![
                Node::Dialogue(Dialogue {
                    speaker: "GOBLIN".to_string(),
                    text: "You shall not pass.".to_string(),
                }),
                Node::Parenthetical {
                    text: "grinning".to_string()
                },
                Node::Dialogue(Dialogue {
                    speaker: "GOBLIN".to_string(),
                    text: "Unless you pay.".to_string(),
                }),
                Node::Action {
                    text: "He waits.".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_state_changes_assets_and_passthrough() {
        let nodes = parse_ok("~ $player.hp -= 5\n~ _tmp = 1\n~ nonsense\n! MUSIC: battle.ogg, loop\n! DANCE: now\n");
        let Node::StateChange(s) = &nodes[0] else {
            panic!("expected state change");
        };
        assert_eq!(s.op, AssignOp::SubAssign);
        assert!(s.target.had_dollar);
        assert_eq!(s.expr.text, "5");
        let Node::StateChange(local) = &nodes[1] else {
            panic!("expected state change");
        };
        assert!(local.is_local);
        assert!(matches!(nodes[2], Node::Raw { .. }));
        assert_eq!(
            nodes[3],
            Node::AssetDirective(AssetDirective {
                kind: AssetKind::Music,
                args: vec!["battle.ogg".to_string(), "loop".to_string()],
            })
        );
        assert!(matches!(nodes[4], Node::Raw { .. }));
    }

    #[test]
    fn test_scene_and_inline_choices() {
        let nodes = parse_ok("INT. FOREST - NIGHT\n\nGo [north|#North] now.\n");
        assert_eq!(
            nodes,
            vec![
                Node::SceneHeading {
                    text: "INT. FOREST - NIGHT".to_string()
                },
                Node::Action {
                    text: "Go".to_string()
                },
                Node::InlineChoice(InlineChoice {
                    label: "north".to_string(),
                    target: "North".to_string(),
                }),
                Node::Action {
                    text: "now.".to_string()
                },
            ]
        );
    }
}
