//! Template parsing.
//!
//! Runs in two passes. [`scan`] splits the source into text and `{{ }}`
//! actions and lexes each action; [`TreeParser`] then builds the node tree,
//! pairing control actions with their `{{else}}` and `{{end}}` and
//! collecting `{{define}}` bodies.

use std::collections::HashMap;

use serde_json::{Number, Value};

use crate::error::TemplateError;

/// Functions callable from actions.
pub(crate) const FUNCTIONS: &[&str] = &[
    "and", "eq", "ge", "gt", "index", "le", "len", "lt", "ne", "not", "or", "print", "printf",
    "println", "slice", "toJson",
];

const KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "define", "template", "block", "break", "continue",
];

/// A parsed template: the main body plus every named template it defines.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Tree {
    pub root: Vec<Node>,
    pub defines: HashMap<String, Vec<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action {
        line: usize,
        source: String,
        pipeline: Pipeline,
    },
    If(Branch),
    With(Branch),
    Range(Branch),
    Template {
        line: usize,
        source: String,
        name: String,
        pipeline: Option<Pipeline>,
    },
    Break,
    Continue,
}

/// `{{if}}`, `{{with}}` or `{{range}}` with its body and `{{else}}` part.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Branch {
    pub line: usize,
    pub source: String,
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub otherwise: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    /// Variables declared (`:=`) or assigned (`=`) by this pipeline.
    pub decl: Vec<String>,
    pub is_assign: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    /// `.`
    Dot,
    /// `.a.b`
    Field(Vec<String>),
    /// `$x.a.b`; `$` alone is the data passed to the template
    Variable {
        name: String,
        fields: Vec<String>,
    },
    Function(String),
    Literal(Value),
    /// `( pipeline )`, optionally followed by `.a.b`
    Parenthesized {
        pipeline: Pipeline,
        fields: Vec<String>,
    },
}

pub(crate) fn parse(name: &str, source: &str) -> Result<Tree, TemplateError> {
    let items = scan(name, source)?;
    let mut parser = TreeParser {
        name,
        items: items.into_iter(),
        defines: HashMap::new(),
        depth: 0,
        range_depth: 0,
    };
    let (root, stop) = parser.parse_list()?;
    match stop {
        Stop::Eof => Ok(Tree {
            root,
            defines: parser.defines,
        }),
        Stop::End(line) => Err(parse_error(name, line, "unexpected {{end}}")),
        Stop::Else(action) => Err(parse_error(name, action.line, "unexpected {{else}}")),
    }
}

fn parse_error(name: &str, line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Parse {
        name: name.to_string(),
        line,
        message: message.into(),
    }
}

// ============================================================================
// Scanning
// ============================================================================

#[derive(Debug)]
struct Action {
    line: usize,
    source: String,
    tokens: Vec<Token>,
}

#[derive(Debug)]
enum Item {
    Text(String),
    Action(Action),
}

fn scan(name: &str, source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let trim_left = has_left_trim(after_open);

        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        if trim_left {
            text = text.trim_end();
        }
        push_text(&mut items, text);
        line += rest[..open].matches('\n').count();
        let action_line = line;

        let close = find_action_close(after_open)
            .ok_or_else(|| parse_error(name, action_line, "unclosed action"))?;
        let mut inner = &after_open[..close];
        let trim_right = has_right_trim(inner);
        if trim_left {
            inner = &inner[1..];
        }
        if trim_right {
            inner = &inner[..inner.len() - 1];
        }
        line += after_open[..close].matches('\n').count();
        rest = &after_open[close + 2..];
        trim_next = trim_right;

        let inner = inner.trim();
        if let Some(comment) = inner.strip_prefix("/*") {
            if !comment.ends_with("*/") {
                return Err(parse_error(name, action_line, "unclosed comment"));
            }
            continue;
        }

        let tokens = lex(inner).map_err(|message| parse_error(name, action_line, message))?;
        items.push(Item::Action(Action {
            line: action_line,
            source: inner.to_string(),
            tokens,
        }));
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    push_text(&mut items, text);
    Ok(items)
}

fn push_text(items: &mut Vec<Item>, text: &str) {
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
}

/// `{{- ` trims preceding whitespace; `{{-3}}` is a negative number.
fn has_left_trim(after_open: &str) -> bool {
    let mut chars = after_open.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn has_right_trim(inner: &str) -> bool {
    let mut chars = inner.chars().rev();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

/// Byte offset of the `}}` closing the action that starts `after_open`.
///
/// Quoted strings, raw strings and character constants may contain `}}`.
/// Comments run to the first `*/`.
fn find_action_close(after_open: &str) -> Option<usize> {
    let body = if has_left_trim(after_open) {
        after_open[1..].trim_start()
    } else {
        after_open
    };
    let offset = after_open.len() - body.len();
    if body.starts_with("/*") {
        let comment_end = offset + body.find("*/")? + 2;
        return after_open[comment_end..]
            .find("}}")
            .map(|at| comment_end + at);
    }

    let bytes = after_open.as_bytes();
    let mut quote: Option<u8> = None;
    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        match quote {
            Some(b'`') if b == b'`' => quote = None,
            Some(b'`') => {}
            Some(_) if b == b'\\' => pos += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if matches!(b, b'"' | b'\'' | b'`') => quote = Some(b),
            None if b == b'}' && bytes.get(pos + 1) == Some(&b'}') => return Some(pos),
            None => {}
        }
        pos += 1;
    }
    None
}

// ============================================================================
// Tree building
// ============================================================================

/// Why a list of nodes ended.
enum Stop {
    Eof,
    End(usize),
    Else(Action),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    If,
    With,
    Range,
}

impl BranchKind {
    fn keyword(self) -> &'static str {
        match self {
            BranchKind::If => "if",
            BranchKind::With => "with",
            BranchKind::Range => "range",
        }
    }

    fn node(self, branch: Branch) -> Node {
        match self {
            BranchKind::If => Node::If(branch),
            BranchKind::With => Node::With(branch),
            BranchKind::Range => Node::Range(branch),
        }
    }
}

struct TreeParser<'a> {
    name: &'a str,
    items: std::vec::IntoIter<Item>,
    defines: HashMap<String, Vec<Node>>,
    depth: usize,
    range_depth: usize,
}

impl TreeParser<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> TemplateError {
        parse_error(self.name, line, message)
    }

    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();

        while let Some(item) = self.items.next() {
            let action = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action(action) => action,
            };
            let keyword = match action.tokens.first() {
                Some(Token::Ident(word)) if KEYWORDS.contains(&word.as_str()) => Some(word.clone()),
                _ => None,
            };

            match keyword.as_deref() {
                None => {
                    let pipeline = ActionParser::new(self.name, action.line, &action.tokens)
                        .parse_full(DeclMode::Single)?;
                    nodes.push(Node::Action {
                        line: action.line,
                        source: action.source,
                        pipeline,
                    });
                }
                Some("end") => {
                    self.expect_bare(&action)?;
                    return Ok((nodes, Stop::End(action.line)));
                }
                Some("else") => return Ok((nodes, Stop::Else(action))),
                Some("if") => nodes.push(self.parse_branch(action, BranchKind::If)?),
                Some("with") => nodes.push(self.parse_branch(action, BranchKind::With)?),
                Some("range") => nodes.push(self.parse_branch(action, BranchKind::Range)?),
                Some(word @ ("break" | "continue")) => {
                    self.expect_bare(&action)?;
                    if self.range_depth == 0 {
                        return Err(self.error(action.line, format!("{{{{{word}}}}} outside {{{{range}}}}")));
                    }
                    nodes.push(if word == "break" {
                        Node::Break
                    } else {
                        Node::Continue
                    });
                }
                Some("define") => self.parse_define(action)?,
                Some("template") => nodes.push(self.parse_template(action)?),
                Some("block") => nodes.push(self.parse_block(action)?),
                Some(other) => {
                    return Err(self.error(action.line, format!("unexpected keyword {other:?}")));
                }
            }
        }

        Ok((nodes, Stop::Eof))
    }

    fn expect_bare(&self, action: &Action) -> Result<(), TemplateError> {
        if action.tokens.len() > 1 {
            return Err(self.error(
                action.line,
                format!("unexpected tokens in {:?}", action.source),
            ));
        }
        Ok(())
    }

    /// Parses a body up to its `{{end}}`, rejecting `{{else}}`.
    fn parse_body_to_end(&mut self, line: usize, context: &str) -> Result<Vec<Node>, TemplateError> {
        let (nodes, stop) = self.parse_list()?;
        match stop {
            Stop::End(_) => Ok(nodes),
            Stop::Else(action) => Err(self.error(
                action.line,
                format!("expected end; found {{{{else}}}} in {context}"),
            )),
            Stop::Eof => Err(self.error(line, format!("unexpected EOF in {context}"))),
        }
    }

    fn parse_branch(&mut self, action: Action, kind: BranchKind) -> Result<Node, TemplateError> {
        let mode = match kind {
            BranchKind::Range => DeclMode::Range,
            _ => DeclMode::Single,
        };
        let pipeline =
            ActionParser::new(self.name, action.line, &action.tokens[1..]).parse_full(mode)?;

        self.depth += 1;
        if kind == BranchKind::Range {
            self.range_depth += 1;
        }
        let body = self.parse_list();
        if kind == BranchKind::Range {
            self.range_depth -= 1;
        }
        let (body, stop) = body?;

        let otherwise = match stop {
            Stop::End(_) => Vec::new(),
            Stop::Else(else_action) => self.parse_else(else_action, kind)?,
            Stop::Eof => {
                return Err(self.error(
                    action.line,
                    format!("unexpected EOF in {}", kind.keyword()),
                ));
            }
        };
        self.depth -= 1;

        Ok(kind.node(Branch {
            line: action.line,
            source: action.source,
            pipeline,
            body,
            otherwise,
        }))
    }

    fn parse_else(&mut self, action: Action, kind: BranchKind) -> Result<Vec<Node>, TemplateError> {
        match action.tokens.get(1) {
            None => self.parse_body_to_end(action.line, kind.keyword()),
            // `{{else if ..}}` and `{{else with ..}}` share the enclosing `{{end}}`.
            Some(Token::Ident(word)) if kind != BranchKind::Range && word == kind.keyword() => {
                let chained = Action {
                    line: action.line,
                    source: action.source.trim_start_matches("else").trim().to_string(),
                    tokens: action.tokens[1..].to_vec(),
                };
                Ok(vec![self.parse_branch(chained, kind)?])
            }
            Some(_) => Err(self.error(
                action.line,
                format!("unexpected tokens in {:?}", action.source),
            )),
        }
    }

    fn template_name(&self, action: &Action) -> Result<String, TemplateError> {
        match action.tokens.get(1) {
            Some(Token::Literal(Value::String(name))) => Ok(name.clone()),
            _ => Err(self.error(
                action.line,
                format!("expected quoted template name in {:?}", action.source),
            )),
        }
    }

    fn parse_define(&mut self, action: Action) -> Result<(), TemplateError> {
        if self.depth > 0 {
            return Err(self.error(action.line, "{{define}} is only allowed at the top level"));
        }
        let name = self.template_name(&action)?;
        if action.tokens.len() > 2 {
            return Err(self.error(
                action.line,
                format!("unexpected tokens in {:?}", action.source),
            ));
        }
        let body = self.parse_named_body(action.line, "define")?;
        self.defines.insert(name, body);
        Ok(())
    }

    /// Body of a named template; `{{break}}` cannot reach an enclosing range.
    fn parse_named_body(&mut self, line: usize, context: &str) -> Result<Vec<Node>, TemplateError> {
        let range_depth = std::mem::take(&mut self.range_depth);
        self.depth += 1;
        let body = self.parse_body_to_end(line, context);
        self.depth -= 1;
        self.range_depth = range_depth;
        body
    }

    fn parse_template(&mut self, action: Action) -> Result<Node, TemplateError> {
        let name = self.template_name(&action)?;
        let pipeline = if action.tokens.len() > 2 {
            Some(
                ActionParser::new(self.name, action.line, &action.tokens[2..])
                    .parse_full(DeclMode::None)?,
            )
        } else {
            None
        };
        Ok(Node::Template {
            line: action.line,
            source: action.source,
            name,
            pipeline,
        })
    }

    /// `{{block "name" pipeline}}body{{end}}` defines `name` and invokes it.
    fn parse_block(&mut self, action: Action) -> Result<Node, TemplateError> {
        let name = self.template_name(&action)?;
        if action.tokens.len() <= 2 {
            return Err(self.error(action.line, "missing pipeline in {{block}}"));
        }
        let pipeline = ActionParser::new(self.name, action.line, &action.tokens[2..])
            .parse_full(DeclMode::None)?;
        let body = self.parse_named_body(action.line, "block")?;
        self.defines.insert(name.clone(), body);
        Ok(Node::Template {
            line: action.line,
            source: action.source,
            name,
            pipeline: Some(pipeline),
        })
    }
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Field(Vec<String>),
    /// Field chain directly after `)`
    Chain(Vec<String>),
    Variable {
        name: String,
        fields: Vec<String>,
    },
    Ident(String),
    Literal(Value),
    LeftParen,
    RightParen,
    Pipe,
    Declare,
    Assign,
    Comma,
}

/// Which variable declarations a pipeline may start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclMode {
    None,
    Single,
    /// `$v :=` or `$i, $v :=`
    Range,
}

struct ActionParser<'a> {
    name: &'a str,
    line: usize,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> ActionParser<'a> {
    fn new(name: &'a str, line: usize, tokens: &'a [Token]) -> Self {
        Self {
            name,
            line,
            tokens,
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        parse_error(self.name, self.line, message)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_full(mut self, mode: DeclMode) -> Result<Pipeline, TemplateError> {
        let (decl, is_assign) = self.parse_declaration(mode)?;
        let mut pipeline = self.parse_pipeline()?;
        pipeline.decl = decl;
        pipeline.is_assign = is_assign;
        if let Some(token) = self.peek() {
            return Err(self.error(format!("unexpected {token:?} in action")));
        }
        Ok(pipeline)
    }

    fn parse_declaration(&mut self, mode: DeclMode) -> Result<(Vec<String>, bool), TemplateError> {
        if mode == DeclMode::None {
            return Ok((Vec::new(), false));
        }
        let Some(first) = bare_variable(self.tokens, self.pos) else {
            return Ok((Vec::new(), false));
        };
        match self.tokens.get(self.pos + 1) {
            Some(Token::Declare) => {
                self.pos += 2;
                Ok((vec![first], false))
            }
            Some(Token::Assign) => {
                self.pos += 2;
                Ok((vec![first], true))
            }
            Some(Token::Comma) if mode == DeclMode::Range => {
                let second = bare_variable(self.tokens, self.pos + 2)
                    .ok_or_else(|| self.error("expected a second range variable"))?;
                let is_assign = match self.tokens.get(self.pos + 3) {
                    Some(Token::Declare) => false,
                    Some(Token::Assign) => true,
                    _ => return Err(self.error("expected := or = after range variables")),
                };
                self.pos += 4;
                Ok((vec![first, second], is_assign))
            }
            Some(Token::Comma) => Err(self.error("too many declarations")),
            _ => Ok((Vec::new(), false)),
        }
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut commands = vec![self.parse_command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let command = self.parse_command()?;
            if !matches!(command.operands.first(), Some(Operand::Function(_))) {
                return Err(self.error("non-function command in pipeline stage"));
            }
            commands.push(command);
        }
        Ok(Pipeline {
            decl: Vec::new(),
            is_assign: false,
            commands,
        })
    }

    fn parse_command(&mut self) -> Result<Command, TemplateError> {
        let mut operands = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::Pipe | Token::RightParen) {
                break;
            }
            operands.push(self.parse_operand()?);
        }
        if operands.is_empty() {
            return Err(self.error("missing value for command"));
        }
        Ok(Command { operands })
    }

    fn parse_operand(&mut self) -> Result<Operand, TemplateError> {
        match self.next() {
            Some(Token::Dot) => Ok(Operand::Dot),
            Some(Token::Field(path)) => Ok(Operand::Field(path.clone())),
            Some(Token::Variable { name, fields }) => Ok(Operand::Variable {
                name: name.clone(),
                fields: fields.clone(),
            }),
            Some(Token::Literal(value)) => Ok(Operand::Literal(value.clone())),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Operand::Literal(Value::Bool(true))),
                "false" => Ok(Operand::Literal(Value::Bool(false))),
                "nil" => Ok(Operand::Literal(Value::Null)),
                keyword if KEYWORDS.contains(&keyword) => {
                    Err(self.error(format!("unexpected keyword {keyword:?} in command")))
                }
                name if FUNCTIONS.contains(&name) => Ok(Operand::Function(name.to_string())),
                name => Err(self.error(format!("function {name:?} not defined"))),
            },
            Some(Token::LeftParen) => {
                let pipeline = self.parse_pipeline()?;
                if self.next() != Some(&Token::RightParen) {
                    return Err(self.error("unclosed left paren"));
                }
                let fields = match self.peek() {
                    Some(Token::Chain(path)) => {
                        self.pos += 1;
                        path.clone()
                    }
                    _ => Vec::new(),
                };
                Ok(Operand::Parenthesized { pipeline, fields })
            }
            Some(Token::RightParen) => Err(self.error("unexpected right paren")),
            Some(Token::Chain(_)) => Err(self.error("unexpected field chain")),
            Some(Token::Declare | Token::Assign) => Err(self.error("unexpected assignment")),
            Some(Token::Comma) => Err(self.error("unexpected comma")),
            Some(Token::Pipe) | None => Err(self.error("missing value for command")),
        }
    }
}

/// A variable with no field chain at `pos`.
fn bare_variable(tokens: &[Token], pos: usize) -> Option<String> {
    match tokens.get(pos) {
        Some(Token::Variable { name, fields }) if fields.is_empty() => Some(name.clone()),
        _ => None,
    }
}

// ============================================================================
// Lexing
// ============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn lex(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '(' => {
                tokens.push(Token::LeftParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RightParen);
                pos += 1;
                let path = lex_field_chain(&chars, &mut pos);
                if !path.is_empty() {
                    tokens.push(Token::Chain(path));
                }
            }
            '|' => {
                tokens.push(Token::Pipe);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            ':' if chars.get(pos + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                pos += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                pos += 1;
            }
            '.' if chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit()) => {
                let (value, end) = lex_number(&chars, pos)?;
                tokens.push(Token::Literal(value));
                pos = end;
            }
            '.' => {
                let path = lex_field_chain(&chars, &mut pos);
                if path.is_empty() {
                    tokens.push(Token::Dot);
                    pos += 1;
                } else {
                    tokens.push(Token::Field(path));
                }
            }
            '$' => {
                let start = pos;
                pos += 1;
                while pos < chars.len() && is_ident_char(chars[pos]) {
                    pos += 1;
                }
                let name: String = chars[start..pos].iter().collect();
                let fields = lex_field_chain(&chars, &mut pos);
                tokens.push(Token::Variable { name, fields });
            }
            '"' => {
                let (value, end) = lex_quoted(&chars, pos)?;
                tokens.push(Token::Literal(Value::String(value)));
                pos = end;
            }
            '\'' => {
                let (value, end) = lex_char(&chars, pos)?;
                tokens.push(Token::Literal(Value::from(u32::from(value))));
                pos = end;
            }
            '`' => {
                let close = chars[pos + 1..]
                    .iter()
                    .position(|c| *c == '`')
                    .ok_or_else(|| "unterminated raw quoted string".to_string())?;
                let value: String = chars[pos + 1..pos + 1 + close].iter().collect();
                tokens.push(Token::Literal(Value::String(value)));
                pos += close + 2;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let (value, end) = lex_number(&chars, pos)?;
                tokens.push(Token::Literal(value));
                pos = end;
            }
            c if is_ident_char(c) => {
                let start = pos;
                while pos < chars.len() && is_ident_char(chars[pos]) {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            other => return Err(format!("unexpected {other:?} in command")),
        }
    }

    Ok(tokens)
}

/// Reads `.a.b` starting at `pos`; empty if no field follows.
fn lex_field_chain(chars: &[char], pos: &mut usize) -> Vec<String> {
    let mut path = Vec::new();
    while *pos < chars.len()
        && chars[*pos] == '.'
        && chars.get(*pos + 1).is_some_and(|c| is_ident_char(*c))
    {
        let start = *pos + 1;
        *pos = start;
        while *pos < chars.len() && is_ident_char(chars[*pos]) {
            *pos += 1;
        }
        path.push(chars[start..*pos].iter().collect());
    }
    path
}

fn lex_number(chars: &[char], start: usize) -> Result<(Value, usize), String> {
    let mut pos = start;
    if matches!(chars.get(pos), Some('-' | '+')) {
        pos += 1;
    }
    while pos < chars.len()
        && (chars[pos].is_ascii_alphanumeric()
            || chars[pos] == '.'
            || chars[pos] == '_'
            || (matches!(chars[pos], '-' | '+') && matches!(chars[pos - 1], 'e' | 'E')))
    {
        pos += 1;
    }
    let text: String = chars[start..pos].iter().collect::<String>().replace('_', "");
    if let Ok(int) = text.parse::<i64>() {
        return Ok((Value::Number(int.into()), pos));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(|number| (Value::Number(number), pos))
        .ok_or_else(|| format!("bad number syntax: {text:?}"))
}

fn unescape(escaped: char) -> Result<char, String> {
    match escaped {
        'n' => Ok('\n'),
        't' => Ok('\t'),
        'r' => Ok('\r'),
        '\\' => Ok('\\'),
        '"' => Ok('"'),
        '\'' => Ok('\''),
        other => Err(format!("unknown escape sequence \\{other}")),
    }
}

fn lex_quoted(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut value = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        match chars[pos] {
            '"' => return Ok((value, pos + 1)),
            '\\' => {
                let escaped = chars
                    .get(pos + 1)
                    .ok_or_else(|| "unterminated quoted string".to_string())?;
                value.push(unescape(*escaped)?);
                pos += 2;
            }
            c => {
                value.push(c);
                pos += 1;
            }
        }
    }
    Err("unterminated quoted string".to_string())
}

/// `'a'` is the number of its code point.
fn lex_char(chars: &[char], start: usize) -> Result<(char, usize), String> {
    let (value, next) = match chars.get(start + 1) {
        Some('\\') => {
            let escaped = chars
                .get(start + 2)
                .ok_or_else(|| "unterminated character constant".to_string())?;
            (unescape(*escaped)?, start + 3)
        }
        Some(c) if *c != '\'' => (*c, start + 2),
        _ => return Err("empty character constant".to_string()),
    };
    if chars.get(next) != Some(&'\'') {
        return Err("unterminated character constant".to_string());
    }
    Ok((value, next + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(source: &str) -> Pipeline {
        match parse("t", source).unwrap().root.remove(0) {
            Node::Action { pipeline, .. } => pipeline,
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn test_text_and_actions() {
        let nodes = parse("t", "a: {{ .x }}\nb: {{ . }}").unwrap().root;
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0], Node::Text("a: ".into()));
        assert!(matches!(&nodes[3], Node::Action { line: 2, .. }));
    }

    #[test]
    fn test_trim_markers() {
        let nodes = parse("t", "a  {{- .x -}}  \n b").unwrap().root;
        assert_eq!(nodes[0], Node::Text("a".into()));
        assert_eq!(nodes[2], Node::Text("b".into()));
    }

    #[test]
    fn test_negative_number_is_not_trim() {
        let pipeline = action("{{-3}}");
        assert_eq!(
            pipeline.commands[0].operands,
            vec![Operand::Literal(json!(-3))]
        );
    }

    #[test]
    fn test_comment_is_dropped() {
        assert!(parse("t", "{{/* note }} */}}").unwrap().root.is_empty());
        assert!(parse("t", "{{- /* note */ -}}").unwrap().root.is_empty());
    }

    #[test]
    fn test_close_delimiter_inside_quotes() {
        let pipeline = action("{{ \"a}}b\" }}");
        assert_eq!(
            pipeline.commands[0].operands,
            vec![Operand::Literal(json!("a}}b"))]
        );
        let pipeline = action("{{ `x}}` }}");
        assert_eq!(
            pipeline.commands[0].operands,
            vec![Operand::Literal(json!("x}}"))]
        );
        assert_eq!(
            action("{{ '}' }}").commands[0].operands,
            vec![Operand::Literal(json!(125))]
        );
    }

    #[test]
    fn test_function_call_with_nested_pipeline() {
        let pipeline = action("{{ index (index . 0) \"key\" | toJson }}");
        assert_eq!(pipeline.commands.len(), 2);
        let first = &pipeline.commands[0].operands;
        assert_eq!(first[0], Operand::Function("index".into()));
        assert!(matches!(first[1], Operand::Parenthesized { .. }));
        assert_eq!(first[2], Operand::Literal(json!("key")));
    }

    #[test]
    fn test_field_chain_after_paren() {
        let pipeline = action("{{ (index . 0).data.replicas }}");
        match &pipeline.commands[0].operands[0] {
            Operand::Parenthesized { fields, .. } => {
                assert_eq!(fields, &vec!["data".to_string(), "replicas".to_string()]);
            }
            other => panic!("expected parenthesized operand, got {other:?}"),
        }
    }

    #[test]
    fn test_variables() {
        let pipeline = action("{{ $x := index . 0 }}");
        assert_eq!(pipeline.decl, vec!["$x".to_string()]);
        assert!(!pipeline.is_assign);

        let pipeline = action("{{ $x = 1 }}");
        assert!(pipeline.is_assign);

        let pipeline = action("{{ $.spec.name }}");
        assert_eq!(
            pipeline.commands[0].operands,
            vec![Operand::Variable {
                name: "$".into(),
                fields: vec!["spec".into(), "name".into()]
            }]
        );
    }

    #[test]
    fn test_range_declares_key_and_value() {
        let tree = parse("t", "{{ range $k, $v := . }}{{ $k }}{{ else }}none{{ end }}").unwrap();
        match &tree.root[0] {
            Node::Range(branch) => {
                assert_eq!(branch.pipeline.decl, vec!["$k".to_string(), "$v".to_string()]);
                assert_eq!(branch.body.len(), 1);
                assert_eq!(branch.otherwise, vec![Node::Text("none".into())]);
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn test_else_if_chain_shares_end() {
        let tree = parse("t", "{{ if .a }}a{{ else if .b }}b{{ else }}c{{ end }}tail").unwrap();
        assert_eq!(tree.root.len(), 2);
        let Node::If(outer) = &tree.root[0] else {
            panic!("expected if");
        };
        let [Node::If(inner)] = outer.otherwise.as_slice() else {
            panic!("expected chained if, got {:?}", outer.otherwise);
        };
        assert_eq!(inner.source, "if .b");
        assert_eq!(inner.otherwise, vec![Node::Text("c".into())]);
    }

    #[test]
    fn test_define_and_template() {
        let tree = parse(
            "t",
            "{{ define \"item\" }}- {{ . }}{{ end }}{{ template \"item\" .x }}{{ block \"b\" . }}B{{ end }}",
        )
        .unwrap();
        assert!(tree.defines.contains_key("item"));
        assert!(tree.defines.contains_key("b"));
        assert_eq!(tree.root.len(), 2);
        assert!(matches!(&tree.root[0], Node::Template { name, pipeline: Some(_), .. } if name == "item"));
    }

    #[test]
    fn test_parse_errors() {
        for source in [
            "{{ index . 0",
            "{{ nope . }}",
            "{{ }}",
            "{{ (index . 0 }}",
            "{{ \"open }}",
            "{{ if . }}x",
            "{{ end }}",
            "{{ else }}",
            "{{ if . }}a{{ else }}b{{ else }}c{{ end }}",
            "{{ range . }}{{ else if . }}{{ end }}",
            "{{ break }}",
            "{{ range . }}{{ else }}{{ break }}{{ end }}",
            "{{ if . }}{{ define \"x\" }}{{ end }}{{ end }}",
            "{{ template x }}",
            "{{ $a, $b := . }}",
            "{{ if }}{{ end }}",
            "{{ index . 'ab' }}",
            "{{ range . }}{{ block \"b\" . }}{{ break }}{{ end }}{{ end }}",
        ] {
            assert!(parse("t", source).is_err(), "{source:?} should not parse");
        }
    }
}
