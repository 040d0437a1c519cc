//! Template execution against a structured data value.

use std::cmp::Ordering;

use serde_json::Value;

use super::parse::{Branch, Command, Node, Operand, Pipeline, Tree};
use crate::error::TemplateError;

type ExecResult = Result<Value, String>;

/// Nesting limit for `{{template}}` calls.
const MAX_TEMPLATE_DEPTH: usize = 100;

pub(crate) fn render(name: &str, tree: &Tree, data: &Value) -> Result<String, TemplateError> {
    let mut state = State {
        tree,
        name: name.to_string(),
        vars: vec![("$".to_string(), data.clone())],
        out: String::new(),
        depth: 0,
    };
    state.walk_list(&tree.root, data)?;
    Ok(state.out)
}

/// What the enclosing `{{range}}` should do after a list of nodes ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

struct State<'a> {
    tree: &'a Tree,
    /// Template currently executing, for error messages.
    name: String,
    /// Variable stack; inner scopes truncate back to their mark on exit.
    vars: Vec<(String, Value)>,
    out: String,
    depth: usize,
}

impl State<'_> {
    fn fail(&self, line: usize, source: &str, message: String) -> TemplateError {
        TemplateError::Execute {
            name: self.name.clone(),
            line,
            action: source.to_string(),
            message,
        }
    }

    fn walk_list(&mut self, nodes: &[Node], dot: &Value) -> Result<Flow, TemplateError> {
        for node in nodes {
            let flow = self.walk(node, dot)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn walk(&mut self, node: &Node, dot: &Value) -> Result<Flow, TemplateError> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Action {
                line,
                source,
                pipeline,
            } => {
                let value = self
                    .eval_pipeline(pipeline, dot)
                    .map_err(|message| self.fail(*line, source, message))?;
                if pipeline.decl.is_empty() {
                    match value {
                        Value::Null => self.out.push_str("<no value>"),
                        other => self.out.push_str(&format_value(&other)),
                    }
                }
            }
            Node::If(branch) => return self.walk_conditional(branch, dot, false),
            Node::With(branch) => return self.walk_conditional(branch, dot, true),
            Node::Range(branch) => return self.walk_range(branch, dot),
            Node::Template {
                line,
                source,
                name,
                pipeline,
            } => self.walk_template(*line, source, name, pipeline.as_ref(), dot)?,
            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    /// `{{if}}` and `{{with}}`; `with` also rebinds the dot.
    fn walk_conditional(
        &mut self,
        branch: &Branch,
        dot: &Value,
        rebind: bool,
    ) -> Result<Flow, TemplateError> {
        let mark = self.vars.len();
        let value = self
            .eval_pipeline(&branch.pipeline, dot)
            .map_err(|message| self.fail(branch.line, &branch.source, message))?;
        let flow = if !truth(&value) {
            self.walk_list(&branch.otherwise, dot)
        } else if rebind {
            self.walk_list(&branch.body, &value)
        } else {
            self.walk_list(&branch.body, dot)
        };
        self.vars.truncate(mark);
        flow
    }

    fn walk_range(&mut self, branch: &Branch, dot: &Value) -> Result<Flow, TemplateError> {
        let fail = |state: &Self, message: String| state.fail(branch.line, &branch.source, message);
        let pipeline = &branch.pipeline;
        let mark = self.vars.len();

        let value = self
            .eval_commands(pipeline, dot)
            .map_err(|message| fail(self, message))?;
        let entries: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries
                    .into_iter()
                    .map(|(key, item)| (Value::String(key), item))
                    .collect()
            }
            Value::Number(n) => match n.as_i64() {
                Some(_) if pipeline.decl.len() > 1 => {
                    return Err(fail(
                        self,
                        format!("can't use {n} to iterate over more than one variable"),
                    ));
                }
                Some(count) => (0..count).map(|i| (Value::from(i), Value::from(i))).collect(),
                None => return Err(fail(self, format!("range can't iterate over {n}"))),
            },
            Value::Null => Vec::new(),
            other => {
                return Err(fail(
                    self,
                    format!("range can't iterate over {}", format_value(&other)),
                ));
            }
        };

        if entries.is_empty() {
            let flow = self.walk_list(&branch.otherwise, dot);
            self.vars.truncate(mark);
            return flow;
        }

        for (key, item) in entries {
            let bound = match pipeline.decl.as_slice() {
                [value_var] => self.bind(value_var, item.clone(), pipeline.is_assign),
                [key_var, value_var] => self
                    .bind(key_var, key, pipeline.is_assign)
                    .and_then(|()| self.bind(value_var, item.clone(), pipeline.is_assign)),
                _ => Ok(()),
            };
            bound.map_err(|message| fail(self, message))?;
            let flow = self.walk_list(&branch.body, &item);
            self.vars.truncate(mark);
            if flow? == Flow::Break {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    fn walk_template(
        &mut self,
        line: usize,
        source: &str,
        name: &str,
        pipeline: Option<&Pipeline>,
        dot: &Value,
    ) -> Result<(), TemplateError> {
        let tree = self.tree;
        let Some(body) = tree.defines.get(name) else {
            return Err(self.fail(line, source, format!("no such template {name:?}")));
        };
        if self.depth >= MAX_TEMPLATE_DEPTH {
            return Err(self.fail(
                line,
                source,
                format!("exceeded maximum template depth ({MAX_TEMPLATE_DEPTH})"),
            ));
        }
        let data = match pipeline {
            Some(pipeline) => self
                .eval_pipeline(pipeline, dot)
                .map_err(|message| self.fail(line, source, message))?,
            None => Value::Null,
        };

        let vars = std::mem::replace(&mut self.vars, vec![("$".to_string(), data.clone())]);
        let caller = std::mem::replace(&mut self.name, name.to_string());
        self.depth += 1;
        let result = self.walk_list(body, &data);
        self.depth -= 1;
        self.name = caller;
        self.vars = vars;
        result.map(|_| ())
    }

    /// Evaluates a pipeline and binds its declared variables.
    fn eval_pipeline(&mut self, pipeline: &Pipeline, dot: &Value) -> ExecResult {
        let value = self.eval_commands(pipeline, dot)?;
        for name in &pipeline.decl {
            self.bind(name, value.clone(), pipeline.is_assign)?;
        }
        Ok(value)
    }

    fn bind(&mut self, name: &str, value: Value, is_assign: bool) -> Result<(), String> {
        if !is_assign {
            self.vars.push((name.to_string(), value));
            return Ok(());
        }
        match self.vars.iter_mut().rev().find(|(var, _)| var == name) {
            Some((_, slot)) => {
                *slot = value;
                Ok(())
            }
            None => Err(format!("undefined variable: {name}")),
        }
    }

    fn lookup(&self, name: &str) -> Result<&Value, String> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value)
            .ok_or_else(|| format!("undefined variable: {name}"))
    }

    fn eval_commands(&self, pipeline: &Pipeline, dot: &Value) -> ExecResult {
        let mut piped: Option<Value> = None;
        for command in &pipeline.commands {
            piped = Some(self.eval_command(command, dot, piped.take())?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn eval_command(&self, command: &Command, dot: &Value, piped: Option<Value>) -> ExecResult {
        let Some((first, rest)) = command.operands.split_first() else {
            return Err("missing value for command".to_string());
        };

        match first {
            Operand::Function(name) if name == "and" || name == "or" => {
                self.short_circuit(name, rest, dot, piped)
            }
            Operand::Function(name) => {
                let mut args = rest
                    .iter()
                    .map(|operand| self.eval_arg(operand, dot))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                call_function(name, args)
            }
            other => {
                if !rest.is_empty() || piped.is_some() {
                    return Err(format!(
                        "can't give argument to non-function {}",
                        describe(other)
                    ));
                }
                self.eval_arg(other, dot)
            }
        }
    }

    /// `and` stops at the first falsy argument, `or` at the first truthy one.
    fn short_circuit(
        &self,
        name: &str,
        operands: &[Operand],
        dot: &Value,
        piped: Option<Value>,
    ) -> ExecResult {
        if operands.is_empty() && piped.is_none() {
            return Err(format!("wrong number of args for {name}: want at least 1 got 0"));
        }
        let stop_on = name == "or";
        let mut last = Value::Null;
        for operand in operands {
            last = self.eval_arg(operand, dot)?;
            if truth(&last) == stop_on {
                return Ok(last);
            }
        }
        Ok(piped.unwrap_or(last))
    }

    fn eval_arg(&self, operand: &Operand, dot: &Value) -> ExecResult {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(path) => eval_field(dot, path),
            Operand::Variable { name, fields } => eval_field(self.lookup(name)?, fields),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Parenthesized { pipeline, fields } => {
                let value = self.eval_commands(pipeline, dot)?;
                eval_field(&value, fields)
            }
            Operand::Function(name) => Err(format!(
                "function {name:?} used as an argument must be parenthesized"
            )),
        }
    }
}

fn eval_field(dot: &Value, path: &[String]) -> ExecResult {
    let mut current = dot;
    for name in path {
        current = match current {
            Value::Object(map) => match map.get(name) {
                Some(value) => value,
                None => return Ok(Value::Null),
            },
            Value::Null => return Err(format!("nil pointer evaluating .{name}")),
            other => {
                return Err(format!(
                    "can't evaluate field {name} in type {}",
                    type_name(other)
                ));
            }
        };
    }
    Ok(current.clone())
}

/// Empty values and zero are false.
fn truth(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Dot => ".".to_string(),
        Operand::Field(path) => format!(".{}", path.join(".")),
        Operand::Variable { name, fields } => {
            let chain: String = fields.iter().map(|f| format!(".{f}")).collect();
            format!("{name}{chain}")
        }
        Operand::Function(name) => name.clone(),
        Operand::Literal(value) => value.to_string(),
        Operand::Parenthesized { .. } => "(...)".to_string(),
    }
}

fn call_function(name: &str, args: Vec<Value>) -> ExecResult {
    match name {
        "eq" => eq(args),
        "ne" => {
            let (a, b) = exactly_two("ne", args)?;
            values_equal("ne", &a, &b).map(|equal| Value::Bool(!equal))
        }
        "lt" => compare_with("lt", args, Ordering::is_lt),
        "le" => compare_with("le", args, Ordering::is_le),
        "gt" => compare_with("gt", args, Ordering::is_gt),
        "ge" => compare_with("ge", args, Ordering::is_ge),
        "index" => index(args),
        "len" => len(args),
        "not" => exactly_one("not", args).map(|value| Value::Bool(!truth(&value))),
        "print" => Ok(Value::String(sprint(&args))),
        "printf" => printf(args),
        "println" => Ok(Value::String(sprintln(&args))),
        "slice" => slice(args),
        "toJson" => to_json(args),
        other => Err(format!("function {other:?} not defined")),
    }
}

fn exactly_one(name: &str, args: Vec<Value>) -> ExecResult {
    let count = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(format!("wrong number of args for {name}: want 1 got {count}")),
    }
}

fn exactly_two(name: &str, args: Vec<Value>) -> Result<(Value, Value), String> {
    let count = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(a), Some(b), None) => Ok((a, b)),
        _ => Err(format!("wrong number of args for {name}: want 2 got {count}")),
    }
}

/// `eq a b c` is true when `a` equals any of the rest.
fn eq(args: Vec<Value>) -> ExecResult {
    let Some((first, rest)) = args.split_first() else {
        return Err("wrong number of args for eq: want at least 1 got 0".to_string());
    };
    if rest.is_empty() {
        return Err("error calling eq: missing argument for comparison".to_string());
    }
    for other in rest {
        if values_equal("eq", first, other)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn values_equal(name: &str, a: &Value, b: &Value) -> Result<bool, String> {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            let culprit = if matches!(a, Value::Array(_) | Value::Object(_)) { a } else { b };
            Err(format!(
                "error calling {name}: non-comparable type {}",
                type_name(culprit)
            ))
        }
        (Value::Null, other) | (other, Value::Null) => Ok(other.is_null()),
        (Value::Number(x), Value::Number(y)) => Ok(match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        }),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::String(x), Value::String(y)) => Ok(x == y),
        _ => Err(format!("error calling {name}: incompatible types for comparison")),
    }
}

fn compare_with(name: &str, args: Vec<Value>, accept: fn(Ordering) -> bool) -> ExecResult {
    let (a, b) = exactly_two(name, args)?;
    let ordering = match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                x.partial_cmp(&y).ok_or_else(|| {
                    format!("error calling {name}: incomparable numbers {x} and {y}")
                })?
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            return Err(format!("error calling {name}: incompatible types for comparison"));
        }
        _ => {
            let culprit = if matches!(a, Value::Number(_) | Value::String(_)) { &b } else { &a };
            return Err(format!(
                "error calling {name}: invalid type for comparison: {}",
                type_name(culprit)
            ));
        }
    };
    Ok(Value::Bool(accept(ordering)))
}

/// `index item k1 k2 ...` walks lists by integer and maps by string key.
fn index(args: Vec<Value>) -> ExecResult {
    let mut args = args.into_iter();
    let Some(mut item) = args.next() else {
        return Err("wrong number of args for index: want at least 1 got 0".to_string());
    };

    for key in args {
        item = match (item, key) {
            (Value::Array(mut items), Value::Number(n)) => {
                let Some(i) = n.as_i64() else {
                    return Err(format!("error calling index: cannot index slice/array with {n}"));
                };
                if i < 0 || i as usize >= items.len() {
                    return Err(format!("error calling index: index out of range: {i}"));
                }
                items.swap_remove(i as usize)
            }
            (Value::Array(_), other) => {
                return Err(format!(
                    "error calling index: cannot index slice/array with type {}",
                    type_name(&other)
                ));
            }
            (Value::Object(mut map), Value::String(key)) => {
                map.remove(&key).unwrap_or(Value::Null)
            }
            (Value::Object(_), other) => {
                return Err(format!(
                    "error calling index: value has type {}; should be string",
                    type_name(&other)
                ));
            }
            (Value::Null, _) => {
                return Err("error calling index: index of untyped nil".to_string());
            }
            (other, _) => {
                return Err(format!(
                    "error calling index: can't index item of type {}",
                    type_name(&other)
                ));
            }
        };
    }

    Ok(item)
}

/// `slice item [start [end]]` on strings (by byte) and lists.
fn slice(args: Vec<Value>) -> ExecResult {
    let mut args = args.into_iter();
    let Some(item) = args.next() else {
        return Err("wrong number of args for slice: want at least 1 got 0".to_string());
    };
    let bounds = args
        .map(|bound| match bound.as_u64() {
            Some(n) => Ok(n as usize),
            None => Err(format!(
                "error calling slice: cannot index slice/array with {}",
                format_value(&bound)
            )),
        })
        .collect::<Result<Vec<usize>, _>>()?;
    if bounds.len() > 2 {
        return Err(format!("error calling slice: too many slice indexes: {}", bounds.len()));
    }

    let range = |len: usize| {
        let start = bounds.first().copied().unwrap_or(0);
        let end = bounds.get(1).copied().unwrap_or(len);
        if end > len {
            Err(format!("error calling slice: index out of range: {end}"))
        } else if start > end {
            Err(format!("error calling slice: invalid slice index: {start} > {end}"))
        } else {
            Ok(start..end)
        }
    };

    match item {
        Value::String(s) => {
            let range = range(s.len())?;
            s.get(range.clone())
                .map(|part| Value::String(part.to_string()))
                .ok_or_else(|| {
                    format!(
                        "error calling slice: {}..{} is not on a character boundary",
                        range.start, range.end
                    )
                })
        }
        Value::Array(items) => {
            let range = range(items.len())?;
            Ok(Value::Array(items[range].to_vec()))
        }
        Value::Null => Err("error calling slice: slice of untyped nil".to_string()),
        other => Err(format!(
            "error calling slice: can't slice item of type {}",
            type_name(&other)
        )),
    }
}

fn len(args: Vec<Value>) -> ExecResult {
    let value = exactly_one("len", args)?;
    let length = match &value {
        Value::String(s) => s.len(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => return Err("error calling len: len of nil pointer".to_string()),
        other => {
            return Err(format!(
                "error calling len: len of type {}",
                type_name(other)
            ));
        }
    };
    Ok(Value::from(length))
}

fn to_json(args: Vec<Value>) -> ExecResult {
    let value = exactly_one("toJson", args)?;
    serde_json::to_string(&value)
        .map(Value::String)
        .map_err(|e| format!("error calling toJson: {e}"))
}

/// Operands are separated by a space when neither side is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !args[i - 1].is_string() && !arg.is_string() {
            out.push(' ');
        }
        out.push_str(&format_value(arg));
    }
    out
}

fn sprintln(args: &[Value]) -> String {
    let mut out = args.iter().map(format_value).collect::<Vec<_>>().join(" ");
    out.push('\n');
    out
}

/// `printf` with the verbs `%v %s %d %f %g %t %q`, an optional `-` flag,
/// width and precision.
fn printf(args: Vec<Value>) -> ExecResult {
    let mut args = args.into_iter();
    let format = match args.next() {
        Some(Value::String(format)) => format,
        Some(other) => {
            return Err(format!(
                "error calling printf: format must be a string, not {}",
                type_name(&other)
            ));
        }
        None => return Err("wrong number of args for printf: want at least 1 got 0".to_string()),
    };

    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let left_align = chars.next_if_eq(&'-').is_some();
        let mut width = String::new();
        while let Some(digit) = chars.next_if(char::is_ascii_digit) {
            width.push(digit);
        }
        let precision = if chars.next_if_eq(&'.').is_some() {
            let mut digits = String::new();
            while let Some(digit) = chars.next_if(char::is_ascii_digit) {
                digits.push(digit);
            }
            Some(digits.parse::<usize>().unwrap_or(0))
        } else {
            None
        };
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let formatted = match args.next() {
            Some(arg) => format_verb(verb, precision, &arg),
            None => format!("%!{verb}(MISSING)"),
        };
        let width = width.parse::<usize>().unwrap_or(0);
        if left_align {
            out.push_str(&format!("{formatted:<width$}"));
        } else {
            out.push_str(&format!("{formatted:>width$}"));
        }
    }

    let extra: Vec<String> = args
        .map(|arg| format!("{}={}", type_name(&arg), format_value(&arg)))
        .collect();
    if !extra.is_empty() {
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    Ok(Value::String(out))
}

fn format_verb(verb: char, precision: Option<usize>, arg: &Value) -> String {
    let bad = || format!("%!{verb}({}={})", type_name(arg), format_value(arg));
    match (verb, arg) {
        ('v', _) => format_value(arg),
        ('s', Value::String(s)) => s.clone(),
        ('s', _) => format_value(arg),
        ('d', Value::Number(n)) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_u64().map_or_else(bad, |u| u.to_string()),
        },
        ('f', Value::Number(n)) => match n.as_f64() {
            Some(f) => format!("{f:.prec$}", prec = precision.unwrap_or(6)),
            None => bad(),
        },
        ('g', Value::Number(n)) => match (precision, n.as_f64()) {
            (Some(prec), Some(f)) => format!("{f:.prec$}"),
            _ => n.to_string(),
        },
        ('t', Value::Bool(b)) => b.to_string(),
        ('q', Value::String(s)) => format!("{s:?}"),
        _ => bad(),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "<nil>".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(" "))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{k}:{}", format_value(v)))
                .collect();
            format!("map[{}]", inner.join(" "))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
