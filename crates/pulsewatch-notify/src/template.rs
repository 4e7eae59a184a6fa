//! Notification templates and the placeholder renderer.
//!
//! Template syntax:
//!
//! - `{{path.to.value}}` inserts a value; inside a block, paths resolve
//!   against the current item first, then outward. `{{this}}` is the item.
//! - `{{#each path}}...{{/each}}` repeats for every element of an array.
//! - `{{#if path}}...{{/if}}` keeps its content when the value is truthy,
//!   `{{#unless path}}...{{/unless}}` when it is not.
//! - `{{@index}}`, `{{@first}}` and `{{@last}}` describe the current item.
//!
//! A block tag alone on its line does not leave an empty line behind.

use crate::error::{NotifyError, Result};
use pulsewatch_common::types::{MessageFormat, NotifyKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A title/message pair for one (notify kind, message format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub kind: NotifyKind,
    pub format: MessageFormat,
    pub title: String,
    pub message: String,
}

/// Turns template data into a channel-formatted (title, body).
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &Template, data: &Value) -> Result<(String, String)>;
}

/// Templates indexed by (kind, format); overrides replace built-ins.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn builtin() -> Self {
        let t = |kind, format, title: &str, message: &str| Template {
            kind,
            format,
            title: title.to_string(),
            message: message.to_string(),
        };
        let alert_title = "[{{severity_formatted}}] {{realm_name}}: {{affected_alerts_count}} alert(s) on {{affected_hosts_count}} host(s)";
        let resolved_title = "[Resolved] {{realm_name}}: {{resolved_alerts_count}} alert(s) recovered";

        Self {
            templates: vec![
                t(NotifyKind::Alerting, MessageFormat::Html, alert_title, include_str!("templates/alerting.html")),
                t(NotifyKind::Alerting, MessageFormat::Markdown, alert_title, include_str!("templates/alerting.md")),
                t(NotifyKind::Alerting, MessageFormat::Json, alert_title, include_str!("templates/alerting.json")),
                t(NotifyKind::Alerting, MessageFormat::Text, alert_title, include_str!("templates/alerting.txt")),
                t(NotifyKind::Resolved, MessageFormat::Html, resolved_title, include_str!("templates/resolved.html")),
                t(NotifyKind::Resolved, MessageFormat::Markdown, resolved_title, include_str!("templates/resolved.md")),
                t(NotifyKind::Resolved, MessageFormat::Json, resolved_title, include_str!("templates/resolved.json")),
                t(NotifyKind::Resolved, MessageFormat::Text, resolved_title, include_str!("templates/resolved.txt")),
            ],
        }
    }

    /// Built-ins with `overrides` taking precedence for their (kind, format).
    pub fn with_overrides(overrides: Vec<Template>) -> Self {
        let mut set = Self::builtin();
        for tpl in overrides {
            set.templates
                .retain(|t| !(t.kind == tpl.kind && t.format == tpl.format));
            set.templates.push(tpl);
        }
        set
    }

    pub fn find(&self, kind: NotifyKind, format: MessageFormat) -> Option<&Template> {
        self.templates
            .iter()
            .find(|t| t.kind == kind && t.format == format)
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Block {
    Each,
    If,
    Unless,
}

impl Block {
    fn from_tag(tag: &str) -> Option<(Self, &str)> {
        [("#each", Block::Each), ("#if", Block::If), ("#unless", Block::Unless)]
            .into_iter()
            .find_map(|(prefix, block)| {
                tag.strip_prefix(prefix)
                    .filter(|rest| rest.starts_with(char::is_whitespace))
                    .map(|rest| (block, rest.trim()))
            })
    }

    fn close_tag(self) -> &'static str {
        match self {
            Block::Each => "/each",
            Block::If => "/if",
            Block::Unless => "/unless",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    Block(Block, String, Vec<Node>),
}

type Frame = (Option<(Block, String)>, Vec<Node>);

fn parse(src: &str) -> Result<Vec<Node>> {
    let mut stack: Vec<Frame> = vec![(None, Vec::new())];
    let mut rest = src;
    let mut at_line_start = true;

    while let Some(open) = rest.find("{{") {
        let (mut text, after) = rest.split_at(open);
        let close = after
            .find("}}")
            .ok_or_else(|| NotifyError::TemplateError("unclosed '{{'".to_string()))?;
        let tag = after[2..close].trim();
        rest = &after[close + 2..];

        let is_block_tag = tag.starts_with('#') || tag.starts_with('/');
        let mut standalone = false;
        // 独占一行的块标签不产生空行
        if is_block_tag {
            let line_start = text.rfind('\n').map(|i| i + 1).unwrap_or(0);
            let blank_before =
                text[line_start..].trim().is_empty() && (line_start > 0 || at_line_start);
            let after_tag = rest.trim_start_matches([' ', '\t']);
            let line_end = after_tag
                .strip_prefix("\r\n")
                .or_else(|| after_tag.strip_prefix('\n'))
                .or(after_tag.is_empty().then_some(after_tag));
            if let (true, Some(remaining)) = (blank_before, line_end) {
                text = &text[..line_start];
                rest = remaining;
                standalone = true;
            }
        }
        if !text.is_empty() {
            at_line_start = text.ends_with('\n');
            push(&mut stack, Node::Text(text.to_string()));
        }
        at_line_start = standalone || (is_block_tag && at_line_start);

        if let Some((block, path)) = Block::from_tag(tag) {
            stack.push((Some((block, path.to_string())), Vec::new()));
        } else if is_block_tag && tag.starts_with('/') {
            let Some((Some((block, path)), body)) = stack.pop().filter(|_| !stack.is_empty())
            else {
                return Err(NotifyError::TemplateError(format!("unexpected {{{{{tag}}}}}")));
            };
            if block.close_tag() != tag {
                return Err(NotifyError::TemplateError(format!(
                    "mismatched {{{{{tag}}}}}, expected {{{{{}}}}}",
                    block.close_tag()
                )));
            }
            push(&mut stack, Node::Block(block, path, body));
        } else if tag.is_empty() || is_block_tag {
            return Err(NotifyError::TemplateError(format!("invalid tag {{{{{tag}}}}}")));
        } else {
            push(&mut stack, Node::Var(tag.to_string()));
        }
    }
    if !rest.is_empty() {
        push(&mut stack, Node::Text(rest.to_string()));
    }

    match stack.pop() {
        Some((None, nodes)) if stack.is_empty() => Ok(nodes),
        _ => Err(NotifyError::TemplateError("unclosed block".to_string())),
    }
}

fn push(stack: &mut [Frame], node: Node) {
    if let Some((_, nodes)) = stack.last_mut() {
        nodes.push(node);
    }
}

struct Scope<'a> {
    value: &'a Value,
    /// (index, len) when the scope is an `each` item.
    position: Option<(usize, usize)>,
}

fn resolve<'a>(scopes: &[Scope<'a>], path: &str) -> Option<Value> {
    if let Some(meta) = path.strip_prefix('@') {
        let (index, len) = scopes.iter().rev().find_map(|s| s.position)?;
        return match meta {
            "index" => Some(Value::from(index)),
            "first" => Some(Value::Bool(index == 0)),
            "last" => Some(Value::Bool(index + 1 == len)),
            _ => None,
        };
    }
    if path == "this" {
        return scopes.last().map(|s| s.value.clone());
    }
    let path = path.strip_prefix("this.").unwrap_or(path);
    scopes
        .iter()
        .rev()
        .find_map(|scope| {
            path.split('.')
                .try_fold(scope.value, |value, key| value.get(key))
        })
        .cloned()
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Object(_)) => true,
    }
}

/// Display form of a value: integers as-is, other numbers with two decimals.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 => format!("{f:.0}"),
            (None, Some(f)) => format!("{f:.2}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn render_nodes<'a>(nodes: &[Node], scopes: &mut Vec<Scope<'a>>, escape_json: bool, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => {
                let text = resolve(scopes, path)
                    .map(|v| display_value(&v))
                    .unwrap_or_default();
                if escape_json {
                    let quoted = Value::String(text).to_string();
                    out.push_str(&quoted[1..quoted.len() - 1]);
                } else {
                    out.push_str(&text);
                }
            }
            Node::Block(Block::If, path, body) => {
                if truthy(resolve(scopes, path).as_ref()) {
                    render_nodes(body, scopes, escape_json, out);
                }
            }
            Node::Block(Block::Unless, path, body) => {
                if !truthy(resolve(scopes, path).as_ref()) {
                    render_nodes(body, scopes, escape_json, out);
                }
            }
            Node::Block(Block::Each, path, body) => {
                let items = match path_value(scopes, path) {
                    Some(Value::Array(items)) => items.as_slice(),
                    _ => &[],
                };
                for (index, item) in items.iter().enumerate() {
                    scopes.push(Scope {
                        value: item,
                        position: Some((index, items.len())),
                    });
                    render_nodes(body, scopes, escape_json, out);
                    scopes.pop();
                }
            }
        }
    }
}

/// Borrowing lookup for `each`, so items keep pointing into the data.
fn path_value<'a>(scopes: &[Scope<'a>], path: &str) -> Option<&'a Value> {
    if path == "this" {
        return scopes.last().map(|s| s.value);
    }
    let path = path.strip_prefix("this.").unwrap_or(path);
    scopes.iter().rev().find_map(|scope| {
        path.split('.')
            .try_fold(scope.value, |value, key| value.get(key))
    })
}

/// Renders `src` against `data`.
pub fn render_str(src: &str, data: &Value, escape_json: bool) -> Result<String> {
    let nodes = parse(src)?;
    let mut out = String::new();
    let mut scopes = vec![Scope {
        value: data,
        position: None,
    }];
    render_nodes(&nodes, &mut scopes, escape_json, &mut out);
    Ok(out)
}

/// Trims trailing spaces, normalises indentation to two spaces, collapses
/// runs of blank lines and drops leading/trailing blank lines.
pub fn normalize_lines(message: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in message.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            lines.push(format!("  {trimmed}"));
        } else {
            lines.push(trimmed.to_string());
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Drops Markdown emphasis and heading markers for plain-text channels.
pub fn strip_markdown(message: &str) -> String {
    message
        .lines()
        .map(|line| line.replace('*', "").trim_start_matches('#').trim_start().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The built-in renderer for the placeholder syntax described above.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &Template, data: &Value) -> Result<(String, String)> {
        let title = render_str(&template.title, data, false)?.trim().to_string();

        let body = match template.format {
            MessageFormat::Json => {
                let raw = render_str(&template.message, data, true)?;
                let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
                    NotifyError::TemplateError(format!("rendered JSON is invalid: {e}"))
                })?;
                serde_json::to_string_pretty(&parsed)?
            }
            MessageFormat::Text => {
                strip_markdown(&normalize_lines(&render_str(&template.message, data, false)?))
            }
            MessageFormat::Html | MessageFormat::Markdown => {
                normalize_lines(&render_str(&template.message, data, false)?)
            }
        };
        Ok((title, body))
    }
}
