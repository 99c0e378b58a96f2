//! Compiled template tree.

use std::fmt;

/// How a template field may be bound at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Always bound to exactly one parameter name.
    Scalar,
    /// Bound to one parameter name or absent. Only usable under `{{if}}`.
    Optional,
    /// Bound to a sequence of parameter names. Only usable in `{{range}}`.
    List,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar => write!(f, "scalar"),
            FieldKind::Optional => write!(f, "optional"),
            FieldKind::List => write!(f, "list"),
        }
    }
}

/// A node of a compiled skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal query text, emitted verbatim.
    Text(String),
    /// `{{ .Field }}`
    Field { name: String, position: usize },
    /// `{{ $var }}`
    Var { name: String, position: usize },
    /// `{{if .Field}} ... {{end}}`
    If {
        field: String,
        body: Vec<Node>,
        position: usize,
    },
    /// `{{range $var := .List}} ... {{end}}`
    Range {
        var: String,
        list: String,
        body: Vec<Node>,
        position: usize,
    },
}

impl Node {
    pub(crate) fn write_outline(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            Node::Text(text) => {
                let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if trimmed.is_empty() {
                    return;
                }
                let preview: String = trimmed.chars().take(48).collect();
                let ellipsis = if trimmed.chars().count() > 48 { "…" } else { "" };
                out.push_str(&format!("{indent}text \"{preview}{ellipsis}\"\n"));
            }
            Node::Field { name, .. } => out.push_str(&format!("{indent}param .{name}\n")),
            Node::Var { name, .. } => out.push_str(&format!("{indent}param ${name}\n")),
            Node::If { field, body, .. } => {
                out.push_str(&format!("{indent}if .{field}\n"));
                for node in body {
                    node.write_outline(depth + 1, out);
                }
            }
            Node::Range {
                var, list, body, ..
            } => {
                out.push_str(&format!("{indent}range ${var} := .{list}\n"));
                for node in body {
                    node.write_outline(depth + 1, out);
                }
            }
        }
    }
}
