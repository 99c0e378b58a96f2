//! Query template compiler.
//!
//! A skeleton is compiled once against a [`TemplateSchema`] and rendered per
//! request with [`TemplateData`]. Rendering only arranges placeholder names:
//! the data carries [`ParamName`]s, never values.
//!
//! ```
//! use featurelag::template::{compile, FieldKind, TemplateData, TemplateSchema};
//! use featurelag::statement::ParamName;
//!
//! let schema = TemplateSchema::new()
//!     .field("Ids", FieldKind::List)
//!     .field("Cursor", FieldKind::Optional);
//! let tmpl = compile(
//!     "WHERE id IN ({{range $p := .Ids}}@{{ $p }},{{end}} 0){{if .Cursor}} AND d < @{{ .Cursor }}{{end}}",
//!     &schema,
//! )
//! .unwrap();
//!
//! let data = TemplateData::new()
//!     .list("Ids", vec![ParamName::new("id0").unwrap(), ParamName::new("id1").unwrap()])
//!     .optional("Cursor", None);
//! assert_eq!(tmpl.render(&data).unwrap(), "WHERE id IN (@id0,@id1, 0)");
//! ```

pub mod ast;
mod parser;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::TemplateError;
use crate::statement::ParamName;

pub use ast::{FieldKind, Node};
pub(crate) use parser::identifier;
use parser::{Action, Token};

/// The fields a skeleton may reference, and how each is bound.
#[derive(Debug, Clone, Default)]
pub struct TemplateSchema {
    fields: BTreeMap<String, FieldKind>,
}

impl TemplateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }
}

/// Compile a skeleton into a reusable, validated template.
///
/// Fails if an action is malformed, a block is left open or closed twice, or
/// the skeleton uses a field in a way its schema does not allow.
pub fn compile(source: &str, schema: &TemplateSchema) -> Result<CompiledTemplate, TemplateError> {
    let tokens = parser::tokenize(source)?;
    let mut compiler = Compiler {
        tokens: tokens.into_iter(),
        schema,
        vars: Vec::new(),
        guards: Vec::new(),
    };
    let nodes = compiler.block(None)?;

    Ok(CompiledTemplate {
        nodes,
        schema: schema.clone(),
    })
}

struct Compiler<'s, 'a> {
    tokens: std::vec::IntoIter<Token<'a>>,
    schema: &'s TemplateSchema,
    /// Loop variables in scope.
    vars: Vec<String>,
    /// Optional fields known to be bound in the current block.
    guards: Vec<String>,
}

impl Compiler<'_, '_> {
    /// Compile nodes until `{{end}}` (when `opener` is set) or end of input.
    fn block(&mut self, opener: Option<usize>) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            let (action, position) = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text.to_string()));
                    continue;
                }
                Token::Action { action, position } => (action, position),
            };

            match action {
                Action::End => {
                    return match opener {
                        Some(_) => Ok(nodes),
                        None => Err(TemplateError::new(
                            position,
                            "{{end}} without a matching if or range",
                        )),
                    };
                }
                Action::Field(name) => {
                    match self.lookup(&name, position)? {
                        FieldKind::Scalar => {}
                        FieldKind::Optional if self.guards.contains(&name) => {}
                        FieldKind::Optional => {
                            return Err(TemplateError::new(
                                position,
                                format!("optional field .{name} used outside {{{{if .{name}}}}}"),
                            ));
                        }
                        FieldKind::List => {
                            return Err(TemplateError::new(
                                position,
                                format!("list field .{name} can only be used with range"),
                            ));
                        }
                    }
                    nodes.push(Node::Field { name, position });
                }
                Action::Var(name) => {
                    if !self.vars.contains(&name) {
                        return Err(TemplateError::new(
                            position,
                            format!("undeclared variable ${name}"),
                        ));
                    }
                    nodes.push(Node::Var { name, position });
                }
                Action::If(field) => {
                    if self.lookup(&field, position)? == FieldKind::Scalar {
                        return Err(TemplateError::new(
                            position,
                            format!("scalar field .{field} is always bound; if is meaningless"),
                        ));
                    }
                    self.guards.push(field.clone());
                    let body = self.block(Some(position));
                    self.guards.pop();
                    nodes.push(Node::If {
                        field,
                        body: body?,
                        position,
                    });
                }
                Action::Range { var, list } => {
                    if self.lookup(&list, position)? != FieldKind::List {
                        return Err(TemplateError::new(
                            position,
                            format!("range over non-list field .{list}"),
                        ));
                    }
                    if self.vars.contains(&var) {
                        return Err(TemplateError::new(
                            position,
                            format!("variable ${var} shadows an enclosing range"),
                        ));
                    }
                    self.vars.push(var.clone());
                    let body = self.block(Some(position));
                    self.vars.pop();
                    nodes.push(Node::Range {
                        var,
                        list,
                        body: body?,
                        position,
                    });
                }
            }
        }

        match opener {
            Some(position) => Err(TemplateError::new(position, "block is missing {{end}}")),
            None => Ok(nodes),
        }
    }

    fn lookup(&self, name: &str, position: usize) -> Result<FieldKind, TemplateError> {
        self.schema
            .kind(name)
            .ok_or_else(|| TemplateError::new(position, format!("undeclared field .{name}")))
    }
}

/// A value bound to a template field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Name(ParamName),
    Names(Vec<ParamName>),
    Absent,
}

/// Per-request field bindings.
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    fields: BTreeMap<String, Binding>,
}

impl TemplateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, field: impl Into<String>, name: ParamName) -> Self {
        self.fields.insert(field.into(), Binding::Name(name));
        self
    }

    pub fn optional(mut self, field: impl Into<String>, name: Option<ParamName>) -> Self {
        let binding = name.map_or(Binding::Absent, Binding::Name);
        self.fields.insert(field.into(), binding);
        self
    }

    pub fn list(mut self, field: impl Into<String>, names: Vec<ParamName>) -> Self {
        self.fields.insert(field.into(), Binding::Names(names));
        self
    }

    fn get(&self, field: &str) -> &Binding {
        static ABSENT: Binding = Binding::Absent;
        self.fields.get(field).unwrap_or(&ABSENT)
    }
}

/// An immutable compiled skeleton, safe to share across threads.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    nodes: Vec<Node>,
    schema: TemplateSchema,
}

impl CompiledTemplate {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Render query text for one request.
    pub fn render(&self, data: &TemplateData) -> Result<String, TemplateError> {
        for (field, binding) in &data.fields {
            let Some(kind) = self.schema.kind(field) else {
                return Err(TemplateError::new(0, format!("data binds undeclared field .{field}")));
            };
            let fits = matches!(
                (kind, binding),
                (FieldKind::Scalar, Binding::Name(_))
                    | (FieldKind::Optional, Binding::Name(_) | Binding::Absent)
                    | (FieldKind::List, Binding::Names(_))
            );
            if !fits {
                return Err(TemplateError::new(
                    0,
                    format!("field .{field} expects a {kind} binding"),
                ));
            }
        }

        let mut out = String::new();
        let mut vars = Vec::new();
        render_nodes(&self.nodes, data, &mut vars, &mut out)?;
        Ok(out)
    }

    /// Indented listing of the template structure.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.write_outline(0, &mut out);
        }
        out
    }
}

impl fmt::Display for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.outline())
    }
}

fn render_nodes<'a>(
    nodes: &'a [Node],
    data: &'a TemplateData,
    vars: &mut Vec<(&'a str, &'a ParamName)>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field { name, position } => match data.get(name) {
                Binding::Name(param) => out.push_str(param.as_str()),
                _ => {
                    return Err(TemplateError::new(
                        *position,
                        format!("field .{name} is not bound"),
                    ));
                }
            },
            Node::Var { name, position } => {
                let Some((_, param)) = vars.iter().rev().find(|(var, _)| *var == name.as_str()) else {
                    return Err(TemplateError::new(
                        *position,
                        format!("variable ${name} is not bound"),
                    ));
                };
                out.push_str(param.as_str());
            }
            Node::If { field, body, .. } => {
                let present = match data.get(field) {
                    Binding::Name(_) => true,
                    Binding::Names(names) => !names.is_empty(),
                    Binding::Absent => false,
                };
                if present {
                    render_nodes(body, data, vars, out)?;
                }
            }
            Node::Range {
                var,
                list,
                body,
                position,
            } => {
                let Binding::Names(names) = data.get(list) else {
                    return Err(TemplateError::new(
                        *position,
                        format!("list field .{list} is not bound"),
                    ));
                };
                for param in names {
                    vars.push((var.as_str(), param));
                    let result = render_nodes(body, data, vars, out);
                    vars.pop();
                    result?;
                }
            }
        }
    }
    Ok(())
}
