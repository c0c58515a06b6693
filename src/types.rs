use crate::error::BindError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Runtime value flowing through synthesized functions and name templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Literal column name, produced by evaluating an escaped `:name`.
    Symbol(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
    Selector(Selector),
}

impl Value {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Selector(_) => "selector",
        }
    }

    #[inline]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Looks up a field of a record value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) | Self::Symbol(s) => f.write_str(s),
            Self::Tuple(items) | Self::List(items) => {
                let open = if matches!(self, Self::Tuple(_)) { "(" } else { "[" };
                let close = if matches!(self, Self::Tuple(_)) { ")" } else { "]" };
                f.write_str(open)?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(close)
            }
            Self::Record(fields) => {
                f.write_str("(")?;
                for (idx, (name, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                f.write_str(")")
            }
            Self::Selector(sel) => write!(f, "{sel:?}"),
        }
    }
}

/// Dynamic multi-column selector, resolved against the live column set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Selector {
    All,
    Name(String),
    /// 1-based.
    Position(i64),
    Between(Box<Selector>, Box<Selector>),
    Not(Box<Selector>),
    Cols(Vec<Selector>),
}

impl Selector {
    /// Converts a plain value (name, position, list of either) into a selector.
    pub fn from_value(value: &Value) -> Result<Self, BindError> {
        match value {
            Value::Str(name) | Value::Symbol(name) => Ok(Self::Name(name.clone())),
            Value::Int(pos) => Ok(Self::Position(*pos)),
            Value::Selector(sel) => Ok(sel.clone()),
            Value::List(items) | Value::Tuple(items) => Ok(Self::Cols(
                items
                    .iter()
                    .map(Self::from_value)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            other => Err(BindError::InvalidSelector { kind: other.kind() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ApplicationMode {
    /// Invoke once per row, each source contributing one scalar.
    ByRow,
    /// Invoke once per full column (or group).
    ByColumn,
}

/// How the executor merges formula outputs with the input table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultMerge {
    /// Only formula outputs are kept.
    OnlyFormulas,
    /// Input columns are preserved, formula outputs added or replaced.
    KeepColumns,
    /// Outputs are reduced per group.
    Reduce,
    /// Formulas are row predicates.
    FilterRows,
    /// Formulas are sort keys.
    SortRows,
}

/// High-level transformation selecting defaults for every formula it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryPoint {
    Select,
    SelectInPlace,
    Transform,
    TransformInPlace,
    RowSelect,
    RowSelectInPlace,
    RowTransform,
    RowTransformInPlace,
    Combine,
    Subset,
    RowSubset,
    OrderBy,
    RowOrderBy,
}

impl EntryPoint {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::SelectInPlace => "select!",
            Self::Transform => "transform",
            Self::TransformInPlace => "transform!",
            Self::RowSelect => "rselect",
            Self::RowSelectInPlace => "rselect!",
            Self::RowTransform => "rtransform",
            Self::RowTransformInPlace => "rtransform!",
            Self::Combine => "combine",
            Self::Subset => "subset",
            Self::RowSubset => "rsubset",
            Self::OrderBy => "orderby",
            Self::RowOrderBy => "rorderby",
        }
    }

    pub const fn default_mode(self) -> ApplicationMode {
        match self {
            Self::RowSelect
            | Self::RowSelectInPlace
            | Self::RowTransform
            | Self::RowTransformInPlace
            | Self::RowSubset
            | Self::RowOrderBy => ApplicationMode::ByRow,
            _ => ApplicationMode::ByColumn,
        }
    }

    pub const fn merge(self) -> ResultMerge {
        match self {
            Self::Select | Self::SelectInPlace | Self::RowSelect | Self::RowSelectInPlace => {
                ResultMerge::OnlyFormulas
            }
            Self::Transform
            | Self::TransformInPlace
            | Self::RowTransform
            | Self::RowTransformInPlace => ResultMerge::KeepColumns,
            Self::Combine => ResultMerge::Reduce,
            Self::Subset | Self::RowSubset => ResultMerge::FilterRows,
            Self::OrderBy | Self::RowOrderBy => ResultMerge::SortRows,
        }
    }

    /// Mutating entry points accept a leading `@subset` filter expression.
    pub const fn supports_subset_filter(self) -> bool {
        matches!(
            self,
            Self::SelectInPlace
                | Self::TransformInPlace
                | Self::RowSelectInPlace
                | Self::RowTransformInPlace
        )
    }

    /// Whether formulas of this entry point may name output columns.
    pub const fn accepts_targets(self) -> bool {
        !matches!(
            self.merge(),
            ResultMerge::FilterRows | ResultMerge::SortRows
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Return the callee itself for `f(:a, :b)` instead of a wrapping closure.
    pub simple_calls: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { simple_calls: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaRequest {
    pub entry: EntryPoint,
    /// Formula arguments following the input table, in source form.
    pub args: Vec<String>,
    pub opts: CompileOptions,
}

impl FormulaRequest {
    pub fn new(entry: EntryPoint, args: Vec<String>) -> Self {
        Self {
            entry,
            args,
            opts: CompileOptions::default(),
        }
    }
}

/// Column-name resolution provided by the table executor.
pub trait ColumnResolver {
    fn column_names(&self) -> &[String];

    /// Resolves a selector value to the ordered list of matching column names.
    fn resolve(&self, selector: &Value) -> Result<Vec<String>, BindError> {
        let selector = Selector::from_value(selector)?;
        resolve_selector(self.column_names(), &selector)
    }
}

/// Plain ordered list of column names.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    names: Vec<String>,
}

impl TableSchema {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ColumnResolver for TableSchema {
    fn column_names(&self) -> &[String] {
        &self.names
    }
}

fn resolve_selector(names: &[String], selector: &Selector) -> Result<Vec<String>, BindError> {
    match selector {
        Selector::All => Ok(names.to_vec()),
        Selector::Name(name) => {
            if names.iter().any(|n| n == name) {
                Ok(vec![name.clone()])
            } else {
                Err(BindError::ColumnNotFound { name: name.clone() })
            }
        }
        Selector::Position(pos) => {
            let idx = position_index(names, *pos)?;
            Ok(vec![names[idx].clone()])
        }
        Selector::Between(first, last) => {
            let start = single_index(names, first)?;
            let end = single_index(names, last)?;
            if start > end {
                return Ok(Vec::new());
            }
            Ok(names[start..=end].to_vec())
        }
        Selector::Not(inner) => {
            let excluded: BTreeSet<String> = resolve_selector(names, inner)?.into_iter().collect();
            Ok(names
                .iter()
                .filter(|n| !excluded.contains(*n))
                .cloned()
                .collect())
        }
        Selector::Cols(items) => {
            let mut out: Vec<String> = Vec::new();
            for item in items {
                for name in resolve_selector(names, item)? {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            Ok(out)
        }
    }
}

fn single_index(names: &[String], selector: &Selector) -> Result<usize, BindError> {
    let resolved = resolve_selector(names, selector)?;
    if resolved.len() != 1 {
        return Err(BindError::NotSingleColumn {
            count: resolved.len(),
        });
    }
    names
        .iter()
        .position(|n| *n == resolved[0])
        .ok_or_else(|| BindError::ColumnNotFound {
            name: resolved[0].clone(),
        })
}

fn position_index(names: &[String], pos: i64) -> Result<usize, BindError> {
    if pos < 1 || pos as usize > names.len() {
        return Err(BindError::PositionOutOfRange {
            position: pos,
            count: names.len(),
        });
    }
    Ok(pos as usize - 1)
}
