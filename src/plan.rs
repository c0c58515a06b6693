use crate::compile_expr::ExprAst;
use crate::types::{ApplicationMode, EntryPoint};
use serde::Serialize;

/// Column reference found in a formula. Equality is structural.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnRef {
    Name(String),
    /// 1-based.
    Position(i64),
    /// `$x` / `$(expr)`: evaluates to a single column identifier.
    Dynamic(ExprAst),
    /// `{sel}`: one call per matched column.
    Broadcast(ExprAst),
    /// `{{sel}}`: one call receiving every matched column as a tuple.
    Aggregate(ExprAst),
}

impl ColumnRef {
    #[inline]
    pub const fn is_multi(&self) -> bool {
        matches!(self, Self::Broadcast(_) | Self::Aggregate(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupKind {
    Broadcast,
    Aggregate,
}

/// Source position handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Source {
    Column(ColumnRef),
    /// Multi-column selector left opaque until bound against the live column set.
    Deferred { selector: ExprAst, kind: GroupKind },
}

impl Source {
    pub fn from_ref(column: ColumnRef) -> Self {
        match column {
            ColumnRef::Broadcast(selector) => Self::Deferred {
                selector,
                kind: GroupKind::Broadcast,
            },
            ColumnRef::Aggregate(selector) => Self::Deferred {
                selector,
                kind: GroupKind::Aggregate,
            },
            other => Self::Column(other),
        }
    }

    #[inline]
    pub const fn group_kind(&self) -> Option<GroupKind> {
        match self {
            Self::Deferred { kind, .. } => Some(*kind),
            Self::Column(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArityEntry {
    Scalar,
    /// Group of `size` columns; `None` until bound.
    Group {
        kind: GroupKind,
        size: Option<usize>,
    },
}

/// One entry per source describing how flattened runtime arguments regroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArityMap {
    pub entries: Vec<ArityEntry>,
}

impl ArityMap {
    pub fn from_sources(sources: &[Source]) -> Self {
        Self {
            entries: sources
                .iter()
                .map(|source| match source.group_kind() {
                    Some(kind) => ArityEntry::Group { kind, size: None },
                    None => ArityEntry::Scalar,
                })
                .collect(),
        }
    }

    /// Number of flattened arguments a call expects, once every group is sized.
    pub fn flat_len(&self) -> Option<usize> {
        self.entries.iter().try_fold(0, |acc, entry| match entry {
            ArityEntry::Scalar => Some(acc + 1),
            ArityEntry::Group { size, .. } => size.map(|size| acc + size),
        })
    }
}

/// Function object of a compiled formula, kept as data so it can be
/// serialized and interpreted by [`crate::runtime::Runtime`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FormulaFn {
    /// Bare column reference passed through unchanged.
    Identity,
    /// Simple call: the callee itself, arguments are the sources in order.
    Named(String),
    /// Synthesized closure over `params` positional parameters.
    Closure { params: usize, body: ExprAst },
    /// Regroups flattened arguments according to `arity` before calling `inner`.
    Regroup {
        arity: ArityMap,
        inner: Box<FormulaFn>,
    },
    /// Returns missing without calling `inner` when any argument is missing.
    PassMissing(Box<FormulaFn>),
}

impl FormulaFn {
    /// Name used by default output naming.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Identity => "identity",
            Self::Named(name) => name,
            Self::Closure { .. } => "function",
            Self::Regroup { inner, .. } | Self::PassMissing(inner) => inner.display_name(),
        }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            Self::Identity => true,
            Self::Regroup { inner, .. } | Self::PassMissing(inner) => inner.is_identity(),
            _ => false,
        }
    }

    /// Copy with every regroup wrapper carrying the given arity.
    pub fn with_arity(&self, arity: &ArityMap) -> Self {
        match self {
            Self::Regroup { inner, .. } => Self::Regroup {
                arity: arity.clone(),
                inner: inner.clone(),
            },
            Self::PassMissing(inner) => Self::PassMissing(Box::new(inner.with_arity(arity))),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TemplatePart {
    Text(String),
    /// 1-based index into the resolved source names.
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NameTemplate {
    /// String with `{}` / `{n}` placeholders.
    Interpolated(Vec<TemplatePart>),
    /// General expression; placeholder `n` became `Param(n - 1)`.
    Expression { body: ExprAst, max_index: usize },
}

impl NameTemplate {
    pub fn max_index(&self) -> usize {
        match self {
            Self::Interpolated(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    TemplatePart::Index(idx) => Some(*idx),
                    TemplatePart::Text(_) => None,
                })
                .max()
                .unwrap_or(0),
            Self::Expression { max_index, .. } => *max_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SinkDescriptor {
    /// Executor default naming.
    Default,
    Static(Vec<String>),
    Template(NameTemplate),
    /// Split a record result into one column per field.
    ExpandRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledFormula {
    pub sources: Vec<Source>,
    pub function: FormulaFn,
    pub sink: SinkDescriptor,
    pub mode: ApplicationMode,
}

/// View-producing filter stage preceding the transform of a mutating entry point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetStage {
    /// Column-wise boolean predicates, combined with logical and.
    pub predicates: Vec<CompiledFormula>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPipeline {
    pub entry: EntryPoint,
    pub subset: Option<SubsetStage>,
    pub formulas: Vec<CompiledFormula>,
    /// `@kwarg` pairs forwarded verbatim to the executor.
    pub kwargs: Vec<(String, ExprAst)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileManifest {
    /// Number of formulas produced (after block expansion).
    pub formula_count: usize,
    pub source_count: usize,
    /// Formulas lowered to their callee without a closure.
    pub simple_call_count: usize,
    pub closure_count: usize,
    /// Sources deferred as multi-column groups.
    pub multi_column_count: usize,
    pub astable_count: usize,
    pub predicate_count: usize,
    /// End-to-end compile latency in microseconds.
    pub compile_time_us: u64,
}

impl CompileManifest {
    #[inline]
    pub fn summary_line(&self) -> String {
        format!(
            "formulas={} sources={} simple_calls={} closures={} multi_cols={} astable={} predicates={} compile_us={}",
            self.formula_count,
            self.source_count,
            self.simple_call_count,
            self.closure_count,
            self.multi_column_count,
            self.astable_count,
            self.predicate_count,
            self.compile_time_us
        )
    }
}

/// Resolved output of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SinkTarget {
    Names(Vec<String>),
    ExpandRecord,
}

/// One executor call: concrete argument columns, the function to call with the
/// flattened column values, and where the result lands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    /// Resolved column names per source position (one name for scalars).
    pub args: Vec<Vec<String>>,
    pub arity: ArityMap,
    pub function: FormulaFn,
    pub sink: SinkTarget,
    pub mode: ApplicationMode,
}

impl Invocation {
    /// Column names in the flattened argument order.
    pub fn flat_columns(&self) -> Vec<&str> {
        self.args
            .iter()
            .flat_map(|names| names.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundPipeline {
    pub entry: EntryPoint,
    pub subset: Option<Vec<Invocation>>,
    pub invocations: Vec<Invocation>,
    pub kwargs: Vec<(String, ExprAst)>,
}
