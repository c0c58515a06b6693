use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("empty formula request")]
    EmptyRequest,
    #[error("invalid expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error("invalid target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("both @astable and an output column name `{target}` were given")]
    AstableTargetConflict { target: String },
    #[error("only one @subset filter expression is allowed, got {count}")]
    MultipleFilters { count: usize },
    #[error("`{entry}` does not accept a @subset filter expression")]
    FilterNotSupported { entry: &'static str },
    #[error("@subset filter expression must directly follow the input table, found at argument {position}")]
    FilterNotFirst { position: usize },
    #[error("@byrow and @bycol cannot both be applied to the same formula")]
    ConflictingModifiers,
    #[error("@passmissing requires row-wise application (@byrow or a row-wise entry point)")]
    PassMissingRequiresByRow,
    #[error("`{entry}` formulas cannot name an output column")]
    TargetNotAllowed { entry: &'static str },
    #[error("unknown annotation `@{name}`")]
    UnknownAnnotation { name: String },
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("column `{name}` not found")]
    ColumnNotFound { name: String },
    #[error("column position {position} out of range for {count} columns")]
    PositionOutOfRange { position: i64, count: usize },
    #[error("single column reference resolved to {count} columns")]
    NotSingleColumn { count: usize },
    #[error("value of kind `{kind}` cannot select columns")]
    InvalidSelector { kind: &'static str },
    #[error("broadcast column groups have mismatched lengths {lhs} and {rhs}")]
    BroadcastLengthMismatch { lhs: usize, rhs: usize },
    #[error("{names} output names given for {invocations} invocations")]
    SinkArity { names: usize, invocations: usize },
    #[error("Invalid string index {index} for {count} column names {names:?}")]
    InvalidStringIndex {
        index: usize,
        count: usize,
        names: Vec<String>,
    },
    #[error("name template produced a non-string value of kind `{kind}`")]
    NonStringName { kind: &'static str },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("unbound variable `{name}`")]
    UnboundVariable { name: String },
    #[error("function `{name}` expects {expected} args, got {actual}")]
    InvalidArity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("`{op}` is not defined for {lhs} and {rhs}")]
    TypeMismatch {
        op: String,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("`{name}` cannot be applied to a value of kind `{kind}`")]
    InvalidArgument { name: String, kind: &'static str },
    #[error("element-wise call over lists of lengths {lhs} and {rhs}")]
    LengthMismatch { lhs: usize, rhs: usize },
    #[error("cannot destructure {actual} values into {expected} targets")]
    DestructureArity { expected: usize, actual: usize },
    #[error("column reference survived lowering and cannot be evaluated")]
    UnloweredColumn,
    #[error("annotation `@{name}` cannot be evaluated")]
    UnexpectedAnnotation { name: String },
    #[error("invalid assignment target")]
    InvalidAssignment,
    #[error("column group at argument {position} has no resolved size")]
    UnresolvedGroup { position: usize },
}
