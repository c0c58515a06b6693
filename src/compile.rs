use crate::compile_columns::column_ref;
use crate::compile_expr::{parse_expression, ExprAst};
use crate::compile_fn::{materialize, synthesize, FnShape};
use crate::compile_modifiers::{extract_modifiers, rewrite_astable, FreshIds, ModifierSet};
use crate::compile_sink::{apply_template, resolve_sink};
use crate::error::{BindError, CompileError};
use crate::plan::{
    ArityEntry, ArityMap, BoundPipeline, ColumnRef, CompileManifest, CompiledFormula,
    CompiledPipeline, FormulaFn, GroupKind, Invocation, SinkDescriptor, SinkTarget, Source,
    SubsetStage,
};
use crate::runtime::Runtime;
use crate::types::{ApplicationMode, ColumnResolver, EntryPoint, FormulaRequest, Value};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, trace};

pub trait Planner {
    fn compile(
        &self,
        req: &FormulaRequest,
    ) -> Result<(CompiledPipeline, CompileManifest), CompileError>;
    fn bind(
        &self,
        pipeline: &CompiledPipeline,
        columns: &dyn ColumnResolver,
        runtime: &Runtime,
    ) -> Result<BoundPipeline, BindError>;
}

#[derive(Debug, Default)]
pub struct SimplePlanner;

impl Planner for SimplePlanner {
    fn compile(
        &self,
        req: &FormulaRequest,
    ) -> Result<(CompiledPipeline, CompileManifest), CompileError> {
        if req.args.is_empty() {
            return Err(CompileError::EmptyRequest);
        }
        let started_at = Instant::now();

        let mut filters: Vec<(usize, Vec<ExprAst>)> = Vec::new();
        let mut kwargs = Vec::new();
        let mut formula_args = Vec::with_capacity(req.args.len());
        for raw in &req.args {
            match parse_expression(raw)? {
                ExprAst::Annotated { name, args } if name == "subset" => {
                    // Position among filters and formulas; `@kwarg` arguments do not count.
                    let position = filters.len() + formula_args.len();
                    filters.push((position, args));
                }
                ExprAst::Annotated { name, args } if name == "kwarg" => {
                    for arg in args {
                        kwargs.push(parse_kwarg(raw, arg)?);
                    }
                }
                ast => formula_args.push(ast),
            }
        }
        let subset_args = validate_filters(req.entry, filters)?;

        let mut ctx = LowerCtx {
            simple_calls: req.opts.simple_calls,
            ids: FreshIds::default(),
            stats: LowerStats::default(),
        };

        let subset = match subset_args {
            Some(args) => {
                let scope = FormulaScope::subset();
                let mut predicates = Vec::with_capacity(args.len());
                for arg in &args {
                    ctx.lower_argument(arg, scope, &mut predicates)?;
                }
                ctx.stats.predicate_count = predicates.len();
                Some(SubsetStage { predicates })
            }
            None => None,
        };

        let scope = FormulaScope::of(req.entry);
        let mut formulas = Vec::with_capacity(formula_args.len());
        for ast in &formula_args {
            ctx.lower_argument(ast, scope, &mut formulas)?;
        }

        let pipeline = CompiledPipeline {
            entry: req.entry,
            subset,
            formulas,
            kwargs,
        };
        let manifest = CompileManifest {
            formula_count: pipeline.formulas.len(),
            source_count: pipeline.formulas.iter().map(|f| f.sources.len()).sum(),
            simple_call_count: ctx.stats.simple_call_count,
            closure_count: ctx.stats.closure_count,
            multi_column_count: ctx.stats.multi_column_count,
            astable_count: ctx.stats.astable_count,
            predicate_count: ctx.stats.predicate_count,
            compile_time_us: started_at.elapsed().as_micros() as u64,
        };
        if compile_manifest_debug_enabled() {
            info!(entry = req.entry.name(), "{}", manifest.summary_line());
        } else {
            debug!(entry = req.entry.name(), "{}", manifest.summary_line());
        }
        Ok((pipeline, manifest))
    }

    fn bind(
        &self,
        pipeline: &CompiledPipeline,
        columns: &dyn ColumnResolver,
        runtime: &Runtime,
    ) -> Result<BoundPipeline, BindError> {
        let subset = match &pipeline.subset {
            Some(stage) => Some(bind_formulas(&stage.predicates, columns, runtime)?),
            None => None,
        };
        let invocations = bind_formulas(&pipeline.formulas, columns, runtime)?;
        debug!(
            entry = pipeline.entry.name(),
            formulas = pipeline.formulas.len(),
            invocations = invocations.len(),
            columns = columns.column_names().len(),
            "bound formula pipeline"
        );
        Ok(BoundPipeline {
            entry: pipeline.entry,
            subset,
            invocations,
            kwargs: pipeline.kwargs.clone(),
        })
    }
}

#[inline]
fn compile_manifest_debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("FORMULA_ENGINE_COMPILE_DEBUG")
            .ok()
            .map(|raw| {
                let v = raw.trim().to_ascii_lowercase();
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            })
            .unwrap_or(false)
    })
}

fn parse_kwarg(raw: &str, arg: ExprAst) -> Result<(String, ExprAst), CompileError> {
    match arg {
        ExprAst::Assign { target, value } => match *target {
            ExprAst::Identifier(name) => Ok((name, *value)),
            other => Err(CompileError::InvalidExpression {
                expr: raw.to_string(),
                reason: format!("@kwarg name must be an identifier, got `{other}`"),
            }),
        },
        other => Err(CompileError::InvalidExpression {
            expr: raw.to_string(),
            reason: format!("@kwarg expects `name = value`, got `{other}`"),
        }),
    }
}

fn validate_filters(
    entry: EntryPoint,
    mut filters: Vec<(usize, Vec<ExprAst>)>,
) -> Result<Option<Vec<ExprAst>>, CompileError> {
    if filters.len() > 1 {
        return Err(CompileError::MultipleFilters {
            count: filters.len(),
        });
    }
    let Some((position, args)) = filters.pop() else {
        return Ok(None);
    };
    if !entry.supports_subset_filter() {
        return Err(CompileError::FilterNotSupported {
            entry: entry.name(),
        });
    }
    if position != 0 {
        return Err(CompileError::FilterNotFirst { position });
    }
    Ok(Some(args))
}

/// Defaults applied to every formula lowered in one argument list.
#[derive(Debug, Clone, Copy)]
struct FormulaScope {
    name: &'static str,
    default_mode: ApplicationMode,
    accepts_targets: bool,
}

impl FormulaScope {
    const fn of(entry: EntryPoint) -> Self {
        Self {
            name: entry.name(),
            default_mode: entry.default_mode(),
            accepts_targets: entry.accepts_targets(),
        }
    }

    /// Filter predicates are column-wise and unnamed.
    const fn subset() -> Self {
        Self {
            name: "@subset",
            default_mode: ApplicationMode::ByColumn,
            accepts_targets: false,
        }
    }
}

#[derive(Debug, Default)]
struct LowerStats {
    simple_call_count: usize,
    closure_count: usize,
    multi_column_count: usize,
    astable_count: usize,
    predicate_count: usize,
}

struct LowerCtx {
    simple_calls: bool,
    ids: FreshIds,
    stats: LowerStats,
}

impl LowerCtx {
    /// Lowers one top-level argument. A block without `@astable` expands to
    /// one formula per statement, each inheriting the outer modifiers.
    fn lower_argument(
        &mut self,
        ast: &ExprAst,
        scope: FormulaScope,
        out: &mut Vec<CompiledFormula>,
    ) -> Result<(), CompileError> {
        let (mods, inner) = extract_modifiers(ast);
        match inner {
            ExprAst::Block(statements) if !mods.astable => {
                for stmt in &statements {
                    let (stmt_mods, stmt) = extract_modifiers(stmt);
                    out.push(self.lower_formula(stmt, mods.merge(stmt_mods), scope)?);
                }
            }
            inner => out.push(self.lower_formula(inner, mods, scope)?),
        }
        Ok(())
    }

    fn lower_formula(
        &mut self,
        expr: ExprAst,
        mods: ModifierSet,
        scope: FormulaScope,
    ) -> Result<CompiledFormula, CompileError> {
        let (target, body) = split_target(expr, mods.astable)?;
        if target.is_some() && !scope.accepts_targets {
            return Err(CompileError::TargetNotAllowed { entry: scope.name });
        }
        let body = if mods.astable {
            self.stats.astable_count += 1;
            rewrite_astable(&body, &mut self.ids)?.body
        } else {
            body
        };
        if let ExprAst::Annotated { name, .. } = &body {
            return Err(CompileError::UnknownAnnotation { name: name.clone() });
        }

        let mut mode = mods.resolve_mode(scope.default_mode)?;
        let mut synthesized = synthesize(&body, self.simple_calls)?;
        if synthesized.shape == FnShape::ElementwiseCall && mods.bycol {
            // Whole columns in, so the closure keeps the element-wise call.
            synthesized = synthesize(&body, false)?;
        }
        match synthesized.shape {
            FnShape::SimpleCall => self.stats.simple_call_count += 1,
            FnShape::ElementwiseCall => {
                self.stats.simple_call_count += 1;
                // `f.(:x)` lowered to `f` is called once per row.
                mode = ApplicationMode::ByRow;
            }
            FnShape::Closure => self.stats.closure_count += 1,
            FnShape::Identity => {}
        }
        if mods.passmissing && mode != ApplicationMode::ByRow {
            return Err(CompileError::PassMissingRequiresByRow);
        }
        let materialized = materialize(synthesized.sources, synthesized.function);
        self.stats.multi_column_count += materialized
            .sources
            .iter()
            .filter(|s| s.group_kind().is_some())
            .count();
        let function = if mods.passmissing {
            FormulaFn::PassMissing(Box::new(materialized.function))
        } else {
            materialized.function
        };
        let sink = resolve_sink(target.as_ref(), mods.astable)?;
        trace!(
            scope = scope.name,
            body = %body,
            sources = materialized.sources.len(),
            function = function.display_name(),
            ?mode,
            "lowered formula"
        );
        Ok(CompiledFormula {
            sources: materialized.sources,
            function,
            sink,
            mode,
        })
    }
}

/// Separates `target = body`. Under `@astable` a literal-name assignment is
/// itself the body; any other target conflicts with record expansion.
fn split_target(
    expr: ExprAst,
    astable: bool,
) -> Result<(Option<ExprAst>, ExprAst), CompileError> {
    match expr {
        ExprAst::Assign { target, value } => {
            if astable {
                let names_only = match target.as_ref() {
                    ExprAst::Tuple(items) => items.iter().all(is_literal_name),
                    other => is_literal_name(other),
                };
                if names_only && !matches!(value.as_ref(), ExprAst::Block(_)) {
                    return Ok((None, ExprAst::Assign { target, value }));
                }
            }
            Ok((Some(*target), *value))
        }
        body => Ok((None, body)),
    }
}

fn is_literal_name(expr: &ExprAst) -> bool {
    matches!(column_ref(expr), Ok(Some(ColumnRef::Name(_))))
}

enum ResolvedSource {
    Scalar(String),
    Group { kind: GroupKind, names: Vec<String> },
}

fn bind_formulas(
    formulas: &[CompiledFormula],
    columns: &dyn ColumnResolver,
    runtime: &Runtime,
) -> Result<Vec<Invocation>, BindError> {
    let mut out = Vec::with_capacity(formulas.len());
    for formula in formulas {
        let before = out.len();
        bind_formula(formula, columns, runtime, &mut out)?;
        trace!(
            function = formula.function.display_name(),
            invocations = out.len() - before,
            "expanded formula"
        );
    }
    Ok(out)
}

fn bind_formula(
    formula: &CompiledFormula,
    columns: &dyn ColumnResolver,
    runtime: &Runtime,
    out: &mut Vec<Invocation>,
) -> Result<(), BindError> {
    let resolved = formula
        .sources
        .iter()
        .map(|source| resolve_source(source, columns, runtime))
        .collect::<Result<Vec<_>, _>>()?;

    let mut broadcast_len: Option<usize> = None;
    for source in &resolved {
        if let ResolvedSource::Group {
            kind: GroupKind::Broadcast,
            names,
        } = source
        {
            match broadcast_len {
                Some(len) if len != names.len() => {
                    return Err(BindError::BroadcastLengthMismatch {
                        lhs: len,
                        rhs: names.len(),
                    })
                }
                _ => broadcast_len = Some(names.len()),
            }
        }
    }
    let count = broadcast_len.unwrap_or(1);

    // Broadcast groups contribute one column per call; aggregate groups arrive whole.
    let arity = ArityMap {
        entries: resolved
            .iter()
            .map(|source| match source {
                ResolvedSource::Group {
                    kind: GroupKind::Aggregate,
                    names,
                } => ArityEntry::Group {
                    kind: GroupKind::Aggregate,
                    size: Some(names.len()),
                },
                _ => ArityEntry::Scalar,
            })
            .collect(),
    };
    let function = formula.function.with_arity(&arity);

    if let SinkDescriptor::Static(names) = &formula.sink {
        if count != 1 && names.len() != count {
            return Err(BindError::SinkArity {
                names: names.len(),
                invocations: count,
            });
        }
    }

    for idx in 0..count {
        let args: Vec<Vec<String>> = resolved
            .iter()
            .map(|source| match source {
                ResolvedSource::Scalar(name) => vec![name.clone()],
                ResolvedSource::Group {
                    kind: GroupKind::Broadcast,
                    names,
                } => vec![names[idx].clone()],
                ResolvedSource::Group { names, .. } => names.clone(),
            })
            .collect();
        let flat: Vec<String> = args.iter().flatten().cloned().collect();
        let sink = match &formula.sink {
            SinkDescriptor::Default => SinkTarget::Names(vec![default_name(&flat, &function)]),
            SinkDescriptor::Static(names) if count == 1 => SinkTarget::Names(names.clone()),
            SinkDescriptor::Static(names) => SinkTarget::Names(vec![names[idx].clone()]),
            SinkDescriptor::Template(template) => {
                SinkTarget::Names(vec![apply_template(template, &flat, runtime)?])
            }
            SinkDescriptor::ExpandRecord => SinkTarget::ExpandRecord,
        };
        out.push(Invocation {
            args,
            arity: arity.clone(),
            function: function.clone(),
            sink,
            mode: formula.mode,
        });
    }
    Ok(())
}

/// Output name the executor would pick: a bare column keeps its name,
/// anything else joins the inputs with the function name.
fn default_name(flat: &[String], function: &FormulaFn) -> String {
    match flat {
        [single] if function.is_identity() => single.clone(),
        [] => function.display_name().to_string(),
        _ => format!("{}_{}", flat.join("_"), function.display_name()),
    }
}

fn resolve_source(
    source: &Source,
    columns: &dyn ColumnResolver,
    runtime: &Runtime,
) -> Result<ResolvedSource, BindError> {
    let (selector, kind) = match source {
        Source::Deferred { selector, kind } => (selector, *kind),
        Source::Column(ColumnRef::Broadcast(selector)) => (selector, GroupKind::Broadcast),
        Source::Column(ColumnRef::Aggregate(selector)) => (selector, GroupKind::Aggregate),
        Source::Column(column) => return resolve_single(column, columns, runtime),
    };
    let value = runtime.eval(selector, &[])?;
    let names = columns.resolve(&value)?;
    Ok(ResolvedSource::Group { kind, names })
}

fn resolve_single(
    column: &ColumnRef,
    columns: &dyn ColumnResolver,
    runtime: &Runtime,
) -> Result<ResolvedSource, BindError> {
    let value = match column {
        ColumnRef::Name(name) => Value::Str(name.clone()),
        ColumnRef::Position(pos) => Value::Int(*pos),
        ColumnRef::Dynamic(expr) => runtime.eval(expr, &[])?,
        ColumnRef::Broadcast(_) | ColumnRef::Aggregate(_) => {
            return Err(BindError::InvalidSelector { kind: "group" })
        }
    };
    let mut names = columns.resolve(&value)?;
    if names.len() != 1 {
        return Err(BindError::NotSingleColumn { count: names.len() });
    }
    Ok(ResolvedSource::Scalar(names.remove(0)))
}
