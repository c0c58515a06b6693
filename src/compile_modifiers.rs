use crate::compile_expr::ExprAst;
use crate::error::CompileError;
use crate::types::ApplicationMode;
use serde::Serialize;
use std::collections::HashMap;

/// Wrapper annotations collected from a formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModifierSet {
    pub byrow: bool,
    pub bycol: bool,
    pub passmissing: bool,
    pub astable: bool,
}

impl ModifierSet {
    pub fn is_modifier(name: &str) -> bool {
        matches!(name, "byrow" | "bycol" | "passmissing" | "astable")
    }

    fn insert(&mut self, name: &str) {
        match name {
            "byrow" => self.byrow = true,
            "bycol" => self.bycol = true,
            "passmissing" => self.passmissing = true,
            "astable" => self.astable = true,
            _ => {}
        }
    }

    /// Union of both sets; used when block statements inherit outer modifiers.
    pub const fn merge(self, other: Self) -> Self {
        Self {
            byrow: self.byrow || other.byrow,
            bycol: self.bycol || other.bycol,
            passmissing: self.passmissing || other.passmissing,
            astable: self.astable || other.astable,
        }
    }

    /// Application mode after applying `@byrow`/`@bycol` over the entry default.
    pub fn resolve_mode(&self, default: ApplicationMode) -> Result<ApplicationMode, CompileError> {
        match (self.byrow, self.bycol) {
            (true, true) => Err(CompileError::ConflictingModifiers),
            (true, false) => Ok(ApplicationMode::ByRow),
            (false, true) => Ok(ApplicationMode::ByColumn),
            (false, false) => Ok(default),
        }
    }
}

/// Unwraps stacked modifier annotations from the outside in.
///
/// Modifiers wrapping the value of a top-level assignment are collected too,
/// so `:y = @byrow f(:x)` and `@byrow :y = f(:x)` are equivalent. Any other
/// node, including unknown annotations, ends the descent unchanged.
pub fn extract_modifiers(expr: &ExprAst) -> (ModifierSet, ExprAst) {
    let mut mods = ModifierSet::default();
    let inner = strip_modifiers(expr, &mut mods);
    (mods, inner)
}

fn strip_modifiers(expr: &ExprAst, mods: &mut ModifierSet) -> ExprAst {
    match expr {
        ExprAst::Annotated { name, args } if args.len() == 1 && ModifierSet::is_modifier(name) => {
            mods.insert(name);
            strip_modifiers(&args[0], mods)
        }
        ExprAst::Assign { target, value } => ExprAst::Assign {
            target: target.clone(),
            value: Box::new(strip_modifiers(value, mods)),
        },
        other => other.clone(),
    }
}

/// Issues synthetic variable ids. One generator per compilation call.
#[derive(Debug, Default)]
pub struct FreshIds {
    next: u32,
}

impl FreshIds {
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstableRewrite {
    /// Rewritten statements followed by the closing record literal.
    pub body: ExprAst,
    /// Output names in first-assignment order.
    pub fields: Vec<String>,
}

/// Rewrites column-name assignments of an `@astable` body into internal
/// variables and appends a record literal exposing their final values.
///
/// Assigning the same name twice reuses its variable. References to a name
/// that appear after its first assignment read the variable, not the column.
pub fn rewrite_astable(expr: &ExprAst, ids: &mut FreshIds) -> Result<AstableRewrite, CompileError> {
    let statements: Vec<&ExprAst> = match expr {
        ExprAst::Block(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut locals: HashMap<String, u32> = HashMap::new();
    let mut fields: Vec<String> = Vec::new();
    let mut rewritten = Vec::with_capacity(statements.len() + 1);

    for stmt in statements {
        let ExprAst::Assign { target, value } = stmt else {
            rewritten.push(replace_locals(stmt, &locals)?);
            continue;
        };
        let Some(names) = target_names(target) else {
            rewritten.push(replace_locals(stmt, &locals)?);
            continue;
        };
        // The value is read before the target is (re)bound.
        let value = replace_locals(value, &locals)?;
        let mut slots = Vec::with_capacity(names.len());
        for name in names {
            let id = match locals.get(&name) {
                Some(id) => *id,
                None => {
                    let id = ids.next_id();
                    locals.insert(name.clone(), id);
                    fields.push(name);
                    id
                }
            };
            slots.push(ExprAst::Local(id));
        }
        let target = match target.as_ref() {
            ExprAst::Tuple(_) => ExprAst::Tuple(slots),
            _ => slots.remove(0),
        };
        rewritten.push(ExprAst::Assign {
            target: Box::new(target),
            value: Box::new(value),
        });
    }

    rewritten.push(ExprAst::Record(
        fields
            .iter()
            .map(|name| (name.clone(), ExprAst::Local(locals[name])))
            .collect(),
    ));
    Ok(AstableRewrite {
        body: ExprAst::Block(rewritten),
        fields,
    })
}

fn literal_name(expr: &ExprAst) -> Option<&str> {
    match expr {
        ExprAst::Symbol(name) => Some(name),
        ExprAst::Dollar(inner) => match inner.as_ref() {
            ExprAst::Str(name) | ExprAst::Symbol(name) => Some(name),
            _ => None,
        },
        _ => None,
    }
}

fn target_names(target: &ExprAst) -> Option<Vec<String>> {
    match target {
        ExprAst::Tuple(items) => items
            .iter()
            .map(|item| literal_name(item).map(str::to_string))
            .collect(),
        other => literal_name(other).map(|name| vec![name.to_string()]),
    }
}

fn replace_locals(expr: &ExprAst, locals: &HashMap<String, u32>) -> Result<ExprAst, CompileError> {
    if let Some(id) = literal_name(expr).and_then(|name| locals.get(name)) {
        return Ok(ExprAst::Local(*id));
    }
    match expr {
        ExprAst::Escape(_) | ExprAst::Path(_) | ExprAst::Dollar(_) | ExprAst::Braced { .. } => {
            Ok(expr.clone())
        }
        ExprAst::Assign { target, value } => Ok(ExprAst::Assign {
            target: target.clone(),
            value: Box::new(replace_locals(value, locals)?),
        }),
        _ => expr.try_map_children(|child| replace_locals(child, locals)),
    }
}
