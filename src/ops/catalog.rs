use crate::error::EvalError;
use crate::ops::{cols, elem, stats, text, BuiltinFn};
use crate::types::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    #[inline]
    pub const fn accepts(self, actual: usize) -> bool {
        match self {
            Self::Exact(n) => actual == n,
            Self::AtLeast(n) => actual >= n,
        }
    }

    #[inline]
    const fn min(self) -> usize {
        match self {
            Self::Exact(n) | Self::AtLeast(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFamily {
    /// Operators and scalar functions lifted element-wise over lists.
    Elementwise,
    /// Reductions over a list or tuple.
    Reduction,
    Text,
    /// Column selector constructors.
    Selector,
    Utility,
}

#[derive(Debug, Clone, Copy)]
pub struct BuiltinMeta {
    /// Callee name as written in formulas; operators use their symbol.
    pub name: &'static str,
    pub arity: Arity,
    pub family: BuiltinFamily,
    pub func: BuiltinFn,
}

impl BuiltinMeta {
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        if !self.arity.accepts(args.len()) {
            return Err(EvalError::InvalidArity {
                name: self.name.to_string(),
                expected: self.arity.min(),
                actual: args.len(),
            });
        }
        (self.func)(args)
    }
}

pub struct BuiltinRegistry;

impl BuiltinRegistry {
    pub fn get(name: &str) -> Option<&'static BuiltinMeta> {
        let index = REGISTRY_INDEX.get_or_init(build_registry_index);
        index.get(name).map(|idx| &BUILTINS[*idx])
    }

    pub fn all() -> &'static [BuiltinMeta] {
        &BUILTINS
    }
}

static REGISTRY_INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();

fn build_registry_index() -> HashMap<&'static str, usize> {
    let mut by_name = HashMap::with_capacity(BUILTINS.len());
    for (idx, meta) in BUILTINS.iter().enumerate() {
        validate_meta(meta);
        if by_name.insert(meta.name, idx).is_some() {
            panic!("duplicate builtin name in registry: {}", meta.name);
        }
    }
    by_name
}

fn validate_meta(meta: &BuiltinMeta) {
    if meta.name.trim().is_empty() {
        panic!("builtin registered with an empty name");
    }
    if meta.family == BuiltinFamily::Reduction && meta.arity != Arity::Exact(1) {
        panic!("reduction `{}` must take exactly one argument", meta.name);
    }
}

const fn elementwise(name: &'static str, arity: usize, func: BuiltinFn) -> BuiltinMeta {
    BuiltinMeta {
        name,
        arity: Arity::Exact(arity),
        family: BuiltinFamily::Elementwise,
        func,
    }
}

const fn reduction(name: &'static str, func: BuiltinFn) -> BuiltinMeta {
    BuiltinMeta {
        name,
        arity: Arity::Exact(1),
        family: BuiltinFamily::Reduction,
        func,
    }
}

const fn builtin(
    name: &'static str,
    arity: Arity,
    family: BuiltinFamily,
    func: BuiltinFn,
) -> BuiltinMeta {
    BuiltinMeta {
        name,
        arity,
        family,
        func,
    }
}

static BUILTINS: [BuiltinMeta; 40] = [
    elementwise("+", 2, elem::add),
    elementwise("-", 2, elem::sub),
    elementwise("*", 2, elem::mul),
    elementwise("/", 2, elem::div),
    elementwise("<", 2, elem::lt),
    elementwise("<=", 2, elem::le),
    elementwise(">", 2, elem::gt),
    elementwise(">=", 2, elem::ge),
    elementwise("==", 2, elem::eq),
    elementwise("!=", 2, elem::ne),
    elementwise("&", 2, elem::and),
    elementwise("|", 2, elem::or),
    elementwise("~", 1, elem::not),
    elementwise("neg", 1, elem::neg),
    elementwise("pos", 1, elem::pos),
    elementwise("abs", 1, elem::abs),
    elementwise("sqrt", 1, elem::sqrt),
    elementwise("exp", 1, elem::exp),
    elementwise("log", 1, elem::log),
    elementwise("min", 2, elem::min),
    elementwise("max", 2, elem::max),
    elementwise("ifelse", 3, elem::ifelse),
    reduction("sum", stats::sum),
    reduction("mean", stats::mean),
    reduction("maximum", stats::maximum),
    reduction("minimum", stats::minimum),
    reduction("length", stats::length),
    reduction("first", stats::first),
    reduction("last", stats::last),
    builtin("string", Arity::AtLeast(0), BuiltinFamily::Text, text::string),
    builtin("uppercase", Arity::Exact(1), BuiltinFamily::Text, text::uppercase),
    builtin("lowercase", Arity::Exact(1), BuiltinFamily::Text, text::lowercase),
    builtin("tuple", Arity::AtLeast(0), BuiltinFamily::Utility, elem::tuple),
    builtin("identity", Arity::Exact(1), BuiltinFamily::Utility, elem::identity),
    builtin("ismissing", Arity::Exact(1), BuiltinFamily::Utility, elem::ismissing),
    builtin("coalesce", Arity::AtLeast(1), BuiltinFamily::Utility, elem::coalesce),
    builtin("All", Arity::Exact(0), BuiltinFamily::Selector, cols::all),
    builtin("Between", Arity::Exact(2), BuiltinFamily::Selector, cols::between),
    builtin("Not", Arity::Exact(1), BuiltinFamily::Selector, cols::not),
    builtin("Cols", Arity::AtLeast(0), BuiltinFamily::Selector, cols::cols),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_panics<F>(f: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        assert!(std::panic::catch_unwind(f).is_err());
    }

    #[test]
    fn registry_index_covers_every_builtin() {
        for meta in BuiltinRegistry::all() {
            let found = BuiltinRegistry::get(meta.name).expect("builtin must be indexed");
            assert_eq!(found.name, meta.name);
        }
        assert!(BuiltinRegistry::get("no_such_fn").is_none());
    }

    #[test]
    fn validate_meta_rejects_variadic_reductions() {
        let mut meta = reduction("bad_sum", stats::sum);
        meta.arity = Arity::AtLeast(1);
        assert_panics(|| validate_meta(&meta));
    }

    #[test]
    fn call_checks_arity_before_dispatch() {
        let sum = BuiltinRegistry::get("sum").expect("sum is registered");
        let err = sum
            .call(&[Value::Int(1), Value::Int(2)])
            .expect_err("sum takes one argument");
        assert!(matches!(
            err,
            EvalError::InvalidArity {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }
}
