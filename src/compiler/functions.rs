use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use serde_json::{Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{FunctionCall, QueryContext, SqlToken},
    parser::Token,
};

pub static FUNCTIONS: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::default_function_registry);

/// Lowering rules for one SQL function.
/// Registered once per name; stateless and shareable.
pub trait FunctionImpl: Send + Sync {
    /// Canonical lowercase name ("count", "sum", ...).
    fn name(&self) -> &'static str;

    fn is_aggregate(&self) -> bool {
        true
    }

    /// `FN([DISTINCT] arg)`
    fn classify(&self, args: &[Vec<Token>], ctx: &QueryContext, aliases: bool) -> CompileResult<FunctionCall> {
        let [arg] = args else {
            return ErrorKind::decode(format!("{}() takes exactly one argument", self.name())).err();
        };
        let (distinct, arg) = match arg.split_first() {
            Some((first, rest)) if first.is_keyword("DISTINCT") => (true, rest),
            _ => (false, arg.as_slice()),
        };
        Ok(FunctionCall {
            name: self.name(),
            arg: Some(Box::new(SqlToken::classify_slice(arg, ctx, aliases)?)),
            distinct,
            unit: None,
        })
    }

    /// `$group` accumulator document.
    fn accumulator(&self, call: &FunctionCall) -> CompileResult<Value> {
        ErrorKind::decode(format!("{}() is not an aggregate", call.name)).err()
    }

    /// Post-group expression reading the accumulator back, when it is not the plain value.
    fn finalize(&self, _call: &FunctionCall, _field: &str) -> Option<Value> {
        None
    }

    /// Value for an aggregate over zero rows.
    fn empty_value(&self) -> Value {
        Value::Null
    }

    /// Scalar expression form.
    fn expression(&self, call: &FunctionCall) -> CompileResult<Value> {
        ErrorKind::decode(format!("aggregate {}() used outside of a grouping", call.name)).err()
    }
}

fn arg_expr(call: &FunctionCall) -> CompileResult<Value> {
    match &call.arg {
        Some(arg) => arg.to_expr(),
        None => ErrorKind::decode(format!("{}() needs an argument", call.name)).err(),
    }
}

pub struct CountImpl;

impl FunctionImpl for CountImpl {
    fn name(&self) -> &'static str { "count" }

    fn classify(&self, args: &[Vec<Token>], ctx: &QueryContext, aliases: bool) -> CompileResult<FunctionCall> {
        if matches!(args, [arg] if arg.as_slice() == [Token::Wildcard]) {
            return Ok(FunctionCall { name: self.name(), arg: None, distinct: false, unit: None });
        }
        let [arg] = args else {
            return ErrorKind::decode("COUNT() takes exactly one argument").err();
        };
        let (distinct, arg) = match arg.split_first() {
            Some((first, rest)) if first.is_keyword("DISTINCT") => (true, rest),
            _ => (false, arg.as_slice()),
        };
        Ok(FunctionCall {
            name: self.name(),
            arg: Some(Box::new(SqlToken::classify_slice(arg, ctx, aliases)?)),
            distinct,
            unit: None,
        })
    }

    fn accumulator(&self, call: &FunctionCall) -> CompileResult<Value> {
        if call.arg.is_none() {
            return Ok(json!({"$sum": 1}));
        }
        let expr = arg_expr(call)?;
        if call.distinct {
            return Ok(json!({"$addToSet": expr}));
        }
        // nulls and missing fields are not counted
        Ok(json!({"$sum": {"$cond": {"if": {"$gt": [expr, null]}, "then": 1, "else": 0}}}))
    }

    fn finalize(&self, call: &FunctionCall, field: &str) -> Option<Value> {
        call.distinct.then(|| json!({"$size": {"$setDifference": [format!("${field}"), [null]]}}))
    }

    fn empty_value(&self) -> Value {
        json!(0)
    }
}

/// `$sum`, `$avg`, `$min`, `$max` over one argument.
pub struct SimpleAggregate {
    name: &'static str,
    operator: &'static str,
}

impl SimpleAggregate {
    pub const fn new(name: &'static str, operator: &'static str) -> Self {
        Self { name, operator }
    }
}

impl FunctionImpl for SimpleAggregate {
    fn name(&self) -> &'static str { self.name }

    fn accumulator(&self, call: &FunctionCall) -> CompileResult<Value> {
        if call.distinct {
            return ErrorKind::not_supported(format!("{}(DISTINCT ...)", self.name.to_ascii_uppercase())).err();
        }
        Ok(json!({ self.operator: arg_expr(call)? }))
    }
}

pub struct DateTruncImpl;

impl DateTruncImpl {
    pub fn format(unit: &str) -> Option<&'static str> {
        Some(match unit {
            "year" => "%Y-01-01",
            "month" => "%Y-%m-01",
            "day" => "%Y-%m-%d",
            "hour" => "%Y-%m-%dT%H:00:00",
            "minute" => "%Y-%m-%dT%H:%M:00",
            "second" => "%Y-%m-%dT%H:%M:%S",
            _ => return None,
        })
    }
}

impl FunctionImpl for DateTruncImpl {
    fn name(&self) -> &'static str { "date_trunc" }

    fn is_aggregate(&self) -> bool {
        false
    }

    fn classify(&self, args: &[Vec<Token>], ctx: &QueryContext, aliases: bool) -> CompileResult<FunctionCall> {
        let [unit, column] = args else {
            return ErrorKind::decode("DATE_TRUNC() takes a unit and a column").err();
        };
        let unit = match SqlToken::classify_slice(unit, ctx, aliases)?.constant() {
            Some(Value::String(unit)) => unit.to_ascii_lowercase(),
            _ => return ErrorKind::decode("DATE_TRUNC() unit must be a string").err(),
        };
        if Self::format(&unit).is_none() {
            return ErrorKind::not_supported(format!("DATE_TRUNC unit '{unit}'")).err();
        }
        Ok(FunctionCall {
            name: self.name(),
            arg: Some(Box::new(SqlToken::classify_slice(column, ctx, aliases)?)),
            distinct: false,
            unit: Some(unit),
        })
    }

    fn expression(&self, call: &FunctionCall) -> CompileResult<Value> {
        let unit = call.unit.as_deref().unwrap_or_default();
        let format = Self::format(unit)
            .ok_or_else(|| ErrorKind::not_supported(format!("DATE_TRUNC unit '{unit}'")))?;
        Ok(json!({"$dateFromString": {
            "dateString": {"$dateToString": {"format": format, "date": arg_expr(call)?}}
        }}))
    }
}

/// Case-insensitive registry of the functions the compiler can lower.
#[derive(Default)]
pub struct FunctionRegistry {
    by_name: HashMap<String, Arc<dyn FunctionImpl>>,
}

impl FunctionRegistry {
    pub fn new() -> Self { Self { by_name: HashMap::new() } }

    pub fn register<I: FunctionImpl + 'static>(&mut self, impl_: I) {
        self.by_name.insert(impl_.name().to_string(), Arc::new(impl_));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionImpl>> {
        self.by_name.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut v: Vec<_> = self.by_name.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn default_function_registry() -> Self {
        let mut registry = Self::new();
        registry.register(CountImpl);
        registry.register(SimpleAggregate::new("sum", "$sum"));
        registry.register(SimpleAggregate::new("avg", "$avg"));
        registry.register(SimpleAggregate::new("min", "$min"));
        registry.register(SimpleAggregate::new("max", "$max"));
        registry.register(DateTruncImpl);
        registry
    }
}
