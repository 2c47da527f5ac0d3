//! Expression evaluator
//!
//! Evaluates expressions against a [`Scope`]. Expressions become [`Value`]s,
//! not strings — turning values into markup is the interpreter's job.

use miette::Result;
use std::collections::HashMap;

use super::ast::*;
use crate::error::{
    TemplateSource, TypeError, UndefinedError, UnknownFieldError, UnknownFilterError,
    UnknownFragmentError,
};
use crate::text;

/// A runtime value in a template
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Dict(HashMap<String, Value>),
    /// A "safe" value that must not be escaped again when rendered
    Safe(Box<Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Safe(inner) => inner.is_truthy(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Safe(inner) => inner.type_name(),
        }
    }

    pub fn render_to_string(&self) -> String {
        match self {
            Value::None => "".to_string(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::List(l) => {
                let items: Vec<_> = l.iter().map(|v| v.render_to_string()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Dict(_) => "[object]".to_string(),
            Value::Safe(inner) => inner.render_to_string(),
        }
    }

    /// Check if this value is marked as safe (already markup)
    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_))
    }
}

// Convenience conversions for common types
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// A host function callable from templates
pub type GlobalFn = Box<dyn Fn(&[Value], &[(String, Value)]) -> Result<Value>>;

/// Resolver for calls the scope doesn't know — fragments plug in here.
pub trait CallOutlet {
    /// Resolve a named call; `None` means the name is unknown to this outlet
    fn call(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Option<Result<Value>>;
}

/// Variable environment for one render (scope stack + host functions)
#[derive(Clone)]
pub struct Scope {
    /// Variable scopes (innermost last)
    scopes: Vec<HashMap<String, Value>>,
    /// Host functions available in this scope (shared via Rc)
    global_fns: std::rc::Rc<HashMap<String, std::rc::Rc<GlobalFn>>>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("scopes", &self.scopes)
            .field(
                "global_fns",
                &format!("<{} functions>", self.global_fns.len()),
            )
            .finish()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            global_fns: std::rc::Rc::new(HashMap::new()),
        }
    }

    /// Register a host function
    pub fn register_fn(&mut self, name: impl Into<String>, f: GlobalFn) {
        let fns = std::rc::Rc::make_mut(&mut self.global_fns);
        fns.insert(name.into(), std::rc::Rc::new(f));
    }

    /// Call a host function by name
    pub fn call_fn(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Option<Result<Value>> {
        self.global_fns.get(name).map(|f| f(args, kwargs))
    }

    /// Set a variable in the current scope
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Get a variable (searches all scopes)
    pub fn get(&self, name: &str) -> Option<&Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Some(value);
            }
        }
        None
    }

    /// Get all variable names (for error messages)
    pub fn available_vars(&self) -> Vec<String> {
        let mut vars: Vec<_> = self.scopes.iter().flat_map(|s| s.keys().cloned()).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Push a new scope
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pop the innermost scope
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Expression evaluator
pub struct Evaluator<'a> {
    scope: &'a Scope,
    source: &'a TemplateSource,
    outlet: Option<&'a dyn CallOutlet>,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a Scope, source: &'a TemplateSource) -> Self {
        Self {
            scope,
            source,
            outlet: None,
        }
    }

    /// Route unknown calls through `outlet` (fragment invocation)
    pub fn with_outlet(mut self, outlet: &'a dyn CallOutlet) -> Self {
        self.outlet = Some(outlet);
        self
    }

    /// Evaluate an expression to a value
    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => self.eval_literal(lit),
            Expr::Var(ident) => self.eval_var(ident),
            Expr::Field(field) => self.eval_field(field),
            Expr::Index(index) => self.eval_index(index),
            Expr::Filter(filter) => self.eval_filter(filter),
            Expr::Binary(binary) => self.eval_binary(binary),
            Expr::Unary(unary) => self.eval_unary(unary),
            Expr::Call(call) => self.eval_call(call),
            Expr::Ternary(ternary) => self.eval_ternary(ternary),
        }
    }

    fn eval_literal(&self, lit: &Literal) -> Result<Value> {
        Ok(match lit {
            Literal::None(_) => Value::None,
            Literal::Bool(b) => Value::Bool(b.value),
            Literal::Int(i) => Value::Int(i.value),
            Literal::Float(f) => Value::Float(f.value),
            Literal::String(s) => Value::String(s.value.clone()),
            Literal::List(l) => {
                let elements: Result<Vec<_>> = l.elements.iter().map(|e| self.eval(e)).collect();
                Value::List(elements?)
            }
            Literal::Dict(d) => {
                let mut map = HashMap::new();
                for (k, v) in &d.entries {
                    let key = self.eval(k)?.render_to_string();
                    let value = self.eval(v)?;
                    map.insert(key, value);
                }
                Value::Dict(map)
            }
        })
    }

    fn eval_var(&self, ident: &Ident) -> Result<Value> {
        self.scope.get(&ident.name).cloned().ok_or_else(|| {
            UndefinedError {
                name: ident.name.clone(),
                available: self.scope.available_vars(),
                span: ident.span,
                src: self.source.named_source(),
            }
            .into()
        })
    }

    fn eval_field(&self, field: &FieldExpr) -> Result<Value> {
        let base = self.eval(&field.base)?;

        match &base {
            Value::Dict(map) => map.get(&field.field.name).cloned().ok_or_else(|| {
                UnknownFieldError {
                    base_type: "dict".to_string(),
                    field: field.field.name.clone(),
                    known_fields: map.keys().cloned().collect(),
                    span: field.field.span,
                    src: self.source.named_source(),
                }
                .into()
            }),
            _ => Err(TypeError {
                expected: "dict".to_string(),
                found: base.type_name().to_string(),
                context: "field access".to_string(),
                span: field.base.span(),
                src: self.source.named_source(),
            })?,
        }
    }

    fn eval_index(&self, index: &IndexExpr) -> Result<Value> {
        let base = self.eval(&index.base)?;
        let idx = self.eval(&index.index)?;

        match (&base, &idx) {
            (Value::List(list), Value::Int(i)) => {
                let i = if *i < 0 {
                    (list.len() as i64 + *i) as usize
                } else {
                    *i as usize
                };
                list.get(i).cloned().ok_or_else(|| {
                    TypeError {
                        expected: format!("index < {}", list.len()),
                        found: format!("index {i}"),
                        context: "list index".to_string(),
                        span: index.index.span(),
                        src: self.source.named_source(),
                    }
                    .into()
                })
            }
            (Value::Dict(map), Value::String(key)) => map.get(key).cloned().ok_or_else(|| {
                UnknownFieldError {
                    base_type: "dict".to_string(),
                    field: key.clone(),
                    known_fields: map.keys().cloned().collect(),
                    span: index.index.span(),
                    src: self.source.named_source(),
                }
                .into()
            }),
            (Value::String(s), Value::Int(i)) => {
                let i = if *i < 0 {
                    (s.chars().count() as i64 + *i) as usize
                } else {
                    *i as usize
                };
                s.chars()
                    .nth(i)
                    .map(|c| Value::String(c.to_string()))
                    .ok_or_else(|| {
                        TypeError {
                            expected: format!("index < {}", s.len()),
                            found: format!("index {i}"),
                            context: "string index".to_string(),
                            span: index.index.span(),
                            src: self.source.named_source(),
                        }
                        .into()
                    })
            }
            _ => Err(TypeError {
                expected: "list, dict, or string".to_string(),
                found: base.type_name().to_string(),
                context: "index access".to_string(),
                span: index.base.span(),
                src: self.source.named_source(),
            })?,
        }
    }

    fn eval_filter(&self, filter: &FilterExpr) -> Result<Value> {
        let value = self.eval(&filter.expr)?;
        let args: Result<Vec<_>> = filter.args.iter().map(|a| self.eval(a)).collect();
        let args = args?;

        let kwargs: Result<Vec<(String, Value)>> = filter
            .kwargs
            .iter()
            .map(|(ident, expr)| Ok((ident.name.clone(), self.eval(expr)?)))
            .collect();
        let kwargs = kwargs?;

        apply_filter(
            &filter.filter.name,
            value,
            &args,
            &kwargs,
            filter.filter.span,
            self.source,
        )
    }

    fn eval_binary(&self, binary: &BinaryExpr) -> Result<Value> {
        // Short-circuit for and/or
        match binary.op {
            BinaryOp::And => {
                let left = self.eval(&binary.left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(&binary.right);
            }
            BinaryOp::Or => {
                let left = self.eval(&binary.left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(&binary.right);
            }
            _ => {}
        }

        let left = self.eval(&binary.left)?;
        let right = self.eval(&binary.right)?;

        Ok(match binary.op {
            BinaryOp::Add => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 + b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f64),
                (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
                (Value::List(a), Value::List(b)) => {
                    let mut result = a.clone();
                    result.extend(b.clone());
                    Value::List(result)
                }
                _ => Value::None,
            },
            BinaryOp::Sub => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a - b),
                (Value::Float(a), Value::Float(b)) => Value::Float(a - b),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 - b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a - *b as f64),
                _ => Value::None,
            },
            BinaryOp::Mul => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a * b),
                (Value::Float(a), Value::Float(b)) => Value::Float(a * b),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 * b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a * *b as f64),
                (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
                    Value::String(s.repeat((*n).max(0) as usize))
                }
                _ => Value::None,
            },
            BinaryOp::Div => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) if *b != 0 => Value::Float(*a as f64 / *b as f64),
                (Value::Float(a), Value::Float(b)) if *b != 0.0 => Value::Float(a / b),
                (Value::Int(a), Value::Float(b)) if *b != 0.0 => Value::Float(*a as f64 / b),
                (Value::Float(a), Value::Int(b)) if *b != 0 => Value::Float(a / *b as f64),
                _ => Value::None,
            },
            BinaryOp::FloorDiv => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) if *b != 0 => Value::Int(a / b),
                _ => Value::None,
            },
            BinaryOp::Mod => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) if *b != 0 => Value::Int(a % b),
                _ => Value::None,
            },
            BinaryOp::Pow => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) if *b >= 0 => Value::Int(a.pow(*b as u32)),
                (Value::Float(a), Value::Float(b)) => Value::Float(a.powf(*b)),
                (Value::Int(a), Value::Float(b)) => Value::Float((*a as f64).powf(*b)),
                (Value::Float(a), Value::Int(b)) => Value::Float(a.powi(*b as i32)),
                _ => Value::None,
            },
            BinaryOp::Eq => Value::Bool(values_equal(&left, &right)),
            BinaryOp::Ne => Value::Bool(!values_equal(&left, &right)),
            BinaryOp::Lt => Value::Bool(
                compare_values(&left, &right)
                    .map(|o| o.is_lt())
                    .unwrap_or(false),
            ),
            BinaryOp::Le => Value::Bool(
                compare_values(&left, &right)
                    .map(|o| o.is_le())
                    .unwrap_or(false),
            ),
            BinaryOp::Gt => Value::Bool(
                compare_values(&left, &right)
                    .map(|o| o.is_gt())
                    .unwrap_or(false),
            ),
            BinaryOp::Ge => Value::Bool(
                compare_values(&left, &right)
                    .map(|o| o.is_ge())
                    .unwrap_or(false),
            ),
            BinaryOp::In => Value::Bool(value_in(&left, &right)),
            BinaryOp::NotIn => Value::Bool(!value_in(&left, &right)),
            BinaryOp::Concat => Value::String(format!(
                "{}{}",
                left.render_to_string(),
                right.render_to_string()
            )),
            BinaryOp::And | BinaryOp::Or => unreachable!(), // Handled above
        })
    }

    fn eval_unary(&self, unary: &UnaryExpr) -> Result<Value> {
        let value = self.eval(&unary.expr)?;

        Ok(match unary.op {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Neg => match value {
                Value::Int(i) => Value::Int(-i),
                Value::Float(f) => Value::Float(-f),
                _ => Value::None,
            },
            UnaryOp::Pos => match value {
                Value::Int(i) => Value::Int(i),
                Value::Float(f) => Value::Float(f),
                _ => Value::None,
            },
        })
    }

    fn eval_call(&self, call: &CallExpr) -> Result<Value> {
        let args: Vec<Value> = call
            .args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>>>()?;

        let kwargs: Vec<(String, Value)> = call
            .kwargs
            .iter()
            .map(|(ident, expr)| Ok((ident.name.clone(), self.eval(expr)?)))
            .collect::<Result<Vec<_>>>()?;

        let Expr::Var(ident) = &*call.func else {
            return Err(TypeError {
                expected: "a callable name".to_string(),
                found: "expression".to_string(),
                context: "call".to_string(),
                span: call.func.span(),
                src: self.source.named_source(),
            })?;
        };

        // Host functions shadow fragments
        if let Some(result) = self.scope.call_fn(&ident.name, &args, &kwargs) {
            return result;
        }

        if let Some(outlet) = self.outlet {
            if let Some(result) = outlet.call(&ident.name, &args, &kwargs) {
                return result;
            }
        }

        Err(UnknownFragmentError {
            name: ident.name.clone(),
            span: call.span,
            src: self.source.named_source(),
        })?
    }

    fn eval_ternary(&self, ternary: &TernaryExpr) -> Result<Value> {
        let condition = self.eval(&ternary.condition)?;
        if condition.is_truthy() {
            self.eval(&ternary.value)
        } else {
            self.eval(&ternary.otherwise)
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Safe(a), b) => values_equal(a, b),
        (a, Value::Safe(b)) => values_equal(a, b),
        _ => false,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn value_in(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::List(list) => list.iter().any(|v| values_equal(needle, v)),
        Value::Dict(map) => {
            if let Value::String(key) = needle {
                map.contains_key(key)
            } else {
                false
            }
        }
        Value::String(s) => {
            if let Value::String(sub) = needle {
                s.contains(sub.as_str())
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Apply a built-in filter
fn apply_filter(
    name: &str,
    value: Value,
    args: &[Value],
    kwargs: &[(String, Value)],
    span: miette::SourceSpan,
    source: &TemplateSource,
) -> Result<Value> {
    let known_filters = vec![
        "upper",
        "lower",
        "capitalize",
        "title",
        "trim",
        "length",
        "first",
        "last",
        "join",
        "default",
        "escape",
        "safe",
        "truncate",
        "urlize",
        "enrich",
    ];

    let get_kwarg =
        |key: &str| -> Option<&Value> { kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v) };

    Ok(match name {
        "upper" => Value::String(value.render_to_string().to_uppercase()),
        "lower" => Value::String(value.render_to_string().to_lowercase()),
        "capitalize" => {
            let s = value.render_to_string();
            let mut chars = s.chars();
            match chars.next() {
                None => Value::String(String::new()),
                Some(first) => Value::String(first.to_uppercase().chain(chars).collect()),
            }
        }
        "title" => Value::String(text::capitalize(&value.render_to_string())),
        "trim" => Value::String(value.render_to_string().trim().to_string()),
        "length" => match &value {
            Value::String(s) => Value::Int(s.chars().count() as i64),
            Value::List(l) => Value::Int(l.len() as i64),
            Value::Dict(d) => Value::Int(d.len() as i64),
            _ => Value::Int(0),
        },
        "first" => match value {
            Value::List(mut l) if !l.is_empty() => l.remove(0),
            Value::String(s) => s
                .chars()
                .next()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::None),
            _ => Value::None,
        },
        "last" => match value {
            Value::List(mut l) if !l.is_empty() => l.pop().unwrap_or(Value::None),
            Value::String(s) => s
                .chars()
                .last()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::None),
            _ => Value::None,
        },
        "join" => {
            let sep = args
                .first()
                .map(|v| v.render_to_string())
                .unwrap_or_default();
            match value {
                Value::List(l) => {
                    let strings: Vec<_> = l.iter().map(|v| v.render_to_string()).collect();
                    Value::String(strings.join(&sep))
                }
                _ => value,
            }
        }
        "default" => {
            // Positional default("x") or kwarg default(value="x")
            let default_val = get_kwarg("value")
                .cloned()
                .or_else(|| args.first().cloned())
                .unwrap_or(Value::None);

            if matches!(value, Value::None) || (matches!(&value, Value::String(s) if s.is_empty()))
            {
                default_val
            } else {
                value
            }
        }
        "escape" => Value::String(text::escape(&value.render_to_string())),
        "safe" => Value::Safe(Box::new(value)),
        "truncate" => {
            let limit = match args.first() {
                Some(Value::Int(n)) if *n > 0 => *n as usize,
                _ => 80,
            };
            Value::String(text::truncate(&value.render_to_string(), limit, false))
        }
        "urlize" => Value::Safe(Box::new(Value::String(text::urlize(
            &value.render_to_string(),
            &[],
        )))),
        "enrich" => Value::Safe(Box::new(Value::String(text::enrich(
            &value.render_to_string(),
        )))),
        _ => {
            return Err(UnknownFilterError {
                name: name.to_string(),
                known_filters: known_filters.into_iter().map(String::from).collect(),
                span,
                src: source.named_source(),
            }
            .into());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_expression;
    use super::*;

    fn eval_str(src: &str, scope: &Scope) -> Result<Value> {
        let source = TemplateSource::new("test", src);
        let end = source.source.len();
        let expr = parse_expression(&source, 0, end)?;
        Evaluator::new(scope, &source).eval(&expr)
    }

    #[test]
    fn test_arithmetic() {
        let scope = Scope::new();
        let v = eval_str("1 + 2 * 3", &scope).unwrap();
        assert!(matches!(v, Value::Int(7)));
    }

    #[test]
    fn test_var_lookup() {
        let mut scope = Scope::new();
        scope.set("name", Value::from("Alice"));
        let v = eval_str("name", &scope).unwrap();
        assert_eq!(v.render_to_string(), "Alice");
    }

    #[test]
    fn test_undefined_var() {
        let scope = Scope::new();
        assert!(eval_str("missing", &scope).is_err());
    }

    #[test]
    fn test_field_access() {
        let mut scope = Scope::new();
        let mut user = HashMap::new();
        user.insert("name".to_string(), Value::from("Bob"));
        scope.set("user", Value::Dict(user));
        let v = eval_str("user.name", &scope).unwrap();
        assert_eq!(v.render_to_string(), "Bob");
    }

    #[test]
    fn test_filter_upper() {
        let mut scope = Scope::new();
        scope.set("name", Value::from("alice"));
        let v = eval_str("name | upper", &scope).unwrap();
        assert_eq!(v.render_to_string(), "ALICE");
    }

    #[test]
    fn test_filter_default() {
        let scope = Scope::new();
        let v = eval_str("\"\" | default(\"fallback\")", &scope).unwrap();
        assert_eq!(v.render_to_string(), "fallback");
    }

    #[test]
    fn test_safe_marks_value() {
        let mut scope = Scope::new();
        scope.set("html", Value::from("<b>x</b>"));
        let v = eval_str("html | safe", &scope).unwrap();
        assert!(v.is_safe());
    }

    #[test]
    fn test_ternary() {
        let mut scope = Scope::new();
        scope.set("flag", Value::Bool(false));
        let v = eval_str("\"a\" if flag else \"b\"", &scope).unwrap();
        assert_eq!(v.render_to_string(), "b");
    }

    #[test]
    fn test_host_function() {
        let mut scope = Scope::new();
        scope.register_fn(
            "add",
            Box::new(|args, _kwargs| {
                let (Some(Value::Int(a)), Some(Value::Int(b))) = (args.first(), args.get(1)) else {
                    return Ok(Value::None);
                };
                Ok(Value::Int(a + b))
            }),
        );
        let v = eval_str("add(2, 3)", &scope).unwrap();
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn test_unknown_call_is_error() {
        let scope = Scope::new();
        assert!(eval_str("nope(1)", &scope).is_err());
    }

    #[test]
    fn test_concat() {
        let mut scope = Scope::new();
        scope.set("n", Value::Int(3));
        let v = eval_str("\"page \" ~ n", &scope).unwrap();
        assert_eq!(v.render_to_string(), "page 3");
    }
}
