//! Built-in operation registry and the global environment.
//!
//! Every primitive the language ships with is declared once in
//! [`BUILTIN_OPS`]: name, implementation kind, and arity. Functions take
//! evaluated arguments; special forms are evaluator callbacks that see
//! their operands raw. Keeping the registry a single flat table makes the
//! dispatch surface easy to audit.
//!
//! ## Numeric behavior
//!
//! Arithmetic and comparisons work over a two-kind numeric tower: `i64`
//! and `f64`. An integer meeting a float promotes the operation to float.
//! Integer operations are checked - overflow is reported, never wrapped -
//! and integer division by zero is an error, while float division by zero
//! yields an IEEE infinity.

use crate::env::Environment;
use crate::evaluator::{
    EvalContext, eval_and, eval_define, eval_if, eval_lambda, eval_or, eval_quote,
};
use crate::value::{Value, type_error};
use crate::EvalError;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::LazyLock;

/// How many arguments an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    /// Check an actual argument count against this arity.
    pub fn validate(&self, got: usize) -> Result<(), EvalError> {
        match *self {
            Arity::Exact(n) if got != n => Err(EvalError::arity(n, got)),
            Arity::AtLeast(n) if got < n => Err(EvalError::arity(n, got)),
            Arity::Range(lo, _) if got < lo => Err(EvalError::arity(lo, got)),
            Arity::Range(_, hi) if got > hi => Err(EvalError::arity(hi, got)),
            _ => Ok(()),
        }
    }
}

/// A primitive function over evaluated arguments.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, EvalError>;

/// A special form: raw operands, the environment, the current depth and
/// the evaluation context.
pub type SpecialFormFn =
    fn(&[Value], &Environment, usize, &EvalContext) -> Result<Value, EvalError>;

/// Implementation of a built-in operation.
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Regular function applied to evaluated arguments.
    Function(BuiltinFn),
    /// Syntax handled by the evaluator with unevaluated operands.
    SpecialForm(SpecialFormFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// One entry of the builtin registry.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    pub name: &'static str,
    pub kind: OpKind,
    pub arity: Arity,
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.kind, OpKind::SpecialForm(_))
    }
}

//
// Builtin function implementations
//

/// A number as seen by the arithmetic primitives.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Result<Num, EvalError> {
        match value {
            Value::Integer(n) => Ok(Num::Int(*n)),
            Value::Float(x) => Ok(Num::Float(*x)),
            other => Err(type_error("number", other)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(x) => x,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Integer(n),
            Num::Float(x) => Value::Float(x),
        }
    }
}

fn num_add(a: Num, b: Num) -> Result<Num, EvalError> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_add(y)
            .map(Num::Int)
            .ok_or(EvalError::Overflow("addition")),
        _ => Ok(Num::Float(a.as_f64() + b.as_f64())),
    }
}

fn num_sub(a: Num, b: Num) -> Result<Num, EvalError> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_sub(y)
            .map(Num::Int)
            .ok_or(EvalError::Overflow("subtraction")),
        _ => Ok(Num::Float(a.as_f64() - b.as_f64())),
    }
}

fn num_mul(a: Num, b: Num) -> Result<Num, EvalError> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_mul(y)
            .map(Num::Int)
            .ok_or(EvalError::Overflow("multiplication")),
        _ => Ok(Num::Float(a.as_f64() * b.as_f64())),
    }
}

fn num_div(a: Num, b: Num) -> Result<Num, EvalError> {
    match (a, b) {
        (Num::Int(_), Num::Int(0)) => Err(EvalError::DivisionByZero),
        (Num::Int(x), Num::Int(y)) => x
            .checked_div(y)
            .map(Num::Int)
            .ok_or(EvalError::Overflow("division")),
        // Float division by zero is IEEE infinity, not an error.
        _ => Ok(Num::Float(a.as_f64() / b.as_f64())),
    }
}

fn builtin_add(args: &[Value]) -> Result<Value, EvalError> {
    let mut sum = Num::Int(0);
    for arg in args {
        sum = num_add(sum, Num::from_value(arg)?)?;
    }
    Ok(sum.into_value())
}

fn builtin_sub(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [single] => match Num::from_value(single)? {
            Num::Int(n) => n
                .checked_neg()
                .map(Value::Integer)
                .ok_or(EvalError::Overflow("negation")),
            Num::Float(x) => Ok(Value::Float(-x)),
        },
        [first, rest @ ..] => {
            let mut result = Num::from_value(first)?;
            for arg in rest {
                result = num_sub(result, Num::from_value(arg)?)?;
            }
            Ok(result.into_value())
        }
        [] => Err(EvalError::arity(1, 0)),
    }
}

fn builtin_mul(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [first, rest @ ..] => {
            let mut product = Num::from_value(first)?;
            for arg in rest {
                product = num_mul(product, Num::from_value(arg)?)?;
            }
            Ok(product.into_value())
        }
        [] => Err(EvalError::arity(1, 0)),
    }
}

fn builtin_div(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        // Unary division is the reciprocal.
        [single] => num_div(Num::Int(1), Num::from_value(single)?).map(Num::into_value),
        [first, rest @ ..] => {
            let mut result = Num::from_value(first)?;
            for arg in rest {
                result = num_div(result, Num::from_value(arg)?)?;
            }
            Ok(result.into_value())
        }
        [] => Err(EvalError::arity(1, 0)),
    }
}

// Comparisons chain over adjacent pairs: (< 1 2 3) holds when 1 < 2 and
// 2 < 3. Mixed integer/float pairs compare as floats.
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(args: &[Value]) -> Result<Value, EvalError> {
            match args {
                [first, rest @ ..] if !rest.is_empty() => {
                    let mut prev = Num::from_value(first)?;
                    for value in rest {
                        let current = Num::from_value(value)?;
                        let holds = match (prev, current) {
                            (Num::Int(a), Num::Int(b)) => a $op b,
                            (a, b) => a.as_f64() $op b.as_f64(),
                        };
                        if !holds {
                            return Ok(Value::Bool(false));
                        }
                        prev = current;
                    }
                    Ok(Value::Bool(true))
                }
                _ => Err(EvalError::arity(2, args.len())),
            }
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

/// `=` chains the structural equality predicate over adjacent pairs, so
/// `(= 1 1.0 1)` holds and `(= "a" "a")` holds too.
fn builtin_num_eq(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [first, rest @ ..] if !rest.is_empty() => {
            let mut prev = first;
            for value in rest {
                if !prev.structural_eq(value, 0)? {
                    return Ok(Value::Bool(false));
                }
                prev = value;
            }
            Ok(Value::Bool(true))
        }
        _ => Err(EvalError::arity(2, args.len())),
    }
}

fn builtin_eq(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [a, b] => a.structural_eq(b, 0).map(Value::Bool),
        _ => Err(EvalError::arity(2, args.len())),
    }
}

fn builtin_cons(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [car, cdr] => Ok(Value::cons(car.clone(), cdr.clone())),
        _ => Err(EvalError::arity(2, args.len())),
    }
}

fn builtin_car(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [Value::Pair(pair)] => Ok(pair.car.clone()),
        [other] => Err(type_error("pair", other)),
        _ => Err(EvalError::arity(1, args.len())),
    }
}

fn builtin_cdr(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [Value::Pair(pair)] => Ok(pair.cdr.clone()),
        [other] => Err(type_error("pair", other)),
        _ => Err(EvalError::arity(1, args.len())),
    }
}

fn builtin_list(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::list(args.to_vec()))
}

fn builtin_null(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [value] => Ok(Value::Bool(value.is_nil())),
        _ => Err(EvalError::arity(1, args.len())),
    }
}

fn builtin_pair(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [value] => Ok(Value::Bool(matches!(value, Value::Pair(_)))),
        _ => Err(EvalError::arity(1, args.len())),
    }
}

fn builtin_not(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [value] => Ok(Value::Bool(!value.is_truthy())),
        _ => Err(EvalError::arity(1, args.len())),
    }
}

/// The full registry. Special forms live here alongside functions so that
/// one table documents the whole primitive surface; only functions are
/// bound as values in the global frame.
pub static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic
    BuiltinOp { name: "+", kind: OpKind::Function(builtin_add), arity: Arity::AtLeast(0) },
    BuiltinOp { name: "-", kind: OpKind::Function(builtin_sub), arity: Arity::AtLeast(1) },
    BuiltinOp { name: "*", kind: OpKind::Function(builtin_mul), arity: Arity::AtLeast(1) },
    BuiltinOp { name: "/", kind: OpKind::Function(builtin_div), arity: Arity::AtLeast(1) },
    // Comparisons
    BuiltinOp { name: "<", kind: OpKind::Function(builtin_lt), arity: Arity::AtLeast(2) },
    BuiltinOp { name: ">", kind: OpKind::Function(builtin_gt), arity: Arity::AtLeast(2) },
    BuiltinOp { name: "<=", kind: OpKind::Function(builtin_le), arity: Arity::AtLeast(2) },
    BuiltinOp { name: ">=", kind: OpKind::Function(builtin_ge), arity: Arity::AtLeast(2) },
    BuiltinOp { name: "=", kind: OpKind::Function(builtin_num_eq), arity: Arity::AtLeast(2) },
    BuiltinOp { name: "eq?", kind: OpKind::Function(builtin_eq), arity: Arity::Exact(2) },
    // List operations
    BuiltinOp { name: "cons", kind: OpKind::Function(builtin_cons), arity: Arity::Exact(2) },
    BuiltinOp { name: "car", kind: OpKind::Function(builtin_car), arity: Arity::Exact(1) },
    BuiltinOp { name: "cdr", kind: OpKind::Function(builtin_cdr), arity: Arity::Exact(1) },
    BuiltinOp { name: "list", kind: OpKind::Function(builtin_list), arity: Arity::Any },
    BuiltinOp { name: "null?", kind: OpKind::Function(builtin_null), arity: Arity::Exact(1) },
    BuiltinOp { name: "pair?", kind: OpKind::Function(builtin_pair), arity: Arity::Exact(1) },
    BuiltinOp { name: "not", kind: OpKind::Function(builtin_not), arity: Arity::Exact(1) },
    // Special forms
    BuiltinOp { name: "quote", kind: OpKind::SpecialForm(eval_quote), arity: Arity::Exact(1) },
    BuiltinOp { name: "if", kind: OpKind::SpecialForm(eval_if), arity: Arity::Range(2, 3) },
    BuiltinOp { name: "define", kind: OpKind::SpecialForm(eval_define), arity: Arity::Exact(2) },
    BuiltinOp { name: "lambda", kind: OpKind::SpecialForm(eval_lambda), arity: Arity::Exact(2) },
    BuiltinOp { name: "and", kind: OpKind::SpecialForm(eval_and), arity: Arity::Any },
    BuiltinOp { name: "or", kind: OpKind::SpecialForm(eval_or), arity: Arity::Any },
];

/// Lazy name index over [`BUILTIN_OPS`].
static BUILTIN_INDEX: LazyLock<FxHashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.name, op)).collect());

/// Find any registry entry by name.
pub fn find_op(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(name).copied()
}

/// Find a special form by name; the evaluator checks this before treating
/// a pair as a procedure application.
pub(crate) fn find_special_form(name: &str) -> Option<(Arity, SpecialFormFn)> {
    let op = find_op(name)?;
    match op.kind {
        OpKind::SpecialForm(form) => Some((op.arity, form)),
        OpKind::Function(_) => None,
    }
}

/// Create a global environment with every builtin function bound, writing
/// `display` output to stdout.
pub fn create_global_env() -> Environment {
    let stdout: Rc<RefCell<dyn Write>> = Rc::new(RefCell::new(io::stdout()));
    create_global_env_with_output(stdout)
}

/// Create a global environment whose `display` writes into the supplied
/// sink. Tests and embedders use this to capture output.
pub fn create_global_env_with_output(output: Rc<RefCell<dyn Write>>) -> Environment {
    let env = Environment::new();

    for op in BUILTIN_OPS {
        if let OpKind::Function(func) = op.kind {
            env.register_builtin(op.name, move |args| {
                op.arity.validate(args.len())?;
                func(args)
            });
        }
    }

    env.register_builtin("display", move |args| match args {
        [value] => {
            let mut sink = output.borrow_mut();
            // Strings display their contents unquoted; everything else
            // prints canonically. Sink failures are not language errors.
            let _ = match value {
                Value::Str(s) => write!(sink, "{s}"),
                other => write!(sink, "{other}"),
            };
            Ok(Value::Nil)
        }
        _ => Err(EvalError::arity(1, args.len())),
    });

    env
}
