//! The tree-walking evaluator.
//!
//! Evaluation is a plain recursive reduction of a [`Value`] tree: atoms
//! evaluate to themselves, symbols to their binding, and pairs either
//! dispatch to a special form (which sees its operands unevaluated) or
//! apply a procedure to left-to-right evaluated arguments. The
//! left-to-right order is an observable guarantee - `display` side effects
//! happen in textual order.
//!
//! There is no tail-call elimination: deep Lisp recursion consumes native
//! stack, so every recursive step is depth-tracked and cut off with
//! `StackDepthExceeded` well before the native stack runs out. Embedders
//! that also want to bound total work can evaluate through an
//! [`EvalContext`] with a step budget.

use crate::builtins::find_special_form;
use crate::env::Environment;
use crate::value::{Closure, Value, type_error};
use crate::{EvalError, MAX_EVAL_DEPTH};
use std::cell::Cell;
use std::rc::Rc;

/// Per-evaluation limits. The default imposes only the depth bound; a
/// step budget turns runaway evaluations into `ResourceExhausted`.
pub struct EvalContext {
    max_depth: usize,
    fuel: Cell<Option<u64>>,
}

impl Default for EvalContext {
    fn default() -> Self {
        EvalContext {
            max_depth: MAX_EVAL_DEPTH,
            fuel: Cell::new(None),
        }
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the evaluation to at most `steps` recursive eval calls.
    pub fn with_fuel(steps: u64) -> Self {
        EvalContext {
            max_depth: MAX_EVAL_DEPTH,
            fuel: Cell::new(Some(steps)),
        }
    }

    fn charge(&self) -> Result<(), EvalError> {
        if let Some(remaining) = self.fuel.get() {
            if remaining == 0 {
                return Err(EvalError::ResourceExhausted);
            }
            self.fuel.set(Some(remaining - 1));
        }
        Ok(())
    }
}

/// Evaluate `expr` in `env` with the default limits.
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, EvalError> {
    eval_at(expr, env, 0, &EvalContext::default())
}

/// Evaluate `expr` in `env` under the given limits.
pub fn eval_with_context(
    expr: &Value,
    env: &Environment,
    context: &EvalContext,
) -> Result<Value, EvalError> {
    eval_at(expr, env, 0, context)
}

/// The recursive core. Every recursive call threads `depth` and charges
/// the step budget.
pub(crate) fn eval_at(
    expr: &Value,
    env: &Environment,
    depth: usize,
    cx: &EvalContext,
) -> Result<Value, EvalError> {
    cx.charge()?;
    if depth >= cx.max_depth {
        return Err(EvalError::StackDepthExceeded);
    }

    match expr {
        // Self-evaluating: atoms and procedure values
        Value::Integer(_)
        | Value::Float(_)
        | Value::Str(_)
        | Value::Bool(_)
        | Value::Nil
        | Value::Builtin(_)
        | Value::Closure(_) => Ok(expr.clone()),

        // Variable lookup, walking the frame chain outward
        Value::Symbol(name) => env
            .lookup(*name)
            .ok_or_else(|| EvalError::UnboundSymbol(name.to_string())),

        // Special form or procedure application
        Value::Pair(pair) => eval_pair(&pair.car, &pair.cdr, env, depth, cx),
    }
}

fn eval_pair(
    head: &Value,
    tail: &Value,
    env: &Environment,
    depth: usize,
    cx: &EvalContext,
) -> Result<Value, EvalError> {
    // Special forms dispatch on the operator symbol and receive their
    // operands unevaluated. They take precedence over any binding of the
    // same name, so they cannot be shadowed.
    if let Value::Symbol(name) = head
        && let Some((arity, form)) = find_special_form(name.as_str())
    {
        let operands = tail.list_to_vec()?;
        arity.validate(operands.len())?;
        return form(&operands, env, depth, cx);
    }

    // Procedure application: operator first, then each operand in
    // textual order.
    let procedure = eval_at(head, env, depth + 1, cx)?;

    let mut args = Vec::new();
    let mut cursor = tail;
    loop {
        match cursor {
            Value::Nil => break,
            Value::Pair(pair) => {
                args.push(eval_at(&pair.car, env, depth + 1, cx)?);
                cursor = &pair.cdr;
            }
            other => return Err(type_error("proper list", other)),
        }
    }

    apply(&procedure, &args, depth, cx)
}

/// Apply an already-evaluated procedure to already-evaluated arguments.
fn apply(
    procedure: &Value,
    args: &[Value],
    depth: usize,
    cx: &EvalContext,
) -> Result<Value, EvalError> {
    match procedure {
        Value::Builtin(builtin) => builtin.call(args),
        Value::Closure(closure) => {
            if closure.params.len() != args.len() {
                return Err(EvalError::arity(closure.params.len(), args.len()));
            }

            // One fresh frame per invocation, chained to the *captured*
            // environment - this is what makes scoping lexical.
            let call_env = closure.env.child();
            for (param, arg) in closure.params.iter().zip(args) {
                call_env.define(*param, arg.clone());
            }

            eval_at(&closure.body, &call_env, depth + 1, cx)
        }
        other => Err(type_error("procedure", other)),
    }
}

/// `(quote x)` - return the operand unevaluated.
pub(crate) fn eval_quote(
    args: &[Value],
    _env: &Environment,
    _depth: usize,
    _cx: &EvalContext,
) -> Result<Value, EvalError> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(EvalError::arity(1, args.len())),
    }
}

/// `(if condition consequent alternative?)` - everything except `#f` and
/// `()` counts as true; a missing alternative evaluates to `()`.
pub(crate) fn eval_if(
    args: &[Value],
    env: &Environment,
    depth: usize,
    cx: &EvalContext,
) -> Result<Value, EvalError> {
    match args {
        [condition, consequent] => {
            if eval_at(condition, env, depth + 1, cx)?.is_truthy() {
                eval_at(consequent, env, depth + 1, cx)
            } else {
                Ok(Value::Nil)
            }
        }
        [condition, consequent, alternative] => {
            if eval_at(condition, env, depth + 1, cx)?.is_truthy() {
                eval_at(consequent, env, depth + 1, cx)
            } else {
                eval_at(alternative, env, depth + 1, cx)
            }
        }
        _ => Err(EvalError::arity(2, args.len())),
    }
}

/// `(define sym expr)` - evaluate, bind in the current frame (overwriting
/// any binding already there), and return the bound value.
pub(crate) fn eval_define(
    args: &[Value],
    env: &Environment,
    depth: usize,
    cx: &EvalContext,
) -> Result<Value, EvalError> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_at(expr, env, depth + 1, cx)?;
            env.define(*name, value.clone());
            Ok(value)
        }
        [other, _] => Err(type_error("symbol", other)),
        _ => Err(EvalError::arity(2, args.len())),
    }
}

/// `(lambda (params...) body)` - build a closure capturing the current
/// environment by reference. Parameters must be distinct symbols; the
/// variadic `(lambda args body)` and dotted-rest forms are not supported.
pub(crate) fn eval_lambda(
    args: &[Value],
    env: &Environment,
    _depth: usize,
    _cx: &EvalContext,
) -> Result<Value, EvalError> {
    match args {
        [param_list, body] => {
            let Ok(param_forms) = param_list.list_to_vec() else {
                return Err(type_error("parameter list", param_list));
            };

            let mut params = Vec::with_capacity(param_forms.len());
            for form in &param_forms {
                match form {
                    Value::Symbol(name) => {
                        if params.contains(name) {
                            return Err(EvalError::TypeMismatch {
                                expected: "distinct parameter names",
                                found: name.to_string(),
                            });
                        }
                        params.push(*name);
                    }
                    other => return Err(type_error("symbol", other)),
                }
            }

            Ok(Value::Closure(Rc::new(Closure {
                params,
                body: body.clone(),
                env: env.clone(),
            })))
        }
        _ => Err(EvalError::arity(2, args.len())),
    }
}

macro_rules! short_circuit_form {
    ($name:ident, $doc:expr, $stop_on_truthy:expr, $empty:expr) => {
        #[doc = $doc]
        pub(crate) fn $name(
            args: &[Value],
            env: &Environment,
            depth: usize,
            cx: &EvalContext,
        ) -> Result<Value, EvalError> {
            let mut result = $empty;
            for arg in args {
                result = eval_at(arg, env, depth + 1, cx)?;
                if result.is_truthy() == $stop_on_truthy {
                    return Ok(result);
                }
            }
            Ok(result)
        }
    };
}

short_circuit_form!(
    eval_and,
    "`(and forms...)` - evaluate until a false value; return the deciding \
     value, or the last one. `(and)` is `#t`.",
    false,
    Value::Bool(true)
);
short_circuit_form!(
    eval_or,
    "`(or forms...)` - evaluate until a true value; return the deciding \
     value, or the last one. `(or)` is `#f`.",
    true,
    Value::Bool(false)
);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::builtins::create_global_env;
    use crate::reader::read;
    use crate::value::{nil, sym, val};

    /// Evaluate one source expression in the given environment.
    fn eval_str(source: &str, env: &Environment) -> Result<Value, EvalError> {
        let expr = read(source)
            .unwrap_or_else(|e| panic!("unexpected read error for {source:?}: {e}"))
            .expect("expected a form");
        eval(&expr, env)
    }

    /// Expected outcome of one test case.
    #[derive(Debug)]
    enum Outcome {
        /// Must evaluate to exactly this value.
        Evaluates(Value),
        /// Must fail with exactly this error.
        FailsWith(EvalError),
        /// Must succeed; the value itself is not checked (setup steps
        /// whose result is a closure).
        Succeeds,
    }
    use Outcome::{FailsWith, Succeeds};

    type Case = (&'static str, Outcome);

    fn ok<T: Into<Value>>(value: T) -> Outcome {
        Outcome::Evaluates(value.into())
    }

    fn check(source: &str, expected: &Outcome, env: &Environment, case_id: &str) {
        let actual = eval_str(source, env);
        match (actual, expected) {
            (Ok(actual), Outcome::Evaluates(value)) => {
                assert_eq!(actual, *value, "{case_id} {source:?}");
            }
            (Ok(_), Succeeds) => {}
            (Err(actual), FailsWith(error)) => {
                assert_eq!(actual, *error, "{case_id} {source:?}");
            }
            (actual, expected) => {
                panic!("{case_id} {source:?}: expected {expected:?}, got {actual:?}");
            }
        }
    }

    /// Run each case in a fresh global environment.
    fn run_isolated(cases: Vec<Case>) {
        for (i, (source, expected)) in cases.iter().enumerate() {
            let env = create_global_env();
            check(source, expected, &env, &format!("case #{}", i + 1));
        }
    }

    /// Run cases in order against one shared environment, so defines
    /// carry across.
    fn run_in_sequence(cases: Vec<Case>) {
        let env = create_global_env();
        for (i, (source, expected)) in cases.iter().enumerate() {
            check(source, expected, &env, &format!("step #{}", i + 1));
        }
    }

    #[test]
    fn test_self_evaluating_atoms() {
        run_isolated(vec![
            ("42", ok(42)),
            ("-271", ok(-271)),
            ("2.5", ok(2.5)),
            ("9223372036854775807", ok(i64::MAX)),
            ("#t", ok(true)),
            ("#f", ok(false)),
            ("\"hello\"", ok("hello")),
            ("\"\"", ok("")),
            ("()", ok(nil())),
        ]);
    }

    #[test]
    fn test_symbol_lookup() {
        run_isolated(vec![(
            "zzz",
            FailsWith(EvalError::UnboundSymbol("zzz".into())),
        )]);
        run_in_sequence(vec![
            ("(define x 42)", ok(42)),
            ("x", ok(42)),
            ("(+ x 8)", ok(50)),
            ("y", FailsWith(EvalError::UnboundSymbol("y".into()))),
        ]);
    }

    #[test]
    fn test_quote_never_evaluates_its_operand() {
        run_isolated(vec![
            ("(quote hello)", ok(sym("hello"))),
            ("(quote (1 2 3))", ok([1, 2, 3])),
            ("(quote ())", ok(nil())),
            ("'x", ok(sym("x"))),
            ("''x", ok(vec![sym("quote"), sym("x")])),
            // Unbound symbols inside a quote stay literal data.
            (
                "(quote (+ 1 undefined))",
                ok(vec![sym("+"), val(1), sym("undefined")]),
            ),
            ("(quote a b)", FailsWith(EvalError::arity(1, 2))),
        ]);
    }

    #[test]
    fn test_if_uses_truthiness() {
        run_isolated(vec![
            ("(if #t 1 2)", ok(1)),
            ("(if #f 1 2)", ok(2)),
            // Only #f and () are false: zero and the empty string are true.
            ("(if 0 1 2)", ok(1)),
            ("(if \"\" 1 2)", ok(1)),
            ("(if '() 1 2)", ok(2)),
            ("(if (> 5 3) \"yes\" \"no\")", ok("yes")),
            // A missing alternative evaluates to ().
            ("(if #f 1)", ok(nil())),
            ("(if #t 1)", ok(1)),
            // The untaken branch is never evaluated.
            ("(if #t 1 undefined)", ok(1)),
            ("(if #f undefined 2)", ok(2)),
            ("(if #t)", FailsWith(EvalError::arity(2, 1))),
        ]);
    }

    #[test]
    fn test_define_returns_and_overwrites() {
        run_in_sequence(vec![
            ("(define x 1)", ok(1)),
            ("x", ok(1)),
            ("(define x 2)", ok(2)),
            ("x", ok(2)),
            // define's result feeds into the surrounding expression.
            ("(+ (define y 5) y)", ok(10)),
        ]);
        run_isolated(vec![
            (
                "(define 123 4)",
                FailsWith(EvalError::TypeMismatch {
                    expected: "symbol",
                    found: "integer".into(),
                }),
            ),
            ("(define x)", FailsWith(EvalError::arity(2, 1))),
        ]);
    }

    #[test]
    fn test_lambda_validation() {
        run_isolated(vec![
            ("((lambda (x) (* x x)) 4)", ok(16)),
            ("((lambda (x y) (+ x y)) 3 4)", ok(7)),
            ("((lambda () 42))", ok(42)),
            // Arity is exact for closures.
            ("((lambda (a b) a) 1)", FailsWith(EvalError::arity(2, 1))),
            ("((lambda (a) a) 1 2)", FailsWith(EvalError::arity(1, 2))),
            (
                "(lambda (x x) x)",
                FailsWith(EvalError::TypeMismatch {
                    expected: "distinct parameter names",
                    found: "x".into(),
                }),
            ),
            (
                "(lambda x 42)",
                FailsWith(EvalError::TypeMismatch {
                    expected: "parameter list",
                    found: "symbol".into(),
                }),
            ),
            (
                "(lambda (1) 42)",
                FailsWith(EvalError::TypeMismatch {
                    expected: "symbol",
                    found: "integer".into(),
                }),
            ),
        ]);
    }

    #[test]
    fn test_closures_capture_by_reference() {
        // The classic adder: the inner lambda reads n from the invocation
        // frame of make-adder, long after make-adder returned.
        run_in_sequence(vec![
            (
                "(define make-adder (lambda (n) (lambda (x) (+ x n))))",
                Succeeds,
            ),
            ("((make-adder 5) 3)", ok(8)),
            // Two adders from the same maker get separate invocation
            // frames.
            ("(define add1 (make-adder 1))", Succeeds),
            ("(define add10 (make-adder 10))", Succeeds),
            ("(add1 5)", ok(6)),
            ("(add10 5)", ok(15)),
        ]);
    }

    #[test]
    fn test_capture_sees_later_defines() {
        // Frames are shared by reference, so a closure over the global
        // frame observes later redefinitions there.
        run_in_sequence(vec![
            ("(define y 100)", ok(100)),
            ("(define g (lambda () y))", Succeeds),
            ("(g)", ok(100)),
            ("(define y 200)", ok(200)),
            ("(g)", ok(200)),
        ]);
    }

    #[test]
    fn test_shadowing() {
        run_in_sequence(vec![
            ("(define x 1)", ok(1)),
            ("(define f (lambda (x) (+ x 10)))", Succeeds),
            // The parameter frame wins over the global binding.
            ("(f 5)", ok(15)),
            ("x", ok(1)),
            ("(f x)", ok(11)),
        ]);
    }

    #[test]
    fn test_recursive_functions() {
        // Self-reference works because the closure shares the global
        // frame where its own name is being defined.
        run_in_sequence(vec![
            (
                "(define fact (lambda (n) (if (< n 1) 1 (* n (fact (- n 1))))))",
                Succeeds,
            ),
            ("(fact 0)", ok(1)),
            ("(fact 5)", ok(120)),
            ("(fact 20)", ok(2432902008176640000i64)),
        ]);

        run_in_sequence(vec![
            (
                "(define even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))",
                Succeeds,
            ),
            (
                "(define odd? (lambda (n) (if (= n 0) #f (even? (- n 1)))))",
                Succeeds,
            ),
            ("(even? 8)", ok(true)),
            ("(odd? 8)", ok(false)),
        ]);
    }

    #[test]
    fn test_higher_order_functions() {
        run_in_sequence(vec![
            ("(define twice (lambda (f x) (f (f x))))", Succeeds),
            ("(define inc (lambda (x) (+ x 1)))", Succeeds),
            ("(twice inc 5)", ok(7)),
            // Builtins are first-class values too.
            ("(define plus +)", Succeeds),
            ("(plus 2 3)", ok(5)),
            ("((if #t + *) 2 3)", ok(5)),
            ("((if #f + *) 2 3)", ok(6)),
            ("((lambda (op a b) (op a b)) * 3 4)", ok(12)),
        ]);
    }

    #[test]
    fn test_and_or_short_circuit() {
        run_isolated(vec![
            ("(and)", ok(true)),
            ("(or)", ok(false)),
            ("(and 1 2 3)", ok(3)),
            ("(and 1 #f 3)", ok(false)),
            ("(and 1 '() 3)", ok(nil())),
            ("(or #f 7)", ok(7)),
            ("(or #f #f)", ok(false)),
            ("(or 1 2)", ok(1)),
            // The deciding operand stops evaluation; what follows is
            // never looked at.
            ("(and #f undefined)", ok(false)),
            ("(or 1 undefined)", ok(1)),
            (
                "(or #f undefined)",
                FailsWith(EvalError::UnboundSymbol("undefined".into())),
            ),
        ]);
    }

    #[test]
    fn test_special_forms_cannot_be_shadowed() {
        run_in_sequence(vec![
            // `if` is a fine symbol to bind...
            ("(define if 3)", ok(3)),
            // ...but in operator position the special form still wins.
            ("(if #t 1 2)", ok(1)),
        ]);
    }

    #[test]
    fn test_applying_a_non_procedure() {
        run_isolated(vec![
            (
                "(1 2 3)",
                FailsWith(EvalError::TypeMismatch {
                    expected: "procedure",
                    found: "integer".into(),
                }),
            ),
            (
                "(\"not-a-function\")",
                FailsWith(EvalError::TypeMismatch {
                    expected: "procedure",
                    found: "string".into(),
                }),
            ),
        ]);
    }

    #[test]
    fn test_errors_propagate_out_of_nesting() {
        run_isolated(vec![
            (
                "(+ 1 (car '()))",
                FailsWith(EvalError::TypeMismatch {
                    expected: "pair",
                    found: "()".into(),
                }),
            ),
            (
                "(if (car '()) 1 2)",
                FailsWith(EvalError::TypeMismatch {
                    expected: "pair",
                    found: "()".into(),
                }),
            ),
        ]);
    }

    #[test]
    fn test_depth_limit_cuts_off_runaway_recursion() {
        let env = create_global_env();
        let result = eval_str("((lambda (f) (f f)) (lambda (f) (f f)))", &env);
        assert_eq!(result.unwrap_err(), EvalError::StackDepthExceeded);

        // The environment is still usable afterwards.
        assert_eq!(eval_str("(+ 1 2)", &env).unwrap(), val(3));
    }

    #[test]
    fn test_step_budget() {
        let env = create_global_env();
        let expr = read("(+ 1 (+ 2 (+ 3 4)))").unwrap().unwrap();

        // Plenty of fuel: succeeds.
        let roomy = EvalContext::with_fuel(1_000);
        assert_eq!(eval_with_context(&expr, &env, &roomy).unwrap(), val(10));

        // Too little fuel: ResourceExhausted, not a wrong answer.
        let tight = EvalContext::with_fuel(3);
        assert_eq!(
            eval_with_context(&expr, &env, &tight).unwrap_err(),
            EvalError::ResourceExhausted
        );
    }
}
