//! Lexical environments: chained symbol-to-value frames with shared
//! ownership.
//!
//! A frame is never owned exclusively by one evaluation path - closures
//! keep their defining frame alive, and several closures routinely share
//! one parent. `Environment` is therefore a cheap `Rc` handle: cloning it
//! aliases the same frame, and `define` through any handle is visible
//! through every other handle to that frame. Mutation happens only via
//! `define` on the innermost frame, guarded by a `RefCell`; the interpreter
//! is single-threaded by construction.

use crate::EvalError;
use crate::value::{Builtin, Symbol, Value, intern};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct Frame {
    bindings: RefCell<FxHashMap<Symbol, Value>>,
    parent: Option<Environment>,
}

/// A shared handle to one environment frame (and, through it, the whole
/// parent chain).
#[derive(Clone)]
pub struct Environment {
    frame: Rc<Frame>,
}

impl Environment {
    /// Create an empty root frame.
    pub fn new() -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(FxHashMap::default()),
                parent: None,
            }),
        }
    }

    /// Create a fresh frame whose parent is this one. The parent is
    /// shared, not copied.
    pub fn child(&self) -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(FxHashMap::default()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Bind `name` in this frame, overwriting any existing binding here.
    /// Bindings in parent frames are shadowed, never modified.
    pub fn define(&self, name: Symbol, value: Value) {
        self.frame.bindings.borrow_mut().insert(name, value);
    }

    /// Look `name` up in this frame, then outward through the parents.
    pub fn lookup(&self, name: Symbol) -> Option<Value> {
        let mut frame: &Frame = &self.frame;
        loop {
            if let Some(value) = frame.bindings.borrow().get(&name) {
                return Some(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = &parent.frame,
                None => return None,
            }
        }
    }

    /// Register a named primitive in this frame. Used for the builtin
    /// library and available to embedders for custom primitives.
    pub fn register_builtin(
        &self,
        name: &str,
        func: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        self.define(
            intern(name),
            Value::Builtin(Rc::new(Builtin::new(name, func))),
        );
    }

    /// All visible bindings, innermost frame winning, sorted by name.
    /// This backs the REPL's `:env` listing.
    pub fn bindings(&self) -> Vec<(Symbol, Value)> {
        fn collect(env: &Environment, into: &mut FxHashMap<Symbol, Value>) {
            if let Some(parent) = &env.frame.parent {
                collect(parent, into);
            }
            for (name, value) in env.frame.bindings.borrow().iter() {
                into.insert(*name, value.clone());
            }
        }

        let mut merged = FxHashMap::default();
        collect(self, &mut merged);

        let mut result: Vec<_> = merged.into_iter().collect();
        result.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        result
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

/// Environments compare by frame identity: two handles are equal exactly
/// when they alias the same frame.
impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.frame, &other.frame)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = 1;
        let mut frame: &Frame = &self.frame;
        while let Some(parent) = &frame.parent {
            frames += 1;
            frame = &parent.frame;
        }
        write!(
            f,
            "Environment(frames: {frames}, local: {})",
            self.frame.bindings.borrow().len()
        )
    }
}
