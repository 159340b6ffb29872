//! Heap objects: functions, closures, upvalues, and native functions.
//!
//! All objects are shared via [Rc]; there is no tracing collector. Reference
//! counting reclaims everything acyclic. A closure stored where it can reach
//! itself (say, through a global) forms a cycle and leaks, which is an
//! accepted limitation of this interpreter.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::value::Value;

/// A shared heap object. This is the payload of [Value::Obj].
#[derive(Debug, Clone)]
pub enum Obj {
    Function(Rc<Function>),
    Closure(Rc<Closure>),
    Native(Rc<Native>),
}

/// What kind of callable a [Function] is. Only [FunctionKind::Script] and
/// [FunctionKind::Function] are produced today; the method kinds are part of
/// the data model for when classes arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A compiled function: its bytecode plus the metadata the VM needs to call
/// it. The top-level script is itself a [Function] of kind `Script`.
#[derive(Debug)]
pub struct Function {
    pub kind: FunctionKind,
    pub name: Rc<str>,
    pub arity: u8,
    /// How many `(is_local, index)` operand pairs follow this function's
    /// `OP_CLOSURE` instruction.
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl Function {
    /// Create an empty function of the given kind. The compiler fills in the
    /// chunk, arity, and upvalue count as it goes.
    pub fn new(kind: FunctionKind, name: &str) -> Self {
        Function {
            kind,
            name: Rc::from(name),
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<func {}(#{})>", self.name, self.arity)
    }
}

/// Functions compare by name and arity; the chunks are not inspected.
impl PartialEq for Function {
    fn eq(&self, other: &Function) -> bool {
        self.name == other.name && self.arity == other.arity
    }
}

/// A runtime pairing of a function with the upvalues it captured.
///
/// Closures over the same function are distinct objects, but may share
/// individual [Upvalue] cells when they captured the same variable.
#[derive(Debug)]
pub struct Closure {
    pub function: Rc<Function>,
    pub upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Closure {
    /// Wrap a function that captures nothing. Used for the top-level script.
    pub fn wrap(function: Rc<Function>) -> Self {
        debug_assert_eq!(0, function.upvalue_count);
        Closure {
            function,
            upvalues: Vec::new(),
        }
    }

    #[inline]
    pub fn arity(&self) -> u8 {
        self.function.arity
    }

    #[inline]
    pub fn chunk(&self) -> &Chunk {
        &self.function.chunk
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<closure {}>", self.function)
    }
}

/// A reference to a captured variable.
///
/// While the variable still lives on the value stack the upvalue is `Open`
/// and holds the absolute stack slot. When that slot is about to die (scope
/// exit or frame return), the VM migrates the value into the cell itself and
/// the upvalue becomes `Closed`. Every closure holding this cell sees the
/// migration, since cells are shared via `Rc<RefCell<…>>`.
#[derive(Debug, Clone, PartialEq)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

impl Upvalue {
    /// The stack slot this upvalue points at, if it is still open.
    #[inline]
    pub fn open_slot(&self) -> Option<usize> {
        match self {
            Upvalue::Open(slot) => Some(*slot),
            Upvalue::Closed(_) => None,
        }
    }

    /// Migrate the captured value off the stack and into this cell.
    #[inline]
    pub fn close(&mut self, value: Value) {
        *self = Upvalue::Closed(value);
    }
}

/// The signature of a native function: the argument slice taken from the
/// value stack. Natives must not retain references into the stack.
pub type NativeFn = fn(&[Value]) -> Value;

/// A function implemented in Rust and exposed to Lox code by name.
#[derive(Debug)]
pub struct Native {
    pub name: Rc<str>,
    pub function: NativeFn,
}

impl fmt::Display for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.function as usize as *const ();
        write!(f, "<native {}@{:p}>", self.name, addr)
    }
}

impl PartialEq for Native {
    fn eq(&self, other: &Native) -> bool {
        self.name == other.name && self.function as usize == other.function as usize
    }
}

/// Equality between objects: functions structurally (name and arity),
/// closures by the identity of the function they close over, natives by name
/// and code address.
impl PartialEq for Obj {
    fn eq(&self, other: &Obj) -> bool {
        match (self, other) {
            (Obj::Function(a), Obj::Function(b)) => a == b,
            (Obj::Closure(a), Obj::Closure(b)) => Rc::ptr_eq(&a.function, &b.function),
            (Obj::Native(a), Obj::Native(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Function(function) => write!(f, "{function}"),
            Obj::Closure(closure) => write!(f, "{closure}"),
            Obj::Native(native) => write!(f, "{native}"),
        }
    }
}
