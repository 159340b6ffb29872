//! A bytecode interpreter for [Lox][lox].
//!
//! Source text flows through the [scanner] into the single-pass [compiler],
//! which emits bytecode straight into the [chunk](chunk::Chunk) of the
//! top-level script [function](object::Function). The [vm] then wraps that
//! function in a closure and executes it over a value stack and a stack of
//! call frames.
//!
//! [lox]: https://craftinginterpreters.com/the-lox-language.html

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod error;
pub mod object;
pub mod scanner;
pub mod value;
pub mod vm;

mod with_try_from_u8;

/// The type returned by various functions that parse, compile, and run Lox
/// code. This is the standard [std::result::Result], but the error is always
/// [error::InterpretationError]. This type alias is generic for the return
/// type, however.
///
/// ```
/// fn compile() -> loxide::Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, error::InterpretationError>;

/// Re-exports the common items: everything a driver needs to scan, compile,
/// and run Lox code with one import.
pub mod prelude {
    pub use crate::chunk::{Chunk, OpCode};
    pub use crate::error::InterpretationError;
    pub use crate::object::{Closure, Function, FunctionKind, Native, Obj, Upvalue};
    pub use crate::scanner::{Scanner, Token, TokenKind};
    pub use crate::value::Value;
    pub use crate::vm::VM;
}
