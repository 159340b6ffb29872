//! Contains the Lox parser and bytecode compiler.
//!
//! The compiler is single pass: there is no AST. A Pratt parser consumes
//! tokens and emits bytecode straight into the chunk of the function
//! currently being compiled. Nested `fun` declarations push a fresh
//! function frame onto [Compiler::frames]; name resolution walks that
//! vector outward to decide between locals, upvalues, and globals.

use std::rc::Rc;

use enum_map::{enum_map, EnumMap};
use once_cell::sync::Lazy;

use crate::chunk::{Chunk, OpCode, WrittenOpcode};
use crate::error::{Diagnostic, ErrorLocation, InterpretationError};
use crate::object::{Function, FunctionKind, Obj};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

/////////////////////////////////////////// Public API ////////////////////////////////////////////

/// Compiles the given Lox source code and, if successful, returns the
/// top-level script as a [Function] ready for the VM to call.
///
/// On failure, every diagnostic collected before the end of input is
/// returned inside [InterpretationError::CompileError].
pub fn compile(name: &str, source: &str) -> crate::Result<Rc<Function>> {
    let parser = Parser::new(source);
    let compiler = Compiler::new(name, parser);
    compiler.compile()
}

///////////////////////////////////// Implementation details //////////////////////////////////////

const U8_COUNT: usize = u8::MAX as usize + 1;
/// Locals per function are addressed by a one-byte slot.
const MAX_LOCALS: usize = U8_COUNT;
/// Upvalues per function are addressed by a one-byte index.
const MAX_UPVALUES: usize = U8_COUNT;

/// Contains the compiler state: the [Parser] plus one [FunctionFrame] per
/// function currently being compiled (the script at the bottom, the
/// innermost `fun` on top).
struct Compiler<'a> {
    parser: Parser<'a>,
    frames: Vec<FunctionFrame<'a>>,
}

/// Per-function compilation state.
struct FunctionFrame<'a> {
    /// The function under construction; bytecode goes into its chunk.
    function: Function,
    locals: Vec<Local<'a>>,
    upvalues: Vec<UpvalueRef>,
    scope_depth: isize,
    /// Name of the global variable whose initializer is currently being
    /// compiled. Reading it back at that point is the same mistake as
    /// reading a local in its own initializer, and gets the same error.
    global_initializer: Option<&'a str>,
}

/// A local variable slot. `depth` is `None` from declaration until the
/// initializer finishes; reading the variable in that window is an error.
#[derive(Clone)]
struct Local<'a> {
    name: &'a str,
    depth: Option<isize>,
    /// Set when an inner function closes over this local; scope exit then
    /// emits `OP_CLOSE_UPVALUE` instead of `OP_POP`.
    is_captured: bool,
}

/// A compile-time upvalue descriptor: which enclosing slot to capture, and
/// whether that slot is a local of the directly enclosing function
/// (`is_local`) or one of its own upvalues.
#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

/// Contains the parser state, including the accumulated diagnostics.
#[derive(Debug)]
struct Parser<'a> {
    scanner: Scanner<'a>,
    current: Token<'a>,
    previous: Token<'a>,
    errors: Vec<Diagnostic>,
    panic_mode: bool,
}

/// A rule in the Pratt parser table. See [Compiler::parse_precedence()].
#[derive(Copy, Clone)]
struct ParserRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

/// Any possible action taken from the parsing table. Actions take the entire
/// compiler state and advance it, usually emitting bytecode.
type ParserFn = fn(&mut Compiler, bool);

/// Precedence rules for [TokenKind]s in Lox.
///
/// Precedence levels have a well-defined ordering ([PartialOrd]), which is
/// what drives the Pratt parsing loop.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq)]
enum Precedence {
    None,
    /// `=`
    Assignment,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-`
    Term,
    /// `*` `/`
    Factor,
    /// `!` `-`
    Unary,
    /// `()`
    Call,
    /// Literals, and groupings
    Primary,
}

///////////////////////////////////////// Implementations /////////////////////////////////////////

impl Precedence {
    /// Returns the next higher level of precedence.
    ///
    /// # Panics
    ///
    /// Panics if trying to obtain a higher level of precedence than the
    /// maximum, [Precedence::Primary].
    #[inline]
    fn higher_precedence(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => panic!("Tried to get higher precedence than primary"),
        }
    }
}

impl ParserRule {
    /// Returns one level of precedence higher than the rule's precedence.
    #[inline(always)]
    fn higher_precedence(&self) -> Precedence {
        self.precedence.higher_precedence()
    }
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source code. Nothing is scanned
    /// until the first [Parser::advance].
    fn new(source: &'a str) -> Parser<'a> {
        Parser {
            scanner: Scanner::new(source),
            current: Token::sentinel("<before first token>"),
            previous: Token::sentinel("<before first token>"),
            errors: Vec::new(),
            panic_mode: false,
        }
    }

    /// Update self.previous and self.current such that they move one token
    /// further in the token stream. Error tokens are reported here and
    /// skipped, so the rest of the compiler only ever sees real tokens.
    fn advance(&mut self) {
        self.previous = self.current;

        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }

            self.error_at_current(self.current.text);
        }
    }

    /// Consume the current token if it has the desired kind; otherwise
    /// report an error at it.
    fn consume(&mut self, desired: TokenKind, message: &str) {
        if self.current.kind == desired {
            return self.advance();
        }

        self.error_at_current(message);
    }

    /// Return true if the current token is of the given kind.
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Advance if the current token matches `desired`. Returns whether it
    /// was matched.
    fn match_and_advance(&mut self, desired: TokenKind) -> bool {
        if self.check(desired) {
            self.advance();
            return true;
        }
        false
    }

    /// Record a compiler error located at the previous token. In Pratt
    /// parsing this is usually the handler you want, because the previous
    /// token decided which rule was taken.
    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message)
    }

    /// Record a compiler error located at the current token.
    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message)
    }

    /// Record a compiler error located at the given token. While in panic
    /// mode, further errors are suppressed until [Parser::synchronize].
    fn error_at(&mut self, token: Token<'a>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::AtEnd,
            // The message already names the offending text.
            TokenKind::Error => ErrorLocation::Unlocated,
            _ => ErrorLocation::At(token.text.to_owned()),
        };

        self.errors.push(Diagnostic {
            line: token.line,
            location,
            message: message.to_owned(),
        });
    }

    /// Leave panic mode by skipping forward to something that looks like a
    /// statement boundary: just after a `;`, or just before a keyword that
    /// starts a statement.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }

            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => (),
            }

            self.advance();
        }
    }
}

impl<'a> FunctionFrame<'a> {
    fn new(function: Function) -> Self {
        let mut locals = Vec::with_capacity(MAX_LOCALS);
        // Slot 0 of every call frame holds the callee itself; reserve the
        // matching compile-time slot under a name no identifier can have.
        locals.push(Local {
            name: "",
            depth: Some(0),
            is_captured: false,
        });

        FunctionFrame {
            function,
            locals,
            upvalues: Vec::with_capacity(MAX_UPVALUES),
            scope_depth: 0,
            global_initializer: None,
        }
    }
}

impl<'a> Compiler<'a> {
    /// Creates a new compiler that will produce a script function with the
    /// given name.
    fn new(name: &str, parser: Parser<'a>) -> Compiler<'a> {
        let script = Function::new(FunctionKind::Script, name);
        Compiler {
            parser,
            frames: vec![FunctionFrame::new(script)],
        }
    }

    /// Takes ownership of the compiler and returns the compiled script.
    fn compile(mut self) -> crate::Result<Rc<Function>> {
        self.parser.advance();
        while !self.match_and_advance(TokenKind::Eof) {
            self.declaration();
        }
        self.emit_return();

        let frame = self.frames.pop().expect("script frame");
        assert!(self.frames.is_empty(), "unfinished nested function");

        if !self.parser.errors.is_empty() {
            return Err(InterpretationError::CompileError(self.parser.errors));
        }

        // Print a listing of the bytecode to manually inspect compiled output.
        if cfg!(feature = "print_code") {
            crate::debug::disassemble_chunk(&frame.function.chunk, &frame.function.name);
        }

        Ok(Rc::new(frame.function))
    }

    ///////////////////////////////////// Declarations ////////////////////////////////////////////

    /// Parse a declaration.
    fn declaration(&mut self) {
        if self.match_and_advance(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_and_advance(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.parser.synchronize();
        }
    }

    /// Parse a function declaration. Assumes `fun` has been consumed.
    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may refer to itself by name; the binding is usable
        // before the body finishes compiling.
        self.mark_initialized();
        let name = self.parser.previous.text;
        self.function(FunctionKind::Function, name);
        self.define_variable(global);
    }

    /// Compile a function body into a fresh [FunctionFrame], then emit the
    /// `OP_CLOSURE` that builds it at runtime, followed by one
    /// `(is_local, index)` byte pair per captured upvalue.
    fn function(&mut self, kind: FunctionKind, name: &str) {
        self.frames.push(FunctionFrame::new(Function::new(kind, name)));
        self.begin_scope();

        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                if self.frame().function.arity == u8::MAX {
                    self.parser
                        .error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.frame_mut().function.arity += 1;
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);

                if !self.match_and_advance(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.parser
            .consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();
        self.emit_return();

        // No end_scope: the frame is discarded whole, and at runtime
        // OP_RETURN throws away the entire stack window.
        let FunctionFrame {
            mut function,
            upvalues,
            ..
        } = self.frames.pop().expect("function frame");
        function.upvalue_count = upvalues.len();

        if cfg!(feature = "print_code") && self.parser.errors.is_empty() {
            crate::debug::disassemble_chunk(&function.chunk, &function.name);
        }

        let index = self.make_constant(Value::Obj(Obj::Function(Rc::new(function))));
        upvalues.iter().fold(
            self.emit_instruction(OpCode::Closure).with_operand(index),
            |emitted, upvalue| {
                emitted
                    .with_operand(upvalue.is_local as u8)
                    .with_operand(upvalue.index)
            },
        );
    }

    /// Parse a variable declaration. Assumes `var` has been consumed.
    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        // Poison the name for the duration of its initializer. Locals are
        // covered by their pending depth; globals need explicit tracking.
        if self.frame().scope_depth == 0 {
            self.frame_mut().global_initializer = Some(self.parser.previous.text);
        }

        if self.match_and_advance(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_instruction(OpCode::Nil);
        }
        self.frame_mut().global_initializer = None;

        self.parser.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    ////////////////////////////////////// Statements /////////////////////////////////////////////

    /// Parse a statement.
    fn statement(&mut self) {
        if self.match_and_advance(TokenKind::Print) {
            self.print_statement();
        } else if self.match_and_advance(TokenKind::For) {
            self.for_statement();
        } else if self.match_and_advance(TokenKind::If) {
            self.if_statement();
        } else if self.match_and_advance(TokenKind::Return) {
            self.return_statement();
        } else if self.match_and_advance(TokenKind::While) {
            self.while_statement();
        } else if self.match_and_advance(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    /// Parse a print statement. Assumes `print` has been consumed.
    fn print_statement(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_instruction(OpCode::Print);
    }

    /// Parse a return statement. Assumes `return` has been consumed.
    fn return_statement(&mut self) {
        if self.frame().function.kind == FunctionKind::Script {
            self.parser.error("Can't return from top-level code.");
        }

        if self.match_and_advance(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.parser
                .consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_instruction(OpCode::Return);
        }
    }

    /// Parse an if statement. Assumes `if` has been consumed.
    fn if_statement(&mut self) {
        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_instruction(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_instruction(OpCode::Pop);
        if self.match_and_advance(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    /// Parse a while statement. Assumes `while` has been consumed.
    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_instruction(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_instruction(OpCode::Pop);
    }

    /// Parse a for statement. Assumes `for` has been consumed.
    ///
    /// Desugars to the same jump and loop primitives as `while`. The
    /// increment clause appears in the source before the body but must run
    /// after it, so it is compiled out of order: the condition jumps over
    /// the increment into the body, and the body loops back to the
    /// increment, which loops back to the condition.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_and_advance(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_and_advance(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump = None;
        if !self.match_and_advance(TokenKind::Semicolon) {
            self.expression();
            self.parser
                .consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_instruction(OpCode::Pop); // condition
        }

        if !self.match_and_advance(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_instruction(OpCode::Pop);
            self.parser
                .consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_instruction(OpCode::Pop); // condition
        }

        self.end_scope();
    }

    /// Parse an expression statement (e.g., assignments, function calls).
    /// The expression's value is discarded so statements have no net stack
    /// effect.
    fn expression_statement(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_instruction(OpCode::Pop);
    }

    /// Parse a block. Assumes a new scope has already been created.
    fn block(&mut self) {
        while !self.parser.check(TokenKind::RightBrace) && !self.parser.check(TokenKind::Eof) {
            self.declaration();
        }

        self.parser
            .consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    /// Parse an expression.
    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    //////////////////////////////////////// Scoping //////////////////////////////////////////////

    /// Create a new block scope. Make sure to end it later.
    fn begin_scope(&mut self) {
        self.frame_mut().scope_depth += 1;
    }

    /// Pop one scope, discarding every local it declared. The compile-time
    /// vector of locals parallels the runtime stack, so each dead local
    /// emits one instruction: `OP_POP`, or `OP_CLOSE_UPVALUE` when a
    /// closure captured it and the value must outlive the slot.
    fn end_scope(&mut self) {
        let frame = self.frame_mut();
        assert!(frame.scope_depth > 0);
        frame.scope_depth -= 1;

        loop {
            let captured = {
                let frame = self.frame();
                match frame.locals.last() {
                    Some(local) if matches!(local.depth, Some(d) if d > frame.scope_depth) => {
                        local.is_captured
                    }
                    _ => break,
                }
            };

            self.frame_mut().locals.pop();
            if captured {
                self.emit_instruction(OpCode::CloseUpvalue);
            } else {
                self.emit_instruction(OpCode::Pop);
            }
        }
    }

    //////////////////////////////////////// Variables ////////////////////////////////////////////

    /// Consume the next identifier and declare it as a variable. Returns
    /// the constant index for the identifier's name when at global scope;
    /// locals do not need one and get `0`.
    fn parse_variable(&mut self, error_message: &str) -> u8 {
        self.parser.consume(TokenKind::Identifier, error_message);

        self.declare_variable();
        if self.frame().scope_depth > 0 {
            return 0;
        }

        self.identifier_constant(self.parser.previous)
    }

    /// Add the identifier's text to the current chunk's constant pool.
    fn identifier_constant(&mut self, name: Token) -> u8 {
        self.make_constant(name.text.into())
    }

    /// Reserve a slot for a new local. Globals are late bound and skip this.
    fn declare_variable(&mut self) {
        if self.frame().scope_depth == 0 {
            return;
        }

        let name = self.parser.previous;

        // Shadowing an outer scope is fine; redeclaring within the current
        // scope is not.
        let mut duplicate = false;
        {
            let frame = self.frame();
            for local in frame.locals.iter().rev() {
                if matches!(local.depth, Some(depth) if depth < frame.scope_depth) {
                    break;
                }
                if local.name == name.text {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            let message = format!("Already a variable named '{}' in this scope.", name.text);
            self.parser.error(&message);
        }

        self.add_local(name.text);
    }

    fn add_local(&mut self, name: &'a str) {
        if self.frame().locals.len() >= MAX_LOCALS {
            self.parser.error("Too many local variables in function.");
            return;
        }

        self.frame_mut().locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    /// Mark the most recent local as initialized and usable.
    fn mark_initialized(&mut self) {
        let frame = self.frame_mut();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        if let Some(local) = frame.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    /// Finish a variable declaration: globals get `OP_DEFINE_GLOBAL`,
    /// locals simply leave their initializer sitting in their stack slot.
    fn define_variable(&mut self, global: u8) {
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_instruction(OpCode::DefineGlobal)
            .with_operand(global);
    }

    /// Finds the stack slot for a local of `frame_index`'s function, or
    /// `None` if the name is not a local there.
    fn resolve_local(&mut self, frame_index: usize, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;

        for (i, local) in self.frames[frame_index].locals.iter().enumerate().rev() {
            if local.name == name {
                uninitialized = local.depth.is_none();
                found = u8::try_from(i).ok();
                break;
            }
        }

        if uninitialized {
            let message = format!("Can't read local variable '{name}' in its own initializer.");
            self.parser.error(&message);
        }
        found
    }

    /// Finds (or registers) an upvalue for `name` in the function at
    /// `frame_index`. Walks outward recursively: the frame where the name
    /// is a local captures it directly (`is_local`), and every frame in
    /// between re-exports it as an upvalue of an upvalue.
    fn resolve_upvalue(&mut self, frame_index: usize, name: &str) -> Option<u8> {
        if frame_index == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(frame_index - 1, name) {
            self.frames[frame_index - 1].locals[local as usize].is_captured = true;
            return self.add_upvalue(frame_index, local, true);
        }

        if let Some(upvalue) = self.resolve_upvalue(frame_index - 1, name) {
            return self.add_upvalue(frame_index, upvalue, false);
        }

        None
    }

    /// Register an upvalue on the function at `frame_index`, reusing an
    /// existing entry for the same capture.
    fn add_upvalue(&mut self, frame_index: usize, index: u8, is_local: bool) -> Option<u8> {
        let upvalue = UpvalueRef { index, is_local };
        let frame = &mut self.frames[frame_index];

        if let Some(existing) = frame.upvalues.iter().position(|&u| u == upvalue) {
            return Some(existing as u8);
        }

        if frame.upvalues.len() >= MAX_UPVALUES {
            self.parser
                .error("Too many closure variables in function.");
            return None;
        }

        frame.upvalues.push(upvalue);
        Some((frame.upvalues.len() - 1) as u8)
    }

    /// Parse a variable reference or assignment, depending on `can_assign`
    /// and the syntactic context. Resolution order: local slot, then
    /// upvalue, then global by name.
    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let top = self.frames.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(top, name.text) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(top, name.text) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            if self.frame().global_initializer == Some(name.text) {
                let message =
                    format!("Can't read local variable '{}' in its own initializer.", name.text);
                self.parser.error(&message);
            }
            let arg = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, arg)
        };

        // Peek ahead and look if we're assigning. This only works if we're
        // parsing at a precedence at or below assignment.
        if can_assign && self.match_and_advance(TokenKind::Equal) {
            self.expression();
            self.emit_instruction(set_op).with_operand(arg);
        } else {
            self.emit_instruction(get_op).with_operand(arg);
        }
    }

    ////////////////////////////////////// Pratt parsing //////////////////////////////////////////

    /// The core of the Pratt parsing algorithm.
    ///
    /// See: <https://en.wikipedia.org/wiki/Operator-precedence_parser#Pratt_parsing>
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let can_assign = precedence <= Precedence::Assignment;

        // First, figure out how to parse the prefix.
        if let Some(prefix_rule) = self.rule_from_previous().prefix {
            prefix_rule(self, can_assign);
        } else {
            self.parser.error("Expect expression.");
            return;
        }

        while precedence <= self.rule_from_current().precedence {
            // current is now previous:
            self.advance();
            let infix_rule = self
                .rule_from_previous()
                .infix
                .expect("a rule with a defined precedence must always have an infix rule");

            infix_rule(self, can_assign);
        }

        if can_assign && self.match_and_advance(TokenKind::Equal) {
            self.parser.error("Invalid assignment target.");
        }
    }

    /// Parse a comma-separated argument list up to the closing paren.
    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.parser.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }

                if !self.match_and_advance(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    /////////////////////////////////////// Emitters //////////////////////////////////////////////

    /// Writes an [OpCode] to the current [Chunk].
    /// Returns a [WrittenOpcode], with which you can append operands.
    fn emit_instruction(&mut self, opcode: OpCode) -> WrittenOpcode {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(opcode, line)
    }

    /// Writes two [OpCode]s to the current [Chunk].
    fn emit_instructions(&mut self, op1: OpCode, op2: OpCode) {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(op1, line);
        self.current_chunk().write_opcode(op2, line);
    }

    /// Appends the function epilogue: an implicit `nil` return value.
    fn emit_return(&mut self) {
        self.emit_instructions(OpCode::Nil, OpCode::Return);
    }

    /// Appends [OpCode::Constant] loading the given value.
    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_instruction(OpCode::Constant).with_operand(index);
    }

    /// Appends a new constant to the current [Chunk]'s pool.
    ///
    /// When the pool is full this records a compiler error and returns `0`;
    /// the chunk can still be appended to, but it is invalid and will not
    /// be handed to the VM.
    fn make_constant(&mut self, value: Value) -> u8 {
        if let Some(index) = self.current_chunk().add_constant(value) {
            index
        } else {
            self.parser.error("Too many constants in one chunk.");
            0
        }
    }

    /// Emit a forward jump with a placeholder displacement. Returns the
    /// offset of the displacement, to be fixed up by [Compiler::patch_jump].
    fn emit_jump(&mut self, opcode: OpCode) -> usize {
        self.emit_instruction(opcode).with_short_operand(0xffff)
    }

    /// Point the jump displacement at `operand_offset` to the current end
    /// of the chunk.
    fn patch_jump(&mut self, operand_offset: usize) {
        // -2 for the displacement bytes themselves: the VM has consumed them
        // by the time it adds the displacement to its instruction pointer.
        let jump = self.current_chunk().len() - operand_offset - 2;
        if jump > u16::MAX as usize {
            self.parser.error("Too much code to jump over.");
        }

        self.current_chunk()
            .patch_short(operand_offset, (jump & 0xffff) as u16);
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        // +3 for this instruction: the displacement is applied after the
        // opcode and both operand bytes have been consumed.
        let offset = self.current_chunk().len() + 3 - loop_start;
        if offset > u16::MAX as usize {
            self.parser.error("Loop body too large.");
        }

        self.emit_instruction(OpCode::Loop)
            .with_short_operand((offset & 0xffff) as u16);
    }

    ///////////////////////////////////////// Aliases /////////////////////////////////////////////

    /// Returns the innermost function frame.
    #[inline(always)]
    fn frame(&self) -> &FunctionFrame<'a> {
        self.frames.last().expect("no active function frame")
    }

    #[inline(always)]
    fn frame_mut(&mut self) -> &mut FunctionFrame<'a> {
        self.frames.last_mut().expect("no active function frame")
    }

    /// Returns the [Chunk] of the function being compiled.
    #[inline(always)]
    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.frame_mut().function.chunk
    }

    /// Advance one token in the scanner, such that:
    /// ```text
    /// (previous, current) = (current, scanner.next_token())
    /// ```
    #[inline(always)]
    fn advance(&mut self) {
        self.parser.advance()
    }

    /// Returns the line number of the prefix token, a.k.a., `self.parser.previous`.
    #[inline(always)]
    fn line_number_of_prefix(&self) -> usize {
        self.parser.previous.line
    }

    /// Delegates to [Parser::match_and_advance]. Returns true if the token
    /// was matched.
    #[inline(always)]
    fn match_and_advance(&mut self, desired: TokenKind) -> bool {
        self.parser.match_and_advance(desired)
    }

    /// Returns the rule for the prefix in the process of being parsed.
    #[inline(always)]
    fn rule_from_previous(&self) -> ParserRule {
        get_rule(self.parser.previous.kind)
    }

    /// Returns the rule for the token about to be parsed.
    #[inline(always)]
    fn rule_from_current(&self) -> ParserRule {
        get_rule(self.parser.current.kind)
    }

    /// Return the kind of the previous token. This is useful in prefix
    /// parser functions.
    #[inline(always)]
    fn previous_kind(&self) -> TokenKind {
        self.parser.previous.kind
    }
}

////////////////////////////////////////// Parser rules ///////////////////////////////////////////

/// Makes defining [ParserRule]s a bit cleaner looking.
macro_rules! rule {
    ($prefix:expr, $infix:expr, $precedence:expr) => {
        ParserRule {
            prefix: $prefix,
            infix: $infix,
            precedence: $precedence,
        }
    };
}

/// The Pratt table: for each token kind, its prefix handler, infix handler,
/// and infix precedence. Built once, on first use.
static PARSE_RULES: Lazy<EnumMap<TokenKind, ParserRule>> = Lazy::new(|| {
    use TokenKind::*;
    enum_map! {
        //                      Prefix          Infix          Precedence
        LeftParen    => rule! { Some(grouping), Some(call),    Precedence::Call },
        Minus        => rule! { Some(unary),    Some(binary),  Precedence::Term },
        Plus         => rule! { None,           Some(binary),  Precedence::Term },
        Slash        => rule! { None,           Some(binary),  Precedence::Factor },
        Star         => rule! { None,           Some(binary),  Precedence::Factor },
        Bang         => rule! { Some(unary),    None,          Precedence::None },
        BangEqual    => rule! { None,           Some(binary),  Precedence::Equality },
        EqualEqual   => rule! { None,           Some(binary),  Precedence::Equality },
        Greater      => rule! { None,           Some(binary),  Precedence::Comparison },
        GreaterEqual => rule! { None,           Some(binary),  Precedence::Comparison },
        Less         => rule! { None,           Some(binary),  Precedence::Comparison },
        LessEqual    => rule! { None,           Some(binary),  Precedence::Comparison },
        Identifier   => rule! { Some(variable), None,          Precedence::None },
        StrLiteral   => rule! { Some(string),   None,          Precedence::None },
        Number       => rule! { Some(number),   None,          Precedence::None },
        And          => rule! { None,           Some(logical_and), Precedence::And },
        Or           => rule! { None,           Some(logical_or),  Precedence::Or },
        False        => rule! { Some(literal),  None,          Precedence::None },
        Nil          => rule! { Some(literal),  None,          Precedence::None },
        True         => rule! { Some(literal),  None,          Precedence::None },
        _            => rule! { None,           None,          Precedence::None },
    }
});

#[inline(always)]
fn get_rule(kind: TokenKind) -> ParserRule {
    (*PARSE_RULES)[kind]
}

/// Parse '(' as a prefix. Assumes '(' has been consumed.
fn grouping(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::LeftParen, compiler.previous_kind());
    compiler.expression();
    compiler
        .parser
        .consume(TokenKind::RightParen, "Expect ')' after expression.");
}

/// Parse a number literal as a prefix. Assumes it has been consumed.
fn number(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::Number, compiler.previous_kind());
    let value = compiler
        .parser
        .previous
        .text
        .parse::<f64>()
        .expect("Internal error: TokenKind::Number MUST parse as a float, but didn't?");
    compiler.emit_constant(value.into());
}

/// Parse a unary operator as a prefix. Assumes the operator has been
/// consumed.
fn unary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.previous_kind();

    // Compile the operand, so that it's placed on the stack.
    compiler.parse_precedence(Precedence::Unary);

    match operator {
        TokenKind::Bang => compiler.emit_instruction(OpCode::Not),
        TokenKind::Minus => compiler.emit_instruction(OpCode::Negate),
        _ => unreachable!(),
    };
}

/// Parse a binary operator as an infix. Assumes the operator has been
/// consumed.
fn binary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.previous_kind();
    let rule = get_rule(operator);

    compiler.parse_precedence(rule.higher_precedence());
    match operator {
        TokenKind::BangEqual => compiler.emit_instructions(OpCode::Equal, OpCode::Not),
        TokenKind::EqualEqual => {
            compiler.emit_instruction(OpCode::Equal);
        }
        TokenKind::Greater => {
            compiler.emit_instruction(OpCode::Greater);
        }
        TokenKind::GreaterEqual => compiler.emit_instructions(OpCode::Less, OpCode::Not),
        TokenKind::Less => {
            compiler.emit_instruction(OpCode::Less);
        }
        TokenKind::LessEqual => compiler.emit_instructions(OpCode::Greater, OpCode::Not),
        TokenKind::Plus => {
            compiler.emit_instruction(OpCode::Add);
        }
        TokenKind::Minus => {
            compiler.emit_instruction(OpCode::Subtract);
        }
        TokenKind::Star => {
            compiler.emit_instruction(OpCode::Multiply);
        }
        TokenKind::Slash => {
            compiler.emit_instruction(OpCode::Divide);
        }
        _ => unreachable!(),
    };
}

/// Parse a call as an infix on the callee. Assumes '(' has been consumed.
fn call(compiler: &mut Compiler, _can_assign: bool) {
    let arg_count = compiler.argument_list();
    compiler
        .emit_instruction(OpCode::Call)
        .with_operand(arg_count);
}

/// Parse a keyword literal as a prefix. Assumes it has been consumed.
fn literal(compiler: &mut Compiler, _can_assign: bool) {
    match compiler.previous_kind() {
        TokenKind::False => compiler.emit_instruction(OpCode::False),
        TokenKind::Nil => compiler.emit_instruction(OpCode::Nil),
        TokenKind::True => compiler.emit_instruction(OpCode::True),
        _ => unreachable!(),
    };
}

/// Parse a string literal. Adds its contents to the constant pool.
fn string(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::StrLiteral, compiler.previous_kind());

    // Access the string contents (without the quotes).
    let literal = compiler.parser.previous.text;
    debug_assert!(literal.len() >= 2);
    debug_assert!(literal.starts_with('"'));
    debug_assert!(literal.ends_with('"'));

    let contents = &literal[1..literal.len() - 1];
    compiler.emit_constant(contents.into());
}

/// Parse a variable. It can be either an access or an assignment, which is
/// why `can_assign` is threaded through all the handlers.
fn variable(compiler: &mut Compiler, can_assign: bool) {
    compiler.named_variable(compiler.parser.previous, can_assign);
}

/// Parse `and` as a short-circuiting infix: if the left operand is falsey
/// it stays on the stack and the right operand is skipped.
fn logical_and(compiler: &mut Compiler, _can_assign: bool) {
    let end_jump = compiler.emit_jump(OpCode::JumpIfFalse);
    compiler.emit_instruction(OpCode::Pop);
    compiler.parse_precedence(Precedence::And);
    compiler.patch_jump(end_jump);
}

/// Parse `or` as a short-circuiting infix: a truthy left operand stays on
/// the stack and the right operand is skipped.
fn logical_or(compiler: &mut Compiler, _can_assign: bool) {
    let else_jump = compiler.emit_jump(OpCode::JumpIfFalse);
    let end_jump = compiler.emit_jump(OpCode::Jump);

    compiler.patch_jump(else_jump);
    compiler.emit_instruction(OpCode::Pop);
    compiler.parse_precedence(Precedence::Or);
    compiler.patch_jump(end_jump);
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::debug::{disassemble, Operand};

    fn compile_ok(source: &str) -> Rc<Function> {
        compile("test", source).expect("source should compile")
    }

    fn opcodes(source: &str) -> Vec<OpCode> {
        let function = compile_ok(source);
        disassemble(&function.chunk)
            .into_iter()
            .map(|instruction| instruction.opcode)
            .collect()
    }

    fn diagnostics(source: &str) -> Vec<Diagnostic> {
        match compile("test", source) {
            Err(InterpretationError::CompileError(diagnostics)) => diagnostics,
            Err(other) => panic!("expected a compile error, got {other:?}"),
            Ok(_) => panic!("expected a compile error, but compilation succeeded"),
        }
    }

    #[test]
    fn precedence_confidence_check() {
        // High-level precedence (C-like)
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Or < Precedence::And);
        assert!(Precedence::And < Precedence::Equality);
        assert!(Precedence::Equality < Precedence::Comparison);

        // PEDMAS
        // () has greater precedence than */
        assert!(Precedence::Call > Precedence::Factor);
        // */ has greater precedence than +-
        assert!(Precedence::Factor > Precedence::Term);

        // `and` should be one level of precedence higher than `or`
        assert_eq!(Precedence::And, Precedence::Or.higher_precedence());
        assert_eq!(Precedence::Factor, Precedence::Term.higher_precedence());
    }

    #[test]
    fn print_statement_with_arithmetic() {
        use OpCode::*;
        assert_eq!(
            vec![
                Constant, Constant, Constant, Multiply, Constant, Divide, Add, Print, Nil, Return
            ],
            opcodes("print 1+2*3/4;")
        );
    }

    #[test]
    fn global_variable_declaration() {
        use OpCode::*;
        assert_eq!(
            vec![Constant, Constant, Add, DefineGlobal, Nil, Return],
            opcodes("var test=1+2;")
        );
    }

    #[test]
    fn if_else_statement() {
        use OpCode::*;
        assert_eq!(
            vec![
                Constant,
                Constant,
                Constant,
                Add,
                Less,
                JumpIfFalse,
                Pop,
                True,
                Print,
                Jump,
                Pop,
                False,
                Print,
                Nil,
                Return,
            ],
            opcodes("if(1<1+1){print true;}else{print false;}")
        );
    }

    #[test]
    fn while_loop_jumps_backwards() {
        use OpCode::*;
        assert_eq!(
            vec![
                Constant,     // 0
                DefineGlobal, // x = 0
                GetGlobal,    // loop start
                Constant,
                Less,
                JumpIfFalse,
                Pop,
                GetGlobal, // body: print x;
                Print,
                Loop,
                Pop,
                Nil,
                Return,
            ],
            opcodes("var x = 0; while (x < 3) { print x; }")
        );
    }

    #[test]
    fn block_locals_use_slots_and_are_popped() {
        use OpCode::*;
        // Slot 1: the script's slot 0 is reserved for the callee.
        let function = compile_ok("{ var a = 7; print a; }");
        let instructions = disassemble(&function.chunk);

        assert_eq!(
            vec![Constant, GetLocal, Print, Pop, Nil, Return],
            instructions
                .iter()
                .map(|instruction| instruction.opcode)
                .collect::<Vec<_>>()
        );
        assert_eq!(Operand::Slot(1), instructions[1].operand);
    }

    #[test]
    fn short_circuit_operators_emit_jumps() {
        use OpCode::*;
        assert_eq!(
            vec![False, JumpIfFalse, Pop, True, Pop, Nil, Return],
            opcodes("false and true;")
        );
        assert_eq!(
            vec![False, JumpIfFalse, Jump, Pop, True, Pop, Nil, Return],
            opcodes("false or true;")
        );
    }

    #[test]
    fn function_declaration_emits_closure() {
        use OpCode::*;
        let script = compile_ok("fun add(a, b) { return a + b; }");
        let instructions = disassemble(&script.chunk);

        assert_eq!(
            vec![Closure, DefineGlobal, Nil, Return],
            instructions
                .iter()
                .map(|instruction| instruction.opcode)
                .collect::<Vec<_>>()
        );

        // Dig the compiled function out of the constant pool.
        let Operand::Closure { constant, ref upvalues } = instructions[0].operand else {
            panic!("expected a closure operand");
        };
        assert!(upvalues.is_empty());

        let Some(Value::Obj(Obj::Function(add))) = script.chunk.constant(constant as usize) else {
            panic!("expected a function constant");
        };
        assert_eq!(2, add.arity);
        assert_eq!("add", &*add.name);
        assert_eq!(
            vec![GetLocal, GetLocal, Add, Return, Nil, Return],
            disassemble(&add.chunk)
                .into_iter()
                .map(|instruction| instruction.opcode)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn captured_local_compiles_to_an_upvalue() {
        use OpCode::*;
        let script = compile_ok(
            "{
                var x = 1;
                fun f() { print x; }
             }",
        );
        let instructions = disassemble(&script.chunk);

        // The closure captures the enclosing local in slot 1, and the block
        // exit closes it instead of popping it. (`f` itself, never
        // captured, is an ordinary pop.)
        let closure = instructions
            .iter()
            .find(|instruction| instruction.opcode == Closure)
            .expect("the nested fun should compile to OP_CLOSURE");
        let Operand::Closure { constant, ref upvalues } = closure.operand else {
            panic!("expected a closure operand");
        };
        assert_eq!(&[(true, 1)], upvalues.as_slice());

        let kinds: Vec<_> = instructions
            .iter()
            .map(|instruction| instruction.opcode)
            .collect();
        assert_eq!(
            vec![Constant, Closure, Pop, CloseUpvalue, Nil, Return],
            kinds
        );

        // Inside the function, the same variable reads through the upvalue.
        let Some(Value::Obj(Obj::Function(f))) = script.chunk.constant(constant as usize) else {
            panic!("expected a function constant");
        };
        assert_eq!(1, f.upvalue_count);
        let inner: Vec<_> = disassemble(&f.chunk)
            .into_iter()
            .map(|instruction| instruction.opcode)
            .collect();
        assert_eq!(vec![GetUpvalue, Print, Nil, Return], inner);
    }

    #[test]
    fn transitive_capture_threads_through_the_middle_function() {
        let script = compile_ok(
            "fun outer() {
                var x = 1;
                fun middle() {
                    fun inner() { print x; }
                }
             }",
        );

        // Dig out `outer` through the script's OP_CLOSURE operand; at global
        // scope the name constant occupies the pool slot before it.
        let outer_closure = disassemble(&script.chunk)
            .into_iter()
            .find(|instruction| instruction.opcode == OpCode::Closure)
            .expect("outer compiles to OP_CLOSURE");
        let Operand::Closure { constant, .. } = outer_closure.operand else {
            panic!("expected a closure operand");
        };
        let Some(Value::Obj(Obj::Function(outer))) = script.chunk.constant(constant as usize)
        else {
            panic!("expected outer in the constant pool");
        };

        let middle_closure = disassemble(&outer.chunk)
            .into_iter()
            .find(|instruction| instruction.opcode == OpCode::Closure)
            .expect("middle compiles to OP_CLOSURE");
        // middle captures outer's local x directly...
        let Operand::Closure {
            constant: middle_constant,
            upvalues: middle_upvalues,
        } = middle_closure.operand
        else {
            panic!("expected a closure operand");
        };
        assert_eq!(vec![(true, 1)], middle_upvalues);

        // ...and inner captures it from middle's upvalues.
        let Some(Value::Obj(Obj::Function(middle))) =
            outer.chunk.constant(middle_constant as usize)
        else {
            panic!("expected middle in outer's constant pool");
        };
        let inner_closure = disassemble(&middle.chunk)
            .into_iter()
            .find(|instruction| instruction.opcode == OpCode::Closure)
            .expect("inner compiles to OP_CLOSURE");
        assert_eq!(
            Operand::Closure {
                constant: 0,
                upvalues: vec![(false, 0)],
            },
            inner_closure.operand
        );
    }

    #[test]
    fn disassembly_tiles_the_whole_byte_stream() {
        let script = compile_ok(
            "var total = 0;
             fun add(a, b) { return a + b; }
             for (var i = 0; i < 10; i = i + 1) {
                total = add(total, i);
             }
             if (total > 40 and total < 50) { print total; } else { print \"odd\"; }",
        );

        let mut offset = 0;
        for instruction in disassemble(&script.chunk) {
            assert_eq!(offset, instruction.offset);
            offset = instruction.next_offset;
        }
        assert_eq!(script.chunk.len(), offset);
    }

    #[test]
    fn reading_a_variable_in_its_own_initializer() {
        // At global scope...
        let errors = diagnostics("var a = a;");
        assert_eq!(1, errors.len());
        assert_eq!(
            "Can't read local variable 'a' in its own initializer.",
            errors[0].message
        );

        // ...and in a local scope.
        let errors = diagnostics("{ var b = 1; { var b = b; } }");
        assert_eq!(1, errors.len());
        assert_eq!(
            "Can't read local variable 'b' in its own initializer.",
            errors[0].message
        );
    }

    #[test]
    fn duplicate_local_in_same_scope() {
        let errors = diagnostics("{ var a = 1; var a = 2; }");
        assert_eq!(1, errors.len());
        assert_eq!(
            "Already a variable named 'a' in this scope.",
            errors[0].message
        );
    }

    #[test]
    fn invalid_assignment_target() {
        let errors = diagnostics("var a = 1; var b = 2; a + b = 3;");
        assert_eq!(1, errors.len());
        assert_eq!("Invalid assignment target.", errors[0].message);
    }

    #[test]
    fn return_outside_a_function() {
        let errors = diagnostics("return 1;");
        assert_eq!(1, errors.len());
        assert_eq!("Can't return from top-level code.", errors[0].message);
    }

    #[test]
    fn panic_mode_synchronizes_at_statement_boundaries() {
        // Two distinct broken statements produce two diagnostics, not a
        // cascade from the first one.
        let errors = diagnostics("var 1 = 2; print );");
        assert_eq!(2, errors.len());
        assert_eq!("Expect variable name.", errors[0].message);
        assert_eq!("Expect expression.", errors[1].message);
    }

    #[test]
    fn missing_semicolon() {
        let errors = diagnostics("print 1");
        assert_eq!(1, errors.len());
        assert_eq!("Expect ';' after value.", errors[0].message);
        assert_eq!(ErrorLocation::AtEnd, errors[0].location);
    }

    #[test]
    fn scanner_errors_become_diagnostics() {
        let errors = diagnostics("print \"unterminated;");
        assert!(errors
            .iter()
            .any(|diagnostic| diagnostic.message == "Unterminated string."));
    }
}
