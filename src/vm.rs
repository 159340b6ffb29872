//! The bytecode virtual machine.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use static_assertions::const_assert;

use crate::chunk::{Chunk, OpCode};
use crate::error::{InterpretationError, RuntimeError, TraceLine};
use crate::object::{Closure, Function, Native, NativeFn, Obj, Upvalue};
use crate::value::Value;

/// Maximum depth of the call-frame stack. Exceeding it is reported as a
/// stack overflow.
pub const FRAMES_MAX: usize = 256;

/// Capacity of the value stack: every frame can address 256 slots.
pub const STACK_MAX: usize = FRAMES_MAX * (u8::MAX as usize + 1);
const_assert!(STACK_MAX == FRAMES_MAX * 256);

/// One in-progress function invocation.
struct CallFrame {
    /// The closure being executed.
    closure: Rc<Closure>,
    /// Instruction pointer: index of the next byte to execute in the
    /// closure's chunk.
    ip: usize,
    /// Frame pointer: the stack slot holding the callee itself. Locals live
    /// at `fp + slot`.
    fp: usize,
}

impl CallFrame {
    #[inline(always)]
    fn chunk(&self) -> &Chunk {
        self.closure.chunk()
    }
}

/// Maintains state for the Lox virtual machine: the value stack, the call
/// frames, the globals map, the open upvalues, and where `print` writes.
///
/// A VM can interpret any number of scripts; globals persist between runs,
/// which is what makes the REPL useful.
pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<Rc<str>, Value>,
    /// Upvalues still pointing into the stack. Capturing the same slot
    /// twice hands out the same cell, so sibling closures share state.
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    out: Box<dyn Write>,
}

impl Default for VM {
    fn default() -> Self {
        VM::new()
    }
}

impl VM {
    /// Create a VM that prints to stdout.
    pub fn new() -> VM {
        VM::with_output(Box::new(io::stdout()))
    }

    /// Create a VM that prints to the given sink. Tests use this to capture
    /// program output.
    pub fn with_output(out: Box<dyn Write>) -> VM {
        let mut vm = VM {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            out,
        };
        vm.define_native("clock", native_clock);
        vm
    }

    /// Expose a native function to Lox code as a global.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name: Rc<str> = Rc::from(name);
        let native = Native {
            name: Rc::clone(&name),
            function,
        };
        self.globals
            .insert(name, Value::Obj(Obj::Native(Rc::new(native))));
    }

    /// Compile and interpret the given source code in one step.
    pub fn interpret_source(&mut self, name: &str, source: &str) -> crate::Result<()> {
        let function = crate::compiler::compile(name, source)?;
        self.interpret(function)
    }

    /// Interpret a compiled script: wrap it in a closure, install it as
    /// frame 0, and run until that frame returns.
    pub fn interpret(&mut self, function: Rc<Function>) -> crate::Result<()> {
        self.reset();

        let closure = Rc::new(Closure::wrap(function));
        self.push(Value::Obj(Obj::Closure(Rc::clone(&closure))));
        self.call_closure(closure, 0)?;

        let result = self.run();
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    /// The main opcode interpreter loop.
    fn run(&mut self) -> crate::Result<()> {
        use OpCode::*;

        loop {
            if cfg!(feature = "trace_execution") {
                // Prints the current stack:
                print!("        ");
                for value in self.stack.iter() {
                    print!("[ {value} ]");
                }
                println!();

                // Print the next instruction:
                let frame = self.frame();
                crate::debug::disassemble_instruction(frame.chunk(), frame.ip);
            }

            let byte = self.read_byte();
            let opcode = OpCode::try_from(byte)
                .unwrap_or_else(|invalid| panic!("fetched invalid opcode {invalid:#04x}"));

            match opcode {
                Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                Nil => self.push(Value::Nil),
                True => self.push(Value::Bool(true)),
                False => self.push(Value::Bool(false)),
                Pop => {
                    self.pop();
                }
                GetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[self.frame().fp + slot].clone();
                    self.push(value);
                }
                SetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0).clone();
                    let fp = self.frame().fp;
                    self.stack[fp + slot] = value;
                }
                DefineGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0).clone();
                    self.globals.insert(name, value);
                    self.pop();
                }
                GetGlobal => {
                    let name = self.read_string_constant();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            return Err(self.runtime_error(format!("Undefined variable: {name}")))
                        }
                    }
                }
                SetGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0).clone();
                    match self.globals.get_mut(&name) {
                        Some(slot) => *slot = value,
                        None => {
                            return Err(self.runtime_error(format!("Undefined variable: {name}")))
                        }
                    }
                }
                GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let cell = Rc::clone(&self.frame().closure.upvalues[slot]);
                    let value = match &*cell.borrow() {
                        Upvalue::Open(stack_slot) => self.stack[*stack_slot].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.push(value);
                }
                SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0).clone();
                    let cell = Rc::clone(&self.frame().closure.upvalues[slot]);
                    let mut upvalue = cell.borrow_mut();
                    match &mut *upvalue {
                        Upvalue::Open(stack_slot) => self.stack[*stack_slot] = value,
                        Upvalue::Closed(closed) => *closed = value,
                    }
                }
                Equal => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push(Value::Bool(lhs == rhs));
                }
                Greater => self.binary_op(|a, b| a > b)?,
                Less => self.binary_op(|a, b| a < b)?,
                Add => self.add()?,
                Subtract => self.binary_op(|a, b| a - b)?,
                Multiply => self.binary_op(|a, b| a * b)?,
                Divide => self.binary_op(|a, b| a / b)?,
                Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Negate => match self.peek(0).as_number() {
                    Some(number) => {
                        self.pop();
                        self.push(Value::Number(-number));
                    }
                    None => {
                        return Err(self.runtime_error("Operand must be a number.".to_owned()))
                    }
                },
                Print => {
                    let value = self.pop();
                    writeln!(self.out, "{value}").expect("failed to write program output");
                }
                Jump => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip += offset;
                }
                JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                Loop => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip -= offset;
                }
                Call => {
                    let arg_count = self.read_byte() as usize;
                    self.call_value(arg_count)?;
                }
                Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(Obj::Function(function)) => function,
                        _ => panic!("closure operand is not a function constant"),
                    };

                    let mut upvalues = Vec::with_capacity(function.upvalue_count);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let cell = if is_local {
                            let slot = self.frame().fp + index;
                            self.capture_upvalue(slot)
                        } else {
                            Rc::clone(&self.frame().closure.upvalues[index])
                        };
                        upvalues.push(cell);
                    }

                    let closure = crate::object::Closure { function, upvalues };
                    self.push(Value::Obj(Obj::Closure(Rc::new(closure))));
                }
                CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("returned with no active frame");
                    // Any captured locals of this frame must outlive it.
                    self.close_upvalues(frame.fp);
                    self.stack.truncate(frame.fp);

                    if self.frames.is_empty() {
                        // Frame 0 just returned; the wrapping closure was
                        // discarded by the truncate.
                        return Ok(());
                    }
                    self.push(result);
                }
            }
        }
    }

    ////////////////////////////////////////// Calls //////////////////////////////////////////////

    /// Dispatch a call to whatever is sitting under the arguments.
    fn call_value(&mut self, arg_count: usize) -> crate::Result<()> {
        let callee = self.peek(arg_count).clone();
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, arg_count),
            Value::Obj(Obj::Native(native)) => {
                let first_arg = self.stack.len() - arg_count;
                let result = (native.function)(&self.stack[first_arg..]);
                // The callee and its arguments are replaced by the result.
                self.stack.truncate(first_arg - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(self.runtime_error("Can only call functions and classes.".to_owned())),
        }
    }

    /// Push a new call frame for the closure. The frame's base is the stack
    /// slot holding the callee, so slot 0 is the callee itself and the
    /// arguments are already sitting in slots 1..=arity.
    fn call_closure(&mut self, closure: Rc<Closure>, arg_count: usize) -> crate::Result<()> {
        if arg_count != closure.arity() as usize {
            let message = format!(
                "Expected {} arguments but got {}",
                closure.arity(),
                arg_count
            );
            return Err(self.runtime_error(message));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow.".to_owned()));
        }

        let fp = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame { closure, ip: 0, fp });
        Ok(())
    }

    //////////////////////////////////////// Upvalues /////////////////////////////////////////////

    /// Capture the variable at `slot`, reusing the open upvalue for that
    /// slot if one exists. Sharing the cell is what makes two closures over
    /// the same variable observe each other's writes.
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        if let Some(existing) = self
            .open_upvalues
            .iter()
            .find(|cell| cell.borrow().open_slot() == Some(slot))
        {
            return Rc::clone(existing);
        }

        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.push(Rc::clone(&cell));
        cell
    }

    /// Close every open upvalue pointing at `from_slot` or above: the value
    /// migrates from the stack into the shared cell.
    fn close_upvalues(&mut self, from_slot: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|cell| {
            let slot = {
                cell.borrow()
                    .open_slot()
                    .expect("open_upvalues holds only open cells")
            };
            if slot >= from_slot {
                cell.borrow_mut().close(stack[slot].clone());
                false
            } else {
                true
            }
        });
    }

    ///////////////////////////////////// Bytecode access /////////////////////////////////////////

    #[inline(always)]
    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    #[inline(always)]
    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    /// Fetches the next byte, **AND** increments the instruction pointer.
    #[inline(always)]
    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active call frame");
        let byte = frame
            .closure
            .chunk()
            .get(frame.ip)
            .expect("instruction pointer out of range")
            .byte();
        frame.ip += 1;
        byte
    }

    /// Fetches the next two bytes as a big-endian `u16`.
    #[inline(always)]
    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from(hi) << 8 | u16::from(lo)
    }

    /// Fetches a one-byte constant index and resolves it in the pool.
    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame()
            .chunk()
            .constant(index)
            .expect("constant index out of range")
            .clone()
    }

    /// Like [VM::read_constant], for the name operands of the `*_GLOBAL`
    /// instructions, which are always strings.
    fn read_string_constant(&mut self) -> Rc<str> {
        match self.read_constant() {
            Value::Str(name) => name,
            other => panic!("expected a name constant, found {other}"),
        }
    }

    ////////////////////////////////////// Value stack ////////////////////////////////////////////

    /// Pushes a [Value] on to the value stack.
    ///
    /// The compiler bounds each function's stack usage, so well-formed
    /// bytecode cannot outgrow [STACK_MAX] within [FRAMES_MAX] frames.
    #[inline(always)]
    fn push(&mut self, value: Value) {
        debug_assert!(self.stack.len() < STACK_MAX);
        self.stack.push(value);
    }

    /// Pops and returns the top [Value] on the value stack.
    ///
    /// # Panics
    ///
    /// Panics when the value stack is empty. Given well-formed bytecode, a
    /// pop cannot occur on an empty stack; therefore the interpreter panics
    /// if it is in this state.
    #[inline(always)]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack is empty")
    }

    /// Peeks at the value relative to the top of the stack.
    ///
    /// # Panics
    ///
    /// Panics when the distance escapes the bounds of the stack.
    #[inline(always)]
    fn peek(&self, distance: usize) -> &Value {
        self.stack
            .get(self.stack.len() - 1 - distance)
            .expect("peeked escaped bounds of the stack")
    }

    //////////////////////////////////////// Operators ////////////////////////////////////////////

    /// Pops two number operands and pushes the result of `op`.
    fn binary_op<F, T>(&mut self, op: F) -> crate::Result<()>
    where
        F: Fn(f64, f64) -> T,
        T: Into<Value>,
    {
        let rhs = self.pop();
        let lhs = self.pop();

        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(op(a, b).into());
                Ok(())
            }
            (_, _) => Err(self.runtime_error("Operands must be numbers.".to_owned())),
        }
    }

    /// `+` is overloaded: two numbers add; if either side is a string, both
    /// sides are stringified and concatenated.
    fn add(&mut self) -> crate::Result<()> {
        let rhs = self.pop();
        let lhs = self.pop();

        match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                self.push(Value::Str(Rc::from(format!("{lhs}{rhs}"))));
                Ok(())
            }
            (_, _) => Err(self.runtime_error("Operands must be numbers or strings.".to_owned())),
        }
    }

    //////////////////////////////////////// Failure //////////////////////////////////////////////

    /// Build the runtime error for `message`, walking the call frames from
    /// innermost out to assemble the stack trace.
    fn runtime_error(&self, message: String) -> InterpretationError {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            // The ip has advanced past the instruction that failed.
            let instruction = frame.ip.saturating_sub(1);
            let line = function.chunk.line_number_for(instruction).unwrap_or(0);
            trace.push(TraceLine {
                line,
                function: function.to_string(),
            });
        }

        RuntimeError { message, trace }.into()
    }
}

///////////////////////////////////////////// Natives /////////////////////////////////////////////

/// Seconds since the Unix epoch, as a Lox number.
fn native_clock(_args: &[Value]) -> Value {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Value::Number(elapsed.as_secs_f64())
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// A `Write` sink that can still be read after being boxed into the VM.
    #[derive(Clone, Default)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl SharedOutput {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).expect("program output is UTF-8")
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capturing_vm() -> (VM, SharedOutput) {
        let output = SharedOutput::default();
        let vm = VM::with_output(Box::new(output.clone()));
        (vm, output)
    }

    /// Run a program and return what it printed.
    fn run(source: &str) -> String {
        let (mut vm, output) = capturing_vm();
        vm.interpret_source("script", source)
            .expect("program should run without errors");
        assert!(vm.stack.is_empty(), "stack should be empty after frame 0 returns");
        output.contents()
    }

    /// Run a program that is expected to die at runtime.
    fn run_expecting_error(source: &str) -> RuntimeError {
        let (mut vm, _output) = capturing_vm();
        match vm.interpret_source("script", source) {
            Err(InterpretationError::RuntimeError(error)) => error,
            Err(other) => panic!("expected a runtime error, got {other:?}"),
            Ok(()) => panic!("expected a runtime error, but the program ran fine"),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!("2.5\n", run("print 1 + 2 * 3 / 4;"));
    }

    #[test]
    fn global_variables() {
        assert_eq!("3\n", run("var a = 1; var b = 2; print a + b;"));
    }

    #[test]
    fn if_else_takes_the_right_branch() {
        assert_eq!(
            "t\n",
            run("if (1 < 2) { print \"t\"; } else { print \"f\"; }")
        );
        assert_eq!(
            "f\n",
            run("if (2 < 1) { print \"t\"; } else { print \"f\"; }")
        );
    }

    #[test]
    fn while_loop() {
        assert_eq!("0\n1\n2\n", run("var x = 0; while (x < 3) { print x; x = x + 1; }"));
    }

    #[test]
    fn for_loop() {
        assert_eq!("0\n1\n2\n", run("for (var i = 0; i < 3; i = i + 1) { print i; }"));
    }

    #[test]
    fn function_call_and_return() {
        assert_eq!("5\n", run("fun f(a, b) { return a + b; } print f(2, 3);"));
    }

    #[test]
    fn function_without_return_yields_nil() {
        assert_eq!("nil\n", run("fun f() {} print f();"));
    }

    #[test]
    fn recursion() {
        let source = "fun fib(n) {
            if (n < 2) { return n; }
            return fib(n - 2) + fib(n - 1);
        }
        print fib(10);";
        assert_eq!("55\n", run(source));
    }

    #[test]
    fn counter_closure_survives_its_enclosing_frame() {
        let source = "fun counter() {
            var c = 0;
            fun tick() {
                c = c + 1;
                return c;
            }
            return tick;
        }
        var t = counter();
        print t();
        print t();
        print t();";
        assert_eq!("1\n2\n3\n", run(source));
    }

    #[test]
    fn sibling_closures_share_one_upvalue() {
        let source = "var inc; var get;
        fun make() {
            var shared = 0;
            fun i() { shared = shared + 1; return shared; }
            fun g() { return shared; }
            inc = i;
            get = g;
        }
        make();
        print inc();
        print inc();
        print get();";
        assert_eq!("1\n2\n2\n", run(source));
    }

    #[test]
    fn block_local_shadows_global_until_scope_exit() {
        let source = "var a = \"global\";
        {
            var a = \"local\";
            print a;
        }
        print a;";
        assert_eq!("local\nglobal\n", run(source));
    }

    #[test]
    fn short_circuit_skips_the_right_operand() {
        let source = "fun shout() { print \"evaluated\"; return true; }
        print false and shout();
        print true or shout();";
        // `shout` is never called, and the left operand is what remains.
        assert_eq!("false\ntrue\n", run(source));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!("foobar\n", run("print \"foo\" + \"bar\";"));
        assert_eq!("n=2\n", run("print \"n=\" + 2;"));
        assert_eq!("3true\n", run("print 3 + \"\" + true;"));
    }

    #[test]
    fn zero_and_empty_string_are_falsey() {
        assert_eq!("zero\n", run("if (0) { print \"nonzero\"; } else { print \"zero\"; }"));
        assert_eq!("empty\n", run("if (\"\") { print \"some\"; } else { print \"empty\"; }"));
    }

    #[test]
    fn printing_callables() {
        assert_eq!(
            "<closure <func f(#2)>>\n",
            run("fun f(a, b) {} print f;")
        );
        let output = run("print clock;");
        assert!(output.starts_with("<native clock@"), "got: {output}");
    }

    #[test]
    fn the_clock_native_ticks() {
        assert_eq!("true\n", run("print clock() > 0;"));
    }

    #[test]
    fn globals_persist_across_interpretations() {
        let (mut vm, output) = capturing_vm();
        vm.interpret_source("repl", "var x = 21;").unwrap();
        vm.interpret_source("repl", "print x + x;").unwrap();
        assert_eq!("42\n", output.contents());
    }

    #[test]
    fn arity_mismatch() {
        let error = run_expecting_error("fun f(a) {} f(1, 2);");
        assert_eq!("Expected 1 arguments but got 2", error.message);
        // The failure happens before f's frame exists, so the trace starts
        // at the caller.
        assert_eq!(1, error.trace.len());
        assert_eq!("<func script(#0)>", error.trace[0].function);
    }

    #[test]
    fn undefined_global_read_and_write() {
        let error = run_expecting_error("print nothing;");
        assert_eq!("Undefined variable: nothing", error.message);

        let error = run_expecting_error("nothing = 1;");
        assert_eq!("Undefined variable: nothing", error.message);
    }

    #[test]
    fn negating_a_string_is_a_type_error() {
        let error = run_expecting_error("print -\"muffin\";");
        assert_eq!("Operand must be a number.", error.message);
    }

    #[test]
    fn comparing_mixed_types_is_a_type_error() {
        let error = run_expecting_error("print 1 < \"two\";");
        assert_eq!("Operands must be numbers.", error.message);
    }

    #[test]
    fn adding_bools_is_a_type_error() {
        let error = run_expecting_error("print true + false;");
        assert_eq!("Operands must be numbers or strings.", error.message);
    }

    #[test]
    fn calling_a_number_fails() {
        let error = run_expecting_error("var x = 1; x();");
        assert_eq!("Can only call functions and classes.", error.message);
    }

    #[test]
    fn runaway_recursion_overflows_the_frame_stack() {
        let error = run_expecting_error("fun f() { f(); } f();");
        assert_eq!("Stack overflow.", error.message);
        assert_eq!(FRAMES_MAX, error.trace.len());
    }

    #[test]
    fn runtime_error_trace_lists_frames_innermost_first() {
        let source = "fun inner() { return -\"oops\"; }
        fun outer() { return inner(); }
        outer();";
        let error = run_expecting_error(source);
        assert_eq!("Operand must be a number.", error.message);

        let functions: Vec<_> = error
            .trace
            .iter()
            .map(|entry| entry.function.as_str())
            .collect();
        assert_eq!(
            vec!["<func inner(#0)>", "<func outer(#0)>", "<func script(#0)>"],
            functions
        );
        assert_eq!(1, error.trace[0].line);
        assert_eq!(2, error.trace[1].line);
    }

    #[test]
    fn equality_across_types() {
        assert_eq!("true\n", run("print 1 + 1 == 2;"));
        assert_eq!("false\n", run("print 1 == \"1\";"));
        assert_eq!("true\n", run("print \"a\" + \"b\" == \"ab\";"));
        assert_eq!("true\n", run("print nil == nil;"));
        assert_eq!("false\n", run("print nil == false;"));
    }
}
