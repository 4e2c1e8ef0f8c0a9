//! The single-pass compiler: lexing is driven on demand by the parser, and
//! every grammar production emits its bytecode directly as it's recognized
//! — there is no intermediate AST. Branch targets that aren't known yet
//! (forward jumps, loop tests) are backpatched into the [`Program`] once
//! the target address is reached.

use crate::error::{CompileError, Location};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use crate::types::{
    is_pointer, pointee, pointer_to, IdKind, SymbolTable, TypeId, CHAR, FIRST_COMPOSITE, INT,
    INT_SIZE, VOID,
};
use minic_core::{Opcode as Op, Program};

/// `value` discriminants for the four builtin `Sys` identifiers seeded
/// into every compilation's global scope.
const SYS_PRINTF: i64 = 0;
const SYS_MALLOC: i64 = 1;
const SYS_FREE: i64 = 2;
const SYS_EXIT: i64 = 3;

/// Output of a successful compile: the emitted program, its data segment,
/// and the entry point (`main`'s first instruction).
pub struct CompiledProgram {
    pub program: Program,
    pub data: Vec<u8>,
    pub entry: usize,
}

pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    curr: Token,
    symtab: SymbolTable,
    program: Program,
    data: Vec<u8>,
    /// Running negative offset for the local variable currently being
    /// declared in the function body being compiled.
    local_offset: i64,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &'a str) -> Result<Self, CompileError> {
        let mut lexer = Lexer::new(source);
        let curr = lexer.next().expect("lexer always yields at least Eof")?;
        let mut symtab = SymbolTable::new();
        let here = Location { line: 1, col: 1 };
        symtab.declare_id("printf", INT, SYS_PRINTF, IdKind::Sys, here.clone()).unwrap();
        symtab.declare_id("malloc", pointer_to(CHAR), SYS_MALLOC, IdKind::Sys, here.clone()).unwrap();
        symtab.declare_id("free", VOID, SYS_FREE, IdKind::Sys, here.clone()).unwrap();
        symtab.declare_id("exit", VOID, SYS_EXIT, IdKind::Sys, here).unwrap();
        Ok(Compiler { lexer, curr, symtab, program: Program::new(), data: Vec::new(), local_offset: 0 })
    }

    /// Compile a whole source file into a runnable program.
    pub fn compile(source: &'a str) -> Result<CompiledProgram, CompileError> {
        let mut c = Compiler::new(source)?;
        c.parse_program()?;
        let at = c.loc();
        let main = c
            .symtab
            .get_id("main")
            .cloned()
            .ok_or(CompileError::Undeclared { name: "main".to_string(), at })?;
        Ok(CompiledProgram { program: c.program, data: c.data, entry: main.value as usize })
    }

    fn loc(&self) -> Location {
        Location { line: self.curr.line, col: self.curr.col }
    }

    fn advance(&mut self) -> Result<(), CompileError> {
        self.curr = self.lexer.next().expect("lexer always yields at least Eof")?;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        if self.curr.kind != kind {
            return Err(CompileError::UnexpectedToken {
                expected: format!("{kind:?}"),
                found: format!("{:?} ({:?})", self.curr.kind, self.curr.lexeme),
                at: self.loc(),
            });
        }
        let tok = self.curr.clone();
        self.advance()?;
        Ok(tok)
    }

    fn expect_id(&mut self) -> Result<String, CompileError> {
        Ok(self.expect(TokenKind::Id)?.lexeme)
    }

    fn intern_string(&mut self, text: &str) -> i64 {
        let addr = self.data.len() as i64;
        self.data.extend_from_slice(text.as_bytes());
        self.data.push(0);
        addr
    }

    fn last_is_lvalue(&self) -> bool {
        matches!(self.program.last_op(), Some(Op::Li) | Some(Op::Lc))
    }

    fn load_op_for(ty: TypeId) -> Op {
        if ty == CHAR {
            Op::Lc
        } else {
            Op::Li
        }
    }

    // ---- top level ---------------------------------------------------

    fn parse_program(&mut self) -> Result<(), CompileError> {
        while self.curr.kind != TokenKind::Eof {
            self.parse_global_declaration()?;
        }
        Ok(())
    }

    fn parse_global_declaration(&mut self) -> Result<(), CompileError> {
        let base_ty = self.parse_base_type()?;
        if self.curr.kind == TokenKind::Semi {
            // tag-only declaration, e.g. `struct point;`
            self.advance()?;
            return Ok(());
        }
        loop {
            let at = self.loc();
            let mut ty = base_ty;
            while self.curr.kind == TokenKind::Star {
                ty = pointer_to(ty);
                self.advance()?;
            }
            let name = self.expect_id()?;
            if self.curr.kind == TokenKind::LParen {
                self.parse_function(&name, ty, at)?;
                return Ok(());
            }
            self.declare_global(&name, ty, at.clone())?;
            if self.curr.kind == TokenKind::Eq {
                // A global initializer's store code would have no caller
                // (the VM enters directly at `main`, never falling through
                // top-level declarations) and a constant can't be baked
                // into the byte-addressed data segment without widening it
                // beyond 0..=255, so globals are declaration-only; give
                // locals' `=` the initializer instead.
                return Err(CompileError::Other {
                    message: "a global variable cannot have an initializer".into(),
                    at,
                });
            }
            if self.curr.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            self.expect(TokenKind::Semi)?;
            return Ok(());
        }
    }

    fn declare_global(&mut self, name: &str, ty: TypeId, at: Location) -> Result<i64, CompileError> {
        if ty == VOID {
            return Err(CompileError::Other { message: "a global cannot have type void".into(), at });
        }
        let size = SymbolTable::align(self.symtab.sizeof(ty, at.clone())?.max(1));
        let addr = self.data.len() as i64;
        self.data.resize(self.data.len() + size as usize, 0);
        self.symtab.declare_id(name, ty, addr, IdKind::Global, at)?;
        Ok(addr)
    }

    // ---- types ---------------------------------------------------------

    fn parse_base_type(&mut self) -> Result<TypeId, CompileError> {
        match self.curr.kind {
            TokenKind::Void => {
                self.advance()?;
                Ok(VOID)
            }
            TokenKind::Char => {
                self.advance()?;
                Ok(CHAR)
            }
            TokenKind::Int => {
                self.advance()?;
                Ok(INT)
            }
            TokenKind::Float => Err(CompileError::Other {
                message: "floating-point types are not supported".into(),
                at: self.loc(),
            }),
            TokenKind::Union => Err(CompileError::Other {
                message: "'union' is reserved but has no grammar".into(),
                at: self.loc(),
            }),
            TokenKind::Struct => self.parse_aggregate(),
            TokenKind::Enum => self.parse_enum(),
            _ => Err(CompileError::UnexpectedToken {
                expected: "a type".into(),
                found: format!("{:?}", self.curr.kind),
                at: self.loc(),
            }),
        }
    }

    fn parse_aggregate(&mut self) -> Result<TypeId, CompileError> {
        self.advance()?; // struct
        let at = self.loc();
        let tag_name = if self.curr.kind == TokenKind::Id {
            let name = self.curr.lexeme.clone();
            self.advance()?;
            Some(name)
        } else {
            None
        };
        if self.curr.kind != TokenKind::LBrace {
            // A bare `struct Id` with no body is a reference to a
            // previously defined tag, not a declaration.
            let tag = tag_name.ok_or_else(|| CompileError::UnexpectedToken {
                expected: "a struct tag or '{'".into(),
                found: format!("{:?}", self.curr.kind),
                at: at.clone(),
            })?;
            return self.symtab.get_tag(&tag).ok_or(CompileError::IncompleteType { tag, at });
        }
        let ty = match &tag_name {
            Some(tag) => self.symtab.declare_tag(tag),
            None => self.symtab.next_type(),
        };
        let display_tag = tag_name.as_deref().unwrap_or("<anonymous>");
        self.advance()?; // {
        while self.curr.kind != TokenKind::RBrace {
            let member_base = self.parse_base_type()?;
            loop {
                let mat = self.loc();
                let mut mty = member_base;
                while self.curr.kind == TokenKind::Star {
                    mty = pointer_to(mty);
                    self.advance()?;
                }
                let mname = self.expect_id()?;
                let offset = self.symtab.get_add_size(ty);
                let msize = self.symtab.sizeof(mty, mat.clone())?;
                self.symtab.declare_member(ty, &mname, mty, offset, display_tag, mat)?;
                self.symtab.update_size(ty, SymbolTable::align(msize.max(1)));
                if self.curr.kind == TokenKind::Comma {
                    self.advance()?;
                    continue;
                }
                break;
            }
            self.expect(TokenKind::Semi)?;
        }
        self.advance()?; // }
        Ok(ty)
    }

    fn parse_enum(&mut self) -> Result<TypeId, CompileError> {
        self.advance()?; // enum
        if self.curr.kind == TokenKind::Id {
            let tag = self.curr.lexeme.clone();
            self.advance()?;
            self.symtab.declare_tag_as(&tag, INT);
        }
        if self.curr.kind == TokenKind::LBrace {
            self.advance()?;
            let mut value: i64 = 0;
            loop {
                let at = self.loc();
                let name = self.expect_id()?;
                if self.curr.kind == TokenKind::Eq {
                    self.advance()?;
                    value = self.parse_const_int()?;
                }
                self.symtab.declare_id(&name, INT, value, IdKind::Enum, at)?;
                value += 1;
                if self.curr.kind == TokenKind::Comma {
                    self.advance()?;
                    if self.curr.kind == TokenKind::RBrace {
                        break;
                    }
                    continue;
                }
                break;
            }
            self.expect(TokenKind::RBrace)?;
        }
        Ok(INT)
    }

    /// A constant integer, optionally negated — the only form an `enum`
    /// initializer may take.
    fn parse_const_int(&mut self) -> Result<i64, CompileError> {
        let negate = if self.curr.kind == TokenKind::Minus {
            self.advance()?;
            true
        } else {
            false
        };
        let at = self.loc();
        let tok = self.expect(TokenKind::Num)?;
        let n: i64 = tok
            .lexeme
            .parse()
            .map_err(|_| CompileError::NotConstant { at })?;
        Ok(if negate { -n } else { n })
    }

    // ---- functions -------------------------------------------------------

    fn parse_function(&mut self, name: &str, return_ty: TypeId, at: Location) -> Result<(), CompileError> {
        let entry = self.program.len() as i64;
        self.symtab.declare_function(name, return_ty, entry, at)?;

        self.symtab.create_scope();
        self.advance()?; // (
        let mut param_names = Vec::new();
        if self.curr.kind != TokenKind::RParen {
            loop {
                let pat = self.loc();
                let mut pty = self.parse_base_type()?;
                while self.curr.kind == TokenKind::Star {
                    pty = pointer_to(pty);
                    self.advance()?;
                }
                let pname = self.expect_id()?;
                let placeholder = param_names.len() as i64 * INT_SIZE;
                self.symtab.declare_id(&pname, pty, placeholder, IdKind::Local, pat)?;
                param_names.push(pname);
                if self.curr.kind == TokenKind::Comma {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let total_param_bytes = param_names.len() as i64 * INT_SIZE;
        self.symtab.fix_params(&param_names, total_param_bytes);

        self.expect(TokenKind::LBrace)?;
        let saved_offset = self.local_offset;
        self.local_offset = 0;
        // Reserve the frame with a backpatched placeholder *before* any
        // local's initializer code runs: an initializer pushes a scratch
        // address ahead of storing through it, and until the frame is
        // actually reserved that scratch slot is the same memory cell a
        // sibling local already initialized.
        let frame_adj = if self.is_type_start() {
            Some(self.program.emit_with_operand(Op::Adj, 0))
        } else {
            None
        };
        while self.is_type_start() {
            self.parse_local_declaration()?;
        }
        if let Some(idx) = frame_adj {
            self.program.patch(idx, self.local_offset);
        }
        while self.curr.kind != TokenKind::RBrace {
            self.parse_statement()?;
        }
        self.advance()?; // }
        self.program.emit_with_operand(Op::Imm, 0);
        self.program.emit(Op::Ret);
        self.local_offset = saved_offset;
        self.symtab.destroy_scope();
        Ok(())
    }

    fn is_type_start(&self) -> bool {
        matches!(
            self.curr.kind,
            TokenKind::Void
                | TokenKind::Int
                | TokenKind::Char
                | TokenKind::Float
                | TokenKind::Struct
                | TokenKind::Union
                | TokenKind::Enum
        )
    }

    fn parse_local_declaration(&mut self) -> Result<(), CompileError> {
        let base_ty = self.parse_base_type()?;
        if self.curr.kind == TokenKind::Semi {
            self.advance()?;
            return Ok(());
        }
        loop {
            let at = self.loc();
            let mut ty = base_ty;
            while self.curr.kind == TokenKind::Star {
                ty = pointer_to(ty);
                self.advance()?;
            }
            let name = self.expect_id()?;
            if ty == VOID {
                return Err(CompileError::Other { message: "a local cannot have type void".into(), at });
            }
            let size = SymbolTable::align(self.symtab.sizeof(ty, at.clone())?.max(1));
            self.local_offset -= size;
            let addr = self.local_offset;
            self.symtab.declare_id(&name, ty, addr, IdKind::Local, at)?;
            if self.curr.kind == TokenKind::Eq {
                self.advance()?;
                self.program.emit_with_operand(Op::Lea, addr);
                self.program.emit(Op::Psh);
                self.parse_expr(1)?;
                self.program.emit(Self::store_op_for(ty));
            }
            if self.curr.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            break;
        }
        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    // ---- statements -------------------------------------------------------

    fn parse_statement(&mut self) -> Result<(), CompileError> {
        match self.curr.kind {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Semi => {
                self.advance()?;
                Ok(())
            }
            _ => {
                self.parse_expr(1)?;
                self.expect(TokenKind::Semi)?;
                Ok(())
            }
        }
    }

    fn parse_block(&mut self) -> Result<(), CompileError> {
        self.advance()?; // {
        self.symtab.create_scope();
        while self.curr.kind != TokenKind::RBrace {
            if self.is_type_start() {
                self.parse_local_declaration_in_block()?;
            } else {
                self.parse_statement()?;
            }
        }
        self.advance()?; // }
        self.symtab.destroy_scope();
        Ok(())
    }

    /// Nested blocks may also introduce locals (more permissive than the
    /// function body's leading-declarations convention, but offsets are
    /// assigned the same way either way since they're handed out eagerly).
    fn parse_local_declaration_in_block(&mut self) -> Result<(), CompileError> {
        self.parse_local_declaration()
    }

    fn parse_if(&mut self) -> Result<(), CompileError> {
        self.advance()?; // if
        self.expect(TokenKind::LParen)?;
        self.parse_expr(1)?;
        self.expect(TokenKind::RParen)?;
        let else_jump = self.program.emit_with_operand(Op::Bz, 0);
        self.parse_statement()?;
        if self.curr.kind == TokenKind::Else {
            let end_jump = self.program.emit_with_operand(Op::Jmp, 0);
            self.program.patch(else_jump, self.program.len() as i64);
            self.advance()?; // else
            self.parse_statement()?;
            self.program.patch(end_jump, self.program.len() as i64);
        } else {
            self.program.patch(else_jump, self.program.len() as i64);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> Result<(), CompileError> {
        self.advance()?; // while
        let top = self.program.len() as i64;
        self.expect(TokenKind::LParen)?;
        self.parse_expr(1)?;
        self.expect(TokenKind::RParen)?;
        let exit_jump = self.program.emit_with_operand(Op::Bz, 0);
        self.parse_statement()?;
        self.program.emit_with_operand(Op::Jmp, top);
        self.program.patch(exit_jump, self.program.len() as i64);
        Ok(())
    }

    fn parse_return(&mut self) -> Result<(), CompileError> {
        self.advance()?; // return
        if self.curr.kind == TokenKind::Semi {
            self.program.emit_with_operand(Op::Imm, 0);
        } else {
            self.parse_expr(1)?;
        }
        self.expect(TokenKind::Semi)?;
        self.program.emit(Op::Ret);
        Ok(())
    }

    // ---- expressions: precedence-climbing Pratt parser --------------------

    /// `(precedence, right_associative)` for every binary operator; `=` and
    /// `?:` are handled as special forms inside [`Self::parse_expr`] rather
    /// than through this table since their codegen isn't a plain
    /// push-lhs/parse-rhs/combine shape.
    fn binop_prec(kind: TokenKind) -> Option<(u8, bool)> {
        use TokenKind::*;
        Some(match kind {
            Eq => (1, true),
            PipePipe => (3, false),
            AmpAmp => (4, false),
            Pipe => (5, false),
            Caret => (6, false),
            Amp => (7, false),
            EqEq | BangEq => (8, false),
            Lt | Gt | Le | Ge => (9, false),
            Shl | Shr => (10, false),
            Plus | Minus => (11, false),
            Star | Slash | Percent => (12, false),
            _ => return None,
        })
    }

    pub(crate) fn parse_expr(&mut self, min_prec: u8) -> Result<TypeId, CompileError> {
        let mut lhs_ty = self.parse_unary()?;
        loop {
            if self.curr.kind == TokenKind::Question && min_prec <= 2 {
                lhs_ty = self.parse_ternary_tail()?;
                continue;
            }
            let Some((prec, right_assoc)) = Self::binop_prec(self.curr.kind) else { break };
            if prec < min_prec {
                break;
            }
            let op = self.curr.kind;
            if op == TokenKind::Eq {
                lhs_ty = self.parse_assign_tail(prec)?;
                continue;
            }
            if op == TokenKind::AmpAmp {
                lhs_ty = self.parse_logical_and_tail(prec)?;
                continue;
            }
            if op == TokenKind::PipePipe {
                lhs_ty = self.parse_logical_or_tail(prec)?;
                continue;
            }
            self.advance()?;
            self.program.emit(Op::Psh);
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs_ty = self.parse_expr(next_min)?;
            lhs_ty = self.emit_binop(op, lhs_ty, rhs_ty)?;
        }
        Ok(lhs_ty)
    }

    fn parse_assign_tail(&mut self, prec: u8) -> Result<TypeId, CompileError> {
        let at = self.loc();
        if !self.last_is_lvalue() {
            return Err(CompileError::NotAnLvalue { at });
        }
        let store_op = if self.program.last_op() == Some(Op::Lc) { Op::Sc } else { Op::Si };
        self.program.set_last_op(Op::Psh);
        self.advance()?; // =
        let rhs_ty = self.parse_expr(prec)?; // right-associative
        self.program.emit(store_op);
        Ok(rhs_ty)
    }

    fn parse_logical_and_tail(&mut self, prec: u8) -> Result<TypeId, CompileError> {
        self.advance()?;
        let false1 = self.program.emit_with_operand(Op::Bz, 0);
        self.parse_expr(prec + 1)?;
        let false2 = self.program.emit_with_operand(Op::Bz, 0);
        self.program.emit_with_operand(Op::Imm, 1);
        let end = self.program.emit_with_operand(Op::Jmp, 0);
        let false_target = self.program.len() as i64;
        self.program.patch(false1, false_target);
        self.program.patch(false2, false_target);
        self.program.emit_with_operand(Op::Imm, 0);
        self.program.patch(end, self.program.len() as i64);
        Ok(INT)
    }

    fn parse_logical_or_tail(&mut self, prec: u8) -> Result<TypeId, CompileError> {
        self.advance()?;
        let true1 = self.program.emit_with_operand(Op::Bnz, 0);
        self.parse_expr(prec + 1)?;
        let true2 = self.program.emit_with_operand(Op::Bnz, 0);
        self.program.emit_with_operand(Op::Imm, 0);
        let end = self.program.emit_with_operand(Op::Jmp, 0);
        let true_target = self.program.len() as i64;
        self.program.patch(true1, true_target);
        self.program.patch(true2, true_target);
        self.program.emit_with_operand(Op::Imm, 1);
        self.program.patch(end, self.program.len() as i64);
        Ok(INT)
    }

    fn parse_ternary_tail(&mut self) -> Result<TypeId, CompileError> {
        self.advance()?; // ?
        let false_jump = self.program.emit_with_operand(Op::Bz, 0);
        let true_ty = self.parse_expr(1)?;
        self.expect(TokenKind::Colon)?;
        let end_jump = self.program.emit_with_operand(Op::Jmp, 0);
        self.program.patch(false_jump, self.program.len() as i64);
        self.parse_expr(2)?;
        self.program.patch(end_jump, self.program.len() as i64);
        Ok(true_ty)
    }

    /// Combine a pushed lhs (on the stack) with `ax` = rhs, scaling either
    /// side of `+`/`-` when one operand is a pointer (pointer arithmetic
    /// advances by `sizeof` the pointee, not by 1). Only the common
    /// `pointer op int` order is scaled; `int + pointer` falls back to a
    /// plain add, a deliberate simplification given the VM has no opcode
    /// to scale a value sitting on the stack without first loading it into
    /// `ax`.
    fn emit_binop(&mut self, op: TokenKind, lhs_ty: TypeId, rhs_ty: TypeId) -> Result<TypeId, CompileError> {
        use TokenKind::*;
        let at = self.loc();
        match op {
            Pipe => {
                self.program.emit(Op::Ior);
                Ok(INT)
            }
            Caret => {
                self.program.emit(Op::Xor);
                Ok(INT)
            }
            Amp => {
                self.program.emit(Op::And);
                Ok(INT)
            }
            EqEq => {
                self.program.emit(Op::Eql);
                Ok(INT)
            }
            BangEq => {
                self.program.emit(Op::Neq);
                Ok(INT)
            }
            Lt => {
                self.program.emit(Op::Lss);
                Ok(INT)
            }
            Gt => {
                self.program.emit(Op::Gtr);
                Ok(INT)
            }
            Le => {
                self.program.emit(Op::Leq);
                Ok(INT)
            }
            Ge => {
                self.program.emit(Op::Geq);
                Ok(INT)
            }
            Shl => {
                self.program.emit(Op::Shl);
                Ok(INT)
            }
            Shr => {
                self.program.emit(Op::Shr);
                Ok(INT)
            }
            Plus => {
                if is_pointer(lhs_ty) && !is_pointer(rhs_ty) {
                    self.scale_ax(lhs_ty, at)?;
                }
                self.program.emit(Op::Add);
                Ok(if is_pointer(lhs_ty) {
                    lhs_ty
                } else if is_pointer(rhs_ty) {
                    rhs_ty
                } else {
                    INT
                })
            }
            Minus => {
                if is_pointer(lhs_ty) && is_pointer(rhs_ty) {
                    self.program.emit(Op::Sub);
                    let scale = self.symtab.sizeof(pointee(lhs_ty), at)?;
                    self.program.emit(Op::Psh);
                    self.program.emit_with_operand(Op::Imm, scale);
                    self.program.emit(Op::Div);
                    return Ok(INT);
                }
                if is_pointer(lhs_ty) && !is_pointer(rhs_ty) {
                    self.scale_ax(lhs_ty, at)?;
                }
                self.program.emit(Op::Sub);
                Ok(if is_pointer(lhs_ty) { lhs_ty } else { INT })
            }
            Star => {
                self.program.emit(Op::Mul);
                Ok(INT)
            }
            Slash => {
                self.program.emit(Op::Div);
                Ok(INT)
            }
            Percent => {
                self.program.emit(Op::Mod);
                Ok(INT)
            }
            _ => unreachable!("not a generic binary operator"),
        }
    }

    /// Scale `ax` (currently holding an integer operand) by the pointee
    /// size of `ptr_ty`, for pointer + int / pointer - int.
    fn scale_ax(&mut self, ptr_ty: TypeId, at: Location) -> Result<(), CompileError> {
        let scale = self.symtab.sizeof(pointee(ptr_ty), at)?.max(1);
        self.program.emit(Op::Psh);
        self.program.emit_with_operand(Op::Imm, scale);
        self.program.emit(Op::Mul);
        Ok(())
    }

    // ---- unary / postfix / primary -----------------------------------------

    fn parse_unary(&mut self) -> Result<TypeId, CompileError> {
        let at = self.loc();
        match self.curr.kind {
            TokenKind::Minus => {
                self.advance()?;
                self.program.emit_with_operand(Op::Imm, 0);
                self.program.emit(Op::Psh);
                let ty = self.parse_unary()?;
                self.program.emit(Op::Sub);
                Ok(ty)
            }
            TokenKind::Plus => {
                self.advance()?;
                self.parse_unary()
            }
            TokenKind::Bang => {
                self.advance()?;
                self.parse_unary()?;
                self.program.emit(Op::Psh);
                self.program.emit_with_operand(Op::Imm, 0);
                self.program.emit(Op::Eql);
                Ok(INT)
            }
            TokenKind::Tilde => {
                self.advance()?;
                let ty = self.parse_unary()?;
                self.program.emit(Op::Psh);
                self.program.emit_with_operand(Op::Imm, -1);
                self.program.emit(Op::Xor);
                Ok(ty)
            }
            TokenKind::Star => {
                self.advance()?;
                let ty = self.parse_unary()?;
                if !is_pointer(ty) {
                    return Err(CompileError::BadDereference { at });
                }
                let pointee_ty = pointee(ty);
                self.program.emit(Self::load_op_for(pointee_ty));
                Ok(pointee_ty)
            }
            TokenKind::Amp => {
                self.advance()?;
                let ty = self.parse_unary()?;
                if self.program.pop_last().filter(|c| matches!(c.as_op(), Some(Op::Li) | Some(Op::Lc))).is_none() {
                    return Err(CompileError::NotAnLvalue { at });
                }
                Ok(pointer_to(ty))
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let is_inc = self.curr.kind == TokenKind::PlusPlus;
                self.advance()?;
                let ty = self.parse_unary()?;
                if !self.last_is_lvalue() {
                    return Err(CompileError::NotAnLvalue { at });
                }
                let scale = if is_pointer(ty) { self.symtab.sizeof(pointee(ty), at)?.max(1) } else { 1 };
                self.program.insert_before_last(Op::Psh);
                self.program.emit(Op::Psh);
                self.program.emit_with_operand(Op::Imm, scale);
                self.program.emit(if is_inc { Op::Add } else { Op::Sub });
                self.program.emit(Self::store_op_for(ty));
                Ok(ty)
            }
            TokenKind::Sizeof => {
                self.advance()?;
                self.expect(TokenKind::LParen)?;
                let mut ty = self.parse_base_type()?;
                while self.curr.kind == TokenKind::Star {
                    ty = pointer_to(ty);
                    self.advance()?;
                }
                self.expect(TokenKind::RParen)?;
                let size = self.symtab.sizeof(ty, at)?;
                self.program.emit_with_operand(Op::Imm, size);
                Ok(INT)
            }
            _ => self.parse_postfix(),
        }
    }

    fn store_op_for(ty: TypeId) -> Op {
        if ty == CHAR {
            Op::Sc
        } else {
            Op::Si
        }
    }

    fn parse_postfix(&mut self) -> Result<TypeId, CompileError> {
        let mut ty = self.parse_primary()?;
        loop {
            let at = self.loc();
            match self.curr.kind {
                TokenKind::LBracket => {
                    self.advance()?;
                    if !is_pointer(ty) {
                        return Err(CompileError::BadDereference { at });
                    }
                    let elem_ty = pointee(ty);
                    self.program.emit(Op::Psh);
                    self.parse_expr(1)?;
                    self.scale_ax(ty, at)?;
                    self.expect(TokenKind::RBracket)?;
                    self.program.emit(Op::Add);
                    if elem_ty < FIRST_COMPOSITE || is_pointer(elem_ty) {
                        self.program.emit(Self::load_op_for(elem_ty));
                    }
                    ty = elem_ty;
                }
                TokenKind::Dot => {
                    self.advance()?;
                    let mname = self.expect_id()?;
                    ty = self.emit_member_access(ty, &mname, at, false)?;
                }
                TokenKind::Arrow => {
                    self.advance()?;
                    let mname = self.expect_id()?;
                    ty = self.emit_member_access(ty, &mname, at, true)?;
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let is_inc = self.curr.kind == TokenKind::PlusPlus;
                    self.advance()?;
                    if !self.last_is_lvalue() {
                        return Err(CompileError::NotAnLvalue { at });
                    }
                    let scale = if is_pointer(ty) { self.symtab.sizeof(pointee(ty), at)?.max(1) } else { 1 };
                    self.program.insert_before_last(Op::Psh);
                    // ax = old value, stack = [address]
                    self.program.emit(Op::Psh);
                    self.program.emit_with_operand(Op::Imm, scale);
                    self.program.emit(if is_inc { Op::Add } else { Op::Sub });
                    self.program.emit(Self::store_op_for(ty));
                    // ax = new value; undo by one step to report the old value
                    self.program.emit(Op::Psh);
                    self.program.emit_with_operand(Op::Imm, scale);
                    self.program.emit(if is_inc { Op::Sub } else { Op::Add });
                }
                _ => break,
            }
        }
        Ok(ty)
    }

    fn emit_member_access(
        &mut self,
        base_ty: TypeId,
        member: &str,
        at: Location,
        through_pointer: bool,
    ) -> Result<TypeId, CompileError> {
        let tag_ty = if through_pointer {
            if !is_pointer(base_ty) {
                return Err(CompileError::BadDereference { at });
            }
            pointee(base_ty)
        } else {
            base_ty
        };
        let m = self
            .symtab
            .get_member(tag_ty, member)
            .ok_or_else(|| CompileError::Other { message: format!("no member '{member}'"), at: at.clone() })?;
        self.program.emit(Op::Psh);
        self.program.emit_with_operand(Op::Imm, m.offset);
        self.program.emit(Op::Add);
        if m.ty < FIRST_COMPOSITE || is_pointer(m.ty) {
            self.program.emit(Self::load_op_for(m.ty));
        }
        Ok(m.ty)
    }

    fn parse_primary(&mut self) -> Result<TypeId, CompileError> {
        let at = self.loc();
        match self.curr.kind {
            TokenKind::Num => {
                let lexeme = self.curr.lexeme.clone();
                self.advance()?;
                let n: i64 = lexeme.parse().map_err(|_| CompileError::NotConstant { at })?;
                self.program.emit_with_operand(Op::Imm, n);
                Ok(INT)
            }
            TokenKind::Str => {
                let text = self.curr.lexeme.clone();
                self.advance()?;
                let addr = self.intern_string(&text);
                self.program.emit_with_operand(Op::Imm, addr);
                Ok(pointer_to(CHAR))
            }
            TokenKind::Id => {
                let name = self.curr.lexeme.clone();
                self.advance()?;
                self.resolve_identifier(&name, at)
            }
            TokenKind::LParen => {
                self.advance()?;
                if self.is_type_start() {
                    let mut ty = self.parse_base_type()?;
                    while self.curr.kind == TokenKind::Star {
                        ty = pointer_to(ty);
                        self.advance()?;
                    }
                    self.expect(TokenKind::RParen)?;
                    self.parse_unary()?;
                    // A cast retypes the already-evaluated operand; nothing
                    // is re-emitted, so `(char*)p` yields exactly the value
                    // `p` loaded, now seen as a different pointer type.
                    Ok(ty)
                } else {
                    let ty = self.parse_expr(1)?;
                    self.expect(TokenKind::RParen)?;
                    Ok(ty)
                }
            }
            _ => Err(CompileError::UnexpectedToken {
                expected: "an expression".into(),
                found: format!("{:?}", self.curr.kind),
                at,
            }),
        }
    }

    fn resolve_identifier(&mut self, name: &str, at: Location) -> Result<TypeId, CompileError> {
        let id = self
            .symtab
            .get_id(name)
            .cloned()
            .ok_or_else(|| CompileError::Undeclared { name: name.to_string(), at: at.clone() })?;
        match id.kind {
            IdKind::Func | IdKind::Sys => {
                if self.curr.kind != TokenKind::LParen {
                    return Err(CompileError::Other { message: format!("'{name}' must be called"), at });
                }
                self.parse_call(&id)
            }
            IdKind::Enum => {
                self.program.emit_with_operand(Op::Imm, id.value);
                Ok(INT)
            }
            IdKind::Local => {
                self.program.emit_with_operand(Op::Lea, id.value);
                if id.ty < FIRST_COMPOSITE || is_pointer(id.ty) {
                    self.program.emit(Self::load_op_for(id.ty));
                }
                Ok(id.ty)
            }
            IdKind::Global => {
                self.program.emit_with_operand(Op::Imm, id.value);
                if id.ty < FIRST_COMPOSITE || is_pointer(id.ty) {
                    self.program.emit(Self::load_op_for(id.ty));
                }
                Ok(id.ty)
            }
            IdKind::Member => unreachable!("members are resolved through '.'/'->', never as bare names"),
        }
    }

    fn parse_call(&mut self, id: &crate::types::Identifier) -> Result<TypeId, CompileError> {
        self.advance()?; // (
        let mut n_args: i64 = 0;
        if self.curr.kind != TokenKind::RParen {
            loop {
                self.parse_expr(1)?;
                self.program.emit(Op::Psh);
                n_args += 1;
                if self.curr.kind == TokenKind::Comma {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let byte_count = n_args * INT_SIZE;
        match id.kind {
            IdKind::Func => {
                self.program.emit_with_operand(Op::Jsr, id.value);
                if byte_count > 0 {
                    self.program.emit_with_operand(Op::Adj, byte_count);
                }
                Ok(id.ty)
            }
            IdKind::Sys => match id.value {
                SYS_PRINTF => {
                    self.program.emit_with_operand(Op::Printf, byte_count);
                    self.program.emit_with_operand(Op::Adj, byte_count);
                    Ok(INT)
                }
                SYS_MALLOC => {
                    self.program.emit_with_operand(Op::Malloc, byte_count);
                    self.program.emit_with_operand(Op::Adj, byte_count);
                    Ok(pointer_to(CHAR))
                }
                SYS_FREE => {
                    self.program.emit(Op::Free);
                    self.program.emit_with_operand(Op::Adj, byte_count);
                    Ok(VOID)
                }
                SYS_EXIT => {
                    self.program.emit(Op::Exit);
                    Ok(VOID)
                }
                other => unreachable!("unknown builtin discriminant {other}"),
            },
            _ => unreachable!("only Func/Sys identifiers reach parse_call"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> (i64, String) {
        let compiled = Compiler::compile(src).expect("compiles");
        let mut out = Vec::new();
        let code = minic_core::execute(compiled.entry, &compiled.program, &compiled.data, minic_core::MIN_MEMORY_CELLS, &mut out);
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn returns_a_literal() {
        let (code, _) = run("int main() { return 42; }");
        assert_eq!(code, 42);
    }

    #[test]
    fn arithmetic_and_precedence() {
        let (code, _) = run("int main() { return 2 + 3 * 4; }");
        assert_eq!(code, 14);
    }

    #[test]
    fn if_else_branches() {
        let (code, _) = run("int main() { int x; x = 1; if (x) return 10; else return 20; }");
        assert_eq!(code, 10);
    }

    #[test]
    fn while_loop_accumulates() {
        let src = "int main() { int i; int sum; i = 0; sum = 0; while (i < 5) { sum = sum + i; i = i + 1; } return sum; }";
        let (code, _) = run(src);
        assert_eq!(code, 10);
    }

    #[test]
    fn recursive_function() {
        let src = "int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } int main() { return fib(10); }";
        let (code, _) = run(src);
        assert_eq!(code, 55);
    }

    #[test]
    fn pointers_and_assignment_through_deref() {
        let src = "int main() { int x; int *p; x = 5; p = &x; *p = 9; return x; }";
        let (code, _) = run(src);
        assert_eq!(code, 9);
    }

    #[test]
    fn string_literal_printf_expands_escaped_newline() {
        let src = r#"int main() { printf("hi\n"); return 0; }"#;
        let (_, out) = run(src);
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn printf_percent_s_dereferences_pointer() {
        let src = r#"int main() { char *s; s = "hi"; printf("%s\n", s); return 0; }"#;
        let (_, out) = run(src);
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn struct_member_access() {
        let src = "struct point { int x; int y; }; int main() { struct point p; p.x = 3; p.y = 4; return p.x + p.y; }";
        let (code, _) = run(src);
        assert_eq!(code, 7);
    }

    #[test]
    fn pointer_arithmetic_is_scaled() {
        let src = "int main() { int *p; int a; a = 0; p = &a; p = p + 1; return 0; }";
        let (code, _) = run(src);
        assert_eq!(code, 0);
    }

    #[test]
    fn post_increment_yields_old_value() {
        let src = "int main() { int x; int y; x = 5; y = x++; if (y != 5) return 1; if (x != 6) return 2; return 0; }";
        let (code, _) = run(src);
        assert_eq!(code, 0);
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let err = Compiler::compile("int main() { return y; }").unwrap_err();
        assert!(matches!(err, CompileError::Undeclared { .. }));
    }

    #[test]
    fn redeclared_identifier_is_an_error() {
        let err = Compiler::compile("int main() { int x; int x; return 0; }").unwrap_err();
        assert!(matches!(err, CompileError::Redeclared { .. }));
    }

    #[test]
    fn assigning_to_a_non_lvalue_is_an_error() {
        let err = Compiler::compile("int main() { 1 = 2; return 0; }").unwrap_err();
        assert!(matches!(err, CompileError::NotAnLvalue { .. }));
    }

    #[test]
    fn dereferencing_a_non_pointer_is_an_error() {
        let err = Compiler::compile("int main() { int x; return *x; }").unwrap_err();
        assert!(matches!(err, CompileError::BadDereference { .. }));
    }

    #[test]
    fn duplicate_struct_member_is_an_error() {
        let err = Compiler::compile("struct s { int a; int a; }; int main() { return 0; }").unwrap_err();
        assert!(matches!(err, CompileError::DuplicateMember { .. }));
    }

    #[test]
    fn enum_constants_are_sequential() {
        let src = "enum { A, B, C }; int main() { return C; }";
        let (code, _) = run(src);
        assert_eq!(code, 2);
    }

    #[test]
    fn logical_and_short_circuits() {
        let src = "int f() { return 1 / 0; } int main() { if (0 && f()) return 1; return 0; }";
        let (code, _) = run(src);
        assert_eq!(code, 0);
    }

    #[test]
    fn malloc_and_free_round_trip() {
        let src = "int main() { int *p; p = malloc(4); *p = 7; free(p); return *p; }";
        let (code, _) = run(src);
        assert_eq!(code, 7);
    }

    #[test]
    fn local_initializer_sets_value() {
        let (code, _) = run("int main() { int x = 41; return x + 1; }");
        assert_eq!(code, 42);
    }

    #[test]
    fn successive_local_initializers_do_not_clobber_each_other() {
        let src = "int main() { int a = 1; int b = 2; int c = 3; return a * 100 + b * 10 + c; }";
        let (code, _) = run(src);
        assert_eq!(code, 123);
    }

    #[test]
    fn cast_reinterprets_pointer_type() {
        let src = "int main() { int x; int *p; char *q; x = 65; p = &x; q = (char *) p; return *q; }";
        let (code, _) = run(src);
        assert_eq!(code, 65);
    }

    #[test]
    fn undeclared_struct_tag_reference_is_an_error() {
        let err = Compiler::compile("int main() { struct nope *p; return 0; }").unwrap_err();
        assert!(matches!(err, CompileError::IncompleteType { .. }));
    }

    #[test]
    fn self_referential_struct_tag_is_visible_inside_its_own_body() {
        let src = "struct node { int val; struct node *next; }; int main() { struct node *n; n = malloc(sizeof(struct node)); n->val = 9; return n->val; }";
        let (code, _) = run(src);
        assert_eq!(code, 9);
    }

    #[test]
    fn global_initializer_is_rejected() {
        let err = Compiler::compile("int g = 1; int main() { return g; }").unwrap_err();
        assert!(matches!(err, CompileError::Other { .. }));
    }
}
