//! The nominal type system and the symbol table that backs name/tag
//! resolution during compilation.
//!
//! Types are plain `i64`s: `VOID`, `CHAR`, `INT` are fixed constants, any
//! value `>= PTR` denotes that many levels of pointer indirection over
//! `ty - PTR`, and composite (`struct`/`union`) types get a fresh id in
//! `[FIRST_COMPOSITE, PTR)` the first time their tag is declared.

use crate::error::{CompileError, Location};
use std::collections::HashMap;

pub type TypeId = i64;

pub const VOID: TypeId = 0;
pub const CHAR: TypeId = 1;
pub const INT: TypeId = 2;
pub const FIRST_COMPOSITE: TypeId = 3;
pub const PTR: TypeId = 256;

pub const INT_SIZE: i64 = 4;
/// One cell of call-frame overhead a callee's parameters sit above: the
/// saved `bp` the prologue pushes before locals are reserved.
const FRAME_OVERHEAD: i64 = INT_SIZE;

pub fn pointer_to(base: TypeId) -> TypeId {
    base + PTR
}

pub fn is_pointer(ty: TypeId) -> bool {
    ty >= PTR
}

pub fn pointee(ty: TypeId) -> TypeId {
    debug_assert!(is_pointer(ty));
    ty - PTR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Local,
    Global,
    Member,
    Func,
    Sys,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub kind: IdKind,
    pub ty: TypeId,
    /// Meaning depends on `kind`: BP-relative offset for `Local`, data
    /// segment address for `Global`, program counter for `Func`/`Sys`, or
    /// the constant value for `Enum`.
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub ty: TypeId,
    pub offset: i64,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Identifier>>,
    tag_scopes: Vec<HashMap<String, TypeId>>,
    members: HashMap<TypeId, HashMap<String, Member>>,
    sizes: HashMap<TypeId, i64>,
    next_type: TypeId,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![HashMap::new()],
            tag_scopes: vec![HashMap::new()],
            members: HashMap::new(),
            sizes: HashMap::new(),
            next_type: FIRST_COMPOSITE,
        }
    }

    pub fn create_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.tag_scopes.push(HashMap::new());
    }

    pub fn destroy_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot destroy the global scope");
        self.scopes.pop();
        self.tag_scopes.pop();
    }

    pub fn is_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    /// Declare a name in the innermost scope. Mirrors a quirk of the
    /// reference implementation: an identifier declared with kind `Func`
    /// through this path (as happens while walking a parameter list) is
    /// silently stored as `Local` instead — only top-level function
    /// declarations register `Func` identifiers directly.
    pub fn declare_id(
        &mut self,
        name: &str,
        ty: TypeId,
        value: i64,
        kind: IdKind,
        at: Location,
    ) -> Result<(), CompileError> {
        let kind = if kind == IdKind::Func { IdKind::Local } else { kind };
        let scope = self.scopes.last_mut().expect("global scope always present");
        if scope.contains_key(name) {
            return Err(CompileError::Redeclared { name: name.to_string(), at });
        }
        scope.insert(name.to_string(), Identifier { name: name.to_string(), kind, ty, value });
        Ok(())
    }

    pub fn get_id(&self, name: &str) -> Option<&Identifier> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    /// Register a top-level function definition, bypassing `declare_id`'s
    /// `Func`-to-`Local` demotion so calls can actually be resolved.
    pub fn declare_function(&mut self, name: &str, ty: TypeId, entry_pc: i64, at: Location) -> Result<(), CompileError> {
        let scope = self.scopes.last_mut().expect("global scope always present");
        if scope.contains_key(name) {
            return Err(CompileError::Redeclared { name: name.to_string(), at });
        }
        scope.insert(
            name.to_string(),
            Identifier { name: name.to_string(), kind: IdKind::Func, ty, value: entry_pc },
        );
        Ok(())
    }

    /// Return the tag's type id, allocating a fresh one the first time the
    /// tag is seen in the current scope (supports forward references like
    /// `struct Node;` ahead of the full definition).
    pub fn declare_tag(&mut self, tag: &str) -> TypeId {
        if let Some(&ty) = self.tag_scopes.last().and_then(|s| s.get(tag)) {
            return ty;
        }
        let ty = self.next_type();
        self.tag_scopes.last_mut().unwrap().insert(tag.to_string(), ty);
        ty
    }

    /// Bind a tag directly to an existing type id (used for `enum` tags,
    /// which are just `INT` under another name rather than a fresh
    /// composite type).
    pub fn declare_tag_as(&mut self, tag: &str, ty: TypeId) {
        self.tag_scopes.last_mut().unwrap().entry(tag.to_string()).or_insert(ty);
    }

    pub fn get_tag(&self, tag: &str) -> Option<TypeId> {
        self.tag_scopes.iter().rev().find_map(|s| s.get(tag)).copied()
    }

    pub fn next_type(&mut self) -> TypeId {
        let t = self.next_type;
        self.next_type += 1;
        t
    }

    pub fn declare_member(
        &mut self,
        tag_type: TypeId,
        name: &str,
        ty: TypeId,
        offset: i64,
        tag_name: &str,
        at: Location,
    ) -> Result<(), CompileError> {
        let table = self.members.entry(tag_type).or_default();
        if table.contains_key(name) {
            return Err(CompileError::DuplicateMember {
                name: name.to_string(),
                tag: tag_name.to_string(),
                at,
            });
        }
        table.insert(name.to_string(), Member { ty, offset });
        Ok(())
    }

    pub fn get_member(&self, tag_type: TypeId, name: &str) -> Option<Member> {
        self.members.get(&tag_type).and_then(|t| t.get(name)).copied()
    }

    /// Running byte size accumulated for a composite type so far; used as
    /// the offset for the next member declared in it.
    pub fn get_add_size(&self, tag_type: TypeId) -> i64 {
        self.sizes.get(&tag_type).copied().unwrap_or(0)
    }

    pub fn update_size(&mut self, tag_type: TypeId, added: i64) {
        *self.sizes.entry(tag_type).or_insert(0) += added;
    }

    pub fn sizeof(&self, ty: TypeId, at: Location) -> Result<i64, CompileError> {
        match ty {
            VOID => Ok(0),
            CHAR => Ok(1),
            INT => Ok(INT_SIZE),
            t if is_pointer(t) => Ok(INT_SIZE),
            t => self.sizes.get(&t).copied().ok_or(CompileError::NotSized { at }),
        }
    }

    /// Round a size up to the next `INT_SIZE` boundary (the stack always
    /// grows in whole words, so locals/params are frame-sized that way).
    pub fn align(size: i64) -> i64 {
        (size + INT_SIZE - 1) / INT_SIZE * INT_SIZE
    }

    /// Remap a just-parsed parameter list's placeholder offsets (assigned
    /// `0, INT_SIZE, 2*INT_SIZE, ...` in declaration order while the total
    /// size wasn't known yet) to real positive BP-relative offsets. The
    /// caller pushes arguments left to right, so the first parameter ends
    /// up furthest from `bp` and the last one closest.
    pub fn fix_params(&mut self, param_names: &[String], total_bytes: i64) {
        let scope = self.scopes.last_mut().expect("global scope always present");
        for (index, name) in param_names.iter().enumerate() {
            let placeholder = index as i64 * INT_SIZE;
            if let Some(id) = scope.get_mut(name) {
                id.value = total_bytes - placeholder + FRAME_OVERHEAD;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location { line: 1, col: 1 }
    }

    #[test]
    fn redeclaration_in_same_scope_errors() {
        let mut t = SymbolTable::new();
        t.declare_id("x", INT, 0, IdKind::Global, loc()).unwrap();
        let err = t.declare_id("x", INT, 4, IdKind::Global, loc()).unwrap_err();
        assert!(matches!(err, CompileError::Redeclared { .. }));
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        let mut t = SymbolTable::new();
        t.declare_id("x", INT, 0, IdKind::Global, loc()).unwrap();
        t.create_scope();
        t.declare_id("x", CHAR, -4, IdKind::Local, loc()).unwrap();
        assert_eq!(t.get_id("x").unwrap().ty, CHAR);
        t.destroy_scope();
        assert_eq!(t.get_id("x").unwrap().ty, INT);
    }

    #[test]
    fn func_kind_is_stored_as_local() {
        let mut t = SymbolTable::new();
        t.declare_id("p", INT, 0, IdKind::Func, loc()).unwrap();
        assert_eq!(t.get_id("p").unwrap().kind, IdKind::Local);
    }

    #[test]
    fn struct_members_accumulate_offsets() {
        let mut t = SymbolTable::new();
        let s = t.declare_tag("point");
        let off1 = t.get_add_size(s);
        t.declare_member(s, "x", INT, off1, "point", loc()).unwrap();
        t.update_size(s, t.sizeof(INT, loc()).unwrap());
        let off2 = t.get_add_size(s);
        t.declare_member(s, "y", INT, off2, "point", loc()).unwrap();
        t.update_size(s, t.sizeof(INT, loc()).unwrap());

        assert_eq!(off1, 0);
        assert_eq!(off2, 4);
        assert_eq!(t.sizeof(s, loc()).unwrap(), 8);
    }

    #[test]
    fn duplicate_member_errors() {
        let mut t = SymbolTable::new();
        let s = t.declare_tag("pair");
        t.declare_member(s, "a", INT, 0, "pair", loc()).unwrap();
        let err = t.declare_member(s, "a", INT, 4, "pair", loc()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateMember { .. }));
    }

    #[test]
    fn fix_params_reverses_placeholder_offsets() {
        let mut t = SymbolTable::new();
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        for (i, n) in names.iter().enumerate() {
            t.declare_id(n, INT, i as i64 * INT_SIZE, IdKind::Local, loc()).unwrap();
        }
        t.fix_params(&names, 12);
        assert_eq!(t.get_id("a").unwrap().value, 16);
        assert_eq!(t.get_id("b").unwrap().value, 12);
        assert_eq!(t.get_id("c").unwrap().value, 8);
    }

    #[test]
    fn pointer_levels_round_trip() {
        assert!(is_pointer(pointer_to(INT)));
        assert_eq!(pointee(pointer_to(INT)), INT);
        assert_eq!(pointee(pointer_to(pointer_to(CHAR))), pointer_to(CHAR));
    }
}
