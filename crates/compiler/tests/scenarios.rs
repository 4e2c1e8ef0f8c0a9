//! End-to-end compile-and-run tests: one file per concern, exercising the
//! library path rather than the CLI binary (spawning the binary under test
//! belongs in a packaging/smoke test, not here).

use minic_compiler::{compile_and_run, CompilerConfig};

fn run(src: &str) -> (i64, String) {
    let mut out = Vec::new();
    let code = compile_and_run(src, &CompilerConfig::new(), &mut out).expect("compiles");
    (code, String::from_utf8(out).unwrap())
}

#[test]
fn returns_zero() {
    let (code, out) = run("int main(){ return 0; }");
    assert_eq!(code, 0);
    assert_eq!(out, "exit(0)\n");
}

#[test]
fn arithmetic_precedence() {
    let (code, out) = run("int main(){ return 2+3*4; }");
    assert_eq!(code, 14);
    assert_eq!(out, "exit(14)\n");
}

#[test]
fn while_loop_sums_one_to_ten() {
    let src = "int main(){ int i; int s; s=0; i=1; while(i<=10){ s=s+i; i=i+1; } return s; }";
    let (code, _) = run(src);
    assert_eq!(code, 55);
}

#[test]
fn mutual_self_recursion_fib() {
    let src = "int fib(int n){ if(n<2) return n; return fib(n-1)+fib(n-2); } int main(){ return fib(10); }";
    let (code, _) = run(src);
    assert_eq!(code, 55);
}

#[test]
fn printf_percent_s_on_a_string_literal() {
    let src = r#"int main(){ char *p; p = "hi"; printf("%s\n", p); return 0; }"#;
    let (code, out) = run(src);
    assert_eq!(code, 0);
    assert_eq!(out, "hi\nexit(0)\n");
}

#[test]
fn struct_pointer_via_malloc_and_arrow() {
    let src = "struct P { int x; int y; }; int main(){ struct P *p; p = malloc(sizeof(struct P)); p->x = 3; p->y = 4; return p->x + p->y; }";
    let (code, _) = run(src);
    assert_eq!(code, 7);
}

#[test]
fn sizeof_matches_the_fixed_widths() {
    let src = "int main(){ if (sizeof(int) != 4) return 1; if (sizeof(char) != 1) return 2; if (sizeof(int*) != 4) return 3; return 0; }";
    let (code, _) = run(src);
    assert_eq!(code, 0);
}

#[test]
fn determinism_same_source_same_result_twice() {
    let src = "int main(){ return 2+3*4; }";
    let (code1, out1) = run(src);
    let (code2, out2) = run(src);
    assert_eq!(code1, code2);
    assert_eq!(out1, out2);
}

#[test]
fn ternary_and_bitwise_operators() {
    let src = "int main(){ int x; x = (5 & 3) | (8 ^ 1); return x > 0 ? x : 0; }";
    let (code, _) = run(src);
    assert_eq!(code, (5 & 3) | (8 ^ 1));
}

#[test]
fn nested_block_scoping_shadows_outer_local() {
    let src = "int main(){ int x; x = 1; { int x; x = 2; } return x; }";
    let (code, _) = run(src);
    assert_eq!(code, 1);
}

#[test]
fn local_declarations_can_carry_initializers() {
    let src = "int main(){ int a = 10; int b = 20; int c = 12; return a + b + c; }";
    let (code, _) = run(src);
    assert_eq!(code, 42);
}

#[test]
fn pointer_cast_reinterprets_without_reloading() {
    let src = "int main(){ int x; int *p; x = 7; p = &x; return *(int *) p; }";
    let (code, _) = run(src);
    assert_eq!(code, 7);
}

#[test]
fn anonymous_struct_can_still_be_used_through_a_typed_pointer() {
    let src = "struct { int x; int y; } *p; int main(){ p = malloc(8); p->x = 1; p->y = 2; return p->x + p->y; }";
    let (code, _) = run(src);
    assert_eq!(code, 3);
}
