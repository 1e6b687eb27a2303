//! End-to-end scenarios: source → compile → machine with the frozen host
//! table → observable effects.

use std::path::PathBuf;
use warden_compiler::CompileError;
use warden_core::Value;
use warden_provider_fs::FsSandbox;
use warden_provider_http::HttpSandbox;
use warden_vm::bytecode::scopes;
use warden_vm::{AllowListGatekeeper, Machine, Program, VmError};

const GAS: u64 = 1_000_000;

fn temp_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("warden_e2e_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.canonicalize().unwrap()
}

struct Harness {
    machine: Machine,
    program: Program,
    root: PathBuf,
}

impl Harness {
    fn run(src: &str) -> Result<Self, VmError> {
        Self::run_with(src, 1024, vec!["allowed.example".to_string()])
    }

    fn run_with(
        src: &str,
        max_file_bytes: usize,
        allow_domains: Vec<String>,
    ) -> Result<Self, VmError> {
        let program = warden_compiler::compile(src).expect("scenario source must compile");
        let root = temp_root();
        let mut machine = Machine::new();
        warden_stdlib::install(&mut machine);
        warden_provider_fs::install(FsSandbox::new(&root, max_file_bytes), &mut machine);
        warden_provider_http::install(HttpSandbox::new(allow_domains), &mut machine);
        machine.set_gatekeeper(Box::new(
            AllowListGatekeeper::new()
                .allow(scopes::FS_ENV, "valid-token")
                .allow(scopes::HTTP_ENV, "valid-token"),
        ));
        machine.load(&program);
        let outcome = machine.run(GAS);
        outcome.map(|()| Self {
            machine,
            program,
            root,
        })
    }

    fn local(&self, name: &str) -> Value {
        let slot = self
            .program
            .local_names
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("no local named '{}'", name));
        self.machine.top_locals()[slot].clone()
    }

    fn local_int(&self, name: &str) -> i64 {
        self.local(name)
            .as_int()
            .unwrap_or_else(|| panic!("local '{}' is not an int", name))
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

// -- Scenario 1: arithmetic with precedence --

#[test]
fn arithmetic_precedence() {
    let h = Harness::run("x = 1 + 2 * 3 - 4 // 2").unwrap();
    assert_eq!(h.local_int("x"), 5);
}

// -- Scenario 2: while-loop factorial --

#[test]
fn while_loop_factorial() {
    let src = "res = 1\nn = 5\nwhile n > 0:\n    res = res * n\n    n = n - 1\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("res"), 120);
    assert_eq!(h.local_int("n"), 0);
}

// -- Scenario 3: scoped file write --

#[test]
fn scoped_write_file_creates_exactly_one_file() {
    let src = "with scope(\"FS-ENV\", \"valid-token\"):\n    write_file(\"OK\", \"result.txt\")\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(
        std::fs::read(h.root.join("result.txt")).unwrap(),
        b"OK"
    );
    let entries: Vec<_> = std::fs::read_dir(&h.root).unwrap().collect();
    assert_eq!(entries.len(), 1);
    // The scope stack drained back to its pre-run state.
    assert!(h.machine.scopes().is_empty());
}

// -- Scenario 4: path escape --

#[test]
fn path_escape_fails_and_writes_nothing() {
    let src =
        "with scope(\"FS-ENV\", \"valid-token\"):\n    write_file(\"OK\", \"../escape.txt\")\n";
    match Harness::run(src) {
        Err(VmError::Host(msg)) => assert!(msg.contains("path escape"), "got: {}", msg),
        other => panic!("expected a path-jail failure, got {:?}", other.is_ok()),
    }
}

// -- Scenario 5: domain allowlist --

#[test]
fn fetch_outside_the_allowlist_fails() {
    let src =
        "with scope(\"HTTP-ENV\", \"valid-token\"):\n    x = fetch(\"http://blocked.example/\")\n";
    match Harness::run(src) {
        Err(VmError::Host(msg)) => assert!(msg.contains("domain not allowed"), "got: {}", msg),
        other => panic!("expected a domain failure, got {:?}", other.is_ok()),
    }
}

// -- Scenario 6: floating state --

#[test]
fn unconsumed_expression_fails_to_compile() {
    match warden_compiler::compile("1 + 2") {
        Err(CompileError::FloatingState { line: 1, .. }) => {}
        other => panic!("expected floating state, got {:?}", other.map(|_| ())),
    }
}

// -- Scenario 7: unscoped capability --

#[test]
fn unscoped_fetch_fails_to_compile() {
    match warden_compiler::compile("x = fetch(\"x\")") {
        Err(CompileError::Capability { word, scope, .. }) => {
            assert_eq!(word, "fetch");
            assert_eq!(scope, "HTTP-ENV");
        }
        other => panic!("expected capability error, got {:?}", other.map(|_| ())),
    }
}

// -- Boundary behavior --

#[test]
fn oversized_list_display_overflows_the_stack() {
    let big = format!("x = [{}]", vec!["1"; 129].join(", "));
    match Harness::run(&big) {
        Err(VmError::StackOverflow) => {}
        other => panic!("expected stack overflow, got {:?}", other.is_ok()),
    }
    let ok = format!("x = [{}]", vec!["1"; 100].join(", "));
    Harness::run(&ok).unwrap();
}

#[test]
fn call_depth_limit_is_exact() {
    let src = "def rec(n):\n    if n > 0:\n        return rec(n - 1)\n    return 0\nx = rec(31)\n";
    Harness::run(src).unwrap();

    let src = "def rec(n):\n    if n > 0:\n        return rec(n - 1)\n    return 0\nx = rec(32)\n";
    match Harness::run(src) {
        Err(VmError::FrameOverflow) => {}
        other => panic!("expected frame overflow, got {:?}", other.is_ok()),
    }
}

#[test]
fn file_size_cap_is_exact() {
    let src = "with scope(\"FS-ENV\", \"valid-token\"):\n    write_file(\"OK\", \"exact.txt\")\n";
    Harness::run_with(src, 2, vec![]).unwrap();

    let src = "with scope(\"FS-ENV\", \"valid-token\"):\n    write_file(\"OKX\", \"over.txt\")\n";
    match Harness::run_with(src, 2, vec![]) {
        Err(VmError::Host(msg)) => assert!(msg.contains("size limit"), "got: {}", msg),
        other => panic!("expected size failure, got {:?}", other.is_ok()),
    }
}

#[test]
fn gas_budget_stops_infinite_loops() {
    let src = "while True:\n    pass\n";
    match Harness::run(src) {
        Err(VmError::GasExhausted) => {}
        other => panic!("expected gas exhaustion, got {:?}", other.is_ok()),
    }
}

#[test]
fn wrong_token_is_a_security_violation() {
    let src = "with scope(\"FS-ENV\", \"wrong\"):\n    write_file(\"x\", \"f.txt\")\n";
    match Harness::run(src) {
        Err(VmError::SecurityViolation(_)) => {}
        other => panic!("expected security violation, got {:?}", other.is_ok()),
    }
}

// -- Language behavior through the whole pipeline --

#[test]
fn single_assignment_leaves_stack_empty() {
    let h = Harness::run("x = 1").unwrap();
    assert_eq!(h.local_int("x"), 1);
    assert_eq!(h.program.local_names, vec!["x".to_string()]);
}

#[test]
fn shared_lists_alias_through_assignment() {
    let src = "a = [1]\nb = a\nb.append(2)\nn = len(a)\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("n"), 2);
}

#[test]
fn for_loop_over_range() {
    let src = "total = 0\nfor i in range(5):\n    total = total + i\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("total"), 10);
}

#[test]
fn for_loop_break_and_continue() {
    let src = "hits = 0\nfor i in range(10):\n    if i == 7:\n        break\n    if i % 2 == 0:\n        continue\n    hits = hits + 1\n";
    let h = Harness::run(src).unwrap();
    // Odd values below 7: 1, 3, 5.
    assert_eq!(h.local_int("hits"), 3);
}

#[test]
fn list_comprehension_with_filter() {
    let src = "ys = [x * x for x in range(4) if x > 1]\nn = len(ys)\nfirst = ys[0]\nlast = ys[-1]\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("n"), 2);
    assert_eq!(h.local_int("first"), 4);
    assert_eq!(h.local_int("last"), 9);
}

#[test]
fn functions_with_keyword_arguments() {
    let src = "def sub(a, b):\n    return a - b\nx = sub(b=1, a=5)\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("x"), 4);
}

#[test]
fn map_and_filter_with_lambda() {
    let src = "xs = [1, 2, 3]\nys = list(map(lambda v: v * 2, xs))\ntotal = sum(ys)\nbig = list(filter(lambda v: v > 2, ys))\nn = len(big)\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("total"), 12);
    assert_eq!(h.local_int("n"), 2);
}

#[test]
fn string_concat_and_formatting() {
    let src = "s = \"a\" + str(1)\nt = \"x: %s\" % 5\n";
    let h = Harness::run(src).unwrap();
    let s = h.local("s");
    assert_eq!(h.machine.value_text(&s).unwrap(), "a1");
    let t = h.local("t");
    assert_eq!(h.machine.value_text(&t).unwrap(), "x: 5");
}

#[test]
fn print_output_is_captured() {
    let h = Harness::run("print(\"result\", 42)").unwrap();
    assert_eq!(h.machine.output, vec!["result 42"]);
}

#[test]
fn scoped_read_file_round_trips() {
    let src = "with scope(\"FS-ENV\", \"valid-token\"):\n    write_file(\"payload\", \"data.txt\")\n    body = read_file(\"data.txt\")\nn = len(body)\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("n"), 7);
    let body = h.local("body");
    assert_eq!(h.machine.value_text(&body).unwrap(), "payload");
}

#[test]
fn parse_json_and_field_access() {
    let src = "doc = parse_json(\"{\\\"count\\\": 3, \\\"tag\\\": \\\"ok\\\"}\")\nc = doc[\"count\"]\nt = doc.tag\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("c"), 3);
    let t = h.local("t");
    assert_eq!(h.machine.value_text(&t).unwrap(), "ok");
}

#[test]
fn dict_literal_and_methods() {
    let src = "d = {\"a\": 1, \"b\": 2}\nx = d.get(\"a\", 0)\ny = d.get(\"zz\", 9)\nn = len(d)\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("x"), 1);
    assert_eq!(h.local_int("y"), 9);
    assert_eq!(h.local_int("n"), 2);
}

#[test]
fn tuple_unpacking() {
    let src = "pair = (3, 4)\na, b = pair\n";
    let h = Harness::run(src).unwrap();
    assert_eq!(h.local_int("a"), 3);
    assert_eq!(h.local_int("b"), 4);
}

#[test]
fn machine_reset_clears_scope_and_stack_between_runs() {
    let src = "with scope(\"FS-ENV\", \"valid-token\"):\n    write_file(\"OK\", \"one.txt\")\n";
    let mut h = Harness::run(src).unwrap();
    // Reuse the same machine for a second principal.
    h.machine.load(&h.program);
    assert!(h.machine.scopes().is_empty());
    h.machine.run(GAS).unwrap();
    assert_eq!(std::fs::read(h.root.join("one.txt")).unwrap(), b"OK");
}
