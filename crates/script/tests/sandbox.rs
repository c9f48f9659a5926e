use std::cell::RefCell;
use std::rc::Rc;
use tether_script::{
    validate, Args, ErrorKind, Interpreter, Namespace, Sandbox, ScriptError, Value, Variant,
};

fn run(src: &str) -> Result<Namespace, ScriptError> {
    let mut interp = Interpreter::default();
    Sandbox::baseline().evaluate(&mut interp, src, &Namespace::new())
}

fn export_of(src: &str, name: &str) -> Value {
    let ns = run(src).unwrap_or_else(|e| panic!("script failed: {e}"));
    ns.get(name).cloned().unwrap_or_else(|| panic!("{name} not exported"))
}

#[test]
fn exported_lambda_is_callable() {
    let mut interp = Interpreter::default();
    let ns = Sandbox::baseline()
        .evaluate(&mut interp, "export(hello=lambda: \"hi\")\n", &Namespace::new())
        .unwrap();
    assert_eq!(ns.names().collect::<Vec<_>>(), vec!["hello"]);
    let hello = ns.callable("hello").unwrap().clone();
    let result = interp.call(&hello, Args::empty()).unwrap();
    assert_eq!(result.as_str(), Some("hi"));
}

#[test]
fn export_registers_functions_by_name_and_merges_dicts() {
    let src = "def greet(name):\n    return 'hello ' + name\nexport(greet, {'answer': 42}, flag=True)\n";
    let ns = run(src).unwrap();
    assert_eq!(
        ns.names().collect::<Vec<_>>(),
        vec!["greet", "answer", "flag"]
    );
}

#[test]
fn export_rejects_other_positional_values() {
    let err = run("export(5)\n").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::TypeError));
    assert_eq!(err.line(), 1);
}

#[test]
fn injected_names_are_the_only_capabilities() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = calls.clone();
    let mut injected = Namespace::new();
    injected.register("LIMIT", 3i64);
    injected.register_fn("record", move |_, args| {
        seen.borrow_mut().push(args.positional[0].to_str());
        Ok(Value::None)
    });
    let src = "for i in range(LIMIT):\n    record('item %d' % i)\n";
    let mut interp = Interpreter::default();
    Sandbox::baseline()
        .evaluate(&mut interp, src, &injected)
        .unwrap();
    assert_eq!(*calls.borrow(), vec!["item 0", "item 1", "item 2"]);

    let err = run("open('/etc/passwd')\n").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NameError));
}

#[test]
fn imports_are_rejected_before_running() {
    let diags = validate("import os\nx = 1\n", Variant::Baseline);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].line, 1);
    assert!(matches!(
        run("from os import path\n"),
        Err(ScriptError::Forbidden { line: 1, .. })
    ));
}

#[test]
fn private_attributes_only_in_elevated_code() {
    let src = "x = PARAMS._cache\n";
    assert_eq!(validate(src, Variant::Baseline).len(), 1);
    assert!(validate(src, Variant::Elevated).is_empty());
    assert_eq!(validate("x = y.__dict__\n", Variant::Elevated).len(), 1);
}

#[test]
fn syntax_errors_are_reported_not_raised() {
    let diags = validate("def broken(:\n    pass\n", Variant::Baseline);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].line, 1);
    assert!(validate("", Variant::Baseline).is_empty());
}

#[test]
fn exceptions_are_raised_and_caught_by_kind() {
    let mut injected = Namespace::new();
    injected.register("UserError", Value::ExceptionType(ErrorKind::UserError));
    injected.register(
        "ValidationError",
        Value::ExceptionType(ErrorKind::ValidationError),
    );
    let src = "\
log = []
try:
    raise ValidationError('bad value')
except UserError as e:
    log.append(str(e))
finally:
    log.append('done')
try:
    {}['missing']
except Exception:
    log.append('key')
export(log=log)
";
    let mut interp = Interpreter::default();
    let ns = Sandbox::baseline()
        .evaluate(&mut interp, src, &injected)
        .unwrap();
    assert_eq!(ns.get("log").unwrap().repr(), "['bad value', 'done', 'key']");
}

#[test]
fn uncaught_exception_carries_kind_and_line() {
    let mut injected = Namespace::new();
    injected.register(
        "RetryableJobError",
        Value::ExceptionType(ErrorKind::RetryableJobError),
    );
    let mut interp = Interpreter::default();
    let err = Sandbox::baseline()
        .evaluate(
            &mut interp,
            "x = 1\nraise RetryableJobError('try later')\n",
            &injected,
        )
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::RetryableJobError));
    assert_eq!(err.message(), "try later");
    assert_eq!(err.line(), 2);
}

#[test]
fn step_budget_is_not_catchable() {
    let sandbox = Sandbox::new(tether_script::Ruleset::baseline().with_max_steps(Some(500)));
    let src = "try:\n    while True:\n        pass\nexcept Exception:\n    pass\n";
    let mut interp = Interpreter::default();
    let err = sandbox
        .evaluate(&mut interp, src, &Namespace::new())
        .unwrap_err();
    assert!(matches!(err, ScriptError::BudgetExceeded { limit: 500 }));
}

#[test]
fn recursion_depth_is_bounded() {
    let sandbox = Sandbox::new(tether_script::Ruleset::baseline().with_max_depth(16));
    let mut interp = Interpreter::default();
    let err = sandbox
        .evaluate(&mut interp, "def f(n):\n    return f(n + 1)\nf(0)\n", &Namespace::new())
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::RecursionError));
}

#[test]
fn closures_capture_their_scope() {
    let src = "\
def counter(start):
    state = {'n': start}
    def bump(step=1):
        state['n'] += step
        return state['n']
    return bump
c = counter(10)
c()
export(value=c(5))
";
    assert!(export_of(src, "value").py_eq(&Value::Int(16)));
}

#[test]
fn comprehensions_and_builtins() {
    let src = "\
rows = [{'name': 'b', 'qty': 2}, {'name': 'a', 'qty': 5}]
names = [r['name'] for r in sorted(rows, key=lambda r: r['name'])]
total = sum(r['qty'] for r in rows)
index = {r['name']: i for i, r in enumerate(rows)}
export(names=names, total=total, index=index, big=any(r['qty'] > 4 for r in rows))
";
    let ns = run(src).unwrap();
    assert_eq!(ns.get("names").unwrap().repr(), "['a', 'b']");
    assert!(ns.get("total").unwrap().py_eq(&Value::Int(7)));
    assert_eq!(ns.get("index").unwrap().repr(), "{'b': 0, 'a': 1}");
    assert!(ns.get("big").unwrap().truthy());
}

#[test]
fn string_methods_and_formatting() {
    let src = "\
s = '  Hello, World  '.strip()
parts = s.lower().split(', ')
export(joined='-'.join(parts), msg='{} has {n} parts'.format(s, n=len(parts)), raw=s.encode().decode())
";
    let ns = run(src).unwrap();
    assert_eq!(ns.get("joined").unwrap().to_str(), "hello-world");
    assert_eq!(ns.get("msg").unwrap().to_str(), "Hello, World has 2 parts");
    assert_eq!(ns.get("raw").unwrap().to_str(), "Hello, World");
}

#[test]
fn module_exposes_entry_points() {
    let mut interp = Interpreter::default();
    let module = Sandbox::baseline()
        .execute(
            &mut interp,
            "def handle_button():\n    return 'pressed'\n",
            &Namespace::new(),
        )
        .unwrap();
    assert!(module.function("handle_cron").is_none());
    let f = module.function("handle_button").unwrap();
    assert_eq!(interp.call(&f, Args::empty()).unwrap().to_str(), "pressed");
    interp.release();
}

fn error_kind(src: &str) -> Option<ErrorKind> {
    run(src).unwrap_err().kind()
}

#[test]
fn huge_ranges_are_refused() {
    assert_eq!(
        error_kind("x = range(-9000000000000000000, 9000000000000000000)\n"),
        Some(ErrorKind::MemoryError)
    );
    assert_eq!(error_kind("x = range(20000000)\n"), Some(ErrorKind::MemoryError));
}

#[test]
fn range_handles_extreme_steps() {
    let src = "\
lo = -9223372036854775807 - 1
export(down=range(9223372036854775807, 0, lo), none=range(0, 10, lo), wide=range(lo, 9223372036854775807, 9223372036854775807))
";
    let ns = run(src).unwrap();
    assert_eq!(ns.get("down").unwrap().repr(), "[9223372036854775807]");
    assert_eq!(ns.get("none").unwrap().repr(), "[]");
    assert_eq!(
        ns.get("wide").unwrap().repr(),
        "[-9223372036854775808, -1, 9223372036854775806]"
    );
}

#[test]
fn huge_repetition_is_refused() {
    assert_eq!(error_kind("x = 'ab' * 9000000000000000000\n"), Some(ErrorKind::MemoryError));
    assert_eq!(error_kind("x = [1, 2] * 9000000000000000000\n"), Some(ErrorKind::MemoryError));
    assert_eq!(error_kind("x = 9000000000000000000 * (1,)\n"), Some(ErrorKind::MemoryError));
    assert_eq!(export_of("export(x='ab' * -3)\n", "x").to_str(), "");
}

#[test]
fn doubling_a_string_hits_the_size_cap() {
    let src = "s = 'x'\nfor i in range(64):\n    s = s + s\n";
    assert_eq!(error_kind(src), Some(ErrorKind::MemoryError));
}

#[test]
fn enumerate_counter_overflow_is_an_error() {
    assert_eq!(
        error_kind("x = enumerate([1, 2], 9223372036854775807)\n"),
        Some(ErrorKind::OverflowError)
    );
    let ns = run("export(x=enumerate([1], 9223372036854775807))\n").unwrap();
    assert_eq!(ns.get("x").unwrap().repr(), "[(9223372036854775807, 1)]");
}

#[test]
fn integer_overflow_is_catchable() {
    let src = "\
try:
    x = 9223372036854775807 + 1
except Exception:
    x = 'caught'
export(x=x)
";
    assert_eq!(export_of(src, "x").to_str(), "caught");
    assert_eq!(
        error_kind("x = 9223372036854775807 * 2\n"),
        Some(ErrorKind::OverflowError)
    );
}

#[test]
fn huge_format_widths_are_refused() {
    assert_eq!(
        error_kind("x = '{:99999999999}'.format(1)\n"),
        Some(ErrorKind::MemoryError)
    );
    assert_eq!(error_kind("x = '%.99999999999f' % 1.5\n"), Some(ErrorKind::MemoryError));
}
