//! Pure builtins available to every script, plus the methods of the
//! built-in value types.

use crate::error::{ErrorKind, ScriptError};
use crate::interp::{binary_op, Interpreter, Scope};
use crate::ast::BinOp;
use crate::value::{Args, DictKey, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Longest list, tuple or string a script may build in one operation.
pub(crate) const MAX_SEQUENCE: usize = 10_000_000;

/// Check a computed length against [`MAX_SEQUENCE`]; `None` means the
/// computation itself overflowed.
pub(crate) fn sequence_len(len: Option<usize>, what: &str) -> Result<usize, ScriptError> {
    match len {
        Some(n) if n <= MAX_SEQUENCE => Ok(n),
        _ => Err(ScriptError::memory_error(format!("{} is too large", what))),
    }
}

type Builtin = fn(&mut Interpreter, Args) -> Result<Value, ScriptError>;

const FUNCTIONS: &[(&str, Builtin)] = &[
    ("len", b_len),
    ("str", b_str),
    ("int", b_int),
    ("float", b_float),
    ("bool", b_bool),
    ("list", b_list),
    ("dict", b_dict),
    ("tuple", b_tuple),
    ("range", b_range),
    ("enumerate", b_enumerate),
    ("zip", b_zip),
    ("sorted", b_sorted),
    ("reversed", b_reversed),
    ("min", b_min),
    ("max", b_max),
    ("sum", b_sum),
    ("abs", b_abs),
    ("any", b_any),
    ("all", b_all),
    ("round", b_round),
    ("repr", b_repr),
];

pub fn install(scope: &Scope) {
    for (name, f) in FUNCTIONS {
        let f = *f;
        scope.set(name, Value::native(name, f));
    }
    scope.set("Exception", Value::ExceptionType(ErrorKind::Exception));
}

fn arity(args: &Args, min: usize, max: usize, func: &str) -> Result<(), ScriptError> {
    let n = args.positional.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("exactly {}", min)
        } else {
            format!("from {} to {}", min, max)
        };
        return Err(ScriptError::type_error(format!(
            "{}() takes {} positional arguments ({} given)",
            func, expected, n
        )));
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Functions
// ──────────────────────────────────────────────

fn b_len(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "len")?;
    Ok(Value::Int(args.positional[0].len()? as i64))
}

fn b_str(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 1, "str")?;
    Ok(match args.positional.first() {
        None => Value::str(""),
        Some(v @ Value::Str(_)) => v.clone(),
        Some(v) => Value::str(v.to_str()),
    })
}

fn b_int(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 2, "int")?;
    let Some(v) = args.positional.first() else {
        return Ok(Value::Int(0));
    };
    let base = match args.get(1, "base") {
        Some(b) => b.expect_int("base")?,
        None => 10,
    };
    if !(2..=36).contains(&base) {
        return Err(ScriptError::value_error("int() base must be >= 2 and <= 36"));
    }
    let base = base as u32;
    match v {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ScriptError::value_error(format!(
                    "cannot convert float {} to integer",
                    crate::value::format_float(*f)
                )));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Str(s) => {
            let text = s.trim().replace('_', "");
            i64::from_str_radix(&text, base)
                .map(Value::Int)
                .map_err(|_| {
                    ScriptError::value_error(format!(
                        "invalid literal for int() with base {}: {}",
                        base,
                        v.repr()
                    ))
                })
        }
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn b_float(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 1, "float")?;
    let Some(v) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    match v {
        Value::Str(s) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                t => t.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                ScriptError::value_error(format!(
                    "could not convert string to float: {}",
                    v.repr()
                ))
            })
        }
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            ScriptError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn b_bool(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 1, "bool")?;
    Ok(Value::Bool(args.positional.first().is_some_and(Value::truthy)))
}

fn b_list(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 1, "list")?;
    match args.positional.first() {
        None => Ok(Value::list(Vec::new())),
        Some(v) => Ok(Value::list(v.iterate()?)),
    }
}

fn b_tuple(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 1, "tuple")?;
    match args.positional.first() {
        None => Ok(Value::tuple(Vec::new())),
        Some(v) => Ok(Value::tuple(v.iterate()?)),
    }
}

fn b_dict(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 0, 1, "dict")?;
    let mut map = IndexMap::new();
    if let Some(src) = args.positional.first() {
        merge_into(&mut map, src)?;
    }
    for (k, v) in args.keywords {
        map.insert(DictKey::from(k.as_str()), v);
    }
    Ok(Value::dict(map))
}

/// Merge a dict or a sequence of pairs into `map`.
fn merge_into(map: &mut IndexMap<DictKey, Value>, src: &Value) -> Result<(), ScriptError> {
    if let Value::Dict(d) = src {
        for (k, v) in d.borrow().iter() {
            map.insert(k.clone(), v.clone());
        }
        return Ok(());
    }
    if let Value::Host(h) = src {
        if let Some(serde_json::Value::Object(obj)) = h.to_json() {
            for (k, v) in obj {
                map.insert(DictKey::from(k.as_str()), Value::from_json(&v));
            }
            return Ok(());
        }
    }
    for (i, item) in src.iterate()?.into_iter().enumerate() {
        let pair = item.iterate()?;
        if pair.len() != 2 {
            return Err(ScriptError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                pair.len()
            )));
        }
        map.insert(pair[0].to_key()?, pair[1].clone());
    }
    Ok(())
}

fn b_range(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 3, "range")?;
    let ints: Vec<i64> = args
        .positional
        .iter()
        .map(|v| v.expect_int("range() argument"))
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(ScriptError::type_error("range expected 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }
    // i128 holds every intermediate of i64 bounds
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let count = if step > 0 {
        (stop - start + step - 1).max(0) / step
    } else {
        (start - stop - step - 1).max(0) / -step
    };
    let count = sequence_len(usize::try_from(count).ok(), "range()")?;
    let items = (0..count)
        .map(|i| {
            let n = start + i as i128 * step;
            i64::try_from(n)
                .map(Value::Int)
                .map_err(|_| ScriptError::overflow_error("range() item out of bounds"))
        })
        .collect::<Result<_, _>>()?;
    Ok(Value::list(items))
}

fn b_enumerate(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let src = args.required(0, "iterable", "enumerate")?;
    let start = match args.get(1, "start") {
        Some(v) => v.expect_int("start")?,
        None => 0,
    };
    let items = src
        .iterate()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let n = i64::try_from(i)
                .ok()
                .and_then(|i| start.checked_add(i))
                .ok_or_else(|| ScriptError::overflow_error("enumerate() counter overflow"))?;
            Ok(Value::tuple(vec![Value::Int(n), v]))
        })
        .collect::<Result<_, ScriptError>>()?;
    Ok(Value::list(items))
}

fn b_zip(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let columns: Vec<Vec<Value>> = args
        .positional
        .iter()
        .map(Value::iterate)
        .collect::<Result<_, _>>()?;
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..n)
        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
        .collect();
    Ok(Value::list(rows))
}

/// Sort with an optional key callable; comparison errors abort the sort.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Result<Vec<Value>, ScriptError> {
    let keys = match key {
        Some(f) => items
            .iter()
            .map(|v| interp.call(f, Args::new(vec![v.clone()])))
            .collect::<Result<Vec<_>, _>>()?,
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match keys[a].compare(&keys[b]) {
        Ok(o) => o,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if reverse {
        order.reverse();
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn b_sorted(interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "sorted")?;
    let items = args.positional[0].iterate()?;
    let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
    let reverse = args.keyword("reverse").is_some_and(Value::truthy);
    Ok(Value::list(sort_values(interp, items, key.as_ref(), reverse)?))
}

fn b_reversed(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "reversed")?;
    let mut items = args.positional[0].iterate()?;
    items.reverse();
    Ok(Value::list(items))
}

fn extreme(interp: &mut Interpreter, args: Args, want: Ordering, name: &str) -> Result<Value, ScriptError> {
    let items = match args.positional.as_slice() {
        [] => return Err(ScriptError::type_error(format!("{} expected at least 1 argument, got 0", name))),
        [one] => one.iterate()?,
        many => many.to_vec(),
    };
    let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        best = match best {
            Some((bk, bv)) if k.compare(&bk)? != want => Some((bk, bv)),
            _ => Some((k, item)),
        };
    }
    match best {
        Some((_, v)) => Ok(v),
        None => match args.keyword("default") {
            Some(d) => Ok(d.clone()),
            None => Err(ScriptError::value_error(format!("{}() arg is an empty sequence", name))),
        },
    }
}

fn b_min(interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    extreme(interp, args, Ordering::Less, "min")
}

fn b_max(interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    extreme(interp, args, Ordering::Greater, "max")
}

fn b_sum(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 2, "sum")?;
    let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(ScriptError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in args.positional[0].iterate()? {
        total = binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn b_abs(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "abs")?;
    match &args.positional[0] {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::overflow_error("integer overflow")),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn b_any(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "any")?;
    Ok(Value::Bool(args.positional[0].iterate()?.iter().any(Value::truthy)))
}

fn b_all(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "all")?;
    Ok(Value::Bool(args.positional[0].iterate()?.iter().all(Value::truthy)))
}

fn b_round(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 2, "round")?;
    let x = &args.positional[0];
    let digits = match args.get(1, "ndigits") {
        None | Some(Value::None) => None,
        Some(d) => Some(d.expect_int("ndigits")?),
    };
    if let Value::Int(n) = x {
        return Ok(Value::Int(*n));
    }
    let f = x.as_float().ok_or_else(|| {
        ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            x.type_name()
        ))
    })?;
    match digits {
        None => {
            if !f.is_finite() {
                return Err(ScriptError::value_error("cannot round a non-finite float"));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        Some(d) => {
            let scale = 10f64.powi(d as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
    }
}

fn b_repr(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    arity(&args, 1, 1, "repr")?;
    Ok(Value::str(args.positional[0].repr()))
}

// ──────────────────────────────────────────────
// Methods of built-in types
// ──────────────────────────────────────────────

const STR_METHODS: &[&str] = &[
    "strip", "lstrip", "rstrip", "lower", "upper", "split", "splitlines", "join", "startswith",
    "endswith", "replace", "format", "encode", "find", "count", "isdigit",
];
const BYTES_METHODS: &[&str] = &["decode"];
const LIST_METHODS: &[&str] = &["append", "extend", "pop", "index", "insert", "remove", "count", "sort"];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "update", "pop", "setdefault", "copy",
];

pub fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::Bytes(_) => BYTES_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::Bytes(b) => bytes_method(b, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Dict(_) => dict_method(receiver, name, args),
        other => Err(ScriptError::raised(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn strip_chars(args: &Args) -> Result<Option<Vec<char>>, ScriptError> {
    match args.optional(0, "chars") {
        None => Ok(None),
        Some(v) => Ok(Some(v.expect_str("chars")?.chars().collect())),
    }
}

fn prefixes(v: &Value) -> Result<Vec<String>, ScriptError> {
    match v {
        Value::Str(s) => Ok(vec![s.to_string()]),
        Value::Tuple(items) => items
            .iter()
            .map(|i| i.expect_str("prefix").map(str::to_owned))
            .collect(),
        other => Err(ScriptError::type_error(format!(
            "startswith first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn str_method(s: &str, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(&args)?;
            let pred = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Ok(Value::str(match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            }))
        }
        "lower" => Ok(Value::str(s.to_lowercase())),
        "upper" => Ok(Value::str(s.to_uppercase())),
        "split" => {
            let sep = args.optional(0, "sep");
            let maxsplit = match args.get(1, "maxsplit") {
                Some(v) => v.expect_int("maxsplit")?,
                None => -1,
            };
            let parts: Vec<Value> = match sep {
                None => {
                    if maxsplit < 0 {
                        s.split_whitespace().map(Value::str).collect()
                    } else {
                        split_whitespace_n(s, maxsplit as usize)
                    }
                }
                Some(sep) => {
                    let sep = sep.expect_str("sep")?;
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator"));
                    }
                    if maxsplit < 0 {
                        s.split(sep).map(Value::str).collect()
                    } else {
                        s.splitn(maxsplit as usize + 1, sep).map(Value::str).collect()
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "join" => {
            let items = args.required(0, "iterable", "join")?.iterate()?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(parts.join(s)))
        }
        "startswith" => {
            let p = prefixes(&args.required(0, "prefix", "startswith")?)?;
            Ok(Value::Bool(p.iter().any(|p| s.starts_with(p.as_str()))))
        }
        "endswith" => {
            let p = prefixes(&args.required(0, "suffix", "endswith")?)?;
            Ok(Value::Bool(p.iter().any(|p| s.ends_with(p.as_str()))))
        }
        "replace" => {
            let old = args.required(0, "old", "replace")?;
            let new = args.required(1, "new", "replace")?;
            let (old, new) = (old.expect_str("old")?, new.expect_str("new")?);
            match args.get(2, "count") {
                Some(c) if c.expect_int("count")? >= 0 => Ok(Value::str(s.replacen(
                    old,
                    new,
                    c.expect_int("count")? as usize,
                ))),
                _ => Ok(Value::str(s.replace(old, new))),
            }
        }
        "format" => str_format(s, &args).map(Value::str),
        "encode" => Ok(Value::bytes(s.as_bytes())),
        "find" => {
            let sub = args.required(0, "sub", "find")?;
            let sub = sub.expect_str("sub")?;
            Ok(Value::Int(match s.find(sub) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        "count" => {
            let sub = args.required(0, "sub", "count")?;
            let sub = sub.expect_str("sub")?;
            if sub.is_empty() {
                return Ok(Value::Int(s.chars().count() as i64 + 1));
            }
            Ok(Value::Int(s.matches(sub).count() as i64))
        }
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        _ => Err(no_method("str", name)),
    }
}

fn split_whitespace_n(s: &str, maxsplit: usize) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if out.len() == maxsplit {
            out.push(Value::str(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(Value::str(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

fn bytes_method(b: &[u8], name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "decode" => {
            let lossy = args
                .get(1, "errors")
                .and_then(Value::as_str)
                .is_some_and(|e| e == "replace" || e == "ignore");
            match std::str::from_utf8(b) {
                Ok(s) => Ok(Value::str(s)),
                Err(_) if lossy => Ok(Value::str(String::from_utf8_lossy(b))),
                Err(e) => Err(ScriptError::value_error(format!(
                    "'utf-8' codec can't decode bytes: {}",
                    e
                ))),
            }
        }
        _ => Err(no_method("bytes", name)),
    }
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    let Value::List(list) = receiver else {
        return Err(no_method(receiver.type_name(), name));
    };
    match name {
        "append" => {
            let v = args.required(0, "object", "append")?;
            list.borrow_mut().push(v);
            Ok(Value::None)
        }
        "extend" => {
            let items = args.required(0, "iterable", "extend")?.iterate()?;
            list.borrow_mut().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            let i = args.required(0, "index", "insert")?.expect_int("index")?;
            let v = args.required(1, "object", "insert")?;
            let mut l = list.borrow_mut();
            let len = l.len() as i64;
            let at = if i < 0 { (i + len).max(0) } else { i.min(len) };
            l.insert(at as usize, v);
            Ok(Value::None)
        }
        "pop" => {
            let mut l = list.borrow_mut();
            if l.is_empty() {
                return Err(ScriptError::raised(ErrorKind::IndexError, "pop from empty list"));
            }
            let len = l.len() as i64;
            let i = match args.get(0, "index") {
                Some(v) => v.expect_int("index")?,
                None => -1,
            };
            let at = if i < 0 { i + len } else { i };
            if at < 0 || at >= len {
                return Err(ScriptError::raised(ErrorKind::IndexError, "pop index out of range"));
            }
            Ok(l.remove(at as usize))
        }
        "index" => {
            let v = args.required(0, "value", "index")?;
            let pos = list.borrow().iter().position(|x| x.py_eq(&v));
            pos.map(|p| Value::Int(p as i64)).ok_or_else(|| {
                ScriptError::value_error(format!("{} is not in list", v.repr()))
            })
        }
        "remove" => {
            let v = args.required(0, "value", "remove")?;
            let mut l = list.borrow_mut();
            match l.iter().position(|x| x.py_eq(&v)) {
                Some(p) => {
                    l.remove(p);
                    Ok(Value::None)
                }
                None => Err(ScriptError::value_error("list.remove(x): x not in list")),
            }
        }
        "count" => {
            let v = args.required(0, "value", "count")?;
            let n = list.borrow().iter().filter(|x| x.py_eq(&v)).count();
            Ok(Value::Int(n as i64))
        }
        "sort" => {
            let items = list.borrow().clone();
            let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
            let reverse = args.keyword("reverse").is_some_and(Value::truthy);
            let sorted = sort_values(interp, items, key.as_ref(), reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        _ => Err(no_method("list", name)),
    }
}

fn dict_method(receiver: &Value, name: &str, args: Args) -> Result<Value, ScriptError> {
    let Value::Dict(dict) = receiver else {
        return Err(no_method(receiver.type_name(), name));
    };
    match name {
        "get" => {
            let key = args.required(0, "key", "get")?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            let Ok(key) = key.to_key() else {
                return Ok(default);
            };
            Ok(dict.borrow().get(&key).cloned().unwrap_or(default))
        }
        "keys" => Ok(Value::list(
            dict.borrow().keys().map(DictKey::to_value).collect(),
        )),
        "values" => Ok(Value::list(dict.borrow().values().cloned().collect())),
        "items" => Ok(Value::list(
            dict.borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                .collect(),
        )),
        "update" => {
            let mut incoming = IndexMap::new();
            if let Some(src) = args.positional.first() {
                merge_into(&mut incoming, src)?;
            }
            for (k, v) in &args.keywords {
                incoming.insert(DictKey::from(k.as_str()), v.clone());
            }
            dict.borrow_mut().extend(incoming);
            Ok(Value::None)
        }
        "pop" => {
            let key = args.required(0, "key", "pop")?;
            let k = key.to_key()?;
            let removed = dict.borrow_mut().shift_remove(&k);
            match (removed, args.get(1, "default")) {
                (Some(v), _) => Ok(v),
                (None, Some(d)) => Ok(d.clone()),
                (None, None) => Err(ScriptError::raised(ErrorKind::KeyError, key.repr())),
            }
        }
        "setdefault" => {
            let key = args.required(0, "key", "setdefault")?.to_key()?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            let mut d = dict.borrow_mut();
            Ok(d.entry(key).or_insert(default).clone())
        }
        "copy" => Ok(Value::dict(dict.borrow().clone())),
        _ => Err(no_method("dict", name)),
    }
}

fn no_method(type_name: &str, name: &str) -> ScriptError {
    ScriptError::raised(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", type_name, name),
    )
}

// ──────────────────────────────────────────────
// String formatting
// ──────────────────────────────────────────────

/// `"%s items" % n` style formatting: `%s %r %d %i %f %.Nf %%`.
pub fn percent_format(fmt: &str, args: &Value) -> Result<String, ScriptError> {
    let values: Vec<Value> = match args {
        Value::Tuple(t) => t.to_vec(),
        other => vec![other.clone()],
    };
    let mut next = values.into_iter();
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            precision = digits.parse().ok();
            if precision.is_some() {
                sequence_len(precision, "format precision")?;
            }
        }
        let Some(conv) = chars.next() else {
            return Err(ScriptError::value_error("incomplete format"));
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let arg = next
            .next()
            .ok_or_else(|| ScriptError::type_error("not enough arguments for format string"))?;
        match conv {
            's' => out.push_str(&arg.to_str()),
            'r' => out.push_str(&arg.repr()),
            'd' | 'i' => {
                let f = arg.as_float().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "%d format: a number is required, not {}",
                        arg.type_name()
                    ))
                })?;
                out.push_str(&(f.trunc() as i64).to_string());
            }
            'f' => {
                let f = arg.as_float().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "must be real number, not {}",
                        arg.type_name()
                    ))
                })?;
                out.push_str(&format!("{:.*}", precision.unwrap_or(6), f));
            }
            other => {
                return Err(ScriptError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        }
    }
    if next.next().is_some() {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// `str.format` with `{}`, `{0}`, `{name}` fields and an optional
/// `[[fill]align][width][.precision][type]` spec.
pub fn str_format(fmt: &str, args: &Args) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(fmt.len());
    let mut auto = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ScriptError::value_error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(ScriptError::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((n, s)) => (n.to_owned(), s.to_owned()),
                    None => (field, String::new()),
                };
                let value = if name.is_empty() {
                    let v = args.positional.get(auto).cloned();
                    auto += 1;
                    v.ok_or_else(|| {
                        ScriptError::raised(
                            ErrorKind::IndexError,
                            format!("Replacement index {} out of range", auto - 1),
                        )
                    })?
                } else if let Ok(i) = name.parse::<usize>() {
                    args.positional.get(i).cloned().ok_or_else(|| {
                        ScriptError::raised(
                            ErrorKind::IndexError,
                            format!("Replacement index {} out of range", i),
                        )
                    })?
                } else if name.contains(['.', '[']) {
                    return Err(ScriptError::value_error(format!(
                        "field '{}' is not supported",
                        name
                    )));
                } else {
                    args.keyword(&name)
                        .cloned()
                        .ok_or_else(|| ScriptError::raised(ErrorKind::KeyError, format!("'{}'", name)))?
                };
                out.push_str(&apply_spec(&value, &spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn apply_spec(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if matches!(chars.first(), Some('<' | '>' | '^')) {
        align = Some(chars[0]);
        i = 1;
    }
    let mut width = String::new();
    while i < chars.len() && chars[i].is_ascii_digit() {
        width.push(chars[i]);
        i += 1;
    }
    let mut precision = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let mut digits = String::new();
        while i < chars.len() && chars[i].is_ascii_digit() {
            digits.push(chars[i]);
            i += 1;
        }
        precision = digits.parse::<usize>().ok();
        if precision.is_some() {
            sequence_len(precision, "format precision")?;
        }
    }
    let kind = chars.get(i).copied();
    if i + 1 < chars.len() {
        return Err(ScriptError::value_error(format!("Invalid format specifier '{}'", spec)));
    }
    let numeric = matches!(value, Value::Int(_) | Value::Float(_));
    let body = match kind {
        Some('f') => fixed(value, precision)?,
        None if numeric && precision.is_some() => fixed(value, precision)?,
        Some('d') => match value {
            Value::Int(n) => n.to_string(),
            other => {
                return Err(ScriptError::value_error(format!(
                    "Unknown format code 'd' for object of type '{}'",
                    other.type_name()
                )))
            }
        },
        Some('s') | None => {
            let text = value.to_str();
            match precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{}'",
                other
            )))
        }
    };
    let width: usize = width.parse().unwrap_or(0);
    sequence_len(Some(width), "format width")?;
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    let fill_n = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '>' => format!("{}{}", fill_n(pad), body),
        '^' => format!("{}{}{}", fill_n(pad / 2), body, fill_n(pad - pad / 2)),
        _ => format!("{}{}", body, fill_n(pad)),
    })
}

fn fixed(value: &Value, precision: Option<usize>) -> Result<String, ScriptError> {
    let f = value.as_float().ok_or_else(|| {
        ScriptError::value_error(format!(
            "Unknown format code 'f' for object of type '{}'",
            value.type_name()
        ))
    })?;
    Ok(format!("{:.*}", precision.unwrap_or(6), f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_formatting() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(1.5)]);
        assert_eq!(
            percent_format("%s=%d (%.2f) 100%%", &args).unwrap(),
            "x=3 (1.50) 100%"
        );
        assert!(percent_format("%s %s", &Value::str("a")).is_err());
    }

    #[test]
    fn brace_formatting() {
        let args = Args::new(vec![Value::str("a"), Value::Float(2.0)])
            .with_keyword("name", Value::str("n"));
        assert_eq!(
            str_format("{} {name} {1:.1f} {{x}}", &args).unwrap(),
            "a n 2.0 {x}"
        );
        assert_eq!(str_format("[{:>4}]", &Args::new(vec![Value::Int(7)])).unwrap(), "[   7]");
    }

    #[test]
    fn split_variants() {
        let v = str_method(" a  b c ", "split", Args::empty()).unwrap();
        assert_eq!(v.repr(), "['a', 'b', 'c']");
        let v = str_method("a,b,c", "split", Args::new(vec![Value::str(","), Value::Int(1)])).unwrap();
        assert_eq!(v.repr(), "['a', 'b,c']");
    }

    #[test]
    fn sorted_reports_incomparable_items() {
        let mut interp = Interpreter::default();
        let items = vec![Value::Int(1), Value::str("a")];
        assert!(sort_values(&mut interp, items, None, false).is_err());
    }
}
