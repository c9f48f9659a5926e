//! The fixed helper library injected into every script.
//!
//! Pure helpers are plain functions; helpers that touch the job (logging,
//! fetching, sub-jobs, host records) close over the [`Runtime`].

use std::rc::Rc;

use base64::Engine as _;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use time::format_description::{self, BorrowedFormatItem};
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use tether_script::{Args, DictKey, ErrorKind, Interpreter, Namespace, ScriptError, Value};
use tether_storage::{to_values, Job, JobState, LogLevel, LogType, Record};

use super::records::{self, RecordHandle};
use super::Runtime;
use crate::clock::{self, DEFAULT_SERVER_DATETIME_FORMAT};
use crate::docs;
use crate::error::EngineError;
use crate::http::is_network_url;
use crate::jobs::{EnqueueOptions, LogEntry};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

fn validation(message: String) -> ScriptError {
    ScriptError::raised(ErrorKind::ValidationError, message)
}

/// Text or bytes argument as bytes.
fn data_bytes(value: &Value, what: &str) -> Result<Vec<u8>, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.as_bytes().to_vec()),
        Value::Bytes(b) => Ok(b.to_vec()),
        other => Err(ScriptError::type_error(format!(
            "{} must be str or bytes, not {}",
            what,
            other.type_name()
        ))),
    }
}

// ── Attribute access ─────────────────────────────────────────────────────────

fn safe_getattr(interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let obj = args.required(0, "o", "getattr")?;
    let key = args.required(1, "k", "getattr")?;
    let key = key.expect_str("attribute name")?;
    if key.starts_with('_') {
        return Err(validation(format!("You cannot use {} with getattr", key)));
    }
    match interp.get_attr(&obj, key) {
        Err(e) if e.kind() == Some(ErrorKind::AttributeError) => {
            Ok(args.get(2, "d").cloned().unwrap_or(Value::None))
        }
        other => other,
    }
}

fn safe_setattr(interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let obj = args.required(0, "o", "setattr")?;
    let key = args.required(1, "k", "setattr")?;
    let key = key.expect_str("attribute name")?;
    if key.starts_with('_') {
        return Err(validation(format!("You cannot use {} with setattr", key)));
    }
    interp.set_attr(&obj, key, args.required(2, "v", "setattr")?)?;
    Ok(Value::None)
}

fn type2str(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let obj = args.required(0, "obj", "type2str")?;
    Ok(Value::str(format!("<class '{}'>", obj.type_name())))
}

// ── Text and encoding ────────────────────────────────────────────────────────

fn markdown2html(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let text = args.required(0, "text", "markdown2html")?;
    Ok(Value::str(docs::markdown_to_html(text.expect_str("text")?)))
}

fn html2plaintext(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let html = args.required(0, "html", "html2plaintext")?;
    Ok(Value::str(docs::html_to_plaintext(html.expect_str("html")?)))
}

fn sha256(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let data = data_bytes(&args.required(0, "data", "sha256")?, "data")?;
    let digest = Sha256::digest(&data);
    Ok(Value::str(
        digest.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
    ))
}

fn b64encode(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let data = data_bytes(&args.required(0, "data", "b64encode")?, "data")?;
    Ok(Value::bytes(B64.encode(data)))
}

fn b64decode(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let data = data_bytes(&args.required(0, "data", "b64decode")?, "data")?;
    B64.decode(data)
        .map(Value::bytes)
        .map_err(|e| ScriptError::value_error(format!("Invalid base64-encoded string: {}", e)))
}

fn json_dumps(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let json = args.required(0, "obj", "json_dumps")?.to_json()?;
    let text = if args.flag(1, "indent") {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    text.map(Value::str)
        .map_err(|e| ScriptError::value_error(e.to_string()))
}

fn json_loads(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let text = data_bytes(&args.required(0, "s", "json_loads")?, "s")?;
    let json: serde_json::Value =
        serde_json::from_slice(&text).map_err(|e| ScriptError::value_error(e.to_string()))?;
    Ok(Value::from_json(&json))
}

/// CSV text with every field quoted.
fn rows2csv(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let rows = args.required(0, "rows", "rows2csv")?;
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    for row in rows.iterate()? {
        let fields: Vec<String> = row.iterate()?.iter().map(Value::to_str).collect();
        writer
            .write_record(&fields)
            .map_err(|e| ScriptError::value_error(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ScriptError::value_error(e.to_string()))?;
    Ok(Value::str(String::from_utf8_lossy(&bytes)))
}

// ── Dates ────────────────────────────────────────────────────────────────────

/// Translate a `strftime` pattern into a `time` format description.
fn strftime(pattern: &str) -> Result<String, ScriptError> {
    let mut out = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(match chars.next() {
                Some('Y') => "[year]",
                Some('m') => "[month]",
                Some('d') => "[day]",
                Some('H') => "[hour]",
                Some('M') => "[minute]",
                Some('S') => "[second]",
                Some('b') => "[month repr:short]",
                Some('B') => "[month repr:long]",
                Some('%') => "%",
                other => {
                    return Err(ScriptError::value_error(format!(
                        "unsupported directive '%{}' in format '{}'",
                        other.map(String::from).unwrap_or_default(),
                        pattern
                    )))
                }
            }),
            '[' => out.push_str("[["),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn with_format<T>(
    pattern: &str,
    f: impl FnOnce(&[BorrowedFormatItem<'_>]) -> Result<T, ScriptError>,
) -> Result<T, ScriptError> {
    let description = strftime(pattern)?;
    let items = format_description::parse(&description)
        .map_err(|e| ScriptError::value_error(e.to_string()))?;
    f(&items)
}

fn format_at(at: OffsetDateTime, pattern: &str) -> Result<String, ScriptError> {
    with_format(pattern, |items| {
        at.format(items)
            .map_err(|e| ScriptError::value_error(e.to_string()))
    })
}

fn format_pattern(args: &Args, index: usize) -> Result<String, ScriptError> {
    Ok(match args.optional(index, "fmt") {
        Some(v) => v.expect_str("fmt")?.to_string(),
        None => DEFAULT_SERVER_DATETIME_FORMAT.to_string(),
    })
}

fn now(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let pattern = format_pattern(&args, 0)?;
    format_at(OffsetDateTime::now_utc(), &pattern).map(Value::str)
}

fn today(_: &mut Interpreter, _args: Args) -> Result<Value, ScriptError> {
    format_at(OffsetDateTime::now_utc(), "%Y-%m-%d").map(Value::str)
}

fn timestamp(_: &mut Interpreter, _args: Args) -> Result<Value, ScriptError> {
    Ok(Value::Int(OffsetDateTime::now_utc().unix_timestamp()))
}

/// Unix timestamp of a UTC date string. Date-only patterns mean midnight.
fn parse_datetime(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let text = args.required(0, "text", "parse_datetime")?;
    let text = text.expect_str("text")?;
    let pattern = format_pattern(&args, 1)?;
    let at = with_format(&pattern, |items| {
        PrimitiveDateTime::parse(text, items)
            .or_else(|_| Date::parse(text, items).map(|d| d.midnight()))
            .map_err(|e| {
                ScriptError::value_error(format!(
                    "time data '{}' does not match format '{}': {}",
                    text, pattern, e
                ))
            })
    })?;
    Ok(Value::Int(at.assume_utc().unix_timestamp()))
}

fn format_datetime(_: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let ts = args.required(0, "ts", "format_datetime")?.expect_int("ts")?;
    let at = OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| ScriptError::value_error(e.to_string()))?;
    format_at(at, &format_pattern(&args, 1)?).map(Value::str)
}

// ── Runtime helpers ──────────────────────────────────────────────────────────

fn log_entry(args: &Args) -> Result<LogEntry, ScriptError> {
    let message = args.required(0, "message", "log")?.to_str();
    let level = match args.optional(1, "level") {
        Some(v) => {
            let name = v.expect_str("level")?;
            LogLevel::parse(name)
                .ok_or_else(|| ScriptError::value_error(format!("unknown log level '{}'", name)))?
        }
        None => LogLevel::Info,
    };
    let mut entry = LogEntry::new(level, message);
    if let Some(name) = args.optional(2, "name") {
        entry = entry.name(name.expect_str("name")?);
    }
    if let Some(log_type) = args.optional(3, "log_type") {
        let s = log_type.expect_str("log_type")?;
        entry = entry.log_type(
            LogType::parse(s)
                .ok_or_else(|| ScriptError::value_error(format!("unknown log type '{}'", s)))?,
        );
    }
    Ok(entry)
}

fn url2bin(rt: &Runtime, args: &Args, func: &str) -> Result<Option<Vec<u8>>, ScriptError> {
    let url = match args.optional(0, "url") {
        Some(v) => v.expect_str("url")?.to_string(),
        None => return Ok(None),
    };
    if url.is_empty() {
        return Ok(None);
    }
    if !is_network_url(&url) {
        return Err(ScriptError::raised(
            ErrorKind::ValidationError,
            format!("{}: only http and https URLs can be fetched, not '{}'", func, url),
        ));
    }
    let response = rt.http.get(&url, &[]).map_err(|e| {
        ScriptError::raised(ErrorKind::OSError, format!("{}: {}", func, e))
    })?;
    Ok(Some(response.body))
}

fn function_name(value: &Value) -> Result<String, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Function(f) => Ok(f.def.name.clone()),
        Value::Native(n) => Ok(n.name.clone()),
        other => Err(ScriptError::type_error(format!(
            "add_job() needs a function or its name, not {}",
            other.type_name()
        ))),
    }
}

fn enqueue_options(args: &Args) -> Result<EnqueueOptions, ScriptError> {
    let mut options = EnqueueOptions::default();
    for (key, value) in &args.keywords {
        match key.as_str() {
            "priority" => options.priority = value.expect_int("priority")?,
            "description" => options.description = Some(value.expect_str("description")?.to_string()),
            other => {
                return Err(ScriptError::type_error(format!(
                    "add_job() got an unexpected option '{}'",
                    other
                )))
            }
        }
    }
    Ok(options)
}

/// `add_job(function, **options)` returns a callable; calling it stores a
/// sub-job and schedules it once the current job commits.
fn add_job(rt: &Rc<Runtime>, args: Args) -> Result<Value, ScriptError> {
    let function = function_name(&args.required(0, "function", "add_job")?)?;
    let options = enqueue_options(&args)?;
    let rt = rt.clone();
    Ok(Value::native(&function.clone(), move |_, call: Args| {
        let kwargs = call
            .keywords
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
            .collect::<Result<serde_json::Map<_, _>, ScriptError>>()?;
        let job = Job {
            id: 0,
            project_id: rt.project.id,
            task_id: rt.job.task_id,
            parent_job_id: Some(rt.job.id),
            function: Some(function.clone()),
            args: call
                .positional
                .iter()
                .map(Value::to_json)
                .collect::<Result<_, _>>()?,
            kwargs,
            trigger_name: rt.job.trigger_name.clone(),
            queue_ref: None,
            state: JobState::Enqueued,
            attempts: 0,
            error: None,
            user: rt.job.user.clone(),
            created_at: clock::now_rfc3339(),
        };
        let values = to_values(&job).map_err(EngineError::from)?;
        let id = rt.store.create(Job::TABLE, values).map_err(EngineError::from)?;
        rt.defer_job(id, options.clone());
        rt.log(LogEntry::new(
            LogLevel::Info,
            format!(
                "add_job: {}(*{:?}, **{:?}). See job {}",
                function, job.args, job.kwargs, id
            ),
        ))?;
        Ok(Value::Int(id as i64))
    }))
}

/// Wrap `fn` so every call is logged as a transmission to `target`.
fn wrap_external(rt: &Rc<Runtime>, args: Args) -> Result<Value, ScriptError> {
    let target = args.required(0, "target", "wrap_external")?.expect_str("target")?.to_string();
    let func = args.required(1, "fn", "wrap_external")?;
    let rt = rt.clone();
    Ok(Value::native(&target.clone(), move |interp, call: Args| {
        let described = format!(
            "*{}, **{}",
            Value::tuple(call.positional.clone()).repr(),
            Value::dict(
                call.keywords
                    .iter()
                    .map(|(k, v)| (DictKey::from(k.as_str()), v.clone()))
                    .collect()
            )
            .repr()
        );
        rt.log(
            LogEntry::new(LogLevel::Info, described)
                .name(&target)
                .log_type(LogType::DataOut),
        )?;
        match interp.call(&func, call) {
            Ok(result) => {
                rt.log(
                    LogEntry::new(LogLevel::Info, format!("RESULT: {}", result.repr()))
                        .name(&target)
                        .log_type(LogType::DataIn),
                )?;
                Ok(result)
            }
            Err(e) => {
                rt.log(
                    LogEntry::new(LogLevel::Error, e.message())
                        .name(&target)
                        .log_type(LogType::DataIn),
                )?;
                Err(e)
            }
        }
    }))
}

// ── Assembly ─────────────────────────────────────────────────────────────────

/// Every helper, constant and exception type, bound to `rt`.
pub fn namespace(rt: &Rc<Runtime>) -> Namespace {
    let mut ns = Namespace::new();
    ns.register_fn("getattr", safe_getattr)
        .register_fn("setattr", safe_setattr)
        .register_fn("type2str", type2str)
        .register_fn("markdown2html", markdown2html)
        .register_fn("html2plaintext", html2plaintext)
        .register_fn("sha256", sha256)
        .register_fn("b64encode", b64encode)
        .register_fn("b64decode", b64decode)
        .register_fn("json_dumps", json_dumps)
        .register_fn("json_loads", json_loads)
        .register_fn("rows2csv", rows2csv)
        .register_fn("now", now)
        .register_fn("today", today)
        .register_fn("timestamp", timestamp)
        .register_fn("parse_datetime", parse_datetime)
        .register_fn("format_datetime", format_datetime);

    ns.register("DEFAULT_SERVER_DATETIME_FORMAT", DEFAULT_SERVER_DATETIME_FORMAT);
    for level in [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ] {
        ns.register(
            format!("LOG_{}", level.as_str().to_ascii_uppercase()),
            level.as_str(),
        );
    }
    for kind in [
        ErrorKind::UserError,
        ErrorKind::ValidationError,
        ErrorKind::RetryableJobError,
        ErrorKind::OSError,
    ] {
        ns.register(kind.name(), Value::ExceptionType(kind));
    }

    let user = IndexMap::from([
        (DictKey::from("name"), Value::str(&rt.operator.name)),
        (DictKey::from("is_manager"), Value::Bool(rt.operator.is_manager)),
    ]);
    ns.register("user", Value::dict(user));
    ns.register("trigger", rt.job.trigger_name.clone());

    let r = rt.clone();
    ns.register_fn("log", move |_, args| {
        r.log(log_entry(&args)?)?;
        Ok(Value::None)
    });
    let r = rt.clone();
    ns.register_fn("log_transmission", move |_, args| {
        let recipient = args.required(0, "recipient", "log_transmission")?;
        let data = args.required(1, "data", "log_transmission")?;
        r.log(
            LogEntry::new(LogLevel::Info, data.to_str())
                .name(recipient.expect_str("recipient")?)
                .log_type(LogType::DataOut),
        )?;
        Ok(Value::None)
    });
    let r = rt.clone();
    ns.register_fn("wrap_external", move |_, args| wrap_external(&r, args));
    let r = rt.clone();
    ns.register_fn("add_job", move |_, args| add_job(&r, args));
    let r = rt.clone();
    ns.register_fn("url2bin", move |_, args| {
        Ok(url2bin(&r, &args, "url2bin")?
            .map(Value::bytes)
            .unwrap_or(Value::None))
    });
    let r = rt.clone();
    ns.register_fn("url2base64", move |_, args| {
        Ok(url2bin(&r, &args, "url2base64")?
            .map(|body| Value::bytes(B64.encode(body)))
            .unwrap_or(Value::None))
    });

    let r = rt.clone();
    ns.register_fn("create_record", move |_, args| {
        let model = args.required(0, "model", "create_record")?;
        let values = args.required(1, "values", "create_record")?;
        records::create_record(&r, model.expect_str("model")?, &values)
    });
    let r = rt.clone();
    ns.register_fn("browse", move |_, args| {
        let model = args.required(0, "model", "browse")?;
        let model = model.expect_str("model")?;
        let id = args.required(1, "id", "browse")?.expect_int("id")?;
        records::host_model(&r, model)?;
        Ok(RecordHandle::value(&r, tether_storage::RecordRef::new(model, id.max(0) as u64)))
    });
    let r = rt.clone();
    ns.register_fn("search_records", move |_, args| {
        let model = args.required(0, "model", "search_records")?;
        records::search_records(&r, model.expect_str("model")?, &args)
    });

    super::sync_fns::register(rt, &mut ns);
    ns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(f: fn(&mut Interpreter, Args) -> Result<Value, ScriptError>, args: Vec<Value>) -> Value {
        f(&mut Interpreter::default(), Args::new(args)).unwrap()
    }

    #[test]
    fn underscore_keys_are_rejected() {
        let err = safe_getattr(
            &mut Interpreter::default(),
            Args::new(vec![Value::str("x"), Value::str("_secret")]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ValidationError));
        assert_eq!(err.message(), "You cannot use _secret with getattr");
        let err = safe_setattr(
            &mut Interpreter::default(),
            Args::new(vec![Value::str("x"), Value::str("__class__"), Value::None]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ValidationError));
    }

    #[test]
    fn getattr_falls_back_to_the_default() {
        let v = run(
            safe_getattr,
            vec![Value::Int(1), Value::str("missing"), Value::str("fallback")],
        );
        assert_eq!(v.to_str(), "fallback");
    }

    #[test]
    fn hashing_and_base64() {
        let digest = run(sha256, vec![Value::str("abc")]);
        assert_eq!(
            digest.to_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let encoded = run(b64encode, vec![Value::str("hi")]);
        assert!(matches!(&encoded, Value::Bytes(b) if &**b == b"aGk="));
        let decoded = run(b64decode, vec![encoded]);
        assert!(matches!(&decoded, Value::Bytes(b) if &**b == b"hi"));
    }

    #[test]
    fn rows_become_fully_quoted_csv() {
        let rows = Value::list(vec![
            Value::list(vec![Value::str("name"), Value::str("count")]),
            Value::list(vec![Value::str("a,b"), Value::Int(3)]),
        ]);
        let csv = run(rows2csv, vec![rows]);
        assert_eq!(csv.to_str(), "\"name\",\"count\"\n\"a,b\",\"3\"\n");
    }

    #[test]
    fn datetimes_round_trip_through_strftime_patterns() {
        let ts = run(parse_datetime, vec![Value::str("2024-05-01 10:30:00")]);
        assert_eq!(ts.as_int(), Some(1_714_559_400));
        let text = run(
            format_datetime,
            vec![ts, Value::str("%d %b %Y")],
        );
        assert_eq!(text.to_str(), "01 May 2024");
        let midnight = run(parse_datetime, vec![Value::str("2024-05-01"), Value::str("%Y-%m-%d")]);
        assert_eq!(midnight.as_int(), Some(1_714_521_600));
        assert!(strftime("%Q").is_err());
    }

    #[test]
    fn type_names_look_like_classes() {
        assert_eq!(run(type2str, vec![Value::Int(1)]).to_str(), "<class 'int'>");
    }
}
