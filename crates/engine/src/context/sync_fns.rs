//! Script bindings of the sync primitives and the relation-level link
//! helpers.

use std::collections::BTreeMap;
use std::rc::Rc;

use indexmap::IndexMap;

use tether_script::{Args, DictKey, Interpreter, Namespace, ScriptError, Value};
use tether_storage::{LogLevel, RecordRef};

use super::records::{self, LinkSetHandle, RecordHandle};
use super::Runtime;
use crate::jobs::LogEntry;
use crate::linker::LinkSet;
use crate::sync::{
    run_sync, Counterpart, ExternalToExternal, ExternalToHost, HostToExternal, SyncMode,
    SyncPass, SyncReport,
};

/// `info[key]` of a script dict; missing keys read as `None`.
fn entry(info: &Value, key: &str) -> Result<Option<Value>, ScriptError> {
    match info {
        Value::Dict(d) => Ok(d
            .borrow()
            .get(&DictKey::from(key))
            .filter(|v| !v.is_none())
            .cloned()),
        other => Err(ScriptError::type_error(format!(
            "sync info must be dict, not {}",
            other.type_name()
        ))),
    }
}

fn required_entry(info: &Value, key: &str, func: &str) -> Result<Value, ScriptError> {
    entry(info, key)?.ok_or_else(|| {
        ScriptError::raised(
            tether_script::ErrorKind::KeyError,
            format!("{}: missing '{}'", func, key),
        )
    })
}

/// Script callbacks of one pass.
struct ScriptCounterpart<'i> {
    interp: &'i mut Interpreter,
    rt: Rc<Runtime>,
    get_ref: Option<Value>,
    create: Option<Value>,
    update: Option<Value>,
}

impl ScriptCounterpart<'_> {
    fn call(&mut self, f: &Option<Value>, args: Vec<Value>) -> Result<Value, ScriptError> {
        match f {
            Some(f) => self.interp.call(f, Args::new(args)),
            None => Ok(Value::None),
        }
    }

    /// `get_ref(src)`. An item whose `get_ref` returns `None` has no
    /// reference and is skipped by the pass.
    fn key_of(&mut self, src: &Value) -> Result<Option<String>, ScriptError> {
        let get_ref = self.get_ref.clone();
        let key = self.call(&get_ref, vec![src.clone()])?;
        if key.is_none() {
            return Ok(None);
        }
        records::reference(&key).map(Some)
    }

    fn external_result(&mut self, src: Value) -> Result<Option<String>, ScriptError> {
        let create = self.create.clone();
        let created = self.call(&create, vec![src])?;
        if created.is_none() {
            return Ok(None);
        }
        records::reference(&created).map(Some)
    }
}

impl Counterpart<RecordRef, String> for ScriptCounterpart<'_> {
    type Error = ScriptError;

    fn create(&mut self, src: &RecordRef) -> Result<Option<String>, ScriptError> {
        let handle = RecordHandle::value(&self.rt, src.clone());
        self.external_result(handle)
    }

    fn update(&mut self, dst: &String, src: &RecordRef) -> Result<(), ScriptError> {
        let update = self.update.clone();
        let handle = RecordHandle::value(&self.rt, src.clone());
        self.call(&update, vec![Value::str(dst), handle])?;
        Ok(())
    }
}

impl Counterpart<Value, RecordRef> for ScriptCounterpart<'_> {
    type Error = ScriptError;

    fn key(&mut self, src: &Value) -> Result<Option<String>, ScriptError> {
        self.key_of(src)
    }

    fn create(&mut self, src: &Value) -> Result<Option<RecordRef>, ScriptError> {
        let create = self.create.clone();
        let created = self.call(&create, vec![src.clone()])?;
        if created.is_none() {
            return Ok(None);
        }
        records::record_of(&created, "create() result").map(Some)
    }

    fn update(&mut self, dst: &RecordRef, src: &Value) -> Result<(), ScriptError> {
        let update = self.update.clone();
        let handle = RecordHandle::value(&self.rt, dst.clone());
        self.call(&update, vec![handle, src.clone()])?;
        Ok(())
    }
}

impl Counterpart<Value, String> for ScriptCounterpart<'_> {
    type Error = ScriptError;

    fn key(&mut self, src: &Value) -> Result<Option<String>, ScriptError> {
        self.key_of(src)
    }

    fn create(&mut self, src: &Value) -> Result<Option<String>, ScriptError> {
        self.external_result(src.clone())
    }

    fn update(&mut self, dst: &String, src: &Value) -> Result<(), ScriptError> {
        let update = self.update.clone();
        self.call(&update, vec![Value::str(dst), src.clone()])?;
        Ok(())
    }
}

fn report_value(report: SyncReport) -> Value {
    let entries = [
        ("created", report.created),
        ("updated", report.updated),
        ("existing", report.existing),
        ("unresolved", report.unresolved),
    ];
    Value::dict(
        entries
            .into_iter()
            .map(|(k, n)| (DictKey::from(k), Value::Int(n as i64)))
            .collect::<IndexMap<_, _>>(),
    )
}

/// A mode flag only counts when its callback exists.
fn mode(args: &Args, create_at: usize, update_at: usize, cb: &ScriptCounterpart<'_>) -> SyncMode {
    SyncMode::new(
        args.flag(create_at, "create") && cb.create.is_some(),
        args.flag(update_at, "update") && cb.update.is_some(),
    )
}

fn run<P>(rt: &Runtime, pass: &mut P, items: Vec<P::Source>, mode: SyncMode) -> Result<Value, ScriptError>
where
    P: SyncPass<Error = ScriptError>,
{
    let mut skipped = Vec::new();
    let result = run_sync(pass, items, mode, &mut |line| skipped.push(line));
    for line in skipped {
        rt.log(LogEntry::new(LogLevel::Debug, line))?;
    }
    result.map(report_value)
}

/// `sync_host2x(records, sync_info, create=False, update=False)`
///
/// `sync_info["x"]["create"](record) -> ref`, `sync_info["x"]["update"](ref, record)`.
fn sync_host2x(rt: &Rc<Runtime>, interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let items = args.required(0, "src_list", "sync_host2x")?;
    let info = args.required(1, "sync_info", "sync_host2x")?;
    let relation = required_entry(&info, "relation", "sync_host2x")?;
    let x = required_entry(&info, "x", "sync_host2x")?;
    let sources = items
        .iterate()?
        .iter()
        .map(|v| records::record_of(v, "sync_host2x item"))
        .collect::<Result<Vec<_>, _>>()?;
    let callbacks = ScriptCounterpart {
        interp,
        rt: rt.clone(),
        get_ref: None,
        create: entry(&x, "create")?,
        update: entry(&x, "update")?,
    };
    let mode = mode(&args, 2, 3, &callbacks);
    let mut pass = HostToExternal::new(&rt.linker, relation.expect_str("relation")?, callbacks);
    run(rt, &mut pass, sources, mode)
}

/// `sync_x2host(items, sync_info, create=False, update=False)`
///
/// `sync_info["x"]["get_ref"](item) -> ref`, `sync_info["host"]["create"](item) -> record`,
/// `sync_info["host"]["update"](record, item)`.
fn sync_x2host(rt: &Rc<Runtime>, interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let items = args.required(0, "src_list", "sync_x2host")?;
    let info = args.required(1, "sync_info", "sync_x2host")?;
    let relation = required_entry(&info, "relation", "sync_x2host")?;
    let x = required_entry(&info, "x", "sync_x2host")?;
    let host = required_entry(&info, "host", "sync_x2host")?;
    let callbacks = ScriptCounterpart {
        interp,
        rt: rt.clone(),
        get_ref: Some(required_entry(&x, "get_ref", "sync_x2host")?),
        create: entry(&host, "create")?,
        update: entry(&host, "update")?,
    };
    let mode = mode(&args, 2, 3, &callbacks);
    let mut pass: ExternalToHost<'_, Value, _> =
        ExternalToHost::new(&rt.linker, relation.expect_str("relation")?, callbacks);
    run(rt, &mut pass, items.iterate()?, mode)
}

/// `sync_external(items, relation, src_info, dst_info, create=False, update=False)`
///
/// `src_info` holds `system`, `get_ref`, `create(item) -> dst_ref` and
/// `update(dst_ref, item)`; `dst_info` holds `system`.
fn sync_external(rt: &Rc<Runtime>, interp: &mut Interpreter, args: Args) -> Result<Value, ScriptError> {
    let items = args.required(0, "src_list", "sync_external")?;
    let relation = args.required(1, "relation", "sync_external")?;
    let src_info = args.required(2, "src_info", "sync_external")?;
    let dst_info = args.required(3, "dst_info", "sync_external")?;
    let src_system = required_entry(&src_info, "system", "sync_external")?;
    let dst_system = required_entry(&dst_info, "system", "sync_external")?;
    let callbacks = ScriptCounterpart {
        interp,
        rt: rt.clone(),
        get_ref: Some(required_entry(&src_info, "get_ref", "sync_external")?),
        create: entry(&src_info, "create")?,
        update: entry(&src_info, "update")?,
    };
    let mode = mode(&args, 4, 5, &callbacks);
    let mut pass: ExternalToExternal<'_, Value, _> = ExternalToExternal::new(
        &rt.linker,
        relation.expect_str("relation")?,
        src_system.expect_str("system")?,
        dst_system.expect_str("system")?,
        callbacks,
    );
    run(rt, &mut pass, items.iterate()?, mode)
}

// ── Relation-level link helpers ──────────────────────────────────────────────

/// System name → reference (or `None`) from a script dict.
fn ref_bundle(value: &Value) -> Result<BTreeMap<String, Option<String>>, ScriptError> {
    let Value::Dict(d) = value else {
        return Err(ScriptError::type_error(format!(
            "refs must be dict, not {}",
            value.type_name()
        )));
    };
    d.borrow()
        .iter()
        .map(|(k, v)| {
            let system = k
                .as_str()
                .ok_or_else(|| ScriptError::type_error("system names must be str"))?;
            let reference = if v.is_none() {
                None
            } else {
                Some(records::reference(v)?)
            };
            Ok((system.to_string(), reference))
        })
        .collect()
}

/// `get_link(relation, {system: ref_or_None, ...})`
fn get_link(rt: &Rc<Runtime>, args: &Args) -> Result<Value, ScriptError> {
    let relation = args.required(0, "relation", "get_link")?;
    let refs = ref_bundle(&args.required(1, "refs", "get_link")?)?;
    let set = rt.linker.get_link(relation.expect_str("relation")?, &refs)?;
    Ok(LinkSetHandle::value(rt, set))
}

/// `set_link(relation, {system: ref, ...}, sync_date=None, allow_many_to_many=False)`
fn set_link(rt: &Rc<Runtime>, args: &Args) -> Result<Value, ScriptError> {
    let relation = args.required(0, "relation", "set_link")?;
    let refs = ref_bundle(&args.required(1, "refs", "set_link")?)?
        .into_iter()
        .filter_map(|(system, r)| r.map(|r| (system, r)))
        .collect();
    let link = rt.linker.set_external_link(
        relation.expect_str("relation")?,
        refs,
        records::sync_date(args.optional(2, "sync_date"))?,
        args.flag(3, "allow_many_to_many"),
    )?;
    Ok(LinkSetHandle::value(rt, LinkSet::new(vec![link])))
}

/// `search_links(relation, refs, model=None)`, resolving external references
/// toward host records.
fn search_links(rt: &Rc<Runtime>, args: &Args) -> Result<Value, ScriptError> {
    let relation = args.required(0, "relation", "search_links")?;
    let refs = records::references(&args.required(1, "refs", "search_links")?)?;
    let model = args.optional(2, "model");
    let model = model.as_ref().map(|m| m.expect_str("model")).transpose()?;
    let set = rt
        .linker
        .search_links_external(relation.expect_str("relation")?, &refs, model)?;
    Ok(LinkSetHandle::value(rt, set))
}

pub(super) fn register(rt: &Rc<Runtime>, ns: &mut Namespace) {
    let r = rt.clone();
    ns.register_fn("sync_host2x", move |interp, args| sync_host2x(&r, interp, args));
    let r = rt.clone();
    ns.register_fn("sync_x2host", move |interp, args| sync_x2host(&r, interp, args));
    let r = rt.clone();
    ns.register_fn("sync_external", move |interp, args| sync_external(&r, interp, args));
    let r = rt.clone();
    ns.register_fn("get_link", move |_, args| get_link(&r, &args));
    let r = rt.clone();
    ns.register_fn("set_link", move |_, args| set_link(&r, &args));
    let r = rt.clone();
    ns.register_fn("search_links", move |_, args| search_links(&r, &args));
}
