//! Sync Primitives.
//!
//! All three primitives share [`run_sync`]: for each source item, resolve the
//! destination counterpart through the [`Linker`]; update it if one exists
//! and updating is enabled, otherwise create it and record the new link if
//! creating is enabled, otherwise log and skip. An item that already has a
//! counterpart is never re-created, which makes every pass idempotent.
//!
//! Errors from callbacks are not swallowed: the first one aborts the rest of
//! the batch.

use std::collections::BTreeMap;
use std::fmt;

use tether_storage::RecordRef;

use crate::error::EngineError;
use crate::linker::Linker;

/// Which halves of a pass run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMode {
    pub create: bool,
    pub update: bool,
}

impl SyncMode {
    pub fn new(create: bool, update: bool) -> Self {
        SyncMode { create, update }
    }
}

/// What a pass did with each source item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    /// Resolved, but updating was disabled.
    pub existing: usize,
    /// Not resolved, and creating was disabled or produced nothing.
    pub unresolved: usize,
}

/// One direction of a sync: how to find, create, link and update a
/// destination for a source item.
pub trait SyncPass {
    type Source: fmt::Debug;
    type Dest: fmt::Display;
    type Error: From<EngineError>;

    /// Whether `src` carries a reference at all. Items without one are
    /// skipped as unresolved.
    fn keyed(&mut self, _src: &Self::Source) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn resolve(&mut self, src: &Self::Source) -> Result<Option<Self::Dest>, Self::Error>;

    fn create(&mut self, src: &Self::Source) -> Result<Option<Self::Dest>, Self::Error>;

    fn link(&mut self, src: &Self::Source, dst: &Self::Dest) -> Result<(), Self::Error>;

    fn update(&mut self, dst: &Self::Dest, src: &Self::Source) -> Result<(), Self::Error>;
}

/// The shared traversal. `log` receives one debug line per skipped item.
pub fn run_sync<P, I>(
    pass: &mut P,
    items: I,
    mode: SyncMode,
    log: &mut dyn FnMut(String),
) -> Result<SyncReport, P::Error>
where
    P: SyncPass,
    I: IntoIterator<Item = P::Source>,
{
    let mut report = SyncReport::default();
    for src in items {
        if !pass.keyed(&src)? {
            log(format!("No reference for {:?}", src));
            report.unresolved += 1;
            continue;
        }
        match pass.resolve(&src)? {
            Some(dst) if mode.update => {
                pass.update(&dst, &src)?;
                report.updated += 1;
            }
            Some(dst) => {
                log(format!("Destination record already exists: {}", dst));
                report.existing += 1;
            }
            None if mode.create => match pass.create(&src)? {
                Some(dst) => {
                    pass.link(&src, &dst)?;
                    report.created += 1;
                }
                None => {
                    log(format!("Nothing was created for {:?}", src));
                    report.unresolved += 1;
                }
            },
            None => {
                log(format!("Destination record not found for {:?}", src));
                report.unresolved += 1;
            }
        }
    }
    Ok(report)
}

/// The caller's half of a pass.
pub trait Counterpart<S, D> {
    type Error: From<EngineError>;

    /// Reference key of an external source item; `None` when the item has
    /// no reference. Only external sources are keyed.
    fn key(&mut self, _src: &S) -> Result<Option<String>, Self::Error> {
        Err(EngineError::Validation("this sync source has no key extractor".into()).into())
    }

    fn create(&mut self, src: &S) -> Result<Option<D>, Self::Error>;

    fn update(&mut self, dst: &D, src: &S) -> Result<(), Self::Error>;
}

fn required_key<S: fmt::Debug, D, C: Counterpart<S, D>>(
    callbacks: &mut C,
    src: &S,
) -> Result<String, C::Error> {
    callbacks
        .key(src)?
        .ok_or_else(|| EngineError::Validation(format!("no reference for {:?}", src)).into())
}

// ── Host → external ──────────────────────────────────────────────────────────

/// Push host records to an external system. The counterpart is the external
/// reference linked to the record.
pub struct HostToExternal<'a, C> {
    linker: &'a Linker,
    relation: String,
    callbacks: C,
}

impl<'a, C> HostToExternal<'a, C> {
    pub fn new(linker: &'a Linker, relation: &str, callbacks: C) -> Self {
        HostToExternal {
            linker,
            relation: relation.to_string(),
            callbacks,
        }
    }
}

impl<C: Counterpart<RecordRef, String>> SyncPass for HostToExternal<'_, C> {
    type Source = RecordRef;
    type Dest = String;
    type Error = C::Error;

    fn resolve(&mut self, src: &RecordRef) -> Result<Option<String>, C::Error> {
        Ok(self
            .linker
            .search_links(&self.relation, std::slice::from_ref(src), None)?
            .external()?)
    }

    fn create(&mut self, src: &RecordRef) -> Result<Option<String>, C::Error> {
        self.callbacks.create(src)
    }

    fn link(&mut self, src: &RecordRef, dst: &String) -> Result<(), C::Error> {
        self.linker.set_link(&self.relation, src, dst, None, false)?;
        Ok(())
    }

    fn update(&mut self, dst: &String, src: &RecordRef) -> Result<(), C::Error> {
        self.callbacks.update(dst, src)
    }
}

// ── External → host ──────────────────────────────────────────────────────────

/// Pull external items into host records. Items are keyed by the
/// counterpart's `key`; the counterpart is the host record linked to it.
pub struct ExternalToHost<'a, S, C> {
    linker: &'a Linker,
    relation: String,
    callbacks: C,
    _source: std::marker::PhantomData<fn(&S)>,
}

impl<'a, S, C> ExternalToHost<'a, S, C> {
    pub fn new(linker: &'a Linker, relation: &str, callbacks: C) -> Self {
        ExternalToHost {
            linker,
            relation: relation.to_string(),
            callbacks,
            _source: std::marker::PhantomData,
        }
    }
}

impl<S: fmt::Debug, C: Counterpart<S, RecordRef>> SyncPass for ExternalToHost<'_, S, C> {
    type Source = S;
    type Dest = RecordRef;
    type Error = C::Error;

    fn keyed(&mut self, src: &S) -> Result<bool, C::Error> {
        Ok(self.callbacks.key(src)?.is_some())
    }

    fn resolve(&mut self, src: &S) -> Result<Option<RecordRef>, C::Error> {
        let key = required_key(&mut self.callbacks, src)?;
        Ok(self
            .linker
            .search_links_external(&self.relation, &[key], None)?
            .record()?)
    }

    fn create(&mut self, src: &S) -> Result<Option<RecordRef>, C::Error> {
        self.callbacks.create(src)
    }

    fn link(&mut self, src: &S, dst: &RecordRef) -> Result<(), C::Error> {
        let key = required_key(&mut self.callbacks, src)?;
        self.linker.set_link(&self.relation, dst, &key, None, false)?;
        Ok(())
    }

    fn update(&mut self, dst: &RecordRef, src: &S) -> Result<(), C::Error> {
        self.callbacks.update(dst, src)
    }
}

// ── External → external ──────────────────────────────────────────────────────

/// Sync between two external systems through three-way links. A source item
/// resolves only when exactly one destination reference is linked to it;
/// ambiguous matches count as unresolved.
pub struct ExternalToExternal<'a, S, C> {
    linker: &'a Linker,
    relation: String,
    src_system: String,
    dst_system: String,
    callbacks: C,
    _source: std::marker::PhantomData<fn(&S)>,
}

impl<'a, S, C> ExternalToExternal<'a, S, C> {
    pub fn new(
        linker: &'a Linker,
        relation: &str,
        src_system: &str,
        dst_system: &str,
        callbacks: C,
    ) -> Self {
        ExternalToExternal {
            linker,
            relation: relation.to_string(),
            src_system: src_system.to_string(),
            dst_system: dst_system.to_string(),
            callbacks,
            _source: std::marker::PhantomData,
        }
    }
}

impl<S: fmt::Debug, C: Counterpart<S, String>> SyncPass for ExternalToExternal<'_, S, C> {
    type Source = S;
    type Dest = String;
    type Error = C::Error;

    fn keyed(&mut self, src: &S) -> Result<bool, C::Error> {
        Ok(self.callbacks.key(src)?.is_some())
    }

    fn resolve(&mut self, src: &S) -> Result<Option<String>, C::Error> {
        let key = required_key(&mut self.callbacks, src)?;
        let bundle = BTreeMap::from([
            (self.src_system.clone(), Some(key)),
            (self.dst_system.clone(), None),
        ]);
        let mut matched = self
            .linker
            .get_link(&self.relation, &bundle)?
            .get(&self.dst_system);
        Ok(if matched.len() == 1 { matched.pop() } else { None })
    }

    fn create(&mut self, src: &S) -> Result<Option<String>, C::Error> {
        self.callbacks.create(src)
    }

    fn link(&mut self, src: &S, dst: &String) -> Result<(), C::Error> {
        let key = required_key(&mut self.callbacks, src)?;
        let refs = BTreeMap::from([
            (self.src_system.clone(), key),
            (self.dst_system.clone(), dst.clone()),
        ]);
        self.linker
            .set_external_link(&self.relation, refs, None, false)?;
        Ok(())
    }

    fn update(&mut self, dst: &String, src: &S) -> Result<(), C::Error> {
        self.callbacks.update(dst, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_storage::{install_schema, MemoryStore};

    fn linker() -> Linker {
        let store = MemoryStore::new();
        install_schema(&store).unwrap();
        Linker::new(Arc::new(store), 1)
    }

    /// External contacts keyed by their id; creating one allocates the next
    /// host partner id.
    #[derive(Default)]
    struct Contacts {
        next_id: u64,
        created: Vec<String>,
        updated: Vec<RecordRef>,
    }

    impl Counterpart<(&'static str, &'static str), RecordRef> for Contacts {
        type Error = EngineError;

        fn key(&mut self, src: &(&'static str, &'static str)) -> Result<Option<String>, EngineError> {
            Ok(Some(src.0.to_string()).filter(|k| !k.is_empty()))
        }

        fn create(&mut self, src: &(&'static str, &'static str)) -> Result<Option<RecordRef>, EngineError> {
            self.next_id += 1;
            self.created.push(src.1.to_string());
            Ok(Some(RecordRef::new("res.partner", self.next_id)))
        }

        fn update(&mut self, dst: &RecordRef, _src: &(&'static str, &'static str)) -> Result<(), EngineError> {
            self.updated.push(dst.clone());
            Ok(())
        }
    }

    #[test]
    fn external_to_host_creates_once_per_key() {
        let l = linker();
        let items = [("c1", "Ann"), ("c2", "Bob"), ("c1", "Ann again")];
        let mut pass = ExternalToHost::new(&l, "contacts", Contacts::default());
        let mut skipped = Vec::new();
        let first = run_sync(&mut pass, items, SyncMode::new(true, false), &mut |m| {
            skipped.push(m)
        })
        .unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.existing, 1);

        let second = run_sync(&mut pass, items, SyncMode::new(true, false), &mut |_| {}).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.existing, 3);
        assert_eq!(pass.callbacks.created, vec!["Ann", "Bob"]);
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn items_without_a_reference_are_skipped() {
        let l = linker();
        let mut pass = ExternalToHost::new(&l, "contacts", Contacts::default());
        let mut skipped = Vec::new();
        let report = run_sync(
            &mut pass,
            [("c1", "Ann"), ("", "Nobody")],
            SyncMode::new(true, true),
            &mut |m| skipped.push(m),
        )
        .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(pass.callbacks.created, vec!["Ann"]);
        assert_eq!(skipped, vec!["No reference for (\"\", \"Nobody\")".to_string()]);
    }

    #[test]
    fn update_only_pass_touches_resolved_items() {
        let l = linker();
        l.set_link("contacts", &RecordRef::new("res.partner", 5), "c1", None, false)
            .unwrap();
        let mut pass = ExternalToHost::new(&l, "contacts", Contacts::default());
        let report = run_sync(
            &mut pass,
            [("c1", "Ann"), ("c9", "Zed")],
            SyncMode::new(false, true),
            &mut |_| {},
        )
        .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(pass.callbacks.updated, vec![RecordRef::new("res.partner", 5)]);
    }

    struct Issues;

    impl Counterpart<&'static str, String> for Issues {
        type Error = EngineError;

        fn key(&mut self, src: &&'static str) -> Result<Option<String>, EngineError> {
            Ok(Some(src.to_string()))
        }

        fn create(&mut self, src: &&'static str) -> Result<Option<String>, EngineError> {
            if *src == "boom" {
                return Err(EngineError::User("tracker is down".into()));
            }
            Ok(Some(format!("card-{}", src)))
        }

        fn update(&mut self, _dst: &String, _src: &&'static str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn external_to_external_links_both_systems() {
        let l = linker();
        let mut pass = ExternalToExternal::new(&l, "issue", "github", "trello", Issues);
        let report = run_sync(&mut pass, ["1", "2"], SyncMode::new(true, true), &mut |_| {}).unwrap();
        assert_eq!(report.created, 2);
        let again = run_sync(&mut pass, ["1"], SyncMode::new(true, true), &mut |_| {}).unwrap();
        assert_eq!(again.updated, 1);
        let bundle = BTreeMap::from([("github".to_string(), Some("2".to_string()))]);
        assert_eq!(l.get_link("issue", &bundle).unwrap().get("trello"), vec!["card-2"]);
    }

    #[test]
    fn a_failing_callback_aborts_the_batch() {
        let l = linker();
        let mut pass = ExternalToExternal::new(&l, "issue", "github", "trello", Issues);
        let err = run_sync(
            &mut pass,
            ["1", "boom", "3"],
            SyncMode::new(true, false),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::User(_)));
        let third = BTreeMap::from([("github".to_string(), Some("3".to_string()))]);
        assert!(l.get_link("issue", &third).unwrap().is_empty());
    }

    struct Pusher {
        pushed: usize,
    }

    impl Counterpart<RecordRef, String> for Pusher {
        type Error = EngineError;

        fn create(&mut self, src: &RecordRef) -> Result<Option<String>, EngineError> {
            self.pushed += 1;
            Ok(Some(format!("ext-{}", src.id)))
        }

        fn update(&mut self, _dst: &String, _src: &RecordRef) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn host_to_external_records_the_created_reference() {
        let l = linker();
        let records = vec![RecordRef::new("res.partner", 1), RecordRef::new("res.partner", 2)];
        let mut pass = HostToExternal::new(&l, "push", Pusher { pushed: 0 });
        run_sync(&mut pass, records.clone(), SyncMode::new(true, false), &mut |_| {}).unwrap();
        run_sync(&mut pass, records.clone(), SyncMode::new(true, false), &mut |_| {}).unwrap();
        assert_eq!(pass.callbacks.pushed, 2);
        let linked = l.search_links("push", &records[1..], None).unwrap();
        assert_eq!(linked.external().unwrap().as_deref(), Some("ext-2"));
    }
}
