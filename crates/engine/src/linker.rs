//! Record Linker.
//!
//! Owns the durable correspondence between host records and references in
//! external systems. A [`Link`] carries an optional host record and a map of
//! system name to reference; the plain host↔external case uses the
//! [`EXTERNAL`] system name, three-way links name each system explicitly.
//!
//! ## Multiplicity
//!
//! Without `allow_many_to_many` a relation is one-to-one: a new link that
//! overlaps existing ones (same host record, or any shared system/reference
//! pair) updates the single overlapping link in place, and fails with
//! [`EngineError::Constraint`] when it overlaps several. With
//! `allow_many_to_many` a new link is appended unless the exact tuple already
//! exists, in which case only its `sync_date` is refreshed.

use std::collections::BTreeMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::debug;

use tether_storage::{Link, Query, RecordId, RecordRef, RecordStore, StorageError, StoreExt};

use crate::clock;
use crate::error::EngineError;

/// System name of the external side of a host↔external link.
pub const EXTERNAL: &str = "external";

pub struct Linker {
    store: Arc<dyn RecordStore>,
    project_id: RecordId,
}

impl Linker {
    pub fn new(store: Arc<dyn RecordStore>, project_id: RecordId) -> Self {
        Linker { store, project_id }
    }

    /// Link `record` to `external` under `relation`.
    pub fn set_link(
        &self,
        relation: &str,
        record: &RecordRef,
        external: &str,
        sync_date: Option<OffsetDateTime>,
        allow_many_to_many: bool,
    ) -> Result<Link, EngineError> {
        let refs = BTreeMap::from([(EXTERNAL.to_string(), external.to_string())]);
        self.upsert(relation, Some(record), refs, sync_date, allow_many_to_many)
    }

    /// Link references of several external systems to each other.
    pub fn set_external_link(
        &self,
        relation: &str,
        refs: BTreeMap<String, String>,
        sync_date: Option<OffsetDateTime>,
        allow_many_to_many: bool,
    ) -> Result<Link, EngineError> {
        if refs.is_empty() {
            return Err(EngineError::Validation(format!(
                "set_link on '{}' needs at least one reference",
                relation
            )));
        }
        self.upsert(relation, None, refs, sync_date, allow_many_to_many)
    }

    fn upsert(
        &self,
        relation: &str,
        record: Option<&RecordRef>,
        refs: BTreeMap<String, String>,
        sync_date: Option<OffsetDateTime>,
        allow_many_to_many: bool,
    ) -> Result<Link, EngineError> {
        let sync_date = clock::rfc3339(sync_date.unwrap_or_else(OffsetDateTime::now_utc));
        let existing = self.links(relation)?;

        if allow_many_to_many {
            if let Some(mut same) = existing
                .into_iter()
                .find(|l| l.record.as_ref() == record && l.refs == refs)
            {
                same.sync_date = sync_date;
                self.store.save(&same)?;
                return Ok(same);
            }
            return self.create(relation, record, refs, sync_date);
        }

        let mut overlapping: Vec<Link> = existing
            .into_iter()
            .filter(|l| overlaps(l, record, &refs))
            .collect();
        match overlapping.len() {
            0 => self.create(relation, record, refs, sync_date),
            1 => {
                let mut link = overlapping.remove(0);
                if let Some(record) = record {
                    link.record = Some(record.clone());
                }
                link.refs.extend(refs);
                link.sync_date = sync_date;
                self.store.save(&link).map_err(constraint)?;
                debug!(relation, link_id = link.id, "link updated");
                Ok(link)
            }
            n => Err(EngineError::Constraint(format!(
                "relation '{}' already has {} links overlapping {}; \
                 pass allow_many_to_many to add another",
                relation,
                n,
                describe(record, &refs)
            ))),
        }
    }

    fn create(
        &self,
        relation: &str,
        record: Option<&RecordRef>,
        refs: BTreeMap<String, String>,
        sync_date: String,
    ) -> Result<Link, EngineError> {
        let link = self
            .store
            .add(Link {
                id: 0,
                project_id: self.project_id,
                relation: relation.to_string(),
                record: record.cloned(),
                refs,
                sync_date,
            })
            .map_err(constraint)?;
        debug!(relation, link_id = link.id, "link created");
        Ok(link)
    }

    fn links(&self, relation: &str) -> Result<Vec<Link>, EngineError> {
        Ok(self.store.find(
            &Query::new()
                .eq("project_id", self.project_id)
                .eq("relation", relation),
        )?)
    }

    /// Links of `records` under `relation`, optionally narrowed to the given
    /// external references.
    pub fn search_links(
        &self,
        relation: &str,
        records: &[RecordRef],
        refs: Option<&[String]>,
    ) -> Result<LinkSet, EngineError> {
        let mut query = Query::new()
            .eq("project_id", self.project_id)
            .eq("relation", relation)
            .is_in(
                "record",
                records
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(StorageError::from)?,
            );
        if let Some(refs) = refs {
            query = query.is_in(&format!("refs.{}", EXTERNAL), refs.iter().map(String::as_str));
        }
        Ok(LinkSet::new(self.store.find(&query)?))
    }

    /// Links whose external reference is one of `refs`, resolving toward
    /// host records. `model` keeps only host records of that model.
    pub fn search_links_external(
        &self,
        relation: &str,
        refs: &[String],
        model: Option<&str>,
    ) -> Result<LinkSet, EngineError> {
        let query = Query::new()
            .eq("project_id", self.project_id)
            .eq("relation", relation)
            .is_in(&format!("refs.{}", EXTERNAL), refs.iter().map(String::as_str));
        let links = self
            .store
            .find::<Link>(&query)?
            .into_iter()
            .filter(|l| match model {
                Some(m) => l.record.as_ref().is_some_and(|r| r.model == m),
                None => true,
            })
            .collect();
        Ok(LinkSet::new(links))
    }

    /// Links matching every non-null entry of `bundle` (system → reference).
    /// A bundle without any reference matches nothing.
    pub fn get_link(
        &self,
        relation: &str,
        bundle: &BTreeMap<String, Option<String>>,
    ) -> Result<LinkSet, EngineError> {
        let given: Vec<(&String, &String)> = bundle
            .iter()
            .filter_map(|(system, r)| r.as_ref().map(|r| (system, r)))
            .collect();
        if given.is_empty() {
            return Ok(LinkSet::default());
        }
        let mut query = Query::new()
            .eq("project_id", self.project_id)
            .eq("relation", relation);
        for (system, reference) in given {
            query = query.eq(&format!("refs.{}", system), reference.as_str());
        }
        Ok(LinkSet::new(self.store.find(&query)?))
    }
}

fn overlaps(link: &Link, record: Option<&RecordRef>, refs: &BTreeMap<String, String>) -> bool {
    if record.is_some() && link.record.as_ref() == record {
        return true;
    }
    refs.iter()
        .any(|(system, reference)| link.refs.get(system) == Some(reference))
}

fn describe(record: Option<&RecordRef>, refs: &BTreeMap<String, String>) -> String {
    let refs = refs
        .iter()
        .map(|(s, r)| format!("{}={}", s, r))
        .collect::<Vec<_>>()
        .join(", ");
    match record {
        Some(r) => format!("{} <-> {{{}}}", r, refs),
        None => format!("{{{}}}", refs),
    }
}

fn constraint(err: StorageError) -> EngineError {
    match err {
        StorageError::UniqueViolation { table, fields } => {
            EngineError::Constraint(format!("duplicate link in {} on ({})", table, fields))
        }
        other => other.into(),
    }
}

// ── Link sets ────────────────────────────────────────────────────────────────

/// The result of a link search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSet {
    links: Vec<Link>,
}

impl LinkSet {
    pub fn new(links: Vec<Link>) -> Self {
        LinkSet { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Distinct references of `system`, in link order.
    pub fn get(&self, system: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for reference in self.links.iter().filter_map(|l| l.refs.get(system)) {
            if !out.contains(reference) {
                out.push(reference.clone());
            }
        }
        out
    }

    pub fn externals(&self) -> Vec<String> {
        self.get(EXTERNAL)
    }

    /// The single external reference, `None` when there is none.
    pub fn external(&self) -> Result<Option<String>, EngineError> {
        single(self.externals(), "external references")
    }

    /// Distinct host records, in link order.
    pub fn records(&self) -> Vec<RecordRef> {
        let mut out: Vec<RecordRef> = Vec::new();
        for record in self.links.iter().filter_map(|l| l.record.as_ref()) {
            if !out.contains(record) {
                out.push(record.clone());
            }
        }
        out
    }

    pub fn record(&self) -> Result<Option<RecordRef>, EngineError> {
        single(self.records(), "host records")
    }
}

impl IntoIterator for LinkSet {
    type Item = Link;
    type IntoIter = std::vec::IntoIter<Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_iter()
    }
}

fn single<T: std::fmt::Debug>(mut items: Vec<T>, what: &str) -> Result<Option<T>, EngineError> {
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        _ => Err(EngineError::Constraint(format!(
            "expected a single link, found {} {}: {:?}",
            items.len(),
            what,
            items
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{install_schema, MemoryStore};

    fn linker() -> Linker {
        let store = MemoryStore::new();
        install_schema(&store).unwrap();
        Linker::new(Arc::new(store), 1)
    }

    fn partner(id: RecordId) -> RecordRef {
        RecordRef::new("res.partner", id)
    }

    #[test]
    fn set_link_then_search_returns_the_reference() {
        let l = linker();
        l.set_link("github_issue", &partner(42), "gh#123", None, false)
            .unwrap();
        let found = l.search_links("github_issue", &[partner(42)], None).unwrap();
        assert_eq!(found.externals(), vec!["gh#123".to_string()]);
        assert_eq!(found.external().unwrap().as_deref(), Some("gh#123"));
    }

    #[test]
    fn repeated_set_link_does_not_duplicate() {
        let l = linker();
        let a = l
            .set_link("github_issue", &partner(42), "gh#123", None, false)
            .unwrap();
        let b = l
            .set_link("github_issue", &partner(42), "gh#123", None, false)
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(l.links("github_issue").unwrap().len(), 1);
    }

    #[test]
    fn search_from_the_external_side_returns_records() {
        let l = linker();
        l.set_link("github_issue", &partner(42), "gh#123", None, false)
            .unwrap();
        let found = l
            .search_links_external("github_issue", &["gh#123".to_string()], None)
            .unwrap();
        assert_eq!(found.records(), vec![partner(42)]);
        let other_model = l
            .search_links_external("github_issue", &["gh#123".to_string()], Some("res.users"))
            .unwrap();
        assert!(other_model.is_empty());
    }

    #[test]
    fn relinking_a_record_updates_in_place() {
        let l = linker();
        let first = l.set_link("r", &partner(1), "a", None, false).unwrap();
        let second = l.set_link("r", &partner(1), "b", None, false).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.refs[EXTERNAL], "b");
    }

    #[test]
    fn ambiguous_overlap_is_a_constraint_error() {
        let l = linker();
        l.set_link("r", &partner(1), "a", None, false).unwrap();
        l.set_link("r", &partner(2), "b", None, false).unwrap();
        let err = l.set_link("r", &partner(1), "b", None, false).unwrap_err();
        assert!(matches!(err, EngineError::Constraint(_)));
    }

    #[test]
    fn many_to_many_appends_and_refreshes_exact_matches() {
        let l = linker();
        l.set_link("tags", &partner(1), "a", None, true).unwrap();
        l.set_link("tags", &partner(1), "b", None, true).unwrap();
        l.set_link("tags", &partner(2), "a", None, true).unwrap();
        l.set_link("tags", &partner(1), "a", None, true).unwrap();
        assert_eq!(l.links("tags").unwrap().len(), 3);
        let of_one = l.search_links("tags", &[partner(1)], None).unwrap();
        assert_eq!(of_one.externals(), vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(of_one.external(), Err(EngineError::Constraint(_))));
    }

    #[test]
    fn relations_are_independent() {
        let l = linker();
        l.set_link("one", &partner(1), "x", None, false).unwrap();
        l.set_link("two", &partner(1), "y", None, false).unwrap();
        let one = l.search_links("one", &[partner(1)], None).unwrap();
        assert_eq!(one.externals(), vec!["x".to_string()]);
    }

    #[test]
    fn search_can_be_narrowed_by_refs() {
        let l = linker();
        l.set_link("tags", &partner(1), "a", None, true).unwrap();
        l.set_link("tags", &partner(1), "b", None, true).unwrap();
        let narrowed = l
            .search_links("tags", &[partner(1)], Some(&["b".to_string()]))
            .unwrap();
        assert_eq!(narrowed.externals(), vec!["b".to_string()]);
    }

    #[test]
    fn three_way_links_resolve_by_any_known_reference() {
        let l = linker();
        l.set_external_link(
            "issue",
            BTreeMap::from([
                ("github".to_string(), "gh#1".to_string()),
                ("trello".to_string(), "card-9".to_string()),
            ]),
            None,
            false,
        )
        .unwrap();
        let bundle = BTreeMap::from([
            ("github".to_string(), Some("gh#1".to_string())),
            ("trello".to_string(), None),
        ]);
        let found = l.get_link("issue", &bundle).unwrap();
        assert_eq!(found.get("trello"), vec!["card-9".to_string()]);

        let nothing = BTreeMap::from([("github".to_string(), None)]);
        assert!(l.get_link("issue", &nothing).unwrap().is_empty());
    }

    #[test]
    fn external_link_is_extended_by_a_later_system() {
        let l = linker();
        let first = l
            .set_external_link(
                "issue",
                BTreeMap::from([("github".to_string(), "gh#1".to_string())]),
                None,
                false,
            )
            .unwrap();
        let second = l
            .set_external_link(
                "issue",
                BTreeMap::from([
                    ("github".to_string(), "gh#1".to_string()),
                    ("trello".to_string(), "card-9".to_string()),
                ]),
                None,
                false,
            )
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.refs.len(), 2);
    }

    #[test]
    fn missing_links_are_empty_not_errors() {
        let l = linker();
        let none = l.search_links("r", &[partner(7)], None).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.external().unwrap(), None);
        assert_eq!(none.record().unwrap(), None);
    }
}
