use std::collections::BTreeMap;

use tether_storage::{
    install_schema, Link, MemoryStore, Project, Query, RecordRef, RecordStore, Setting,
    SettingKind, StorageError, StoreExt,
};

fn store() -> MemoryStore {
    let store = MemoryStore::new();
    install_schema(&store).unwrap();
    store
}

#[test]
fn add_assigns_id_and_save_writes_back() {
    let s = store();
    let mut project = s
        .add(Project {
            name: "Telegram".into(),
            ..Project::default()
        })
        .unwrap();
    assert_eq!(project.id, 1);
    project.common_code = "x = 1".into();
    s.save(&project).unwrap();
    let loaded: Project = s.get(1).unwrap();
    assert_eq!(loaded, project);
}

#[test]
fn settings_are_unique_per_project_and_table() {
    let s = store();
    let param = Setting {
        project_id: 1,
        key: "TOKEN".into(),
        ..Setting::default()
    };
    s.insert(SettingKind::Param.table(), &param).unwrap();
    s.insert(SettingKind::Secret.table(), &param).unwrap();
    assert!(matches!(
        s.insert(SettingKind::Param.table(), &param),
        Err(StorageError::UniqueViolation { .. })
    ));
    let found: Vec<Setting> = s
        .fetch_all(
            SettingKind::Param.table(),
            &Query::new().eq("project_id", 1),
        )
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, "TOKEN");
}

#[test]
fn links_search_by_record_and_external_ref() {
    let s = store();
    let link = Link {
        project_id: 1,
        relation: "github_issue".into(),
        record: Some(RecordRef::new("res.partner", 42)),
        refs: BTreeMap::from([("external".to_string(), "gh#123".to_string())]),
        ..Link::default()
    };
    s.add(link.clone()).unwrap();
    let by_ref: Vec<Link> = s
        .find(&Query::new().eq("relation", "github_issue").eq("refs.external", "gh#123"))
        .unwrap();
    assert_eq!(by_ref.len(), 1);
    assert_eq!(by_ref[0].record, Some(RecordRef::new("res.partner", 42)));
    assert!(s.add(link).is_err());
}

#[test]
fn find_one_and_count() {
    let s = store();
    for name in ["a", "b"] {
        s.add(Project {
            name: name.into(),
            ..Project::default()
        })
        .unwrap();
    }
    assert_eq!(s.count::<Project>(&Query::new()).unwrap(), 2);
    let b = s
        .find_one::<Project>(&Query::new().eq("name", "b"))
        .unwrap()
        .unwrap();
    assert_eq!(b.id, 2);
    assert!(s
        .find_one::<Project>(&Query::new().eq("name", "z"))
        .unwrap()
        .is_none());
    assert!(s.exists("sync_project", 2).unwrap());
}
