use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::tempdir;

use srm_io::{SnapshotFetcher, SqliteStore};
use srm_recon::model::{Fields, RecordFilter, RecordUpdate, RowOutcome};
use srm_recon::{
    promote_all, reconcile_with, ColumnMapper, CurationBase, MemoryStore, PromotionConfig, Promoter,
    RecordStore, ReconcileOptions, ReconcileTarget, SourceConfig, Status,
};

const CONFIG: &str = r#"
name = "shil"
table = "Branches"
fields = ["name", "phone_numbers", "address"]
list_fields = ["phone_numbers"]
required = ["name"]

[snapshot]
file = "shil.csv"
id_column = "code"

[columns]
name = "Branch name"
phone_numbers = "Phones"
address = "Address"
"#;

fn run(store: &mut SqliteStore, dir: &Path) -> srm_recon::model::ReconcileReport {
    let config = SourceConfig::from_toml(CONFIG).unwrap();
    let mut fetcher = SnapshotFetcher::from_config(&config, dir);
    let mapper = ColumnMapper::from_config(&config);
    let target = ReconcileTarget { table: &config.table, source: &config.name, fields: &config.fields };
    let options = ReconcileOptions { manage_status: config.manage_status, typecast: config.typecast };
    reconcile_with(store, &target, &mut fetcher, &mapper, options).unwrap()
}

fn dump(store: &SqliteStore, table: &str) -> String {
    serde_json::to_string(&store.list_records(table, &RecordFilter::all()).unwrap()).unwrap()
}

#[test]
fn snapshot_reconcile_lifecycle() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("production.db");
    let snapshot = dir.path().join("shil.csv");

    fs::write(
        &snapshot,
        "code,Branch name,Phones,Address\n\
         1,Haifa,\"04-1\n04-2\",Herzl 1\n\
         2,Acre,,\n\
         3,,08-1,Nameless\n",
    )
    .unwrap();
    let mut store = SqliteStore::open(&db).unwrap();
    let report = run(&mut store, dir.path());
    assert_eq!(report.count(RowOutcome::Created), 2);
    assert_eq!(report.count(RowOutcome::Skipped), 1);
    assert_eq!(report.skipped[0].id, "shil:3");

    let haifa = store.get("Branches", "shil:1").unwrap().unwrap();
    assert_eq!(haifa.fields["phone_numbers"], json!(["04-1", "04-2"]));
    assert_eq!(haifa.status, Status::Active);
    assert_eq!(haifa.source, "shil");

    // idempotent
    let before = dump(&store, "Branches");
    run(&mut store, dir.path());
    assert_eq!(dump(&store, "Branches"), before);

    // Acre disappears, then comes back; its key never changes
    let acre_key = store.get("Branches", "shil:2").unwrap().unwrap().internal_key;
    fs::write(&snapshot, "code,Branch name,Phones,Address\n1,Haifa,04-1,Herzl 1\n").unwrap();
    drop(store);
    let mut store = SqliteStore::open(&db).unwrap();
    let report = run(&mut store, dir.path());
    assert_eq!(report.count(RowOutcome::Deactivated), 1);
    let acre = store.get("Branches", "shil:2").unwrap().unwrap();
    assert_eq!(acre.status, Status::Inactive);
    assert_eq!(acre.field_str("name"), Some("Acre"));

    fs::write(&snapshot, "code,Branch name,Phones,Address\n1,Haifa,04-1,Herzl 1\n2,Acre,,\n").unwrap();
    let report = run(&mut store, dir.path());
    assert_eq!(report.count(RowOutcome::Reactivated), 1);
    let acre = store.get("Branches", "shil:2").unwrap().unwrap();
    assert_eq!(acre.status, Status::Active);
    assert_eq!(acre.internal_key, acre_key);
    assert_eq!(store.list_records("Branches", &RecordFilter::all()).unwrap().len(), 2);
}

#[test]
fn missing_snapshot_writes_nothing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("shil.csv"), "code,Branch name\n1,Haifa\n").unwrap();
    let mut store = SqliteStore::open_in_memory().unwrap();
    run(&mut store, dir.path());
    let before = dump(&store, "Branches");

    fs::remove_file(dir.path().join("shil.csv")).unwrap();
    let config = SourceConfig::from_toml(CONFIG).unwrap();
    let mut fetcher = SnapshotFetcher::from_config(&config, dir.path());
    let target = ReconcileTarget { table: &config.table, source: &config.name, fields: &config.fields };
    let err = reconcile_with(
        &mut store,
        &target,
        &mut fetcher,
        &ColumnMapper::from_config(&config),
        ReconcileOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, srm_recon::ReconError::Fetch { .. }));
    assert_eq!(dump(&store, "Branches"), before);
}

fn row(source: &str, id: &str, fields: serde_json::Value) -> RecordUpdate {
    RecordUpdate {
        id: id.into(),
        source: Some(source.into()),
        status: Some(Status::Active),
        fields: serde_json::from_value::<Fields>(fields).unwrap(),
    }
}

fn key(store: &SqliteStore, table: &str, id: &str) -> String {
    store.get(table, id).unwrap().unwrap().internal_key
}

fn promotion_config() -> PromotionConfig {
    let mut config = PromotionConfig::default();
    config.tables.location = None;
    config
}

#[test]
fn promotion_between_sqlite_bases() {
    let dir = tempdir().unwrap();
    let mut curation = SqliteStore::open(&dir.path().join("entities.db")).unwrap();
    let mut production = SqliteStore::open(&dir.path().join("production.db")).unwrap();
    let org = |id: &str, fields| row("entities", id, fields);

    curation
        .upsert(
            "Organizations",
            vec![org("org:1", json!({"name": "Keep"})), org("org:2", json!({"name": "Drop", "decision": "Rejected"}))],
            true,
        )
        .unwrap();
    let keep = key(&curation, "Organizations", "org:1");
    let rejected = key(&curation, "Organizations", "org:2");
    curation
        .upsert(
            "Branches",
            vec![
                org("br:1", json!({"name": "Kept branch", "organization": [keep]})),
                org("br:2", json!({"name": "Orphan", "organization": [rejected]})),
            ],
            true,
        )
        .unwrap();
    let kept_branch = key(&curation, "Branches", "br:1");
    let orphan = key(&curation, "Branches", "br:2");
    curation
        .upsert(
            "Services",
            vec![
                org("svc:1", json!({"name": "Meals", "branches": [kept_branch]})),
                org("svc:2", json!({"name": "Orphan service", "branches": [orphan]})),
                org("svc:3", json!({"name": "Rejected parent", "organizations": [rejected]})),
                org("svc:4", json!({"name": "Mixed", "organizations": [rejected], "branches": [kept_branch]})),
            ],
            true,
        )
        .unwrap();

    let config = promotion_config();
    let report = Promoter::new(&mut production, &config)
        .promote("entities", &mut curation, "entities", &BTreeSet::new())
        .unwrap();

    assert_eq!(report.admitted_org_ids, ["org:1".to_string()].into_iter().collect());
    let prod_org = key(&production, "Organizations", "org:1");
    let branch = production.get("Branches", "br:1").unwrap().unwrap();
    assert_eq!(branch.fields["organization"], json!([prod_org]));
    assert!(production.get("Branches", "br:2").unwrap().is_none());
    assert_eq!(curation.get("Branches", "br:1").unwrap().unwrap().field_str("decision"), Some("New"));

    // services whose every reference was dropped cascade out
    let meals = production.get("Services", "svc:1").unwrap().unwrap();
    assert_eq!(meals.fields["branches"], json!([branch.internal_key]));
    assert!(production.get("Services", "svc:2").unwrap().is_none());
    assert!(production.get("Services", "svc:3").unwrap().is_none());
    let mixed = production.get("Services", "svc:4").unwrap().unwrap();
    assert_eq!(mixed.fields["organizations"], json!([]));
    assert_eq!(mixed.fields["branches"], json!([branch.internal_key]));

    let dropped: BTreeSet<&str> = report.kinds[2].dropped.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(dropped, ["svc:2", "svc:3"].into_iter().collect());
}

#[test]
fn sqlite_bases_promote_in_priority_order() {
    let dir = tempdir().unwrap();
    let mut entities = SqliteStore::open(&dir.path().join("entities.db")).unwrap();
    let mut guidestar = SqliteStore::open(&dir.path().join("guidestar.db")).unwrap();
    let mut production = SqliteStore::open(&dir.path().join("production.db")).unwrap();

    entities
        .upsert("Organizations", vec![row("entities", "org:shared", json!({"name": "Shared (curated)"}))], true)
        .unwrap();
    guidestar
        .upsert(
            "Organizations",
            vec![
                row("guidestar", "org:shared", json!({"name": "Shared (guidestar)"})),
                row("guidestar", "org:gs", json!({"name": "Guidestar only"})),
            ],
            true,
        )
        .unwrap();
    let shared = key(&guidestar, "Organizations", "org:shared");
    let own = key(&guidestar, "Organizations", "org:gs");
    guidestar
        .upsert(
            "Branches",
            vec![
                row("guidestar", "gs-br:1", json!({"name": "Main", "organization": [shared]})),
                row("guidestar", "gs-br:2", json!({"name": "Own", "organization": [own]})),
            ],
            true,
        )
        .unwrap();

    let config = promotion_config();
    let mut bases = vec![
        CurationBase { name: "entities".into(), source_tag: "entities".into(), store: &mut entities },
        CurationBase { name: "guidestar".into(), source_tag: "guidestar".into(), store: &mut guidestar },
    ];
    let reports = promote_all(&mut production, &config, &mut bases).unwrap();

    assert!(reports[0].admitted_org_ids.contains("org:shared"));
    assert!(!reports[1].admitted_org_ids.contains("org:shared"));
    assert_eq!(reports[1].kinds[0].ignored, 1);

    let shared = production.get("Organizations", "org:shared").unwrap().unwrap();
    assert_eq!(shared.source, "entities");
    assert_eq!(shared.field_str("name"), Some("Shared (curated)"));
    assert_eq!(production.get("Organizations", "org:gs").unwrap().unwrap().source, "guidestar");
    assert!(production.get("Branches", "gs-br:1").unwrap().is_none());
    assert!(production.get("Branches", "gs-br:2").unwrap().is_some());
}

#[test]
fn sqlite_and_memory_stores_agree() {
    let batches = vec![
        vec![
            row("a", "1", json!({"name": "One", "urls": ["https://one.org"]})),
            row("a", "2", json!({"name": "Two"})),
        ],
        vec![
            RecordUpdate { status: Some(Status::Inactive), ..row("b", "1", json!({"phone": 42})) },
            RecordUpdate::fields_only("3", serde_json::from_value(json!({"name": "Three"})).unwrap()),
        ],
    ];

    let mut sqlite = SqliteStore::open_in_memory().unwrap();
    let mut memory = MemoryStore::new();
    for batch in batches {
        let a = sqlite.upsert("Organizations", batch.clone(), true).unwrap();
        let b = memory.upsert("Organizations", batch, true).unwrap();
        assert_eq!((a.created, a.updated), (b.created, b.updated));
    }

    // a failing batch leaves both untouched
    let bad = vec![row("a", "4", json!({"name": "Four"})), row("a", "1", json!({"name": ["not", "a", "string"]}))];
    assert!(sqlite.upsert("Organizations", bad.clone(), false).is_err());
    assert!(memory.upsert("Organizations", bad, false).is_err());

    let all = RecordFilter::all();
    assert_eq!(
        sqlite.list_records("Organizations", &all).unwrap(),
        memory.list_records("Organizations", &all).unwrap()
    );
}
