//! End-to-end behaviour of the backup engine through its public surface

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chainback::backup::{BackupEngine, Trigger};
use chainback::config::{BackupFrequency, EnginePaths, Settings};
use chainback::database::OpaqueFile;
use chainback::models::BackupKind;
use tempfile::TempDir;
use walkdir::WalkDir;

fn open_engine(base: &Path) -> BackupEngine {
    let paths = EnginePaths::with_base_dir(base.to_path_buf());
    let mut settings = Settings::default();
    settings.backup.frequency = BackupFrequency::PerSession;
    BackupEngine::new(paths, settings, Arc::new(OpaqueFile)).unwrap()
}

fn setup() -> (TempDir, BackupEngine) {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path());
    fs::create_dir_all(engine.paths().attachments_dir()).unwrap();
    fs::write(engine.paths().database_file(), "rows: 1").unwrap();
    write_attachment(&engine, "invoices/2026-001.pdf", "invoice one");
    (temp, engine)
}

fn write_attachment(engine: &BackupEngine, relative: &str, contents: &str) {
    let path = engine.paths().attachments_dir().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Database contents plus every attachment, keyed by relative path
fn live_state(engine: &BackupEngine) -> BTreeMap<String, String> {
    let mut state = BTreeMap::new();
    state.insert(
        "<db>".to_string(),
        fs::read_to_string(engine.paths().database_file()).unwrap_or_default(),
    );

    let root = engine.paths().attachments_dir();
    for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            state.insert(relative, fs::read_to_string(entry.path()).unwrap());
        }
    }
    state
}

#[test]
fn scenarios_a_through_d() {
    let (temp, engine) = setup();

    // A: a full backup, then nothing new
    let b1 = engine.create_backup(false).unwrap().unwrap();
    assert_eq!(b1.kind, BackupKind::Full);
    assert!(!engine.needs_backup().unwrap());
    assert!(!engine.needs_backup().unwrap());

    // B: a change produces an incremental, which protects its full
    fs::write(engine.paths().database_file(), "rows: 2").unwrap();
    write_attachment(&engine, "invoices/2026-002.pdf", "invoice two");
    assert!(engine.needs_backup().unwrap());
    let b2 = engine.create_backup(false).unwrap().unwrap();
    assert_eq!(b2.kind, BackupKind::Incremental);
    assert_eq!(b2.parent_id, Some(b1.id));
    let b2_state = live_state(&engine);

    let err = engine.delete(b1.id).unwrap_err();
    assert!(err.is_protected());

    // C: a newer full makes the old chain deletable, with cascade
    fs::write(engine.paths().database_file(), "rows: 3").unwrap();
    let b3 = engine.create_backup(true).unwrap().unwrap();
    assert_eq!(b3.kind, BackupKind::Full);

    let removed = engine.delete(b1.id).unwrap();
    let mut removed_ids: Vec<_> = removed.iter().map(|r| r.id).collect();
    removed_ids.sort_by_key(|id| id.to_string());
    let mut expected = vec![b1.id, b2.id];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(removed_ids, expected);
    let remaining: Vec<_> = engine
        .list_restore_points()
        .unwrap()
        .into_iter()
        .map(|p| p.record.id)
        .collect();
    assert_eq!(remaining, vec![b3.id]);

    // D: stage a restore, restart, and come back to the staged state
    fs::write(engine.paths().database_file(), "rows: 4").unwrap();
    write_attachment(&engine, "invoices/2026-003.pdf", "invoice three");
    let b4 = engine.create_backup(false).unwrap().unwrap();
    let b4_state = live_state(&engine);
    assert_ne!(b4_state, b2_state);

    write_attachment(&engine, "scratch.txt", "unsaved work");
    engine.prepare_restore(b4.id).unwrap();
    assert!(engine.pending_restore().unwrap().is_some());
    drop(engine);

    let restarted = open_engine(temp.path());
    assert_eq!(restarted.apply_pending_restore_if_any().unwrap(), Some(b4.id));
    assert_eq!(live_state(&restarted), b4_state);
    assert!(restarted.pending_restore().unwrap().is_none());
    assert!(!restarted.paths().pending_restore_marker().exists());

    // The state that was replaced is kept as a pre-restore record
    let points = restarted.list_restore_points().unwrap();
    assert_eq!(points[0].record.kind, BackupKind::PreRestore);
    assert!(!points[0].is_protected);

    // The restored state is the new baseline
    assert!(!restarted.needs_backup().unwrap());
}

#[test]
fn round_trip_through_many_incrementals() {
    let (temp, engine) = setup();
    let mut states = Vec::new();
    let mut records = Vec::new();

    records.push(engine.create_backup(false).unwrap().unwrap());
    states.push(live_state(&engine));

    for step in 1..=5 {
        fs::write(engine.paths().database_file(), format!("rows: {}", step + 1)).unwrap();
        write_attachment(&engine, &format!("notes/step-{}.txt", step), &format!("step {}", step));
        if step == 2 {
            fs::remove_file(engine.paths().attachments_dir().join("invoices/2026-001.pdf")).unwrap();
        }
        if step == 4 {
            write_attachment(&engine, "notes/step-1.txt", "step 1 revised");
            fs::remove_file(engine.paths().attachments_dir().join("notes/step-3.txt")).unwrap();
        }

        let record = engine.create_backup(false).unwrap().unwrap();
        assert_eq!(record.kind, BackupKind::Incremental);
        records.push(record);
        states.push(live_state(&engine));
    }

    for target in [3usize, 5, 0] {
        write_attachment(&engine, "drift.txt", "drift");
        engine.prepare_restore(records[target].id).unwrap();

        let restarted = open_engine(temp.path());
        restarted.apply_pending_restore_if_any().unwrap();
        assert_eq!(live_state(&restarted), states[target], "restore point {}", target);
    }
}

#[test]
fn restore_points_beyond_a_gap_are_rejected() {
    let (temp, engine) = setup();
    engine.create_backup(false).unwrap().unwrap();
    fs::write(engine.paths().database_file(), "rows: 2").unwrap();
    let middle = engine.create_backup(false).unwrap().unwrap();
    fs::write(engine.paths().database_file(), "rows: 3").unwrap();
    let tail = engine.create_backup(false).unwrap().unwrap();

    // Lose the middle increment behind the engine's back
    let manifest_path = engine.paths().backup_root().join("manifest.json");
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
    let middle_uuid = middle.id.as_uuid().to_string();
    let records: Vec<serde_json::Value> = manifest["records"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["id"] != middle_uuid.as_str())
        .cloned()
        .collect();
    let mut edited = manifest.clone();
    edited["records"] = serde_json::Value::Array(records);
    fs::write(&manifest_path, serde_json::to_string(&edited).unwrap()).unwrap();

    let points = engine.list_restore_points().unwrap();
    let tail_point = points.iter().find(|p| p.record.id == tail.id).unwrap();
    assert!(!tail_point.restorable);

    let err = engine.prepare_restore(tail.id).unwrap_err();
    assert!(err.is_integrity());
    assert!(!temp.path().join("pending_restore.json").exists());

    // An incomplete active chain forces the next backup to start a new one
    fs::write(engine.paths().database_file(), "rows: 4").unwrap();
    let next = engine.create_backup(false).unwrap().unwrap();
    assert_eq!(next.kind, BackupKind::Full);
}

#[test]
fn cascade_removes_exactly_the_chain() {
    let (_temp, engine) = setup();
    let full = engine.create_backup(false).unwrap().unwrap();
    for step in 0..4 {
        fs::write(engine.paths().database_file(), format!("rows: {}", step + 10)).unwrap();
        engine.create_backup(false).unwrap().unwrap();
    }
    fs::write(engine.paths().database_file(), "rows: new chain").unwrap();
    let newer = engine.create_backup(true).unwrap().unwrap();

    let artifacts_before = fs::read_dir(engine.paths().backup_root())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();

    let removed = engine.delete(full.id).unwrap();
    assert_eq!(removed.len(), 1 + 4);

    let artifacts_after = fs::read_dir(engine.paths().backup_root())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();
    assert_eq!(artifacts_before - artifacts_after, 5);

    let status = engine.status().unwrap();
    assert_eq!(status.record_count, 1);
    assert_eq!(status.latest.map(|r| r.id), Some(newer.id));
}

#[test]
fn last_complete_chain_is_never_deleted() {
    let (_temp, engine) = setup();
    let only = engine.create_backup(false).unwrap().unwrap();

    let err = engine.delete(only.id).unwrap_err();
    assert!(err.is_protected());
    assert!(engine.list_restore_points().unwrap()[0].is_protected);
}

#[test]
fn corrupt_manifest_is_recovered() {
    let (_temp, engine) = setup();
    engine.create_backup(false).unwrap().unwrap();
    fs::write(engine.paths().database_file(), "rows: 2").unwrap();
    let incr = engine.create_backup(false).unwrap().unwrap();

    fs::write(engine.paths().backup_root().join("manifest.json"), "{ truncated").unwrap();

    let points = engine.list_restore_points().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].record.id, incr.id);
    assert!(points.iter().all(|p| p.restorable));
    assert_eq!(engine.status().unwrap().complete_chain_count, 1);
}

#[test]
fn fail_open_trigger_never_panics_the_host() {
    let (_temp, engine) = setup();
    assert!(engine.on_trigger_fail_open(Trigger::Login).is_some());
    assert!(engine.on_trigger_fail_open(Trigger::Logout).is_none());
}
