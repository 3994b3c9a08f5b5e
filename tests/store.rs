use anyhow::Result;
use blocklink::catalog::CatalogEntries;
use blocklink::config::{Config, StoreFormat};
use blocklink::dispatch::{ConnectivitySnapshot, DispatchTarget};
use blocklink::model::{BlockInstance, CatalogItem, CatalogKind, DeviceModelId, FieldValue, ProgramDiagram};
use blocklink::notice::CollectingNotifier;
use blocklink::store::{DiagramStore, FsBackend, SlotKey, StorageBackend};
use blocklink::studio::Studio;
use camino::Utf8PathBuf;

fn diagram() -> ProgramDiagram {
    ProgramDiagram::new(vec![BlockInstance::new("s", "start").with_children(vec![
        BlockInstance::new("w", "action:wave").with_field("wait", FieldValue::Bool(false)),
        BlockInstance::new("p", "wait").with_field("seconds", FieldValue::Number(0.25)),
    ])])
}

fn temp_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
}

#[test]
fn test_missing_slot_loads_empty() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DiagramStore::new(Box::new(FsBackend::new(temp_root(&dir))), StoreFormat::Json);
    assert!(store.load("user", &"alpha".into())?.is_empty());
    assert!(store.list("user")?.is_empty());
    Ok(())
}

#[test]
fn test_json_and_binary_slots_survive_reload() -> Result<()> {
    for format in [StoreFormat::Json, StoreFormat::Binary] {
        let dir = tempfile::tempdir()?;
        let model = DeviceModelId::new("alpha/mini v2");
        {
            let store = DiagramStore::new(Box::new(FsBackend::new(temp_root(&dir))), format);
            store.save("user 1", &model, &diagram())?;
        }
        let store = DiagramStore::new(Box::new(FsBackend::new(temp_root(&dir))), format);
        assert_eq!(store.load("user 1", &model)?, diagram());
        assert_eq!(store.list("user 1")?, vec![model.clone()]);
        assert!(store.remove("user 1", &model)?);
        assert!(store.load("user 1", &model)?.is_empty());
    }
    Ok(())
}

#[test]
fn test_corrupt_slot_is_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = temp_root(&dir);
    std::fs::create_dir_all(root.join("user"))?;
    std::fs::write(root.join("user").join("alpha.bin"), b"not a diagram")?;
    let store = DiagramStore::new(Box::new(FsBackend::new(root)), StoreFormat::Binary);
    assert!(store.load("user", &"alpha".into()).is_err());
    assert!(store.list("user")?.is_empty());
    Ok(())
}

#[test]
fn test_studio_keeps_one_diagram_per_model() -> Result<()> {
    let mut studio = Studio::with_store(Config::default(), "user", DiagramStore::in_memory(StoreFormat::Json))?;
    let alpha = CatalogEntries {
        actions: vec![CatalogItem::new("wave", "Wave", 2)],
        ..Default::default()
    };
    let beta = CatalogEntries {
        actions: vec![CatalogItem::new("nod", "Nod", 1)],
        ..Default::default()
    };
    assert!(studio.register_model("alpha".into(), &alpha)?);
    assert!(studio.register_model("beta".into(), &beta)?);
    assert_eq!(studio.active_model().map(|m| m.as_str()), Some("alpha"));

    studio.set_diagram(diagram());
    studio.set_session_serial("S1");
    assert!(studio.compile().is_ok());

    assert!(studio.switch_model(&"beta".into())?);
    assert!(studio.diagram().is_empty());
    assert!(!studio.switch_model(&"gamma".into())?);

    assert!(studio.switch_model(&"alpha".into())?);
    assert_eq!(studio.diagram(), &diagram());
    Ok(())
}

#[test]
fn test_studio_send_and_preview_report_once() -> Result<()> {
    let mut studio = Studio::with_store(Config::default(), "user", DiagramStore::in_memory(StoreFormat::Binary))?;
    studio.register_model(
        "alpha".into(),
        &CatalogEntries {
            actions: vec![CatalogItem::new("wave", "Wave", 2)],
            ..Default::default()
        },
    )?;
    studio.select_robot("A");

    let notifier = CollectingNotifier::new();
    let snapshot: ConnectivitySnapshot = vec![DispatchTarget::online("A")].into_iter().collect();
    let transport = |_: &str, _: &str, _: CatalogKind| -> Result<String, String> { Ok(String::new()) };
    let summary = studio.send_action("wave", CatalogKind::Action, &snapshot, &transport, &notifier);
    assert_eq!(summary.map(|s| s.succeeded), Ok(1));
    assert_eq!(notifier.len(), 1);

    studio.set_diagram(diagram());
    let sandbox = studio.sandbox(|_: &blocklink::generator::DeviceCommand| -> Result<(), String> { Ok(()) });
    let report = studio.preview(&sandbox, &notifier)?;
    assert_eq!(report.commands_issued, 1);
    assert_eq!(report.estimated_seconds, 0.25);
    assert_eq!(notifier.len(), 2);
    Ok(())
}

#[test]
fn test_lookalike_ids_keep_separate_slots() -> Result<()> {
    for format in [StoreFormat::Json, StoreFormat::Binary] {
        let dir = tempfile::tempdir()?;
        let store = DiagramStore::new(Box::new(FsBackend::new(temp_root(&dir))), format);
        let slashed = DeviceModelId::new("alpha/mini");
        let underscored = DeviceModelId::new("alpha_mini");

        store.save("user", &slashed, &diagram())?;
        assert!(store.load("user", &underscored)?.is_empty());

        store.save("user", &underscored, &ProgramDiagram::default())?;
        assert_eq!(store.load("user", &slashed)?, diagram());

        let mut listed = store.list("user")?;
        listed.sort();
        assert_eq!(listed, vec![slashed.clone(), underscored.clone()]);

        store.save("alice/x", &slashed, &diagram())?;
        assert!(store.load("alice_x", &slashed)?.is_empty());
        assert_eq!(store.load("alice/x", &slashed)?, diagram());
    }
    Ok(())
}

#[test]
fn test_slot_holding_another_model_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = temp_root(&dir);
    let store = DiagramStore::new(Box::new(FsBackend::new(root.clone())), StoreFormat::Json);
    store.save("user", &"alpha".into(), &diagram())?;
    std::fs::copy(root.join("user").join("alpha.json"), root.join("user").join("beta.json"))?;

    assert!(store.load("user", &"beta".into()).is_err());
    assert_eq!(store.list("user")?, vec![DeviceModelId::new("alpha")]);
    Ok(())
}

/// Backend that reads nothing and refuses every write.
struct ReadOnlyBackend;

impl StorageBackend for ReadOnlyBackend {
    fn read(&self, _key: &SlotKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    fn write(&self, key: &SlotKey, _bytes: &[u8]) -> Result<()> {
        anyhow::bail!("read-only store: {}/{}", key.namespace, key.name)
    }
    fn delete(&self, _key: &SlotKey) -> Result<bool> {
        Ok(false)
    }
    fn keys(&self, _namespace: &str) -> Result<Vec<SlotKey>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_failed_model_switch_keeps_current_model() -> Result<()> {
    let store = DiagramStore::new(Box::new(ReadOnlyBackend), StoreFormat::Json);
    let mut studio = Studio::with_store(Config::default(), "user", store)?;
    studio.register_model(
        "alpha".into(),
        &CatalogEntries {
            actions: vec![CatalogItem::new("wave", "Wave", 2)],
            ..Default::default()
        },
    )?;
    studio.register_model(
        "beta".into(),
        &CatalogEntries {
            actions: vec![CatalogItem::new("nod", "Nod", 1)],
            ..Default::default()
        },
    )?;
    studio.set_diagram(diagram());

    assert!(studio.switch_model(&"beta".into()).is_err());
    assert_eq!(studio.active_model().map(|m| m.as_str()), Some("alpha"));
    assert_eq!(studio.registry().active_model().map(|m| m.as_str()), Some("alpha"));
    assert_eq!(studio.diagram(), &diagram());
    assert!(studio.compile().is_ok());
    Ok(())
}
