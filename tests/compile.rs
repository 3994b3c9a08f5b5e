use anyhow::Result;
use blocklink::catalog::{CatalogEntries, CatalogRegistry};
use blocklink::error::GenerateError;
use blocklink::generator::{CompileSession, Statement, build_generator, compile, script};
use blocklink::model::{BlockInstance, CatalogItem, DeviceModelId, FieldValue, ProgramDiagram};

const CATALOG: &str = r#"{
  "actions": [
    ["wave", "Wave hands", 3, true, "wave.png"],
    {"code": "bow", "name": "Bow", "duration_seconds": 2, "can_interrupt": false}
  ],
  "dances": [["disco", "Disco", "12", "1"]],
  "expressions": [["smile", "Smile", 1, 0]]
}"#;

fn registry() -> Result<CatalogRegistry> {
    let mut registry = CatalogRegistry::new();
    registry.register("alpha".into(), &CatalogEntries::from_json_str(CATALOG)?);
    registry.register(
        "beta".into(),
        &CatalogEntries {
            actions: vec![CatalogItem::new("nod", "Nod", 1)],
            ..Default::default()
        },
    );
    Ok(registry)
}

fn sample_diagram() -> ProgramDiagram {
    ProgramDiagram::new(vec![
        BlockInstance::new("s", "start").with_children(vec![
            BlockInstance::new("r", "repeat")
                .with_field("times", FieldValue::Number(3.0))
                .with_children(vec![
                    BlockInstance::new("w", "action:wave"),
                    BlockInstance::new("p", "wait").with_field("seconds", FieldValue::Number(0.5)),
                ]),
            BlockInstance::new("d", "dance:disco").with_field("wait", FieldValue::Bool(false)),
            BlockInstance::new("l", "log").with_field("message", FieldValue::Text("done \"ok\"".into())),
        ]),
    ])
}

#[test]
fn test_compile_is_deterministic() -> Result<()> {
    let registry = registry()?;
    let model = DeviceModelId::new("alpha");
    let a = compile(&sample_diagram(), &build_generator(&registry, &model, "S1")?)?;
    let b = compile(&sample_diagram(), &build_generator(&registry, &model, "S1")?)?;
    assert_eq!(a.code, b.code);
    assert_eq!(a.statements, b.statements);
    Ok(())
}

#[test]
fn test_statement_structure() -> Result<()> {
    let registry = registry()?;
    let program = compile(&sample_diagram(), &build_generator(&registry, &"alpha".into(), "S1")?)?;
    assert_eq!(program.statements.len(), 4);
    assert_eq!(program.statements[0], Statement::Begin);
    match &program.statements[1] {
        Statement::Repeat { times, body } => {
            assert_eq!(*times, 3);
            assert_eq!(body.len(), 2);
        }
        other => panic!("expected repeat, got {:?}", other),
    }
    match &program.statements[2] {
        Statement::Command(cmd) => {
            assert_eq!(cmd.code, "disco");
            assert_eq!(cmd.duration_seconds, 12);
            assert!(cmd.can_interrupt);
            assert!(!cmd.wait);
        }
        other => panic!("expected command, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_script_parses_back_to_statements() -> Result<()> {
    let registry = registry()?;
    let program = compile(&sample_diagram(), &build_generator(&registry, &"alpha".into(), "S1")?)?;
    assert!(program.code.starts_with("# blocklink program model=alpha serial=S1"));
    assert_eq!(script::parse(&program.code)?, program.statements);
    Ok(())
}

#[test]
fn test_model_isolation() -> Result<()> {
    let registry = registry()?;
    let diagram = ProgramDiagram::new(vec![BlockInstance::new("n", "action:nod")]);

    let beta = build_generator(&registry, &"beta".into(), "S1")?;
    assert!(compile(&diagram, &beta).is_ok());

    let alpha = build_generator(&registry, &"alpha".into(), "S1")?;
    let err = compile(&diagram, &alpha).unwrap_err();
    assert!(matches!(
        err,
        GenerateError::UnknownBlock { ref block_type, ref model, .. }
            if block_type == "action:nod" && model.as_str() == "alpha"
    ));
    Ok(())
}

#[test]
fn test_registration_is_idempotent() -> Result<()> {
    let mut registry = registry()?;
    let before = registry.snapshot(&"alpha".into()).map(|t| t.len());
    let changed = registry.register(
        "alpha".into(),
        &CatalogEntries {
            skills: vec![CatalogItem::new("extra", "Extra", 1)],
            ..Default::default()
        },
    );
    assert!(!changed);
    assert_eq!(registry.snapshot(&"alpha".into()).map(|t| t.len()), before);
    assert!(registry.definition(&"alpha".into(), "skill:extra").is_none());
    Ok(())
}

#[test]
fn test_palette_groups_by_category() -> Result<()> {
    let mut registry = registry()?;
    assert!(registry.set_active_model(&"alpha".into()));
    let names: Vec<String> = registry.palette().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["Control", "Actions", "Expressions", "Dances"]);
    let hits: Vec<&str> = registry
        .search("wave")
        .into_iter()
        .map(|d| d.block_type.as_str())
        .collect();
    assert_eq!(hits, vec!["action:wave"]);
    Ok(())
}

#[test]
fn test_session_rebuilds_after_model_switch() -> Result<()> {
    let registry = registry()?;
    let mut session = CompileSession::new(Some("alpha".into()), "S1");
    let wave = ProgramDiagram::new(vec![BlockInstance::new("w", "action:wave")]);
    session.compile(&registry, &wave)?;
    assert!(session.has_generator());

    assert!(session.set_model("beta".into()));
    assert!(!session.has_generator());
    assert!(matches!(
        session.compile(&registry, &wave),
        Err(GenerateError::UnknownBlock { .. })
    ));

    assert!(session.set_serial("S2"));
    let nod = ProgramDiagram::new(vec![BlockInstance::new("n", "action:nod")]);
    let program = session.compile(&registry, &nod)?;
    assert_eq!(program.session_serial, "S2");
    Ok(())
}

#[test]
fn test_no_model_selected() {
    let registry = CatalogRegistry::new();
    let mut session = CompileSession::new(None, "S1");
    assert_eq!(
        session.compile(&registry, &ProgramDiagram::default()),
        Err(GenerateError::NoModelSelected)
    );
}

#[test]
fn test_shared_block_type_uses_current_model_catalog() -> Result<()> {
    let mut registry = CatalogRegistry::new();
    registry.register(
        "m1".into(),
        &CatalogEntries {
            actions: vec![CatalogItem::new("wave", "Wave", 3)],
            ..Default::default()
        },
    );
    registry.register(
        "m2".into(),
        &CatalogEntries {
            actions: vec![CatalogItem::new("wave", "Wave", 9).uninterruptible()],
            ..Default::default()
        },
    );
    let diagram = ProgramDiagram::new(vec![BlockInstance::new("w", "action:wave")]);
    let command = |program: &blocklink::generator::CompiledProgram| match &program.statements[0] {
        Statement::Command(cmd) => (cmd.duration_seconds, cmd.can_interrupt),
        other => panic!("expected command, got {:?}", other),
    };

    let mut session = CompileSession::new(Some("m1".into()), "S1");
    let first = session.compile(&registry, &diagram)?;
    assert_eq!(command(&first), (3, true));

    session.set_model("m2".into());
    let second = session.compile(&registry, &diagram)?;
    assert_eq!(command(&second), (9, false));
    assert_eq!(second.device_model_id.as_str(), "m2");
    assert!(second.code.contains("duration=9 interrupt=false"));
    assert!(!second.code.contains("duration=3"));
    Ok(())
}
