//! Application coordinator.
//!
//! [`Studio`] owns every piece of per-user state: the block registry, the
//! compile session, the robot selection, the dispatcher and the diagram
//! being edited. Components receive what they need by reference; none of
//! them reach into shared global state.

use crate::catalog::{CatalogEntries, CatalogRegistry, PaletteCategory};
use crate::config::Config;
use crate::dispatch::{CommandDispatcher, ConnectivitySnapshot, DispatchSummary, Transport};
use crate::error::{DispatchError, GenerateError, PreviewError, SelectionError};
use crate::generator::{CompileSession, CompiledProgram};
use crate::model::{CatalogKind, DeviceModelId, ProgramDiagram};
use crate::notice::{Notice, Notifier};
use crate::sandbox::{self, CommandHook, RunReport, Sandbox};
use crate::selection::{Entitlement, SelectionMode, SelectionState};
use crate::store::DiagramStore;
use anyhow::Result;

pub struct Studio {
    config: Config,
    namespace: String,
    registry: CatalogRegistry,
    session: CompileSession,
    selection: SelectionState,
    dispatcher: CommandDispatcher,
    store: DiagramStore,
    diagram: ProgramDiagram,
}

impl Studio {
    /// A studio with the filesystem store from `config`.
    pub fn new(config: Config, namespace: impl Into<String>) -> Result<Self> {
        let store = DiagramStore::from_config(&config.store);
        Self::with_store(config, namespace, store)
    }

    pub fn with_store(config: Config, namespace: impl Into<String>, store: DiagramStore) -> Result<Self> {
        let dispatcher = CommandDispatcher::new(&config.dispatch)?;
        Ok(Self {
            config,
            namespace: namespace.into(),
            registry: CatalogRegistry::new(),
            session: CompileSession::new(None, ""),
            selection: SelectionState::new(),
            dispatcher,
            store,
            diagram: ProgramDiagram::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn diagram(&self) -> &ProgramDiagram {
        &self.diagram
    }

    pub fn set_diagram(&mut self, diagram: ProgramDiagram) {
        self.diagram = diagram;
    }

    pub fn active_model(&self) -> Option<&DeviceModelId> {
        self.session.model()
    }

    pub fn palette(&self) -> Vec<PaletteCategory> {
        self.registry.palette()
    }

    /// Register a model's catalog. The first registered model becomes the
    /// one being edited.
    pub fn register_model(&mut self, model: DeviceModelId, entries: &CatalogEntries) -> Result<bool> {
        let added = self.registry.register(model.clone(), entries);
        match self.session.model().cloned() {
            None if added => {
                self.switch_model(&model)?;
            }
            // Registration moves the palette; keep it on the edited model.
            Some(current) => {
                self.registry.set_active_model(&current);
            }
            None => {}
        }
        Ok(added)
    }

    /// Save the current diagram and open the one stored for `model`.
    ///
    /// Returns `false` if `model` has not been registered. If saving or
    /// loading fails, the studio stays on the current model.
    pub fn switch_model(&mut self, model: &DeviceModelId) -> Result<bool> {
        if !self.registry.is_registered(model) {
            return Ok(false);
        }
        if let Some(current) = self.session.model() {
            if current == model {
                self.registry.set_active_model(model);
                return Ok(true);
            }
            self.store.save(&self.namespace, current, &self.diagram)?;
        }
        let diagram = self.store.load(&self.namespace, model)?;
        self.diagram = diagram;
        self.registry.set_active_model(model);
        self.session.set_model(model.clone());
        tracing::debug!(%model, blocks = self.diagram.block_count(), "switched device model");
        Ok(true)
    }

    pub fn save_diagram(&self) -> Result<()> {
        match self.session.model() {
            Some(model) => self.store.save(&self.namespace, model, &self.diagram),
            None => Ok(()),
        }
    }

    /// Robot whose serial is written into generated commands.
    pub fn set_session_serial(&mut self, serial: &str) {
        self.session.set_serial(serial);
    }

    pub fn select_robot(&mut self, serial: &str) {
        self.selection.select(serial);
    }

    /// Switch selection mode; a refusal is reported through `notifier`.
    pub fn set_selection_mode(
        &mut self,
        mode: SelectionMode,
        entitlement: &dyn Entitlement,
        notifier: &dyn Notifier,
    ) -> Result<(), SelectionError> {
        let result = self.selection.set_mode(mode, entitlement);
        if let Err(e) = &result {
            notifier.notify(Notice::warning(e.to_string()));
        }
        result
    }

    /// Send a catalog action to every selected robot.
    pub fn send_action(
        &self,
        action_code: &str,
        kind: CatalogKind,
        snapshot: &ConnectivitySnapshot,
        transport: &dyn Transport,
        notifier: &dyn Notifier,
    ) -> Result<DispatchSummary, DispatchError> {
        self.dispatcher
            .dispatch(action_code, kind, &self.selection, snapshot, transport, notifier)
    }

    pub fn compile(&mut self) -> Result<CompiledProgram, GenerateError> {
        self.session.compile(&self.registry, &self.diagram)
    }

    /// Sandbox limited by the `[sandbox]` config section.
    pub fn sandbox<H: CommandHook>(&self, hook: H) -> Sandbox<H> {
        Sandbox::new(hook, self.config.sandbox.clone())
    }

    /// Compile the current diagram and run it in `sandbox`. One notice
    /// describes the outcome.
    pub fn preview<H: CommandHook>(
        &mut self,
        sandbox: &Sandbox<H>,
        notifier: &dyn Notifier,
    ) -> Result<RunReport, PreviewError> {
        let program = match self.compile() {
            Ok(p) => p,
            Err(e) => {
                notifier.notify(Notice::error(format!("Program could not be built: {}", e)));
                return Err(e.into());
            }
        };
        let result = sandbox.run_program(&program);
        notifier.notify(sandbox::outcome_notice(&result));
        Ok(result?)
    }
}
