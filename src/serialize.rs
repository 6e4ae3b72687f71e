//! Serialization and Persistence
//!
//! Saved racks and the registry that turns saved module kinds back into
//! live modules.

use crate::config::Settings;
use crate::expander::{ModuleKind, PanelTheme};
use crate::modules::{ChordKey, ChordKeyExpander, FourView, GateSeq64Expander};
use crate::port::{PortId, PortSpec, RackModule};
use crate::rack::{ModuleId, Rack, RackError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Current rack schema version
pub const RACK_VERSION: u32 = 1;

/// Serializable rack definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackDef {
    /// Schema version for forward compatibility
    pub version: u32,

    /// Modules from left to right
    pub modules: Vec<ModuleDef>,
}

impl RackDef {
    pub fn new() -> Self {
        Self {
            version: RACK_VERSION,
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: ModuleDef) -> Self {
        self.modules.push(module);
        self
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, RackError> {
        serde_json::to_string_pretty(self).map_err(|e| RackError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, RackError> {
        serde_json::from_str(json).map_err(|e| RackError::Serialization(e.to_string()))
    }
}

impl Default for RackDef {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable module instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub kind: ModuleKind,

    #[serde(default)]
    pub theme: PanelTheme,

    /// Parameter values by index
    #[serde(default)]
    pub params: Vec<f64>,

    /// Channel count of each patched input
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<(PortId, usize)>,

    /// Patched outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortId>,

    /// Module-specific saved state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ModuleDef {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            theme: PanelTheme::default(),
            params: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            data: None,
        }
    }

    pub fn with_theme(mut self, theme: PanelTheme) -> Self {
        self.theme = theme;
        self
    }

    pub fn with_params(mut self, params: Vec<f64>) -> Self {
        self.params = params;
        self
    }
}

/// Module factory function type
pub type ModuleFactory = Box<dyn Fn(PanelTheme) -> Box<dyn RackModule> + Send + Sync>;

/// Metadata about a registered module kind
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub kind: ModuleKind,
    pub name: String,
    pub description: String,
    pub port_spec: PortSpec,
}

/// Registry of module kinds that can be instantiated
///
/// The chord family and the CV expander are registered on creation.
/// `GateSeq64` mothers are supplied by the host through
/// [`register_factory`](Self::register_factory).
pub struct ModuleRegistry {
    factories: HashMap<ModuleKind, ModuleFactory>,
    metadata: HashMap<ModuleKind, ModuleMetadata>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            metadata: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register_factory(
            ModuleKind::ChordKey,
            "ChordKey",
            "Chord source publishing four chord voltages to its right",
            |theme| Box::new(ChordKey::new(theme)),
        );

        self.register_factory(
            ModuleKind::ChordKeyExpander,
            "ChordKey Expander",
            "Four polyphonic quantizers following the chord on the left",
            |theme| Box::new(ChordKeyExpander::new(theme)),
        );

        self.register_factory(
            ModuleKind::FourView,
            "FourView",
            "Chord viewer with note names and pass-through outputs",
            |theme| Box::new(FourView::new(theme)),
        );

        self.register_factory(
            ModuleKind::GateSeq64Expander,
            "GateSeq64 Expander",
            "CV inputs for a gate sequencer on the left",
            |theme| Box::new(GateSeq64Expander::new(theme)),
        );
    }

    /// Register a module factory; replaces any factory for the same kind
    pub fn register_factory<F>(
        &mut self,
        kind: ModuleKind,
        name: &str,
        description: &str,
        factory: F,
    ) where
        F: Fn(PanelTheme) -> Box<dyn RackModule> + Send + Sync + 'static,
    {
        // Get port spec from a temporary instance
        let port_spec = factory(PanelTheme::default()).port_spec().clone();

        self.factories.insert(kind, Box::new(factory));
        self.metadata.insert(
            kind,
            ModuleMetadata {
                kind,
                name: name.to_string(),
                description: description.to_string(),
                port_spec,
            },
        );
    }

    /// Instantiate a module of a registered kind
    pub fn instantiate(
        &self,
        kind: ModuleKind,
        theme: PanelTheme,
    ) -> Result<Box<dyn RackModule>, RackError> {
        self.factories
            .get(&kind)
            .map(|f| f(theme))
            .ok_or(RackError::UnsupportedKind(kind))
    }

    pub fn contains(&self, kind: ModuleKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn list_modules(&self) -> impl Iterator<Item = &ModuleMetadata> {
        self.metadata.values()
    }

    pub fn get_metadata(&self, kind: ModuleKind) -> Option<&ModuleMetadata> {
        self.metadata.get(&kind)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension methods for Rack to support serialization
impl Rack {
    /// Add a new module of a registered kind with the settings' default
    /// panel theme
    pub fn add_kind(
        &mut self,
        kind: ModuleKind,
        registry: &ModuleRegistry,
        settings: &Settings,
    ) -> Result<ModuleId, RackError> {
        let module = registry.instantiate(kind, settings.default_theme())?;
        Ok(self.add_boxed(module))
    }

    /// Convert the rack to a serializable definition
    pub fn to_def(&self) -> RackDef {
        let modules = self
            .modules()
            .filter_map(|(id, module)| {
                let io = self.io(id).ok()?;
                Some(ModuleDef {
                    kind: module.kind(),
                    theme: module.panel_theme(),
                    params: io.params.clone(),
                    inputs: io
                        .inputs
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| p.is_connected())
                        .map(|(port, p)| (port, p.channels()))
                        .collect(),
                    outputs: io
                        .outputs
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| p.is_connected())
                        .map(|(port, _)| port)
                        .collect(),
                    data: Some(module.data_to_json()),
                })
            })
            .collect();

        RackDef {
            version: RACK_VERSION,
            modules,
        }
    }

    /// Build a rack from a definition
    pub fn from_def(
        def: &RackDef,
        registry: &ModuleRegistry,
        settings: &Settings,
    ) -> Result<Self, RackError> {
        if def.version > RACK_VERSION {
            return Err(RackError::Serialization(format!(
                "unsupported rack version {}",
                def.version
            )));
        }

        let mut rack = Rack::with_settings(settings);
        for module_def in &def.modules {
            let module = registry.instantiate(module_def.kind, module_def.theme)?;
            let id = rack.add_boxed(module);

            if let Some(data) = &module_def.data {
                rack.module_mut(id)?
                    .data_from_json(data)
                    .map_err(RackError::Serialization)?;
            }
            for (param, &value) in module_def.params.iter().enumerate() {
                rack.set_param(id, param, value)?;
            }
            for &(port, channels) in &module_def.inputs {
                rack.connect_input(id, port, channels)?;
            }
            for &port in &module_def.outputs {
                rack.connect_output(id, port)?;
            }
            debug!(kind = module_def.kind.type_id(), "module restored");
        }

        info!(modules = rack.len(), "rack loaded");
        Ok(rack)
    }
}
