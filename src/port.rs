//! Signal Conventions and Port System
//!
//! This module defines the signal types, polyphonic ports, parameter
//! definitions and the [`RackModule`] trait that every rack module
//! implements. Ports and parameters are allocated once when a module is
//! added to a rack; the process path only reads and writes them in place.

use crate::expander::{ExpanderBus, ModuleKind, PanelTheme};
use serde::{Deserialize, Serialize};

/// Index of a port within a module's inputs or outputs
pub type PortId = usize;

/// Index of a parameter within a module
pub type ParamId = usize;

/// Maximum number of polyphonic channels on one port
pub const MAX_CHANNELS: usize = 16;

/// Semantic signal classification following hardware modular conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Bipolar control voltage, ±5V
    CvBipolar,

    /// Pitch CV following 1V/octave standard
    /// Reference: 0V = C4 (middle C, 261.63 Hz)
    VoltPerOctave,

    /// Trigger signal, short pulse at +5V
    Trigger,
}

/// Definition of a single port (input or output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Position in the module's inputs or outputs
    pub id: PortId,

    /// Human-readable name (e.g., "cv1", "gate", "out")
    pub name: String,

    /// Signal type for validation and UI hints
    pub kind: SignalKind,
}

impl PortDef {
    pub fn new(id: PortId, name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }
}

/// Specification of all ports for a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

/// A polyphonic port: up to [`MAX_CHANNELS`] voltages
///
/// Zero channels means disconnected. A connected port always carries at
/// least one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Port {
    voltages: [f64; MAX_CHANNELS],
    channels: usize,
}

impl Port {
    pub fn new() -> Self {
        Self {
            voltages: [0.0; MAX_CHANNELS],
            channels: 0,
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.channels > 0
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Voltage of a channel; channels past the end read 0 V
    #[inline]
    pub fn voltage(&self, channel: usize) -> f64 {
        self.voltages.get(channel).copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn set_voltage(&mut self, voltage: f64, channel: usize) {
        if let Some(v) = self.voltages.get_mut(channel) {
            *v = voltage;
        }
    }

    /// Set the channel count of a connected port
    ///
    /// Does nothing on a disconnected port, and never lets a connected
    /// port drop to zero channels. Channels above the new count are
    /// zeroed.
    pub fn set_channels(&mut self, channels: usize) {
        if self.channels == 0 {
            return;
        }
        let channels = channels.clamp(1, MAX_CHANNELS);
        for v in &mut self.voltages[channels..] {
            *v = 0.0;
        }
        self.channels = channels;
    }

    /// Patch a cable carrying `channels` channels (at least one)
    pub fn connect(&mut self, channels: usize) {
        self.channels = channels.clamp(1, MAX_CHANNELS);
        for v in &mut self.voltages[self.channels..] {
            *v = 0.0;
        }
    }

    pub fn disconnect(&mut self) {
        self.channels = 0;
        self.voltages = [0.0; MAX_CHANNELS];
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameter definition for UI binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub id: ParamId,
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    /// Values snap to whole numbers
    pub snap: bool,
}

impl ParamDef {
    pub fn new(id: ParamId, name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            id,
            name: name.into(),
            default,
            min,
            max,
            snap: false,
        }
    }

    pub fn snapped(mut self) -> Self {
        self.snap = true;
        self
    }

    /// Bring a value into this parameter's range
    pub fn constrain(&self, value: f64) -> f64 {
        let value = value.clamp(self.min, self.max);
        if self.snap {
            value.round()
        } else {
            value
        }
    }
}

/// Timing information for one process call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessArgs {
    pub sample_rate: f64,
    pub sample_time: f64,
    /// Frames processed by the rack before this one
    pub frame: u64,
}

impl ProcessArgs {
    pub fn new(sample_rate: f64, frame: u64) -> Self {
        Self {
            sample_rate,
            sample_time: 1.0 / sample_rate,
            frame,
        }
    }
}

/// Ports and parameter values of one module, owned by the rack
#[derive(Debug, Clone, Default)]
pub struct ModuleIo {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub params: Vec<f64>,
}

impl ModuleIo {
    /// Allocate ports and default parameter values for a module
    pub fn new(spec: &PortSpec, params: &[ParamDef]) -> Self {
        Self {
            inputs: vec![Port::new(); spec.inputs.len()],
            outputs: vec![Port::new(); spec.outputs.len()],
            params: params.iter().map(|p| p.default).collect(),
        }
    }

    pub fn input(&self, id: PortId) -> &Port {
        &self.inputs[id]
    }

    pub fn output_mut(&mut self, id: PortId) -> &mut Port {
        &mut self.outputs[id]
    }

    pub fn param(&self, id: ParamId) -> f64 {
        self.params.get(id).copied().unwrap_or(0.0)
    }
}

/// Interface between a rack and the modules it hosts
pub trait RackModule: Send {
    /// Kind tag neighbors use to decide whether to talk to this module
    fn kind(&self) -> ModuleKind;

    /// Returns the module's port specification
    fn port_spec(&self) -> &PortSpec;

    /// Get parameter definitions for UI binding
    fn params(&self) -> &[ParamDef] {
        &[]
    }

    /// Process one frame
    ///
    /// Runs on the audio thread: must not allocate, lock or block.
    fn process(&mut self, args: &ProcessArgs, io: &mut ModuleIo, expanders: &mut ExpanderBus<'_>);

    /// Return to the freshly constructed state
    fn reset(&mut self);

    /// Current panel color scheme
    fn panel_theme(&self) -> PanelTheme;

    /// Module state to save with the rack
    fn data_to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(serde_json::Map::new())
    }

    /// Restore saved state; modules with nothing to restore reload their
    /// defaults
    fn data_from_json(&mut self, _data: &serde_json::Value) -> Result<(), String> {
        self.reset();
        Ok(())
    }
}
