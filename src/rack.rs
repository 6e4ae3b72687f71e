//! Rack Host
//!
//! A row of modules processed left to right, one frame at a time. The rack
//! owns every module's ports and outgoing expander buffers, hands each
//! module a view of its two neighbors while it processes, and flips the
//! requested expander buffers once the whole row has run.

use crate::config::Settings;
use crate::expander::{
    ExpanderBus, ExpanderMessage, Expanders, ModuleKind, Neighbor, PanelTheme, Side,
};
use crate::port::{ModuleIo, ParamId, Port, PortId, ProcessArgs, RackModule, MAX_CHANNELS};
use slotmap::SlotMap;
use tracing::{debug, info};

slotmap::new_key_type! {
    /// Unique identifier for a module in a rack
    pub struct ModuleId;
}

/// Error types for rack operations
#[derive(Debug, Clone, PartialEq)]
pub enum RackError {
    InvalidModule,
    InvalidPort { port: PortId },
    InvalidChannel { channel: usize },
    InvalidParam { param: ParamId },
    UnsupportedKind(ModuleKind),
    Serialization(String),
}

impl std::fmt::Display for RackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RackError::InvalidModule => write!(f, "Invalid module"),
            RackError::InvalidPort { port } => write!(f, "Invalid port {}", port),
            RackError::InvalidChannel { channel } => write!(f, "Invalid channel {}", channel),
            RackError::InvalidParam { param } => write!(f, "Invalid parameter {}", param),
            RackError::UnsupportedKind(kind) => {
                write!(f, "No factory for module kind: {}", kind.type_id())
            }
            RackError::Serialization(msg) => write!(f, "Serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for RackError {}

/// Internal module representation
struct Slot {
    module: Box<dyn RackModule>,
    io: ModuleIo,
    expanders: Expanders,
}

/// A row of adjacent modules
pub struct Rack {
    slots: SlotMap<ModuleId, Slot>,
    order: Vec<ModuleId>,
    sample_rate: f64,
    frame: u64,
}

impl Rack {
    /// Create an empty rack
    pub fn new(sample_rate: f64) -> Self {
        Self {
            slots: SlotMap::with_key(),
            order: Vec::new(),
            sample_rate,
            frame: 0,
        }
    }

    pub fn with_settings(settings: &Settings) -> Self {
        Self::new(settings.sample_rate)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames processed since the rack was created
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Add a module at the right end of the row
    pub fn add<M: RackModule + 'static>(&mut self, module: M) -> ModuleId {
        self.add_boxed(Box::new(module))
    }

    pub fn add_boxed(&mut self, module: Box<dyn RackModule>) -> ModuleId {
        self.insert_boxed(self.order.len(), module)
    }

    /// Add a module at `position` in the row, shifting the modules from
    /// there on one place to the right; positions past the end append
    pub fn insert<M: RackModule + 'static>(&mut self, position: usize, module: M) -> ModuleId {
        self.insert_boxed(position, Box::new(module))
    }

    pub fn insert_boxed(&mut self, position: usize, module: Box<dyn RackModule>) -> ModuleId {
        let io = ModuleIo::new(module.port_spec(), module.params());
        let kind = module.kind();
        let id = self.slots.insert(Slot {
            module,
            io,
            expanders: Expanders::new(),
        });
        let position = position.min(self.order.len());
        self.order.insert(position, id);
        let left = position.checked_sub(1).map(|p| self.order[p]);
        let right = self.order.get(position + 1).copied();
        self.clear_facing(left, right);
        info!(kind = kind.type_id(), position, "module added");
        id
    }

    /// Remove a module; its former neighbors see it gone on the next frame
    pub fn remove(&mut self, id: ModuleId) -> Result<(), RackError> {
        let (left, right) = self.neighbors(id)?;
        let slot = self.slots.remove(id).ok_or(RackError::InvalidModule)?;
        self.order.retain(|&m| m != id);
        self.clear_facing(left, right);
        info!(kind = slot.module.kind().type_id(), "module removed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Module ids from left to right
    pub fn order(&self) -> &[ModuleId] {
        &self.order
    }

    pub fn position(&self, id: ModuleId) -> Option<usize> {
        self.order.iter().position(|&m| m == id)
    }

    /// Left and right neighbors of a module
    pub fn neighbors(
        &self,
        id: ModuleId,
    ) -> Result<(Option<ModuleId>, Option<ModuleId>), RackError> {
        let position = self.position(id).ok_or(RackError::InvalidModule)?;
        let left = position.checked_sub(1).map(|p| self.order[p]);
        let right = self.order.get(position + 1).copied();
        Ok((left, right))
    }

    pub fn kind(&self, id: ModuleId) -> Result<ModuleKind, RackError> {
        Ok(self.slot(id)?.module.kind())
    }

    pub fn module(&self, id: ModuleId) -> Result<&dyn RackModule, RackError> {
        Ok(self.slot(id)?.module.as_ref())
    }

    pub fn panel_theme(&self, id: ModuleId) -> Result<PanelTheme, RackError> {
        Ok(self.slot(id)?.module.panel_theme())
    }

    /// Modules from left to right
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &dyn RackModule)> {
        self.order
            .iter()
            .filter_map(|&id| self.slots.get(id).map(|slot| (id, slot.module.as_ref())))
    }

    /// Patch a cable carrying `channels` channels into an input
    pub fn connect_input(
        &mut self,
        id: ModuleId,
        port: PortId,
        channels: usize,
    ) -> Result<(), RackError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(RackError::InvalidChannel { channel: channels });
        }
        self.input_mut(id, port)?.connect(channels);
        Ok(())
    }

    pub fn disconnect_input(&mut self, id: ModuleId, port: PortId) -> Result<(), RackError> {
        self.input_mut(id, port)?.disconnect();
        Ok(())
    }

    /// Patch a cable into an output; the module sets its channel count
    pub fn connect_output(&mut self, id: ModuleId, port: PortId) -> Result<(), RackError> {
        self.output_mut(id, port)?.connect(1);
        Ok(())
    }

    pub fn disconnect_output(&mut self, id: ModuleId, port: PortId) -> Result<(), RackError> {
        self.output_mut(id, port)?.disconnect();
        Ok(())
    }

    /// Drive one channel of a patched input
    pub fn set_input(
        &mut self,
        id: ModuleId,
        port: PortId,
        channel: usize,
        voltage: f64,
    ) -> Result<(), RackError> {
        let input = self.input_mut(id, port)?;
        if channel >= input.channels() {
            return Err(RackError::InvalidChannel { channel });
        }
        input.set_voltage(voltage, channel);
        Ok(())
    }

    pub fn output(&self, id: ModuleId, port: PortId, channel: usize) -> Result<f64, RackError> {
        if channel >= MAX_CHANNELS {
            return Err(RackError::InvalidChannel { channel });
        }
        Ok(self.output_ref(id, port)?.voltage(channel))
    }

    pub fn output_channels(&self, id: ModuleId, port: PortId) -> Result<usize, RackError> {
        Ok(self.output_ref(id, port)?.channels())
    }

    /// Set a parameter, constrained to its range
    pub fn set_param(&mut self, id: ModuleId, param: ParamId, value: f64) -> Result<(), RackError> {
        let slot = self.slots.get_mut(id).ok_or(RackError::InvalidModule)?;
        let def = slot
            .module
            .params()
            .get(param)
            .ok_or(RackError::InvalidParam { param })?;
        let value = def.constrain(value);
        let stored = slot
            .io
            .params
            .get_mut(param)
            .ok_or(RackError::InvalidParam { param })?;
        *stored = value;
        Ok(())
    }

    pub fn param(&self, id: ModuleId, param: ParamId) -> Result<f64, RackError> {
        self.slot(id)?
            .io
            .params
            .get(param)
            .copied()
            .ok_or(RackError::InvalidParam { param })
    }

    /// Latest frame a module published towards one side
    pub fn expander_frame(&self, id: ModuleId, side: Side) -> Result<ExpanderMessage, RackError> {
        Ok(*self.slot(id)?.expanders.side(side).latest())
    }

    /// Process one frame of every module, left to right
    pub fn step(&mut self) {
        let args = ProcessArgs::new(self.sample_rate, self.frame);
        for position in 0..self.order.len() {
            let id = self.order[position];
            let left = position
                .checked_sub(1)
                .and_then(|p| self.neighbor(self.order[p], Side::Right));
            let right = self
                .order
                .get(position + 1)
                .and_then(|&r| self.neighbor(r, Side::Left));
            if let Some(slot) = self.slots.get_mut(id) {
                let mut bus = ExpanderBus::new(left, right, &mut slot.expanders);
                slot.module.process(&args, &mut slot.io, &mut bus);
            }
        }
        for slot in self.slots.values_mut() {
            slot.expanders.flip_requested();
        }
        self.frame += 1;
    }

    /// Process `frames` frames
    pub fn run(&mut self, frames: usize) {
        for _ in 0..frames {
            self.step();
        }
    }

    /// Reset every module to its initial state
    pub fn reset(&mut self) {
        for slot in self.slots.values_mut() {
            slot.module.reset();
        }
        debug!(modules = self.order.len(), "rack reset");
    }

    /// Drop the frames `left` sent right and `right` sent left; they were
    /// addressed to a neighbor that has changed
    fn clear_facing(&mut self, left: Option<ModuleId>, right: Option<ModuleId>) {
        if let Some(slot) = left.and_then(|id| self.slots.get_mut(id)) {
            slot.expanders.clear_side(Side::Right);
        }
        if let Some(slot) = right.and_then(|id| self.slots.get_mut(id)) {
            slot.expanders.clear_side(Side::Left);
        }
    }

    /// Module as seen by the neighbor facing `facing`
    fn neighbor(&self, id: ModuleId, facing: Side) -> Option<Neighbor> {
        self.slots.get(id).map(|slot| Neighbor {
            kind: slot.module.kind(),
            message: *slot.expanders.side(facing).latest(),
        })
    }

    fn slot(&self, id: ModuleId) -> Result<&Slot, RackError> {
        self.slots.get(id).ok_or(RackError::InvalidModule)
    }

    pub(crate) fn io(&self, id: ModuleId) -> Result<&ModuleIo, RackError> {
        Ok(&self.slot(id)?.io)
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> Result<&mut dyn RackModule, RackError> {
        let slot = self.slots.get_mut(id).ok_or(RackError::InvalidModule)?;
        Ok(slot.module.as_mut())
    }

    fn input_mut(&mut self, id: ModuleId, port: PortId) -> Result<&mut Port, RackError> {
        let slot = self.slots.get_mut(id).ok_or(RackError::InvalidModule)?;
        slot.io
            .inputs
            .get_mut(port)
            .ok_or(RackError::InvalidPort { port })
    }

    fn output_mut(&mut self, id: ModuleId, port: PortId) -> Result<&mut Port, RackError> {
        let slot = self.slots.get_mut(id).ok_or(RackError::InvalidModule)?;
        slot.io
            .outputs
            .get_mut(port)
            .ok_or(RackError::InvalidPort { port })
    }

    fn output_ref(&self, id: ModuleId, port: PortId) -> Result<&Port, RackError> {
        self.slot(id)?
            .io
            .outputs
            .get(port)
            .ok_or(RackError::InvalidPort { port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ChordKey, ChordKeyExpander, FourView};
    use crate::quantizer::UNUSED_VALUE;
    use crate::refresh::RefreshCounter;
    use approx::assert_abs_diff_eq;

    const LIGHTS_PERIOD: usize = crate::refresh::DISPLAY_REFRESH_STEP_SKIPS as usize;

    fn chord_key() -> ChordKey {
        ChordKey::new(PanelTheme::Dark).with_refresh(RefreshCounter::with_phase(0))
    }

    fn expander() -> ChordKeyExpander {
        ChordKeyExpander::default().with_refresh(RefreshCounter::with_phase(0))
    }

    /// ChordKey holding a single C, next to a quantizer fed `pitch`
    fn c_only_rack(pitch: f64) -> (Rack, ModuleId, ModuleId) {
        let mut rack = Rack::new(44100.0);
        let mother = rack.add(chord_key());
        let quantizer = rack.add(expander());
        rack.connect_input(mother, 0, 1).unwrap();
        rack.set_input(mother, 0, 0, 0.0).unwrap();
        rack.connect_input(quantizer, 0, 1).unwrap();
        rack.set_input(quantizer, 0, 0, pitch).unwrap();
        rack.connect_output(quantizer, 0).unwrap();
        (rack, mother, quantizer)
    }

    #[test]
    fn test_rack_creation() {
        let rack = Rack::new(48000.0);
        assert_eq!(rack.sample_rate(), 48000.0);
        assert!(rack.is_empty());
        assert_eq!(rack.frame(), 0);

        let rack = Rack::with_settings(&Settings::new().with_sample_rate(96000.0));
        assert_eq!(rack.sample_rate(), 96000.0);
    }

    #[test]
    fn test_insert_and_neighbors() {
        let mut rack = Rack::new(44100.0);
        let a = rack.add(chord_key());
        let c = rack.add(expander());
        let b = rack.insert(1, FourView::default());

        assert_eq!(rack.order(), &[a, b, c]);
        assert_eq!(rack.neighbors(a).unwrap(), (None, Some(b)));
        assert_eq!(rack.neighbors(b).unwrap(), (Some(a), Some(c)));
        assert_eq!(rack.neighbors(c).unwrap(), (Some(b), None));
        assert_eq!(rack.kind(b).unwrap(), ModuleKind::FourView);

        let kinds: Vec<ModuleKind> = rack.modules().map(|(_, m)| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ModuleKind::ChordKey,
                ModuleKind::FourView,
                ModuleKind::ChordKeyExpander
            ]
        );

        rack.remove(b).unwrap();
        assert_eq!(rack.neighbors(a).unwrap(), (None, Some(c)));
        assert_eq!(rack.remove(b), Err(RackError::InvalidModule));
        assert_eq!(rack.neighbors(b), Err(RackError::InvalidModule));
    }

    #[test]
    fn test_invalid_ports_and_params() {
        let mut rack = Rack::new(44100.0);
        let id = rack.add(expander());

        assert_eq!(
            rack.connect_input(id, 9, 1),
            Err(RackError::InvalidPort { port: 9 })
        );
        assert_eq!(
            rack.connect_input(id, 0, 17),
            Err(RackError::InvalidChannel { channel: 17 })
        );
        assert_eq!(
            rack.set_input(id, 0, 0, 1.0),
            Err(RackError::InvalidChannel { channel: 0 })
        );
        assert_eq!(
            rack.output(id, 0, MAX_CHANNELS),
            Err(RackError::InvalidChannel {
                channel: MAX_CHANNELS
            })
        );
        assert_eq!(
            rack.set_param(id, 4, 1.0),
            Err(RackError::InvalidParam { param: 4 })
        );

        let chord = rack.add(chord_key());
        assert_eq!(
            rack.set_param(chord, 0, 1.0),
            Err(RackError::InvalidParam { param: 0 })
        );
    }

    #[test]
    fn test_param_is_constrained() {
        let mut rack = Rack::new(44100.0);
        let id = rack.add(expander());
        rack.set_param(id, 2, 7.0).unwrap();
        assert_eq!(rack.param(id, 2).unwrap(), 4.0);
        rack.set_param(id, 2, -1.4).unwrap();
        assert_eq!(rack.param(id, 2).unwrap(), -1.0);
    }

    #[test]
    fn test_chord_reaches_quantizer() {
        let (mut rack, _, quantizer) = c_only_rack(0.03);
        rack.run(LIGHTS_PERIOD);
        assert_eq!(rack.output(quantizer, 0, 0).unwrap(), 0.0);
        assert_eq!(rack.output_channels(quantizer, 0).unwrap(), 1);
        assert_eq!(rack.panel_theme(quantizer).unwrap(), PanelTheme::Dark);

        rack.set_input(quantizer, 0, 0, 0.7).unwrap();
        rack.step();
        assert_eq!(rack.output(quantizer, 0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_removing_mother_reverts_to_chromatic() {
        let (mut rack, mother, quantizer) = c_only_rack(0.7);
        rack.run(LIGHTS_PERIOD);
        assert_eq!(rack.output(quantizer, 0, 0).unwrap(), 1.0);

        rack.remove(mother).unwrap();
        rack.run(LIGHTS_PERIOD);
        assert_abs_diff_eq!(rack.output(quantizer, 0, 0).unwrap(), 8.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_frames_flip_between_steps() {
        let mut rack = Rack::new(44100.0);
        let mother = rack.add(chord_key());
        rack.add(expander());
        rack.connect_input(mother, 2, 1).unwrap();
        rack.set_input(mother, 2, 0, 0.5).unwrap();

        assert_eq!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );
        rack.step();
        assert_eq!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Chord {
                values: [UNUSED_VALUE, UNUSED_VALUE, 0.5, UNUSED_VALUE],
                theme: PanelTheme::Dark,
            }
        );
        assert_eq!(
            rack.expander_frame(mother, Side::Left).unwrap(),
            ExpanderMessage::Empty
        );
    }

    #[test]
    fn test_remove_drops_frames_for_removed_neighbor() {
        let mut rack = Rack::new(44100.0);
        let mother = rack.add(chord_key());
        let view = rack.add(FourView::default().with_refresh(RefreshCounter::with_phase(0)));
        let quantizer = rack.add(expander());
        rack.step();
        assert_ne!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );
        assert_ne!(
            rack.expander_frame(view, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );

        rack.remove(view).unwrap();
        assert_eq!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );
        assert_eq!(
            rack.expander_frame(quantizer, Side::Left).unwrap(),
            ExpanderMessage::Empty
        );
    }

    #[test]
    fn test_insert_drops_frames_across_new_module() {
        let mut rack = Rack::new(44100.0);
        let mother = rack.add(chord_key());
        rack.add(expander());
        rack.step();
        assert_ne!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );

        rack.insert(1, FourView::default());
        assert_eq!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );
    }

    #[test]
    fn test_disconnect_output() {
        let (mut rack, _, quantizer) = c_only_rack(0.7);
        rack.run(LIGHTS_PERIOD);
        assert_eq!(rack.output_channels(quantizer, 0).unwrap(), 1);

        rack.disconnect_output(quantizer, 0).unwrap();
        assert_eq!(rack.output_channels(quantizer, 0).unwrap(), 0);
        rack.step();
        assert_eq!(rack.output(quantizer, 0, 0).unwrap(), 0.0);
        assert_eq!(
            rack.disconnect_output(quantizer, 4),
            Err(RackError::InvalidPort { port: 4 })
        );
    }

    #[test]
    fn test_unaccepted_right_neighbor_gets_nothing() {
        let mut rack = Rack::new(44100.0);
        let mother = rack.add(chord_key());
        rack.add(chord_key());
        rack.run(32);
        assert_eq!(
            rack.expander_frame(mother, Side::Right).unwrap(),
            ExpanderMessage::Empty
        );
    }

    #[test]
    fn test_reset_restores_chromatic_table() {
        let (mut rack, _, quantizer) = c_only_rack(0.7);
        rack.run(LIGHTS_PERIOD);
        assert_eq!(rack.output(quantizer, 0, 0).unwrap(), 1.0);

        rack.reset();
        rack.step();
        assert_abs_diff_eq!(rack.output(quantizer, 0, 0).unwrap(), 8.0 / 12.0, epsilon = 1e-12);
        assert_eq!(rack.frame(), LIGHTS_PERIOD as u64 + 1);
    }
}
