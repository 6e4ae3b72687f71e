//! Rack Modules
//!
//! The chord family (a chord source, a four-channel quantizing expander and
//! a chord viewer) and the CV expander for gate sequencers. Chord
//! modules pass their chord to the right through the expander link, one
//! hop per input refresh.

use crate::expander::{CvFrame, ExpanderBus, ExpanderMessage, KindSet, ModuleKind, PanelTheme};
use crate::port::{ModuleIo, ParamDef, PortDef, PortSpec, ProcessArgs, RackModule, SignalKind};
use crate::quantizer::{
    is_unused, ChordValues, NoteName, NoteQuantizer, RangeTable, CHORD_SIZE, UNUSED_CHORD,
    UNUSED_VALUE,
};
use crate::refresh::{RefreshCounter, Throttle, EXPANDER_REFRESH_STEP_SKIPS};

/// Modules whose right-going chord frames a viewer will read
const CHORD_SOURCES: KindSet = KindSet::of(&[
    ModuleKind::ChordKey,
    ModuleKind::FourView,
    ModuleKind::ChordKeyExpander,
]);

/// Mothers a quantizing expander takes its chord from
const CHORD_MOTHERS: KindSet = KindSet::of(&[ModuleKind::ChordKey]);

/// Modules a chord module forwards its chord to
const CHORD_SINKS: KindSet = KindSet::of(&[ModuleKind::FourView, ModuleKind::ChordKeyExpander]);

/// Mothers a CV expander can attach to
const SEQUENCER_MOTHERS: KindSet = KindSet::of(&[ModuleKind::GateSeq64]);

/// Highest pitch voltage handled by the chord modules
const PITCH_LIMIT: f64 = 10.0;

/// Displayed name of each chord slot
pub type NoteNames = [Option<NoteName>; CHORD_SIZE];

fn numbered_ports(prefix: &str, kind: SignalKind) -> Vec<PortDef> {
    (0..CHORD_SIZE)
        .map(|i| PortDef::new(i, format!("{}{}", prefix, i + 1), kind))
        .collect()
}

fn chord_port_spec() -> PortSpec {
    PortSpec {
        inputs: numbered_ports("cv", SignalKind::VoltPerOctave),
        outputs: numbered_ports("out", SignalKind::VoltPerOctave),
    }
}

/// Chord carried by a left neighbor of an accepted kind
fn chord_from_left(bus: &ExpanderBus<'_>, accepts: KindSet) -> Option<(ChordValues, PanelTheme)> {
    match bus.receive_left(accepts) {
        Some(ExpanderMessage::Chord { values, theme }) => Some((*values, *theme)),
        _ => None,
    }
}

/// Chord Source
///
/// Four CV inputs form a chord: a patched input contributes its voltage,
/// an unpatched one is unused. Each output carries its chord note rounded
/// to the nearest semitone (0 V when unused). The chord is published to a
/// FourView or ChordKeyExpander on the right.
pub struct ChordKey {
    chord_values: ChordValues,
    panel_theme: PanelTheme,
    refresh: RefreshCounter,
    spec: PortSpec,
}

impl ChordKey {
    pub fn new(panel_theme: PanelTheme) -> Self {
        Self {
            chord_values: UNUSED_CHORD,
            panel_theme,
            refresh: RefreshCounter::new(),
            spec: chord_port_spec(),
        }
    }

    pub fn with_refresh(mut self, refresh: RefreshCounter) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn chord_values(&self) -> &ChordValues {
        &self.chord_values
    }
}

impl Default for ChordKey {
    fn default() -> Self {
        Self::new(PanelTheme::default())
    }
}

impl RackModule for ChordKey {
    fn kind(&self) -> ModuleKind {
        ModuleKind::ChordKey
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn process(&mut self, _args: &ProcessArgs, io: &mut ModuleIo, bus: &mut ExpanderBus<'_>) {
        let inputs_tick = self.refresh.process_inputs();
        if inputs_tick {
            for (value, input) in self.chord_values.iter_mut().zip(&io.inputs) {
                *value = if input.is_connected() {
                    input.voltage(0).clamp(-PITCH_LIMIT, PITCH_LIMIT)
                } else {
                    UNUSED_VALUE
                };
            }
        }
        self.refresh.process_lights();

        for (output, &value) in io.outputs.iter_mut().zip(&self.chord_values) {
            if output.is_connected() {
                let note = if is_unused(value) {
                    0.0
                } else {
                    RangeTable::CHROMATIC.quantize(value)
                };
                output.set_voltage(note, 0);
            }
        }

        if inputs_tick {
            bus.send_right(
                CHORD_SINKS,
                ExpanderMessage::Chord {
                    values: self.chord_values,
                    theme: self.panel_theme,
                },
            );
        }
    }

    fn reset(&mut self) {
        self.chord_values = UNUSED_CHORD;
    }

    fn panel_theme(&self) -> PanelTheme {
        self.panel_theme
    }
}

/// Four-Channel Chord Quantizer
///
/// Quantizes four polyphonic CV inputs to the pitch classes of the chord
/// received from a ChordKey on its left. Each channel has an octave knob (-4..=4) added
/// before quantization; an unpatched input quantizes the knob alone. With
/// no ChordKey on the left, or a chord with no notes, every semitone is
/// allowed.
///
/// Chord and theme are read every 16 frames, the lookup table and output
/// channel counts are refreshed every 256 frames, and every connected
/// output channel is quantized every frame.
pub struct ChordKeyExpander {
    chord_values: ChordValues,
    quantizer: NoteQuantizer,
    panel_theme: PanelTheme,
    refresh: RefreshCounter,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl ChordKeyExpander {
    pub fn new(panel_theme: PanelTheme) -> Self {
        let mut module = Self {
            chord_values: UNUSED_CHORD,
            quantizer: NoteQuantizer::new(),
            panel_theme,
            refresh: RefreshCounter::new(),
            spec: chord_port_spec(),
            params: (0..CHORD_SIZE)
                .map(|i| {
                    ParamDef::new(i, format!("Oct channel {}", i + 1), -4.0, 4.0, 0.0).snapped()
                })
                .collect(),
        };
        module.reset_non_json();
        module
    }

    pub fn with_refresh(mut self, refresh: RefreshCounter) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn chord_values(&self) -> &ChordValues {
        &self.chord_values
    }

    pub fn quantizer(&self) -> &NoteQuantizer {
        &self.quantizer
    }

    pub fn toggle_panel_theme(&mut self) {
        self.panel_theme = self.panel_theme.toggled();
    }

    fn reset_non_json(&mut self) {
        self.chord_values = UNUSED_CHORD;
        self.quantizer.update(&self.chord_values);
    }
}

impl Default for ChordKeyExpander {
    fn default() -> Self {
        Self::new(PanelTheme::default())
    }
}

impl RackModule for ChordKeyExpander {
    fn kind(&self) -> ModuleKind {
        ModuleKind::ChordKeyExpander
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn process(&mut self, _args: &ProcessArgs, io: &mut ModuleIo, bus: &mut ExpanderBus<'_>) {
        let inputs_tick = self.refresh.process_inputs();
        if inputs_tick {
            match chord_from_left(bus, CHORD_MOTHERS) {
                Some((values, theme)) => {
                    self.chord_values = values;
                    self.panel_theme = theme;
                }
                None => self.chord_values = UNUSED_CHORD,
            }
        }

        if self.refresh.process_lights() {
            self.quantizer.update(&self.chord_values);
            for (output, input) in io.outputs.iter_mut().zip(&io.inputs) {
                output.set_channels(input.channels());
            }
        }

        let ModuleIo {
            inputs,
            outputs,
            params,
        } = io;
        for ((output, input), &octave) in outputs.iter_mut().zip(inputs.iter()).zip(params.iter())
        {
            if !output.is_connected() {
                continue;
            }
            for c in 0..output.channels().max(1) {
                let mut pitch = octave;
                if input.is_connected() {
                    pitch += input.voltage(c);
                }
                let pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
                output.set_voltage(self.quantizer.quantize(pitch), c);
            }
        }

        if inputs_tick {
            bus.send_right(
                CHORD_SINKS,
                ExpanderMessage::Chord {
                    values: self.chord_values,
                    theme: self.panel_theme,
                },
            );
        }
    }

    fn reset(&mut self) {
        self.reset_non_json();
    }

    fn panel_theme(&self) -> PanelTheme {
        self.panel_theme
    }
}

/// Chord Viewer
///
/// Shows the note name of each chord slot. A patched input overrides the
/// chord slot received from the left; the resulting chord is passed
/// through to the outputs (0 V when unused) and on to the right.
pub struct FourView {
    chord_values: ChordValues,
    note_names: NoteNames,
    panel_theme: PanelTheme,
    refresh: RefreshCounter,
    spec: PortSpec,
}

impl FourView {
    pub fn new(panel_theme: PanelTheme) -> Self {
        Self {
            chord_values: UNUSED_CHORD,
            note_names: [None; CHORD_SIZE],
            panel_theme,
            refresh: RefreshCounter::new(),
            spec: chord_port_spec(),
        }
    }

    pub fn with_refresh(mut self, refresh: RefreshCounter) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn chord_values(&self) -> &ChordValues {
        &self.chord_values
    }

    /// Displayed names, `None` for unused slots; refreshed every 256 frames
    pub fn note_names(&self) -> &NoteNames {
        &self.note_names
    }
}

impl Default for FourView {
    fn default() -> Self {
        Self::new(PanelTheme::default())
    }
}

impl RackModule for FourView {
    fn kind(&self) -> ModuleKind {
        ModuleKind::FourView
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn process(&mut self, _args: &ProcessArgs, io: &mut ModuleIo, bus: &mut ExpanderBus<'_>) {
        let inputs_tick = self.refresh.process_inputs();
        if inputs_tick {
            let upstream = match chord_from_left(bus, CHORD_SOURCES) {
                Some((values, theme)) => {
                    self.panel_theme = theme;
                    values
                }
                None => UNUSED_CHORD,
            };
            for ((value, input), upstream) in self
                .chord_values
                .iter_mut()
                .zip(&io.inputs)
                .zip(upstream)
            {
                *value = if input.is_connected() {
                    input.voltage(0).clamp(-PITCH_LIMIT, PITCH_LIMIT)
                } else {
                    upstream
                };
            }
        }

        if self.refresh.process_lights() {
            for (name, &value) in self.note_names.iter_mut().zip(&self.chord_values) {
                *name = (!is_unused(value)).then(|| NoteName::from_voltage(value));
            }
        }

        for (output, &value) in io.outputs.iter_mut().zip(&self.chord_values) {
            if output.is_connected() {
                output.set_voltage(if is_unused(value) { 0.0 } else { value }, 0);
            }
        }

        if inputs_tick {
            bus.send_right(
                CHORD_SINKS,
                ExpanderMessage::Chord {
                    values: self.chord_values,
                    theme: self.panel_theme,
                },
            );
        }
    }

    fn reset(&mut self) {
        self.chord_values = UNUSED_CHORD;
        self.note_names = [None; CHORD_SIZE];
    }

    fn panel_theme(&self) -> PanelTheme {
        self.panel_theme
    }
}

/// Gate Sequencer CV Expander
///
/// Sends six CV values to a GateSeq64 on its left every four frames
/// and follows the mother's panel theme.
pub struct GateSeq64Expander {
    panel_theme: PanelTheme,
    throttle: Throttle,
    spec: PortSpec,
}

impl GateSeq64Expander {
    pub const GATE_INPUT: usize = 0;
    pub const PROB_INPUT: usize = 1;
    pub const WRITE_INPUT: usize = 2;
    pub const WRITE1_INPUT: usize = 3;
    pub const WRITE0_INPUT: usize = 4;
    pub const STEPL_INPUT: usize = 5;

    pub fn new(panel_theme: PanelTheme) -> Self {
        Self {
            panel_theme,
            throttle: Throttle::new(EXPANDER_REFRESH_STEP_SKIPS),
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(Self::GATE_INPUT, "gate", SignalKind::CvBipolar),
                    PortDef::new(Self::PROB_INPUT, "prob", SignalKind::CvBipolar),
                    PortDef::new(Self::WRITE_INPUT, "write", SignalKind::Trigger),
                    PortDef::new(Self::WRITE1_INPUT, "write1", SignalKind::Trigger),
                    PortDef::new(Self::WRITE0_INPUT, "write0", SignalKind::Trigger),
                    PortDef::new(Self::STEPL_INPUT, "stepl", SignalKind::CvBipolar),
                ],
                outputs: vec![],
            },
        }
    }

    fn cv_frame(io: &ModuleIo) -> CvFrame {
        let patched = |id: usize| {
            let input = io.input(id);
            input.is_connected().then(|| input.voltage(0))
        };
        CvFrame {
            gate: patched(Self::GATE_INPUT),
            prob: patched(Self::PROB_INPUT),
            write: io.input(Self::WRITE_INPUT).voltage(0),
            write1: io.input(Self::WRITE1_INPUT).voltage(0),
            write0: io.input(Self::WRITE0_INPUT).voltage(0),
            step_len: io.input(Self::STEPL_INPUT).voltage(0),
        }
    }
}

impl Default for GateSeq64Expander {
    fn default() -> Self {
        Self::new(PanelTheme::default())
    }
}

impl RackModule for GateSeq64Expander {
    fn kind(&self) -> ModuleKind {
        ModuleKind::GateSeq64Expander
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn process(&mut self, _args: &ProcessArgs, io: &mut ModuleIo, bus: &mut ExpanderBus<'_>) {
        if !self.throttle.tick() {
            return;
        }
        let frame = Self::cv_frame(io);
        if bus.send_left(SEQUENCER_MOTHERS, ExpanderMessage::Cv(frame)) {
            if let Some(theme) = bus.receive_left(SEQUENCER_MOTHERS).and_then(|m| m.theme()) {
                self.panel_theme = theme;
            }
        }
    }

    fn reset(&mut self) {
        self.throttle.reset();
    }

    fn panel_theme(&self) -> PanelTheme {
        self.panel_theme
    }
}
