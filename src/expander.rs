//! Expander Link
//!
//! Adjacent modules in a rack exchange small fixed-size frames without
//! cables. Every module owns one outgoing [`DoubleBuffer`] per side: it
//! writes the producer frame and requests a flip, the rack flips between
//! frames, and the neighbor reads the latest complete frame read-only.
//! Neither side allocates or locks, and a frame is never observed half
//! written.
//!
//! Neighbors are identified by a closed [`ModuleKind`] and each receiver
//! decides which kinds it accepts through a [`KindSet`]. A missing or
//! unaccepted neighbor reads as absence, never as an error.

use crate::quantizer::ChordValues;
use serde::{Deserialize, Serialize};

/// Every kind of module that can sit in a rack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Chord source publishing four chord voltages to its right
    ChordKey,
    /// Four-channel quantizer driven by the chord on its left
    ChordKeyExpander,
    /// Chord viewer showing note names
    FourView,
    /// Gate sequencer mother; provided by the host, not built here
    GateSeq64,
    /// CV expander sitting right of a gate sequencer
    GateSeq64Expander,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 5] = [
        ModuleKind::ChordKey,
        ModuleKind::ChordKeyExpander,
        ModuleKind::FourView,
        ModuleKind::GateSeq64,
        ModuleKind::GateSeq64Expander,
    ];

    /// Stable identifier used in saved racks and logs
    pub fn type_id(&self) -> &'static str {
        match self {
            ModuleKind::ChordKey => "chord_key",
            ModuleKind::ChordKeyExpander => "chord_key_expander",
            ModuleKind::FourView => "four_view",
            ModuleKind::GateSeq64 => "gate_seq_64",
            ModuleKind::GateSeq64Expander => "gate_seq_64_expander",
        }
    }

    #[inline]
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of module kinds, used to declare acceptable neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindSet(u8);

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);

    pub const fn of(kinds: &[ModuleKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub const fn contains(self, kind: ModuleKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Panel color scheme, carried along chord chains so expanders match
/// their mother
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelTheme {
    #[default]
    Light,
    Dark,
}

impl PanelTheme {
    pub fn from_dark(dark: bool) -> Self {
        if dark {
            PanelTheme::Dark
        } else {
            PanelTheme::Light
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            PanelTheme::Light => PanelTheme::Dark,
            PanelTheme::Dark => PanelTheme::Light,
        }
    }
}

/// CV values a gate sequencer expander sends to its mother
///
/// Gate and probability are only meaningful when patched, so they are
/// absent rather than 0 V when their inputs are unconnected.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CvFrame {
    pub gate: Option<f64>,
    pub prob: Option<f64>,
    pub write: f64,
    pub write1: f64,
    pub write0: f64,
    pub step_len: f64,
}

/// Typed payload of one expander frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ExpanderMessage {
    /// Nothing published yet
    #[default]
    Empty,
    /// Chord voltages (or [`crate::quantizer::UNUSED_VALUE`]) and panel theme
    Chord {
        values: ChordValues,
        theme: PanelTheme,
    },
    /// CV values
    Cv(CvFrame),
    /// Panel theme only
    Theme(PanelTheme),
}

impl ExpanderMessage {
    pub fn theme(&self) -> Option<PanelTheme> {
        match self {
            ExpanderMessage::Chord { theme, .. } | ExpanderMessage::Theme(theme) => Some(*theme),
            ExpanderMessage::Empty | ExpanderMessage::Cv(_) => None,
        }
    }
}

/// Producer/consumer frame pair owned by the sending module
///
/// The producer frame is private to the sender. [`latest`](Self::latest)
/// returns the consumer frame, the last one completed before a flip.
#[derive(Debug, Clone)]
pub struct DoubleBuffer<T> {
    frames: [T; 2],
    producer: usize,
    flip_requested: bool,
}

impl<T: Copy> DoubleBuffer<T> {
    pub fn new(initial: T) -> Self {
        Self {
            frames: [initial; 2],
            producer: 0,
            flip_requested: false,
        }
    }

    /// Frame being written; not visible to the neighbor until a flip
    pub fn producer_mut(&mut self) -> &mut T {
        &mut self.frames[self.producer]
    }

    /// Latest complete frame
    pub fn latest(&self) -> &T {
        &self.frames[1 - self.producer]
    }

    pub fn request_flip(&mut self) {
        self.flip_requested = true;
    }

    /// Write a whole frame and request a flip
    pub fn publish(&mut self, frame: T) {
        *self.producer_mut() = frame;
        self.request_flip();
    }

    pub fn is_flip_requested(&self) -> bool {
        self.flip_requested
    }

    /// Swap producer and consumer roles if a flip was requested
    pub fn flip_if_requested(&mut self) -> bool {
        if !self.flip_requested {
            return false;
        }
        self.producer = 1 - self.producer;
        self.flip_requested = false;
        true
    }

    /// Overwrite both frames and drop any pending flip
    pub fn clear(&mut self, frame: T) {
        self.frames = [frame; 2];
        self.flip_requested = false;
    }
}

impl<T: Copy + Default> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Which neighbor a frame is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// The two outgoing buffers of one module
#[derive(Debug, Clone, Default)]
pub struct Expanders {
    /// Frames for the left neighbor
    pub left: DoubleBuffer<ExpanderMessage>,
    /// Frames for the right neighbor
    pub right: DoubleBuffer<ExpanderMessage>,
}

impl Expanders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side(&self, side: Side) -> &DoubleBuffer<ExpanderMessage> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut DoubleBuffer<ExpanderMessage> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Flip both sides where requested; called by the rack between frames
    pub fn flip_requested(&mut self) {
        self.left.flip_if_requested();
        self.right.flip_if_requested();
    }

    /// Drop every frame published towards one side
    pub fn clear_side(&mut self, side: Side) {
        self.side_mut(side).clear(ExpanderMessage::Empty);
    }
}

/// An adjacent module as seen during one process call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub kind: ModuleKind,
    /// Latest frame the neighbor published towards us
    pub message: ExpanderMessage,
}

/// Per-call expander view handed to a module's process routine
pub struct ExpanderBus<'a> {
    left: Option<Neighbor>,
    right: Option<Neighbor>,
    outgoing: &'a mut Expanders,
}

impl<'a> ExpanderBus<'a> {
    pub fn new(
        left: Option<Neighbor>,
        right: Option<Neighbor>,
        outgoing: &'a mut Expanders,
    ) -> Self {
        Self {
            left,
            right,
            outgoing,
        }
    }

    /// Latest frame from the left neighbor, if present and accepted
    pub fn receive_left(&self, accepts: KindSet) -> Option<&ExpanderMessage> {
        Self::accepted(self.left.as_ref(), accepts)
    }

    /// Latest frame from the right neighbor, if present and accepted
    pub fn receive_right(&self, accepts: KindSet) -> Option<&ExpanderMessage> {
        Self::accepted(self.right.as_ref(), accepts)
    }

    /// Publish towards the left neighbor if it is present and accepted
    pub fn send_left(&mut self, accepts: KindSet, message: ExpanderMessage) -> bool {
        self.send(Side::Left, accepts, message)
    }

    /// Publish towards the right neighbor if it is present and accepted
    pub fn send_right(&mut self, accepts: KindSet, message: ExpanderMessage) -> bool {
        self.send(Side::Right, accepts, message)
    }

    fn send(&mut self, side: Side, accepts: KindSet, message: ExpanderMessage) -> bool {
        let neighbor = match side {
            Side::Left => self.left,
            Side::Right => self.right,
        };
        match neighbor {
            Some(n) if accepts.contains(n.kind) => {
                self.outgoing.side_mut(side).publish(message);
                true
            }
            _ => false,
        }
    }

    fn accepted(neighbor: Option<&Neighbor>, accepts: KindSet) -> Option<&ExpanderMessage> {
        neighbor
            .filter(|n| accepts.contains(n.kind))
            .map(|n| &n.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantizer::UNUSED_CHORD;

    const CHORD_SOURCES: KindSet = KindSet::of(&[ModuleKind::ChordKey, ModuleKind::FourView]);

    fn chord_message(values: ChordValues) -> ExpanderMessage {
        ExpanderMessage::Chord {
            values,
            theme: PanelTheme::Dark,
        }
    }

    #[test]
    fn test_kind_set() {
        assert!(CHORD_SOURCES.contains(ModuleKind::ChordKey));
        assert!(CHORD_SOURCES.contains(ModuleKind::FourView));
        assert!(!CHORD_SOURCES.contains(ModuleKind::GateSeq64));
        assert!(KindSet::EMPTY.is_empty());
        for kind in ModuleKind::ALL {
            assert!(!KindSet::EMPTY.contains(kind));
            assert!(KindSet::of(&ModuleKind::ALL).contains(kind));
        }
    }

    #[test]
    fn test_kind_type_ids_unique() {
        let mut ids: Vec<&str> = ModuleKind::ALL.iter().map(|k| k.type_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ModuleKind::ALL.len());
    }

    #[test]
    fn test_panel_theme() {
        assert_eq!(PanelTheme::from_dark(true), PanelTheme::Dark);
        assert_eq!(PanelTheme::from_dark(false), PanelTheme::Light);
        assert_eq!(PanelTheme::Light.toggled(), PanelTheme::Dark);
        assert_eq!(PanelTheme::Dark.toggled(), PanelTheme::Light);
    }

    #[test]
    fn test_double_buffer_publish_needs_flip() {
        let mut buffer = DoubleBuffer::new(0u32);
        buffer.publish(7);
        assert_eq!(*buffer.latest(), 0);
        assert!(buffer.is_flip_requested());

        assert!(buffer.flip_if_requested());
        assert_eq!(*buffer.latest(), 7);
        assert!(!buffer.is_flip_requested());

        // No request, no flip
        *buffer.producer_mut() = 9;
        assert!(!buffer.flip_if_requested());
        assert_eq!(*buffer.latest(), 7);
    }

    #[test]
    fn test_double_buffer_clear() {
        let mut buffer = DoubleBuffer::new(1u8);
        buffer.publish(2);
        buffer.clear(0);
        assert!(!buffer.flip_if_requested());
        assert_eq!(*buffer.latest(), 0);
    }

    #[test]
    fn test_bus_accepts_known_neighbor() {
        let mut outgoing = Expanders::new();
        let left = Neighbor {
            kind: ModuleKind::ChordKey,
            message: chord_message([0.0; 4]),
        };
        let bus = ExpanderBus::new(Some(left), None, &mut outgoing);
        assert_eq!(bus.receive_left(CHORD_SOURCES), Some(&chord_message([0.0; 4])));
        assert!(bus.receive_right(CHORD_SOURCES).is_none());
    }

    #[test]
    fn test_bus_rejects_unknown_neighbor() {
        let mut outgoing = Expanders::new();
        let left = Neighbor {
            kind: ModuleKind::GateSeq64Expander,
            message: chord_message([0.0; 4]),
        };
        let mut bus = ExpanderBus::new(Some(left), None, &mut outgoing);
        assert!(bus.receive_left(CHORD_SOURCES).is_none());
        assert!(!bus.send_left(CHORD_SOURCES, ExpanderMessage::Theme(PanelTheme::Dark)));
        assert!(!outgoing.left.is_flip_requested());
    }

    #[test]
    fn test_bus_send_writes_own_buffer() {
        let mut outgoing = Expanders::new();
        let right = Neighbor {
            kind: ModuleKind::FourView,
            message: ExpanderMessage::Empty,
        };
        let mut bus = ExpanderBus::new(None, Some(right), &mut outgoing);
        assert!(bus.send_right(CHORD_SOURCES, chord_message(UNUSED_CHORD)));

        assert!(outgoing.right.is_flip_requested());
        outgoing.flip_requested();
        assert_eq!(*outgoing.right.latest(), chord_message(UNUSED_CHORD));
        assert_eq!(*outgoing.left.latest(), ExpanderMessage::Empty);
    }

    #[test]
    fn test_message_theme() {
        assert_eq!(chord_message(UNUSED_CHORD).theme(), Some(PanelTheme::Dark));
        assert_eq!(ExpanderMessage::Theme(PanelTheme::Light).theme(), Some(PanelTheme::Light));
        assert_eq!(ExpanderMessage::Empty.theme(), None);
        assert_eq!(ExpanderMessage::Cv(CvFrame::default()).theme(), None);
    }

    #[test]
    fn test_clear_side() {
        let mut outgoing = Expanders::new();
        outgoing.left.publish(ExpanderMessage::Theme(PanelTheme::Dark));
        outgoing.right.publish(chord_message([0.0; 4]));
        outgoing.flip_requested();

        outgoing.clear_side(Side::Right);
        assert_eq!(*outgoing.right.latest(), ExpanderMessage::Empty);
        assert_eq!(*outgoing.left.latest(), ExpanderMessage::Theme(PanelTheme::Dark));
    }
}
