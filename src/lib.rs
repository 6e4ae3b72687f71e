//! # chordkey: Chord Quantizing Expanders
//!
//! `chordkey` implements a family of rack modules that share a chord
//! through the expander link between adjacent modules, and quantize
//! polyphonic pitch CV to the pitch classes of that chord.
//!
//! ## Architecture
//!
//! - **Quantizer** - pitch classes, enabled sets and the 24-bucket range
//!   table that snaps 1V/octave pitch to the nearest enabled semitone
//! - **Expander link** - typed frames in sender-owned double buffers,
//!   exchanged with neighbors of accepted kinds only
//! - **Modules** - ChordKey, ChordKeyExpander, FourView and the
//!   GateSeq64 CV expander
//! - **Rack** - a row of modules processed frame by frame, with saved
//!   rack definitions and a module registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chordkey::prelude::*;
//!
//! let mut rack = Rack::new(44100.0);
//! let chord = rack.add(ChordKey::new(PanelTheme::Light));
//! let quantizer = rack.add(ChordKeyExpander::new(PanelTheme::Light));
//!
//! // A C major triad on the chord source
//! for (port, volts) in [0.0, 4.0 / 12.0, 7.0 / 12.0].into_iter().enumerate() {
//!     rack.connect_input(chord, port, 1).unwrap();
//!     rack.set_input(chord, port, 0, volts).unwrap();
//! }
//!
//! // Quantize one pitch CV
//! rack.connect_input(quantizer, 0, 1).unwrap();
//! rack.set_input(quantizer, 0, 0, 0.2).unwrap();
//! rack.connect_output(quantizer, 0).unwrap();
//!
//! rack.run(1024);
//! let quantized = rack.output(quantizer, 0, 0).unwrap();
//! ```

pub mod config;
pub mod expander;
pub mod modules;
pub mod port;
pub mod quantizer;
pub mod rack;
pub mod refresh;
pub mod serialize;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigError, Settings};
    pub use crate::expander::{
        CvFrame, DoubleBuffer, ExpanderBus, ExpanderMessage, Expanders, KindSet, ModuleKind,
        Neighbor, PanelTheme, Side,
    };
    pub use crate::modules::{ChordKey, ChordKeyExpander, FourView, GateSeq64Expander};
    pub use crate::port::{
        ModuleIo, ParamDef, ParamId, Port, PortDef, PortId, PortSpec, ProcessArgs, RackModule,
        SignalKind, MAX_CHANNELS,
    };
    pub use crate::quantizer::{
        EnabledSet, NoteName, NoteQuantizer, PitchClass, RangeTable, UNUSED_VALUE,
    };
    pub use crate::rack::{ModuleId, Rack, RackError};
    pub use crate::refresh::{RefreshCounter, Throttle};
    pub use crate::serialize::{ModuleDef, ModuleRegistry, RackDef};
}
