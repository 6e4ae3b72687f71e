//! Pitch Quantizer
//!
//! Closest-note mapping for V/Oct pitch. A set of enabled pitch classes is
//! compiled into a [`RangeTable`] holding one target note per half-semitone
//! bucket; quantizing a pitch is then a single table lookup plus an octave
//! offset, cheap enough to run on every channel of every frame.
//!
//! # Example
//!
//! ```
//! use chordkey::quantizer::{NoteQuantizer, UNUSED_VALUE};
//!
//! let mut quantizer = NoteQuantizer::new();
//!
//! // Only C is present in the chord
//! quantizer.update(&[0.0, UNUSED_VALUE, UNUSED_VALUE, UNUSED_VALUE]);
//!
//! // Slightly sharp of C snaps back to C
//! assert_eq!(quantizer.quantize(0.03), 0.0);
//! ```

use core::fmt;
use serde::{Deserialize, Serialize};

/// Chord slot value meaning "no input present"
pub const UNUSED_VALUE: f64 = -100.0;

/// Number of chord slots carried between chord modules
pub const CHORD_SIZE: usize = 4;

/// Number of half-semitone buckets in one octave
pub const RANGE_BUCKETS: usize = 24;

/// Lowest candidate note considered when building a range table
const LOWEST_CANDIDATE: i32 = -12;

/// Highest candidate note considered when building a range table
const HIGHEST_CANDIDATE: i32 = 24;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Four chord voltages, each either a pitch or [`UNUSED_VALUE`]
pub type ChordValues = [f64; CHORD_SIZE];

/// A chord with every slot unused
pub const UNUSED_CHORD: ChordValues = [UNUSED_VALUE; CHORD_SIZE];

/// Whether a chord slot holds the unused marker
#[inline]
pub fn is_unused(value: f64) -> bool {
    value == UNUSED_VALUE
}

/// A note identity modulo one octave (0 = C, 11 = B)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);

    /// Create a pitch class, `None` unless `class` is in 0..=11
    pub fn new(class: u8) -> Option<Self> {
        (class < 12).then_some(Self(class))
    }

    /// Pitch class of a semitone number, wrapping negative notes upward
    #[inline]
    pub const fn from_note(note: i32) -> Self {
        Self(note.rem_euclid(12) as u8)
    }

    /// Pitch class of a V/Oct voltage
    ///
    /// The voltage is clamped to ±10 V and shifted positive before rounding,
    /// so the rounding direction is the same on both sides of 0 V.
    pub fn from_voltage(voltage: f64) -> Self {
        let scaled = (voltage.clamp(-10.0, 10.0) + 10.0) * 12.0;
        Self::from_note(libm::round(scaled) as i32)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pitch class with its octave, 0 V = C4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteName {
    pub class: PitchClass,
    pub octave: i32,
}

impl NoteName {
    /// Nearest note to a V/Oct voltage (clamped to ±10 V)
    pub fn from_voltage(voltage: f64) -> Self {
        let note = libm::round(voltage.clamp(-10.0, 10.0) * 12.0) as i32;
        Self {
            class: PitchClass::from_note(note),
            octave: note.div_euclid(12) + 4,
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.octave)
    }
}

/// Set of enabled pitch classes, one bit per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnabledSet(u16);

impl EnabledSet {
    pub const EMPTY: EnabledSet = EnabledSet(0);
    pub const ALL: EnabledSet = EnabledSet(0x0FFF);

    /// Build from a bitmask; bit `n` enables pitch class `n`
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & 0x0FFF)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Enable the pitch class of every chord value that is not unused
    pub fn from_chord(values: &[f64]) -> Self {
        values
            .iter()
            .copied()
            .filter(|&v| !is_unused(v))
            .map(PitchClass::from_voltage)
            .collect()
    }

    pub fn insert(&mut self, class: PitchClass) {
        self.0 |= 1 << class.0;
    }

    pub fn contains(self, class: PitchClass) -> bool {
        self.0 & (1 << class.0) != 0
    }

    /// Whether the class of a semitone number (any octave) is enabled
    #[inline]
    pub const fn contains_note(self, note: i32) -> bool {
        self.0 & (1 << note.rem_euclid(12)) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = PitchClass> {
        (0..12u8).map(PitchClass).filter(move |&c| self.contains(c))
    }
}

impl FromIterator<PitchClass> for EnabledSet {
    fn from_iter<I: IntoIterator<Item = PitchClass>>(iter: I) -> Self {
        let mut set = EnabledSet::EMPTY;
        for class in iter {
            set.insert(class);
        }
        set
    }
}

/// Target semitone of a range bucket
///
/// Buckets `2k - 1` and `2k` share target `k`, so a pitch sitting on a note
/// maps to that note whichever side of the bucket edge rounding puts it.
#[inline]
const fn bucket_target(bucket: usize) -> i32 {
    (bucket as i32 + 1) / 2
}

/// Closest enabled note for each half-semitone bucket of an octave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTable([i32; RANGE_BUCKETS]);

impl RangeTable {
    /// Table with every pitch class enabled
    pub const CHROMATIC: RangeTable = RangeTable::build(EnabledSet::EMPTY);

    /// Build the table for an enabled set; an empty set enables everything.
    ///
    /// Candidates are visited in ascending order, so their distance to the
    /// target falls and then rises; the scan stops at the first enabled
    /// candidate that does not improve on the best so far. Ties keep the
    /// lower note.
    pub const fn build(enabled: EnabledSet) -> Self {
        let any_enabled = !enabled.is_empty();
        let mut ranges = [0; RANGE_BUCKETS];
        let mut bucket = 0;
        while bucket < RANGE_BUCKETS {
            let target = bucket_target(bucket);
            let mut closest_note = 0;
            let mut closest_dist = i32::MAX;
            let mut note = LOWEST_CANDIDATE;
            while note <= HIGHEST_CANDIDATE {
                if !any_enabled || enabled.contains_note(note) {
                    let dist = (target - note).abs();
                    if dist < closest_dist {
                        closest_note = note;
                        closest_dist = dist;
                    } else {
                        break;
                    }
                }
                note += 1;
            }
            ranges[bucket] = closest_note;
            bucket += 1;
        }
        Self(ranges)
    }

    /// Same table as [`RangeTable::build`], scanning every candidate
    pub fn build_exhaustive(enabled: EnabledSet) -> Self {
        let any_enabled = !enabled.is_empty();
        let mut ranges = [0; RANGE_BUCKETS];
        for (bucket, slot) in ranges.iter_mut().enumerate() {
            let target = bucket_target(bucket);
            *slot = (LOWEST_CANDIDATE..=HIGHEST_CANDIDATE)
                .filter(|&note| !any_enabled || enabled.contains_note(note))
                .min_by_key(|&note| (target - note).abs())
                .unwrap_or(0);
        }
        Self(ranges)
    }

    /// Target note of a bucket (0..24)
    pub fn note(&self, bucket: usize) -> i32 {
        self.0[bucket]
    }

    /// Snap a V/Oct pitch onto the table
    ///
    /// The bucket index is split with Euclidean division so negative pitches
    /// land in the octave below with a non-negative bucket. Truncating
    /// division would put them in the wrong octave.
    #[inline]
    pub fn quantize(&self, pitch: f64) -> f64 {
        let range = libm::floor(pitch * RANGE_BUCKETS as f64) as i64;
        let octave = range.div_euclid(RANGE_BUCKETS as i64);
        let bucket = range.rem_euclid(RANGE_BUCKETS as i64) as usize;
        let note = i64::from(self.0[bucket]) + octave * 12;
        note as f64 / 12.0
    }
}

impl Default for RangeTable {
    fn default() -> Self {
        Self::CHROMATIC
    }
}

/// Quantizer restricted to the pitch classes of a chord
#[derive(Debug, Clone, Default)]
pub struct NoteQuantizer {
    enabled: EnabledSet,
    ranges: RangeTable,
}

impl NoteQuantizer {
    /// Create a quantizer with no classes enabled (chromatic)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild_enabled_set(&mut self, chord_values: &[f64]) {
        self.enabled = EnabledSet::from_chord(chord_values);
    }

    pub fn rebuild_range_table(&mut self) {
        self.ranges = RangeTable::build(self.enabled);
    }

    /// Rebuild the enabled set and then the range table
    pub fn update(&mut self, chord_values: &[f64]) {
        self.rebuild_enabled_set(chord_values);
        self.rebuild_range_table();
    }

    #[inline]
    pub fn quantize(&self, pitch: f64) -> f64 {
        self.ranges.quantize(pitch)
    }

    pub fn enabled(&self) -> EnabledSet {
        self.enabled
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn chord(values: &[f64]) -> ChordValues {
        let mut chord = UNUSED_CHORD;
        chord[..values.len()].copy_from_slice(values);
        chord
    }

    #[test]
    fn test_pitch_class_from_voltage() {
        assert_eq!(PitchClass::from_voltage(0.0), PitchClass::C);
        assert_eq!(PitchClass::from_voltage(1.0 / 12.0).index(), 1);
        assert_eq!(PitchClass::from_voltage(-1.0 / 12.0).index(), 11);
        assert_eq!(PitchClass::from_voltage(0.04), PitchClass::C);
        assert_eq!(PitchClass::from_voltage(7.0 / 12.0 + 1.0).index(), 7);
        // Clamped to 10 V, which is a C
        assert_eq!(PitchClass::from_voltage(11.3), PitchClass::C);
        assert_eq!(PitchClass::from_voltage(-42.0), PitchClass::C);
    }

    #[test]
    fn test_pitch_class_names() {
        assert_eq!(PitchClass::C.to_string(), "C");
        assert_eq!(PitchClass::new(6).unwrap().name(), "F#");
        assert!(PitchClass::new(12).is_none());
        assert_eq!(PitchClass::from_note(-1).name(), "B");
    }

    #[test]
    fn test_note_name() {
        assert_eq!(NoteName::from_voltage(0.0).to_string(), "C4");
        assert_eq!(NoteName::from_voltage(-1.0 / 12.0).to_string(), "B3");
        assert_eq!(NoteName::from_voltage(1.75).to_string(), "A5");
    }

    #[test]
    fn test_enabled_set_from_chord() {
        let set = EnabledSet::from_chord(&chord(&[0.0, 4.0 / 12.0, 7.0 / 12.0]));
        assert_eq!(set.len(), 3);
        assert!(set.contains(PitchClass::C));
        assert!(set.contains_note(4));
        assert!(set.contains_note(-5));
        assert!(!set.contains_note(1));

        assert!(EnabledSet::from_chord(&UNUSED_CHORD).is_empty());
    }

    #[test]
    fn test_enabled_set_iter() {
        let set = EnabledSet::from_bits(0b1000_0001_0001);
        let classes: Vec<usize> = set.iter().map(PitchClass::index).collect();
        assert_eq!(classes, vec![0, 4, 11]);
        assert_eq!(EnabledSet::ALL.len(), 12);
    }

    #[test]
    fn test_chromatic_table_is_identity() {
        for bucket in 0..RANGE_BUCKETS {
            assert_eq!(RangeTable::CHROMATIC.note(bucket), (bucket as i32 + 1) / 2);
        }
        assert_eq!(RangeTable::build(EnabledSet::ALL), RangeTable::CHROMATIC);
    }

    #[test]
    fn test_single_class_table() {
        let table = RangeTable::build(EnabledSet::from_bits(1));
        assert_eq!(table.note(0), 0);
        // Target 6 is equidistant from 0 and 12; the lower note wins
        assert_eq!(table.note(11), 0);
        assert_eq!(table.note(12), 0);
        assert_eq!(table.note(13), 12);
        assert_eq!(table.note(23), 12);
    }

    #[test]
    fn test_early_exit_matches_exhaustive_scan() {
        for bits in 0..4096u16 {
            let set = EnabledSet::from_bits(bits);
            assert_eq!(
                RangeTable::build(set),
                RangeTable::build_exhaustive(set),
                "tables differ for enabled set {:012b}",
                bits
            );
        }
    }

    #[test]
    fn test_quantize_idempotent() {
        for bits in [0u16, 0b1, 0b1001_0001, 0b1010_1011_0101, 0b0100_0000_0000] {
            let table = RangeTable::build(EnabledSet::from_bits(bits));
            let mut pitch = -3.0;
            while pitch < 3.0 {
                let once = table.quantize(pitch);
                assert_eq!(table.quantize(once), once, "pitch {}", pitch);
                pitch += 0.0007;
            }
        }
    }

    #[test]
    fn test_quantize_octave_shift() {
        for bits in [0u16, 0b1, 0b1001_0001, 0b1010_1011_0101] {
            let table = RangeTable::build(EnabledSet::from_bits(bits));
            for k in -200..200 {
                let x = f64::from(k) / 64.0;
                assert_abs_diff_eq!(
                    table.quantize(1.0 + x),
                    table.quantize(x) + 1.0,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_chromatic_rounds_to_semitones() {
        for note in -120..=120 {
            let pitch = f64::from(note) / 12.0;
            assert_eq!(RangeTable::CHROMATIC.quantize(pitch), pitch);
        }
    }

    #[test]
    fn test_quantize_single_c() {
        let mut quantizer = NoteQuantizer::new();
        quantizer.update(&chord(&[0.0]));
        assert_eq!(quantizer.enabled(), EnabledSet::from_bits(1));
        assert_eq!(quantizer.quantize(0.03), 0.0);
        assert_eq!(quantizer.quantize(0.4), 0.0);
        assert_eq!(quantizer.quantize(0.6), 1.0);
        assert_eq!(quantizer.quantize(-0.03), 0.0);
    }

    #[test]
    fn test_quantize_unused_chord_boundaries() {
        let mut quantizer = NoteQuantizer::new();
        quantizer.update(&UNUSED_CHORD);
        assert!(quantizer.enabled().is_empty());

        // A quarter semitone up sits in bucket 1, which targets C#
        assert_abs_diff_eq!(quantizer.quantize(0.0417), 1.0 / 12.0, epsilon = 1e-12);
        assert_eq!(quantizer.quantize(0.0416), 0.0);

        // pitch * 24 == 3 exactly selects bucket 3 (target D)
        assert_abs_diff_eq!(quantizer.quantize(0.125), 2.0 / 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            quantizer.quantize(0.125 - 1e-9),
            1.0 / 12.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_quantize_negative_pitch_uses_octave_below() {
        let mut quantizer = NoteQuantizer::new();
        quantizer.update(&chord(&[7.0 / 12.0]));
        // -0.3 V lands in the G below C
        assert_abs_diff_eq!(quantizer.quantize(-0.3), -5.0 / 12.0, epsilon = 1e-12);
        // Bucket 2 of the octave below targets C# below, equidistant from
        // two Gs; the lower one wins
        assert_abs_diff_eq!(quantizer.quantize(-0.9), -1.0 - 5.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quantize_is_total() {
        let table = RangeTable::build(EnabledSet::from_bits(0b101));
        assert!(table.quantize(f64::MAX).is_finite());
        assert!(table.quantize(f64::MIN).is_finite());
        assert_eq!(table.quantize(f64::NAN), 0.0);
    }
}
