//! Symbolic tag table.
//!
//! Tag membership is fixed at startup; values are volatile. Every
//! successful read replaces the stored value with a fresh pseudo-random
//! DINT and stamps the read time, so a polling client sees live-looking
//! data without any process actually running behind it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use rand::Rng;

use crate::cip_path::RequestPath;

/// CIP type code for a 32-bit signed integer.
pub const DINT_TYPE_CODE: u16 = 0x00C4;

/// Bounds of the simulated values, inclusive.
pub const VALUE_MIN: i32 = -1_000_000;
pub const VALUE_MAX: i32 = 1_000_000;

const NAME_PREFIXES: [&str; 8] = [
    "Sensor", "Motor", "Valve", "Pump", "Drive", "Level", "Temp", "Flow",
];
const NAME_SUFFIXES: [char; 4] = ['A', 'B', 'C', 'D'];

#[derive(Debug)]
struct TagSlot {
    value: i32,
    last_read_at: Option<Instant>,
}

/// The result of one successful tag read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagReading {
    /// Zero-based index of the tag that answered.
    pub index: usize,
    /// The freshly generated value, identical to what is now stored.
    pub value: i32,
}

/// Fixed-membership tag table with per-tag interior locking.
///
/// Name and positional indexes are immutable after construction, so lookups
/// never take a lock; only the value slot of the tag being read is locked,
/// and reads of different tags do not contend.
#[derive(Debug)]
pub struct TagStore {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    by_address: HashMap<String, usize>,
    slots: Vec<Mutex<TagSlot>>,
}

impl TagStore {
    /// Builds the default tag population: `count` tags named from a fixed
    /// prefix/suffix rotation (`Sensor1A`, `Motor2B`, ...), each also
    /// addressable as `Tag_<n>` with a 1-based index.
    pub fn generate(count: usize) -> Self {
        let names = (1..=count).map(generated_name).collect();
        Self::from_names(names)
    }

    /// Builds a store over caller-chosen tag names.
    pub fn from_names(names: Vec<String>) -> Self {
        let mut rng = rand::thread_rng();
        let by_name = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let by_address = (0..names.len())
            .map(|i| (format!("Tag_{}", i + 1), i))
            .collect();
        let slots = (0..names.len())
            .map(|_| {
                Mutex::new(TagSlot {
                    value: rng.gen_range(VALUE_MIN..=VALUE_MAX),
                    last_read_at: None,
                })
            })
            .collect();

        Self {
            names,
            by_name,
            by_address,
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The tag's symbolic name.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Resolves a request path to a tag index: symbolic name first, then
    /// the `Tag_<n>` positional address, then a trailing decimal in the
    /// symbol treated as a 1-based index.
    pub fn resolve(&self, path: &RequestPath) -> Option<usize> {
        let symbol = path.tag_name()?;
        if let Some(&index) = self.by_name.get(symbol) {
            return Some(index);
        }
        if let Some(&index) = self.by_address.get(symbol) {
            return Some(index);
        }
        let ordinal = trailing_decimal(symbol)?;
        if ordinal >= 1 && ordinal <= self.names.len() {
            return Some(ordinal - 1);
        }
        None
    }

    /// Reads the tag a path names, refreshing its value.
    pub fn read_path(&self, path: &RequestPath) -> Option<TagReading> {
        self.read_index(self.resolve(path)?)
    }

    /// Reads by index: generates a fresh value, stores it, stamps the read
    /// time, and returns the same value. The slot lock makes the
    /// refresh-and-reply pair atomic.
    pub fn read_index(&self, index: usize) -> Option<TagReading> {
        let slot = self.slots.get(index)?;
        let value = rand::thread_rng().gen_range(VALUE_MIN..=VALUE_MAX);
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.value = value;
        slot.last_read_at = Some(Instant::now());
        Some(TagReading { index, value })
    }

    /// When the tag was last read, if ever.
    pub fn last_read_at(&self, index: usize) -> Option<Instant> {
        let slot = self.slots.get(index)?;
        let slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.last_read_at
    }
}

fn generated_name(ordinal: usize) -> String {
    let prefix = NAME_PREFIXES[(ordinal - 1) % NAME_PREFIXES.len()];
    let suffix = NAME_SUFFIXES[(ordinal - 1) % NAME_SUFFIXES.len()];
    format!("{}{}{}", prefix, ordinal, suffix)
}

/// Extracts a trailing run of ASCII digits, e.g. `Conveyor17` -> 17.
fn trailing_decimal(symbol: &str) -> Option<usize> {
    let digits = symbol
        .bytes()
        .rev()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    symbol[symbol.len() - digits..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip_path::build_symbolic;

    fn path_for(symbol: &str) -> RequestPath {
        RequestPath::parse(&build_symbolic(symbol))
    }

    #[test]
    fn test_generated_names_are_stable() {
        let store = TagStore::generate(10);
        assert_eq!(store.len(), 10);
        assert_eq!(store.name(0), Some("Sensor1A"));
        assert_eq!(store.name(1), Some("Motor2B"));
        assert_eq!(store.name(6), Some("Temp7C"));
    }

    #[test]
    fn test_read_by_symbolic_name() {
        let store = TagStore::generate(5);
        let reading = store.read_path(&path_for("Sensor1A")).unwrap();
        assert_eq!(reading.index, 0);
        assert!((VALUE_MIN..=VALUE_MAX).contains(&reading.value));
        assert!(store.last_read_at(0).is_some());
    }

    #[test]
    fn test_read_by_positional_address() {
        let store = TagStore::generate(10);
        let reading = store.read_path(&path_for("Tag_7")).unwrap();
        assert_eq!(reading.index, 6);
    }

    #[test]
    fn test_numeric_suffix_fallback() {
        let store = TagStore::generate(10);
        // Not a tag name, not a positional address; the trailing decimal
        // resolves as a 1-based ordinal.
        let reading = store.read_path(&path_for("Conveyor3")).unwrap();
        assert_eq!(reading.index, 2);
    }

    #[test]
    fn test_out_of_range_ordinal_misses() {
        let store = TagStore::generate(10);
        assert!(store.read_path(&path_for("Conveyor11")).is_none());
        assert!(store.read_path(&path_for("Conveyor0")).is_none());
    }

    #[test]
    fn test_unknown_symbol_misses() {
        let store = TagStore::generate(10);
        assert!(store.read_path(&path_for("NoSuchTag")).is_none());
        assert!(store.read_path(&RequestPath::default()).is_none());
    }

    #[test]
    fn test_reads_stay_in_range() {
        let store = TagStore::generate(1);
        for _ in 0..64 {
            let reading = store.read_index(0).unwrap();
            assert!((VALUE_MIN..=VALUE_MAX).contains(&reading.value));
        }
    }

    #[test]
    fn test_custom_names() {
        let store = TagStore::from_names(vec!["Line1_Speed".into(), "Line1_Count".into()]);
        assert_eq!(store.read_path(&path_for("Line1_Count")).unwrap().index, 1);
        // Positional addressing works regardless of the custom names.
        assert_eq!(store.read_path(&path_for("Tag_1")).unwrap().index, 0);
    }

    #[test]
    fn test_trailing_decimal() {
        assert_eq!(trailing_decimal("Conveyor17"), Some(17));
        assert_eq!(trailing_decimal("17"), Some(17));
        assert_eq!(trailing_decimal("Sensor"), None);
        assert_eq!(trailing_decimal(""), None);
    }
}
