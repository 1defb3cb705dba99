//! Automated driver round-trip testing.
//!
//! [`verify_instrument`] walks every read-write property of an instrument,
//! sets each admissible value (all elements for discrete modes, the bounds
//! and midpoint for ranges, every key for dict modes) and reads it back,
//! checking that the round trip lands on the same wire value. Intended for
//! drivers backed by a [`MockChannel`](crate::channel::MockChannel) or a
//! device on a test bench; running it against live hardware will actually
//! move settings around.

use crate::instrument::{Instrument, PropertyValue, Validation};
use tracing::info;

/// Result of one driver verification pass.
#[derive(Debug, Default)]
pub struct SelfTestReport {
    /// Properties whose every candidate round-tripped
    pub passed: Vec<String>,
    /// Properties with at least one failed candidate
    pub failures: Vec<PropertyFailure>,
}

/// A single failed round trip.
#[derive(Debug)]
pub struct PropertyFailure {
    /// Property name
    pub property: String,
    /// What went wrong, including the candidate value
    pub detail: String,
}

impl SelfTestReport {
    /// True when no property failed.
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Round-trip every read-write property through the instrument's channel.
pub fn verify_instrument(instrument: &mut Instrument) -> SelfTestReport {
    let mut report = SelfTestReport::default();

    let plans: Vec<(String, Vec<PropertyValue>)> = instrument
        .properties()
        .filter(|d| d.is_readable() && d.is_writable())
        .filter_map(|d| {
            d.mode()
                .ok()
                .map(|mode| (d.name().to_string(), candidates(mode)))
        })
        .collect();

    for (name, values) in plans {
        let mut failed = false;
        for candidate in values {
            if let Some(detail) = round_trip(instrument, &name, &candidate) {
                report.failures.push(PropertyFailure {
                    property: name.clone(),
                    detail,
                });
                failed = true;
            }
        }
        if !failed {
            report.passed.push(name);
        }
    }

    info!(
        passed = report.passed.len(),
        failed = report.failures.len(),
        device = instrument.display_name(),
        "driver self-test finished"
    );
    report
}

/// Admissible candidates to exercise for one validation mode.
fn candidates(mode: &Validation) -> Vec<PropertyValue> {
    match mode {
        Validation::Values(v) | Validation::IndexedValues(v) => v.clone(),
        Validation::Range { lo, hi } => vec![
            PropertyValue::Float(*lo),
            PropertyValue::Float((*lo + *hi) / 2.0),
            PropertyValue::Float(*hi),
        ],
        Validation::DictValues(map) => map
            .keys()
            .map(|k| PropertyValue::Str(k.clone()))
            .collect(),
    }
}

/// Set `candidate`, read it back, compare by marshalled wire value (so alias
/// dict keys that map to the same wire value count as a match). Returns a
/// failure description, or `None` on success.
fn round_trip(
    instrument: &mut Instrument,
    property: &str,
    candidate: &PropertyValue,
) -> Option<String> {
    if let Err(e) = instrument.set(property, candidate.clone()) {
        return Some(format!("set {candidate} failed: {e}"));
    }
    let got = match instrument.get(property) {
        Ok(v) => v,
        Err(e) => return Some(format!("get after set {candidate} failed: {e}")),
    };

    let mode = match instrument.property(property).map(PropertyWire::new) {
        Some(wire) => wire,
        None => return Some(format!("descriptor for '{property}' disappeared")),
    };
    match (mode.wire(property, candidate), mode.wire(property, &got)) {
        (Some(sent), Some(read)) if sent == read => None,
        (sent, read) => Some(format!(
            "sent {candidate} (wire {sent:?}) but read back {got} (wire {read:?})"
        )),
    }
}

/// Helper computing the wire rendering a value would marshal to.
struct PropertyWire<'a> {
    descriptor: &'a crate::instrument::PropertyDescriptor,
}

impl<'a> PropertyWire<'a> {
    fn new(descriptor: &'a crate::instrument::PropertyDescriptor) -> Self {
        Self { descriptor }
    }

    fn wire(&self, property: &str, value: &PropertyValue) -> Option<String> {
        self.descriptor
            .mode()
            .ok()?
            .marshal(property, value)
            .ok()
            .map(|(wire, _)| wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::drivers;

    #[test]
    fn sim_driver_passes_its_own_test() {
        let mut inst = drivers::sim_voltage_source(MockChannel::new("sim")).unwrap();
        let report = verify_instrument(&mut inst);
        assert!(report.all_passed(), "failures: {:?}", report.failures);
        // Read-only and write-only properties are skipped.
        assert!(!report.passed.contains(&"id".to_string()));
        assert!(!report.passed.contains(&"trigger".to_string()));
    }

    #[test]
    fn broken_device_is_reported() {
        let chan = MockChannel::new("broken");
        let mut inst = crate::instrument::Instrument::new(chan.clone());
        inst.add_property(
            crate::instrument::PropertyDescriptor::new("voltage")
                .write("VOLT {value}")
                .query("VOLTAGE?") // queries a register the writes never touch
                .range(0.0, 1.0),
        )
        .unwrap();

        let report = verify_instrument(&mut inst);
        assert!(!report.all_passed());
        assert_eq!(report.failures[0].property, "voltage");
    }
}
