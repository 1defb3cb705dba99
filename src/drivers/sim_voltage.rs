//! Simulated voltage source.

use crate::channel::CommandChannel;
use crate::error::ScanResult;
use crate::instrument::{Instrument, PropertyDescriptor, ReturnKind};

/// Build the simulator driver on any channel.
///
/// The property table covers every validation mode the toolkit supports:
///
/// | property      | mode           | wire commands            |
/// |---------------|----------------|--------------------------|
/// | `voltage`     | range 0..10 V  | `VOLT {value}` / `VOLT?` |
/// | `output`      | dict on/off    | `OUTP {value}` / `OUTP?` |
/// | `mode`        | values         | `MODE {value}` / `MODE?` |
/// | `attenuation` | indexed 1/10/100 | `ATT {value}` / `ATT?` |
/// | `id`          | read-only      | `*IDN?`                  |
/// | `trigger`     | write-only     | `TRIG {value}`           |
///
/// Writable properties are initialized to safe defaults (0 V, output off,
/// dc mode, lowest attenuation), so a fresh
/// [`MockChannel`](crate::channel::MockChannel) answers queries immediately.
/// Replies starting with `ERR` are treated as device faults.
pub fn sim_voltage_source(channel: impl CommandChannel + 'static) -> ScanResult<Instrument> {
    let mut inst = Instrument::new(channel).with_error_pattern(r"(?i)^err")?;

    inst.add_property(
        PropertyDescriptor::new("voltage")
            .write("VOLT {value}")
            .query("VOLT?")
            .returns(ReturnKind::Float)
            .range(0.0, 10.0),
    )?;
    inst.add_property(
        PropertyDescriptor::new("output")
            .write("OUTP {value}")
            .query("OUTP?")
            .returns(ReturnKind::Str)
            .dict_values([("on", 1), ("off", 0), ("1", 1), ("0", 0)]),
    )?;
    inst.add_property(
        PropertyDescriptor::new("mode")
            .write("MODE {value}")
            .query("MODE?")
            .returns(ReturnKind::Str)
            .values(["dc", "ac", "burst"]),
    )?;
    inst.add_property(
        PropertyDescriptor::new("attenuation")
            .write("ATT {value}")
            .query("ATT?")
            .returns(ReturnKind::Int)
            .indexed_values([1, 10, 100]),
    )?;
    inst.add_property(
        PropertyDescriptor::new("id")
            .query("*IDN?")
            .returns(ReturnKind::Str)
            .read_only()
            .values(["*"]),
    )?;
    inst.add_property(
        PropertyDescriptor::new("trigger")
            .write("TRIG {value}")
            .write_only()
            .values([1]),
    )?;

    // Safe power-on defaults.
    inst.set("voltage", 0.0)?;
    inst.set("output", "off")?;
    inst.set("mode", "dc")?;
    inst.set("attenuation", 1)?;

    Ok(inst)
}
