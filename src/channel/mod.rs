//! Text command channels.
//!
//! Instruments talk over a thin, blocking, line-oriented interface: write a
//! command, read a reply, or both (`query`). Everything above this layer is
//! transport-agnostic; everything below it (VISA, serial, vendor sockets) is
//! out of scope and can be supplied by implementing [`CommandChannel`].
//!
//! Two channels ship with the crate:
//! - [`MockChannel`] simulates an instrument in memory and is the test vehicle
//!   for drivers and experiments.
//! - [`TcpChannel`] speaks a terminated text protocol over a TCP socket, the
//!   common denominator of ethernet-attached lab equipment.
//!
//! Blocking I/O is deliberate: property traffic is low-frequency and the
//! traversal engine is single-threaded and cooperative.

mod mock;
mod tcp;

pub use mock::MockChannel;
pub use tcp::{ConnectionConfig, TcpChannel};

use crate::error::ScanResult;

/// A bidirectional text command interface to one instrument.
///
/// Implementations append their own write terminator; reply trimming (trailing
/// `\r\n` and whitespace) happens in the property binding layer, so `read`
/// returns the raw line without the terminator itself.
pub trait CommandChannel: Send {
    /// Send one command.
    fn write(&mut self, command: &str) -> ScanResult<()>;

    /// Receive one reply line.
    fn read(&mut self) -> ScanResult<String>;

    /// Send a command and receive its reply.
    fn query(&mut self, command: &str) -> ScanResult<String> {
        self.write(command)?;
        self.read()
    }

    /// Stable identifier recorded in run metadata in place of the live handle
    /// (e.g. `mock://sim_voltage`, `tcp://10.0.0.5:5025`).
    fn resource(&self) -> &str;
}
