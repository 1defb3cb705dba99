//! In-memory instrument simulator.

use crate::channel::CommandChannel;
use crate::error::{ScanError, ScanResult};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A command channel backed by a register map instead of hardware.
///
/// The grammar mirrors the fixed-format text protocols the toolkit targets:
/// - `"CMD arg"` stores `arg` under the register `CMD`;
/// - a bare `"CMD"` stores an empty argument (trigger-style commands);
/// - `"CMD?"` recalls the register `CMD` so the next `read` returns it.
///
/// Scripted replies (pushed with [`push_reply`](Self::push_reply)) take
/// precedence over register recall, which lets tests stage malformed or
/// error-text replies. Every `write`/`read` is appended to a call log, and
/// [`fail_next`](Self::fail_next) injects a one-shot transport failure.
///
/// Cloning shares all state: clone a handle before boxing the channel into an
/// instrument, then script replies and inspect the log through the clone.
#[derive(Clone)]
pub struct MockChannel {
    resource: String,
    latency: Duration,
    state: Arc<Mutex<MockState>>,
    fail_next: Arc<AtomicBool>,
    call_log: Arc<Mutex<Vec<String>>>,
}

struct MockState {
    registers: HashMap<String, String>,
    scripted: VecDeque<String>,
    pending: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockChannel {
    /// New simulator with an empty register map.
    pub fn new(name: &str) -> Self {
        Self {
            resource: format!("mock://{name}"),
            latency: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState {
                registers: HashMap::new(),
                scripted: VecDeque::new(),
                pending: None,
            })),
            fail_next: Arc::new(AtomicBool::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Pre-load a register, builder style.
    #[must_use]
    pub fn with_register(self, command: &str, value: &str) -> Self {
        lock(&self.state)
            .registers
            .insert(command.to_string(), value.to_string());
        self
    }

    /// Add artificial per-operation latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Overwrite a register from outside (simulates the device drifting).
    pub fn set_register(&self, command: &str, value: &str) {
        lock(&self.state)
            .registers
            .insert(command.to_string(), value.to_string());
    }

    /// Current register content, if any.
    pub fn register(&self, command: &str) -> Option<String> {
        lock(&self.state).registers.get(command).cloned()
    }

    /// Queue a scripted reply; the next `read` returns it verbatim.
    pub fn push_reply(&self, reply: &str) {
        lock(&self.state).scripted.push_back(reply.to_string());
    }

    /// Make the next channel operation fail with a transport error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        lock(&self.call_log).clear();
    }

    fn maybe_fail(&self, op: &str) -> ScanResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanError::transport(
                op,
                io::Error::new(io::ErrorKind::BrokenPipe, "injected failure"),
            ));
        }
        Ok(())
    }

    fn sleep_latency(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

impl CommandChannel for MockChannel {
    fn write(&mut self, command: &str) -> ScanResult<()> {
        self.maybe_fail("write")?;
        self.sleep_latency();
        lock(&self.call_log).push(format!("write {command}"));
        debug!(resource = %self.resource, command, "mock write");

        let mut state = lock(&self.state);
        if let Some(stem) = command.strip_suffix('?') {
            state.pending = state.registers.get(stem.trim_end()).cloned();
        } else if let Some((stem, arg)) = command.split_once(char::is_whitespace) {
            state.registers.insert(stem.to_string(), arg.trim().to_string());
        } else {
            state.registers.insert(command.to_string(), String::new());
        }
        Ok(())
    }

    fn read(&mut self) -> ScanResult<String> {
        self.maybe_fail("read")?;
        self.sleep_latency();
        lock(&self.call_log).push("read".to_string());

        let mut state = lock(&self.state);
        if let Some(reply) = state.scripted.pop_front() {
            return Ok(reply);
        }
        state.pending.take().ok_or_else(|| {
            ScanError::transport(
                "read",
                io::Error::new(io::ErrorKind::TimedOut, "no reply pending"),
            )
        })
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_recalls_registers() {
        let mut chan = MockChannel::new("dmm");
        chan.write("VOLT 5.25").unwrap();
        assert_eq!(chan.query("VOLT?").unwrap(), "5.25");
        assert_eq!(chan.register("VOLT").unwrap(), "5.25");
    }

    #[test]
    fn bare_commands_store_empty_argument() {
        let mut chan = MockChannel::new("dmm");
        chan.write("*RST").unwrap();
        assert_eq!(chan.register("*RST").unwrap(), "");
    }

    #[test]
    fn scripted_replies_take_precedence() {
        let mut chan = MockChannel::new("dmm").with_register("VOLT", "1.0");
        chan.push_reply("ERROR -113");
        assert_eq!(chan.query("VOLT?").unwrap(), "ERROR -113");
        // The register reply was prepared but not consumed; a fresh query
        // returns it now that the script is exhausted.
        assert_eq!(chan.query("VOLT?").unwrap(), "1.0");
    }

    #[test]
    fn read_without_pending_reply_is_a_transport_error() {
        let mut chan = MockChannel::new("dmm");
        match chan.read() {
            Err(ScanError::Transport { context, .. }) => assert_eq!(context, "read"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn failure_injection_is_one_shot() {
        let mut chan = MockChannel::new("dmm").with_register("VOLT", "1.0");
        chan.fail_next();
        assert!(chan.query("VOLT?").is_err());
        assert_eq!(chan.query("VOLT?").unwrap(), "1.0");
    }

    #[test]
    fn clones_share_state_and_log() {
        let handle = MockChannel::new("dmm");
        let mut chan = handle.clone();
        chan.write("FREQ 50").unwrap();

        assert_eq!(handle.register("FREQ").unwrap(), "50");
        assert_eq!(handle.calls(), vec!["write FREQ 50".to_string()]);
        handle.clear_calls();
        assert!(handle.calls().is_empty());
    }
}
