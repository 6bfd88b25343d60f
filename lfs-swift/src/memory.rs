//! Scripted in-memory backend for exercising the transfer loop.
//!
//! Each [`Session::transfer`] call consumes the next scripted response in
//! order. Calls, connects and releases are recorded so tests can check
//! what the loop asked for.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::storage::{Backend, Outcome, Outcomes, Session, TransferObject, TransferOptions};
use crate::{Error, Result};

/// A recorded [`Session::transfer`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Call {
    /// Container passed to the call.
    pub container: String,
    /// Object passed to the call.
    pub object: TransferObject,
    /// Options in effect for the call.
    pub options: TransferOptions,
}

/// What one transfer call yields.
#[derive(Debug)]
enum Script {
    /// Yield these outcomes, then optionally fail mid-stream.
    Outcomes(Vec<Outcome>, Option<String>),
    /// Fail the call before any outcome.
    Fault(String),
}

/// Shared between the backend handle and its sessions.
#[derive(Debug, Default)]
struct State {
    script: VecDeque<Script>,
    calls: Vec<Call>,
    connects: Vec<TransferOptions>,
    releases: usize,
}

/// In-memory [`Backend`]. Clones share the same script and records.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// Creates a backend with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next call to yield `outcomes`.
    pub fn respond(&self, outcomes: impl IntoIterator<Item = Outcome>) -> &Self {
        self.push(Script::Outcomes(outcomes.into_iter().collect(), None));
        self
    }

    /// Scripts the next call to yield `outcomes`, then a call-level fault.
    pub fn respond_then_fail(
        &self,
        outcomes: impl IntoIterator<Item = Outcome>,
        message: impl Into<String>,
    ) -> &Self {
        self.push(Script::Outcomes(
            outcomes.into_iter().collect(),
            Some(message.into()),
        ));
        self
    }

    /// Scripts the next call to fail before yielding anything.
    pub fn fault(&self, message: impl Into<String>) -> &Self {
        self.push(Script::Fault(message.into()));
        self
    }

    /// Transfer calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Options each session was opened with.
    pub fn connects(&self) -> Vec<TransferOptions> {
        self.lock().connects.clone()
    }

    /// Number of sessions dropped.
    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    fn push(&self, script: Script) {
        self.lock().script.push_back(script);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    type Session = MemorySession;

    fn connect(&mut self, options: &TransferOptions) -> Result<MemorySession> {
        self.lock().connects.push(options.clone());
        Ok(MemorySession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handed out by [`MemoryBackend`]; records its release on drop.
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl Session for MemorySession {
    fn transfer(
        &mut self,
        container: &str,
        object: &TransferObject,
        options: &TransferOptions,
    ) -> Result<Outcomes<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(Call {
            container: container.to_owned(),
            object: object.clone(),
            options: options.clone(),
        });
        match state.script.pop_front() {
            Some(Script::Fault(message)) => Err(Error::Storage(message)),
            Some(Script::Outcomes(outcomes, fault)) => Ok(Box::new(
                outcomes
                    .into_iter()
                    .map(Ok)
                    .chain(fault.map(|m| Err(Error::Storage(m)))),
            )),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .releases += 1;
    }
}
