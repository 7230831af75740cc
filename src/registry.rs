//! Stub registry.
//!
//! Holds compiled stubs and resolves which one answers a request.

use crate::config::StubDefinition;
use crate::error::ConfigError;
use crate::journal::RecordedRequest;
use crate::matcher::{CompiledRequest, MatchContext};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Result of resolving a request against the registry.
#[derive(Debug, Clone)]
pub struct StubMatch {
    /// The matched stub
    pub stub: StubDefinition,
    /// Context captured during matching
    pub context: MatchContext,
}

#[derive(Debug)]
struct RegisteredStub {
    definition: StubDefinition,
    compiled: CompiledRequest,
    /// Registration sequence; newer stubs win ties
    seq: u64,
    matches: AtomicU32,
}

impl RegisteredStub {
    /// Count a match unless the stub has hit `max_matches`.
    fn claim(&self) -> bool {
        let max = self.definition.max_matches;
        self.matches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .is_ok()
    }
}

/// Stubs in registration order.
#[derive(Debug, Default)]
pub struct StubRegistry {
    stubs: Vec<RegisteredStub>,
    next_seq: u64,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of definitions, validating each.
    pub fn from_stubs(stubs: &[StubDefinition]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for stub in stubs {
            registry.register(stub.clone())?;
        }
        Ok(registry)
    }

    /// Add a stub. A stub with the same id is replaced.
    pub fn register(&mut self, definition: StubDefinition) -> Result<(), ConfigError> {
        definition.validate()?;
        let compiled =
            CompiledRequest::compile(&definition.request).map_err(|e| ConfigError::InvalidStub {
                id: definition.id.clone(),
                reason: e.to_string(),
            })?;

        self.stubs.retain(|s| s.definition.id != definition.id);
        debug!(stub_id = %definition.id, request = %definition.request, "Registered stub");

        self.stubs.push(RegisteredStub {
            definition,
            compiled,
            seq: self.next_seq,
            matches: AtomicU32::new(0),
        });
        self.next_seq += 1;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<StubDefinition> {
        let idx = self.stubs.iter().position(|s| s.definition.id == id)?;
        Some(self.stubs.remove(idx).definition)
    }

    /// Drop all stubs and their match counters.
    pub fn clear(&mut self) {
        self.stubs.clear();
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.stubs.iter().filter(|s| s.definition.enabled).count()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<StubDefinition> {
        self.stubs.iter().map(|s| s.definition.clone()).collect()
    }

    /// Times the stub with `id` has answered a request.
    pub fn match_count(&self, id: &str) -> Option<u32> {
        self.stubs
            .iter()
            .find(|s| s.definition.id == id)
            .map(|s| s.matches.load(Ordering::Relaxed))
    }

    /// Find the stub that answers `request` and count the match.
    ///
    /// Candidates are tried by priority (highest first), then newest
    /// registration first. Disabled and exhausted stubs are skipped.
    pub fn find_match(&self, request: &RecordedRequest) -> Option<StubMatch> {
        let mut candidates: Vec<&RegisteredStub> =
            self.stubs.iter().filter(|s| s.definition.enabled).collect();
        candidates.sort_by(|a, b| {
            b.definition
                .priority
                .cmp(&a.definition.priority)
                .then(b.seq.cmp(&a.seq))
        });

        for stub in candidates {
            let Some(context) = stub.compiled.matches(request) else {
                continue;
            };
            if !stub.claim() {
                debug!(stub_id = %stub.definition.id, "Stub exhausted (max_matches reached)");
                continue;
            }
            return Some(StubMatch {
                stub: stub.definition.clone(),
                context,
            });
        }

        None
    }
}
