#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor_core::agent::{Agent, AgentError, AgentOutput, AgentRegistry, AgentRequest};
use conductor_types::replan::FailureType;
use serde_json::json;

/// What a scripted agent does on one attempt of a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Succeed,
    Fail(FailureType),
    FailUnrecoverable(FailureType),
    /// Never returns; the step runner's timeout has to fire.
    Hang,
}

/// Agent-side journal of starts and finishes, shared by every scripted agent
/// in a test.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<Entry>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Started { step_id: String, attempt: u32 },
    Finished { step_id: String, ok: bool },
}

impl Journal {
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().clone()
    }

    /// Step ids in the order they were started, one per attempt.
    pub fn starts(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Started { step_id, .. } => Some(step_id),
                Entry::Finished { .. } => None,
            })
            .collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Position of the first successful finish of `step_id`.
    pub fn finished_ok_at(&self, step_id: &str) -> Option<usize> {
        self.entries().iter().position(|e| {
            matches!(e, Entry::Finished { step_id: id, ok: true } if id == step_id)
        })
    }

    /// Position of the first start of `step_id`.
    pub fn started_at(&self, step_id: &str) -> Option<usize> {
        self.entries()
            .iter()
            .position(|e| matches!(e, Entry::Started { step_id: id, .. } if id == step_id))
    }

    fn push(&self, entry: Entry) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// Decrements the in-flight gauge even when the attempt is dropped on timeout.
struct InFlightGuard<'a>(&'a Journal);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Agent whose behavior is fixed per step and attempt number.
///
/// Attempts past the end of a step's script succeed.
pub struct ScriptedAgent {
    name: String,
    scripts: HashMap<String, Vec<Behavior>>,
    latency: Duration,
    journal: Arc<Journal>,
}

impl ScriptedAgent {
    pub fn new(name: &str, journal: Arc<Journal>) -> Self {
        Self {
            name: name.to_string(),
            scripts: HashMap::new(),
            latency: Duration::ZERO,
            journal,
        }
    }

    pub fn script(mut self, step_id: &str, behaviors: &[Behavior]) -> Self {
        self.scripts.insert(step_id.to_string(), behaviors.to_vec());
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn behavior(&self, step_id: &str, attempt: u32) -> Behavior {
        self.scripts
            .get(step_id)
            .and_then(|s| s.get(attempt.saturating_sub(1) as usize))
            .copied()
            .unwrap_or(Behavior::Succeed)
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentOutput, AgentError> {
        self.journal.push(Entry::Started {
            step_id: request.step_id.clone(),
            attempt: request.attempt,
        });
        let now = self.journal.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.journal);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = match self.behavior(&request.step_id, request.attempt) {
            Behavior::Succeed => Ok(AgentOutput::new(json!({
                "step": request.step_id,
                "attempt": request.attempt,
            }))),
            Behavior::Fail(failure_type) => Err(AgentError::new(
                failure_type,
                format!("scripted {failure_type} on attempt {}", request.attempt),
            )),
            Behavior::FailUnrecoverable(failure_type) => {
                Err(AgentError::new(failure_type, "scripted unrecoverable failure").unrecoverable())
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
        };

        self.journal.push(Entry::Finished {
            step_id: request.step_id.clone(),
            ok: result.is_ok(),
        });
        result
    }
}

/// Registry holding one scripted agent.
pub fn registry(agent: ScriptedAgent) -> AgentRegistry {
    AgentRegistry::new().with(agent)
}

// ---------------------------------------------------------------------------
// Deterministic pseudo-random numbers
// ---------------------------------------------------------------------------

/// SplitMix64 generator; reproducible across platforms for a given seed.
pub struct SplitMix64(u64);

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `0..bound`; `bound` must be non-zero.
    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }

    /// True with probability `percent / 100`.
    pub fn chance(&mut self, percent: u64) -> bool {
        self.below(100) < percent
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}
