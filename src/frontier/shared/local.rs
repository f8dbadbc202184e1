use super::{Admission, ClaimedMember, FailureRecord, HostDelay, SharedStore};
use crate::frontier::{FrontierError, FrontierResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// In-process [`SharedStore`]
///
/// A mutex makes every operation atomic. Useful for tests and for several
/// crawlers sharing one process.
#[derive(Debug, Default)]
pub struct LocalStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    scores: HashMap<String, i64>,
    schedule: BTreeSet<(i64, String)>,
    hosts: HashMap<String, HostDelay>,
    errors: HashMap<String, ErrorDetails>,
}

#[derive(Debug, Clone, Default)]
struct ErrorDetails {
    num_errors: u32,
    status_code: Option<u16>,
    error_code: String,
    error_message: String,
}

impl State {
    fn set_score(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.schedule.remove(&(old, member.to_string()));
        }
        self.schedule.insert((score, member.to_string()));
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> FrontierResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| FrontierError::Poisoned)
    }

    /// Number of scheduled members
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.scores.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current eligibility time of a member
    pub fn score(&self, member: &str) -> Option<i64> {
        self.state.lock().ok()?.scores.get(member).copied()
    }

    pub fn num_errors(&self, member: &str) -> u32 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.errors.get(member).map(|e| e.num_errors))
            .unwrap_or(0)
    }

    pub fn host_delay(&self, host: &str) -> Option<HostDelay> {
        self.state.lock().ok()?.hosts.get(host).copied()
    }
}

#[async_trait]
impl SharedStore for LocalStore {
    async fn admit_bulk(
        &self,
        admissions: &[Admission],
        now_ms: i64,
        half_life_ms: i64,
    ) -> FrontierResult<()> {
        let mut state = self.lock()?;
        for admission in admissions {
            if state.scores.contains_key(&admission.member) {
                continue;
            }
            let previous = state.hosts.get(&admission.host).copied();
            let delay = HostDelay::admit(previous, now_ms, half_life_ms);
            state.hosts.insert(admission.host.clone(), delay);
            let score = now_ms.saturating_add(delay.delay_ms.ceil() as i64);
            state.set_score(&admission.member, score);
        }
        Ok(())
    }

    async fn claim(&self, now_ms: i64, lock_ms: i64) -> FrontierResult<Option<ClaimedMember>> {
        let mut state = self.lock()?;
        let member = match state.schedule.iter().next() {
            Some((score, member)) if *score <= now_ms => member.clone(),
            _ => return Ok(None),
        };
        state.set_score(&member, now_ms.saturating_add(lock_ms));

        let details = state.errors.get(&member).cloned();
        Ok(Some(ClaimedMember {
            status_code: details.as_ref().and_then(|d| d.status_code),
            error_code: details.as_ref().map(|d| d.error_code.clone()),
            error_message: details.map(|d| d.error_message),
            member,
        }))
    }

    async fn record_success(&self, member: &str, next_ms: i64) -> FrontierResult<()> {
        let mut state = self.lock()?;
        state.errors.remove(member);
        state.set_score(member, next_ms);
        Ok(())
    }

    async fn record_failure(
        &self,
        member: &str,
        now_ms: i64,
        initial_retry_ms: i64,
        failure: FailureRecord<'_>,
    ) -> FrontierResult<u32> {
        let mut state = self.lock()?;
        let details = state.errors.entry(member.to_string()).or_default();
        details.num_errors = details.num_errors.saturating_add(1);
        details.status_code = failure.status_code;
        details.error_code = failure.error_code.to_string();
        details.error_message = failure.error_message.to_string();
        let num_errors = details.num_errors;

        let exponent = num_errors.saturating_sub(1).min(40);
        let delay = initial_retry_ms.saturating_mul(1i64 << exponent);
        state.set_score(member, now_ms.saturating_add(delay));
        Ok(num_errors)
    }

    async fn soonest_score(&self) -> FrontierResult<Option<i64>> {
        let state = self.lock()?;
        Ok(state.schedule.iter().next().map(|(score, _)| *score))
    }
}
