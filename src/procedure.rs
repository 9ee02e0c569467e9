//! Procedure state machine.
//!
//! Each configured step moves `pending → active → done | blocked`. At most one
//! step is active at a time, and a completed step can be re-entered only by
//! [`ProcedureEngine::rewind`]. Every transition is appended to an event log
//! owned by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::{ProcedureError, Result, TutorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
    Blocked,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepStatus::Pending => "pending",
            StepStatus::Active => "active",
            StepStatus::Done => "done",
            StepStatus::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub step_id: String,
    pub status: StepStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub prompt_count: u32,
}

impl StepState {
    fn pending(step_id: String) -> Self {
        Self { step_id, status: StepStatus::Pending, activated_at: None, prompt_count: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureEventKind {
    StepActivated,
    StepCompleted,
    StepBlocked,
}

/// One state transition, as handed to the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureEvent {
    #[serde(rename = "type")]
    pub kind: ProcedureEventKind,
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProcedurePack {
    steps: Vec<PackStep>,
}

#[derive(Debug, Deserialize)]
struct PackStep {
    id: String,
}

#[derive(Debug, Clone)]
pub struct ProcedureEngine {
    order: Vec<String>,
    steps: HashMap<String, StepState>,
    events: Vec<ProcedureEvent>,
    /// Seconds a step may stay active before [`check_step_timeout`](Self::check_step_timeout) blocks it
    step_timeout: Option<f64>,
}

impl ProcedureEngine {
    /// Create an engine with every step pending.
    pub fn new<I, S>(step_ids: I) -> std::result::Result<Self, ProcedureError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = step_ids.into_iter().map(Into::into).collect();
        if order.is_empty() {
            return Err(ProcedureError::EmptyProcedure);
        }
        let mut steps = HashMap::with_capacity(order.len());
        for id in &order {
            if steps.insert(id.clone(), StepState::pending(id.clone())).is_some() {
                return Err(ProcedureError::DuplicateStep { id: id.clone() });
            }
        }
        Ok(Self { order, steps, events: Vec::new(), step_timeout: None })
    }

    /// Build from a procedure pack document (`steps: [{id: ...}, ...]`).
    pub fn from_pack_yaml(text: &str) -> Result<Self> {
        let pack: ProcedurePack = serde_yaml_ng::from_str(text)
            .map_err(|e| TutorError::parse_error("procedure pack", e.to_string()))?;
        Ok(Self::new(pack.steps.into_iter().map(|step| step.id))?)
    }

    pub fn from_pack_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TutorError::file_error(path, e))?;
        let engine = Self::from_pack_yaml(&text)?;
        info!(path = %path.display(), steps = engine.order.len(), "Loaded procedure pack");
        Ok(engine)
    }

    /// Activate the first pending step, or return the one already active.
    pub fn activate_next(&mut self) -> std::result::Result<&StepState, ProcedureError> {
        if let Some(active) = self.active_id() {
            return self.state(&active);
        }
        let next = self
            .order
            .iter()
            .find(|id| self.steps.get(*id).is_some_and(|step| step.status == StepStatus::Pending))
            .cloned()
            .ok_or(ProcedureError::NoPendingSteps)?;
        self.activate(&next)
    }

    pub fn complete_active(&mut self) -> std::result::Result<&StepState, ProcedureError> {
        self.finish_active(StepStatus::Done, ProcedureEventKind::StepCompleted, "complete", None)
    }

    pub fn block_active(&mut self, reason: impl Into<String>) -> std::result::Result<&StepState, ProcedureError> {
        self.finish_active(StepStatus::Blocked, ProcedureEventKind::StepBlocked, "block", Some(reason.into()))
    }

    /// Re-enter the most recently completed step. A currently active step is
    /// returned to pending first.
    pub fn rewind(&mut self) -> std::result::Result<&StepState, ProcedureError> {
        let last_done = self
            .order
            .iter()
            .rev()
            .find(|id| self.steps.get(*id).is_some_and(|step| step.status == StepStatus::Done))
            .cloned()
            .ok_or(ProcedureError::NoCompletedStep)?;
        if let Some(active) = self.active_id() {
            if let Some(step) = self.steps.get_mut(&active) {
                debug!(step_id = %active, "Returning active step to pending for rewind");
                step.status = StepStatus::Pending;
            }
        }
        self.activate(&last_done)
    }

    /// Count a help request against `step_id`, or the active step when `None`.
    /// Returns the new count.
    pub fn request_prompt(&mut self, step_id: Option<&str>) -> std::result::Result<u32, ProcedureError> {
        let id = match step_id {
            Some(id) => id.to_string(),
            None => self.active_id().ok_or(ProcedureError::NoActiveStep { action: "prompt" })?,
        };
        let step = self.steps.get_mut(&id).ok_or(ProcedureError::UnknownStep { id })?;
        step.prompt_count += 1;
        Ok(step.prompt_count)
    }

    /// Block the active step with reason `"timeout"` once more than
    /// `timeout_secs` have passed since it was activated.
    pub fn check_timeout(&mut self, now: DateTime<Utc>, timeout_secs: f64) -> Option<&StepState> {
        let active = self.active_id()?;
        let activated_at = self.steps.get(&active)?.activated_at?;
        let elapsed = (now - activated_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= timeout_secs {
            return None;
        }
        info!(step_id = %active, elapsed, timeout_secs, "Step timed out");
        self.finish_active(StepStatus::Blocked, ProcedureEventKind::StepBlocked, "block", Some("timeout".into()))
            .ok()
    }

    /// Set the timeout used by [`check_step_timeout`](Self::check_step_timeout).
    pub fn with_step_timeout(mut self, timeout_secs: Option<f64>) -> Self {
        self.step_timeout = timeout_secs;
        self
    }

    pub fn step_timeout(&self) -> Option<f64> {
        self.step_timeout
    }

    /// [`check_timeout`](Self::check_timeout) with the configured timeout;
    /// never blocks when none is set.
    pub fn check_step_timeout(&mut self, now: DateTime<Utc>) -> Option<&StepState> {
        let timeout_secs = self.step_timeout?;
        self.check_timeout(now, timeout_secs)
    }

    pub fn status(&self, step_id: &str) -> std::result::Result<StepStatus, ProcedureError> {
        self.state(step_id).map(|step| step.status)
    }

    pub fn active_step(&self) -> Option<&str> {
        self.order
            .iter()
            .find(|id| self.steps.get(*id).is_some_and(|step| step.status == StepStatus::Active))
            .map(String::as_str)
    }

    /// Step states in declared order.
    pub fn steps(&self) -> impl Iterator<Item = &StepState> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    pub fn events(&self) -> &[ProcedureEvent] {
        &self.events
    }

    /// Events appended at or after index `start`.
    pub fn events_since(&self, start: usize) -> &[ProcedureEvent] {
        self.events.get(start..).unwrap_or_default()
    }

    /// Override when a step was activated. Used when resuming a session.
    pub fn set_activation_time(
        &mut self,
        step_id: &str,
        at: DateTime<Utc>,
    ) -> std::result::Result<(), ProcedureError> {
        let step = self
            .steps
            .get_mut(step_id)
            .ok_or_else(|| ProcedureError::UnknownStep { id: step_id.to_string() })?;
        step.activated_at = Some(at);
        Ok(())
    }

    fn active_id(&self) -> Option<String> {
        self.active_step().map(str::to_string)
    }

    fn state(&self, step_id: &str) -> std::result::Result<&StepState, ProcedureError> {
        self.steps.get(step_id).ok_or_else(|| ProcedureError::UnknownStep { id: step_id.to_string() })
    }

    fn activate(&mut self, step_id: &str) -> std::result::Result<&StepState, ProcedureError> {
        let now = Utc::now();
        let step = self
            .steps
            .get_mut(step_id)
            .ok_or_else(|| ProcedureError::UnknownStep { id: step_id.to_string() })?;
        step.status = StepStatus::Active;
        step.activated_at = Some(now);
        self.emit(ProcedureEventKind::StepActivated, step_id, now, None);
        self.state(step_id)
    }

    fn finish_active(
        &mut self,
        status: StepStatus,
        kind: ProcedureEventKind,
        action: &'static str,
        reason: Option<String>,
    ) -> std::result::Result<&StepState, ProcedureError> {
        let active = self.active_id().ok_or(ProcedureError::NoActiveStep { action })?;
        if let Some(step) = self.steps.get_mut(&active) {
            step.status = status;
        }
        self.emit(kind, &active, Utc::now(), reason);
        self.state(&active)
    }

    fn emit(&mut self, kind: ProcedureEventKind, step_id: &str, timestamp: DateTime<Utc>, reason: Option<String>) {
        debug!(?kind, step_id, ?reason, "Procedure transition");
        self.events.push(ProcedureEvent { kind, step_id: step_id.to_string(), timestamp, reason });
    }
}

/// Replay step events against the declared step order.
///
/// Checks that steps activate in order (or re-enter through a rewind of the
/// most recently completed step), that only the active step completes or
/// blocks, and that the log does not end with a step still active. The error
/// names the offending step.
pub fn validate_event_log(order: &[String], events: &[ProcedureEvent]) -> std::result::Result<(), String> {
    let mut status: HashMap<&str, StepStatus> =
        order.iter().map(|id| (id.as_str(), StepStatus::Pending)).collect();
    let mut active: Option<&str> = None;

    for event in events {
        let sid = event.step_id.as_str();
        let current = *status.get(sid).ok_or_else(|| format!("unknown step_id {}", sid))?;
        match event.kind {
            ProcedureEventKind::StepActivated => {
                let last_done = order
                    .iter()
                    .rev()
                    .map(String::as_str)
                    .find(|id| status.get(id) == Some(&StepStatus::Done));
                if current == StepStatus::Done && last_done == Some(sid) {
                    if let Some(previous) = active.take() {
                        status.insert(previous, StepStatus::Pending);
                    }
                } else {
                    if current != StepStatus::Pending {
                        return Err(format!("step {} activated from {}", sid, current));
                    }
                    if let Some(previous) = active {
                        return Err(format!("step {} activated while {} active", sid, previous));
                    }
                    let next_pending = order
                        .iter()
                        .map(String::as_str)
                        .find(|id| status.get(id) == Some(&StepStatus::Pending));
                    if let Some(expected) = next_pending.filter(|expected| *expected != sid) {
                        return Err(format!("step {} activated out of order; expected {}", sid, expected));
                    }
                }
                status.insert(sid, StepStatus::Active);
                active = Some(sid);
            }
            ProcedureEventKind::StepCompleted | ProcedureEventKind::StepBlocked => {
                let verb = if event.kind == ProcedureEventKind::StepCompleted { "complete" } else { "block" };
                if active != Some(sid) {
                    return Err(format!("{} {} but active {}", verb, sid, active.unwrap_or("none")));
                }
                let next = if event.kind == ProcedureEventKind::StepCompleted {
                    StepStatus::Done
                } else {
                    StepStatus::Blocked
                };
                status.insert(sid, next);
                active = None;
            }
        }
    }

    match active {
        Some(sid) => Err(format!("ended with active {}", sid)),
        None => Ok(()),
    }
}
