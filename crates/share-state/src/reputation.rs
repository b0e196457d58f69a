//! Task lifecycle tracking and the decayed trust score derived from it.
//!
//! Trust score for an agent at time `now`:
//! - every explicit rating of a completed task is a sample `(value, rated_at)`
//! - a completed task nobody rated contributes one implicit sample
//!   `(implicit(outcome), completed_at)`
//! - samples older than the history window are ignored
//! - weight `w = 0.5 ^ (age_days / half_life_days)`
//! - score = `Σ w·v / Σ w` rounded to 6 decimals, or 0.5 when there are no samples
//!
//! Task records live in per-agent ledgers; scores are recomputed on read
//! under the ledger's shard lock, so a read reflects every rating committed
//! before it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use share_protocol::{check_identifier, AgentId, AgentStats, LeaderboardEntry, TaskOutcome};

use crate::StateError;

/// Score of an agent with no usable history.
pub const NEUTRAL_TRUST: f64 = 0.5;

/// Scores are rounded to this many steps so equal histories tie exactly.
const SCORE_SCALE: f64 = 1_000_000.0;

/// Bounds accepted by `ReputationConfig::validate`.
pub const MIN_HALF_LIFE_DAYS: f64 = 0.01;
pub const MAX_HISTORY_WINDOW_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Age at which a sample counts half as much as a fresh one.
    pub half_life_days: f64,
    /// Samples older than this are dropped entirely.
    pub history_window_days: i64,
    pub implicit_success: f64,
    pub implicit_partial: f64,
    pub implicit_failure: f64,
    pub implicit_timeout: f64,
    /// Agents with fewer completed tasks are left off the leaderboard.
    pub leaderboard_min_tasks: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            half_life_days: 7.0,
            history_window_days: 30,
            implicit_success: 0.75,
            implicit_partial: 0.5,
            implicit_failure: 0.25,
            implicit_timeout: 0.25,
            leaderboard_min_tasks: 0,
        }
    }
}

impl ReputationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.half_life_days.is_finite() && self.half_life_days >= MIN_HALF_LIFE_DAYS) {
            return Err(format!(
                "half_life_days must be >= {MIN_HALF_LIFE_DAYS}, got {}",
                self.half_life_days
            ));
        }
        if !(1..=MAX_HISTORY_WINDOW_DAYS).contains(&self.history_window_days) {
            return Err(format!(
                "history_window_days must lie in [1, {MAX_HISTORY_WINDOW_DAYS}], got {}",
                self.history_window_days
            ));
        }
        for (name, value) in [
            ("implicit_success", self.implicit_success),
            ("implicit_partial", self.implicit_partial),
            ("implicit_failure", self.implicit_failure),
            ("implicit_timeout", self.implicit_timeout),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must lie in [0.0, 1.0], got {value}"));
            }
        }
        Ok(())
    }

    pub fn implicit_rating(&self, outcome: TaskOutcome) -> f64 {
        match outcome {
            TaskOutcome::Success => self.implicit_success,
            TaskOutcome::Partial => self.implicit_partial,
            TaskOutcome::Failure => self.implicit_failure,
            TaskOutcome::Timeout => self.implicit_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub task_id: String,
    pub rated_by: AgentId,
    pub value: f64,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub agent_id: AgentId,
    pub task_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `None` while the task is in flight.
    pub outcome: Option<TaskOutcome>,
    pub ratings: Vec<Rating>,
}

impl TaskRecord {
    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

/// One weighted input to the trust score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Weight of a sample `age` old. Future timestamps count as fresh.
pub fn decay_weight(age: Duration, half_life_days: f64) -> f64 {
    let age_days = (age.num_milliseconds().max(0) as f64) / 86_400_000.0;
    0.5_f64.powf(age_days / half_life_days)
}

/// Recency-weighted average of `samples`, clamped to [0, 1].
///
/// Weights are taken relative to the freshest sample in the window. The
/// ratio is unchanged, but the freshest sample always weighs 1 so a short
/// half-life cannot underflow every weight to zero.
pub fn compute_trust(samples: &[ScoreSample], now: DateTime<Utc>, config: &ReputationConfig) -> f64 {
    // A window too large for chrono to represent keeps everything.
    let window = Duration::try_days(config.history_window_days);
    let ages: Vec<(Duration, f64)> = samples
        .iter()
        .map(|s| ((now - s.at).max(Duration::zero()), s.value))
        .filter(|(age, _)| window.map_or(true, |w| *age <= w))
        .collect();
    let Some(freshest) = ages.iter().map(|(age, _)| *age).min() else {
        return NEUTRAL_TRUST;
    };

    let (weighted, total) = ages
        .iter()
        .fold((0.0_f64, 0.0_f64), |(weighted, total), (age, value)| {
            let w = decay_weight(*age - freshest, config.half_life_days);
            (weighted + w * value, total + w)
        });

    if total <= f64::EPSILON {
        return NEUTRAL_TRUST;
    }
    let score = (weighted / total).clamp(0.0, 1.0);
    (score * SCORE_SCALE).round() / SCORE_SCALE
}

#[derive(Debug, Default)]
struct AgentLedger {
    tasks: HashMap<String, TaskRecord>,
}

impl AgentLedger {
    fn samples(&self, config: &ReputationConfig) -> Vec<ScoreSample> {
        let mut samples = Vec::new();
        for task in self.tasks.values() {
            let (Some(outcome), Some(completed_at)) = (task.outcome, task.completed_at) else {
                continue;
            };
            if task.ratings.is_empty() {
                samples.push(ScoreSample {
                    value: config.implicit_rating(outcome),
                    at: completed_at,
                });
            } else {
                samples.extend(task.ratings.iter().map(|r| ScoreSample {
                    value: r.value,
                    at: r.rated_at,
                }));
            }
        }
        samples
    }

    fn completed(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values().filter(|t| t.is_completed())
    }

    fn stats(&self, agent_id: &AgentId, trust_score: f64) -> AgentStats {
        let completed: Vec<&TaskRecord> = self.completed().collect();
        let success_count = completed
            .iter()
            .filter(|t| t.outcome == Some(TaskOutcome::Success))
            .count();
        let failure_count = completed
            .iter()
            .filter(|t| t.outcome.is_some_and(|o| o.counts_as_failure()))
            .count();

        let durations: Vec<i64> = completed.iter().filter_map(|t| t.duration_ms()).collect();
        let ratings: Vec<f64> = completed
            .iter()
            .flat_map(|t| t.ratings.iter().map(|r| r.value))
            .collect();

        AgentStats {
            agent_id: agent_id.clone(),
            total_tasks: self.tasks.len(),
            completed_tasks: completed.len(),
            success_count,
            failure_count,
            success_rate: ratio(success_count, completed.len()),
            avg_duration_ms: mean(durations.iter().map(|d| *d as f64)),
            avg_rating: mean(ratings.iter().copied()),
            trust_score,
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Owns every task and rating record and is the only source of trust scores.
#[derive(Debug, Default)]
pub struct ReputationEngine {
    config: ReputationConfig,
    ledgers: DashMap<AgentId, AgentLedger>,
    /// task id -> owning agent, so task operations find the right ledger.
    task_owners: DashMap<String, AgentId>,
}

impl ReputationEngine {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            config,
            ledgers: DashMap::new(),
            task_owners: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }

    pub fn start_task(&self, agent_id: &AgentId, task_type: &str) -> Result<String, StateError> {
        self.start_task_at(agent_id, task_type, Utc::now())
    }

    pub fn start_task_at(
        &self,
        agent_id: &AgentId,
        task_type: &str,
        now: DateTime<Utc>,
    ) -> Result<String, StateError> {
        check_identifier("agent_id", agent_id.as_str())?;
        check_identifier("task_type", task_type)?;

        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord {
            id: task_id.clone(),
            agent_id: agent_id.clone(),
            task_type: task_type.to_string(),
            started_at: now,
            completed_at: None,
            outcome: None,
            ratings: Vec::new(),
        };
        self.ledgers
            .entry(agent_id.clone())
            .or_default()
            .tasks
            .insert(task_id.clone(), record);
        self.task_owners.insert(task_id.clone(), agent_id.clone());

        tracing::debug!(agent_id = %agent_id, task_id = %task_id, task_type, "Task started");
        Ok(task_id)
    }

    pub fn complete_task(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), StateError> {
        self.complete_task_at(task_id, outcome, Utc::now())
    }

    pub fn complete_task_at(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.with_task_mut(task_id, |task| {
            if task.is_completed() {
                return Err(StateError::AlreadyCompleted(task_id.to_string()));
            }
            task.outcome = Some(outcome);
            task.completed_at = Some(now.max(task.started_at));
            tracing::debug!(agent_id = %task.agent_id, task_id, %outcome, "Task completed");
            Ok(())
        })
    }

    pub fn rate_task(&self, task_id: &str, rater: &AgentId, value: f64) -> Result<(), StateError> {
        self.rate_task_at(task_id, rater, value, Utc::now())
    }

    /// Record `rater`'s rating of a completed task. A rater who rates the
    /// same task again replaces their earlier rating.
    pub fn rate_task_at(
        &self,
        task_id: &str,
        rater: &AgentId,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(StateError::InvalidRating(value));
        }
        self.with_task_mut(task_id, |task| {
            if !task.is_completed() {
                return Err(StateError::TaskNotComplete(task_id.to_string()));
            }
            if task.agent_id == *rater {
                return Err(StateError::SelfRating {
                    task_id: task_id.to_string(),
                    agent_id: rater.clone(),
                });
            }
            task.ratings.retain(|r| r.rated_by != *rater);
            task.ratings.push(Rating {
                task_id: task_id.to_string(),
                rated_by: rater.clone(),
                value,
                rated_at: now,
            });
            tracing::debug!(task_id, rater = %rater, value, "Task rated");
            Ok(())
        })
    }

    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        let owner = self.task_owners.get(task_id)?.value().clone();
        let ledger = self.ledgers.get(&owner)?;
        ledger.tasks.get(task_id).cloned()
    }

    pub fn trust_score(&self, agent_id: &AgentId) -> f64 {
        self.trust_score_at(agent_id, Utc::now())
    }

    pub fn trust_score_at(&self, agent_id: &AgentId, now: DateTime<Utc>) -> f64 {
        match self.ledgers.get(agent_id) {
            Some(ledger) => compute_trust(&ledger.samples(&self.config), now, &self.config),
            None => NEUTRAL_TRUST,
        }
    }

    pub fn agent_stats(&self, agent_id: &AgentId) -> AgentStats {
        let now = Utc::now();
        match self.ledgers.get(agent_id) {
            Some(ledger) => {
                let score = compute_trust(&ledger.samples(&self.config), now, &self.config);
                ledger.stats(agent_id, score)
            }
            None => AgentLedger::default().stats(agent_id, NEUTRAL_TRUST),
        }
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.leaderboard_at(limit, Utc::now())
    }

    /// Agents ordered by descending trust score, ties broken by agent id.
    pub fn leaderboard_at(&self, limit: usize, now: DateTime<Utc>) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .ledgers
            .iter()
            .filter_map(|ledger| {
                let completed = ledger.completed().count();
                if completed < self.config.leaderboard_min_tasks {
                    return None;
                }
                let successes = ledger
                    .completed()
                    .filter(|t| t.outcome == Some(TaskOutcome::Success))
                    .count();
                Some(LeaderboardEntry {
                    agent_id: ledger.key().clone(),
                    trust_score: compute_trust(&ledger.samples(&self.config), now, &self.config),
                    total_tasks: ledger.tasks.len(),
                    success_rate: ratio(successes, completed),
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.trust_score
                .total_cmp(&a.trust_score)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        entries.truncate(limit);
        entries
    }

    fn with_task_mut<T>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TaskRecord) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let owner = self
            .task_owners
            .get(task_id)
            .map(|o| o.value().clone())
            .ok_or_else(|| StateError::UnknownTask(task_id.to_string()))?;
        let mut ledger = self
            .ledgers
            .get_mut(&owner)
            .ok_or_else(|| StateError::UnknownTask(task_id.to_string()))?;
        let task = ledger
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateError::UnknownTask(task_id.to_string()))?;
        f(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64, days_ago: i64, now: DateTime<Utc>) -> ScoreSample {
        ScoreSample { value, at: now - Duration::days(days_ago) }
    }

    #[test]
    fn weight_halves_each_half_life() {
        assert!((decay_weight(Duration::zero(), 7.0) - 1.0).abs() < 1e-12);
        assert!((decay_weight(Duration::days(7), 7.0) - 0.5).abs() < 1e-9);
        assert!((decay_weight(Duration::days(14), 7.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn future_samples_count_as_fresh() {
        assert!((decay_weight(Duration::days(-3), 7.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_samples_is_neutral() {
        assert_eq!(compute_trust(&[], Utc::now(), &ReputationConfig::default()), NEUTRAL_TRUST);
    }

    #[test]
    fn samples_outside_window_are_ignored() {
        let now = Utc::now();
        let config = ReputationConfig::default();
        let score = compute_trust(&[sample(0.0, 31, now)], now, &config);
        assert_eq!(score, NEUTRAL_TRUST);
    }

    #[test]
    fn one_half_life_gives_two_to_one_weighting() {
        let now = Utc::now();
        let config = ReputationConfig::default();
        // weights 1.0 and 0.5: (1.0*0.9 + 0.5*0.6) / 1.5 = 0.8
        let score = compute_trust(&[sample(0.9, 0, now), sample(0.6, 7, now)], now, &config);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn config_validation() {
        assert!(ReputationConfig::default().validate().is_ok());
        let bad = ReputationConfig { half_life_days: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = ReputationConfig { implicit_failure: 1.5, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn history_window_is_bounded() {
        let max = ReputationConfig {
            history_window_days: MAX_HISTORY_WINDOW_DAYS,
            ..Default::default()
        };
        assert!(max.validate().is_ok());
        let huge = ReputationConfig {
            history_window_days: 200_000_000_000_000,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
        // Unvalidated configs still score instead of panicking.
        let now = Utc::now();
        let score = compute_trust(&[sample(0.9, 400, now)], now, &huge);
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn tiny_half_life_is_rejected() {
        let tiny = ReputationConfig { half_life_days: 0.001, ..Default::default() };
        assert!(tiny.validate().is_err());
        let min = ReputationConfig { half_life_days: MIN_HALF_LIFE_DAYS, ..Default::default() };
        assert!(min.validate().is_ok());
    }

    #[test]
    fn short_half_life_keeps_history_visible() {
        let now = Utc::now();
        let config = ReputationConfig { half_life_days: MIN_HALF_LIFE_DAYS, ..Default::default() };
        // Every weight would underflow if taken relative to `now`.
        let score = compute_trust(&[sample(0.2, 20, now), sample(0.2, 25, now)], now, &config);
        assert!((score - 0.2).abs() < 1e-9);
    }
}
