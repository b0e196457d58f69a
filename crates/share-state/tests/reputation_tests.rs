use chrono::{Duration, Utc};

use share_protocol::{AgentId, TaskOutcome, MAX_IDENTIFIER_LEN};
use share_state::reputation::*;
use share_state::StateError;

fn engine() -> ReputationEngine {
    ReputationEngine::new(ReputationConfig::default())
}

#[test]
fn test_unknown_agent_is_neutral() {
    assert_eq!(engine().trust_score(&AgentId::from("nobody")), 0.5);
}

#[test]
fn test_in_flight_task_does_not_move_score() {
    let rep = engine();
    let agent = AgentId::from("worker");
    rep.start_task(&agent, "translate").unwrap();
    assert_eq!(rep.trust_score(&agent), 0.5);
}

#[test]
fn test_complete_unknown_task() {
    let err = engine().complete_task("missing", TaskOutcome::Success).unwrap_err();
    assert_eq!(err, StateError::UnknownTask("missing".into()));
}

#[test]
fn test_complete_twice_fails() {
    let rep = engine();
    let task = rep.start_task(&AgentId::from("w"), "search").unwrap();
    rep.complete_task(&task, TaskOutcome::Success).unwrap();
    assert_eq!(
        rep.complete_task(&task, TaskOutcome::Failure).unwrap_err(),
        StateError::AlreadyCompleted(task.clone())
    );
    assert_eq!(rep.task(&task).unwrap().outcome, Some(TaskOutcome::Success));
}

#[test]
fn test_rating_out_of_range() {
    let rep = engine();
    let task = rep.start_task(&AgentId::from("w"), "search").unwrap();
    rep.complete_task(&task, TaskOutcome::Success).unwrap();
    let rater = AgentId::from("r");
    assert_eq!(rep.rate_task(&task, &rater, 1.5).unwrap_err(), StateError::InvalidRating(1.5));
    assert!(matches!(rep.rate_task(&task, &rater, -0.1), Err(StateError::InvalidRating(_))));
    assert!(matches!(rep.rate_task(&task, &rater, f64::NAN), Err(StateError::InvalidRating(_))));
}

#[test]
fn test_rating_in_flight_task() {
    let rep = engine();
    let task = rep.start_task(&AgentId::from("w"), "search").unwrap();
    assert_eq!(
        rep.rate_task(&task, &AgentId::from("r"), 0.8).unwrap_err(),
        StateError::TaskNotComplete(task.clone())
    );
}

#[test]
fn test_self_rating_rejected() {
    let rep = engine();
    let worker = AgentId::from("w");
    let task = rep.start_task(&worker, "search").unwrap();
    rep.complete_task(&task, TaskOutcome::Success).unwrap();
    assert!(matches!(
        rep.rate_task(&task, &worker, 1.0),
        Err(StateError::SelfRating { .. })
    ));
}

#[test]
fn test_two_ratings_reflect_recency() {
    let rep = engine();
    let worker = AgentId::from("w");
    let now = Utc::now();
    let started = now - Duration::days(2);

    let task = rep.start_task_at(&worker, "research", started).unwrap();
    rep.complete_task_at(&task, TaskOutcome::Success, started + Duration::hours(1)).unwrap();
    rep.rate_task_at(&task, &AgentId::from("r1"), 0.9, now - Duration::days(1)).unwrap();
    rep.rate_task_at(&task, &AgentId::from("r2"), 0.7, now).unwrap();

    let score = rep.trust_score_at(&worker, now);
    assert!(score > 0.7 && score < 1.0, "score {score} must lie strictly in (0.7, 1.0)");
    // The newer 0.7 outweighs the older 0.9, pulling below the plain mean.
    assert!(score < 0.8, "recent rating should dominate, got {score}");
}

#[test]
fn test_rating_order_changes_score() {
    let now = Utc::now();
    let score_for = |first: f64, second: f64| {
        let rep = engine();
        let worker = AgentId::from("w");
        let task = rep.start_task_at(&worker, "t", now - Duration::days(3)).unwrap();
        rep.complete_task_at(&task, TaskOutcome::Success, now - Duration::days(3)).unwrap();
        rep.rate_task_at(&task, &AgentId::from("r1"), first, now - Duration::days(2)).unwrap();
        rep.rate_task_at(&task, &AgentId::from("r2"), second, now).unwrap();
        rep.trust_score_at(&worker, now)
    };

    assert!(score_for(0.9, 0.7) < score_for(0.7, 0.9));
}

#[test]
fn test_unrated_failures_pull_score_down() {
    let rep = engine();
    let good = AgentId::from("good");
    let bad = AgentId::from("bad");
    for _ in 0..5 {
        let t = rep.start_task(&good, "t").unwrap();
        rep.complete_task(&t, TaskOutcome::Success).unwrap();
        let t = rep.start_task(&bad, "t").unwrap();
        rep.complete_task(&t, TaskOutcome::Failure).unwrap();
    }
    let t = rep.start_task(&bad, "t").unwrap();
    rep.complete_task(&t, TaskOutcome::Timeout).unwrap();

    assert!(rep.trust_score(&good) > 0.5);
    assert!(rep.trust_score(&bad) < 0.5);
}

#[test]
fn test_rerating_replaces_previous_value() {
    let rep = engine();
    let worker = AgentId::from("w");
    let rater = AgentId::from("r");
    let task = rep.start_task(&worker, "t").unwrap();
    rep.complete_task(&task, TaskOutcome::Success).unwrap();
    rep.rate_task(&task, &rater, 0.1).unwrap();
    rep.rate_task(&task, &rater, 0.9).unwrap();

    let record = rep.task(&task).unwrap();
    assert_eq!(record.ratings.len(), 1);
    assert!((rep.trust_score(&worker) - 0.9).abs() < 1e-9);
}

#[test]
fn test_scores_stay_in_bounds() {
    let rep = engine();
    let worker = AgentId::from("w");
    for value in [0.0, 1.0, 1.0, 0.0, 1.0] {
        let t = rep.start_task(&worker, "t").unwrap();
        rep.complete_task(&t, TaskOutcome::Partial).unwrap();
        rep.rate_task(&t, &AgentId::from("r"), value).unwrap();
        let score = rep.trust_score(&worker);
        assert!((0.0..=1.0).contains(&score));
    }
}

#[test]
fn test_leaderboard_orders_and_breaks_ties() {
    let rep = engine();
    for name in ["carol", "alice", "bob"] {
        let t = rep.start_task(&AgentId::from(name), "t").unwrap();
        rep.complete_task(&t, TaskOutcome::Success).unwrap();
    }
    let t = rep.start_task(&AgentId::from("dave"), "t").unwrap();
    rep.complete_task(&t, TaskOutcome::Failure).unwrap();

    let board = rep.leaderboard(10);
    let order: Vec<&str> = board.iter().map(|e| e.agent_id.as_str()).collect();
    assert_eq!(order, vec!["alice", "bob", "carol", "dave"]);
    assert_eq!(rep.leaderboard(2).len(), 2);
}

#[test]
fn test_leaderboard_min_tasks() {
    let rep = ReputationEngine::new(ReputationConfig {
        leaderboard_min_tasks: 2,
        ..Default::default()
    });
    let busy = AgentId::from("busy");
    for _ in 0..2 {
        let t = rep.start_task(&busy, "t").unwrap();
        rep.complete_task(&t, TaskOutcome::Success).unwrap();
    }
    let t = rep.start_task(&AgentId::from("idle"), "t").unwrap();
    rep.complete_task(&t, TaskOutcome::Success).unwrap();

    let board = rep.leaderboard(10);
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].agent_id, busy);
}

#[test]
fn test_agent_stats() {
    let rep = engine();
    let worker = AgentId::from("w");
    let ok = rep.start_task(&worker, "t").unwrap();
    rep.complete_task(&ok, TaskOutcome::Success).unwrap();
    rep.rate_task(&ok, &AgentId::from("r"), 0.8).unwrap();
    let failed = rep.start_task(&worker, "t").unwrap();
    rep.complete_task(&failed, TaskOutcome::Timeout).unwrap();
    rep.start_task(&worker, "t").unwrap();

    let stats = rep.agent_stats(&worker);
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.completed_tasks, 2);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);
    assert!((stats.success_rate - 0.5).abs() < 1e-9);
    assert_eq!(stats.avg_rating, Some(0.8));
}

#[test]
fn test_empty_task_type_rejected() {
    assert!(matches!(
        engine().start_task(&AgentId::from("w"), " "),
        Err(StateError::Invalid(_))
    ));
}

#[test]
fn test_oversized_task_identifiers_rejected() {
    let rep = engine();
    let long = "x".repeat(MAX_IDENTIFIER_LEN + 1);
    assert!(matches!(
        rep.start_task(&AgentId::from(long.as_str()), "t"),
        Err(StateError::Invalid(_))
    ));
    assert!(matches!(
        rep.start_task(&AgentId::from("w"), &long),
        Err(StateError::Invalid(_))
    ));
    assert!(rep.leaderboard(10).is_empty());
}
