#![allow(clippy::unwrap_used, clippy::expect_used)]

use clusterbuster_core::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Task serialization roundtrip keeps identity, type and priority
// ---------------------------------------------------------------------------

#[test]
fn task_serialization_roundtrip() {
    let task = Task::new("summarize", serde_json::json!({"doc": "case-17"}))
        .with_priority(Priority::High);

    let json = serde_json::to_string(&task).unwrap();
    let parsed: Task = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, task);
    assert!(json.contains("\"priority\":\"high\""));
}

// ---------------------------------------------------------------------------
// 2. Missing payload and priority fall back to defaults
// ---------------------------------------------------------------------------

#[test]
fn task_deserializes_with_defaults() {
    let id = Uuid::new_v4();
    let json = format!(
        r#"{{"id":"{id}","task_type":"search","submitted_at":"2026-01-01T00:00:00Z"}}"#
    );
    let task: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.priority, Priority::Normal);
    assert!(task.payload.is_null());
}

// ---------------------------------------------------------------------------
// 3. Error Display for every taxonomy member
// ---------------------------------------------------------------------------

#[test]
fn error_display_for_taxonomy() {
    let id = Uuid::new_v4();

    let err = ClusterError::NoAvailableAgent {
        task_type: "ocr".into(),
    };
    assert_eq!(err.to_string(), "No available agent for task type: ocr");

    let err = ClusterError::health("agent-7", "timed out after 50ms");
    assert_eq!(
        err.to_string(),
        "Health check failed for agent agent-7: timed out after 50ms"
    );

    let err = ClusterError::ReassignmentExhausted { task_id: id };
    assert_eq!(
        err.to_string(),
        format!("No available agent for failed task reassignment: {id}")
    );

    let err = ClusterError::Config("bad toml".into());
    assert_eq!(err.to_string(), "Config error: bad toml");
}

// ---------------------------------------------------------------------------
// 4. Errors are cloneable and comparable
// ---------------------------------------------------------------------------

#[test]
fn errors_clone_and_compare() {
    let id = Uuid::new_v4();
    let err = ClusterError::execution(id, "agent crashed");
    let copy = err.clone();
    assert_eq!(err, copy);
    assert_ne!(err, ClusterError::Cancelled { task_id: id });
}

// ---------------------------------------------------------------------------
// 5. A failed -> reassigned -> running cycle still ends in a terminal state
// ---------------------------------------------------------------------------

#[test]
fn reassignment_cycle_is_allowed() {
    let path = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Reassigned,
        JobStatus::Running,
        JobStatus::Completed,
    ];
    for pair in path.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "{} -> {} should be allowed",
            pair[0],
            pair[1]
        );
    }
    assert!(path[path.len() - 1].is_terminal());
}
