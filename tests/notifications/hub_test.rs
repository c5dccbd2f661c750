use chrono::Utc;
use std::sync::Arc;

use stagehand::config::NotificationConfig;
use stagehand::constants::events;
use stagehand::models::{Job, NewJob, SubjectId};
use stagehand::notifications::{HubError, NotificationEvent, NotificationHub, SubjectVerifier};

fn event(owner: &str, event_type: &str) -> NotificationEvent {
    let job = Job::from_new(11, NewJob::new("img://11", owner), Utc::now());
    NotificationEvent::for_job(&job, event_type, "progress update")
}

#[tokio::test]
async fn test_reconnect_keeps_a_single_live_channel() {
    let hub = NotificationHub::default();
    let mut first = hub.connect("user-1").unwrap();
    let mut second = hub.connect("user-1").unwrap();

    assert_eq!(hub.connected_subjects(), vec!["user-1".to_string()]);
    assert!(hub.send("user-1", &event("user-1", events::JOB_STAGE_COMPLETED)));

    assert_eq!(first.recv().await.unwrap().message_type, events::CONNECTION);
    let closed = first.recv().await.unwrap();
    assert!(closed.is_close());
    assert!(first.try_recv().is_none());

    assert_eq!(second.recv().await.unwrap().message_type, events::CONNECTION);
    let delivered = second.recv().await.unwrap();
    assert_eq!(delivered.message_type, events::JOB_STAGE_COMPLETED);
    assert_eq!(delivered.job_id, Some(11));
}

#[tokio::test]
async fn test_full_channel_drops_only_that_connection() {
    let hub = NotificationHub::new(&NotificationConfig {
        channel_capacity: 2,
        ..NotificationConfig::default()
    });
    let _slow = hub.connect("slow").unwrap();
    let mut healthy = hub.connect("healthy").unwrap();

    assert!(hub.send("slow", &event("slow", events::JOB_SUBMITTED)));
    assert!(!hub.send("slow", &event("slow", events::JOB_STAGE_STARTED)));
    assert!(!hub.is_connected("slow"));

    assert!(hub.is_connected("healthy"));
    assert!(hub.publish(&event("healthy", events::JOB_SUBMITTED)));
    healthy.recv().await.unwrap();
    assert_eq!(healthy.recv().await.unwrap().message_type, events::JOB_SUBMITTED);
}

#[tokio::test]
async fn test_send_to_unknown_subject_is_false() {
    let hub = NotificationHub::default();
    assert!(!hub.send("nobody", &event("nobody", events::JOB_FAILED)));
    assert!(!hub.disconnect("nobody"));
}

#[tokio::test]
async fn test_concurrent_connects_are_safe() {
    let hub = Arc::new(NotificationHub::default());
    let mut handles = Vec::new();
    for n in 0..50 {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move { hub.connect(format!("subject-{n}")).unwrap() }));
    }
    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap());
    }
    assert_eq!(hub.connected_subjects().len(), 50);

    for n in 0..50 {
        let subject = format!("subject-{n}");
        assert!(hub.send(&subject, &event(&subject, events::JOB_COMPLETED)));
    }
}

struct PrefixVerifier;

impl SubjectVerifier for PrefixVerifier {
    fn verify(&self, token: &str) -> Option<SubjectId> {
        token.strip_prefix("token:").map(str::to_string)
    }
}

#[tokio::test]
async fn test_authenticated_connect() {
    let hub = NotificationHub::default();
    let connection = hub.connect_authenticated("token:user-9", &PrefixVerifier).unwrap();
    assert_eq!(connection.subject, "user-9");
    assert!(matches!(
        hub.connect_authenticated("garbage", &PrefixVerifier),
        Err(HubError::Unauthorized(_))
    ));
    assert_eq!(hub.connected_subjects().len(), 1);
}

#[tokio::test]
async fn test_heartbeat_drops_unacknowledged_connections() {
    let hub = NotificationHub::default();
    let mut live = hub.connect("live").unwrap();
    let _silent = hub.connect("silent").unwrap();

    let report = hub.heartbeat_once(Utc::now());
    assert_eq!(report.pinged, 2);
    live.recv().await.unwrap();
    assert!(live.recv().await.unwrap().is_ping());

    let later = Utc::now() + chrono::Duration::minutes(10);
    let report = hub.heartbeat_once(later);
    assert_eq!(report.disconnected, 2);
    assert!(hub.connected_subjects().is_empty());
}

#[test]
fn test_push_message_wire_shape() {
    let message = stagehand::notifications::PushMessage::from(&event("user-1", events::JOB_RETRY_SCHEDULED));
    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["type"], events::JOB_RETRY_SCHEDULED);
    assert_eq!(json["jobId"], 11);
    assert_eq!(json["state"], "pending");
    assert_eq!(json["progress"], 0);
}
