mod common;

use std::sync::Arc;
use std::time::Duration;

use common::task_manager_gateway;
use tempfile::tempdir;
use uuid::Uuid;
use weaver_forge::config::WeaverConfig;
use weaver_forge::events::TaskEvent;
use weaver_forge::service::{ServiceError, WeaverService, MAX_PROMPT_CHARS};
use weaver_forge::state::TaskStatus;

fn service(output_dir: &std::path::Path) -> WeaverService {
    let config = WeaverConfig {
        output_dir: output_dir.to_path_buf(),
        ..Default::default()
    };
    WeaverService::new(config, Arc::new(task_manager_gateway())).unwrap()
}

#[tokio::test]
async fn submit_rejects_empty_and_oversized_prompts() {
    let dir = tempdir().unwrap();
    let svc = service(dir.path());

    assert!(matches!(
        svc.submit(" \n\t "),
        Err(ServiceError::InvalidPrompt(_))
    ));
    assert!(matches!(
        svc.submit(&"x".repeat(MAX_PROMPT_CHARS + 1)),
        Err(ServiceError::InvalidPrompt(_))
    ));
    assert!(svc.registry().is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let config = WeaverConfig {
        stall_timeout_seconds: 900,
        task_timeout_seconds: 600,
        ..Default::default()
    };
    let err = WeaverService::new(config, Arc::new(task_manager_gateway()))
        .err()
        .unwrap();
    assert!(matches!(err, ServiceError::Config(_)));
}

#[tokio::test]
async fn subscription_sees_every_event_through_completion() {
    let dir = tempdir().unwrap();
    let svc = service(dir.path());

    let mut sub = svc.submit_and_subscribe("  task manager app  ").unwrap();

    let mut seen = Vec::new();
    while let Some(event) = sub.events.recv().await {
        let done = event.is_terminal();
        seen.push(event);
        if done {
            break;
        }
    }
    let summary = sub.handle.await.unwrap().unwrap();

    assert_eq!(summary.status, TaskStatus::Completed);
    assert!(matches!(
        seen.first(),
        Some(TaskEvent::Progress { percent: 5, .. })
    ));
    assert_eq!(seen.last(), Some(&TaskEvent::completion(sub.task_id)));

    let state = svc.status(sub.task_id).unwrap();
    assert_eq!(state.prompt, "task manager app");
    assert_eq!(state.status, TaskStatus::Completed);
}

#[tokio::test]
async fn submit_returns_before_the_task_finishes() {
    let dir = tempdir().unwrap();
    let svc = service(dir.path());

    let task_id = svc.submit("task manager app").unwrap();
    let initial = svc.status(task_id).unwrap();
    assert!(!initial.status.is_terminal());

    let mut status = initial.status;
    for _ in 0..500 {
        status = svc.status(task_id).unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, TaskStatus::Completed);
    assert!(dir.path().join(task_id.to_string()).is_dir());
}

#[tokio::test]
async fn unknown_task_has_no_status() {
    let dir = tempdir().unwrap();
    let svc = service(dir.path());
    assert!(svc.status(Uuid::new_v4()).is_none());
}

#[tokio::test]
async fn start_and_shutdown_manage_the_sweeper() {
    let dir = tempdir().unwrap();
    let mut svc = service(dir.path());

    assert!(!svc.is_running());
    svc.start();
    svc.start();
    assert!(svc.is_running());
    svc.shutdown().await;
    assert!(!svc.is_running());
    svc.shutdown().await;
}
