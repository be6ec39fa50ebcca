mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strata::config::{DeletionPolicy, ResourceDefinition, StackDefinition};
use strata::executor::TaskRunner;
use strata::resource::{Action, ActionOutcome, ActionTask, Operation, ResourceRef, ResourceState, Status};
use strata::stack::Stack;
use strata::state::{MemoryStore, ResourceStore};
use strata::StackError;

use common::{recorder, registry, CallLog};

async fn single(def: ResourceDefinition, log: &Arc<CallLog>) -> (Arc<Stack>, ResourceRef) {
    let stack = Stack::new(
        StackDefinition::new("test").with_resource("r", def),
        registry(log),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();
    let resource = stack.resource("r").await.unwrap();
    (stack, resource)
}

async fn run(resource: &ResourceRef, operation: Operation) -> strata::Result<ActionOutcome> {
    TaskRunner::new(ActionTask::new("r", Arc::clone(resource), operation))
        .with_poll_interval(Duration::from_millis(5))
        .run()
        .await
}

async fn create(stack: &Arc<Stack>, resource: &ResourceRef) -> strata::Result<ActionOutcome> {
    run(resource, Operation::Create { stack: Arc::clone(stack) }).await
}

async fn state(resource: &ResourceRef) -> Option<ResourceState> {
    resource.lock().await.state()
}

const fn st(action: Action, status: Status) -> Option<ResourceState> {
    Some(ResourceState::new(action, status))
}

#[tokio::test]
async fn test_create_moves_to_create_complete() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("p", json!(1)).with_property("polls", json!(2)), &log).await;

    assert_eq!(create(&stack, &resource).await.unwrap(), ActionOutcome::Completed);
    assert_eq!(state(&resource).await, st(Action::Create, Status::Complete));

    let resource = resource.lock().await;
    assert_eq!(resource.resource_id(), Some("r-id"));
    assert_eq!(resource.properties()["p"], json!(1));
    assert!(resource.snapshot().is_some());
    assert_eq!(log.calls(), vec!["create:r", "created:r"]);
}

#[tokio::test]
async fn test_create_twice_is_invalid() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder(), &log).await;
    create(&stack, &resource).await.unwrap();

    let err = create(&stack, &resource).await.unwrap_err();
    assert!(matches!(err, StackError::InvalidState { action: Action::Create, .. }));
    assert_eq!(state(&resource).await, st(Action::Create, Status::Complete));
}

#[tokio::test]
async fn test_failed_create_is_create_failed() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("fail", json!(true)), &log).await;

    let err = create(&stack, &resource).await.unwrap_err();
    assert!(matches!(err, StackError::ResourceFailure { action: Action::Create, .. }));
    assert!(!err.is_timeout());
    assert_eq!(state(&resource).await, st(Action::Create, Status::Failed));
}

#[tokio::test]
async fn test_failed_completion_check_is_create_failed() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("fail_check", json!(true)), &log).await;

    let err = create(&stack, &resource).await.unwrap_err();
    assert!(matches!(err, StackError::ResourceFailure { action: Action::Create, .. }));
    assert_eq!(log.calls(), vec!["create:r"]);

    let resource = resource.lock().await;
    assert_eq!(resource.state(), st(Action::Create, Status::Failed));
    assert!(resource.status_reason().contains("created of r broke"));
    assert_eq!(resource.resource_id(), Some("r-id"));
}

#[tokio::test]
async fn test_invalid_properties_fail_validation() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("unknown", json!(1)), &log).await;

    let err = create(&stack, &resource).await.unwrap_err();
    assert!(matches!(err, StackError::Validation { .. }));
    assert_eq!(state(&resource).await, st(Action::Create, Status::Failed));
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_timeout_is_distinct_from_failure() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("hang", json!(true)), &log).await;

    let err = TaskRunner::new(ActionTask::new(
        "r",
        Arc::clone(&resource),
        Operation::Create { stack: Arc::clone(&stack) },
    ))
    .with_poll_interval(Duration::from_millis(5))
    .with_timeout(Duration::from_millis(50))
    .run()
    .await
    .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(state(&resource).await, st(Action::Create, Status::Failed));
}

#[tokio::test]
async fn test_timeout_lets_started_create_finish() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("slow_ms", json!(200)), &log).await;

    let err = TaskRunner::new(ActionTask::new(
        "r",
        Arc::clone(&resource),
        Operation::Create { stack: Arc::clone(&stack) },
    ))
    .with_poll_interval(Duration::from_millis(5))
    .with_timeout(Duration::from_millis(50))
    .run()
    .await
    .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(state(&resource).await, st(Action::Create, Status::Failed));
    assert_eq!(resource.lock().await.resource_id(), Some("r-id"));

    // The object the provider made is still known, so delete reaches it.
    assert_eq!(run(&resource, Operation::Delete).await.unwrap(), ActionOutcome::Completed);
    assert_eq!(log.names("delete"), vec!["r"]);
    assert_eq!(state(&resource).await, st(Action::Delete, Status::Complete));
}

#[tokio::test]
async fn test_cancel_leaves_create_failed() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("hang", json!(true)), &log).await;

    let mut runner = TaskRunner::new(ActionTask::new(
        "r",
        Arc::clone(&resource),
        Operation::Create { stack: Arc::clone(&stack) },
    ))
    .with_poll_interval(Duration::from_millis(5));
    let token = runner.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let err = runner.run().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(state(&resource).await, st(Action::Create, Status::Failed));
}

#[tokio::test]
async fn test_delete_of_uncreated_resource_is_noop() {
    let log = CallLog::new();
    let (_stack, resource) = single(recorder(), &log).await;

    assert_eq!(run(&resource, Operation::Delete).await.unwrap(), ActionOutcome::NoOp);
    assert_eq!(state(&resource).await, None);
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_delete_twice_is_noop_the_second_time() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder(), &log).await;
    create(&stack, &resource).await.unwrap();

    assert_eq!(run(&resource, Operation::Delete).await.unwrap(), ActionOutcome::Completed);
    assert_eq!(state(&resource).await, st(Action::Delete, Status::Complete));
    assert_eq!(resource.lock().await.resource_id(), None);

    assert_eq!(run(&resource, Operation::Delete).await.unwrap(), ActionOutcome::NoOp);
    assert_eq!(log.names("delete"), vec!["r"]);
}

#[tokio::test]
async fn test_missing_provider_object_completes_delete() {
    for when in ["begin", "check"] {
        let log = CallLog::new();
        let (stack, resource) = single(recorder().with_property("gone", json!(when)), &log).await;
        create(&stack, &resource).await.unwrap();

        assert_eq!(run(&resource, Operation::Delete).await.unwrap(), ActionOutcome::Completed);
        let resource = resource.lock().await;
        assert_eq!(resource.state(), st(Action::Delete, Status::Complete), "gone on {}", when);
        assert_eq!(resource.status_reason(), "Provider object already gone");
        assert_eq!(resource.resource_id(), None);
        assert_eq!(log.names("delete"), vec!["r"]);
        assert!(log.names("deleted").is_empty());
    }
}

#[tokio::test]
async fn test_retained_resource_skips_provider_delete() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_deletion_policy(DeletionPolicy::Retain), &log).await;
    create(&stack, &resource).await.unwrap();

    assert_eq!(run(&resource, Operation::Delete).await.unwrap(), ActionOutcome::Completed);
    let resource = resource.lock().await;
    assert_eq!(resource.state(), st(Action::Delete, Status::Complete));
    assert_eq!(resource.status_reason(), "Resource retained");
    assert!(log.names("delete").is_empty());
}

#[tokio::test]
async fn test_update_in_place() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("p", json!("a")), &log).await;
    create(&stack, &resource).await.unwrap();

    let new_def = recorder().with_property("p", json!("b"));
    let outcome = run(
        &resource,
        Operation::Update { definition: new_def.clone(), resolved: new_def.clone() },
    )
    .await
    .unwrap();

    assert_eq!(outcome, ActionOutcome::Completed);
    let resource = resource.lock().await;
    assert_eq!(resource.state(), st(Action::Update, Status::Complete));
    assert_eq!(resource.properties()["p"], json!("b"));
    assert_eq!(resource.snapshot(), Some(&new_def));
    assert_eq!(resource.definition(), &new_def);
    assert_eq!(log.names("update"), vec!["r"]);
}

#[tokio::test]
async fn test_unchanged_update_does_nothing() {
    let log = CallLog::new();
    let def = recorder().with_property("p", json!("a"));
    let (stack, resource) = single(def.clone(), &log).await;
    create(&stack, &resource).await.unwrap();

    let outcome = run(&resource, Operation::Update { definition: def.clone(), resolved: def })
        .await
        .unwrap();
    assert_eq!(outcome, ActionOutcome::Unchanged);
    assert_eq!(state(&resource).await, st(Action::Create, Status::Complete));
    assert!(log.names("update").is_empty());
}

#[tokio::test]
async fn test_update_of_fixed_property_requires_replacement() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("q", json!(1)), &log).await;
    create(&stack, &resource).await.unwrap();
    let events_before = resource.lock().await.events().len();

    let new_def = recorder().with_property("q", json!(2));
    let outcome = run(&resource, Operation::Update { definition: new_def.clone(), resolved: new_def })
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::ReplaceRequired);
    let resource = resource.lock().await;
    assert_eq!(resource.state(), st(Action::Create, Status::Complete));
    assert_eq!(resource.events().len(), events_before);
    assert_eq!(resource.properties()["q"], json!(1));
    assert!(log.names("update").is_empty());
}

#[tokio::test]
async fn test_update_of_failed_create_requires_replacement() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("fail", json!(true)), &log).await;
    create(&stack, &resource).await.unwrap_err();

    let new_def = recorder();
    let outcome = run(&resource, Operation::Update { definition: new_def.clone(), resolved: new_def })
        .await
        .unwrap();
    assert_eq!(outcome, ActionOutcome::ReplaceRequired);
}

#[tokio::test]
async fn test_failed_update_is_update_failed() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder().with_property("p", json!(1)), &log).await;
    create(&stack, &resource).await.unwrap();

    let new_def = recorder().with_property("p", json!(2)).with_property("fail", json!(true));
    let err = run(&resource, Operation::Update { definition: new_def.clone(), resolved: new_def })
        .await
        .unwrap_err();
    assert!(matches!(err, StackError::ResourceFailure { action: Action::Update, .. }));
    assert_eq!(state(&resource).await, st(Action::Update, Status::Failed));
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let log = CallLog::new();
    let (stack, resource) = single(recorder(), &log).await;

    let err = run(&resource, Operation::Suspend).await.unwrap_err();
    assert!(matches!(err, StackError::InvalidState { action: Action::Suspend, .. }));

    create(&stack, &resource).await.unwrap();
    assert_eq!(run(&resource, Operation::Resume).await.unwrap(), ActionOutcome::NoOp);

    assert_eq!(run(&resource, Operation::Suspend).await.unwrap(), ActionOutcome::Completed);
    assert_eq!(state(&resource).await, st(Action::Suspend, Status::Complete));
    assert_eq!(run(&resource, Operation::Suspend).await.unwrap(), ActionOutcome::NoOp);

    assert_eq!(run(&resource, Operation::Resume).await.unwrap(), ActionOutcome::Completed);
    assert_eq!(state(&resource).await, st(Action::Resume, Status::Complete));
    assert_eq!(log.names("suspend"), vec!["r"]);
    assert_eq!(log.names("resume"), vec!["r"]);
}

#[tokio::test]
async fn test_transitions_are_persisted_with_events() {
    let log = CallLog::new();
    let store = Arc::new(MemoryStore::new());
    let stack = Stack::new(
        StackDefinition::new("test").with_resource("r", recorder()),
        registry(&log),
        store.clone(),
    )
    .await
    .unwrap();
    let resource = stack.resource("r").await.unwrap();
    create(&stack, &resource).await.unwrap();

    let record = store.get_resource(stack.id(), "r").await.unwrap().unwrap();
    assert_eq!(record.state, st(Action::Create, Status::Complete));
    assert_eq!(record.resource_id.as_deref(), Some("r-id"));

    let states: Vec<String> = store
        .list_events(stack.id(), Some("r"))
        .await
        .unwrap()
        .iter()
        .map(|e| e.state().to_string())
        .collect();
    assert_eq!(states, vec!["CREATE_IN_PROGRESS", "CREATE_COMPLETE"]);
}

#[tokio::test]
async fn test_destroy_forgets_the_record() {
    let log = CallLog::new();
    let store = Arc::new(MemoryStore::new());
    let stack = Stack::new(
        StackDefinition::new("test").with_resource("r", recorder()),
        registry(&log),
        store.clone(),
    )
    .await
    .unwrap();
    let resource = stack.resource("r").await.unwrap();
    create(&stack, &resource).await.unwrap();

    assert_eq!(run(&resource, Operation::Destroy).await.unwrap(), ActionOutcome::Completed);
    assert!(store.get_resource(stack.id(), "r").await.unwrap().is_none());
}
