use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use strata::config::ResourceDefinition;
use strata::dag::{DependencyGraph, DependencyTaskGroup, Direction, NodeExecutor, NodeStatus};
use strata::executor::CancelToken;
use strata::StackError;

/// Build a graph from (name, depends_on) pairs.
fn graph(specs: &[(&str, &[&str])]) -> DependencyGraph {
    let defs: BTreeMap<String, ResourceDefinition> = specs
        .iter()
        .map(|(name, deps)| {
            let def = deps
                .iter()
                .fold(ResourceDefinition::new("T"), |def, dep| def.with_depends_on(dep));
            (name.to_string(), def)
        })
        .collect();
    DependencyGraph::build(&defs).unwrap()
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn index(&self, entry: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("missing {}", entry))
    }
}

/// Each node logs start/end, sleeps, and fails when its name is in `failing`.
fn executor(recorder: Arc<Recorder>, failing: &'static [&'static str], sleep_ms: u64) -> NodeExecutor {
    Arc::new(move |name: String| {
        let recorder = Arc::clone(&recorder);
        async move {
            recorder.events.lock().unwrap().push(format!("start:{}", name));
            let now = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            recorder.in_flight.fetch_sub(1, Ordering::SeqCst);

            if failing.contains(&name.as_str()) {
                return Err(StackError::ResourceNotFound(name));
            }
            recorder.events.lock().unwrap().push(format!("end:{}", name));
            Ok(())
        }
        .boxed()
    })
}

fn diamond() -> DependencyGraph {
    // a <- b, a <- c, (b, c) <- d
    graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])])
}

#[tokio::test]
async fn test_forward_runs_dependencies_first() {
    let recorder = Arc::new(Recorder::default());
    let report = DependencyTaskGroup::new(&diamond(), Direction::Forward)
        .run(executor(Arc::clone(&recorder), &[], 5))
        .await;

    assert!(report.error.is_none());
    assert_eq!(report.succeeded(), 4);
    assert!(recorder.index("end:a") < recorder.index("start:b"));
    assert!(recorder.index("end:a") < recorder.index("start:c"));
    assert!(recorder.index("end:b") < recorder.index("start:d"));
    assert!(recorder.index("end:c") < recorder.index("start:d"));
}

#[tokio::test]
async fn test_reverse_runs_dependents_first() {
    let recorder = Arc::new(Recorder::default());
    let report = DependencyTaskGroup::new(&diamond(), Direction::Reverse)
        .run(executor(Arc::clone(&recorder), &[], 5))
        .await;

    assert!(report.into_result().is_ok());
    assert!(recorder.index("end:d") < recorder.index("start:b"));
    assert!(recorder.index("end:d") < recorder.index("start:c"));
    assert!(recorder.index("end:b") < recorder.index("start:a"));
    assert!(recorder.index("end:c") < recorder.index("start:a"));
}

#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    let recorder = Arc::new(Recorder::default());
    let g = graph(&[("a", &[]), ("b", &[]), ("c", &[]), ("d", &[])]);
    DependencyTaskGroup::new(&g, Direction::Forward)
        .run(executor(Arc::clone(&recorder), &[], 50))
        .await
        .into_result()
        .unwrap();
    assert!(recorder.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_parallelism_limit_is_respected() {
    let recorder = Arc::new(Recorder::default());
    let g = graph(&[("a", &[]), ("b", &[]), ("c", &[]), ("d", &[]), ("e", &[])]);
    DependencyTaskGroup::new(&g, Direction::Forward)
        .with_parallelism(2)
        .run(executor(Arc::clone(&recorder), &[], 20))
        .await
        .into_result()
        .unwrap();
    assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(recorder.events().len(), 10);
}

#[tokio::test]
async fn test_failure_stops_dependents_and_is_reported() {
    let recorder = Arc::new(Recorder::default());
    let report = DependencyTaskGroup::new(&diamond(), Direction::Forward)
        .run(executor(Arc::clone(&recorder), &["b"], 5))
        .await;

    assert_eq!(report.failed(), 1);
    assert!(!recorder.events().contains(&"start:d".to_string()));
    let d = report.results.iter().find(|r| r.name == "d").unwrap();
    assert_eq!(d.status, NodeStatus::Skipped);
    match report.error {
        Some(StackError::ResourceNotFound(name)) => assert_eq!(name, "b"),
        other => panic!("expected b's failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_in_flight_siblings_finish_after_failure() {
    let recorder = Arc::new(Recorder::default());
    // "slow" is already running when "fast" fails.
    let g = graph(&[("fast", &[]), ("slow", &[])]);
    let executor: NodeExecutor = {
        let recorder = Arc::clone(&recorder);
        Arc::new(move |name: String| {
            let recorder = Arc::clone(&recorder);
            async move {
                if name == "fast" {
                    return Err(StackError::ResourceNotFound(name));
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
                recorder.events.lock().unwrap().push(format!("end:{}", name));
                Ok(())
            }
            .boxed()
        })
    };

    let report = DependencyTaskGroup::new(&g, Direction::Forward)
        .run(executor)
        .await;
    assert!(report.error.is_some());
    assert_eq!(recorder.events(), vec!["end:slow"]);
    assert_eq!(report.succeeded(), 1);
}

#[tokio::test]
async fn test_panicking_node_becomes_error() {
    let g = graph(&[("boom", &[])]);
    let executor: NodeExecutor = Arc::new(|name: String| {
        async move {
            if name == "boom" {
                panic!("kaboom");
            }
            Ok::<(), StackError>(())
        }
        .boxed()
    });

    let report = DependencyTaskGroup::new(&g, Direction::Forward)
        .run(executor)
        .await;
    assert!(matches!(report.error, Some(StackError::Panicked(ref n)) if n == "boom"));
}

#[tokio::test]
async fn test_cancel_stops_scheduling() {
    let recorder = Arc::new(Recorder::default());
    let token = CancelToken::new();
    let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

    let executor: NodeExecutor = {
        let recorder = Arc::clone(&recorder);
        let token = token.clone();
        Arc::new(move |name: String| {
            let recorder = Arc::clone(&recorder);
            let token = token.clone();
            async move {
                recorder.events.lock().unwrap().push(format!("start:{}", name));
                if name == "a" {
                    token.cancel();
                }
                Ok::<(), StackError>(())
            }
            .boxed()
        })
    };

    let report = DependencyTaskGroup::new(&g, Direction::Forward)
        .with_cancel_token(token)
        .run(executor)
        .await;

    assert_eq!(recorder.events(), vec!["start:a"]);
    assert_eq!(report.skipped(), 2);
    assert!(matches!(report.error, Some(StackError::Cancelled { .. })));
}

#[tokio::test]
async fn test_empty_group_succeeds() {
    let g = graph(&[]);
    let executor: NodeExecutor = Arc::new(|_| async { Ok::<(), StackError>(()) }.boxed());
    let report = DependencyTaskGroup::new(&g, Direction::Reverse)
        .run(executor)
        .await;
    assert!(report.results.is_empty());
    assert!(report.error.is_none());
}
