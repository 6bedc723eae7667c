mod common;

use axum::{
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::*;
use async_trait::async_trait;
use flowrunner::{
    credentials::{Connection, MemoryCredentialStore},
    error::EngineError,
    execution::{ExecutionLogSink, ExecutionRecord, ExecutionStatus, MemoryExecutionStore, NewExecution, NodeLog},
    nodes::NodeHandlerRegistry,
    runtime::{progress::{NoopPublisher, ProgressKind}, queue::RunJob, WorkflowExecutor},
    workflow::{TriggerSource, WorkflowRegistry},
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn stubs(recorder: &Recorder) -> NodeHandlerRegistry {
    let mut handlers = builtins("http://127.0.0.1:9", MemoryCredentialStore::new());
    handlers.register("record", Arc::new(recorder.clone()));
    handlers.register("fail", Arc::new(Failing));
    handlers.register("tolerated", Arc::new(Tolerated));
    handlers
}

#[tokio::test]
async fn test_http_result_flows_into_variable_and_email() {
    let sent = Arc::new(Mutex::new(Vec::<String>::new()));
    let mailbox = sent.clone();
    let app = Router::new()
        .route("/stats", get(|| async { Json(json!({ "total": 42 })) }))
        .route(
            "/gmail/v1/users/me/messages/send",
            post(move |Json(body): Json<Value>| {
                let mailbox = mailbox.clone();
                async move {
                    let raw = URL_SAFE_NO_PAD.decode(body["raw"].as_str().unwrap()).unwrap();
                    mailbox.lock().unwrap().push(String::from_utf8(raw).unwrap());
                    Json(json!({ "id": "m1", "threadId": "t1" }))
                }
            }),
        );
    let base = serve(app).await;

    let credentials = MemoryCredentialStore::new().with_connection(
        USER,
        "gmail",
        Connection {
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
        },
    );
    let harness = Harness::new(builtins(&base, credentials));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("fetch", "http", json!({ "url": format!("{}/stats", base) })),
            node("total", "variable", json!({ "key": "total", "value": "{{fetch.data.total}}" })),
            node("notify", "email", json!({
                "to": "{{trigger.recipient}}",
                "subject": "Daily total",
                "body": "Total is {{variables.total}}"
            })),
        ]),
        json!([edge("start", "fetch"), edge("fetch", "total"), edge("total", "notify")]),
    );

    let (result, record) = harness.run(json!({ "recipient": "ops@example.com" })).await;
    assert_eq!(result.unwrap(), record.id);
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(
        statuses(&record),
        pairs(&[
            ("start", "success"),
            ("fetch", "success"),
            ("total", "success"),
            ("notify", "success")
        ])
    );

    // single-template values keep their JSON type
    assert_eq!(record.logs[2].output.as_ref().unwrap()["value"], json!(42));
    assert_eq!(record.logs[3].output.as_ref().unwrap()["messageId"], "m1");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("To: ops@example.com"));
    assert!(sent[0].contains("Total is 42"));
}

#[tokio::test]
async fn test_stubbed_http_total_reaches_email_body() {
    let recorder = Recorder::default();
    let mut handlers = stubs(&recorder);
    handlers.register("http", Arc::new(Fixed(json!({ "total": 42 }))));
    handlers.register("email", Arc::new(recorder.clone()));
    let harness = Harness::new(handlers);
    harness.install(
        json!([
            node("trigger", "trigger", json!({})),
            node("http", "http", json!({ "url": "http://unused.invalid" })),
            node("variable", "variable", json!({ "key": "total", "value": "{{http.output.total}}" })),
            node("email", "email", json!({ "to": "ops@example.com", "body": "Total: {{variables.total}}" })),
        ]),
        json!([edge("trigger", "http"), edge("http", "variable"), edge("variable", "email")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok());
    assert_eq!(record.status, ExecutionStatus::Success);
    let ids: Vec<&str> = record.logs.iter().map(|log| log.node_id.as_str()).collect();
    assert_eq!(ids, vec!["trigger", "http", "variable", "email"]);
    assert_eq!(record.logs[2].output.as_ref().unwrap()["value"], json!(42));
    assert_eq!(recorder.calls()[0]["body"], "Total: 42");
}

#[tokio::test]
async fn test_continue_on_error_keeps_running() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("flaky", "fail", json!({ "continueOnError": true })),
            node("after", "record", json!({ "seen": "{{flaky.message}}", "failed": "{{flaky.error}}" })),
        ]),
        json!([edge("start", "flaky"), edge("flaky", "after")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok());
    assert_eq!(record.status, ExecutionStatus::Success);
    assert!(record.error.is_none());
    assert_eq!(
        statuses(&record),
        pairs(&[("start", "success"), ("flaky", "failed"), ("after", "success")])
    );
    assert_eq!(record.logs[1].error.as_deref(), Some("boom"));
    assert_eq!(recorder.calls(), vec![json!({ "seen": "boom", "failed": true })]);
}

#[tokio::test]
async fn test_fatal_failure_stops_the_run() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("broken", "fail", json!({})),
            node("never", "record", json!({})),
        ]),
        json!([edge("start", "broken"), edge("broken", "never")]),
    );

    let (result, record) = harness.run(json!({ "apiKey": "hunter2" })).await;
    let failed = result.unwrap_err();
    assert_eq!(failed.execution_id.as_deref(), Some(record.id.as_str()));
    assert!(matches!(
        failed.source,
        EngineError::NodeExecution { ref node_id, .. } if node_id == "broken"
    ));

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.end_time.is_some());
    assert_eq!(statuses(&record), pairs(&[("start", "success"), ("broken", "failed")]));
    assert!(recorder.calls().is_empty());

    let error = record.error.unwrap();
    assert_eq!(error["failedNodeId"], "broken");
    assert_eq!(error["failedNodeType"], "fail");
    assert_eq!(error["completedNodes"], json!(["start"]));
    assert_eq!(error["attempt"], 1);
    assert_eq!(error["context"]["trigger"]["apiKey"], "[REDACTED]");
}

#[tokio::test]
async fn test_condition_skips_the_other_branch() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("check", "condition", json!({ "condition": "{{trigger.amount}} > 100" })),
            node("big", "record", json!({ "path": "big" })),
            node("small", "record", json!({ "path": "small" })),
            node("join", "record", json!({ "path": "join" })),
        ]),
        json!([
            edge("start", "check"),
            branch("check", "big", "true"),
            branch("check", "small", "false"),
            edge("big", "join"),
            edge("small", "join"),
        ]),
    );

    let (result, record) = harness.run(json!({ "amount": 250 })).await;
    assert!(result.is_ok());
    assert_eq!(
        statuses(&record),
        pairs(&[
            ("start", "success"),
            ("check", "success"),
            ("big", "success"),
            ("small", "skipped"),
            ("join", "success")
        ])
    );
    assert_eq!(record.logs[1].output.as_ref().unwrap()["branch"], "true");

    let paths: Vec<Value> = recorder.calls().iter().map(|c| c["path"].clone()).collect();
    assert_eq!(paths, vec![json!("big"), json!("join")]);
}

#[tokio::test]
async fn test_skips_propagate_down_a_dead_branch() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("check", "ifElse", json!({ "condition": false })),
            node("yes", "record", json!({})),
            node("yes-again", "record", json!({})),
        ]),
        json!([
            edge("start", "check"),
            branch("check", "yes", "true"),
            edge("yes", "yes-again"),
        ]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok());
    assert_eq!(
        statuses(&record),
        pairs(&[
            ("start", "success"),
            ("check", "success"),
            ("yes", "skipped"),
            ("yes-again", "skipped")
        ])
    );
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_loop_runs_body_once_per_item() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("each", "loop", json!({ "source": "{{trigger.numbers}}", "loopVariable": "n" })),
            node("body", "record", json!({ "index": "{{loop.index}}", "item": "{{loop.n}}" })),
            node("a", "record", json!({ "step": "a" })),
            node("b", "record", json!({ "step": "b" })),
            node("summary", "record", json!({ "collected": "{{body}}" })),
        ]),
        json!([
            edge("start", "each"),
            edge("each", "body"),
            edge("start", "a"),
            edge("a", "b"),
            edge("b", "summary"),
        ]),
    );

    let (result, record) = harness.run(json!({ "numbers": [1, 2, 3] })).await;
    assert!(result.is_ok());

    let calls = recorder.calls();
    let body_calls: Vec<&Value> = calls.iter().filter(|c| c.get("index").is_some()).collect();
    assert_eq!(
        body_calls,
        vec![
            &json!({ "index": 0, "item": 1 }),
            &json!({ "index": 1, "item": 2 }),
            &json!({ "index": 2, "item": 3 }),
        ]
    );

    // per-iteration outputs surface as one array after the loop
    let summary = calls.last().unwrap();
    assert_eq!(
        summary["collected"],
        json!([
            { "index": 0, "item": 1 },
            { "index": 1, "item": 2 },
            { "index": 2, "item": 3 }
        ])
    );

    let body_logs = record.logs.iter().filter(|log| log.node_id == "body").count();
    assert_eq!(body_logs, 3);
    let each_log = record.logs.iter().find(|log| log.node_id == "each").unwrap();
    assert_eq!(each_log.output.as_ref().unwrap()["itemCount"], 3);
}

#[tokio::test]
async fn test_loop_body_waits_for_inputs_outside_the_loop() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("each", "loop", json!({ "source": [1, 2] })),
            node("lookup", "record", json!({ "v": 7 })),
            node("body", "record", json!({ "dep": "{{lookup.v}}" })),
        ]),
        json!([edge("each", "body"), edge("lookup", "body")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(
        statuses(&record),
        pairs(&[
            ("lookup", "success"),
            ("each", "success"),
            ("body", "success"),
            ("body", "success")
        ])
    );
    assert_eq!(
        recorder.calls(),
        vec![json!({ "v": 7 }), json!({ "dep": 7 }), json!({ "dep": 7 })]
    );
}

#[tokio::test]
async fn test_condition_inside_loop_picks_a_branch_per_item() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("each", "loop", json!({ "source": [5, 50, 7], "loopVariable": "n" })),
            node("check", "condition", json!({ "condition": "{{loop.n}} > 10" })),
            node("big", "record", json!({ "big": "{{loop.n}}" })),
            node("small", "record", json!({ "small": "{{loop.n}}" })),
            node("a", "record", json!({ "step": "a" })),
            node("b", "record", json!({ "step": "b" })),
            node("summary", "record", json!({ "bigs": "{{big}}" })),
        ]),
        json!([
            edge("start", "each"),
            edge("each", "check"),
            branch("check", "big", "true"),
            branch("check", "small", "false"),
            edge("start", "a"),
            edge("a", "b"),
            edge("b", "summary"),
        ]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok(), "{:?}", result);

    let picked: Vec<Value> = recorder
        .calls()
        .into_iter()
        .filter(|c| c.get("big").is_some() || c.get("small").is_some())
        .collect();
    assert_eq!(
        picked,
        vec![json!({ "small": 5 }), json!({ "big": 50 }), json!({ "small": 7 })]
    );

    let big_statuses: Vec<&str> = record
        .logs
        .iter()
        .filter(|log| log.node_id == "big")
        .map(|log| log.status.as_str())
        .collect();
    assert_eq!(big_statuses, vec!["skipped", "success", "skipped"]);

    let summary = recorder.calls().last().cloned().unwrap();
    assert_eq!(summary["bigs"], json!([null, { "big": 50 }, null]));
}

#[tokio::test]
async fn test_tolerated_loop_failure_skips_body() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("each", "loop", json!({ "source": "{{trigger.count}}", "continueOnError": true })),
            node("body", "record", json!({})),
        ]),
        json!([edge("each", "body")]),
    );

    let (result, record) = harness.run(json!({ "count": 5 })).await;
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(statuses(&record), pairs(&[("each", "failed"), ("body", "skipped")]));
    assert_eq!(record.logs[0].output.as_ref().unwrap()["error"], true);
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_handler_can_ask_to_continue_after_failure() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("send", "tolerated", json!({})),
            node("after", "record", json!({ "why": "{{send.message}}" })),
        ]),
        json!([edge("send", "after")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(statuses(&record), pairs(&[("send", "failed"), ("after", "success")]));
    assert_eq!(record.logs[0].error.as_deref(), Some("rate limited"));
    assert_eq!(recorder.calls(), vec![json!({ "why": "rate limited" })]);
}

#[tokio::test]
async fn test_nested_loops_see_their_own_items() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("rows", "loop", json!({ "source": [[1, 2], [3]], "loopVariable": "row" })),
            node("cells", "loop", json!({ "source": "{{loop.row}}", "loopVariable": "cell" })),
            node("leaf", "record", json!({ "cell": "{{loop.cell}}", "index": "{{loop.index}}" })),
        ]),
        json!([edge("rows", "cells"), edge("cells", "leaf")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(
        recorder.calls(),
        vec![
            json!({ "cell": 1, "index": 0 }),
            json!({ "cell": 2, "index": 1 }),
            json!({ "cell": 3, "index": 0 }),
        ]
    );
    assert_eq!(record.logs.iter().filter(|log| log.node_id == "cells").count(), 2);
}

#[tokio::test]
async fn test_empty_loop_skips_body() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("each", "loop", json!({ "source": [] })),
            node("body", "record", json!({})),
        ]),
        json!([edge("each", "body")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(result.is_ok());
    assert_eq!(statuses(&record), pairs(&[("each", "success"), ("body", "skipped")]));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_non_array_loop_source_fails_the_run() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("each", "loop", json!({ "source": "{{trigger.count}}" })),
            node("body", "record", json!({})),
        ]),
        json!([edge("each", "body")]),
    );

    let (result, record) = harness.run(json!({ "count": 5 })).await;
    assert!(matches!(
        result.unwrap_err().source,
        EngineError::InvalidLoopSource { ref node_id, .. } if node_id == "each"
    ));
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_missing_handler_aborts_without_log() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([
            node("start", "trigger", json!({})),
            node("odd", "teleport", json!({})),
        ]),
        json!([edge("start", "odd")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(matches!(
        result.unwrap_err().source,
        EngineError::MissingHandler { ref node_type, .. } if node_type == "teleport"
    ));
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(statuses(&record), pairs(&[("start", "success")]));
    assert_eq!(record.error.unwrap()["failedNodeId"], "odd");
}

#[tokio::test]
async fn test_cycle_fails_before_any_node_runs() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([node("a", "record", json!({})), node("b", "record", json!({}))]),
        json!([edge("a", "b"), edge("b", "a")]),
    );

    let (result, record) = harness.run(json!({})).await;
    assert!(matches!(result.unwrap_err().source, EngineError::Cycle { ordered: 0, total: 2 }));
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.logs.is_empty());
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_other_users_cannot_run_the_workflow() {
    let harness = Harness::new(NodeHandlerRegistry::new());
    harness.install(json!([node("start", "trigger", json!({}))]), json!([]));

    let (result, record) = harness.run_as("mallory", json!({})).await;
    assert!(matches!(result.unwrap_err().source, EngineError::WorkflowNotFound { .. }));
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_progress_events_bracket_the_run() {
    let recorder = Recorder::default();
    let harness = Harness::new(stubs(&recorder));
    harness.install(
        json!([node("start", "trigger", json!({})), node("next", "record", json!({}))]),
        json!([edge("start", "next")]),
    );
    let mut events = harness.progress.subscribe_user(USER);

    let (result, _) = harness.run(json!({})).await;
    assert!(result.is_ok());

    let mut kinds = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = matches!(event.kind, ProgressKind::Completed { .. });
        kinds.push(event.kind);
        if done {
            break;
        }
    }
    assert_eq!(kinds.first(), Some(&ProgressKind::Started { total_nodes: 2 }));
    assert!(kinds.contains(&ProgressKind::Progress {
        completed: 2,
        total: 2,
        current_node: "next".into()
    }));
    assert_eq!(
        kinds.last(),
        Some(&ProgressKind::Completed {
            status: ExecutionStatus::Success,
            error: None
        })
    );
}

/// Store that refuses to start runs
#[derive(Clone, Default)]
struct NoStart(MemoryExecutionStore);

#[async_trait]
impl ExecutionLogSink for NoStart {
    async fn create_record(&self, new: NewExecution) -> anyhow::Result<String> {
        self.0.create_record(new).await
    }

    async fn append_log(&self, execution_id: &str, log: &NodeLog) -> anyhow::Result<()> {
        self.0.append_log(execution_id, log).await
    }

    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> anyhow::Result<()> {
        if status == ExecutionStatus::Running {
            anyhow::bail!("disk full");
        }
        self.0.set_status(execution_id, status).await
    }

    async fn set_error(&self, execution_id: &str, payload: Value) -> anyhow::Result<()> {
        self.0.set_error(execution_id, payload).await
    }

    async fn get_record(&self, execution_id: &str) -> anyhow::Result<Option<ExecutionRecord>> {
        self.0.get_record(execution_id).await
    }

    async fn list_for_workflow(&self, workflow_id: &str, user_id: &str) -> anyhow::Result<Vec<ExecutionRecord>> {
        self.0.list_for_workflow(workflow_id, user_id).await
    }
}

#[tokio::test]
async fn test_run_that_cannot_start_is_marked_failed() {
    let store = NoStart::default();
    let executor = WorkflowExecutor::new(
        Arc::new(WorkflowRegistry::detached()),
        Arc::new(store.clone()),
        Arc::new(NodeHandlerRegistry::new()),
        Arc::new(NoopPublisher),
    );

    let job = RunJob::new(WORKFLOW_ID, USER, json!({}), TriggerSource::Manual);
    let failed = executor.execute_workflow(&job).await.unwrap_err();
    assert!(matches!(failed.source, EngineError::Store(_)));

    let record = store.0.records().pop().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.end_time.is_some());
    assert!(record.error.unwrap()["message"].as_str().unwrap().contains("disk full"));
}
