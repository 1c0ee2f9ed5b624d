//! Integration tests for the boardd daemon.
//! Spins up a real daemon on free ports and drives it over HTTP + WebSocket.

use std::sync::Arc;

use boardd::{
    client::{remote::BoardClient, remote::EventFeed, remote::MoveOutcome, ClientCache},
    config::BoardConfig,
    order::{DropTarget, MoveRequest},
    store::Task,
    ws::event::ChangeKind,
    AppContext,
};
use serde_json::json;

/// Start a daemon on random free ports and return its context.
async fn start_test_daemon() -> Arc<AppContext> {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let ws_port = get_free_port();
    let rest_port = get_free_port();

    let config = BoardConfig::new(
        Some(ws_port),
        Some(rest_port),
        Some(data_dir),
        Some("warn".to_string()),
        None,
    );
    let ctx = Arc::new(AppContext::new(config).await.unwrap());

    let rest_ctx = ctx.clone();
    tokio::spawn(async move {
        boardd::rest::run(rest_ctx).await.ok();
    });
    let ws_ctx = ctx.clone();
    tokio::spawn(async move {
        boardd::ws::run(ws_ctx).await.ok();
    });

    // Give the servers a moment to bind
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    ctx
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn post_task(rest_port: u16, body: serde_json::Value) -> Task {
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{rest_port}/api/tasks"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn crud_round_trip_over_http() {
    let ctx = start_test_daemon().await;
    let port = ctx.config.rest_port;
    let http = reqwest::Client::new();

    let created = post_task(port, json!({ "title": "ship it", "order": 10_000.0 })).await;
    assert_eq!(created.section, "Triage");
    assert_eq!(created.order, 10_000.0);

    // Listed with the same order key it was created with.
    let listed: Vec<Task> = http
        .get(format!("http://127.0.0.1:{port}/api/tasks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].order, 10_000.0);

    let patched: Task = http
        .patch(format!("http://127.0.0.1:{port}/api/tasks/{}", created.id))
        .json(&json!({ "title": "ship it twice", "completed": true }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched.title, "ship it twice");
    assert!(patched.completed);
    assert_eq!(patched.order, 10_000.0);

    let deleted: Task = http
        .delete(format!("http://127.0.0.1:{port}/api/tasks/{}", created.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted.id, created.id);

    // Gone now: both mutation routes answer 404.
    let resp = http
        .patch(format!("http://127.0.0.1:{port}/api/tasks/{}", created.id))
        .json(&json!({ "completed": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let resp = http
        .delete(format!("http://127.0.0.1:{port}/api/tasks/{}", created.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_fields_answer_400() {
    let ctx = start_test_daemon().await;
    let port = ctx.config.rest_port;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("http://127.0.0.1:{port}/api/tasks"))
        .json(&json!({ "title": "bad", "section": "Z", "order": 1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let created = post_task(port, json!({ "title": "dated", "order": 1.0 })).await;
    let resp = http
        .patch(format!("http://127.0.0.1:{port}/api/tasks/{}", created.id))
        .json(&json!({ "revisitDate": "not-a-date" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn every_connected_client_receives_each_broadcast() {
    let ctx = start_test_daemon().await;

    let mut feed_a = EventFeed::connect(ctx.config.port).await.unwrap();
    let mut feed_b = EventFeed::connect(ctx.config.port).await.unwrap();

    let created = post_task(
        ctx.config.rest_port,
        json!({ "title": "broadcast me", "order": 10_000.0 }),
    )
    .await;

    // Both subscribers, the originator's own feed included, see the commit.
    for feed in [&mut feed_a, &mut feed_b] {
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), feed.next_event())
            .await
            .expect("broadcast timed out")
            .unwrap()
            .expect("feed closed");
        assert_eq!(event.kind, ChangeKind::Create);
        assert_eq!(event.task.id, created.id);
        assert_eq!(event.task.title, "broadcast me");
    }
}

#[tokio::test]
async fn second_client_cache_converges_via_broadcasts() {
    let ctx = start_test_daemon().await;
    let client = BoardClient::new(ctx.config.rest_port);

    // Client B mirrors the board purely from the feed.
    let mut feed = EventFeed::connect(ctx.config.port).await.unwrap();
    let mut mirror = ClientCache::new();
    mirror.replace_all(client.fetch_tasks().await.unwrap());

    let a = client.add_task("first", boardd::store::Section::Triage).await.unwrap();
    let b = client.add_task("second", boardd::store::Section::Triage).await.unwrap();
    client.delete_task(a.id).await.unwrap();

    for _ in 0..3 {
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), feed.next_event())
            .await
            .expect("broadcast timed out")
            .unwrap()
            .expect("feed closed");
        mirror.apply_event(&event);
    }

    let tasks = mirror.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, b.id);
    assert_eq!(tasks[0].order, 20_000.0);
}

#[tokio::test]
async fn drag_before_first_halves_the_key_end_to_end() {
    let ctx = start_test_daemon().await;
    let client = BoardClient::new(ctx.config.rest_port);

    // Empty Triage: A appends at 10000, B at 20000.
    let a = client.add_task("A", boardd::store::Section::Triage).await.unwrap();
    let b = client.add_task("B", boardd::store::Section::Triage).await.unwrap();
    assert_eq!(a.order, 10_000.0);
    assert_eq!(b.order, 20_000.0);

    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await.unwrap());

    let outcome = client
        .move_task(
            &mut cache,
            &MoveRequest {
                task_id: b.id,
                section: "Triage".to_string(),
                target: DropTarget::OnTask(a.id),
            },
        )
        .await
        .unwrap();

    match outcome {
        MoveOutcome::Committed(tasks) => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].order, 5_000.0);
        }
        MoveOutcome::Resynced { .. } => panic!("single-key move should commit"),
    }

    // Server truth: B before A, A's key untouched.
    let listed = client.fetch_tasks().await.unwrap();
    let ids: Vec<i64> = listed.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
    assert_eq!(listed.iter().find(|t| t.id == a.id).unwrap().order, 10_000.0);
}

#[tokio::test]
async fn exhausted_midpoint_renormalizes_the_whole_section() {
    let ctx = start_test_daemon().await;
    let client = BoardClient::new(ctx.config.rest_port);

    // Two keys one ULP apart leave no representable midpoint.
    let low = 1_000.0f64;
    let high = f64::from_bits(low.to_bits() + 1);
    let t1 = post_task(ctx.config.rest_port, json!({ "title": "one", "section": "A", "order": low })).await;
    let t2 = post_task(ctx.config.rest_port, json!({ "title": "two", "section": "A", "order": high })).await;
    let mover = post_task(ctx.config.rest_port, json!({ "title": "wedge", "order": 1.0 })).await;

    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await.unwrap());

    let outcome = client
        .move_task(
            &mut cache,
            &MoveRequest {
                task_id: mover.id,
                section: "A".to_string(),
                target: DropTarget::AtIndex(1),
            },
        )
        .await
        .unwrap();

    let committed = match outcome {
        MoveOutcome::Committed(tasks) => tasks,
        MoveOutcome::Resynced { .. } => panic!("renormalization batch should commit"),
    };
    assert_eq!(committed.len(), 3, "every task in the section is re-keyed");

    // Relative sequence preserved, keys re-spaced to even GAP multiples.
    let section_a: Vec<Task> = client
        .fetch_tasks()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.section == "A")
        .collect();
    let ids: Vec<i64> = section_a.iter().map(|t| t.id).collect();
    let orders: Vec<f64> = section_a.iter().map(|t| t.order).collect();
    assert_eq!(ids, vec![t1.id, mover.id, t2.id]);
    assert_eq!(orders, vec![10_000.0, 20_000.0, 30_000.0]);
}

#[tokio::test]
async fn failed_move_rolls_the_cache_back_to_its_snapshot() {
    let ctx = start_test_daemon().await;
    let client = BoardClient::new(ctx.config.rest_port);
    client.add_task("stable", boardd::store::Section::Triage).await.unwrap();
    let x = client.add_task("X", boardd::store::Section::Triage).await.unwrap();

    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await.unwrap());
    let before = cache.tasks();

    // A client pointed at a dead port: the PATCH fails, and so does the
    // resync fetch; the rolled-back snapshot is all it has.
    let dead = BoardClient::new(get_free_port());
    let err = dead
        .move_task(
            &mut cache,
            &MoveRequest {
                task_id: x.id,
                section: "A".to_string(),
                target: DropTarget::End,
            },
        )
        .await;
    assert!(err.is_err());
    assert_eq!(cache.tasks(), before, "cache must match its pre-move snapshot");

    // Server state was never touched either.
    let listed = client.fetch_tasks().await.unwrap();
    assert!(listed.iter().all(|t| t.section == "Triage"));
}

#[tokio::test]
async fn invalid_move_never_reaches_the_wire() {
    let ctx = start_test_daemon().await;
    let client = BoardClient::new(ctx.config.rest_port);
    let t = client.add_task("only", boardd::store::Section::Triage).await.unwrap();

    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await.unwrap());
    let before = cache.tasks();

    let err = client
        .move_task(
            &mut cache,
            &MoveRequest {
                task_id: t.id,
                section: "NotASection".to_string(),
                target: DropTarget::End,
            },
        )
        .await;
    assert!(err.is_err());
    assert_eq!(cache.tasks(), before, "invalid move leaves state untouched");
}

#[tokio::test]
async fn health_answers_on_both_ports() {
    let ctx = start_test_daemon().await;
    let http = reqwest::Client::new();

    let rest: serde_json::Value = http
        .get(format!("http://127.0.0.1:{}/api/health", ctx.config.rest_port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rest["status"], "ok");

    // Plain HTTP health on the WebSocket port (first-bytes peek).
    let ws: serde_json::Value = http
        .get(format!("http://127.0.0.1:{}/health", ctx.config.port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ws["status"], "ok");
    assert_eq!(ws["port"], ctx.config.port);
}
