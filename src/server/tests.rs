use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::{router, AppState};
use crate::extract::Envelope;
use crate::llm::{DashScopeClient, Role};
use crate::session::SessionStore;
use crate::types::Stage;

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Upstream that streams the given content deltas as chat-completion SSE.
async fn spawn_upstream(deltas: Vec<&'static str>) -> String {
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let deltas = deltas.clone();
            async move {
                let mut body = String::new();
                for delta in &deltas {
                    let chunk =
                        json!({"choices": [{"delta": {"content": delta}, "finish_reason": null}]});
                    body.push_str(&format!("data: {chunk}\n\n"));
                }
                body.push_str("data: [DONE]\n\n");
                axum::response::Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "text/event-stream")
                    .body(axum::body::Body::from(body))
                    .unwrap()
            }
        }),
    );
    spawn(app).await
}

async fn spawn_app(upstream: String) -> (String, Arc<AppState>) {
    let provider = DashScopeClient::with_base_url("test-key".into(), "qwen3-max".into(), upstream)
        .with_base_delay(Duration::from_millis(1));
    let state = Arc::new(AppState {
        provider: Arc::new(provider),
        sessions: SessionStore::new(),
    });
    (spawn(router(state.clone())).await, state)
}

/// Parse the `data:` payloads out of a raw SSE body.
fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str(payload).ok())
        .collect()
}

#[tokio::test]
async fn streamed_reply_is_relayed_enriched_and_recorded() {
    // The tasks envelope arrives cut across five deltas.
    let upstream = spawn_upstream(vec![
        "让我为你安排排查任务。{\"type\":\"ta",
        "sks\",\"data\":[{\"id\":\"1\",\"name\":\"检查机油压力\",\"desc\":\"用压力表测量机油压力\"},",
        "{\"id\":\"2\",\"name\":\"检查VVT执行器\",\"desc\":",
        "\"观察冷车启动异响\"}]}",
        "完成后告诉我结果。",
    ])
    .await;
    let (app, _state) = spawn_app(upstream).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{app}/api/chat"))
        .json(&json!({ "message": "机油灯亮了，发动机冷车有异响" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = sse_events(&body);

    // Every delta is forwarded verbatim, in order.
    let text: String = events
        .iter()
        .filter(|e| e["type"] == "text")
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert!(text.starts_with("让我为你安排排查任务。"));
    assert!(text.ends_with("完成后告诉我结果。"));
    assert!(text.contains("{\"type\":\"tasks\""));

    // One enriched event carrying the reserialized envelope: cases are
    // attached and the VVT task (three cases) is sorted ahead of the oil
    // pressure task (two cases).
    let enriched: Vec<&Value> = events.iter().filter(|e| e["type"] == "enriched").collect();
    assert_eq!(enriched.len(), 1);
    let envelope: Envelope =
        serde_json::from_str(enriched[0]["enrichedTasks"].as_str().unwrap()).unwrap();
    let tasks = match envelope {
        Envelope::Tasks { data, .. } => data,
        other => panic!("unexpected envelope: {other:?}"),
    };
    assert_eq!(tasks[0].name, "检查VVT执行器");
    assert_eq!(tasks[0].related_cases.as_ref().unwrap().len(), 3);
    assert_eq!(tasks[1].related_cases.as_ref().unwrap()[0].id, "case-004");

    // Terminal event lands on the inferred stage.
    let done = events.iter().find(|e| e["done"] == true).unwrap();
    assert_eq!(done["stage"], "decomposition");
    let session_id = done["sessionId"].as_str().unwrap();

    // The recorded assistant turn is the enriched text, spliced in place.
    let session: Value = client
        .get(format!("{app}/api/session/{session_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = session["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    let assistant = messages[1]["content"].as_str().unwrap();
    assert!(assistant.starts_with("让我为你安排排查任务。"));
    assert!(assistant.ends_with("完成后告诉我结果。"));
    assert!(assistant.contains("case-004"));
    assert_eq!(session["data"]["currentStage"], "decomposition");
}

#[tokio::test]
async fn failed_relay_reports_a_friendly_error_and_keeps_the_question() {
    let upstream_app = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down").into_response() }),
    );
    let (app, state) = spawn_app(spawn(upstream_app).await).await;
    let session = state.sessions.create();
    state.sessions.set_stage(&session.id, Stage::Execution);
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{app}/api/chat"))
        .json(&json!({ "message": "机油灯亮了", "sessionId": session.id }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = sse_events(&body);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["error"], "AI服务暂时不可用，请稍后再试。");
    assert_eq!(events[0]["done"], true);

    // The question survives the failed relay; no assistant turn and no
    // stage change are committed.
    let after = state.sessions.get(&session.id).unwrap();
    assert_eq!(after.messages.len(), 1);
    assert_eq!(after.messages[0].role, Role::User);
    assert_eq!(after.messages[0].content, "机油灯亮了");
    assert_eq!(after.current_stage, Stage::Execution);
}

#[tokio::test]
async fn chat_with_tools_executes_calls_and_reasks_the_model() {
    // First ask returns a tool call, second returns the final answer.
    let asks = Arc::new(AtomicUsize::new(0));
    let counter = asks.clone();
    let upstream_app = Router::new().route(
        "/chat/completions",
        post(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    axum::Json(json!({
                        "choices": [{
                            "message": {
                                "role": "assistant",
                                "content": "",
                                "tool_calls": [{
                                    "id": "call-1",
                                    "type": "function",
                                    "function": {
                                        "name": "queryVehicleByVIN",
                                        "arguments": "{\"vin\":\"LSVAG2180E2100001\"}"
                                    }
                                }]
                            }
                        }]
                    }))
                } else {
                    axum::Json(json!({
                        "choices": [{
                            "message": {
                                "role": "assistant",
                                "content": "这辆帕萨特的信息已经查到。"
                            }
                        }]
                    }))
                }
            }
        }),
    );
    let (app, state) = spawn_app(spawn(upstream_app).await).await;
    let client = reqwest::Client::new();

    let response: Value = client
        .post(format!("{app}/api/chat-with-tools"))
        .json(&json!({ "message": "查一下VIN LSVAG2180E2100001" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(asks.load(Ordering::SeqCst), 2);
    assert_eq!(response["content"], "这辆帕萨特的信息已经查到。");
    assert_eq!(response["toolCalls"][0]["functionName"], "queryVehicleByVIN");
    assert_eq!(response["toolCalls"][0]["result"]["brand"], "大众");

    // The executed lookup is stored on the session, and the history holds
    // the user turn plus the final assistant turn.
    let session_id = response["sessionId"].as_str().unwrap();
    let session = state.sessions.get(session_id).unwrap();
    assert_eq!(
        session.vehicle_info.as_ref().unwrap().vin,
        "LSVAG2180E2100001"
    );
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].content, "这辆帕萨特的信息已经查到。");
}

#[tokio::test]
async fn vin_query_rewrites_the_stored_user_message() {
    let upstream = spawn_upstream(vec!["这辆车的信息如下。"]).await;
    let (app, _state) = spawn_app(upstream).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{app}/api/chat"))
        .json(&json!({ "message": "帮我查一下 LSVAG2180E2100001" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let done = sse_events(&body)
        .into_iter()
        .find(|e| e["done"] == true)
        .unwrap();
    let session_id = done["sessionId"].as_str().unwrap().to_string();

    let session: Value = client
        .get(format!("{app}/api/session/{session_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let user = session["data"]["messages"][0]["content"].as_str().unwrap();
    assert!(user.starts_with("用户查询VIN码：LSVAG2180E2100001。"));
    assert!(user.contains("帕萨特"));
    assert_eq!(session["data"]["vehicleInfo"]["brand"], "大众");
}

#[tokio::test]
async fn session_routes_mutate_and_miss_unknown_ids() {
    let (app, _state) = spawn_app(spawn_upstream(vec![]).await).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{app}/api/session/no-such-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let missing = client
        .post(format!("{app}/api/session/no-such-id/stage"))
        .json(&json!({ "stage": "execution" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let vehicle: Value = client
        .get(format!("{app}/api/vehicle/LHGCR1640H8000002"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(vehicle["success"], true);
    assert_eq!(vehicle["data"]["brand"], "本田");
}
