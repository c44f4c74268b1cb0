//! The two chat endpoints. `/api/chat` relays the completion stream as SSE
//! and runs enrichment on the settled text; `/api/chat-with-tools` resolves
//! tool calls server-side and answers with a single JSON body.

use std::convert::Infallible;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use regex::Regex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info};

use super::SharedState;
use crate::enrich;
use crate::llm::{ApiError, ChatMessage, StreamingCallback, ToolCall};
use crate::prompts;
use crate::session::infer_stage;
use crate::types::{ChatRequest, Session, Stage};
use crate::vehicle;

fn vin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[A-HJ-NPR-Z0-9]{17}").expect("static pattern"))
}

fn plate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[京津沪渝冀豫云辽黑湘皖鲁新苏浙赣鄂桂甘晋蒙陕吉闽贵粤青藏川宁琼使领][A-Z][A-HJ-NP-Z0-9]{5,6}",
        )
        .expect("static pattern")
    })
}

/// Look the session up, falling back to a fresh one, and apply an explicit
/// stage override from the request.
fn resolve_session(state: &SharedState, request: &ChatRequest) -> Session {
    let mut session = request
        .session_id
        .as_deref()
        .and_then(|id| state.sessions.get(id))
        .unwrap_or_else(|| state.sessions.create());

    if let Some(stage) = request.stage {
        state.sessions.set_stage(&session.id, stage);
        session.current_stage = stage;
    }
    session
}

/// Prompt window: system prompt for the stage plus the last ten turns.
fn prompt_window(state: &SharedState, session_id: &str, stage: Stage) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(prompts::system_prompt(stage))];
    if let Some(session) = state.sessions.get(session_id) {
        let history = &session.messages;
        let tail = history.len().saturating_sub(10);
        messages.extend_from_slice(&history[tail..]);
    }
    messages
}

pub async fn chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Sse<UnboundedReceiverStream<Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(err) = run_chat(&state, request, &tx).await {
            error!("chat stream failed: {err:#}");
            let message = friendly_stream_error(&err);
            let _ = send_json(&tx, &json!({ "error": message, "done": true }));
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

type EventSender = mpsc::UnboundedSender<Result<Event, Infallible>>;

fn send_json(tx: &EventSender, value: &serde_json::Value) -> Result<()> {
    let event = Event::default().json_data(value)?;
    tx.send(Ok(event))
        .map_err(|_| anyhow!("client disconnected"))
}

async fn run_chat(state: &SharedState, request: ChatRequest, tx: &EventSender) -> Result<()> {
    let session = resolve_session(state, &request);
    let current_stage = session.current_stage;

    // Identifier queries get the vehicle record resolved up front and the
    // message rewritten so the model answers with the record it was given.
    let mut enhanced = request.message.clone();
    if let Some(vin) = vin_re().find(&request.message) {
        let vehicle = vehicle::by_vin(vin.as_str());
        let record = serde_json::to_string(&vehicle)?;
        state.sessions.set_vehicle_info(&session.id, vehicle);
        enhanced = format!(
            "用户查询VIN码：{}。车辆信息如下：{}。请按照vehicle JSON格式输出车辆信息。",
            vin.as_str(),
            record
        );
    } else if let Some(plate) = plate_re().find(&request.message) {
        let vehicle = vehicle::by_plate(plate.as_str());
        let record = serde_json::to_string(&vehicle)?;
        state.sessions.set_vehicle_info(&session.id, vehicle);
        enhanced = format!(
            "用户查询车牌号：{}。车辆信息如下：{}。请按照vehicle JSON格式输出车辆信息。",
            plate.as_str(),
            record
        );
    }

    // The user turn is stored before the upstream attempt, so a failed
    // relay still leaves the question in the history.
    state
        .sessions
        .add_message(&session.id, ChatMessage::user(enhanced));

    let messages = prompt_window(state, &session.id, current_stage);

    let sender = tx.clone();
    let callback: StreamingCallback = Box::new(move |delta| {
        let event = Event::default().json_data(json!({ "content": delta, "type": "text" }))?;
        sender
            .send(Ok(event))
            .map_err(|_| anyhow!("client disconnected"))
    });

    let full = state.provider.chat_streamed(&messages, &callback).await?;

    let enriched = enrich::enrich_response(&full);
    let final_content = match &enriched {
        Some(e) => e.content.clone(),
        None => full,
    };

    state
        .sessions
        .add_message(&session.id, ChatMessage::assistant(final_content.clone()));

    let updated_stage = match infer_stage(&final_content) {
        Some(next) if next != current_stage => {
            state.sessions.set_stage(&session.id, next);
            next
        }
        Some(next) => next,
        None => current_stage,
    };

    if let Some(e) = enriched {
        send_json(tx, &json!({ "enrichedTasks": e.envelope_json, "type": "enriched" }))?;
    }

    send_json(
        tx,
        &json!({ "done": true, "sessionId": session.id, "stage": updated_stage }),
    )?;
    info!(session = %session.id, stage = updated_stage.as_str(), "chat turn complete");
    Ok(())
}

/// User-facing wording for a failed relay. The exhausted error already
/// carries its translation; plain transport errors get mapped here.
fn friendly_stream_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Exhausted { message, .. }) => message.clone(),
        Some(ApiError::Timeout(_)) => "请求超时，请检查网络连接后重试。".to_string(),
        Some(ApiError::Network(_)) => "无法连接到AI服务，请稍后再试。".to_string(),
        _ => "抱歉，AI服务暂时不可用，请稍后再试。".to_string(),
    }
}

pub async fn chat_with_tools(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    match run_chat_with_tools(&state, request).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            error!("chat-with-tools failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "服务器内部错误" })),
            )
                .into_response()
        }
    }
}

async fn run_chat_with_tools(
    state: &SharedState,
    request: ChatRequest,
) -> Result<serde_json::Value> {
    let session = resolve_session(state, &request);
    let current_stage = session.current_stage;

    state
        .sessions
        .add_message(&session.id, ChatMessage::user(request.message));

    let mut messages = prompt_window(state, &session.id, current_stage);
    let tools = prompts::tools_for_stage(current_stage);

    let response = state.provider.chat_with_tools(&messages, &tools).await?;

    let tool_calls = match response.tool_calls {
        Some(calls) if !calls.is_empty() => calls,
        _ => {
            state
                .sessions
                .add_message(&session.id, ChatMessage::assistant(response.content.clone()));
            return Ok(json!({
                "content": response.content,
                "sessionId": session.id,
                "stage": current_stage,
            }));
        }
    };

    let mut results = Vec::with_capacity(tool_calls.len());
    for call in &tool_calls {
        let result = execute_tool_call(state, &session.id, call)?;
        results.push(json!({
            "toolCallId": call.id,
            "functionName": call.function.name,
            "result": result,
        }));
    }

    messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
    for (call, result) in tool_calls.iter().zip(&results) {
        messages.push(ChatMessage::tool_result(
            call.id.clone(),
            serde_json::to_string(&result["result"])?,
        ));
    }

    let final_response = state.provider.chat(&messages).await?;
    state
        .sessions
        .add_message(&session.id, ChatMessage::assistant(final_response.clone()));

    Ok(json!({
        "content": final_response,
        "sessionId": session.id,
        "stage": current_stage,
        "toolCalls": results,
    }))
}

fn execute_tool_call(
    state: &SharedState,
    session_id: &str,
    call: &ToolCall,
) -> Result<serde_json::Value> {
    let args: serde_json::Value = serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| json!({}));

    let result = match call.function.name.as_str() {
        "queryVehicleByVIN" => {
            let vin = args["vin"].as_str().unwrap_or_default();
            let vehicle = vehicle::by_vin(vin);
            state.sessions.set_vehicle_info(session_id, vehicle.clone());
            serde_json::to_value(vehicle)?
        }
        "queryVehicleByPlate" => {
            let plate = args["plateNumber"].as_str().unwrap_or_default();
            let vehicle = vehicle::by_plate(plate);
            state.sessions.set_vehicle_info(session_id, vehicle.clone());
            serde_json::to_value(vehicle)?
        }
        "getCommonFaults" => {
            let brand = args["brand"].as_str().unwrap_or_default();
            serde_json::to_value(vehicle::common_faults(brand))?
        }
        _ => json!({ "error": "未知工具" }),
    };
    Ok(result)
}
