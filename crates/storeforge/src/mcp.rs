// Copyright 2025 Storeforge Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MCP-over-HTTP boundary: a single JSON-RPC endpoint exposing the
//! storefront tools. The gatekeeper runs before any tool body; policy
//! denials are HTTP statuses (401/403/429/500) while tool failures are
//! JSON-RPC tool errors so clients can tell the two apart.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::gatekeeper::{GateError, Gatekeeper};
use crate::pipeline::{Pipeline, StoreRequest};
use crate::resolver::TemplateKind;
use crate::BrandingSpec;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn rpc_result(id: Option<Value>, result: Value) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "result": result,
    }))
}

fn rpc_error(id: Option<Value>, code: i64, message: String) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": { "code": code, "message": message },
    }))
}

/// Tool-level failure: still a 200 at the transport, flagged in-band so the
/// model sees the stage-named message.
fn tool_error(id: Option<Value>, message: String) -> Json<Value> {
    rpc_result(
        id,
        json!({
            "content": [{ "type": "text", "text": message }],
            "isError": true,
        }),
    )
}

fn tool_json(id: Option<Value>, payload: &impl serde::Serialize) -> Json<Value> {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".to_string());
    rpc_result(
        id,
        json!({
            "content": [{ "type": "text", "text": text }],
            "isError": false,
        }),
    )
}

fn cors(mut resp: Response) -> Response {
    let h = resp.headers_mut();
    h.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::HeaderValue::from_static("*"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        header::HeaderValue::from_static("authorization, content-type, x-storeforge-token"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static("POST, OPTIONS"),
    );
    resp
}

fn gate_denied(err: GateError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = (
        status,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response();
    if let GateError::RateLimited { retry_after_secs } = err {
        if let Ok(v) = header::HeaderValue::from_str(&retry_after_secs.to_string()) {
            resp.headers_mut().insert(header::RETRY_AFTER, v);
        }
    }
    resp
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "describe_storefront",
            "description": "Summarize a storefront template: file tree, package.json, Nuxt modules and theme color tokens. Read-only.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "kind": { "type": "string", "enum": ["base", "extended"], "description": "Which template tree to describe" }
                },
                "required": ["kind"]
            }
        },
        {
            "name": "plan_storefront",
            "description": "Dry-run a store creation: resolve the template, apply branding in memory and report what would be published. Nothing is written.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "kind": { "type": "string", "enum": ["base", "extended"] },
                    "branding": {
                        "type": "object",
                        "properties": {
                            "colors": { "type": "object", "additionalProperties": { "type": "string" } },
                            "logo_svg": { "type": "string" }
                        }
                    },
                    "target": {
                        "type": "object",
                        "properties": {
                            "owner": { "type": "string" },
                            "repo": { "type": "string" },
                            "private": { "type": "boolean" }
                        }
                    }
                },
                "required": ["kind"]
            }
        },
        {
            "name": "create_store_and_deploy",
            "description": "Provision a white-labeled storefront: resolve and brand the template, publish it as one commit to the destination repository and set up a hosting project with a deployment.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "target": {
                        "type": "object",
                        "properties": {
                            "owner": { "type": "string" },
                            "repo": { "type": "string" },
                            "private": { "type": "boolean" }
                        },
                        "required": ["owner", "repo"]
                    },
                    "kind": { "type": "string", "enum": ["base", "extended"] },
                    "branding": {
                        "type": "object",
                        "properties": {
                            "colors": { "type": "object", "additionalProperties": { "type": "string" } },
                            "logo_svg": { "type": "string" }
                        }
                    },
                    "branch": { "type": "string", "default": "main" },
                    "commit_message": { "type": "string" },
                    "project_name": { "type": "string" }
                },
                "required": ["target", "kind"]
            }
        }
    ])
}

#[derive(Debug, Deserialize)]
struct DescribeArgs {
    kind: TemplateKind,
}

#[derive(Debug, Deserialize)]
struct PlanArgs {
    kind: TemplateKind,
    #[serde(default)]
    branding: BrandingSpec,
    /// Optional destination, echoed back so a client can review the whole
    /// proposal before calling create.
    #[serde(default)]
    target: Option<crate::RepoTarget>,
}

async fn dispatch_tool(state: &AppState, name: &str, args: Value, id: Option<Value>) -> Json<Value> {
    match name {
        "describe_storefront" => {
            let args: DescribeArgs = match serde_json::from_value(args) {
                Ok(a) => a,
                Err(e) => return rpc_error(id, -32602, format!("invalid arguments: {}", e)),
            };
            match state.pipeline.plan(args.kind, &BrandingSpec::default()).await {
                Ok(plan) => tool_json(id, &plan),
                Err(e) => tool_error(id, format!("{:#}", e)),
            }
        }
        "plan_storefront" => {
            let args: PlanArgs = match serde_json::from_value(args) {
                Ok(a) => a,
                Err(e) => return rpc_error(id, -32602, format!("invalid arguments: {}", e)),
            };
            match state.pipeline.plan(args.kind, &args.branding).await {
                Ok(plan) => {
                    let mut payload = serde_json::to_value(&plan).unwrap_or_default();
                    if let (Some(obj), Some(target)) = (payload.as_object_mut(), &args.target) {
                        obj.insert("target".into(), json!(target));
                    }
                    tool_json(id, &payload)
                }
                Err(e) => tool_error(id, format!("{:#}", e)),
            }
        }
        "create_store_and_deploy" => {
            let req: StoreRequest = match serde_json::from_value(args) {
                Ok(a) => a,
                Err(e) => return rpc_error(id, -32602, format!("invalid arguments: {}", e)),
            };
            match state.pipeline.create_store_and_deploy(&req).await {
                Ok(outcome) => tool_json(id, &outcome),
                Err(e) => tool_error(id, format!("{:#}", e)),
            }
        }
        other => rpc_error(id, -32601, format!("unknown tool: {}", other)),
    }
}

async fn handle_mcp(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let req: RpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return cors(
                rpc_error(None, -32700, format!("parse error: {}", e)).into_response(),
            );
        }
    };
    let id = req.id.clone();

    let resp = match req.method.as_str() {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": { "name": "storeforge-mcp", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} },
            }),
        )
        .into_response(),
        "notifications/initialized" => StatusCode::NO_CONTENT.into_response(),
        "tools/list" => rpc_result(id, json!({ "tools": tool_descriptors() })).into_response(),
        "tools/call" => {
            let name = req
                .params
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let args = req
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            // Only the create tool mutates; its destination owner is what
            // the allowlist judges.
            let mutating_owner = if name == "create_store_and_deploy" {
                match args
                    .get("target")
                    .and_then(|t| t.get("owner"))
                    .and_then(|o| o.as_str())
                {
                    Some(o) => Some(o.to_string()),
                    None => {
                        return cors(
                            rpc_error(id, -32602, "missing target.owner".to_string())
                                .into_response(),
                        );
                    }
                }
            } else {
                None
            };

            let peer_ip = peer.ip().to_string();
            let ctx = match state
                .gatekeeper
                .check(&headers, &peer_ip, mutating_owner.as_deref())
            {
                Ok(ctx) => ctx,
                Err(e) => return cors(gate_denied(e)),
            };
            tracing::info!(
                request_id = %ctx.request_id,
                tool = %name,
                remaining = ctx.remaining,
                "tool call"
            );
            dispatch_tool(&state, &name, args, id).await.into_response()
        }
        other => rpc_error(id, -32601, format!("method not found: {}", other)).into_response(),
    };
    cors(resp)
}

async fn handle_options() -> Response {
    cors(StatusCode::NO_CONTENT.into_response())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/mcp") }))
        .route("/mcp", post(handle_mcp).options(handle_options))
        .with_state(state)
}
