use crate::commands::{self, CommandError};
use crate::events::BroadcastEmitter;
use crate::ws_events::{ws_handler, WsState};
use axum::{
  body::Bytes,
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  middleware::{self, Next},
  response::{Json, Response},
  routing::{get, post},
  Router,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvokeResponse {
  #[schema(value_type = Object)]
  pub result: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
  pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandsResponse {
  pub commands: Vec<String>,
}

#[derive(OpenApi)]
#[openapi(
  paths(invoke_command, get_commands),
  components(schemas(InvokeResponse, ErrorResponse, CommandsResponse)),
  tags(
    (name = "commands", description = "Backend command surface"),
  ),
  modifiers(&SecurityAddon),
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
  fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
    if let Some(components) = openapi.components.as_mut() {
      components.add_security_scheme(
        "bearer_auth",
        utoipa::openapi::security::SecurityScheme::Http(
          utoipa::openapi::security::HttpBuilder::new()
            .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
            .build(),
        ),
      );
    }
  }
}

pub fn openapi() -> utoipa::openapi::OpenApi {
  ApiDoc::openapi()
}

#[derive(Clone, Default)]
pub struct ApiServerState {
  /// When set, every `/v1` request must carry `Authorization: Bearer <token>`.
  pub api_token: Option<String>,
}

/// Builds the full router. Split from [`ApiServer::start`] so it can be
/// driven in-process.
pub fn build_router(state: ApiServerState, emitter: Option<Arc<BroadcastEmitter>>) -> Router {
  let v1_routes = Router::new()
    .route("/invoke/{command}", post(invoke_command))
    .route("/commands", get(get_commands))
    .layer(middleware::from_fn_with_state(
      state.clone(),
      auth_middleware,
    ));

  let ws_state = match emitter {
    Some(emitter) => WsState::with_emitter(emitter),
    None => WsState::new(),
  };
  let ws_routes = Router::new()
    .route("/events", get(ws_handler))
    .with_state(ws_state);

  let api = openapi();
  Router::new()
    .nest("/v1", v1_routes)
    .nest("/ws", ws_routes)
    .route("/openapi.json", get(move || async move { Json(api) }))
    .layer(CorsLayer::permissive())
    .with_state(state)
}

pub struct ApiServer {
  port: Option<u16>,
  shutdown_tx: Option<mpsc::Sender<()>>,
  task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ApiServer {
  fn new() -> Self {
    Self {
      port: None,
      shutdown_tx: None,
      task_handle: None,
    }
  }

  pub fn get_port(&self) -> Option<u16> {
    self.port
  }

  pub async fn start(
    &mut self,
    preferred_port: u16,
    emitter: Option<Arc<BroadcastEmitter>>,
  ) -> Result<u16, String> {
    self.stop().await.ok();

    let settings = crate::settings_manager::SettingsManager::instance()
      .load_settings()
      .map_err(|e| format!("Failed to load settings: {e}"))?;
    let state = ApiServerState {
      api_token: settings.api_token,
    };

    let listener = match TcpListener::bind(format!("127.0.0.1:{preferred_port}")).await {
      Ok(listener) => listener,
      Err(e) => {
        let random_port = rand::random::<u16>().saturating_add(10000);
        log::warn!("Port {preferred_port} unavailable ({e}), trying {random_port}");
        TcpListener::bind(format!("127.0.0.1:{random_port}"))
          .await
          .map_err(|e| format!("Failed to bind to any port: {e}"))?
      }
    };

    let actual_port = listener
      .local_addr()
      .map_err(|e| format!("Failed to get local address: {e}"))?
      .port();

    let app = build_router(state, emitter);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

    let task_handle = tokio::spawn(async move {
      let server = axum::serve(listener, app);
      tokio::select! {
        result = server => {
          if let Err(e) = result {
            log::error!("API server stopped: {e}");
          }
        },
        _ = shutdown_rx.recv() => {},
      }
    });

    log::info!("API server listening on 127.0.0.1:{actual_port}");
    self.port = Some(actual_port);
    self.shutdown_tx = Some(shutdown_tx);
    self.task_handle = Some(task_handle);

    Ok(actual_port)
  }

  pub async fn stop(&mut self) -> Result<(), String> {
    if let Some(shutdown_tx) = self.shutdown_tx.take() {
      let _ = shutdown_tx.send(()).await;
    }

    if let Some(handle) = self.task_handle.take() {
      handle.abort();
    }

    self.port = None;
    Ok(())
  }
}

async fn auth_middleware(
  State(state): State<ApiServerState>,
  headers: HeaderMap,
  request: axum::extract::Request,
  next: Next,
) -> Result<Response, StatusCode> {
  let Some(expected) = state.api_token.as_deref() else {
    return Ok(next.run(request).await);
  };

  let token = headers
    .get("Authorization")
    .and_then(|h| h.to_str().ok())
    .and_then(|h| h.strip_prefix("Bearer "));

  match token {
    Some(token) if token == expected => Ok(next.run(request).await),
    _ => Err(StatusCode::UNAUTHORIZED),
  }
}

lazy_static! {
  pub static ref API_SERVER: Arc<Mutex<ApiServer>> = Arc::new(Mutex::new(ApiServer::new()));
}

pub async fn start_api_server(
  port: Option<u16>,
  emitter: Option<Arc<BroadcastEmitter>>,
) -> Result<u16, String> {
  let port = match port {
    Some(port) => port,
    None => crate::settings_manager::SettingsManager::instance()
      .load_settings()
      .map(|s| s.api_port)
      .unwrap_or(10108),
  };
  let mut server_guard = API_SERVER.lock().await;
  server_guard.start(port, emitter).await
}

pub async fn stop_api_server() -> Result<(), String> {
  let mut server_guard = API_SERVER.lock().await;
  server_guard.stop().await
}

pub async fn get_api_server_status() -> Result<Option<u16>, String> {
  let server_guard = API_SERVER.lock().await;
  Ok(server_guard.get_port())
}

fn error_response(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
  (status, Json(ErrorResponse { error }))
}

#[utoipa::path(
  post,
  path = "/v1/invoke/{command}",
  params(
    ("command" = String, Path, description = "Command name, e.g. list_browser_profiles")
  ),
  request_body(
    content = String,
    description = "JSON object of camelCase arguments; may be empty",
    content_type = "application/json"
  ),
  responses(
    (status = 200, description = "Command result", body = InvokeResponse),
    (status = 400, description = "Invalid arguments or command failure", body = ErrorResponse),
    (status = 401, description = "Unauthorized"),
    (status = 404, description = "Unknown command", body = ErrorResponse)
  ),
  security(
    ("bearer_auth" = [])
  ),
  tag = "commands"
)]
async fn invoke_command(
  Path(command): Path<String>,
  body: Bytes,
) -> Result<Json<InvokeResponse>, (StatusCode, Json<ErrorResponse>)> {
  let args = if body.iter().all(u8::is_ascii_whitespace) {
    serde_json::Value::Null
  } else {
    serde_json::from_slice(&body).map_err(|e| {
      error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}"))
    })?
  };

  match commands::dispatch(&command, args).await {
    Ok(result) => Ok(Json(InvokeResponse { result })),
    Err(e @ CommandError::UnknownCommand(_)) => {
      Err(error_response(StatusCode::NOT_FOUND, e.to_string()))
    }
    Err(e) => {
      log::debug!("Command {command} failed: {e}");
      Err(error_response(StatusCode::BAD_REQUEST, e.to_string()))
    }
  }
}

#[utoipa::path(
  get,
  path = "/v1/commands",
  responses(
    (status = 200, description = "Every command accepted by /v1/invoke", body = CommandsResponse),
    (status = 401, description = "Unauthorized")
  ),
  security(
    ("bearer_auth" = [])
  ),
  tag = "commands"
)]
async fn get_commands() -> Json<CommandsResponse> {
  Json(CommandsResponse {
    commands: commands::list_commands()
      .into_iter()
      .map(str::to_string)
      .collect(),
  })
}
