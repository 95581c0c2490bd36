//! A thin HTTP mirror of the driver surface, gated behind the `rest`
//! feature. Connections and statements are addressed by opaque integer ids
//! handed out on creation; the server holds them in memory for the life of
//! the process, the same way a driver's caller holds a `Connection` handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json_;
use tracing::{error, info};

use mvccdb_core::{Engine, Error, Value};

use crate::driver::{Connection, ExecResult, RowStep, Statement};

/// Shared server state: the engine plus live connections and statements.
pub struct RestState {
    engine: Engine,
    next_connection_id: AtomicU64,
    next_statement_id: AtomicU64,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    statements: Mutex<HashMap<(u64, u64), Arc<Statement>>>,
}

impl RestState {
    pub fn new(engine: Engine) -> Arc<Self> {
        Arc::new(RestState {
            engine,
            next_connection_id: AtomicU64::new(1),
            next_statement_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            statements: Mutex::new(HashMap::new()),
        })
    }

    fn connection(&self, id: u64) -> Result<Arc<Connection>, ApiError> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::from(Error::NotFound(format!("no connection {}", id))))
    }

    fn statement(&self, c: u64, s: u64) -> Result<Arc<Statement>, ApiError> {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(c, s))
            .cloned()
            .ok_or_else(|| ApiError::from(Error::NotFound(format!("no statement {}/{}", c, s))))
    }
}

/// Builds the router. Mount under any path prefix the embedder wants.
pub fn router(state: Arc<RestState>) -> Router {
    Router::new()
        .route("/connections", post(open_connection))
        .route("/connections/:c", delete(close_connection))
        .route("/connections/:c/statements", post(prepare_statement))
        .route("/connections/:c/statements/:s", delete(close_statement))
        .route("/connections/:c/statements/:s/execute", post(execute_statement))
        .route("/connections/:c/statements/:s/rows", post(query_statement))
        .with_state(state)
}

#[derive(Debug)]
struct ApiError(StatusCode, String);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) | Error::InvalidState(_) => StatusCode::BAD_REQUEST,
            Error::LockTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Serialization(_) => StatusCode::CONFLICT,
            Error::LockPoisoned | Error::Internal(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.0, message = %self.1, "request failed");
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct OpenConnectionResponse {
    #[serde(rename = "connectionId")]
    connection_id: u64,
}

async fn open_connection(State(state): State<Arc<RestState>>) -> Json<OpenConnectionResponse> {
    let id = state.next_connection_id.fetch_add(1, Ordering::SeqCst);
    let conn = Arc::new(Connection::open(&state.engine));
    state
        .connections
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(id, conn);
    info!(connection_id = id, "opened connection");
    Json(OpenConnectionResponse { connection_id: id })
}

async fn close_connection(
    State(state): State<Arc<RestState>>,
    Path(c): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let conn = state.connection(c)?;
    conn.close()?;
    state.connections.lock().unwrap_or_else(|e| e.into_inner()).remove(&c);
    state
        .statements
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .retain(|(cid, _), _| *cid != c);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PrepareRequest {
    sql: String,
}

#[derive(Serialize)]
struct PrepareResponse {
    #[serde(rename = "connectionId")]
    connection_id: u64,
    #[serde(rename = "statementId")]
    statement_id: u64,
    #[serde(rename = "numInput")]
    num_input: usize,
}

async fn prepare_statement(
    State(state): State<Arc<RestState>>,
    Path(c): Path<u64>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<PrepareResponse>, ApiError> {
    let conn = state.connection(c)?;
    let stmt = Arc::new(conn.prepare(&req.sql)?);
    let num_input = stmt.num_input();
    let s = state.next_statement_id.fetch_add(1, Ordering::SeqCst);
    state
        .statements
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert((c, s), stmt);
    Ok(Json(PrepareResponse {
        connection_id: c,
        statement_id: s,
        num_input,
    }))
}

async fn close_statement(
    State(state): State<Arc<RestState>>,
    Path((c, s)): Path<(u64, u64)>,
) -> StatusCode {
    state
        .statements
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&(c, s));
    StatusCode::NO_CONTENT
}

fn json_to_value(v: &Json_) -> Result<Value, ApiError> {
    match v {
        Json_::Null => Ok(Value::Null),
        Json_::Bool(b) => Ok(Value::Bool(*b)),
        Json_::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(Error::InvalidArgument(format!("unrepresentable number {}", n)).into())
            }
        }
        Json_::String(s) => Ok(Value::Text(s.clone())),
        Json_::Array(_) | Json_::Object(_) => {
            Err(Error::InvalidArgument("nested values are not supported".to_string()).into())
        }
    }
}

fn value_to_json(v: &Value) -> Json_ {
    match v {
        Value::Integer(i) => Json_::from(*i),
        Value::Float(f) => Json_::from(*f),
        Value::Text(s) => Json_::from(s.clone()),
        Value::Bool(b) => Json_::from(*b),
        Value::Null => Json_::Null,
    }
}

fn column_type(v: &Value) -> &'static str {
    match v {
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Null => "null",
    }
}

/// The `execute`/`rows` request body is an optional JSON array of bound
/// parameters; an empty or missing body means "no parameters".
fn parse_args(body: &Bytes) -> Result<Vec<Value>, ApiError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let values: Vec<Json_> = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidArgument(format!("malformed argument array: {}", e)))?;
    values.iter().map(json_to_value).collect()
}

#[derive(Serialize)]
struct ExecuteResponse {
    #[serde(rename = "lastInsertId")]
    last_insert_id: i64,
    #[serde(rename = "rowsAffected")]
    rows_affected: i64,
}

impl From<ExecResult> for ExecuteResponse {
    fn from(r: ExecResult) -> Self {
        ExecuteResponse {
            last_insert_id: r.last_insert_id,
            rows_affected: r.rows_affected,
        }
    }
}

async fn execute_statement(
    State(state): State<Arc<RestState>>,
    Path((c, s)): Path<(u64, u64)>,
    body: Bytes,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let stmt = state.statement(c, s)?;
    let args = parse_args(&body)?;
    let result = stmt.exec(&args)?;
    Ok(Json(result.into()))
}

#[derive(Serialize)]
struct RowsResponse {
    names: Vec<String>,
    types: Vec<&'static str>,
    values: Vec<Vec<Json_>>,
}

async fn query_statement(
    State(state): State<Arc<RestState>>,
    Path((c, s)): Path<(u64, u64)>,
    body: Bytes,
) -> Result<Json<RowsResponse>, ApiError> {
    let stmt = state.statement(c, s)?;
    let args = parse_args(&body)?;
    let mut rows = stmt.query(&args)?;

    let names = rows.columns().to_vec();
    let mut values: Vec<Vec<Json_>> = Vec::new();
    let mut types: Vec<&'static str> = Vec::new();
    let mut row_buf = Vec::new();
    while rows.next(&mut row_buf) == RowStep::Ok {
        if values.is_empty() {
            types = row_buf.iter().map(column_type).collect();
        }
        values.push(row_buf.iter().map(value_to_json).collect());
    }
    if types.is_empty() {
        types = names.iter().map(|_| "null").collect();
    }

    Ok(Json(RowsResponse { names, types, values }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_for_scalars() {
        assert_eq!(json_to_value(&Json_::from(5)).unwrap(), Value::Integer(5));
        assert_eq!(json_to_value(&Json_::from(1.5)).unwrap(), Value::Float(1.5));
        assert_eq!(json_to_value(&Json_::from("hi")).unwrap(), Value::Text("hi".to_string()));
        assert_eq!(json_to_value(&Json_::from(true)).unwrap(), Value::Bool(true));
        assert_eq!(json_to_value(&Json_::Null).unwrap(), Value::Null);
    }

    #[test]
    fn column_type_tokens() {
        assert_eq!(column_type(&Value::Integer(1)), "integer");
        assert_eq!(column_type(&Value::Text("x".to_string())), "text");
    }
}
