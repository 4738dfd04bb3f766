//! IPC protocol definitions.
//!
//! Uses a JSON-RPC-like protocol over Unix domain sockets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// IPC method types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    // Health
    Health,
    Shutdown,

    // Lifecycle control frames
    #[serde(rename = "service.bind")]
    ServiceBind,
    #[serde(rename = "service.unbind")]
    ServiceUnbind,
    #[serde(rename = "service.start")]
    ServiceStart,
    #[serde(rename = "service.task_removed")]
    ServiceTaskRemoved,

    // Session operations
    #[serde(rename = "session.get_access_token")]
    SessionGetAccessToken,
    #[serde(rename = "session.get_refresh_token")]
    SessionGetRefreshToken,
    #[serde(rename = "session.get_id_token")]
    SessionGetIdToken,
    #[serde(rename = "session.is_authenticated")]
    SessionIsAuthenticated,
    #[serde(rename = "session.logout")]
    SessionLogout,

    // Supervisor
    #[serde(rename = "supervisor.restart")]
    SupervisorRestart,
    #[serde(rename = "supervisor.schedule_relaunch")]
    SupervisorScheduleRelaunch,
}

/// The five operations a bound client may invoke.
pub const SESSION_OPERATIONS: [Method; 5] = [
    Method::SessionGetAccessToken,
    Method::SessionGetRefreshToken,
    Method::SessionGetIdToken,
    Method::SessionIsAuthenticated,
    Method::SessionLogout,
];

impl Method {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Health => "health",
            Method::Shutdown => "shutdown",
            Method::ServiceBind => "service.bind",
            Method::ServiceUnbind => "service.unbind",
            Method::ServiceStart => "service.start",
            Method::ServiceTaskRemoved => "service.task_removed",
            Method::SessionGetAccessToken => "session.get_access_token",
            Method::SessionGetRefreshToken => "session.get_refresh_token",
            Method::SessionGetIdToken => "session.get_id_token",
            Method::SessionIsAuthenticated => "session.is_authenticated",
            Method::SessionLogout => "session.logout",
            Method::SupervisorRestart => "supervisor.restart",
            Method::SupervisorScheduleRelaunch => "supervisor.schedule_relaunch",
        }
    }

    /// Whether the method requires a completed bind on its connection.
    pub fn is_session_operation(&self) -> bool {
        SESSION_OPERATIONS.contains(self)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation.
    pub id: String,
    /// Method to invoke.
    pub method: Method,
    /// Method parameters (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// Create a new request with auto-generated ID.
    pub fn new(method: Method) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params: None,
        }
    }

    /// Create a new request with parameters.
    pub fn with_params(method: Method, params: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params: Some(params),
        }
    }

    /// String parameter by name.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.as_ref()?.get(name)?.as_str()
    }

    /// Unsigned integer parameter by name.
    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.params.as_ref()?.get(name)?.as_u64()
    }

    pub fn param_bool(&self, name: &str) -> Option<bool> {
        self.params.as_ref()?.get(name)?.as_bool()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// IPC response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID for correlation.
    pub id: String,
    /// Result data (if successful).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information (if failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Error information in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    /// Create a successful response.
    pub fn success(id: &str, result: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: &str, code: i32, message: &str) -> Self {
        Self {
            id: id.to_string(),
            result: None,
            error: Some(ErrorInfo {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Error code, if this is an error response.
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Named field of a successful result.
    pub fn result_field(&self, name: &str) -> Option<&serde_json::Value> {
        if !self.is_success() {
            return None;
        }
        self.result.as_ref()?.get(name)
    }
}

// Standard error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Session operation on a connection that has not bound.
    pub const NOT_BOUND: i32 = -32010;
    /// Bind for an interface this server does not serve.
    pub const BIND_REJECTED: i32 = -32011;
}
