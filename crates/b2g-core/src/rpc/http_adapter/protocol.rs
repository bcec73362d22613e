use crate::error::{CoreError, RpcError};

#[derive(serde::Serialize)]
pub(super) struct JsonRpcRequest<'a> {
    pub(super) jsonrpc: &'static str,
    pub(super) id: u64,
    pub(super) method: &'a str,
    pub(super) params: Vec<serde_json::Value>,
}

#[derive(serde::Deserialize)]
pub(super) struct JsonRpcResponse {
    pub(super) result: Option<serde_json::Value>,
    pub(super) error: Option<serde_json::Value>,
}

/// Parse a JSON-RPC error value into a structured `CoreError`.
///
/// Errors shaped `{"code": <int>, "message": <string>}` become
/// `ServerError`; anything else is an `InvalidResponse` carrying the raw JSON.
pub(super) fn parse_jsonrpc_error(err: serde_json::Value) -> CoreError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    if let Ok(parsed) = serde_json::from_value::<JsonRpcError>(err.clone()) {
        CoreError::Rpc(RpcError::ServerError {
            code: parsed.code,
            message: parsed.message,
        })
    } else {
        CoreError::Rpc(RpcError::InvalidResponse(format!(
            "non-standard JSON-RPC error: {err}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_error_maps_to_server_error() {
        let err = parse_jsonrpc_error(serde_json::json!({
            "code": -28,
            "message": "Loading block index..."
        }));
        let CoreError::Rpc(RpcError::ServerError { code, message }) = &err else {
            panic!("expected a server error, got {err:?}");
        };
        assert_eq!(*code, -28);
        assert_eq!(message, "Loading block index...");
    }

    #[test]
    fn non_standard_error_is_invalid_response() {
        let err = parse_jsonrpc_error(serde_json::json!("boom"));
        assert!(matches!(err, CoreError::Rpc(RpcError::InvalidResponse(_))));
    }

    #[test]
    fn request_serializes_as_json_rpc() {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "getblockhash",
            params: vec![serde_json::json!(1)],
        };
        let value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "getblockhash", "params": [1]})
        );
    }
}
