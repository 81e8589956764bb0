//! JSON-RPC service over stdio.
//!
//! Domain outcomes travel inside successful responses as
//! `{success, data}` or `{success: false, error, status}`; protocol problems
//! use JSON-RPC error objects.

pub mod methods;
pub mod server;
pub mod transport;

pub use methods::{get_method_definitions, handle_method, CallError, MethodDefinition};
pub use server::RpcServer;
pub use transport::{error_envelope, ok_envelope, ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
