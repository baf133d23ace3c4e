/// JSON document store on the local filesystem.
pub mod file;
/// In-memory store.
pub mod memory;
/// HTTP client for the remote word validator.
#[cfg(feature = "remote-validator")]
pub mod remote_validator;
/// Storage error types.
pub mod storage;
/// Persistence contract and stored document model.
pub mod store;
/// Word validator contract.
pub mod validator;
