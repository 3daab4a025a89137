pub mod esplora;
pub mod evm_rpc;
pub mod json_rpc;
pub mod log_redact;
pub mod logging;
pub mod rpc_validator;
pub mod solana_rpc;

pub use logging::init_logging;
