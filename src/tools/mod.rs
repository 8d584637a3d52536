//! Tools the model may request, plus the registry and executor that run them.

pub mod arguments;
pub mod builtin;
pub mod executor;
pub mod registry;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use executor::{ExecutionReport, ExecutionStatus, ToolExecutor};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolExecutionContext};
pub use types::ToolParameters;
