//! Dasi: desktop assistant core.
//!
//! Orchestrates a single conversation turn against a streaming chat model.
//! The model may request tools; every request waits for a human (or another
//! approval actor) before it runs, and the outcome is fed back to the model
//! until it produces a final answer.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dasi::prelude::*;
//!
//! # async fn example() -> dasi::error::Result<()> {
//! let config = DasiConfig::load(None)?;
//! let provider = dasi::provider::create_provider(&config)?;
//! let history = Arc::new(InMemoryHistoryStore::new());
//! let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
//! let turn_loop = TurnLoop::new(provider, history, ToolCallGateway::new(), executor);
//!
//! let input = TurnInput::builder().query("What's 2+2?").build();
//! match turn_loop.run(input, None).await {
//!     Ok(response) => println!("{}", response.text),
//!     Err(e) => eprintln!("{}", e.user_message()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod history;
pub mod prelude;
pub mod prompts;
pub mod provider;
pub mod sidechannel;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
