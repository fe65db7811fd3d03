//! End-to-end scenarios against the in-process server

pub mod mock_server;
pub mod test_context;

// Test scenario modules
pub mod name_resolution;
pub mod session_scenarios;
pub mod share_operations;
pub mod transfer_scenarios;

pub use mock_server::{MockServer, MockServerConfig, NameResponder};
pub use test_context::TestContext;
