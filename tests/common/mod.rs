//! Common test utilities for integration tests.

pub mod mock_soa;

pub use mock_soa::MockRequestService;
