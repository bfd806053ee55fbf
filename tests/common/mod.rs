//! Common test utilities shared across integration tests

pub mod fixture;

pub use fixture::{TestFixture, flush, recv_frames};
