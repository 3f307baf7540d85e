// ABOUTME: Test helper module exports for integration tests
// ABOUTME: HTTP testing utilities for exercising axum routers in-process

pub mod axum_test;
