//! Integration-style tests for configuration loading
