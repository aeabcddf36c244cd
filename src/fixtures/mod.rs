//! Ready-made fixtures for common services.

pub mod redis;

pub use redis::RedisContainer;
