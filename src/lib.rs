pub mod config;
pub mod error;
pub mod kv_store;
pub mod logging;
pub mod modbus;
pub mod mqtt;
pub mod poller;
pub mod projector;
pub mod runtime;
pub mod serial;
pub mod snapshot;
pub mod tcp_slave;
