/// Key-value backends holding the persisted counters and history.
pub mod kv_store;
/// Durable statistics (counters + finished game history).
pub mod stats;
/// Storage abstraction layer shared by every backend.
pub mod storage;
