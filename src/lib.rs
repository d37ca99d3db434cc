// Player statistics persistence: in-memory users kept in sync with a
// pluggable backing store without blocking the authoritative loop.

pub mod api;
pub mod config;
pub mod database;
pub mod executor;
pub mod host;
pub mod leaderboard;
pub mod notice;
pub mod statistic;
pub mod storage;
pub mod user;

// Re-export commonly used types for easier access in tests
pub use config::{ConfigError, RetryPolicy, StorageConfig, StorageKind};
pub use database::{Completion, DatabaseOptions, UserDatabase};
pub use executor::KeyedExecutor;
pub use host::{spawn_host, HostError, HostHandle};
pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use notice::{DegradedNotice, NoticeBus};
pub use statistic::{BuiltinStatistic, StatisticRegistry, StatisticType};
pub use storage::{open_backend, StatsBackend, StorageError};
pub use user::{LoadState, StatSnapshot, User, UserManager};
