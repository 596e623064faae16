/// Key combinations, actions and binding tables
pub mod hotkey;

/// OS hotkey backends
pub mod backend;

/// Binding registry
pub mod registry;

/// Subscriber dispatch
pub mod events;

/// Liveness and staleness checks
pub mod health;

/// Backend rebuild and failure ceiling
pub mod recovery;

/// Lifecycle state and configuration
pub mod state;

/// Service facade
pub mod service;

/// Utility modules
pub mod utils;

pub use service::HotkeyService;
