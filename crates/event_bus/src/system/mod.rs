/// Event bus module - broken down into manageable components
mod cache;
mod core;
mod emitters;
mod handlers;
mod index;
mod management;
mod stats;
mod sticky;

// Re-export all public items from submodules
pub use self::core::EventBus;
pub use stats::EventBusStats;
