pub mod health;
pub mod metrics;
pub mod notifier;
pub mod registry;
pub mod state;
pub mod subscriber;
pub mod telegram;
