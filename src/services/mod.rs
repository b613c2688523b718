pub mod fallback;
pub mod loader;
pub mod notifier;
pub mod sync;
