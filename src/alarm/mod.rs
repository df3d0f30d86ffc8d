pub mod model;
pub mod recurrence;
pub mod scheduler;
pub mod selector;
pub mod store;
