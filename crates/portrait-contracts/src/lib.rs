pub mod credential;
pub mod events;
pub mod features;
pub mod history;
pub mod media;
pub mod results;
mod store;
pub mod studio;
pub mod usage;
