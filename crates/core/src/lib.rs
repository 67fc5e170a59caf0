pub mod browser;
pub mod catalog;
pub mod connection_slot;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod layout;
pub mod object_slot;
pub mod presentation;
pub mod profiles;
pub mod task;

#[cfg(test)]
mod testing;
