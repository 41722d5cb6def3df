pub mod api;
pub mod batch;
pub mod config;
pub mod context;
pub mod desk_state;
pub mod feeds;
pub mod model;
pub mod persistence;
pub mod snapshot;
pub mod staging;
pub mod stream_fsm;
pub mod validation;
pub mod view;

#[cfg(test)]
mod tests;
