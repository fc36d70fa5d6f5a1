pub mod app;
pub mod bridge;
pub mod config;
pub mod current_instance;
pub mod debounce;
pub mod diagram;
pub mod filter;
pub mod filter_controller;
pub mod filters_store;
pub mod incidents;
pub mod instances_list;
pub mod mappers;
pub mod polling;
pub mod reactive;
pub mod sequence_flows;


pub use app::{ConsoleApp, ConsoleSnapshot, StateUpdate};
pub use config::{ConfigOverrides, ConsoleConfig};
pub use filter::{Filter, FilterChange};
