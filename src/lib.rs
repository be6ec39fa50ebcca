pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod output;
pub mod planner;
pub mod resource;
pub mod stack;
pub mod state;

pub use error::{Result, StackError};
