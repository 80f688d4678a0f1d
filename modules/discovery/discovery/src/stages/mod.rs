//! The concrete pipeline stages: qualifier, filter, and handler.

pub mod filter;
pub mod handler;
pub mod helm;
pub mod qualifier;

pub use filter::Filter;
pub use handler::{Handler, SubHandler, SubHandlerFactory, builtin_sub_handlers};
pub use qualifier::Qualifier;
