//! Path-pattern routing for persistconn.
//!
//! Handlers are registered against path patterns (`entity/:id/data`) and a
//! set of allowed methods. A request is routed to the first registered route
//! whose pattern matches its path and whose method set contains its method;
//! anything else goes to the built-in not-found handler.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pattern;
pub mod router;
pub mod table;

pub use pattern::*;
pub use router::*;
pub use table::*;
