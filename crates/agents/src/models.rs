//! Vendor-neutral value types passed between conversations and adapters.
//!
//! Adapters convert these into their own wire formats when building a request;
//! nothing here knows about any particular vendor.
pub mod message;
pub mod role;
pub mod schema;
