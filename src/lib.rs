//! Managed-object memory subsystem for the Kos scripting language runtime.
//!
//! A page-based mark-and-evacuate collector with lock-free property tables
//! and array storage, built for embedding inside a bytecode interpreter: the
//! interpreter supplies the object layouts and reference graph (via
//! [`mark::Tracer`]); this crate owns allocation, marking, evacuation, and
//! the two lock-free containers every Kos object is built from.
pub mod array;
pub mod config;
pub mod ctx;
pub mod engagement;
pub mod error;
pub mod evacuate;
pub mod header;
pub mod heap;
pub mod huge;
pub mod instance;
pub mod mark;
pub mod object;
pub mod pool;
pub mod proptable;
pub mod stats;
pub mod tagged;

pub use config::GcConfig;
pub use ctx::{Ctx, LocalHandle};
pub use error::{ExceptionKind, InternalError, Result};
pub use header::TypeTag;
pub use heap::{Heap, Movability};
pub use instance::Instance;
pub use object::{
    delete_property, get_own_property, get_property, has_prototype, set_builtin_dynamic_property,
    set_property, walk_object, DeepIter, PrototypeChain,
};
pub use stats::GcStats;
pub use tagged::ObjectId;
