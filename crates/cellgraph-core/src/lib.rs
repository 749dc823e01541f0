pub mod cache;
pub mod calendar;
pub mod cell;
pub mod codec;
pub mod dag;
pub mod error;
pub mod function;
pub mod graph;
pub mod hash;
pub mod id;
pub mod ops;
pub mod table;
pub mod value;

// Re-export commonly used types
pub use cache::{CacheEntry, CellCache};
pub use calendar::{Clock, ManualClock, Period, SystemClock};
pub use cell::{Cell, CellMetadata, Dependency, EvalConfig, EvalContext, Resolver, Strategy};
pub use dag::{Dag, NodeValue};
pub use error::CoreError;
pub use function::{FunctionError, FunctionRef, FunctionRegistry};
pub use graph::{GraphKey, ReferenceGraph};
pub use hash::hash;
pub use id::NodeKey;
pub use ops::BuiltinOp;
pub use table::{Table, TableRow};
pub use value::Value;

/// Short name for [`ReferenceGraph`].
pub type Xcl = ReferenceGraph;
