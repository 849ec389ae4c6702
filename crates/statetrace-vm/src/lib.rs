//! Reference evaluator for lowered bodies.
//!
//! Runs methods of a [`Module`](statetrace_core::ir::Module) directly from
//! the IR and answers the tracker contract with a [`RecordingTracker`], so
//! instrumented bodies can be checked by the events they produce rather than
//! by their shape.
//!
//! ## Modules
//!
//! - [`value`]: values and storage locations
//! - [`heap`]: class instances, arrays and boxes
//! - [`ops`]: operators and numeric conversions
//! - [`trace`]: recorded tracker events
//! - [`vm`]: the evaluator
//! - [`error`]: runtime faults
//!
//! ## Example
//!
//! ```
//! use statetrace_core::ir::{Expr, MethodBuilder, Module, Stmt};
//! use statetrace_core::{MethodId, TypeTable, primitives};
//! use statetrace_vm::{Value, Vm};
//!
//! let mut module = Module::new(TypeTable::new());
//! module.add_method(
//!     MethodBuilder::new(MethodId::new(1), "F")
//!         .returns(primitives::INT32)
//!         .build(Stmt::ret(Some(Expr::int(4)))),
//! );
//!
//! let mut vm = Vm::new(&module);
//! assert_eq!(vm.call(MethodId::new(1), vec![]), Ok(Value::i32(4)));
//! assert!(vm.events().is_empty());
//! ```

pub mod error;
pub mod heap;
pub mod ops;
pub mod trace;
pub mod value;
pub mod vm;

pub use error::{Result, RuntimeError};
pub use heap::{HeapObject, ObjectData, ObjectHandle, ObjectHeap};
pub use trace::{RecordingTracker, TraceEvent, TraceValue};
pub use value::{Location, Slot, StructValue, Value};
pub use vm::{INSUFFICIENT_EXECUTION_STACK, OPERATION_CANCELED, Vm};
