//! The foreign-function interface.
//!
//! Hosts register plain function pointers against a [`State`]; the VM
//! invokes them with the calling [`Thread`] and a view of the argument
//! run. Callees may allocate GC objects on the thread, pin transient
//! values with [`Thread::protect`], and re-enter the VM through
//! [`Thread::call_function`].
//!
//! [`State`]: crate::State
//! [`Thread::protect`]: crate::Thread::protect
//! [`Thread::call_function`]: crate::Thread::call_function

use crate::gc::Marker;
use crate::vm::{Thread, Value};
use crate::VmResult;

/// A host-implemented function callable from script code.
///
/// Returning `Ok(Value::Null)` is the conventional way to signal a
/// script-visible failure; returning `Err` aborts execution with a
/// runtime error.
pub type ForeignFn = for<'s> fn(&mut Thread<'s>, &[Value]) -> VmResult<Value>;

/// Host-supplied descriptor for a native object.
///
/// The descriptor is static data owned by the host; it must outlive
/// every object that references it, which the `'static` bound enforces.
/// All callbacks are optional.
pub struct NativeProps {
    /// A short type name, used when printing the object.
    pub name: &'static str,

    /// Invoked during the GC mark phase. The callback is responsible for
    /// protecting every value the native payload transitively references
    /// by passing it to the supplied [`Marker`].
    pub protect: Option<fn(&mut Marker, *mut ())>,

    /// Invoked exactly once when the object is swept.
    pub finalize: Option<fn(*mut ())>,

    /// Renders the payload for printing.
    pub to_string: Option<fn(*mut ()) -> String>,
}

impl std::fmt::Debug for NativeProps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProps")
            .field("name", &self.name)
            .field("protect", &self.protect.is_some())
            .field("finalize", &self.finalize.is_some())
            .field("to_string", &self.to_string.is_some())
            .finish()
    }
}
