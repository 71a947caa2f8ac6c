//! Keyed units of work with bound arguments.
//!
//! A [`WorkItem`] couples a sort key, a [`DataBag`] for diagnostic context, a shared
//! [`SyncHandle`] and a single operation. Operations are built by the factory
//! functions from a callable and a tuple of 0 to 20 positional arguments:
//!
//! - [`WorkItem::action`] - fire-and-forget; the callable's return value is discarded
//!   (a returned `Err` becomes a fault)
//! - [`WorkItem::function`] - the computed value is retained in a [`WorkResult`]
//! - [`WorkItem::try_function`] - like `function`, but an `Err` becomes a fault
//! - [`WorkItem::placeholder`] - no operation bound; executing it faults with
//!   `NotImplemented`
//!
//! ```rust
//! use std::sync::Arc;
//! use taskweave_workflow::{latch::Latch, work_item::WorkItem};
//!
//! let latch = Arc::new(Latch::new(1));
//! let add = |a: i32, b: i32| a + b;
//! let (mut item, result) = WorkItem::function(0u32, latch.clone(), add, (2, 3));
//! item.execute().unwrap();
//! assert_eq!(result.take(), Some(5));
//! assert!(latch.is_set());
//! ```

use std::{
    cmp::Ordering,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use taskweave_common::{Result, error::Error};

use crate::{data_bag::DataBag, latch::SyncHandle};

/// A callable that can be invoked with a tuple of positional arguments.
///
/// Implemented for every `FnOnce` of arity 0 through 20 over the matching tuple,
/// so `|a: i32, b: &str| ...` is a `BoundCall<(i32, &str)>`.
pub trait BoundCall<Args>: Send {
    type Output;

    fn call_with(self, args: Args) -> Self::Output;
}

macro_rules! impl_bound_call {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> BoundCall<($($arg,)*)> for Func
        where
            Func: FnOnce($($arg),*) -> Ret + Send,
        {
            type Output = Ret;

            #[allow(non_snake_case, clippy::unused_unit)]
            fn call_with(self, ($($arg,)*): ($($arg,)*)) -> Ret {
                self($($arg),*)
            }
        }
    };
}

impl_bound_call!();
impl_bound_call!(A1);
impl_bound_call!(A1, A2);
impl_bound_call!(A1, A2, A3);
impl_bound_call!(A1, A2, A3, A4);
impl_bound_call!(A1, A2, A3, A4, A5);
impl_bound_call!(A1, A2, A3, A4, A5, A6);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14);
impl_bound_call!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15);
impl_bound_call!(
    A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15, A16
);
impl_bound_call!(
    A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15, A16, A17
);
impl_bound_call!(
    A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15, A16, A17, A18
);
impl_bound_call!(
    A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15, A16, A17, A18, A19
);
impl_bound_call!(
    A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15, A16, A17, A18, A19, A20
);

/// Conversion of an action's return value into the outcome of a unit of work.
pub trait IntoWorkOutcome {
    fn into_outcome(self) -> Result<()>;
}

impl IntoWorkOutcome for () {
    fn into_outcome(self) -> Result<()> {
        Ok(())
    }
}

impl<E: Into<Error>> IntoWorkOutcome for std::result::Result<(), E> {
    fn into_outcome(self) -> Result<()> {
        self.map_err(into_work_fault)
    }
}

fn into_work_fault<E: Into<Error>>(e: E) -> Error {
    let e = e.into();
    if e.is_work_fault() {
        e
    } else {
        Error::work_fault_from(format!("operation failed: {e}"), e)
    }
}

/// The slot in which a function-style unit retains its computed value.
///
/// Clones share the same slot.
pub struct WorkResult<R>(Arc<Mutex<Option<R>>>);

impl<R> WorkResult<R> {
    fn new() -> WorkResult<R> {
        WorkResult(Arc::new(Mutex::new(None)))
    }

    /// Returns `true` if the unit has run and its value has not been taken yet.
    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    /// Takes the computed value, leaving the slot empty.
    pub fn take(&self) -> Option<R> {
        self.lock().take()
    }

    fn set(&self, value: R) {
        *self.lock() = Some(value);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<R>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> Clone for WorkResult<R> {
    fn clone(&self) -> Self {
        WorkResult(self.0.clone())
    }
}

type Operation = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum OperationSlot {
    Unbound,
    Bound(Operation),
    Consumed,
}

/// A bound, ready-to-run unit of work.
///
/// A unit is consumed by its first [`execute`](Self::execute); it is not meant to be
/// reused across batches.
pub struct WorkItem<K> {
    sort_order: K,
    data: DataBag,
    synchronization: Arc<dyn SyncHandle>,
    operation: OperationSlot,
}

impl<K> WorkItem<K> {
    /// Creates a unit with no operation bound.
    ///
    /// This is an extension point: executing it faults with `NotImplemented`.
    pub fn placeholder(sort_order: K, synchronization: Arc<dyn SyncHandle>) -> WorkItem<K> {
        WorkItem {
            sort_order,
            data: DataBag::new(),
            synchronization,
            operation: OperationSlot::Unbound,
        }
    }

    /// Binds a fire-and-forget callable to `args`.
    ///
    /// The callable returns either `()` or `Result<(), E>`; an `Err` is reported as
    /// a `WorkFault` when the unit executes.
    pub fn action<F, Args>(
        sort_order: K,
        synchronization: Arc<dyn SyncHandle>,
        f: F,
        args: Args,
    ) -> WorkItem<K>
    where
        F: BoundCall<Args> + 'static,
        F::Output: IntoWorkOutcome,
        Args: Send + 'static,
    {
        let mut item = Self::placeholder(sort_order, synchronization);
        item.bind(move || f.call_with(args).into_outcome());
        item
    }

    /// Binds a callable to `args`, retaining its computed value in the returned
    /// [`WorkResult`].
    pub fn function<F, Args, R>(
        sort_order: K,
        synchronization: Arc<dyn SyncHandle>,
        f: F,
        args: Args,
    ) -> (WorkItem<K>, WorkResult<R>)
    where
        F: BoundCall<Args, Output = R> + 'static,
        Args: Send + 'static,
        R: Send + 'static,
    {
        let result = WorkResult::new();
        let slot = result.clone();
        let mut item = Self::placeholder(sort_order, synchronization);
        item.bind(move || {
            slot.set(f.call_with(args));
            Ok(())
        });
        (item, result)
    }

    /// Binds a fallible callable to `args`. `Ok` values are retained in the returned
    /// [`WorkResult`], an `Err` is reported as a `WorkFault`.
    pub fn try_function<F, Args, R, E>(
        sort_order: K,
        synchronization: Arc<dyn SyncHandle>,
        f: F,
        args: Args,
    ) -> (WorkItem<K>, WorkResult<R>)
    where
        F: BoundCall<Args, Output = std::result::Result<R, E>> + 'static,
        Args: Send + 'static,
        R: Send + 'static,
        E: Into<Error>,
    {
        let result = WorkResult::new();
        let slot = result.clone();
        let mut item = Self::placeholder(sort_order, synchronization);
        item.bind(move || {
            let value = f.call_with(args).map_err(into_work_fault)?;
            slot.set(value);
            Ok(())
        });
        (item, result)
    }

    pub fn sort_order(&self) -> &K {
        &self.sort_order
    }

    pub fn data(&self) -> &DataBag {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DataBag {
        &mut self.data
    }

    pub fn synchronization(&self) -> &Arc<dyn SyncHandle> {
        &self.synchronization
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.operation, OperationSlot::Bound(_))
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self.operation, OperationSlot::Consumed)
    }

    /// Runs the bound operation and signals the synchronization handle once.
    ///
    /// A panic inside the operation is caught and returned as a `WorkFault`. The
    /// handle is signaled whether or not the operation succeeded; a signaling error
    /// is returned only when the operation itself succeeded. Executing a consumed
    /// unit faults with `InvalidOperation` and does not signal again.
    pub fn execute(&mut self) -> Result<()> {
        let outcome = match std::mem::replace(&mut self.operation, OperationSlot::Consumed) {
            OperationSlot::Consumed => {
                return Err(Error::invalid_operation("work item already executed"));
            }
            OperationSlot::Unbound => {
                Err(Error::not_implemented("work item has no bound operation"))
            }
            OperationSlot::Bound(op) => panic::catch_unwind(AssertUnwindSafe(op))
                .unwrap_or_else(|p| Err(Error::from_panic(p))),
        };
        let signaled = self.synchronization.signal();
        outcome.and(signaled)
    }

    fn bind(&mut self, op: impl FnOnce() -> Result<()> + Send + 'static) {
        self.operation = OperationSlot::Bound(Box::new(op));
    }
}

impl<K: Ord> WorkItem<K> {
    /// Compares two units by their sort key.
    pub fn cmp_order(&self, other: &WorkItem<K>) -> Ordering {
        self.sort_order.cmp(&other.sort_order)
    }
}

impl<K: fmt::Debug> fmt::Debug for WorkItem<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.operation {
            OperationSlot::Unbound => "unbound",
            OperationSlot::Bound(_) => "bound",
            OperationSlot::Consumed => "consumed",
        };
        f.debug_struct("WorkItem")
            .field("sort_order", &self.sort_order)
            .field("data", &self.data)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use taskweave_common::error::{Error, ErrorKind};

    use super::WorkItem;
    use crate::latch::Latch;

    #[test]
    fn test_work_item_send() {
        fn is_send<T: Send>() {}
        is_send::<WorkItem<u64>>();
        is_send::<WorkItem<String>>();
    }

    #[test]
    fn test_action_arities() {
        let latch = Arc::new(Latch::new(3));
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let mut zero = WorkItem::action(
            0,
            latch.clone(),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            (),
        );

        let c = counter.clone();
        let mut one = WorkItem::action(
            1,
            latch.clone(),
            move |n: usize| {
                c.fetch_add(n, Ordering::SeqCst);
            },
            (10,),
        );

        let c = counter.clone();
        let mut three = WorkItem::action(
            2,
            latch.clone(),
            move |a: usize, b: &'static str, d: Vec<usize>| {
                c.fetch_add(a + b.len() + d.iter().sum::<usize>(), Ordering::SeqCst);
            },
            (100, "abcd", vec![1000, 2000]),
        );

        zero.execute().unwrap();
        one.execute().unwrap();
        three.execute().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1 + 10 + 100 + 4 + 3000);
        assert!(latch.is_set());
        assert!(zero.is_consumed() && one.is_consumed() && three.is_consumed());
    }

    #[test]
    fn test_function_twenty_args() {
        let latch = Arc::new(Latch::new(1));
        let (mut item, result) = WorkItem::function(
            "sum",
            latch.clone(),
            |a1: u32, a2: u32, a3: u32, a4: u32, a5: u32, a6: u32, a7: u32, a8: u32,
             a9: u32, a10: u32, a11: u32, a12: u32, a13: u32, a14: u32, a15: u32,
             a16: u32, a17: u32, a18: u32, a19: u32, a20: u32| {
                a1 + a2 + a3 + a4 + a5 + a6 + a7 + a8 + a9 + a10 + a11 + a12 + a13 + a14
                    + a15 + a16 + a17 + a18 + a19 + a20
            },
            (1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20),
        );
        assert!(!result.is_ready());
        item.execute().unwrap();
        assert!(result.is_ready());
        assert_eq!(result.take(), Some(210));
        assert_eq!(result.take(), None);
        assert!(latch.is_set());
    }

    #[test]
    fn test_placeholder_not_implemented() {
        let latch = Arc::new(Latch::new(1));
        let mut item = WorkItem::placeholder(7u8, latch.clone());
        assert!(!item.is_bound());
        let e = item.execute().unwrap_err();
        assert!(e.is_not_implemented());
        // The attempt still counts toward the latch.
        assert!(latch.is_set());
    }

    #[test]
    fn test_execute_twice() {
        let latch = Arc::new(Latch::new(2));
        let mut item = WorkItem::action(0, latch.clone(), || {}, ());
        item.execute().unwrap();
        let e = item.execute().unwrap_err();
        assert!(e.is_invalid_operation());
        assert_eq!(latch.current_count(), 1);
    }

    #[test]
    fn test_failing_action_is_work_fault() {
        let latch = Arc::new(Latch::new(1));
        let mut item = WorkItem::action(
            0,
            latch.clone(),
            |path: &'static str| -> Result<(), std::io::Error> {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, path))
            },
            ("missing.bin",),
        );
        let e = item.execute().unwrap_err();
        assert!(e.is_work_fault());
        assert!(e.to_string().contains("missing.bin"));
        assert!(latch.is_set());
    }

    #[test]
    fn test_panicking_action_is_work_fault() {
        let latch = Arc::new(Latch::new(1));
        let mut item = WorkItem::action(
            0,
            latch.clone(),
            |n: i32| {
                if n > 0 {
                    panic!("unit {n} exploded");
                }
            },
            (3,),
        );
        let e = item.execute().unwrap_err();
        match e.kind() {
            ErrorKind::WorkFault { message, .. } => {
                assert!(message.contains("unit 3 exploded"))
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(latch.is_set());
    }

    #[test]
    fn test_try_function() {
        let latch = Arc::new(Latch::new(2));
        let parse = |s: &'static str| {
            s.parse::<i64>()
                .map_err(|e| Error::invalid_arg("s", e.to_string()))
        };

        let (mut ok, ok_result) = WorkItem::try_function(0, latch.clone(), parse, ("42",));
        let (mut bad, bad_result) = WorkItem::try_function(1, latch.clone(), parse, ("x",));
        ok.execute().unwrap();
        assert!(bad.execute().unwrap_err().is_work_fault());
        assert_eq!(ok_result.take(), Some(42));
        assert!(!bad_result.is_ready());
        assert!(latch.is_set());
    }

    #[test]
    fn test_signal_error_surfaces_after_success() {
        let latch = Arc::new(Latch::new(0));
        let mut item = WorkItem::action(0, latch.clone(), || {}, ());
        let e = item.execute().unwrap_err();
        assert!(e.is_invalid_operation());

        let mut item = WorkItem::action(
            0,
            latch.clone(),
            || -> Result<(), Error> { Err(Error::work_fault("first")) },
            (),
        );
        let e = item.execute().unwrap_err();
        assert!(e.is_work_fault());
    }

    #[test]
    fn test_data_and_ordering() {
        let latch = Arc::new(Latch::new(3));
        let mut items = ["c", "a", "b"]
            .into_iter()
            .map(|k| WorkItem::placeholder(k.to_string(), latch.clone()))
            .collect::<Vec<_>>();
        items[0].data_mut().insert("origin", "third");
        items.sort_by(|a, b| a.cmp_order(b));
        let keys = items.iter().map(|i| i.sort_order().as_str()).collect::<Vec<_>>();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(items[2].data().get("origin").unwrap(), "third");
        assert!(format!("{:?}", items[2]).contains("unbound"));
    }
}
