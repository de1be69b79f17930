use crate::{error::QueryError, query::IndexQuery, session::DocumentSession, transport::QueryResult};
use std::{cell::RefCell, rc::Rc};

/// Completion callback for one pending lazy query; runs against the
/// session when the batch response arrives.
pub(crate) type LazyCompletion = Box<dyn FnOnce(&DocumentSession, QueryResult) -> Result<(), QueryError>>;

///
/// PendingLazyOperation
///
/// One registered-but-unflushed query. The session flushes all of them
/// together, in registration order, as a single multi-query request.
///

pub(crate) struct PendingLazyOperation {
    pub index_query: IndexQuery,
    pub complete: LazyCompletion,
}

///
/// Lazy
///
/// Handle to a deferred result. Reading the value flushes every pending
/// lazy operation on the session, not just this one.
///

pub struct Lazy<'a, T> {
    session: &'a DocumentSession,
    slot: Rc<RefCell<Option<T>>>,
}

impl<'a, T> Lazy<'a, T> {
    pub(crate) fn new(session: &'a DocumentSession, slot: Rc<RefCell<Option<T>>>) -> Self {
        Self { session, slot }
    }

    /// Whether the batch this handle belongs to has been flushed.
    #[must_use]
    pub fn is_evaluated(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Resolve the value, flushing the session's pending lazy batch if
    /// it has not run yet.
    pub fn value(self) -> Result<T, QueryError> {
        if self.slot.borrow().is_none() {
            self.session.execute_all_pending_lazy_operations()?;
        }

        self.slot.borrow_mut().take().ok_or_else(|| {
            crate::error::ExecutionError::UnexpectedResponse {
                expected: "evaluated lazy result",
            }
            .into()
        })
    }
}
