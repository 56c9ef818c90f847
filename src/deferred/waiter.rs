//! Waiter stack.
//!
//! Registrations are pushed as reference-counted nodes onto a persistent
//! LIFO stack whose head lives in the state word (see `state`). A node is
//! private to the registering thread until the compare-and-swap that
//! publishes it succeeds; from then on it is immutable except for the single
//! take of its waiter, performed by whoever detached the stack. At
//! resolution the stack is drained and reversed, so waiters are replayed in
//! registration order.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Head of a waiter stack; `None` is the empty stack.
pub(crate) type Stack<W> = Option<Arc<Node<W>>>;

/// One registration on the waiter stack.
pub(crate) struct Node<W> {
    link: Mutex<Link<W>>,
}

struct Link<W> {
    waiter: Option<W>,
    next: Stack<W>,
}

impl<W> Node<W> {
    pub(crate) fn new(waiter: W) -> Arc<Self> {
        Arc::new(Self {
            link: Mutex::new(Link {
                waiter: Some(waiter),
                next: None,
            }),
        })
    }

    /// Points an unpublished node at the current head before a push attempt.
    pub(crate) fn relink(&self, next: Stack<W>) {
        self.link.lock().next = next;
    }

    /// Takes the waiter back out of a node whose push failed.
    pub(crate) fn reclaim(&self) -> Option<W> {
        self.link.lock().waiter.take()
    }
}

impl<W> Drop for Node<W> {
    // Unlinks iteratively so long chains cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.link.get_mut().next.take();
        while let Some(node) = next {
            next = match Arc::try_unwrap(node) {
                Ok(mut node) => node.link.get_mut().next.take(),
                Err(_) => None,
            };
        }
    }
}

/// Takes every waiter out of a detached stack, oldest first.
pub(crate) fn drain<W>(head: &Stack<W>) -> Vec<W> {
    let mut waiters = Vec::new();
    let mut cursor = head.clone();
    while let Some(node) = cursor {
        let mut link = node.link.lock();
        waiters.extend(link.waiter.take());
        cursor = link.next.clone();
    }
    waiters.reverse();
    waiters
}

/// Number of nodes still linked from `head`.
pub(crate) fn depth<W>(head: &Stack<W>) -> usize {
    let mut count = 0;
    let mut cursor = head.clone();
    while let Some(node) = cursor {
        count += 1;
        cursor = node.link.lock().next.clone();
    }
    count
}

impl<W> fmt::Debug for Node<W> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Node")
            .field("pending", &self.link.lock().waiter.is_some())
            .finish_non_exhaustive()
    }
}
