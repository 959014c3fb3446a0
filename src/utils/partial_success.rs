//! Type alias for operations that may succeed while reporting non-fatal problems.
//! An inert upload (no renderable components) or a page render that skipped an
//! unknown component still succeeds; what went wrong travels alongside the value.

/// Represents a successful operation where some parts failed but didn't prevent overall success.
/// The `Vec<E>` contains the problems that were handled gracefully.
pub type PartialSuccess<T, E> = ( T, Vec<E> );
