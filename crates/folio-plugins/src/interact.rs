//! User-decision collaborator consulted at the two confirmation gates.
//!
//! The execution core never talks to a widget toolkit; when a run reaches a
//! point that needs an explicit human decision it asks this trait. Both
//! defaults answer no, so a context that provides no interaction aborts
//! rather than proceeds.

/// Decisions the invoking context must answer during a run.
pub trait Interaction {
    /// Asks whether to apply a change set despite malformed markup.
    ///
    /// `errors` carries one formatted line per failed document. The
    /// default, and the answer on any non-explicit confirmation, is abort.
    #[must_use]
    fn allow_malformed(&self, errors: &[String]) -> bool {
        let _ = errors;
        false
    }

    /// Asks whether an input plugin may replace the current book, losing
    /// unsaved changes.
    #[must_use]
    fn confirm_replace_book(&self) -> bool {
        false
    }
}

/// An interaction context that declines everything; the safe default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

impl Interaction for DeclineAll {}
