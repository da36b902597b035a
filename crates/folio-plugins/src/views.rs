//! Editing-view collaborator consulted by the change applier.
//!
//! The applier must never let the set of open content-document views drop
//! to zero mid-batch, so before deleting it inspects and redirects views
//! through this trait. The tab/window machinery itself lives outside this
//! core.

/// Minimal interface onto the open editing views, keyed by resource href.
pub trait ViewManager {
    /// Returns the hrefs of resources with an open view.
    #[must_use]
    fn open_views(&self) -> Vec<String>;

    /// Closes any view targeting the given resource.
    fn close_view(&mut self, href: &str);

    /// Opens (or focuses) a view for the given resource.
    fn open_view(&mut self, href: &str);
}

/// A view manager for contexts with no open views (e.g. automation runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoViews;

impl ViewManager for NoViews {
    fn open_views(&self) -> Vec<String> {
        Vec::new()
    }

    fn close_view(&mut self, _href: &str) {}

    fn open_view(&mut self, _href: &str) {}
}
