//! Unit tests for change application.

use std::cell::Cell;
use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use folio_epub::Resource;

use super::*;

/// View manager double recording every call.
#[derive(Default)]
struct RecordingViews {
    open: Vec<String>,
    closed: Vec<String>,
    opened: Vec<String>,
}

impl ViewManager for RecordingViews {
    fn open_views(&self) -> Vec<String> {
        self.open.clone()
    }

    fn close_view(&mut self, href: &str) {
        self.closed.push(href.to_owned());
    }

    fn open_view(&mut self, href: &str) {
        self.opened.push(href.to_owned());
    }
}

/// Interaction double with a scripted replace-book answer.
struct ScriptedInteraction {
    replace: bool,
    replace_asked: Cell<bool>,
}

impl ScriptedInteraction {
    fn new(replace: bool) -> Self {
        Self {
            replace,
            replace_asked: Cell::new(false),
        }
    }
}

impl Interaction for ScriptedInteraction {
    fn confirm_replace_book(&self) -> bool {
        self.replace_asked.set(true);
        self.replace
    }
}

struct BookFixture {
    root: TempDir,
    workdir: TempDir,
    store: BookStore,
}

impl BookFixture {
    fn stage(&self, href: &str, content: &str) {
        let path = self.workdir.path().join(href);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("stage dir");
        }
        fs::write(path, content).expect("stage file");
    }
}

fn seed(store: &mut BookStore, root: &Path, href: &str, id: &str, media_type: &str) {
    let path = root.join(href);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("seed dir");
    }
    fs::write(&path, format!("seeded {href}")).expect("seed file");
    store
        .insert(Resource::new(href, id, media_type))
        .expect("seed resource");
}

#[fixture]
fn book() -> BookFixture {
    let root = TempDir::new().expect("book root");
    let workdir = TempDir::new().expect("workdir");
    let mut store = BookStore::new(root.path(), "3.0", "content.opf");
    fs::write(root.path().join("content.opf"), "<package/>").expect("opf");
    seed(&mut store, root.path(), "Text/one.xhtml", "one", mediatype::XHTML);
    seed(&mut store, root.path(), "Text/two.xhtml", "two", mediatype::XHTML);
    store.set_spine(vec!["Text/one.xhtml".to_owned(), "Text/two.xhtml".to_owned()]);
    store.set_modified(false);
    BookFixture {
        root,
        workdir,
        store,
    }
}

fn record(href: &str, media_type: &str) -> ChangeRecord {
    ChangeRecord {
        href: href.to_owned(),
        id: String::new(),
        media_type: media_type.to_owned(),
    }
}

fn report() -> PluginReport {
    PluginReport::default()
}

#[rstest]
fn added_document_is_copied_and_tracked(mut book: BookFixture) {
    book.stage("Text/three.xhtml", "<html/>");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("Text/three.xhtml", mediatype::XHTML));
    report.content_document_delta = 1;

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Changed);
    assert!(book.store.contains("Text/three.xhtml"));
    assert!(book.root.path().join("Text/three.xhtml").is_file());
    assert!(book.store.is_modified());
    assert!(!book.store.watching_suspended());
}

#[test]
fn additions_with_traversal_segments_never_leave_the_root() {
    let outer = TempDir::new().expect("outer");
    let root = outer.path().join("book");
    let workdir = outer.path().join("work");
    fs::create_dir_all(&root).expect("root");
    fs::create_dir_all(&workdir).expect("workdir");
    let mut store = BookStore::new(&root, "3.0", "content.opf");
    fs::write(root.join("content.opf"), "<package/>").expect("opf");
    seed(&mut store, &root, "Text/one.xhtml", "one", mediatype::XHTML);
    store.set_modified(false);
    // Bait sitting where a traversal href would resolve.
    fs::write(outer.path().join("escaped.xhtml"), "<html/>").expect("bait");

    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("../escaped.xhtml", mediatype::XHTML));
    report.added.push(record("/etc/escaped.xhtml", mediatype::XHTML));
    report.content_document_delta = 2;

    let outcome = Applier::new(&mut store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, &workdir)
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(!store.contains("../escaped.xhtml"));
    assert!(!store.contains("/etc/escaped.xhtml"));
    assert!(!store.is_modified());
}

#[rstest]
fn modifications_with_traversal_segments_are_ignored(mut book: BookFixture) {
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.modified.push(record("../outside.xhtml", mediatype::XHTML));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(!book.store.is_modified());
}

#[rstest]
fn deleting_every_content_document_is_refused(mut book: BookFixture) {
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("Text/one.xhtml", mediatype::XHTML));
    report.deleted.push(record("Text/two.xhtml", mediatype::XHTML));
    report.content_document_delta = -2;

    let err = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect_err("must refuse");

    assert!(matches!(err, PluginError::LastDocumentGuard));
    assert!(book.store.contains("Text/one.xhtml"));
    assert!(book.store.contains("Text/two.xhtml"));
    assert!(!book.store.is_modified());
}

#[rstest]
fn package_document_is_never_deleted(mut book: BookFixture) {
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("content.opf", mediatype::OPF));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(book.store.contains("content.opf"));
}

#[rstest]
fn ncx_deletion_depends_on_version(mut book: BookFixture) {
    seed(
        &mut book.store,
        book.root.path(),
        "toc.ncx",
        "ncx",
        mediatype::NCX,
    );
    book.store.set_ncx(Some("toc.ncx".to_owned()));
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("toc.ncx", mediatype::NCX));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Changed);
    assert!(!book.store.contains("toc.ncx"));
    assert!(book.store.ncx_href().is_none());
}

#[rstest]
fn mandatory_ncx_survives_on_version_two(mut book: BookFixture) {
    let mut store = BookStore::new(book.root.path(), "2.0", "content.opf");
    seed(&mut store, book.root.path(), "Text/one.xhtml", "one", mediatype::XHTML);
    seed(&mut store, book.root.path(), "toc.ncx", "ncx", mediatype::NCX);
    store.set_ncx(Some("toc.ncx".to_owned()));
    store.set_modified(false);
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("toc.ncx", mediatype::NCX));

    let outcome = Applier::new(&mut store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(store.contains("toc.ncx"));
}

#[rstest]
fn ncx_addition_is_tracked_on_version_three(mut book: BookFixture) {
    book.stage("toc.ncx", "<ncx/>");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("toc.ncx", mediatype::NCX));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Changed);
    assert!(book.store.contains("toc.ncx"));
    assert_eq!(book.store.ncx_href(), Some("toc.ncx"));
}

#[rstest]
fn ncx_addition_is_ignored_when_one_exists(mut book: BookFixture) {
    seed(&mut book.store, book.root.path(), "toc.ncx", "ncx", mediatype::NCX);
    book.store.set_ncx(Some("toc.ncx".to_owned()));
    book.store.set_modified(false);
    book.stage("Toc/other.ncx", "<ncx/>");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("Toc/other.ncx", mediatype::NCX));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(!book.store.contains("Toc/other.ncx"));
    assert_eq!(book.store.ncx_href(), Some("toc.ncx"));
}

#[rstest]
fn ncx_addition_is_ignored_on_version_two(book: BookFixture) {
    let mut store = BookStore::new(book.root.path(), "2.0", "content.opf");
    seed(&mut store, book.root.path(), "Text/one.xhtml", "one", mediatype::XHTML);
    store.set_modified(false);
    book.stage("toc.ncx", "<ncx/>");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("toc.ncx", mediatype::NCX));

    let outcome = Applier::new(&mut store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(!store.contains("toc.ncx"));
}

#[rstest]
fn navigation_document_is_never_deleted(mut book: BookFixture) {
    book.store.set_nav(Some("Text/one.xhtml".to_owned()));
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("Text/one.xhtml", mediatype::XHTML));
    report.content_document_delta = -1;

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(book.store.contains("Text/one.xhtml"));
}

#[rstest]
fn tracked_deletion_closes_the_view_first(mut book: BookFixture) {
    let mut views = RecordingViews {
        open: vec!["Text/one.xhtml".to_owned(), "Text/two.xhtml".to_owned()],
        ..RecordingViews::default()
    };
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("Text/two.xhtml", mediatype::XHTML));
    report.content_document_delta = -1;

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Changed);
    assert_eq!(views.closed, vec!["Text/two.xhtml"]);
    assert!(views.opened.is_empty());
    assert!(!book.root.path().join("Text/two.xhtml").exists());
}

#[rstest]
fn views_are_redirected_when_every_open_document_dies(mut book: BookFixture) {
    let mut views = RecordingViews {
        open: vec!["Text/two.xhtml".to_owned()],
        ..RecordingViews::default()
    };
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("Text/two.xhtml", mediatype::XHTML));
    report.content_document_delta = -1;

    Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(views.opened, vec!["Text/one.xhtml"]);
}

#[rstest]
fn untracked_files_are_deleted_inside_the_root_only(mut book: BookFixture) {
    fs::write(book.root.path().join("stray.txt"), "stray").expect("stray");
    let target = book.root.path().join("stray.txt");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.deleted.push(record("../stray.txt", "text/plain"));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    // The parent segment is stripped, so the href resolves to the copy
    // inside the root and that one is removed.
    assert_eq!(outcome, ApplyOutcome::Changed);
    assert!(!target.exists());
}

#[rstest]
fn declined_book_replacement_aborts_the_batch(mut book: BookFixture) {
    book.store.set_modified(true);
    book.stage("new.epub", "zip bytes");
    book.stage("Text/extra.xhtml", "<html/>");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("new.epub", mediatype::EPUB));
    report.added.push(record("Text/extra.xhtml", mediatype::XHTML));
    report.content_document_delta = 1;

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Input, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert!(interaction.replace_asked.get());
    assert!(!book.store.contains("Text/extra.xhtml"));
    assert!(!book.store.watching_suspended());
}

#[rstest]
fn decline_still_reports_changes_already_applied(mut book: BookFixture) {
    book.store.set_modified(true);
    book.stage("Text/extra.xhtml", "<html/>");
    book.stage("new.epub", "zip bytes");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    // The content document lands before the replacement is refused.
    report.added.push(record("Text/extra.xhtml", mediatype::XHTML));
    report.added.push(record("new.epub", mediatype::EPUB));
    report.content_document_delta = 1;

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Input, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Changed);
    assert!(interaction.replace_asked.get());
    assert!(book.store.contains("Text/extra.xhtml"));
    assert!(book.store.is_modified());
}

#[rstest]
fn confirmed_book_replacement_hands_back_the_new_archive(mut book: BookFixture) {
    book.store.set_modified(true);
    book.stage("new.epub", "zip bytes");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(true);
    let mut report = report();
    report.added.push(record("new.epub", mediatype::EPUB));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Input, book.workdir.path())
        .expect("apply");

    assert_eq!(
        outcome,
        ApplyOutcome::ReplacedBook(book.workdir.path().join("new.epub"))
    );
}

#[rstest]
fn unmodified_book_is_replaced_without_asking(mut book: BookFixture) {
    book.stage("new.epub", "zip bytes");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("new.epub", mediatype::EPUB));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Input, book.workdir.path())
        .expect("apply");

    assert!(matches!(outcome, ApplyOutcome::ReplacedBook(_)));
    assert!(!interaction.replace_asked.get());
}

#[rstest]
fn modified_text_is_reloaded_into_the_cache(mut book: BookFixture) {
    book.stage("Text/one.xhtml", "<html>rewritten</html>");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.modified.push(record("Text/one.xhtml", mediatype::XHTML));

    let outcome = Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(outcome, ApplyOutcome::Changed);
    assert_eq!(
        book.store
            .resource("Text/one.xhtml")
            .and_then(Resource::text),
        Some("<html>rewritten</html>")
    );
}

#[rstest]
fn structural_documents_are_rewritten_last(mut book: BookFixture) {
    seed(&mut book.store, book.root.path(), "toc.ncx", "ncx", mediatype::NCX);
    book.store.set_ncx(Some("toc.ncx".to_owned()));
    let mut modified_report = report();
    modified_report.modified.push(record("content.opf", mediatype::OPF));
    modified_report.modified.push(record("toc.ncx", mediatype::NCX));
    modified_report.modified.push(record("Text/one.xhtml", mediatype::XHTML));

    let ordered: Vec<&str> = ordered_modifications(&modified_report, &book.store)
        .into_iter()
        .map(|r| r.href.as_str())
        .collect();

    assert_eq!(ordered, vec!["Text/one.xhtml", "content.opf", "toc.ncx"]);
}

#[rstest]
fn new_fonts_inherit_the_book_obfuscation_algorithm(mut book: BookFixture) {
    let mut obfuscated = Resource::new("Fonts/base.woff2", "f0", "font/woff2");
    obfuscated.set_obfuscation_algorithm("http://www.idpf.org/2008/embedding");
    book.store.insert(obfuscated).expect("seed font");
    book.stage("Fonts/new.woff2", "font bytes");
    let mut views = RecordingViews::default();
    let interaction = ScriptedInteraction::new(false);
    let mut report = report();
    report.added.push(record("Fonts/new.woff2", "font/woff2"));

    Applier::new(&mut book.store, &mut views, &interaction)
        .apply(&report, PluginKind::Edit, book.workdir.path())
        .expect("apply");

    assert_eq!(
        book.store
            .resource("Fonts/new.woff2")
            .and_then(Resource::obfuscation_algorithm),
        Some("http://www.idpf.org/2008/embedding")
    );
}
