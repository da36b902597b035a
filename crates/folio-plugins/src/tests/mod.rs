//! End-to-end runs through the public API with a real child process.
//!
//! The registered "interpreter" is `/bin/sh` and the launcher script is a
//! small shell program, so the full pipeline runs without a Python
//! installation: snapshot, handshake, spawn, output collection, parsing,
//! gate, and application.
#![cfg(unix)]

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use folio_epub::{BookStore, Resource};

use crate::{
    ApplyOutcome, DeclineAll, NoViews, Outcome, PluginDescriptor, PluginKind, PluginRegistry,
    PluginRunner, ProcessExecutor, RunState, Settings,
};

const XHTML: &str = "application/xhtml+xml";

struct Harness {
    root: TempDir,
    launchers: TempDir,
    registry: PluginRegistry,
    store: BookStore,
}

#[fixture]
fn harness() -> Harness {
    let root = TempDir::new().expect("book root");
    let launchers = TempDir::new().expect("launcher dir");
    fs::create_dir_all(launchers.path().join("python")).expect("family dir");

    let mut registry = PluginRegistry::new(root.path().join("plugins"), launchers.path());
    registry.set_engine_path("python3.13", "/bin/sh");
    registry
        .register(PluginDescriptor::new(
            "Rewriter",
            PluginKind::Edit,
            vec!["python3.13".to_owned()],
        ))
        .expect("register");

    let mut store = BookStore::new(root.path(), "3.0", "content.opf");
    fs::write(root.path().join("content.opf"), "<package/>").expect("opf");
    fs::create_dir_all(root.path().join("Text")).expect("text dir");
    fs::write(root.path().join("Text/one.xhtml"), "<html/>").expect("doc");
    store
        .insert(Resource::new("Text/one.xhtml", "one", XHTML))
        .expect("seed");
    store.set_spine(vec!["Text/one.xhtml".to_owned()]);
    store.set_modified(false);

    Harness {
        root,
        launchers,
        registry,
        store,
    }
}

impl Harness {
    fn install_launcher(&self, script: &str) {
        fs::write(
            self.launchers.path().join("python").join("launcher.py"),
            script,
        )
        .expect("launcher script");
    }

    fn run(&mut self) -> crate::RunReport {
        let settings = Settings::default();
        let mut runner = PluginRunner::new(&self.registry, &settings, ProcessExecutor);
        let mut views = NoViews;
        runner
            .run(
                "Rewriter",
                &mut self.store,
                &mut views,
                &DeclineAll,
                "/books/novel.epub",
                Vec::new(),
            )
            .expect("run")
    }
}

#[rstest]
fn shell_plugin_modifies_a_document_end_to_end(mut harness: Harness) {
    harness.install_launcher(
        r#"#!/bin/sh
if [ ! -f "$2/folio.cfg" ]; then
  printf '<?xml version="1.0"?><wrapper><result>failed</result><msg>no handshake</msg></wrapper>'
  exit 0
fi
mkdir -p "$2/Text"
printf '<html><body>rewritten</body></html>' > "$2/Text/one.xhtml"
printf '<?xml version="1.0"?><wrapper><result>success</result><msg>%s</msg><modified href="Text/one.xhtml" id="one" media-type="application/xhtml+xml"/></wrapper>' "$3"
"#,
    );

    let report = harness.run();

    assert_eq!(report.outcome(), Outcome::Success);
    assert_eq!(report.state(), RunState::Done);
    // The launcher received the plugin type tag as its third argument.
    assert_eq!(report.messages(), ["edit"]);
    assert_eq!(report.applied(), &ApplyOutcome::Changed);
    assert_eq!(
        harness
            .store
            .resource("Text/one.xhtml")
            .and_then(Resource::text),
        Some("<html><body>rewritten</body></html>")
    );
    assert_eq!(
        fs::read_to_string(harness.root.path().join("Text/one.xhtml")).expect("read"),
        "<html><body>rewritten</body></html>"
    );
}

#[rstest]
fn shell_plugin_failure_leaves_the_book_alone(mut harness: Harness) {
    harness.install_launcher(
        r#"#!/bin/sh
echo "diagnostic chatter on stdout"
printf '<?xml version="1.0"?><wrapper><result>failed</result><msg>gave up</msg></wrapper>'
"#,
    );

    let report = harness.run();

    assert_eq!(report.outcome(), Outcome::Failed);
    assert_eq!(report.status_line(), "Status: failed");
    assert_eq!(report.messages(), ["gave up"]);
    assert!(!harness.store.is_modified());
}

#[rstest]
fn shell_plugin_crash_is_detected(mut harness: Harness) {
    harness.install_launcher("#!/bin/sh\nkill -11 $$\n");

    let report = harness.run();

    assert_eq!(report.outcome(), Outcome::Crashed);
    assert_eq!(report.state(), RunState::Crashed);
    assert!(!harness.store.is_modified());
}

#[rstest]
fn malformed_added_document_is_rejected_end_to_end(mut harness: Harness) {
    harness.install_launcher(
        r#"#!/bin/sh
mkdir -p "$2/Text"
printf '<html><p>unclosed</html>' > "$2/Text/two.xhtml"
printf '<?xml version="1.0"?><wrapper><result>success</result><added href="Text/two.xhtml" id="two" media-type="application/xhtml+xml"/></wrapper>'
"#,
    );

    let report = harness.run();

    assert_eq!(report.outcome(), Outcome::Failed);
    assert!(!harness.store.contains("Text/two.xhtml"));
}
