//! End-to-end reconciliation scenarios against the in-process mock hub.

use forgesync_client::{HubSession, MockHub};
use forgesync_core::{Error, Fault, Key, RunPolicies};
use forgesync_engine::{self as engine, ReportState, RunConfig, RunOutcome, RunReport};
use forgesync_model::{parse_documents, ChangeOp};
use forgesync_namespace::Namespace;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn namespace(yaml: &str) -> Namespace {
    let docs = parse_documents(yaml, Path::new("site.yaml")).expect("parse");
    engine::build_namespace(docs, &RunPolicies::default()).expect("expand")
}

fn session(hub: &Arc<MockHub>) -> HubSession {
    HubSession::new(hub.clone(), Duration::from_secs(5))
}

fn config() -> RunConfig {
    RunConfig {
        chunk_size: 10,
        ..RunConfig::default()
    }
}

fn config_with(policies: RunPolicies) -> RunConfig {
    RunConfig {
        policies,
        chunk_size: 10,
        ..RunConfig::default()
    }
}

fn report_for<'a>(run: &'a RunReport, key: &Key) -> &'a engine::ChangeReport {
    run.reports
        .iter()
        .find(|r| &r.key == key)
        .unwrap_or_else(|| panic!("no report for {}", key))
}

const READ_METHODS: &[&str] = &[
    "getTag",
    "getInheritanceData",
    "getTagExternalRepos",
    "getTagGroups",
    "getBuildTarget",
    "getExternalRepo",
    "getUser",
    "getUserPerms",
    "getUserGroups",
    "getGroupMembers",
    "getHost",
    "listHostChannels",
    "getChannel",
    "listChannelHosts",
    "getAllPerms",
    "listBTypes",
    "listCGs",
    "getArchiveTypes",
];

// ---------------------------------------------------------------------------
// Scenario 1: simple chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_chain_creates_parent_then_child() {
    let yaml = "type: tag\nname: a\n---\ntype: tag\nname: b\ninherit:\n  - parent: a\n";
    let hub = Arc::new(MockHub::new());
    let run = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    assert_eq!(run.summary.outcome, RunOutcome::Success);

    let a = report_for(&run, &Key::new("tag", "a"));
    assert_eq!(a.state, ReportState::Applied);
    assert_eq!(a.changes.len(), 1);
    assert_eq!(a.changes[0].op, ChangeOp::CreateObject);

    let b = report_for(&run, &Key::new("tag", "b"));
    let ops: Vec<ChangeOp> = b.changes.iter().map(|c| c.op).collect();
    assert_eq!(ops, vec![ChangeOp::CreateObject, ChangeOp::SetInheritance]);

    // a's create precedes b's create on the wire
    let creates: Vec<String> = hub
        .calls()
        .iter()
        .filter(|c| c.method == "createTag")
        .map(|c| c.args[0].as_str().unwrap().to_string())
        .collect();
    assert_eq!(creates, vec!["a", "b"]);

    hub.state(|state| {
        assert!(state.tags.contains_key("a"));
        assert_eq!(state.inheritance["b"][0]["name"], json!("a"));
    });
}

// ---------------------------------------------------------------------------
// Scenario 2: missing dependency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_dependency_refuses_apply_with_zero_writes() {
    let yaml = "type: tag\nname: b\ninherit:\n  - parent: missing\n";
    let hub = Arc::new(MockHub::new());

    let err = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Phantom { .. }));
    assert!(hub.calls().is_empty(), "no call may reach the hub");
}

#[tokio::test]
async fn missing_dependency_still_compares_with_a_diagnostic() {
    let yaml = "type: tag\nname: b\ninherit:\n  - parent: missing\n";
    let hub = Arc::new(MockHub::new());

    let run = engine::compare(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    let b = report_for(&run, &Key::new("tag", "b"));
    assert!(!b.changes.is_empty());
    assert!(run
        .summary
        .diagnostics
        .iter()
        .any(|d| d.contains("tag:missing")));
}

#[tokio::test]
async fn skip_phantoms_drops_tainted_objects_and_proceeds() {
    let yaml = "type: tag\nname: ok\n---\ntype: tag\nname: b\ninherit:\n  - parent: missing\n";
    let hub = Arc::new(MockHub::new());
    let run = engine::apply(
        &namespace(yaml),
        &session(&hub),
        &config_with(RunPolicies {
            skip_phantoms: true,
            ..RunPolicies::default()
        }),
    )
    .await
    .unwrap();

    assert_eq!(report_for(&run, &Key::new("tag", "ok")).state, ReportState::Applied);
    // the tainted object is dropped, not failed: the run still succeeds
    assert_eq!(run.summary.outcome, RunOutcome::Success);
    assert_eq!(run.summary.skipped, 1);
    assert!(!run.reports.iter().any(|r| r.key == Key::new("tag", "b")));
    hub.state(|state| {
        assert!(state.tags.contains_key("ok"));
        assert!(!state.tags.contains_key("b"));
    });
}

// ---------------------------------------------------------------------------
// Scenario 3: mutual cycle via deferred-update shadows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutual_inheritance_cycle_applies_in_two_waves() {
    let yaml = "type: tag\nname: a_1\ninherit:\n  - parent: a_2\n---\n\
                type: tag\nname: a_2\ninherit:\n  - parent: a_1\n";
    let hub = Arc::new(MockHub::new());
    let run = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    assert_eq!(run.summary.outcome, RunOutcome::Success);
    assert_eq!(
        report_for(&run, &Key::new("deferred-tag", "a_1")).changes[0].op,
        ChangeOp::SetInheritance
    );

    // both tags exist before either inheritance write
    let calls = hub.calls();
    let methods: Vec<&str> = calls.iter().map(|c| c.method.as_str()).collect();
    let last_create = methods.iter().rposition(|m| *m == "createTag").unwrap();
    let first_set = methods.iter().position(|m| *m == "setInheritanceData").unwrap();
    assert!(last_create < first_set);

    hub.state(|state| {
        assert_eq!(state.inheritance["a_1"][0]["name"], json!("a_2"));
        assert_eq!(state.inheritance["a_2"][0]["name"], json!("a_1"));
    });
}

// ---------------------------------------------------------------------------
// Scenario 4: exact members against observed extras
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exact_members_add_missing_and_remove_extras() {
    let yaml = "\
type: user\nname: u1\n---\n\
type: user\nname: u2\n---\n\
type: group\nname: g\nmembers: [u1, u2]\nexact-members: true\n";
    let hub = Arc::new(MockHub::new());
    hub.state(|state| {
        state.users.insert("g".into(), json!({"name": "g", "status": 0, "usertype": 2}));
        state.users.insert("u2".into(), json!({"name": "u2", "status": 0, "usertype": 0}));
        state.users.insert("u3".into(), json!({"name": "u3", "status": 0, "usertype": 0}));
        state.group_members.insert("g".into(), vec!["u2".into(), "u3".into()]);
    });

    let run = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    let g = report_for(&run, &Key::new("group", "g"));
    let ops: Vec<(ChangeOp, String)> = g
        .changes
        .iter()
        .map(|c| (c.op, c.call.args[1].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(
        ops,
        vec![
            (ChangeOp::AddMember, "u1".to_string()),
            (ChangeOp::RemoveMember, "u3".to_string()),
        ]
    );

    hub.state(|state| {
        assert_eq!(state.group_members["g"], vec!["u2", "u1"]);
    });
}

// without the exact flag no removal is emitted
#[tokio::test]
async fn loose_members_never_remove() {
    let yaml = "\
type: user\nname: u1\n---\n\
type: group\nname: g\nmembers: [u1]\n";
    let hub = Arc::new(MockHub::new());
    hub.state(|state| {
        state.users.insert("g".into(), json!({"name": "g", "status": 0, "usertype": 2}));
        state.users.insert("u1".into(), json!({"name": "u1", "status": 0, "usertype": 0}));
        state.users.insert("u3".into(), json!({"name": "u3", "status": 0, "usertype": 0}));
        state.group_members.insert("g".into(), vec!["u1".into(), "u3".into()]);
    });

    let run = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();
    let g = report_for(&run, &Key::new("group", "g"));
    assert!(g.changes.is_empty());
    hub.state(|state| assert!(state.group_members["g"].contains(&"u3".to_string())));
}

// ---------------------------------------------------------------------------
// Scenario 5: template expansion with defaults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn template_defaults_fill_the_expanded_entity() {
    let yaml = "\
type: template\n\
name: build-tag-template\n\
defaults:\n\
\x20 arches: [x86_64]\n\
content: |\n\
\x20 type: tag\n\
\x20 name: {{ name }}\n\
\x20 arches: [{% for a in arches %}{{ a }}{% if not loop.last %}, {% endif %}{% endfor %}]\n\
---\n\
type: build-tag-template\n\
name: f42-build\n";

    let ns = namespace(yaml);
    let object = ns.get(&Key::new("tag", "f42-build")).expect("expanded tag");
    assert_eq!(object.origin().depth(), 1);
    assert_eq!(object.origin().trace[0].template, "build-tag-template");

    let doc = object.to_document(false);
    assert_eq!(doc.data["arches"], json!(["x86_64"]));

    // apply creates it with the defaulted arches
    let hub = Arc::new(MockHub::new());
    engine::apply(&ns, &session(&hub), &config()).await.unwrap();
    hub.state(|state| {
        assert_eq!(state.tags["f42-build"]["arches"], json!("x86_64"));
    });
}

// ---------------------------------------------------------------------------
// Scenario 6: remote apply failure cascades to dependents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn apply_failure_cascades_to_dependents() {
    let yaml = "\
type: tag\nname: a\n---\n\
type: tag\nname: b\n---\n\
type: target\nname: t\nbuild-tag: b\ndest-tag: b\n";
    let hub = Arc::new(MockHub::new());
    hub.fail_when("createTag", Some("b"), Fault::new(1, "remote generic error"));

    let run = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    assert_eq!(run.summary.outcome, RunOutcome::Failure);
    assert_eq!(report_for(&run, &Key::new("tag", "a")).state, ReportState::Applied);

    let b = report_for(&run, &Key::new("tag", "b"));
    assert!(b.is_failed());
    assert!(b.error.as_deref().unwrap().contains("remote generic error"));

    let t = report_for(&run, &Key::new("target", "t"));
    assert!(t.is_failed());
    assert!(t.error.as_deref().unwrap().contains("upstream failure"));

    // the dependent contributed no remote calls at all
    assert!(!hub
        .methods_called()
        .iter()
        .any(|m| m == "createBuildTarget" || m == "getBuildTarget"));
}

// ---------------------------------------------------------------------------
// empty-diff idempotence: a second run against an unchanged hub is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_apply_is_an_empty_diff() {
    let yaml = "\
type: external-repo\nname: mirror\nurl: https://mirror.example.com/el9\n---\n\
type: tag\nname: build\narches: [x86_64, aarch64]\nlocked: true\n\
external-repos:\n  - {repo: mirror, priority: 5}\n\
groups:\n  srpm-build: [bash, rpm-build]\n---\n\
type: target\nname: dist\nbuild-tag: build\ndest-tag: build\n";
    let hub = Arc::new(MockHub::new());

    let first = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();
    assert_eq!(first.summary.outcome, RunOutcome::Success);
    assert!(first.summary.changes > 0);

    let second = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();
    assert_eq!(second.summary.outcome, RunOutcome::Success);
    assert_eq!(second.summary.changes, 0, "second run must be change-free");
}

// ---------------------------------------------------------------------------
// compare purity: a compare run leaves the hub untouched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn compare_never_writes() {
    let yaml = "\
type: tag\nname: build\narches: [x86_64]\n---\n\
type: group\nname: g\nmembers: []\nexact-members: true\n";
    let hub = Arc::new(MockHub::new());
    hub.state(|state| {
        state.users.insert("g".into(), json!({"name": "g", "status": 0, "usertype": 2}));
        state.group_members.insert("g".into(), vec!["stale".into()]);
    });

    let run = engine::compare(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    // changes are planned, not applied
    let g = report_for(&run, &Key::new("group", "g"));
    assert_eq!(g.state, ReportState::Compared);
    assert_eq!(g.changes[0].op, ChangeOp::RemoveMember);

    for method in hub.methods_called() {
        assert!(
            READ_METHODS.contains(&method.as_str()),
            "compare issued write method {}",
            method
        );
    }
    hub.state(|state| {
        assert_eq!(state.group_members["g"], vec!["stale"]);
        assert!(!state.tags.contains_key("build"));
    });
}

// ---------------------------------------------------------------------------
// check-remote: discovered prerequisites satisfy edges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_remote_promotes_existing_phantoms() {
    let yaml = "type: tag\nname: child\ninherit:\n  - parent: base\n";
    let hub = Arc::new(MockHub::new());
    hub.state(|state| {
        state.tags.insert(
            "base".into(),
            json!({"name": "base", "arches": "", "locked": false,
                   "maven_support": false, "perm": null, "extra": {}}),
        );
    });

    let run = engine::apply(
        &namespace(yaml),
        &session(&hub),
        &config_with(RunPolicies {
            check_remote: true,
            ..RunPolicies::default()
        }),
    )
    .await
    .unwrap();

    assert_eq!(run.summary.outcome, RunOutcome::Success);
    hub.state(|state| assert!(state.tags.contains_key("child")));
}

// ---------------------------------------------------------------------------
// dump: observed state renders as documents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dump_renders_observed_state_with_elision() {
    let hub = Arc::new(MockHub::new());
    hub.state(|state| {
        state.tags.insert(
            "build".into(),
            json!({"name": "build", "arches": "x86_64", "locked": false,
                   "maven_support": false, "perm": null, "extra": {}}),
        );
        state
            .inheritance
            .insert("build".into(), json!([{"name": "base", "priority": 10}]));
    });

    let dump = engine::dump(
        &[Key::new("tag", "build"), Key::new("tag", "gone")],
        &session(&hub),
        &config(),
    )
    .await
    .unwrap();

    assert_eq!(dump.documents.len(), 1);
    let doc = &dump.documents[0];
    assert_eq!(doc.doc_type, "tag");
    assert_eq!(doc.data["arches"], json!(["x86_64"]));
    assert_eq!(doc.data["inherit"][0]["parent"], json!("base"));
    // locked=false is the default and elides
    assert!(!doc.data.contains_key("locked"));

    assert_eq!(dump.missing, vec![Key::new("tag", "gone")]);
}

// ---------------------------------------------------------------------------
// user/group mutual declaration applies cleanly end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutually_referential_accounts_apply() {
    let yaml = "\
type: user\nname: alice\ngroups: [releng]\n---\n\
type: group\nname: releng\nmembers: [alice]\n";
    let hub = Arc::new(MockHub::new());
    let run = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();

    assert_eq!(run.summary.outcome, RunOutcome::Success);
    hub.state(|state| {
        assert!(state.users.contains_key("alice"));
        assert!(state.users.contains_key("releng"));
        assert_eq!(state.group_members["releng"], vec!["alice"]);
    });

    // and the second run is clean
    let second = engine::apply(&namespace(yaml), &session(&hub), &config())
        .await
        .unwrap();
    assert_eq!(second.summary.changes, 0);
}
