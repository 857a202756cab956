use pretty_assertions::assert_eq;
use realm_host::HostEnvironment;
use realm_sandbox::{
    CodeUnit, EndowmentSet, RecoveryMode, Sandbox, SandboxConfig, SandboxError, SandboxManager,
    SandboxOptions,
};
use realm_script::{ScriptError, ScriptObject};
use realm_types::{LifecyclePhase, PatcherKind, SandboxId, SandboxState};

// ── Helpers ─────────────────────────────────────────────────────

fn id(name: &str) -> SandboxId {
    SandboxId::new(name).unwrap()
}

fn create(host: &HostEnvironment, name: &str) -> Sandbox {
    Sandbox::create(host, id(name), EndowmentSet::new(), SandboxOptions::default()).unwrap()
}

fn run(sandbox: &Sandbox, source: &str) {
    sandbox.run(&CodeUnit::new("app.js", source)).unwrap();
}

/// Externally observable page state: pending timers, listeners, history, DOM.
fn page_snapshot(host: &HostEnvironment) -> (usize, usize, Vec<(String, serde_json::Value)>, usize, usize) {
    let history = host
        .history_entries()
        .into_iter()
        .map(|e| (e.url, e.state.to_json()))
        .collect();
    let document = host.document();
    let head = document.children(document.head()).unwrap().len();
    let body = document.children(document.body()).unwrap().len();
    (host.pending_timers(), host.total_listeners(), history, head, body)
}

// ── Lifecycle ───────────────────────────────────────────────────

#[test]
fn lifecycle_transitions() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    assert_eq!(sandbox.state(), SandboxState::Created);
    assert!(sandbox.active_patchers().is_empty());

    sandbox.mount();
    assert_eq!(sandbox.state(), SandboxState::Mounted);
    assert_eq!(sandbox.active_patchers(), PatcherKind::ALL.to_vec());
    assert_eq!(host.interceptor_count(), 4);

    sandbox.unmount();
    assert_eq!(sandbox.state(), SandboxState::Unmounted);
    assert!(sandbox.active_patchers().is_empty());
    assert_eq!(host.interceptor_count(), 0);
}

#[test]
fn mount_and_unmount_are_idempotent() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    sandbox.mount();
    assert_eq!(host.interceptor_count(), 4);

    sandbox.unmount();
    sandbox.unmount();
    assert_eq!(sandbox.state(), SandboxState::Unmounted);
    assert_eq!(host.interceptor_count(), 0);
}

#[test]
fn run_requires_a_mounted_sandbox() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    let err = sandbox.run(&CodeUnit::new("a.js", "1")).unwrap_err();
    assert!(matches!(
        err,
        SandboxError::State { state: SandboxState::Created, .. }
    ));

    sandbox.mount();
    sandbox.unmount();
    let err = sandbox.run(&CodeUnit::new("a.js", "1")).unwrap_err();
    assert!(matches!(
        err,
        SandboxError::State { state: SandboxState::Unmounted, .. }
    ));
}

#[test]
fn application_errors_carry_sandbox_and_phase() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();

    let err = sandbox
        .run(&CodeUnit::new("boom.js", "throw 'boom'"))
        .unwrap_err();
    match &err {
        SandboxError::ApplicationExecution {
            sandbox_id,
            phase,
            label,
            ..
        } => {
            assert_eq!(sandbox_id.as_str(), "app");
            assert_eq!(*phase, LifecyclePhase::Run);
            assert_eq!(label, "boom.js");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.script_error(), Some(ScriptError::Thrown(v)) if v.as_str() == Some("boom")));

    let err = sandbox
        .run(&CodeUnit::new("syntax.js", "var = ;"))
        .unwrap_err();
    assert!(matches!(err.script_error(), Some(ScriptError::Syntax { label, .. }) if label == "syntax.js"));
}

#[test]
fn runaway_application_code_fails_without_taking_down_the_host() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();

    let err = sandbox
        .run(&CodeUnit::new("loop.js", "var s = 'eval(s)'; eval(s);"))
        .unwrap_err();
    assert!(matches!(
        err,
        SandboxError::ApplicationExecution { ref label, .. } if label == "loop.js"
    ));
    assert!(matches!(err.script_error(), Some(ScriptError::Range(_))));

    let nested = format!("var x = {}1{};", "(".repeat(3_000), ")".repeat(3_000));
    let err = sandbox.run(&CodeUnit::new("nested.js", nested)).unwrap_err();
    assert!(matches!(err.script_error(), Some(ScriptError::Syntax { label, .. }) if label == "nested.js"));

    let still_alive = sandbox.run(&CodeUnit::new("after.js", "1 + 1")).unwrap();
    assert_eq!(still_alive.as_number(), Some(2.0));
}

#[test]
fn fresh_remount_starts_from_an_empty_record() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(&sandbox, "counter = 1");
    sandbox.unmount();
    assert!(sandbox.membrane().record().is_empty());

    sandbox.mount();
    let kind = sandbox.run(&CodeUnit::new("a.js", "typeof counter")).unwrap();
    assert_eq!(kind.as_str(), Some("undefined"));
    assert_eq!(sandbox.effect_count(), 0);
}

#[test]
fn preserve_mode_keeps_the_record_across_remounts() {
    let host = HostEnvironment::new();
    let mut sandbox = Sandbox::create(
        &host,
        id("app"),
        EndowmentSet::new(),
        SandboxOptions {
            recovery: RecoveryMode::Preserve,
            ..SandboxOptions::default()
        },
    )
    .unwrap();
    sandbox.mount();
    run(&sandbox, "counter = 1; setTimeout(function () {}, 50);");
    sandbox.unmount();
    assert_eq!(host.pending_timers(), 0);

    sandbox.mount();
    let counter = sandbox.run(&CodeUnit::new("a.js", "counter")).unwrap();
    assert_eq!(counter.as_number(), Some(1.0));
    assert_eq!(sandbox.effect_count(), 0);
}

// ── Effect reversal ─────────────────────────────────────────────

#[test]
fn timer_registered_during_mount_never_fires_after_unmount() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(
        &sandbox,
        "fired = false; setTimeout(function () { fired = true; }, 1000);",
    );
    assert_eq!(sandbox.effect_count(), 1);

    assert_eq!(host.advance(10), 0);
    sandbox.unmount();
    assert_eq!(host.advance(5_000), 0);
    assert_eq!(host.pending_timers(), 0);
}

#[test]
fn timer_callbacks_are_attributed_to_their_sandbox() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(
        &sandbox,
        "setTimeout(function () { setInterval(function () { ticks = (typeof ticks === 'number' ? ticks : 0) + 1; }, 10); }, 5);",
    );
    host.advance(30);
    assert!(sandbox.get_global("ticks").is_some());
    assert!(!host.global().has(&"ticks".into()));

    sandbox.unmount();
    assert_eq!(host.pending_timers(), 0);
}

#[test]
fn cleared_and_fired_timers_leave_the_ledger() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(
        &sandbox,
        "var a = setTimeout(function () {}, 10); var b = setTimeout(function () {}, 100); clearTimeout(a);",
    );
    assert_eq!(sandbox.effect_count(), 1);
    host.advance(100);
    assert_eq!(sandbox.effect_count(), 0);
    sandbox.unmount();
}

#[test]
fn every_patcher_reverses_its_effects() {
    let host = HostEnvironment::new();
    host.run_script(
        "addEventListener('load', function () {}); history.pushState({ page: 'home' }, '', '/home');",
        "page.js",
    )
    .unwrap();
    let before = page_snapshot(&host);

    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(
        &sandbox,
        "for (var i = 0; i < 5; i += 1) { setTimeout(function () {}, 1000 + i); setInterval(function () {}, 10); } \
         for (var j = 0; j < 3; j += 1) { addEventListener('resize', function () {}); } \
         history.replaceState({ page: 'app' }, '', '/app'); \
         history.pushState({ page: 'a' }, '', '/app/a'); history.pushState({ page: 'b' }, '', '/app/b'); \
         history.replaceState({ page: 'b2' }, ''); \
         document.head.appendChild(document.createElement('style')); \
         var root = document.createElement('div'); root.appendChild(document.createElement('span')); \
         document.body.appendChild(root);",
    );
    assert_ne!(page_snapshot(&host), before);
    host.advance(25);

    sandbox.unmount();
    assert_eq!(page_snapshot(&host), before);
}

#[test]
fn externally_removed_effects_do_not_stop_unmount() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(
        &sandbox,
        "function onScroll() {} addEventListener('scroll', onScroll); \
         var el = document.createElement('div'); document.body.appendChild(el); \
         history.pushState(null, '', '/x');",
    );
    let on_scroll = sandbox.get_global("onScroll").unwrap();
    host.global().set("onScroll".into(), on_scroll).unwrap();
    host.run_script("removeEventListener('scroll', onScroll)", "page.js")
        .unwrap();
    // The page removes the element and navigates back on its own.
    let el = host.document().children(host.body()).unwrap()[0];
    host.detach(el).unwrap();
    assert!(host.history_back());

    sandbox.unmount();
    assert_eq!(sandbox.state(), SandboxState::Unmounted);
    assert_eq!(host.interceptor_count(), 0);
    assert_eq!(host.history_entries().len(), 1);
}

#[test]
fn dom_insertions_are_redirected_into_the_container() {
    let host = HostEnvironment::new();
    let container = host.create_element("section");
    host.append_child(host.body(), container).unwrap();

    let mut sandbox = create(&host, "app").with_container(container);
    sandbox.mount();
    run(
        &sandbox,
        "document.head.appendChild(document.createElement('style')); \
         var p = document.createElement('p'); p.id = 'greeting'; document.body.appendChild(p);",
    );
    assert_eq!(host.document().children(container).unwrap().len(), 2);
    assert!(host.document().children(host.head()).unwrap().is_empty());
    assert!(host.document().get_element_by_id("greeting").is_some());

    sandbox.unmount();
    assert!(host.document().children(container).unwrap().is_empty());
    assert_eq!(
        host.document().children(host.body()).unwrap().to_vec(),
        vec![container]
    );
}

#[test]
fn detached_container_skips_the_dom_patcher() {
    let host = HostEnvironment::new();
    let container = host.create_element("section");
    let mut sandbox = create(&host, "app").with_container(container);
    sandbox.mount();
    assert_eq!(sandbox.state(), SandboxState::Mounted);
    assert!(!sandbox.active_patchers().contains(&PatcherKind::DomInsertion));
    assert_eq!(sandbox.active_patchers().len(), 3);
}

#[test]
fn patcher_allow_list_limits_what_is_installed() {
    let host = HostEnvironment::new();
    let mut sandbox = Sandbox::create(
        &host,
        id("app"),
        EndowmentSet::new(),
        SandboxOptions {
            patchers: vec![PatcherKind::History, PatcherKind::Timer],
            ..SandboxOptions::default()
        },
    )
    .unwrap();
    sandbox.mount();
    assert_eq!(
        sandbox.active_patchers(),
        vec![PatcherKind::Timer, PatcherKind::History]
    );

    run(&sandbox, "addEventListener('resize', function () {});");
    sandbox.unmount();
    assert_eq!(host.listener_count("resize"), 1);
}

// ── Composition ─────────────────────────────────────────────────

#[test]
fn patchers_of_different_sandboxes_compose() {
    let host = HostEnvironment::new();
    let mut a = create(&host, "app-a");
    let mut b = create(&host, "app-b");
    a.mount();
    b.mount();

    run(&a, "setTimeout(function () {}, 100); addEventListener('resize', function () {});");
    run(&b, "setTimeout(function () { bFired = true; }, 100); addEventListener('resize', function () {});");
    assert_eq!(host.pending_timers(), 2);
    assert_eq!(host.listener_count("resize"), 2);

    a.unmount();
    assert_eq!(host.pending_timers(), 1);
    assert_eq!(host.listener_count("resize"), 1);
    assert_eq!(host.interceptor_count(), 4);

    run(&b, "setTimeout(function () {}, 500);");
    assert_eq!(b.effect_count(), 3);
    host.advance(100);
    assert!(b.get_global("bFired").is_some());

    b.unmount();
    assert_eq!(host.pending_timers(), 0);
    assert_eq!(host.total_listeners(), 0);
}

#[test]
fn host_page_effects_are_never_recorded() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    host.run_script("setTimeout(function () {}, 100); addEventListener('x', function () {});", "page.js")
        .unwrap();
    assert_eq!(sandbox.effect_count(), 0);

    sandbox.unmount();
    assert_eq!(host.pending_timers(), 1);
    assert_eq!(host.listener_count("x"), 1);
}

// ── Creation and destruction ────────────────────────────────────

#[test]
fn colliding_ids_are_a_configuration_error() {
    let host = HostEnvironment::new();
    let first = create(&host, "dup");
    let err = Sandbox::create(&host, id("dup"), EndowmentSet::new(), SandboxOptions::default())
        .unwrap_err();
    assert!(matches!(err, SandboxError::Configuration(_)));

    drop(first);
    assert!(Sandbox::create(&host, id("dup"), EndowmentSet::new(), SandboxOptions::default()).is_ok());
}

#[test]
fn destroy_is_refused_while_mounted() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(&sandbox, "setTimeout(function () {}, 100)");

    let mut sandbox = sandbox.destroy().unwrap_err();
    assert_eq!(sandbox.state(), SandboxState::Mounted);
    sandbox.unmount();
    (*sandbox).destroy().unwrap();

    assert_eq!(host.pending_timers(), 0);
    assert!(host.claim_sandbox_id(&id("app")));
}

#[test]
fn dropping_a_mounted_sandbox_reverses_its_effects() {
    let host = HostEnvironment::new();
    let mut sandbox = create(&host, "app");
    sandbox.mount();
    run(&sandbox, "setTimeout(function () {}, 100); addEventListener('x', function () {});");
    drop(sandbox);

    assert_eq!(host.pending_timers(), 0);
    assert_eq!(host.total_listeners(), 0);
    assert_eq!(host.interceptor_count(), 0);
}

#[test]
fn dropping_a_preserved_sandbox_frees_its_membrane() {
    let host = HostEnvironment::new();
    let mut sandbox = Sandbox::create(
        &host,
        id("app"),
        EndowmentSet::new(),
        SandboxOptions {
            recovery: RecoveryMode::Preserve,
            ..SandboxOptions::default()
        },
    )
    .unwrap();
    sandbox.mount();
    run(&sandbox, "function hook() {} var handlers = { onLoad: function () {} };");
    sandbox.unmount();
    assert!(!sandbox.membrane().record().is_empty());

    let membrane = std::rc::Rc::downgrade(sandbox.membrane());
    drop(sandbox);

    assert!(membrane.upgrade().is_none());
    assert!(Sandbox::create(&host, id("app"), EndowmentSet::new(), SandboxOptions::default()).is_ok());
}

// ── Manager ─────────────────────────────────────────────────────

#[test]
fn manager_routes_by_id() {
    let host = HostEnvironment::new();
    let mut manager = SandboxManager::new(&host, SandboxConfig::with_options(SandboxOptions::default()));
    manager.create(id("a"), EndowmentSet::new()).unwrap();
    manager.create(id("b"), EndowmentSet::new()).unwrap();
    assert_eq!(manager.list(), vec![&id("a"), &id("b")]);

    manager.mount(&id("a")).unwrap();
    manager.mount(&id("b")).unwrap();
    assert_eq!(manager.mounted().len(), 2);
    manager
        .run(&id("a"), &CodeUnit::new("a.js", "owner = 'a'"))
        .unwrap();
    assert!(manager.get(&id("b")).unwrap().get_global("owner").is_none());

    let err = manager.destroy(&id("a")).unwrap_err();
    assert!(matches!(err, SandboxError::State { operation: "destroy", .. }));
    manager.unmount(&id("a")).unwrap();
    manager.destroy(&id("a")).unwrap();
    assert_eq!(manager.len(), 1);

    assert!(matches!(manager.mount(&id("a")), Err(SandboxError::NotFound(_))));
    manager.unmount_all();
    assert!(manager.mounted().is_empty());
}

#[test]
fn singular_mode_keeps_one_sandbox_mounted() {
    let host = HostEnvironment::new();
    let options = SandboxOptions {
        singular: true,
        ..SandboxOptions::default()
    };
    let mut manager = SandboxManager::new(&host, SandboxConfig::with_options(options));
    manager.create(id("a"), EndowmentSet::new()).unwrap();
    manager.create(id("b"), EndowmentSet::new()).unwrap();

    manager.mount(&id("a")).unwrap();
    manager
        .run(&id("a"), &CodeUnit::new("a.js", "setTimeout(function () {}, 100)"))
        .unwrap();
    manager.mount(&id("b")).unwrap();

    assert_eq!(manager.mounted(), vec![&id("b")]);
    assert_eq!(host.pending_timers(), 0);
}
