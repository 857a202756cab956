use async_trait::async_trait;
use pretty_assertions::assert_eq;
use realm_host::HostEnvironment;
use realm_sandbox::{
    AppFailure, AppProps, CodeUnit, EndowmentSet, LifecycleHooks, MicroApp, RecoveryMode, Sandbox,
    SandboxError, SandboxOptions,
};
use realm_script::ScriptObject;
use realm_types::{LifecyclePhase, SandboxId, SandboxState};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::oneshot;

// ── Helpers ─────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sandbox(host: &HostEnvironment, name: &str, options: SandboxOptions) -> Sandbox {
    Sandbox::create(host, SandboxId::new(name).unwrap(), EndowmentSet::new(), options).unwrap()
}

const COUNTER_APP: &str = "
var boots = 0;
var mounts = 0;
function bootstrap() { boots += 1; }
function mount(props) {
    mounts += 1;
    appName = props.name;
    detected = props.inSandbox;
    theme = props.theme;
    var root = document.createElement('div');
    root.id = 'counter-root';
    props.container.appendChild(root);
    setInterval(function () { ticks = (typeof ticks === 'number' ? ticks : 0) + 1; }, 100);
    addEventListener('resize', function () {});
}
function unmount(props) { unmounted = true; }
";

/// Rust-side hooks whose mount waits on a gate.
struct GatedApp {
    log: Rc<RefCell<Vec<&'static str>>>,
    entered: RefCell<Option<oneshot::Sender<()>>>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

#[async_trait(?Send)]
impl LifecycleHooks for GatedApp {
    async fn mount(&self, sandbox: &Sandbox, _props: &AppProps) -> Result<(), AppFailure> {
        self.log.borrow_mut().push("mount:start");
        if let Some(entered) = self.entered.borrow_mut().take() {
            let _ = entered.send(());
        }
        let gate = self.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        sandbox
            .compartment()
            .evaluate(&CodeUnit::new("late.js", "setTimeout(function () {}, 1000)"))?;
        self.log.borrow_mut().push("mount:end");
        Ok(())
    }

    async fn unmount(&self, _sandbox: &Sandbox, _props: &AppProps) -> Result<(), AppFailure> {
        self.log.borrow_mut().push("unmount");
        Ok(())
    }
}

/// Hooks that fail in the phase they are told to.
struct FailingApp(LifecyclePhase);

#[async_trait(?Send)]
impl LifecycleHooks for FailingApp {
    async fn bootstrap(&self, _sandbox: &Sandbox) -> Result<(), AppFailure> {
        if self.0 == LifecyclePhase::Bootstrap {
            return Err(anyhow::anyhow!("config service offline").into());
        }
        Ok(())
    }

    async fn mount(&self, sandbox: &Sandbox, _props: &AppProps) -> Result<(), AppFailure> {
        sandbox
            .compartment()
            .evaluate(&CodeUnit::new("mount.js", "addEventListener('x', function () {})"))?;
        if self.0 == LifecyclePhase::Mount {
            sandbox
                .compartment()
                .evaluate(&CodeUnit::new("mount.js", "null.boom"))?;
        }
        Ok(())
    }

    async fn unmount(&self, _sandbox: &Sandbox, _props: &AppProps) -> Result<(), AppFailure> {
        if self.0 == LifecyclePhase::Unmount {
            return Err(anyhow::anyhow!("flush failed").into());
        }
        Ok(())
    }
}

// ── Scripted applications ───────────────────────────────────────

#[tokio::test]
async fn scripted_app_runs_its_hooks_with_props() {
    init_tracing();
    let host = HostEnvironment::new();
    let container = host.create_element("main");
    host.append_child(host.body(), container).unwrap();

    let props = AppProps::new("counter")
        .with_container(container)
        .with_extra(serde_json::json!({ "theme": "dark" }));
    let app = MicroApp::scripted(
        sandbox(&host, "counter", SandboxOptions::default()).with_container(container),
        vec![CodeUnit::new("counter.js", COUNTER_APP)],
        props,
    );

    app.mount().await.unwrap();
    assert_eq!(app.state().await, SandboxState::Mounted);
    host.advance(250);
    app.with_sandbox(|sandbox| {
        assert_eq!(sandbox.get_global("appName").unwrap().as_str(), Some("counter"));
        assert!(sandbox.get_global("detected").unwrap().is_truthy());
        assert_eq!(sandbox.get_global("theme").unwrap().as_str(), Some("dark"));
        assert_eq!(sandbox.get_global("ticks").unwrap().as_number(), Some(2.0));
        assert_eq!(sandbox.get_global("boots").unwrap().as_number(), Some(1.0));
    })
    .await;
    assert!(host.document().get_element_by_id("counter-root").is_some());
    assert!(!host.global().has(&"appName".into()));

    app.unmount().await.unwrap();
    assert_eq!(app.state().await, SandboxState::Unmounted);
    assert_eq!(host.pending_timers(), 0);
    assert_eq!(host.total_listeners(), 0);
    assert!(host.document().get_element_by_id("counter-root").is_none());
    assert!(host.document().children(container).unwrap().is_empty());
}

#[tokio::test]
async fn fresh_remount_reloads_sources_but_bootstraps_once() {
    let host = HostEnvironment::new();
    let container = host.create_element("main");
    host.append_child(host.body(), container).unwrap();
    let app = MicroApp::scripted(
        sandbox(&host, "counter", SandboxOptions::default()),
        vec![CodeUnit::new("counter.js", COUNTER_APP)],
        AppProps::new("counter").with_container(container),
    );

    app.mount().await.unwrap();
    app.unmount().await.unwrap();
    app.mount().await.unwrap();

    app.with_sandbox(|sandbox| {
        assert_eq!(sandbox.get_global("mounts").unwrap().as_number(), Some(1.0));
        assert_eq!(sandbox.get_global("boots").unwrap().as_number(), Some(0.0));
        assert!(sandbox.get_global("unmounted").is_none());
    })
    .await;
    app.unmount().await.unwrap();
}

#[tokio::test]
async fn preserve_remount_keeps_state_and_skips_reloading() {
    let host = HostEnvironment::new();
    let container = host.create_element("main");
    host.append_child(host.body(), container).unwrap();
    let options = SandboxOptions {
        recovery: RecoveryMode::Preserve,
        ..SandboxOptions::default()
    };
    let app = MicroApp::scripted(
        sandbox(&host, "counter", options),
        vec![CodeUnit::new("counter.js", COUNTER_APP)],
        AppProps::new("counter").with_container(container),
    );

    app.mount().await.unwrap();
    app.unmount().await.unwrap();
    app.mount().await.unwrap();

    app.with_sandbox(|sandbox| {
        assert_eq!(sandbox.get_global("mounts").unwrap().as_number(), Some(2.0));
        assert_eq!(sandbox.get_global("boots").unwrap().as_number(), Some(1.0));
        assert!(sandbox.get_global("unmounted").unwrap().is_truthy());
    })
    .await;
    assert_eq!(host.total_listeners(), 1);
    app.unmount().await.unwrap();
    assert_eq!(host.total_listeners(), 0);
}

#[tokio::test]
async fn mount_and_unmount_are_idempotent() {
    let host = HostEnvironment::new();
    let app = MicroApp::scripted(
        sandbox(&host, "plain", SandboxOptions::default()),
        vec![CodeUnit::new("plain.js", "var loaded = true;")],
        AppProps::new("plain"),
    );
    app.mount().await.unwrap();
    app.mount().await.unwrap();
    assert_eq!(host.interceptor_count(), 4);

    app.unmount().await.unwrap();
    app.unmount().await.unwrap();
    assert_eq!(host.interceptor_count(), 0);
    assert_eq!(app.into_sandbox().state(), SandboxState::Unmounted);
}

// ── Ordering ────────────────────────────────────────────────────

#[tokio::test]
async fn unmount_waits_for_a_pending_mount() {
    init_tracing();
    let host = HostEnvironment::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let (entered_tx, entered_rx) = oneshot::channel();
    let (gate_tx, gate_rx) = oneshot::channel();
    let app = MicroApp::new(
        sandbox(&host, "slow", SandboxOptions::default()),
        Vec::new(),
        Box::new(GatedApp {
            log: Rc::clone(&log),
            entered: RefCell::new(Some(entered_tx)),
            gate: RefCell::new(Some(gate_rx)),
        }),
        AppProps::new("slow"),
    );

    let unmount = async {
        entered_rx.await.unwrap();
        app.unmount().await
    };
    let release = async {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        gate_tx.send(()).unwrap();
    };
    let (mounted, unmounted, ()) = tokio::join!(app.mount(), unmount, release);

    mounted.unwrap();
    unmounted.unwrap();
    assert_eq!(*log.borrow(), vec!["mount:start", "mount:end", "unmount"]);
    assert_eq!(app.state().await, SandboxState::Unmounted);
    assert_eq!(host.pending_timers(), 0);
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn failing_load_reports_the_load_phase() {
    let host = HostEnvironment::new();
    let app = MicroApp::scripted(
        sandbox(&host, "broken", SandboxOptions::default()),
        vec![CodeUnit::new("broken.js", "missingFunction();")],
        AppProps::new("broken"),
    );
    let err = app.mount().await.unwrap_err();
    assert!(matches!(
        err,
        SandboxError::ApplicationExecution { phase: LifecyclePhase::Load, ref label, .. } if label == "broken.js"
    ));
    app.unmount().await.unwrap();
}

#[tokio::test]
async fn failing_bootstrap_is_wrapped_with_its_phase() {
    let host = HostEnvironment::new();
    let app = MicroApp::new(
        sandbox(&host, "boot", SandboxOptions::default()),
        Vec::new(),
        Box::new(FailingApp(LifecyclePhase::Bootstrap)),
        AppProps::new("boot"),
    );
    let err = app.mount().await.unwrap_err();
    match err {
        SandboxError::ApplicationExecution {
            phase,
            source: AppFailure::Hook(cause),
            ..
        } => {
            assert_eq!(phase, LifecyclePhase::Bootstrap);
            assert_eq!(cause.to_string(), "config service offline");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn failed_mount_is_still_reversed_by_unmount() {
    let host = HostEnvironment::new();
    let app = MicroApp::new(
        sandbox(&host, "flaky", SandboxOptions::default()),
        Vec::new(),
        Box::new(FailingApp(LifecyclePhase::Mount)),
        AppProps::new("flaky"),
    );
    let err = app.mount().await.unwrap_err();
    assert!(matches!(
        err,
        SandboxError::ApplicationExecution { phase: LifecyclePhase::Mount, .. }
    ));
    assert_eq!(app.state().await, SandboxState::Mounted);
    assert_eq!(host.listener_count("x"), 1);

    app.unmount().await.unwrap();
    assert_eq!(host.listener_count("x"), 0);
}

#[tokio::test]
async fn failing_unmount_hook_still_unmounts() {
    let host = HostEnvironment::new();
    let app = MicroApp::new(
        sandbox(&host, "sticky", SandboxOptions::default()),
        Vec::new(),
        Box::new(FailingApp(LifecyclePhase::Unmount)),
        AppProps::new("sticky"),
    );
    app.mount().await.unwrap();
    let err = app.unmount().await.unwrap_err();
    assert!(matches!(
        err,
        SandboxError::ApplicationExecution { phase: LifecyclePhase::Unmount, .. }
    ));
    assert_eq!(app.state().await, SandboxState::Unmounted);
    assert_eq!(host.total_listeners(), 0);
}

#[test]
fn props_serialize_without_the_container() {
    let props = AppProps::new("counter").with_extra(serde_json::json!({ "theme": "dark" }));
    let json = serde_json::to_value(&props).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "name": "counter", "in_sandbox": true, "extra": { "theme": "dark" } })
    );
    let back: AppProps = serde_json::from_value(serde_json::json!({ "name": "x" })).unwrap();
    assert!(back.in_sandbox);
    assert!(back.container.is_none());
}

#[test]
fn lifecycle_futures_block_on_a_plain_runtime() {
    let host = HostEnvironment::new();
    let app = MicroApp::scripted(
        sandbox(&host, "blocking", SandboxOptions::default()),
        vec![CodeUnit::new("a.js", "setTimeout(function () {}, 10);")],
        AppProps::new("blocking"),
    );
    tokio_test::block_on(app.mount()).unwrap();
    assert_eq!(host.pending_timers(), 1);
    tokio_test::block_on(app.unmount()).unwrap();
    assert_eq!(host.pending_timers(), 0);
}
