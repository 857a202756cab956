use pretty_assertions::assert_eq;
use realm_host::{
    ApiFamily, HostCall, HostEnvironment, HostError, HostReply, Interceptor, Next,
};
use realm_script::{PlainObject, Realm, ScriptError, ScriptObject, Value, run};
use realm_types::SandboxId;
use std::cell::RefCell;
use std::rc::Rc;

// ── Helpers ─────────────────────────────────────────────────────

fn global_number(host: &HostEnvironment, key: &str) -> Option<f64> {
    host.global().get(&key.into()).and_then(|v| v.as_number())
}

/// Records the family and the running sandbox for every call it sees.
struct Spy {
    family: ApiFamily,
    tag: &'static str,
    seen: Rc<RefCell<Vec<(&'static str, Option<String>)>>>,
}

impl Interceptor for Spy {
    fn family(&self) -> ApiFamily {
        self.family
    }

    fn intercept(
        &self,
        host: &HostEnvironment,
        call: HostCall,
        next: Next<'_>,
    ) -> Result<HostReply, HostError> {
        let running = host.current_sandbox().map(|id| id.to_string());
        self.seen.borrow_mut().push((self.tag, running));
        next(call)
    }
}

// ── Global object ───────────────────────────────────────────────

#[test]
fn self_references_resolve_to_the_global() {
    let host = HostEnvironment::new();
    let result = host
        .run_script("window === this && self === globalThis && window.window === window", "page.js")
        .unwrap();
    assert_eq!(result.to_display_string(), "true");
}

#[test]
fn read_only_intrinsics_refuse_writes() {
    let host = HostEnvironment::new();
    let err = host.run_script("undefined = 1", "page.js").unwrap_err();
    assert!(matches!(err, ScriptError::ReadOnlyProperty(key) if key == "undefined"));
    assert!(host.global().descriptor(&"document".into()).unwrap().is_frozen());
    assert!(!host.global().delete(&"NaN".into()).unwrap());
}

#[test]
fn overwriting_a_self_reference_sticks() {
    let host = HostEnvironment::new();
    host.run_script("self = 5;", "page.js").unwrap();
    assert_eq!(global_number(&host, "self"), Some(5.0));
    assert!(host.run_script("window === this", "page.js").unwrap().is_truthy());
}

#[test]
fn fetch_checks_its_receiver() {
    let host = HostEnvironment::new();
    let ok = host.run_script("fetch('/api').status", "page.js").unwrap();
    assert_eq!(ok.as_number(), Some(200.0));
    host.run_script("var r = window.fetch('/api');", "page.js").unwrap();

    let err = host
        .run_script("var o = { fetch: fetch }; o.fetch('/api')", "page.js")
        .unwrap_err();
    assert!(err.to_string().contains("Illegal invocation"));
}

#[test]
fn object_keys_and_console() {
    let host = HostEnvironment::new();
    let keys = host
        .run_script("Object.keys({ a: 1, b: 2 }).join('|')", "page.js")
        .unwrap();
    assert_eq!(keys.as_str(), Some("a|b"));

    host.run_script("console.log('hello', 42)", "page.js").unwrap();
    assert_eq!(host.console_lines(), vec!["hello 42".to_string()]);
}

#[test]
fn indirect_eval_always_targets_the_page() {
    let host = HostEnvironment::new();
    let global = Rc::new(PlainObject::new());
    let eval = host.global().get(&"eval".into()).unwrap();
    global.insert("eval", eval);
    let realm = Realm::new(global.clone());

    run(&realm, "var e = eval; e('pageVar = 1'); eval('localVar = 2');", "app.js").unwrap();
    assert_eq!(global_number(&host, "pageVar"), Some(1.0));
    assert!(global.get(&"localVar".into()).is_some());
    assert!(!host.global().has(&"localVar".into()));
}

// ── Timers ──────────────────────────────────────────────────────

#[test]
fn timers_fire_on_virtual_time() {
    let host = HostEnvironment::new();
    host.run_script(
        "var log = []; setTimeout(function (x) { log.push(x); }, 1000, 'late'); \
         setTimeout(function () { log.push('early'); }, 10);",
        "page.js",
    )
    .unwrap();
    assert_eq!(host.pending_timers(), 2);

    assert_eq!(host.advance(999), 1);
    assert_eq!(host.advance(1), 1);
    assert_eq!(host.now(), 1000);
    let log = host.run_script("log.join(',')", "page.js").unwrap();
    assert_eq!(log.as_str(), Some("early,late"));
}

#[test]
fn intervals_repeat_and_clear() {
    let host = HostEnvironment::new();
    host.run_script(
        "var n = 0; var id = setInterval(function () { n += 1; if (n === 3) clearInterval(id); }, 100);",
        "page.js",
    )
    .unwrap();
    host.advance(1000);
    assert_eq!(global_number(&host, "n"), Some(3.0));
    assert_eq!(host.pending_timers(), 0);
}

#[test]
fn failing_timer_callback_does_not_stop_the_clock() {
    let host = HostEnvironment::new();
    host.run_script(
        "var ok = false; setTimeout(function () { throw 'bad'; }, 1); \
         setTimeout(function () { ok = true; }, 2);",
        "page.js",
    )
    .unwrap();
    assert_eq!(host.advance(5), 2);
    assert!(host.global().get(&"ok".into()).unwrap().is_truthy());
}

// ── Events and history ──────────────────────────────────────────

#[test]
fn listeners_receive_events_until_removed() {
    let host = HostEnvironment::new();
    host.run_script(
        "var hits = 0; function onResize(e) { hits += 1; lastType = e.type; } \
         addEventListener('resize', onResize); addEventListener('resize', onResize);",
        "page.js",
    )
    .unwrap();
    assert_eq!(host.listener_count("resize"), 1);
    assert_eq!(host.dispatch_event("resize"), 1);
    host.run_script("removeEventListener('resize', onResize)", "page.js").unwrap();
    assert_eq!(host.dispatch_event("resize"), 0);
    assert_eq!(global_number(&host, "hits"), Some(1.0));
}

#[test]
fn history_push_replace_and_back() {
    let host = HostEnvironment::new();
    host.run_script(
        "var popped = null; addEventListener('popstate', function (e) { popped = e.state; }); \
         history.pushState({ page: 1 }, '', '/one'); history.pushState({ page: 2 }, '', '/two'); \
         history.replaceState({ page: 3 }, '');",
        "page.js",
    )
    .unwrap();
    let entries = host.history_entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].url, "/two");
    assert_eq!(entries[2].state.to_json(), serde_json::json!({ "page": 3 }));

    assert!(host.history_back());
    let popped = host.run_script("popped.page", "page.js").unwrap();
    assert_eq!(popped.as_number(), Some(1.0));
}

// ── Document ────────────────────────────────────────────────────

#[test]
fn script_side_document_manipulation() {
    let host = HostEnvironment::new();
    host.run_script(
        "var div = document.createElement('div'); div.id = 'app'; div.textContent = 'hi'; \
         document.body.appendChild(div);",
        "page.js",
    )
    .unwrap();
    let node = host.document().get_element_by_id("app").unwrap();
    assert_eq!(host.document().text(node).unwrap(), "hi");

    let same = host
        .run_script("document.getElementById('app') === div && div.parentNode === document.body", "page.js")
        .unwrap();
    assert!(same.is_truthy());

    host.run_script("div.remove()", "page.js").unwrap();
    assert!(!host.is_attached(node));
}

#[test]
fn append_child_rejects_non_nodes() {
    let host = HostEnvironment::new();
    let err = host.run_script("document.body.appendChild({})", "page.js").unwrap_err();
    assert!(matches!(err, ScriptError::Type(_)));
}

// ── Interceptors ────────────────────────────────────────────────

#[test]
fn interceptors_run_outermost_last_registered_and_see_attribution() {
    let host = HostEnvironment::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let first = host.add_interceptor(Rc::new(Spy {
        family: ApiFamily::Timers,
        tag: "first",
        seen: Rc::clone(&seen),
    }));
    let _second = host.add_interceptor(Rc::new(Spy {
        family: ApiFamily::Timers,
        tag: "second",
        seen: Rc::clone(&seen),
    }));

    let id = SandboxId::new("app-a").unwrap();
    host.enter_sandbox(id);
    host.run_script("setTimeout(function () {}, 5)", "page.js").unwrap();
    host.exit_sandbox();
    host.run_script("addEventListener('x', function () {})", "page.js").unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            ("second", Some("app-a".to_string())),
            ("first", Some("app-a".to_string())),
        ]
    );

    assert!(host.remove_interceptor(first));
    seen.borrow_mut().clear();
    host.run_script("setTimeout(function () {}, 5)", "page.js").unwrap();
    assert_eq!(*seen.borrow(), vec![("second", None)]);
}

#[test]
fn interceptors_can_rewrite_calls() {
    struct Redirect(realm_host::NodeId);

    impl Interceptor for Redirect {
        fn family(&self) -> ApiFamily {
            ApiFamily::DomInsertion
        }

        fn intercept(
            &self,
            _host: &HostEnvironment,
            call: HostCall,
            next: Next<'_>,
        ) -> Result<HostReply, HostError> {
            match call {
                HostCall::InsertChild { child, .. } => next(HostCall::InsertChild {
                    parent: self.0,
                    child,
                }),
                other => next(other),
            }
        }
    }

    let host = HostEnvironment::new();
    let container = host.create_element("section");
    host.append_child(host.body(), container).unwrap();
    host.add_interceptor(Rc::new(Redirect(container)));

    host.run_script("document.head.appendChild(document.createElement('style'))", "page.js")
        .unwrap();
    let children = host.document().children(container).unwrap().to_vec();
    assert_eq!(children.len(), 1);
    assert!(host.document().children(host.head()).unwrap().is_empty());
}

#[test]
fn sandbox_id_claims_detect_collisions() {
    let host = HostEnvironment::new();
    let id = SandboxId::new("dup").unwrap();
    assert!(host.claim_sandbox_id(&id));
    assert!(!host.claim_sandbox_id(&id));
    host.release_sandbox_id(&id);
    assert!(host.claim_sandbox_id(&id));
}

#[test]
fn host_values_outlive_nothing_after_drop() {
    let host = HostEnvironment::new();
    let set_timeout = host.global().get(&"setTimeout".into()).unwrap();
    let weak = host.downgrade();
    drop(host);
    assert!(weak.upgrade().is_none());

    let Value::Function(f) = set_timeout else {
        panic!("setTimeout should be a function");
    };
    let cb = Value::native("cb", |_, _| Ok(Value::Undefined));
    let err = realm_script::call_function(&f, Value::Undefined, vec![cb]).unwrap_err();
    assert!(err.to_string().contains("dropped"));
}
