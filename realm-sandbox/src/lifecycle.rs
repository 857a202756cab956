//! Asynchronous application lifecycle on top of a sandbox.
//!
//! A [`MicroApp`] pairs a [`Sandbox`] with the application's code units and
//! its `bootstrap` / `mount` / `unmount` hooks. The sandbox sits behind a
//! `tokio::sync::Mutex`, whose FIFO lock is the barrier that makes an
//! `unmount` wait for an in-flight `mount` to settle.

use async_trait::async_trait;
use realm_host::{HostEnvironment, NodeId};
use realm_script::{PlainObject, Value};
use realm_types::{LifecyclePhase, SandboxState};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compartment::CodeUnit;
use crate::config::RecoveryMode;
use crate::error::{AppFailure, Result};
use crate::sandbox::Sandbox;

/// Props handed to an application's `mount` and `unmount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppProps {
    pub name: String,
    #[serde(skip)]
    pub container: Option<NodeId>,
    /// Lets the application detect that it runs inside a sandbox.
    #[serde(default = "default_in_sandbox")]
    pub in_sandbox: bool,
    /// Extra host-defined props, merged into the script object.
    #[serde(default)]
    pub extra: serde_json::Value,
}

fn default_in_sandbox() -> bool {
    true
}

impl AppProps {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: None,
            in_sandbox: true,
            extra: serde_json::Value::Null,
        }
    }

    pub fn with_container(mut self, container: NodeId) -> Self {
        self.container = Some(container);
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    /// The props as a script object: `{ name, container, inSandbox, ...extra }`.
    pub fn to_script_value(&self, host: &HostEnvironment) -> Value {
        let object = PlainObject::new()
            .with("name", Value::from(self.name.as_str()))
            .with(
                "container",
                self.container
                    .map_or(Value::Null, |node| host.element_value(node)),
            )
            .with("inSandbox", Value::Bool(self.in_sandbox));
        if let Value::Object(extra) = Value::from_json(&self.extra) {
            for key in extra.keys() {
                let value = extra.get(&key).unwrap_or_default();
                object.insert(key, value);
            }
        }
        Value::object(object)
    }
}

/// The three entry points every application exposes.
#[async_trait(?Send)]
pub trait LifecycleHooks {
    /// Called once, before the first mount.
    async fn bootstrap(&self, _sandbox: &Sandbox) -> std::result::Result<(), AppFailure> {
        Ok(())
    }

    async fn mount(&self, sandbox: &Sandbox, props: &AppProps) -> std::result::Result<(), AppFailure>;

    async fn unmount(&self, sandbox: &Sandbox, props: &AppProps)
    -> std::result::Result<(), AppFailure>;
}

/// Hooks defined by the application's own scripts, as the global functions
/// `bootstrap`, `mount` and `unmount`. Missing functions are skipped.
pub struct ScriptedApp;

impl ScriptedApp {
    fn call_hook(
        sandbox: &Sandbox,
        name: &str,
        args: Vec<Value>,
    ) -> std::result::Result<(), AppFailure> {
        match sandbox.get_global(name) {
            Some(Value::Function(hook)) => {
                debug!(sandbox_id = %sandbox.id(), hook = name, "calling script hook");
                sandbox.call(&hook, args)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl LifecycleHooks for ScriptedApp {
    async fn bootstrap(&self, sandbox: &Sandbox) -> std::result::Result<(), AppFailure> {
        Self::call_hook(sandbox, "bootstrap", Vec::new())
    }

    async fn mount(&self, sandbox: &Sandbox, props: &AppProps) -> std::result::Result<(), AppFailure> {
        let props = props.to_script_value(sandbox.host());
        Self::call_hook(sandbox, "mount", vec![props])
    }

    async fn unmount(
        &self,
        sandbox: &Sandbox,
        props: &AppProps,
    ) -> std::result::Result<(), AppFailure> {
        let props = props.to_script_value(sandbox.host());
        Self::call_hook(sandbox, "unmount", vec![props])
    }
}

/// One micro-application: sandbox, sources and hooks.
pub struct MicroApp {
    name: String,
    sandbox: Mutex<Sandbox>,
    sources: Vec<CodeUnit>,
    hooks: Box<dyn LifecycleHooks>,
    props: AppProps,
    loaded: Cell<bool>,
    bootstrapped: Cell<bool>,
}

impl MicroApp {
    pub fn new(
        sandbox: Sandbox,
        sources: Vec<CodeUnit>,
        hooks: Box<dyn LifecycleHooks>,
        props: AppProps,
    ) -> Self {
        Self {
            name: props.name.clone(),
            sandbox: Mutex::new(sandbox),
            sources,
            hooks,
            props,
            loaded: Cell::new(false),
            bootstrapped: Cell::new(false),
        }
    }

    /// An application whose hooks live in its own scripts.
    pub fn scripted(sandbox: Sandbox, sources: Vec<CodeUnit>, props: AppProps) -> Self {
        Self::new(sandbox, sources, Box::new(ScriptedApp), props)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn props(&self) -> &AppProps {
        &self.props
    }

    /// Mounts the sandbox, loads sources, bootstraps once, then runs the mount hook.
    ///
    /// Sources run on the first mount and again on every mount in fresh
    /// recovery mode, since the record they populated is gone. A failing
    /// hook leaves the sandbox mounted so a following `unmount` reverses
    /// whatever the application managed to do.
    pub async fn mount(&self) -> Result<()> {
        let mut sandbox = self.sandbox.lock().await;
        if sandbox.state().is_mounted() {
            debug!(app = %self.name, "mount ignored, already mounted");
            return Ok(());
        }
        sandbox.mount();

        let fresh = sandbox.options().recovery == RecoveryMode::Fresh;
        if !self.loaded.get() || fresh {
            for unit in &self.sources {
                sandbox.evaluate(unit, LifecyclePhase::Load)?;
            }
            self.loaded.set(true);
        }

        if !self.bootstrapped.get() {
            self.hooks
                .bootstrap(&sandbox)
                .await
                .map_err(|f| sandbox.application_error(LifecyclePhase::Bootstrap, &self.name, f))?;
            self.bootstrapped.set(true);
        }

        self.hooks
            .mount(&sandbox, &self.props)
            .await
            .map_err(|f| sandbox.application_error(LifecyclePhase::Mount, &self.name, f))?;
        info!(app = %self.name, sandbox_id = %sandbox.id(), "App mounted");
        Ok(())
    }

    /// Runs the unmount hook, then unmounts the sandbox.
    ///
    /// Waits for any in-flight `mount` first. The sandbox is unmounted even
    /// when the hook fails; the hook's error is returned afterwards.
    pub async fn unmount(&self) -> Result<()> {
        let mut sandbox = self.sandbox.lock().await;
        if !sandbox.state().is_mounted() {
            debug!(app = %self.name, "unmount ignored, not mounted");
            return Ok(());
        }

        let hook = self.hooks.unmount(&sandbox, &self.props).await;
        sandbox.unmount();
        info!(app = %self.name, sandbox_id = %sandbox.id(), "App unmounted");

        hook.map_err(|f| {
            let err = sandbox.application_error(LifecyclePhase::Unmount, &self.name, f);
            warn!(app = %self.name, "unmount hook failed: {}", err);
            err
        })
    }

    pub async fn state(&self) -> SandboxState {
        self.sandbox.lock().await.state()
    }

    /// Runs `f` against the sandbox once no lifecycle call holds it.
    pub async fn with_sandbox<R>(&self, f: impl FnOnce(&Sandbox) -> R) -> R {
        let sandbox = self.sandbox.lock().await;
        f(&sandbox)
    }

    /// Takes the sandbox back, e.g. to destroy it.
    pub fn into_sandbox(self) -> Sandbox {
        self.sandbox.into_inner()
    }
}
