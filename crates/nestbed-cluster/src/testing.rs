//! In-memory collaborators that record every call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nestbed_core::ports::PortAllocator;
use nestbed_core::{NestbedError, Result};
use nestbed_proxy::{Proxy, ProxyConnector, ProxyControl, Toxic};
use nestbed_runtime::{ContainerRequest, ContainerRuntime, CreatedContainer};
use sqlx::postgres::PgPoolOptions;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broker::{ConnectionHandle, DatabaseConnector};
use crate::cluster::ClusterDeps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    PullImage(String),
    CreateNetwork(String),
    RemoveNetwork(String),
    CreateContainer(String),
    StartContainer(String),
    RemoveContainer(String),
}

/// Container ids are `id-<name>`, network ids are `net-<name>`.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    requests: Mutex<Vec<ContainerRequest>>,
    fail_create: Mutex<HashSet<String>>,
    fail_start: Mutex<HashSet<String>>,
    fail_remove: Mutex<HashSet<String>>,
    fail_network: AtomicBool,
    cancel_on_create: Mutex<Option<(String, CancellationToken)>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create_of(&self, name: &str) {
        self.fail_create.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_start_of(&self, id: &str) {
        self.fail_start.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_remove_of(&self, id: &str) {
        self.fail_remove.lock().unwrap().insert(id.to_string());
    }

    pub fn heal_remove_of(&self, id: &str) {
        self.fail_remove.lock().unwrap().remove(id);
    }

    /// Cancel `token` once the container called `name` has been created.
    pub fn cancel_after_create(&self, name: &str, token: CancellationToken) {
        *self.cancel_on_create.lock().unwrap() = Some((name.to_string(), token));
    }

    pub fn fail_network_create(&self) {
        self.fail_network.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn request(&self, name: &str) -> ContainerRequest {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no container request named {name}"))
    }

    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::RemoveContainer(id) | RuntimeCall::RemoveNetwork(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::StartContainer(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::CreateContainer(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        self.record(RuntimeCall::PullImage(image.to_string()));
        Ok(())
    }

    async fn create_network(&self, name: &str) -> anyhow::Result<String> {
        self.record(RuntimeCall::CreateNetwork(name.to_string()));
        if self.fail_network.load(Ordering::SeqCst) {
            anyhow::bail!("network {name} already exists");
        }
        Ok(format!("net-{name}"))
    }

    async fn remove_network(&self, id: &str) -> anyhow::Result<()> {
        self.record(RuntimeCall::RemoveNetwork(id.to_string()));
        if self.fail_remove.lock().unwrap().contains(id) {
            anyhow::bail!("network {id} has active endpoints");
        }
        Ok(())
    }

    async fn create_container(
        &self,
        request: &ContainerRequest,
    ) -> anyhow::Result<CreatedContainer> {
        self.record(RuntimeCall::CreateContainer(request.name.clone()));
        if self.fail_create.lock().unwrap().contains(&request.name) {
            anyhow::bail!("conflict: container name {} in use", request.name);
        }
        self.requests.lock().unwrap().push(request.clone());
        if let Some((name, token)) = &*self.cancel_on_create.lock().unwrap() {
            if *name == request.name {
                token.cancel();
            }
        }
        Ok(CreatedContainer {
            id: format!("id-{}", request.name),
            warnings: vec![format!("{} has no memory limit", request.name)],
        })
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        self.record(RuntimeCall::StartContainer(id.to_string()));
        if self.fail_start.lock().unwrap().contains(id) {
            anyhow::bail!("container {id} exited immediately");
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        self.record(RuntimeCall::RemoveContainer(id.to_string()));
        if self.fail_remove.lock().unwrap().contains(id) {
            anyhow::bail!("container {id} is being removed already");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Hands out 40000, 40001, ... and remembers releases.
pub struct SequentialPorts {
    next: AtomicU16,
    remaining: AtomicU32,
    released: Mutex<Vec<u16>>,
}

impl SequentialPorts {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(u32::MAX)
    }

    pub fn with_capacity(capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU16::new(40000),
            remaining: AtomicU32::new(capacity),
            released: Mutex::new(Vec::new()),
        })
    }

    pub fn released(&self) -> Vec<u16> {
        self.released.lock().unwrap().clone()
    }
}

impl PortAllocator for SequentialPorts {
    fn acquire(&self) -> Result<u16> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(NestbedError::PortAllocation("pool exhausted".to_string()));
        }
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn release(&self, port: u16) {
        self.released.lock().unwrap().push(port);
    }
}

/// Sidecar control API that accepts every route.
#[derive(Default)]
pub struct FakeProxies {
    connected: Mutex<Vec<String>>,
    proxies: Mutex<Vec<Proxy>>,
    toxics: Mutex<Vec<(String, Toxic)>>,
}

impl FakeProxies {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }

    pub fn proxies(&self) -> Vec<Proxy> {
        self.proxies.lock().unwrap().clone()
    }

    pub fn toxics(&self) -> Vec<(String, Toxic)> {
        self.toxics.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyControl for FakeProxies {
    async fn create_proxy(
        &self,
        name: &str,
        listen: &str,
        upstream: &str,
    ) -> anyhow::Result<Proxy> {
        let proxy = Proxy::new(name, listen, upstream);
        self.proxies.lock().unwrap().push(proxy.clone());
        Ok(proxy)
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<Proxy> {
        let mut proxies = self.proxies.lock().unwrap();
        let proxy = proxies
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| anyhow::anyhow!("proxy {name} not found"))?;
        proxy.enabled = enabled;
        Ok(proxy.clone())
    }

    async fn add_toxic(&self, proxy: &str, toxic: &Toxic) -> anyhow::Result<Toxic> {
        self.toxics
            .lock()
            .unwrap()
            .push((proxy.to_string(), toxic.clone()));
        Ok(toxic.clone())
    }

    async fn remove_toxic(&self, proxy: &str, toxic: &str) -> anyhow::Result<()> {
        self.toxics
            .lock()
            .unwrap()
            .retain(|(p, t)| !(p == proxy && t.name == toxic));
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.toxics.lock().unwrap().clear();
        Ok(())
    }
}

/// Connector that always returns the same shared fake.
pub struct FakeProxyConnector(pub Arc<FakeProxies>);

impl ProxyConnector for FakeProxyConnector {
    fn connect(&self, api_addr: &str) -> anyhow::Result<Arc<dyn ProxyControl>> {
        self.0.connected.lock().unwrap().push(api_addr.to_string());
        Ok(self.0.clone())
    }
}

/// Database whose liveness check fails a fixed number of times.
pub struct FlakyConnector {
    /// `None` means the check never succeeds.
    failures: Option<u32>,
    attempts: Mutex<Vec<Instant>>,
    urls: Mutex<Vec<String>>,
}

impl FlakyConnector {
    pub fn failing_times(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: Some(failures),
            attempts: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::failing_times(0)
    }

    pub fn never_ready() -> Arc<Self> {
        Arc::new(Self {
            failures: None,
            attempts: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseConnector for FlakyConnector {
    async fn open(&self, url: &str) -> anyhow::Result<ConnectionHandle> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(PgPoolOptions::new().max_connections(1).connect_lazy(url)?)
    }

    async fn ping(&self, _conn: &ConnectionHandle) -> anyhow::Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            attempts.len() as u32
        };
        match self.failures {
            Some(failures) if attempt > failures => Ok(()),
            _ => anyhow::bail!("connection refused (attempt {attempt})"),
        }
    }
}

/// A fake-backed cluster environment.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub ports: Arc<SequentialPorts>,
    pub proxies: Arc<FakeProxies>,
    pub database: Arc<FlakyConnector>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            runtime: FakeRuntime::new(),
            ports: SequentialPorts::new(),
            proxies: FakeProxies::new(),
            database: FlakyConnector::healthy(),
        }
    }

    pub fn deps(&self) -> ClusterDeps {
        ClusterDeps {
            runtime: self.runtime.clone(),
            ports: self.ports.clone(),
            proxies: Arc::new(FakeProxyConnector(self.proxies.clone())),
            database: self.database.clone(),
        }
    }
}
