//! In-memory `ContainerRuntime` for unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ContainerLabelState, ContainerRuntime, ContainerSpec, LABEL_MANAGED, LABEL_SSH_PORT,
    LABEL_WORKSPACE,
};
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub context: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
    pub spec: Option<ContainerSpec>,
}

#[derive(Debug, Default)]
struct FakeState {
    contexts: BTreeSet<String>,
    volumes: BTreeSet<(String, String)>,
    containers: BTreeMap<String, FakeContainer>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(self, context: &str) -> Self {
        self.state.lock().unwrap().contexts.insert(context.to_string());
        self
    }

    pub fn with_volume(self, context: &str, volume: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .volumes
            .insert((context.to_string(), volume.to_string()));
        self
    }

    /// Add a container with raw labels.
    pub fn with_container(
        self,
        context: &str,
        name: &str,
        labels: &[(&str, &str)],
        running: bool,
    ) -> Self {
        self.state.lock().unwrap().containers.insert(
            name.to_string(),
            FakeContainer {
                context: context.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                running,
                spec: None,
            },
        );
        self
    }

    /// Add a container managed by containai for `workspace`.
    pub fn with_owned(self, context: &str, name: &str, workspace: &str, volume: &str) -> Self {
        self.with_container(
            context,
            name,
            &[
                (LABEL_MANAGED, "true"),
                (LABEL_WORKSPACE, workspace),
                (super::LABEL_DATA_VOLUME, volume),
            ],
            false,
        )
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn has_volume(&self, context: &str, volume: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .volumes
            .contains(&(context.to_string(), volume.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change runtime state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["create", "start", "stop", "remove", "volume-create"]
                    .iter()
                    .any(|m| c.starts_with(&format!("{} ", m)))
            })
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn context_exists(&self, context: &str) -> Result<bool> {
        self.record(format!("context {}", context));
        Ok(self.state.lock().unwrap().contexts.contains(context))
    }

    async fn volume_exists(&self, context: &str, volume: &str) -> Result<bool> {
        self.record(format!("volume {}", volume));
        Ok(self.has_volume(context, volume))
    }

    async fn create_volume(&self, context: &str, volume: &str) -> Result<()> {
        self.record(format!("volume-create {}", volume));
        self.state
            .lock()
            .unwrap()
            .volumes
            .insert((context.to_string(), volume.to_string()));
        Ok(())
    }

    async fn inspect(&self, context: &str, name: &str) -> Result<ContainerLabelState> {
        self.record(format!("inspect {}", name));
        let state = self.state.lock().unwrap();
        Ok(match state.containers.get(name) {
            Some(c) if c.context == context => ContainerLabelState::from_labels(
                &c.labels,
                Some(if c.running { "running" } else { "exited" }.to_string()),
            ),
            _ => ContainerLabelState::missing(),
        })
    }

    async fn find_by_workspace(&self, context: &str, workspace: &str) -> Result<Vec<String>> {
        self.record(format!("find {}", workspace));
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| {
                c.context == context
                    && c.labels.get(LABEL_MANAGED).map(String::as_str) == Some("true")
                    && c.labels.get(LABEL_WORKSPACE).map(String::as_str) == Some(workspace)
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn ssh_port_labels(&self, context: &str) -> Result<Vec<u16>> {
        self.record("ports".to_string());
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .filter(|c| c.context == context)
            .filter_map(|c| c.labels.get(LABEL_SSH_PORT))
            .filter_map(|p| p.parse().ok())
            .collect())
    }

    async fn create(&self, context: &str, spec: &ContainerSpec) -> Result<()> {
        self.record(format!("create {}", spec.name));
        self.state.lock().unwrap().containers.insert(
            spec.name.clone(),
            FakeContainer {
                context: context.to_string(),
                labels: spec
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                running: false,
                spec: Some(spec.clone()),
            },
        );
        Ok(())
    }

    async fn start(&self, _context: &str, name: &str) -> Result<()> {
        self.record(format!("start {}", name));
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(name) {
            c.running = true;
        }
        Ok(())
    }

    async fn stop(&self, _context: &str, name: &str) -> Result<()> {
        self.record(format!("stop {}", name));
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(name) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove(&self, _context: &str, name: &str) -> Result<()> {
        self.record(format!("remove {}", name));
        self.state.lock().unwrap().containers.remove(name);
        Ok(())
    }
}
