//! Generic create/read/update/delete flow
//!
//! Works on any [`ResourceKind`]: issues the mutating call, waits for the
//! operation to settle when the kind declares a wait, then reads the
//! resource back into its record.

use super::mapper::diff_changed;
use super::{ApiCall, Phase, ResourceData, ResourceKind, Timeouts};
use crate::cloud::client::{CloudClient, ServiceClient};
use crate::cloud::error::ApiError;
use crate::waiter::{AsyncOperationPoller, StatusSnapshot, WaitError, WaitRules};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives resource kinds against one cloud session
#[derive(Debug, Clone)]
pub struct Lifecycle {
    client: CloudClient,
    timeouts: Option<Timeouts>,
    cancel: Option<CancellationToken>,
}

fn wait_context(phase: Phase, kind: &dyn ResourceKind, data: &ResourceData) -> String {
    format!(
        "error waiting for the {} operation of {} ({}) to complete",
        phase,
        kind.type_name(),
        data.id.as_deref().unwrap_or("-")
    )
}

impl Lifecycle {
    pub fn new(client: CloudClient) -> Self {
        Self {
            client,
            timeouts: None,
            cancel: None,
        }
    }

    /// Override every kind's default timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn timeout(&self, kind: &dyn ResourceKind, phase: Phase) -> Duration {
        self.timeouts
            .unwrap_or_else(|| kind.default_timeouts())
            .for_phase(phase)
    }

    async fn service_client(
        &self,
        kind: &dyn ResourceKind,
        data: &ResourceData,
    ) -> Result<ServiceClient> {
        self.client
            .service_client(kind.service(), data.region())
            .await
            .with_context(|| format!("error creating {} client", kind.service()))
    }

    /// Create the resource and return its refreshed record
    pub async fn create(
        &self,
        kind: &dyn ResourceKind,
        desired: ResourceData,
    ) -> Result<ResourceData> {
        let mut data = desired;
        data.resource_type = kind.type_name().to_string();
        data.id = None;

        if kind.accepts_enterprise_project() && data.get_str("enterprise_project_id").is_none() {
            if let Some(eps) = self.client.enterprise_project_id.as_deref() {
                data.set("enterprise_project_id", json!(eps));
            }
        }

        let client = self.service_client(kind, &data).await?;
        let timeout = self.timeout(kind, Phase::Create);

        let id = kind
            .create(&client, &data)
            .await
            .with_context(|| format!("error creating {}", kind.type_name()))?;
        tracing::info!(resource_type = kind.type_name(), id = %id, "Created resource");
        data.id = Some(id);

        if let Some(rules) = kind.create_wait(&data) {
            self.wait(kind, &client, &data, &rules, timeout)
                .await
                .with_context(|| wait_context(Phase::Create, kind, &data))?;
        }

        for call in kind.post_create_calls(&client, &data)? {
            self.run_call(kind, &client, &data, &call, Phase::Create, timeout)
                .await?;
        }

        let id = data.id.clone().unwrap_or_default();
        self.refresh(kind, &client, data)
            .await?
            .ok_or_else(|| anyhow!("{} ({}) disappeared after creation", kind.type_name(), id))
    }

    /// Read the resource; `None` when it no longer exists
    pub async fn read(
        &self,
        kind: &dyn ResourceKind,
        data: ResourceData,
    ) -> Result<Option<ResourceData>> {
        data.require_id()?;
        let client = self.service_client(kind, &data).await?;
        self.refresh(kind, &client, data).await
    }

    /// Move `current` to `desired` and return the refreshed record
    pub async fn update(
        &self,
        kind: &dyn ResourceKind,
        current: &ResourceData,
        desired: ResourceData,
    ) -> Result<ResourceData> {
        let id = current.require_id()?.to_string();
        let changed = diff_changed(&current.attributes, &desired.attributes);

        let mut data = current.clone();
        // Attributes dropped from the desired record are cleared
        data.attributes
            .retain(|name, _| !changed.contains(name) || desired.attributes.contains_key(name));
        for (name, value) in desired.attributes {
            data.set(&name, value);
        }

        let client = self.service_client(kind, &data).await?;
        let calls = kind.update_calls(&client, &data, &changed)?;
        if calls.is_empty() {
            tracing::debug!(resource_type = kind.type_name(), id = %id, "Nothing to update");
        }

        let timeout = self.timeout(kind, Phase::Update);
        for call in &calls {
            self.run_call(kind, &client, &data, call, Phase::Update, timeout)
                .await?;
        }

        self.refresh(kind, &client, data)
            .await?
            .ok_or_else(|| anyhow!("{} ({}) disappeared during update", kind.type_name(), id))
    }

    /// Delete the resource; a resource that is already gone counts as deleted
    pub async fn delete(&self, kind: &dyn ResourceKind, data: &ResourceData) -> Result<()> {
        let id = data.require_id()?;
        let client = self.service_client(kind, data).await?;

        match kind.delete(&client, data).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(resource_type = kind.type_name(), id = %id, "Resource already deleted");
                return Ok(());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("error deleting {} ({})", kind.type_name(), id)));
            }
        }

        if let Some(rules) = kind.delete_wait(data) {
            let timeout = self.timeout(kind, Phase::Delete);
            self.wait(kind, &client, data, &rules, timeout)
                .await
                .with_context(|| wait_context(Phase::Delete, kind, data))?;
        }

        tracing::info!(resource_type = kind.type_name(), id = %id, "Deleted resource");
        Ok(())
    }

    async fn refresh(
        &self,
        kind: &dyn ResourceKind,
        client: &ServiceClient,
        mut data: ResourceData,
    ) -> Result<Option<ResourceData>> {
        let id = data.id.clone().unwrap_or_default();

        let payload = match kind.get(client, &data).await {
            Ok(payload) => payload,
            Err(e) if e.is_not_found() => {
                tracing::warn!(resource_type = kind.type_name(), id = %id, "Resource not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("error retrieving {} ({})", kind.type_name(), id)));
            }
        };

        data.attributes = kind.flatten(&data, &payload);
        kind.read_extras(client, &mut data)
            .await
            .with_context(|| format!("error retrieving {} ({})", kind.type_name(), id))?;

        Ok(Some(data))
    }

    async fn run_call(
        &self,
        kind: &dyn ResourceKind,
        client: &ServiceClient,
        data: &ResourceData,
        call: &ApiCall,
        phase: Phase,
        timeout: Duration,
    ) -> Result<()> {
        let id = data.id.as_deref().unwrap_or("-");
        tracing::info!(resource_type = kind.type_name(), id = %id, "Running: {}", call.description);

        client
            .request(call.method.clone(), &call.path, call.body.as_ref(), &call.ok_codes)
            .await
            .with_context(|| {
                format!("error running '{}' for {} ({})", call.description, kind.type_name(), id)
            })?;

        if let Some(rules) = &call.wait {
            self.wait(kind, client, data, rules, timeout)
                .await
                .with_context(|| wait_context(phase, kind, data))?;
        }

        Ok(())
    }

    async fn wait(
        &self,
        kind: &dyn ResourceKind,
        client: &ServiceClient,
        data: &ResourceData,
        rules: &WaitRules,
        timeout: Duration,
    ) -> Result<Option<Value>, WaitError> {
        let id = data.id.as_deref().unwrap_or_default();
        let handle = rules
            .handle(kind.type_name(), id)
            .with_parents(kind.parent_ids(data));

        let mut poller = AsyncOperationPoller::new(rules.poll_config(timeout))?;
        if let Some(token) = &self.cancel {
            poller = poller.with_cancellation(token.clone());
        }

        poller
            .poll_until_settled(&handle, move || async move {
                let payload = kind.get(client, data).await?;
                let status = kind.status_of(&payload)?;
                Ok::<_, ApiError>(StatusSnapshot::new(payload, status))
            })
            .await
    }
}
