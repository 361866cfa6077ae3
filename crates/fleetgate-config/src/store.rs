//! The config store: in-memory collections with snapshot persistence.

use crate::models::{
    DeviceConfig, DeviceConfigUpdate, DeviceFilter, DeviceGroup, DeviceGroupUpdate, DeviceTemplate,
};
use crate::snapshot::SnapshotStore;
use chrono::{DateTime, Utc};
use fleetgate_core::{DeviceCapabilities, DeviceId, DeviceStatus, Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{error, info};

const DEVICES_FILE: &str = "devices.json";
const GROUPS_FILE: &str = "groups.json";
const TEMPLATES_FILE: &str = "templates.json";

/// Owns the three durable collections: device configs, groups, templates.
///
/// All access goes through `&self` methods; each collection sits behind its
/// own `RwLock`, which serializes mutation the way the single-owner model
/// requires. Every mutating call rewrites the affected collection's snapshot;
/// a failed write is logged and memory stays authoritative.
pub struct ConfigStore {
    devices: RwLock<BTreeMap<DeviceId, DeviceConfig>>,
    groups: RwLock<BTreeMap<String, DeviceGroup>>,
    templates: RwLock<BTreeMap<String, DeviceTemplate>>,
    snapshots: SnapshotStore,
}

impl ConfigStore {
    /// Open the store, loading any existing snapshots.
    ///
    /// Persisted device statuses are normalized to `Disconnected`: connection
    /// handles are never durable, so whatever status a crash left behind is
    /// stale by definition.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let snapshots = SnapshotStore::open(dir)?;

        let device_list: Vec<DeviceConfig> = snapshots.load(DEVICES_FILE).await?;
        let group_list: Vec<DeviceGroup> = snapshots.load(GROUPS_FILE).await?;
        let template_list: Vec<DeviceTemplate> = snapshots.load(TEMPLATES_FILE).await?;

        let devices: BTreeMap<DeviceId, DeviceConfig> = device_list
            .into_iter()
            .map(|mut c| {
                c.status = DeviceStatus::Disconnected;
                (c.id.clone(), c)
            })
            .collect();
        let groups = group_list.into_iter().map(|g| (g.id.clone(), g)).collect();
        let templates = template_list
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        info!(
            devices = devices.len(),
            dir = %snapshots.dir().display(),
            "Config store loaded"
        );

        Ok(Self {
            devices: RwLock::new(devices),
            groups: RwLock::new(groups),
            templates: RwLock::new(templates),
            snapshots,
        })
    }

    async fn persist<T: Serialize>(&self, name: &str, value: &T) {
        if let Err(e) = self.snapshots.save(name, value).await {
            error!(file = name, error = %e, "Snapshot write failed; in-memory state remains authoritative");
        }
    }

    // ── Devices ──────────────────────────────────────────────────────────

    /// Register a new device.
    ///
    /// # Errors
    /// `DuplicateId` if a device with the same id exists; the existing record
    /// is left untouched.
    pub async fn create_device(&self, config: DeviceConfig) -> Result<()> {
        let snapshot = {
            let mut devices = self.devices.write().await;
            if devices.contains_key(&config.id) {
                return Err(Error::DuplicateId(config.id.to_string()));
            }
            devices.insert(config.id.clone(), config);
            devices.values().cloned().collect::<Vec<_>>()
        };
        self.persist(DEVICES_FILE, &snapshot).await;
        Ok(())
    }

    /// Merge a partial update into a device record.
    ///
    /// Returns the updated record and whether a connection-relevant address
    /// field actually changed value.
    ///
    /// # Errors
    /// `DeviceNotFound` if the id is unknown.
    pub async fn update_device(
        &self,
        id: &DeviceId,
        update: &DeviceConfigUpdate,
    ) -> Result<(DeviceConfig, bool)> {
        let (updated, address_changed, snapshot) = {
            let mut devices = self.devices.write().await;
            let config = devices
                .get_mut(id)
                .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
            let address_changed = update.apply(config);
            let updated = config.clone();
            (
                updated,
                address_changed,
                devices.values().cloned().collect::<Vec<_>>(),
            )
        };
        self.persist(DEVICES_FILE, &snapshot).await;
        Ok((updated, address_changed))
    }

    /// Remove a device, pruning its id from every group's member list in the
    /// same call.
    ///
    /// # Errors
    /// `DeviceNotFound` if the id is unknown.
    pub async fn delete_device(&self, id: &DeviceId) -> Result<()> {
        // Both write locks are held across the mutation so no reader can see
        // the device gone but the memberships still present.
        let (device_snapshot, group_snapshot) = {
            let mut devices = self.devices.write().await;
            let mut groups = self.groups.write().await;
            if devices.remove(id).is_none() {
                return Err(Error::DeviceNotFound(id.to_string()));
            }
            let mut pruned = false;
            for group in groups.values_mut() {
                let before = group.device_ids.len();
                group.device_ids.retain(|d| d != id);
                if group.device_ids.len() != before {
                    group.updated_at = Utc::now();
                    pruned = true;
                }
            }
            (
                devices.values().cloned().collect::<Vec<_>>(),
                pruned.then(|| groups.values().cloned().collect::<Vec<_>>()),
            )
        };
        self.persist(DEVICES_FILE, &device_snapshot).await;
        if let Some(group_snapshot) = group_snapshot {
            self.persist(GROUPS_FILE, &group_snapshot).await;
        }
        Ok(())
    }

    /// Fetch one device record.
    pub async fn get_device(&self, id: &DeviceId) -> Option<DeviceConfig> {
        self.devices.read().await.get(id).cloned()
    }

    /// List devices matching a filter. An empty filter lists everything.
    pub async fn list_devices(&self, filter: &DeviceFilter) -> Vec<DeviceConfig> {
        self.devices
            .read()
            .await
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    /// Record a connection-state transition for a device.
    ///
    /// This is the only mutation path the connection manager has into device
    /// records. Returns the previous status so callers can gate change
    /// events.
    ///
    /// # Errors
    /// `DeviceNotFound` if the id is unknown.
    pub async fn record_connection_state(
        &self,
        id: &DeviceId,
        status: DeviceStatus,
        last_connected: Option<DateTime<Utc>>,
        capabilities: Option<DeviceCapabilities>,
    ) -> Result<DeviceStatus> {
        let (previous, snapshot) = {
            let mut devices = self.devices.write().await;
            let config = devices
                .get_mut(id)
                .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
            let previous = config.status;
            config.status = status;
            if let Some(at) = last_connected {
                config.last_connected = Some(at);
            }
            if let Some(caps) = capabilities {
                config.capabilities = Some(caps);
            }
            config.updated_at = Utc::now();
            (previous, devices.values().cloned().collect::<Vec<_>>())
        };
        self.persist(DEVICES_FILE, &snapshot).await;
        Ok(previous)
    }

    // ── Groups ───────────────────────────────────────────────────────────

    /// Create a group.
    ///
    /// # Errors
    /// `DuplicateId` if the group id exists.
    pub async fn create_group(&self, group: DeviceGroup) -> Result<()> {
        let snapshot = {
            let mut groups = self.groups.write().await;
            if groups.contains_key(&group.id) {
                return Err(Error::DuplicateId(group.id.clone()));
            }
            groups.insert(group.id.clone(), group);
            groups.values().cloned().collect::<Vec<_>>()
        };
        self.persist(GROUPS_FILE, &snapshot).await;
        Ok(())
    }

    /// Merge a partial update into a group.
    pub async fn update_group(&self, id: &str, update: &DeviceGroupUpdate) -> Result<DeviceGroup> {
        let (updated, snapshot) = {
            let mut groups = self.groups.write().await;
            let group = groups
                .get_mut(id)
                .ok_or_else(|| Error::GroupNotFound(id.to_string()))?;
            update.apply(group);
            (group.clone(), groups.values().cloned().collect::<Vec<_>>())
        };
        self.persist(GROUPS_FILE, &snapshot).await;
        Ok(updated)
    }

    /// Delete a group.
    pub async fn delete_group(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut groups = self.groups.write().await;
            if groups.remove(id).is_none() {
                return Err(Error::GroupNotFound(id.to_string()));
            }
            groups.values().cloned().collect::<Vec<_>>()
        };
        self.persist(GROUPS_FILE, &snapshot).await;
        Ok(())
    }

    /// Fetch one group.
    pub async fn get_group(&self, id: &str) -> Option<DeviceGroup> {
        self.groups.read().await.get(id).cloned()
    }

    /// List all groups, optionally restricted to a branch.
    pub async fn list_groups(&self, branch: Option<&str>) -> Vec<DeviceGroup> {
        self.groups
            .read()
            .await
            .values()
            .filter(|g| branch.is_none() || g.branch.as_deref() == branch)
            .cloned()
            .collect()
    }

    // ── Templates ────────────────────────────────────────────────────────

    /// Create a template.
    ///
    /// # Errors
    /// `DuplicateId` if the template id exists.
    pub async fn create_template(&self, template: DeviceTemplate) -> Result<()> {
        let snapshot = {
            let mut templates = self.templates.write().await;
            if templates.contains_key(&template.id) {
                return Err(Error::DuplicateId(template.id.clone()));
            }
            templates.insert(template.id.clone(), template);
            templates.values().cloned().collect::<Vec<_>>()
        };
        self.persist(TEMPLATES_FILE, &snapshot).await;
        Ok(())
    }

    /// Delete a template.
    pub async fn delete_template(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut templates = self.templates.write().await;
            if templates.remove(id).is_none() {
                return Err(Error::TemplateNotFound(id.to_string()));
            }
            templates.values().cloned().collect::<Vec<_>>()
        };
        self.persist(TEMPLATES_FILE, &snapshot).await;
        Ok(())
    }

    /// Fetch one template.
    pub async fn get_template(&self, id: &str) -> Option<DeviceTemplate> {
        self.templates.read().await.get(id).cloned()
    }

    /// List all templates.
    pub async fn list_templates(&self) -> Vec<DeviceTemplate> {
        self.templates.read().await.values().cloned().collect()
    }

    /// Copy a template's fields onto a device record.
    ///
    /// Defaults merge into the device metadata (existing keys are
    /// overwritten), the template's declared capabilities and device type are
    /// stamped on. No live binding is created: later template edits do not
    /// ripple.
    pub async fn apply_template(
        &self,
        template_id: &str,
        device_id: &DeviceId,
    ) -> Result<DeviceConfig> {
        let template = self
            .get_template(template_id)
            .await
            .ok_or_else(|| Error::TemplateNotFound(template_id.to_string()))?;

        let (updated, snapshot) = {
            let mut devices = self.devices.write().await;
            let config = devices
                .get_mut(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
            for (key, value) in &template.defaults {
                config.metadata.insert(key.clone(), value.clone());
            }
            config.metadata.insert(
                "device_type".to_string(),
                serde_json::Value::String(template.device_type.clone()),
            );
            config.capabilities = Some(template.capabilities.clone());
            config.updated_at = Utc::now();
            (config.clone(), devices.values().cloned().collect::<Vec<_>>())
        };
        self.persist(DEVICES_FILE, &snapshot).await;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::TerminalAddress;

    async fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn device(id: &str) -> DeviceConfig {
        DeviceConfig::new(
            DeviceId::new(id).unwrap(),
            format!("Terminal {id}"),
            TerminalAddress::new("10.0.0.5", 80),
        )
        .with_branch("main")
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let (_dir, store) = store().await;
        store.create_device(device("d1")).await.unwrap();

        let fetched = store
            .get_device(&DeviceId::new("d1").unwrap())
            .await
            .unwrap();
        assert_eq!(fetched.id.as_str(), "d1");
        assert_eq!(fetched.address.host, "10.0.0.5");
        assert_eq!(fetched.branch.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_without_altering_existing() {
        let (_dir, store) = store().await;
        store.create_device(device("d1")).await.unwrap();

        let mut intruder = device("d1");
        intruder.name = "Impostor".to_string();
        let result = store.create_device(intruder).await;
        assert!(matches!(result, Err(Error::DuplicateId(_))));

        let kept = store
            .get_device(&DeviceId::new("d1").unwrap())
            .await
            .unwrap();
        assert_eq!(kept.name, "Terminal d1");
    }

    #[tokio::test]
    async fn test_update_unknown_device_fails() {
        let (_dir, store) = store().await;
        let result = store
            .update_device(
                &DeviceId::new("ghost").unwrap(),
                &DeviceConfigUpdate::default(),
            )
            .await;
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_prunes_group_membership() {
        let (_dir, store) = store().await;
        store.create_device(device("d1")).await.unwrap();
        store.create_device(device("d2")).await.unwrap();
        store
            .create_group(
                DeviceGroup::new("g1", "Main entrances")
                    .with_branch("main")
                    .with_devices(vec![
                        DeviceId::new("d1").unwrap(),
                        DeviceId::new("d2").unwrap(),
                    ]),
            )
            .await
            .unwrap();

        store
            .delete_device(&DeviceId::new("d1").unwrap())
            .await
            .unwrap();

        let group = store.get_group("g1").await.unwrap();
        assert_eq!(group.device_ids, vec![DeviceId::new("d2").unwrap()]);
    }

    #[tokio::test]
    async fn test_persist_then_reload_reproduces_devices() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ConfigStore::open(dir.path()).await.unwrap();
            store.create_device(device("d1")).await.unwrap();
            store.create_device(device("d2")).await.unwrap();
            store
                .record_connection_state(
                    &DeviceId::new("d1").unwrap(),
                    DeviceStatus::Connected,
                    Some(Utc::now()),
                    None,
                )
                .await
                .unwrap();
        }

        let reloaded = ConfigStore::open(dir.path()).await.unwrap();
        let devices = reloaded.list_devices(&DeviceFilter::default()).await;
        assert_eq!(devices.len(), 2);
        // Statuses normalize to disconnected; handles are never persisted.
        assert!(
            devices
                .iter()
                .all(|d| d.status == DeviceStatus::Disconnected)
        );
        // last_connected survives the reload.
        let d1 = reloaded
            .get_device(&DeviceId::new("d1").unwrap())
            .await
            .unwrap();
        assert!(d1.last_connected.is_some());
    }

    #[tokio::test]
    async fn test_record_connection_state_returns_previous() {
        let (_dir, store) = store().await;
        store.create_device(device("d1")).await.unwrap();
        let id = DeviceId::new("d1").unwrap();

        let previous = store
            .record_connection_state(&id, DeviceStatus::Connecting, None, None)
            .await
            .unwrap();
        assert_eq!(previous, DeviceStatus::Disconnected);

        let previous = store
            .record_connection_state(&id, DeviceStatus::Connected, Some(Utc::now()), None)
            .await
            .unwrap();
        assert_eq!(previous, DeviceStatus::Connecting);
    }

    #[tokio::test]
    async fn test_apply_template_copies_fields() {
        let (_dir, store) = store().await;
        store.create_device(device("d1")).await.unwrap();
        let mut template = DeviceTemplate::new("t1", "face-terminal");
        template
            .defaults
            .insert("volume".to_string(), serde_json::json!(7));
        template.capabilities.face = true;
        store.create_template(template).await.unwrap();

        let updated = store
            .apply_template("t1", &DeviceId::new("d1").unwrap())
            .await
            .unwrap();
        assert_eq!(updated.device_type(), Some("face-terminal"));
        assert_eq!(updated.metadata["volume"], serde_json::json!(7));
        assert!(updated.capabilities.unwrap().face);
    }

    #[tokio::test]
    async fn test_list_devices_with_filter() {
        let (_dir, store) = store().await;
        store.create_device(device("d1")).await.unwrap();
        store
            .create_device(device("d2").with_branch("annex"))
            .await
            .unwrap();

        let filter = DeviceFilter {
            branch: Some("annex".to_string()),
            ..Default::default()
        };
        let matched = store.list_devices(&filter).await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id.as_str(), "d2");
    }
}
