//! Device reconciliation: one device per name, one access token per device.

use tbsync_client::ApiClient;
use tbsync_core::types::ENTITY_DEVICE;
use tbsync_core::{Device, DeviceCredentials, EntityRef, ReconcileEvent, SessionToken};

use crate::error::Result;

/// Result of reconciling a single device.
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    pub device: Device,
    pub created: bool,
    /// The credential payload that was submitted.
    pub credentials: DeviceCredentials,
    pub events: Vec<ReconcileEvent>,
}

/// Ensure a device named `name` exists and authenticates with `desired_secret`.
///
/// Safe to repeat: the device is found by exact name before any create, and
/// the credential write reuses the current record's id so the platform
/// updates it in place.
pub async fn ensure_entity(
    client: &ApiClient,
    token: &SessionToken,
    name: &str,
    desired_secret: &str,
    device_type: &str,
) -> Result<DeviceOutcome> {
    let mut events = Vec::new();

    let (device, created) = match client.find_device_by_name(token, name).await? {
        Some(existing) => {
            tracing::debug!(device = %name, device_id = %existing.id, "Device exists");
            (existing, false)
        }
        None => {
            let device = client.create_device(token, name, device_type).await?;
            tracing::info!(device = %name, device_id = %device.id, "Created device");
            events.push(ReconcileEvent::DeviceCreated {
                name: name.to_string(),
                device_id: device.id.id.clone(),
            });
            (device, true)
        }
    };

    let current = client.get_device_credentials(token, &device.id).await?;
    let credentials = credentials_upsert(&device, current.as_ref(), desired_secret);
    let reused_record = credentials.id.is_some();

    client.save_device_credentials(token, &credentials).await?;
    tracing::info!(device = %name, reused_record, "Saved device credentials");
    events.push(ReconcileEvent::CredentialsSaved {
        name: name.to_string(),
        token: desired_secret.to_string(),
        reused_record,
    });

    Ok(DeviceOutcome {
        device,
        created,
        credentials,
        events,
    })
}

/// Build the access-token upsert for `device`.
///
/// When the platform already holds a credential record with an id, that id
/// and its device reference are carried forward.
pub fn credentials_upsert(
    device: &Device,
    current: Option<&DeviceCredentials>,
    secret: &str,
) -> DeviceCredentials {
    let mut payload =
        DeviceCredentials::access_token(EntityRef::new(ENTITY_DEVICE, device.id.id.clone()), secret);

    if let Some(existing) = current.filter(|c| c.id.is_some()) {
        payload.id = existing.id.clone();
        if let Some(device_id) = &existing.device_id {
            payload.device_id = Some(device_id.clone());
        }
    }
    payload
}
