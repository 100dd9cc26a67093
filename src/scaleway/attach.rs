//! Attachment changes via the server volume map.
//!
//! The Instance API has no attach endpoint for block volumes; a server's
//! volumes are replaced wholesale with `PATCH /servers/{id}`. Index `"0"`
//! holds the boot volume and must be sent back unchanged.

use std::collections::{BTreeMap, HashMap};

use reqwest::StatusCode;

use super::types::{UpdateInstanceVolumesRequest, VolumeAttachment};
use super::{HTTP_CLIENT, ScalewayDriver, ScalewayDriverError};

const ROOT_INDEX: &str = "0";

#[derive(Copy, Clone, Debug)]
enum VolumePatchAction {
    Attach,
    Detach,
}

impl VolumePatchAction {
    const fn into_error(
        self,
        volume_id: String,
        instance_id: String,
        message: String,
    ) -> ScalewayDriverError {
        match self {
            Self::Attach => ScalewayDriverError::VolumeAttachmentFailed {
                volume_id,
                instance_id,
                message,
            },
            Self::Detach => ScalewayDriverError::VolumeDetachFailed {
                volume_id,
                instance_id,
                message,
            },
        }
    }
}

fn index_of(key: &str) -> u32 {
    key.parse().unwrap_or(u32::MAX)
}

fn entry(index: &str, volume_id: &str) -> (String, VolumeAttachment) {
    (
        index.to_owned(),
        VolumeAttachment {
            id: volume_id.to_owned(),
            boot: index == ROOT_INDEX,
        },
    )
}

/// Volume map with `volume_id` appended at the next free index. `None` when
/// the volume is already present.
pub(super) fn volume_map_with(
    current: &BTreeMap<String, String>,
    volume_id: &str,
) -> Option<HashMap<String, VolumeAttachment>> {
    if current.values().any(|id| id == volume_id) {
        return None;
    }
    let next = current
        .keys()
        .map(|key| index_of(key))
        .filter(|index| *index != u32::MAX)
        .max()
        .map_or(1, |max| max.saturating_add(1));

    let mut volumes: HashMap<String, VolumeAttachment> = current
        .iter()
        .map(|(index, id)| entry(index, id))
        .collect();
    volumes.extend([entry(&next.to_string(), volume_id)]);
    Some(volumes)
}

/// Volume map with `volume_id` removed and the remaining data volumes
/// renumbered from 1. `None` when the volume is not present.
pub(super) fn volume_map_without(
    current: &BTreeMap<String, String>,
    volume_id: &str,
) -> Option<HashMap<String, VolumeAttachment>> {
    if !current.values().any(|id| id == volume_id) {
        return None;
    }

    let mut data: Vec<(&String, &String)> = current
        .iter()
        .filter(|(index, id)| index.as_str() != ROOT_INDEX && id.as_str() != volume_id)
        .collect();
    data.sort_by_key(|(index, _)| index_of(index));

    let root = current
        .get(ROOT_INDEX)
        .filter(|id| id.as_str() != volume_id)
        .map(|id| entry(ROOT_INDEX, id));
    Some(
        root.into_iter()
            .chain(
                data.into_iter()
                    .zip(1_u32..)
                    .map(|((_, id), index)| entry(&index.to_string(), id)),
            )
            .collect(),
    )
}

impl ScalewayDriver {
    /// Current volume map of a server, index to volume id.
    async fn server_volumes(
        &self,
        instance_id: &str,
    ) -> Result<BTreeMap<String, String>, ScalewayDriverError> {
        let instance = self
            .api
            .get_instance_async(self.zone(), instance_id)
            .await
            .map_err(|err| ScalewayDriverError::instance_lookup(err, instance_id, self.zone()))?;
        Ok(instance
            .volumes
            .volumes
            .iter()
            .map(|(index, volume)| (index.clone(), volume.id.clone()))
            .collect())
    }

    pub(super) async fn attach_to_server(
        &self,
        instance_id: &str,
        volume_id: &str,
    ) -> Result<(), ScalewayDriverError> {
        let current = self.server_volumes(instance_id).await?;
        let Some(volumes) = volume_map_with(&current, volume_id) else {
            return Ok(());
        };
        self.patch_instance_volumes(
            instance_id,
            volume_id,
            &UpdateInstanceVolumesRequest { volumes },
            VolumePatchAction::Attach,
        )
        .await
    }

    pub(super) async fn detach_from_server(
        &self,
        instance_id: &str,
        volume_id: &str,
    ) -> Result<(), ScalewayDriverError> {
        let current = self.server_volumes(instance_id).await?;
        let Some(volumes) = volume_map_without(&current, volume_id) else {
            return Err(ScalewayDriverError::AttachmentNotFound {
                volume_id: volume_id.to_owned(),
                instance_id: instance_id.to_owned(),
            });
        };
        self.patch_instance_volumes(
            instance_id,
            volume_id,
            &UpdateInstanceVolumesRequest { volumes },
            VolumePatchAction::Detach,
        )
        .await
    }

    async fn patch_instance_volumes(
        &self,
        instance_id: &str,
        volume_id: &str,
        request: &UpdateInstanceVolumesRequest,
        action: VolumePatchAction,
    ) -> Result<(), ScalewayDriverError> {
        let url = self.zone_url(&format!("servers/{instance_id}"));
        let response = self
            .authorised(HTTP_CLIENT.patch(&url))
            .json(request)
            .send()
            .await
            .map_err(|err| ScalewayDriverError::provider(&err))?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ScalewayDriverError::InstanceNotFound {
                instance_id: instance_id.to_owned(),
                zone: self.zone().to_owned(),
            });
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(action.into_error(volume_id.to_owned(), instance_id.to_owned(), error_text))
    }
}
