//! Volume CRUD against the Instance API.

use reqwest::StatusCode;

use crate::driver::NewVolume;

use super::types::{
    ApiVolume, CreateVolumeBody, VOLUME_TYPE_BLOCK, VolumeEnvelope, VolumeListEnvelope, size_bytes,
};
use super::{ApiResponse, HTTP_CLIENT, ScalewayDriver, ScalewayDriverError};

const PAGE_SIZE: usize = 100;

impl ScalewayDriver {
    /// Lists project volumes, following pagination. `name` narrows the query
    /// server-side; the API matches it as a substring.
    pub(super) async fn list_api_volumes(
        &self,
        name: &str,
    ) -> Result<Vec<ApiVolume>, ScalewayDriverError> {
        let url = self.zone_url("volumes");
        let per_page = PAGE_SIZE.to_string();
        let mut volumes = Vec::new();

        for page in 1_u32.. {
            let mut query = vec![
                ("project", self.config.project().to_owned()),
                ("per_page", per_page.clone()),
                ("page", page.to_string()),
            ];
            if !name.is_empty() {
                query.push(("name", name.to_owned()));
            }

            let response =
                ApiResponse::send(self.authorised(HTTP_CLIENT.get(&url)).query(&query)).await?;
            if !response.status.is_success() {
                return Err(response.into_error("list_volumes", name));
            }
            let batch = response.parse::<VolumeListEnvelope>()?.volumes;
            let exhausted = batch.len() < PAGE_SIZE;
            volumes.extend(batch);
            if exhausted {
                break;
            }
        }

        Ok(volumes)
    }

    /// Fetches a volume by id; `None` when the API reports it missing.
    pub(super) async fn fetch_volume(
        &self,
        volume_id: &str,
    ) -> Result<Option<ApiVolume>, ScalewayDriverError> {
        let url = self.zone_url(&format!("volumes/{volume_id}"));
        let response = ApiResponse::send(self.authorised(HTTP_CLIENT.get(&url))).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(response.into_error("get_volume", volume_id));
        }
        Ok(Some(response.parse::<VolumeEnvelope>()?.volume))
    }

    /// Issues the create request. A zero size keeps the snapshot's size.
    pub(super) async fn create_api_volume(
        &self,
        request: &NewVolume,
    ) -> Result<ApiVolume, ScalewayDriverError> {
        let size = match request.size {
            0 => None,
            gib => Some(size_bytes(gib).ok_or(ScalewayDriverError::SizeOutOfRange { size: gib })?),
        };
        let body = CreateVolumeBody {
            name: request.name.clone(),
            project: self.config.project().to_owned(),
            volume_type: request
                .volume_type
                .clone()
                .unwrap_or_else(|| String::from(VOLUME_TYPE_BLOCK)),
            size,
            base_snapshot: request.snapshot_id.clone(),
        };

        let url = self.zone_url("volumes");
        let response =
            ApiResponse::send(self.authorised(HTTP_CLIENT.post(&url)).json(&body)).await?;
        if !response.status.is_success() {
            return Err(response.into_error("create_volume", &request.name));
        }
        Ok(response.parse::<VolumeEnvelope>()?.volume)
    }

    pub(super) async fn delete_api_volume(
        &self,
        volume_id: &str,
    ) -> Result<(), ScalewayDriverError> {
        let url = self.zone_url(&format!("volumes/{volume_id}"));
        let response = ApiResponse::send(self.authorised(HTTP_CLIENT.delete(&url))).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(ScalewayDriverError::VolumeNotFound {
                volume_id: volume_id.to_owned(),
                zone: self.zone().to_owned(),
            });
        }
        if !response.status.is_success() {
            return Err(response.into_error("delete_volume", volume_id));
        }
        Ok(())
    }
}
