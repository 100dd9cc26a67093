//! Local instance discovery.

use std::time::Duration;

use tracing::debug;

use super::types::MetadataResponse;
use super::{HTTP_CLIENT, ScalewayDriver, ScalewayDriverError};

const METADATA_URL: &str = "http://169.254.42.42/conf?format=json";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

impl ScalewayDriver {
    /// Returns the configured instance id, falling back to the metadata
    /// service reachable from Scaleway instances.
    pub(super) async fn discover_instance_id(&self) -> Result<String, ScalewayDriverError> {
        if let Some(configured) = self
            .config
            .instance_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return Ok(configured.to_owned());
        }

        let response = HTTP_CLIENT
            .get(METADATA_URL)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|err| ScalewayDriverError::Metadata(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ScalewayDriverError::Metadata(format!(
                "metadata service returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let metadata: MetadataResponse = response
            .json()
            .await
            .map_err(|err| ScalewayDriverError::Metadata(err.to_string()))?;
        debug!(instance_id = %metadata.id, "discovered local instance");
        Ok(metadata.id)
    }
}
