use super::{GenerationClient, GenerationError, GenerationRequest};

/// Stand-in used when no credential was found at startup. Never touches the network.
pub struct OfflineClient;

#[async_trait::async_trait]
impl GenerationClient for OfflineClient {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Unconfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}
