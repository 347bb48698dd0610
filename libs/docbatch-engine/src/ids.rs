use rand::RngCore;
use rand::rngs::OsRng;

#[derive(Debug, thiserror::Error)]
#[error("id generation failed: {0}")]
pub struct IdError(pub String);

/// Source of identifiers for records submitted without one.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<String, IdError>;
}

/// Random (v4) UUIDs drawn from the operating system's RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Result<String, IdError> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| IdError(e.to_string()))?;
        Ok(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
    }
}
