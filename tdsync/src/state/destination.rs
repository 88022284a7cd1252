use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Opaque, backend-specific state persisted between runs for each stream.
///
/// The state lets migrations decide whether they have work to do without re-probing every
/// invariant. Each backend defines its own fields; the engine itself only reads the soft
/// reset flag and the version.
pub trait DestinationState:
    Debug + Clone + PartialEq + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Version of the layout written by this build.
    const CURRENT_VERSION: u32;

    /// Version of the layout this value was decoded from.
    fn version(&self) -> u32;

    /// Whether a migration asked for the final table to be rebuilt from the newest generation.
    fn needs_soft_reset(&self) -> bool;

    fn with_soft_reset(self, needs_soft_reset: bool) -> Self;

    /// Decodes a persisted state, falling back to the default for a missing blob.
    ///
    /// A blob written by a newer build is rejected so that an older build never silently
    /// drops flags it does not know about.
    fn decode(blob: Option<&serde_json::Value>) -> SyncResult<Self> {
        let Some(blob) = blob else {
            return Ok(Self::default());
        };

        let state: Self = serde_json::from_value(blob.clone())?;
        if state.version() > Self::CURRENT_VERSION {
            bail!(
                ErrorKind::InvalidState,
                "Destination state was written by a newer version",
                format!(
                    "state version {} is greater than supported version {}",
                    state.version(),
                    Self::CURRENT_VERSION
                )
            );
        }

        Ok(state)
    }

    fn encode(&self) -> SyncResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Smallest possible destination state, for backends that need no migration flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumDestinationState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub needs_soft_reset: bool,
}

impl DestinationState for MinimumDestinationState {
    const CURRENT_VERSION: u32 = 1;

    fn version(&self) -> u32 {
        self.version
    }

    fn needs_soft_reset(&self) -> bool {
        self.needs_soft_reset
    }

    fn with_soft_reset(self, needs_soft_reset: bool) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            needs_soft_reset,
        }
    }
}
