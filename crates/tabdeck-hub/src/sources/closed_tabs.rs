use super::{CommandSource, SourceError};
use crate::registry::RegistryHandle;
use async_trait::async_trait;
use tabdeck_core::Command;

pub struct ClosedTabSource {
    registry: RegistryHandle,
}

impl ClosedTabSource {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CommandSource for ClosedTabSource {
    fn name(&self) -> &'static str {
        "closed_tabs"
    }

    async fn load(&self) -> Result<Vec<Command>, SourceError> {
        Ok(self.registry.closed_tab_commands().await?)
    }
}
