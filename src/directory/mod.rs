//! Participant directory
//!
//! Resolves which participant (and tenant) owns a party identifier. The default
//! adapter is a static table loaded from configuration.

use crate::config::ParticipantEntry;
use crate::error::{LookupError, LookupResult};
use crate::party::{PartyIdType, PartyIdentifier};

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Owning participant of a party identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub tenant_id: String,
    pub fsp_id: String,
}

/// Port for participant resolution
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// Resolve the participant owning `id_type`/`id_value`.
    ///
    /// Fails with `DirectoryResolution` if nobody owns the identifier.
    async fn resolve_participant(
        &self,
        id_type: PartyIdType,
        id_value: &str,
    ) -> LookupResult<Participant>;

    /// Number of known identifiers
    fn entry_count(&self) -> usize;
}

/// Directory backed by the `[[participants]]` configuration table
pub struct StaticDirectory {
    entries: HashMap<PartyIdentifier, Participant>,
}

impl StaticDirectory {
    pub fn from_entries(entries: &[ParticipantEntry]) -> LookupResult<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            let identifier = PartyIdentifier::parse(&entry.id_type, &entry.id_value)
                .map_err(|e| LookupError::Config(e.to_string()))?;
            map.insert(
                identifier,
                Participant {
                    tenant_id: entry.tenant_id.clone(),
                    fsp_id: entry.fsp_id.clone(),
                },
            );
        }
        Ok(Self { entries: map })
    }
}

#[async_trait]
impl ParticipantDirectory for StaticDirectory {
    async fn resolve_participant(
        &self,
        id_type: PartyIdType,
        id_value: &str,
    ) -> LookupResult<Participant> {
        let key = PartyIdentifier::new(id_type, id_value);
        match self.entries.get(&key) {
            Some(participant) => {
                debug!("Resolved {} to fsp {}", key, participant.fsp_id);
                Ok(participant.clone())
            }
            None => Err(LookupError::DirectoryResolution {
                id_type: id_type.to_string(),
                id_value: id_value.to_string(),
            }),
        }
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
