//! Outbound address computation
//!
//! Destination URLs are derived from the party identifier at send time and
//! nothing else, so this is kept free of transport concerns.

use crate::error::{LookupError, LookupResult};
use crate::party::PartyIdentifier;

use reqwest::Url;

/// Which parties resource a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartiesResource {
    /// `GET /parties/{type}/{value}` and success `PUT`
    Party,
    /// `PUT /parties/{type}/{value}/error`
    Error,
}

/// Base address of the switch
#[derive(Debug, Clone)]
pub struct SwitchAddress {
    base: Url,
}

impl SwitchAddress {
    pub fn new(base_url: &str) -> LookupResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| LookupError::Config(format!("Invalid switch url {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(LookupError::Config(format!(
                "Switch url {} cannot carry a path",
                base_url
            )));
        }
        Ok(Self { base })
    }

    /// Address of the parties resource for `identifier`
    pub fn parties(&self, identifier: &PartyIdentifier, resource: PartiesResource) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("parties")
                .push(identifier.id_type.as_str())
                .push(&identifier.id_value);
            if resource == PartiesResource::Error {
                segments.push("error");
            }
        }
        url
    }
}
