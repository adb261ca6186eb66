/// Cached service and characteristic descriptions of a connected device

use crate::adapter::{CharacteristicProperties, DiscoveredCharacteristic, DiscoveredService, WriteType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// UUID strings are compared case-insensitively; the cache keys on upper case.
pub fn normalize_uuid(uuid: &str) -> String {
    uuid.trim().to_ascii_uppercase()
}

/// How a characteristic accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteBehavior {
    WithResponse,
    WithoutResponse,
    Unsupported,
}

impl WriteBehavior {
    /// Write type to issue, `None` when the characteristic is not writable
    pub fn write_type(&self) -> Option<WriteType> {
        match self {
            WriteBehavior::WithResponse => Some(WriteType::WithResponse),
            WriteBehavior::WithoutResponse => Some(WriteType::WithoutResponse),
            WriteBehavior::Unsupported => None,
        }
    }
}

/// A discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    pub uuid: String,
    pub service_uuid: String,
    pub properties: CharacteristicProperties,
}

impl CharacteristicInfo {
    pub fn new(service_uuid: &str, discovered: &DiscoveredCharacteristic) -> Self {
        Self {
            uuid: normalize_uuid(&discovered.uuid),
            service_uuid: normalize_uuid(service_uuid),
            properties: discovered.properties,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.properties.contains(CharacteristicProperties::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.write_behavior() != WriteBehavior::Unsupported
    }

    /// Notify or indicate
    pub fn can_notify(&self) -> bool {
        self.properties.contains(CharacteristicProperties::NOTIFY)
            || self.properties.contains(CharacteristicProperties::INDICATE)
    }

    /// Prefers write-without-response when both are offered
    pub fn write_behavior(&self) -> WriteBehavior {
        if self
            .properties
            .contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE)
        {
            WriteBehavior::WithoutResponse
        } else if self.properties.contains(CharacteristicProperties::WRITE) {
            WriteBehavior::WithResponse
        } else {
            WriteBehavior::Unsupported
        }
    }
}

/// A discovered service and the characteristics resolved for it so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub uuid: String,
    pub is_primary: bool,
    pub characteristics: BTreeMap<String, CharacteristicInfo>,
}

impl ServiceInfo {
    pub fn new(discovered: &DiscoveredService) -> Self {
        Self {
            uuid: normalize_uuid(&discovered.uuid),
            is_primary: discovered.is_primary,
            characteristics: BTreeMap::new(),
        }
    }

    pub fn characteristic(&self, uuid: &str) -> Option<&CharacteristicInfo> {
        self.characteristics.get(&normalize_uuid(uuid))
    }

    /// Copy of this service with `characteristics` merged in
    pub fn with_characteristics<'a>(
        &self,
        characteristics: impl IntoIterator<Item = &'a CharacteristicInfo>,
    ) -> Self {
        let mut updated = self.clone();
        for info in characteristics {
            updated.characteristics.insert(info.uuid.clone(), info.clone());
        }
        updated
    }
}

/// Restricts discovery to one service and, optionally, some of its
/// characteristics. An empty characteristic list means all of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub service_uuid: String,
    pub characteristic_uuids: Vec<String>,
}

impl ServiceFilter {
    pub fn new(service_uuid: impl Into<String>) -> Self {
        Self {
            service_uuid: service_uuid.into(),
            characteristic_uuids: Vec::new(),
        }
    }

    pub fn with_characteristics<I, S>(mut self, uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characteristic_uuids = uuids.into_iter().map(Into::into).collect();
        self
    }

    /// Service UUIDs to request; `None` discovers every service
    pub fn service_uuids(filters: &[ServiceFilter]) -> Option<Vec<String>> {
        if filters.is_empty() {
            return None;
        }
        Some(
            filters
                .iter()
                .map(|filter| normalize_uuid(&filter.service_uuid))
                .collect(),
        )
    }

    /// Characteristic UUIDs to request for `service`; `None` discovers all
    pub fn characteristic_uuids(filters: &[ServiceFilter], service: &str) -> Option<Vec<String>> {
        let service = normalize_uuid(service);
        filters
            .iter()
            .find(|filter| normalize_uuid(&filter.service_uuid) == service)
            .filter(|filter| !filter.characteristic_uuids.is_empty())
            .map(|filter| {
                filter
                    .characteristic_uuids
                    .iter()
                    .map(|uuid| normalize_uuid(uuid))
                    .collect()
            })
    }
}
