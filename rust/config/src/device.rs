//! Accelerator selection for a training job.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One or more accelerator ids handed to a child through its device-selector
/// environment variable.
///
/// Renders as a single integer (`"1"`) or a comma-separated list (`"0,1"`),
/// which is the form CUDA expects in `CUDA_VISIBLE_DEVICES`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceSelector(Vec<u32>);

impl DeviceSelector {
    /// Select a single device.
    #[must_use]
    pub fn single(id: u32) -> Self {
        Self(vec![id])
    }

    /// Select several devices. Returns `None` for an empty list.
    #[must_use]
    pub fn many(ids: impl IntoIterator<Item = u32>) -> Option<Self> {
        let ids: Vec<u32> = ids.into_iter().collect();
        (!ids.is_empty()).then_some(Self(ids))
    }

    #[must_use]
    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    /// The id when exactly one device is selected.
    #[must_use]
    pub fn single_id(&self) -> Option<u32> {
        match self.0.as_slice() {
            [id] => Some(*id),
            _ => None,
        }
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::single(0)
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<u32>()
                    .map_err(|_| format!("invalid device id '{part}' in '{s}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::many(ids).ok_or_else(|| "empty device selector".to_string())
    }
}

impl Serialize for DeviceSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [id] => serializer.serialize_u32(*id),
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for DeviceSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accepts `1`, `"0,1"` and `[0, 1]`.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u32),
            List(Vec<u32>),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Id(id) => Ok(Self::single(id)),
            Raw::List(ids) => {
                Self::many(ids).ok_or_else(|| serde::de::Error::custom("empty device list"))
            }
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
