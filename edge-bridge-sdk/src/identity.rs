use crate::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// Stable key of one logical device or module session.
///
/// Rendered as `device` or `device/module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    device_id: String,
    module_id: Option<String>,
}

impl Identity {
    /// Identity of a device session
    pub fn device(device_id: impl Into<String>) -> CloudResult<Self> {
        let device_id = device_id.into();
        validate_component(&device_id, "device id")?;
        Ok(Self {
            device_id,
            module_id: None,
        })
    }

    /// Identity of a module session hosted by `device_id`
    pub fn module(device_id: impl Into<String>, module_id: impl Into<String>) -> CloudResult<Self> {
        let device_id = device_id.into();
        let module_id = module_id.into();
        validate_component(&device_id, "device id")?;
        validate_component(&module_id, "module id")?;
        Ok(Self {
            device_id,
            module_id: Some(module_id),
        })
    }

    #[inline]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[inline]
    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    #[inline]
    pub fn is_module(&self) -> bool {
        self.module_id.is_some()
    }
}

fn validate_component(value: &str, what: &str) -> CloudResult<()> {
    if value.trim().is_empty() {
        return Err(CloudError::InvalidIdentity {
            value: value.to_string(),
            reason: format!("{what} must not be empty"),
        });
    }
    if value.contains('/') {
        return Err(CloudError::InvalidIdentity {
            value: value.to_string(),
            reason: format!("{what} must not contain '/'"),
        });
    }
    Ok(())
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.module_id {
            Some(module_id) => write!(f, "{}/{}", self.device_id, module_id),
            None => f.write_str(&self.device_id),
        }
    }
}

impl FromStr for Identity {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((device_id, module_id)) => Identity::module(device_id, module_id),
            None => Identity::device(s),
        }
    }
}

impl TryFrom<String> for Identity {
    type Error = CloudError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}
