use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{Error, Result};

/// Identifies this client and its host application to the chat service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
    pub ide_name: String,
    pub ide_version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "skylark".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ide_name: "terminal".into(),
            ide_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl ClientIdentity {
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("client", &self.name),
            ("client-version", &self.version),
            ("client-ide", &self.ide_name),
            ("client-ide-version", &self.ide_version),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::Config(format!("invalid value for the {name} header")))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}
