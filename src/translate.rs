//! HTTP translation client speaking the LibreTranslate wire contract.
//!
//! The service advertises its installed language packs under `/languages`;
//! a pair must be looked up there before the first `/translate` call, and a
//! missing pair is a distinct `PackNotFound` failure rather than a panic
//! inside an unguarded search.

use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no language pack for {source} -> {target}")]
    PackNotFound { source: String, target: String },
    #[error("translation request failed")]
    Http(#[from] reqwest::Error),
    #[error("translation service error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed translation response: {0}")]
    Malformed(String),
}

/// One installable translation capability, as advertised by the service.
#[derive(Clone, Debug, Deserialize)]
pub struct LanguagePack {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Snapshot of the service's language-pack list.
#[derive(Clone, Debug, Default)]
pub struct PackCatalog {
    packs: Vec<LanguagePack>,
}

impl PackCatalog {
    pub fn new(packs: Vec<LanguagePack>) -> Self {
        Self { packs }
    }

    pub fn fetch(client: &Client, endpoint: &str) -> Result<Self, TranslateError> {
        let url = format!("{}/languages", endpoint.trim_end_matches('/'));
        let resp = client.get(&url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TranslateError::Api {
                status: status.as_u16(),
                message: resp.text().unwrap_or_default(),
            });
        }
        let packs: Vec<LanguagePack> = resp.json()?;
        Ok(Self { packs })
    }

    /// Explicit lookup: does an installed pack cover `source -> target`?
    pub fn find(&self, source: &str, target: &str) -> Option<&LanguagePack> {
        self.packs
            .iter()
            .find(|p| p.code == source && p.targets.iter().any(|t| t == target))
    }

    pub fn require(&self, source: &str, target: &str) -> Result<&LanguagePack, TranslateError> {
        self.find(source, target)
            .ok_or_else(|| TranslateError::PackNotFound {
                source: source.to_string(),
                target: target.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpTranslator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    catalog: Option<PackCatalog>,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
            catalog: None,
        }
    }

    /// Fetch the pack list on first use, then reuse the snapshot for the
    /// rest of the run.
    fn catalog(&mut self) -> Result<&PackCatalog, TranslateError> {
        if self.catalog.is_none() {
            self.catalog = Some(PackCatalog::fetch(&self.client, &self.endpoint)?);
        }
        Ok(self.catalog.as_ref().expect("catalog just populated"))
    }

    pub fn translate(
        &mut self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        self.catalog()?.require(source, target)?;

        let url = format!("{}/translate", self.endpoint.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "q": text,
            "source": source,
            "target": target,
            "format": "text",
        });
        if let Some(key) = self.api_key.as_deref() {
            body["api_key"] = serde_json::Value::String(key.to_string());
        }

        let resp = self.client.post(&url).json(&body).send()?;
        let status = resp.status();
        let parsed: TranslateResponse = resp
            .json()
            .map_err(|e| TranslateError::Malformed(e.to_string()))?;

        if let Some(msg) = parsed.error {
            return Err(TranslateError::Api {
                status: status.as_u16(),
                message: msg,
            });
        }
        parsed
            .translated_text
            .ok_or_else(|| TranslateError::Malformed("missing translatedText".to_string()))
    }
}
