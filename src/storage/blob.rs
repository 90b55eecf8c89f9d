//! Azure Blob Storage backend.
//!
//! Talks to the Blob REST API directly with a blocking `reqwest` client.
//! The document lives at `{endpoint}/{container}/{blob}`; a missing blob or
//! container reads as an empty catalog, and the container is created on the
//! first write.
//!
//! Two credential modes are supported:
//! - managed identity: a bearer token from the App Service identity endpoint
//!   or the instance metadata service;
//! - connection string: SharedKey request signing, or a SAS token when the
//!   connection string carries one instead of an account key.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::catalog::Record;
use crate::config::AzureStorageConfig;
use crate::storage::{StorageBackend, StorageError, decode_collection, encode_collection};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2021-08-06";
const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;
const CONTENT_TYPE_JSON: &str = "application/json";

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How requests to the blob service are authorized.
pub enum BlobCredential {
    /// Bearer tokens for `https://storage.azure.com/` from a managed identity.
    ManagedIdentity(ManagedIdentityTokens),
    /// SharedKey signing with the storage account key.
    SharedKey { account: String, key: Vec<u8> },
    /// A shared access signature appended to every request URL.
    Sas(String),
}

/// Parsed Azure Storage connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub protocol: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub blob_endpoint: Option<String>,
    pub sas: Option<String>,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Values may themselves contain `=`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Config` for a segment without `=`.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut parsed = Self::default();

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                StorageError::Config("malformed connection string segment".to_string())
            })?;
            let value = value.trim().to_string();

            match key.trim() {
                "AccountName" => parsed.account_name = Some(value),
                "AccountKey" => parsed.account_key = Some(value),
                "DefaultEndpointsProtocol" => parsed.protocol = Some(value),
                "EndpointSuffix" => parsed.endpoint_suffix = Some(value),
                "BlobEndpoint" => parsed.blob_endpoint = Some(value),
                "SharedAccessSignature" => {
                    parsed.sas = Some(value.trim_start_matches('?').to_string());
                }
                "UseDevelopmentStorage" if value.eq_ignore_ascii_case("true") => {
                    parsed.account_name = Some(DEV_ACCOUNT_NAME.to_string());
                    parsed.account_key = Some(DEV_ACCOUNT_KEY.to_string());
                    parsed.blob_endpoint = Some(DEV_BLOB_ENDPOINT.to_string());
                }
                _ => {}
            }
        }

        Ok(parsed)
    }

    /// The blob service endpoint, explicit or derived from the account name.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Config` if neither `BlobEndpoint` nor
    /// `AccountName` is present, or the endpoint is not a valid URL.
    pub fn endpoint(&self) -> Result<Url, StorageError> {
        let raw = match (&self.blob_endpoint, &self.account_name) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(account)) => format!(
                "{}://{account}.blob.{}",
                self.protocol.as_deref().unwrap_or("https"),
                self.endpoint_suffix.as_deref().unwrap_or("core.windows.net"),
            ),
            (None, None) => {
                return Err(StorageError::Config(
                    "connection string has neither BlobEndpoint nor AccountName".to_string(),
                ));
            }
        };

        Url::parse(&raw).map_err(|e| StorageError::Config(format!("invalid blob endpoint: {e}")))
    }

    /// The credential this connection string grants.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Config` if there is no usable key or SAS token.
    pub fn credential(&self) -> Result<BlobCredential, StorageError> {
        match (&self.account_name, &self.account_key, &self.sas) {
            (Some(account), Some(key), _) => {
                let key = BASE64.decode(key).map_err(|_| {
                    StorageError::Config("AccountKey is not valid base64".to_string())
                })?;
                Ok(BlobCredential::SharedKey {
                    account: account.clone(),
                    key,
                })
            }
            (_, _, Some(sas)) => Ok(BlobCredential::Sas(sas.clone())),
            _ => Err(StorageError::Config(
                "connection string has neither AccountKey nor SharedAccessSignature".to_string(),
            )),
        }
    }
}

/// Where managed identity tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEndpoint {
    /// App Service / Functions identity endpoint with its secret header.
    AppService { endpoint: String, header: String },
    /// Instance metadata service (VMs, container hosts).
    InstanceMetadata,
}

impl TokenEndpoint {
    /// Pick the App Service endpoint when its env vars are set, else IMDS.
    #[must_use]
    pub fn from_env() -> Self {
        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) if !endpoint.is_empty() => {
                Self::AppService { endpoint, header }
            }
            _ => Self::InstanceMetadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: String,
}

struct CachedToken {
    value: String,
    expires_on: u64,
}

/// Managed identity token source with a refresh-ahead cache.
pub struct ManagedIdentityTokens {
    endpoint: TokenEndpoint,
    cached: Mutex<Option<CachedToken>>,
}

impl ManagedIdentityTokens {
    #[must_use]
    pub fn new(endpoint: TokenEndpoint) -> Self {
        Self {
            endpoint,
            cached: Mutex::new(None),
        }
    }

    fn token(&self, client: &Client) -> Result<String, String> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| "token cache lock poisoned".to_string())?;

        let now = unix_now();
        if let Some(token) = cached.as_ref()
            && token.expires_on > now + TOKEN_REFRESH_MARGIN_SECS
        {
            return Ok(token.value.clone());
        }

        let request = match &self.endpoint {
            TokenEndpoint::AppService { endpoint, header } => client
                .get(endpoint)
                .query(&[("resource", STORAGE_RESOURCE), ("api-version", "2019-08-01")])
                .header("X-IDENTITY-HEADER", header),
            TokenEndpoint::InstanceMetadata => client
                .get(IMDS_TOKEN_URL)
                .query(&[("resource", STORAGE_RESOURCE), ("api-version", "2018-02-01")])
                .header("Metadata", "true"),
        };

        let response = request
            .send()
            .map_err(|e| format!("managed identity token request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!(
                "managed identity token request returned HTTP {}",
                response.status()
            ));
        }
        let body: TokenResponse = response
            .json()
            .map_err(|e| format!("managed identity token response invalid: {e}"))?;

        let expires_on = body.expires_on.parse().unwrap_or(now);
        let value = body.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_on,
        });
        Ok(value)
    }
}

/// Storage backend keeping the catalog in a single block blob.
pub struct BlobStorageBackend {
    client: Client,
    endpoint: Url,
    container: String,
    blob: String,
    credential: BlobCredential,
    container_ready: AtomicBool,
}

impl BlobStorageBackend {
    /// Create a backend for `container/blob` under `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Config` if the HTTP client cannot be built.
    pub fn new(
        endpoint: Url,
        container: impl Into<String>,
        blob: impl Into<String>,
        credential: BlobCredential,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Config(format!("cannot build blob http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            container: container.into(),
            blob: blob.into(),
            credential,
            container_ready: AtomicBool::new(false),
        })
    }

    /// Build the backend from the `[storage.azure]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Config` if the account name is missing under
    /// managed identity, or the connection string is missing or unusable.
    pub fn from_config(config: &AzureStorageConfig) -> Result<Self, StorageError> {
        let (endpoint, credential) = if config.use_managed_identity {
            if config.account_name.is_empty() {
                return Err(StorageError::Config(
                    "AZURE_STORAGE_ACCOUNT_NAME is required when using managed identity"
                        .to_string(),
                ));
            }
            let endpoint = Url::parse(&format!(
                "https://{}.blob.core.windows.net",
                config.account_name
            ))
            .map_err(|e| StorageError::Config(format!("invalid account name: {e}")))?;
            let tokens = ManagedIdentityTokens::new(TokenEndpoint::from_env());
            (endpoint, BlobCredential::ManagedIdentity(tokens))
        } else {
            if config.connection_string.is_empty() {
                return Err(StorageError::Config(
                    "AZURE_STORAGE_CONNECTION_STRING is required when not using managed identity"
                        .to_string(),
                ));
            }
            let parsed = ConnectionString::parse(&config.connection_string)?;
            (parsed.endpoint()?, parsed.credential()?)
        };

        Self::new(
            endpoint,
            config.container_name.clone(),
            config.blob_name.clone(),
            credential,
        )
    }

    fn container_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.container);
        }
        url.set_query(Some("restype=container"));
        url
    }

    fn blob_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.container).push(&self.blob);
        }
        url
    }

    /// Send an authorized request. Errors are plain messages; callers pick
    /// the `StorageError` variant.
    fn send(
        &self,
        method: Method,
        mut url: Url,
        body: Option<Vec<u8>>,
        extra_headers: &[(&'static str, &'static str)],
    ) -> Result<Response, String> {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut ms_headers: Vec<(&str, &str)> =
            vec![("x-ms-date", date.as_str()), ("x-ms-version", API_VERSION)];
        ms_headers.extend_from_slice(extra_headers);

        let content_length = body.as_ref().map_or(0, Vec::len);
        let content_type = if body.is_some() { CONTENT_TYPE_JSON } else { "" };

        let authorization = match &self.credential {
            BlobCredential::SharedKey { account, key } => {
                let string_to_sign = string_to_sign(
                    method.as_str(),
                    account,
                    &url,
                    &ms_headers,
                    content_length,
                    content_type,
                );
                Some(format!(
                    "SharedKey {account}:{}",
                    sign(key, &string_to_sign)?
                ))
            }
            BlobCredential::ManagedIdentity(tokens) => {
                Some(format!("Bearer {}", tokens.token(&self.client)?))
            }
            BlobCredential::Sas(sas) => {
                let query = match url.query() {
                    Some(existing) => format!("{existing}&{sas}"),
                    None => sas.clone(),
                };
                url.set_query(Some(&query));
                None
            }
        };

        let mut request = self.client.request(method, url);
        for (name, value) in &ms_headers {
            request = request.header(*name, *value);
        }
        if let Some(authorization) = authorization {
            request = request.header("Authorization", authorization);
        }
        if let Some(body) = body {
            request = request.header("Content-Type", content_type).body(body);
        }

        request.send().map_err(|e| e.to_string())
    }

    fn ensure_container(&self) -> Result<(), StorageError> {
        if self.container_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let response = self
            .send(Method::PUT, self.container_url(), Some(Vec::new()), &[])
            .map_err(|e| StorageError::Write(format!("container {}: {e}", self.container)))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::CONFLICT => {
                self.container_ready.store(true, Ordering::Release);
                Ok(())
            }
            status => Err(StorageError::Write(format!(
                "container {}: HTTP {status}",
                self.container
            ))),
        }
    }
}

impl StorageBackend for BlobStorageBackend {
    fn read(&self) -> Result<Vec<Record>, StorageError> {
        let response = self
            .send(Method::GET, self.blob_url(), None, &[])
            .map_err(|e| StorageError::Read(format!("blob {}: {e}", self.blob)))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!(blob = %self.blob, "blob not found, returning empty catalog");
                Ok(Vec::new())
            }
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .map_err(|e| StorageError::Read(format!("blob {}: {e}", self.blob)))?;
                decode_collection(&bytes, &format!("blob {}", self.blob))
            }
            status => Err(StorageError::Read(format!(
                "blob {}: HTTP {status}",
                self.blob
            ))),
        }
    }

    fn write(&self, records: &[Record]) -> Result<(), StorageError> {
        self.ensure_container()?;

        let contents = encode_collection(records)?;
        let response = self
            .send(
                Method::PUT,
                self.blob_url(),
                Some(contents),
                &[("x-ms-blob-type", "BlockBlob")],
            )
            .map_err(|e| StorageError::Write(format!("blob {}: {e}", self.blob)))?;

        if !response.status().is_success() {
            return Err(StorageError::Write(format!(
                "blob {}: HTTP {}",
                self.blob,
                response.status()
            )));
        }

        debug!(count = records.len(), blob = %self.blob, "wrote catalog blob");
        Ok(())
    }

    fn backend_tag(&self) -> &'static str {
        "azure_blob"
    }

    fn location(&self) -> String {
        format!("{}/{}", self.container, self.blob)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Build the SharedKey string-to-sign for a Blob service request.
fn string_to_sign(
    verb: &str,
    account: &str,
    url: &Url,
    ms_headers: &[(&str, &str)],
    content_length: usize,
    content_type: &str,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    let mut canonical_resource = format!("/{account}{}", url.path());
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    params.sort();
    for (name, value) in params {
        canonical_resource.push_str(&format!("\n{name}:{value}"));
    }

    // Encoding, Language, Length, MD5, Type, Date, If-Modified-Since,
    // If-Match, If-None-Match, If-Unmodified-Since, Range
    format!(
        "{verb}\n\n\n{content_length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
    )
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String, String> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| "failed to initialize hmac".to_string())?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_account_key_connection_string() {
        let parsed = ConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=a2V5PT0=;EndpointSuffix=core.windows.net",
        )
        .unwrap();

        assert_eq!(parsed.account_name.as_deref(), Some("acme"));
        assert_eq!(parsed.account_key.as_deref(), Some("a2V5PT0="));
        assert_eq!(
            parsed.endpoint().unwrap().as_str(),
            "https://acme.blob.core.windows.net/"
        );
        assert!(matches!(
            parsed.credential().unwrap(),
            BlobCredential::SharedKey { ref account, .. } if account == "acme"
        ));
    }

    #[test]
    fn parse_sas_connection_string() {
        let parsed = ConnectionString::parse(
            "BlobEndpoint=https://acme.blob.core.windows.net/;SharedAccessSignature=?sv=2021&sig=abc%3D",
        )
        .unwrap();

        assert_eq!(parsed.sas.as_deref(), Some("sv=2021&sig=abc%3D"));
        assert!(matches!(
            parsed.credential().unwrap(),
            BlobCredential::Sas(ref sas) if sas == "sv=2021&sig=abc%3D"
        ));
    }

    #[test]
    fn development_storage_uses_local_emulator() {
        let parsed = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();

        assert_eq!(parsed.account_name.as_deref(), Some(DEV_ACCOUNT_NAME));
        assert_eq!(parsed.endpoint().unwrap().as_str(), DEV_BLOB_ENDPOINT);
    }

    #[test]
    fn connection_string_without_credentials_is_rejected() {
        let parsed = ConnectionString::parse("AccountName=acme").unwrap();
        assert!(matches!(
            parsed.credential(),
            Err(StorageError::Config(_))
        ));
        assert!(ConnectionString::parse("garbage").is_err());
    }

    #[test]
    fn managed_identity_requires_account_name() {
        let config = AzureStorageConfig {
            use_managed_identity: true,
            ..AzureStorageConfig::default()
        };
        let err = BlobStorageBackend::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("AZURE_STORAGE_ACCOUNT_NAME"));
    }

    #[test]
    fn connection_string_required_without_managed_identity() {
        let err = BlobStorageBackend::from_config(&AzureStorageConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("AZURE_STORAGE_CONNECTION_STRING"));
    }

    #[test]
    fn urls_escape_blob_names() {
        let backend = BlobStorageBackend::new(
            Url::parse("https://acme.blob.core.windows.net").unwrap(),
            "data",
            "my services.json",
            BlobCredential::Sas("sig=x".to_string()),
        )
        .unwrap();

        assert_eq!(
            backend.blob_url().as_str(),
            "https://acme.blob.core.windows.net/data/my%20services.json"
        );
        assert_eq!(
            backend.container_url().as_str(),
            "https://acme.blob.core.windows.net/data?restype=container"
        );
        assert_eq!(backend.location(), "data/my services.json");
    }

    #[test]
    fn string_to_sign_layout() {
        let url = Url::parse("https://acme.blob.core.windows.net/data?restype=container").unwrap();
        let headers = [
            ("x-ms-version", API_VERSION),
            ("x-ms-date", "Mon, 01 Jan 2024 00:00:00 GMT"),
        ];

        let sts = string_to_sign("PUT", "acme", &url, &headers, 0, "");

        assert_eq!(
            sts,
            "PUT\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
             x-ms-version:2021-08-06\n\
             /acme/data\nrestype:container"
        );
    }

    #[test]
    fn string_to_sign_includes_length_and_type() {
        let url = Url::parse("https://acme.blob.core.windows.net/data/services.json").unwrap();
        let sts = string_to_sign("PUT", "acme", &url, &[], 42, CONTENT_TYPE_JSON);

        assert!(sts.starts_with("PUT\n\n\n42\n\napplication/json\n"));
        assert!(sts.ends_with("/acme/data/services.json"));
    }

    #[test]
    fn signature_is_deterministic_base64_sha256() {
        let first = sign(b"secret", "payload").unwrap();
        let second = sign(b"secret", "payload").unwrap();
        let other = sign(b"other", "payload").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(BASE64.decode(&first).unwrap().len(), 32);
    }
}
