//! Database addressing and authentication.

use crate::command::{require, JSON_CONTENT_TYPE};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::wire::{headers, Method, Request};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::Url;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn basic_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

/// One database on a server: `http://host:port/{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    base: Url,
    name: String,
    credentials: Option<Credentials>,
}

impl Database {
    pub fn new(host: &str, port: u16, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        require(&name, "Database name")?;
        let base = Url::parse(&format!("http://{}:{}/", host, port))
            .map_err(|e| Error::Config(format!("Invalid database host {:?}: {}", host, e)))?;
        Ok(Self {
            base,
            name,
            credentials: None,
        })
    }

    /// The resource database described by `config`.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.host, config.port, config.name.clone())
            .map(|db| db.with_config_credentials(config))
    }

    /// The user database on the same server.
    pub fn users_from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.host, config.port, config.users_name.clone())
            .map(|db| db.with_config_credentials(config))
    }

    fn with_config_credentials(self, config: &DatabaseConfig) -> Self {
        match (&config.username, &config.password) {
            (Some(username), password) => self.with_credentials(
                username.clone(),
                password.clone().unwrap_or_default(),
            ),
            (None, _) => self,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// `http://host:port/{db}/{segments...}`, each segment percent-encoded.
    pub fn uri(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::protocol(format!("Base URL cannot carry a path: {}", self.base)))?
            .clear()
            .push(&self.name)
            .extend(segments);
        Ok(url)
    }

    /// Request for `segments` with JSON accepted and credentials attached.
    pub fn request(&self, method: Method, segments: &[&str]) -> Result<Request> {
        self.request_to(method, self.uri(segments)?)
    }

    /// Like [`Database::request`] for a URI that already carries a query.
    pub fn request_to(&self, method: Method, uri: Url) -> Result<Request> {
        let request = Request::new(method, uri).with_header(headers::ACCEPT, JSON_CONTENT_TYPE)?;
        self.authorize(request)
    }

    pub fn authorize(&self, request: Request) -> Result<Request> {
        match &self.credentials {
            Some(credentials) => {
                request.with_header(headers::AUTHORIZATION, credentials.basic_header())
            }
            None => Ok(request),
        }
    }
}
