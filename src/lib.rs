use ldap3::{LdapError, LdapResult, SearchEntry};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

pub mod config;
pub mod directory;
pub mod filter;

pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use directory::{Conn, Directory};
pub use filter::user_filter;

/// Results produced by the crate
pub type Result<T> = ::std::result::Result<T, Error>;

/// Attribute holding a user's SSH public key
pub const SSH_KEY_ATTRIBUTE: &str = "sshPublicKey";

/// Find the SSH public key of `account` in the configured directory
pub fn lookup<D: Directory>(directory: &mut D, config: &Config, account: &str) -> Result<String> {
    directory.bind(&config.bind_dn, &config.bind_password)?;

    let filter = user_filter(account, config.pam_filter.as_deref());
    let entries = directory.search(&config.search_base, &filter, &[SSH_KEY_ATTRIBUTE])?;
    let key = extract_key(entries, SSH_KEY_ATTRIBUTE)?;

    if let Err(error) = directory.unbind() {
        warn!(%error, "failed to unbind from directory");
    }

    Ok(key)
}

/// Take the first value of `attr` from the single entry a search produced
pub fn extract_key(entries: Vec<SearchEntry>, attr: &str) -> Result<String> {
    let mut entries = entries.into_iter();
    let entry = entries.next().ok_or(Error::NoResults)?;
    if entries.next().is_some() {
        return Err(Error::MultipleResults);
    }

    debug!(dn = %entry.dn, "found account");
    Deconstructor(entry).take_one(attr).ok_or(Error::KeyNotFound)
}

struct Deconstructor(SearchEntry);

impl Deconstructor {
    /// Servers may answer with the attribute name in a different case
    fn take_one(&mut self, name: &str) -> Option<String> {
        let attrs = &mut self.0.attrs;
        let values = match attrs.remove(name) {
            Some(values) => values,
            None => {
                let key = attrs.keys().find(|key| key.eq_ignore_ascii_case(name))?.clone();
                attrs.remove(&key)?
            }
        };
        values.into_iter().next()
    }
}

/// Errors produced by a lookup
#[derive(Debug)]
pub enum Error {
    /// The search matched no entries
    NoResults,
    /// The search matched more than one entry
    MultipleResults,
    /// The matched entry has no SSH public key
    KeyNotFound,
    /// The bind credentials were rejected
    InvalidCredentials,
    /// The configured URI names no host
    MissingHost(String),
    /// The configuration file could not be read
    Config(PathBuf, std::io::Error),
    Url(url::ParseError),
    Ldap(LdapError),
    Pattern(regex::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;
        match self {
            NoResults => write!(f, "No user accounts match search"),
            MultipleResults => write!(f, "Search returned more than one user account"),
            KeyNotFound => write!(f, "SSH Public Key not found"),
            InvalidCredentials => write!(f, "Invalid bind credentials"),
            MissingHost(uri) => write!(f, "No host in directory URI: {}", uri),
            Config(path, error) => write!(f, "{}: {}", path.display(), error),
            Url(error) => write!(f, "Invalid directory URI: {}", error),
            Ldap(error) => write!(f, "{}", error),
            Pattern(error) => write!(f, "{}", error),
            Io(error) => write!(f, "{}", error),
            Json(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for Error {}

impl From<LdapError> for Error {
    fn from(error: LdapError) -> Self {
        match error {
            LdapError::LdapResult { result: LdapResult { rc: 49, .. } } => Error::InvalidCredentials,
            error => Error::Ldap(error),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Error::Url(error)
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Self {
        Error::Pattern(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json(error)
    }
}
