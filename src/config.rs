use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use url::{Host, Url};

use crate::{Error, Result};

/// System-wide LDAP client configuration
pub const DEFAULT_CONFIG_PATH: &str = "/etc/openldap/ldap.conf";

const LINE_PATTERN: &str = r"^(\w+)\s+(.+)$";

const LDAPS_PORT: u16 = 636;
const LDAP_PORT: u16 = 389;

/// Directory connection parameters read from an `ldap.conf` style file
#[derive(Clone, Serialize)]
pub struct Config {
    /// URI scheme of the configured server
    pub scheme: String,
    /// Server host name or address
    pub host: String,
    /// Server port, explicit or defaulted from the scheme
    pub port: u16,
    /// DN to bind as (empty for an anonymous bind)
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub bind_password: String,
    /// Base under which accounts are searched
    pub search_base: String,
    /// Extra filter clause combined with the account match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pam_filter: Option<String>,
}

impl Config {
    /// Read the configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| Error::Config(path.to_owned(), error))?;
        Config::parse(BufReader::new(file)).map_err(|error| match error {
            Error::Io(error) => Error::Config(path.to_owned(), error),
            error => error,
        })
    }

    /// Parse `directive value` lines, ignoring anything else
    ///
    /// Lines are not required to be UTF-8; invalid sequences are replaced
    /// rather than failing the whole file.
    pub fn parse(reader: impl BufRead) -> Result<Self> {
        let pattern = Regex::new(LINE_PATTERN)?;
        let mut directives = HashMap::new();

        for line in reader.split(b'\n') {
            let line = line?;
            let line = String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(&line[..]));
            if let Some(captures) = pattern.captures(&line) {
                let value = captures[2].trim_end();
                if !value.is_empty() {
                    directives.insert(captures[1].to_lowercase(), value.to_owned());
                }
            }
        }

        Config::from_directives(directives)
    }

    fn from_directives(mut directives: HashMap<String, String>) -> Result<Self> {
        let uri = directives
            .get("uri")
            .and_then(|uris| uris.split_whitespace().next())
            .unwrap_or_default();
        let uri = Url::parse(uri)?;

        let scheme = uri.scheme().to_owned();
        let host = match uri.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(Error::MissingHost(uri.to_string())),
        };
        let port = uri.port().unwrap_or(match scheme.as_str() {
            "ldaps" => LDAPS_PORT,
            _ => LDAP_PORT,
        });

        let search_base = directives
            .remove("nss_base_passwd")
            .or_else(|| directives.remove("base"))
            .unwrap_or_default();

        Ok(Config {
            bind_dn: directives.remove("binddn").unwrap_or_default(),
            bind_password: directives.remove("bindpw").unwrap_or_default(),
            pam_filter: directives.remove("pam_filter"),
            search_base,
            scheme,
            host,
            port,
        })
    }

    /// The server URL to connect to; always over TLS
    pub fn connect_url(&self) -> String {
        if self.host.contains(':') {
            format!("ldaps://[{}]:{}", self.host, self.port)
        } else {
            format!("ldaps://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bind_dn", &self.bind_dn)
            .field("search_base", &self.search_base)
            .field("pam_filter", &self.pam_filter)
            .finish()
    }
}
