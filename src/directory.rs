use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry};
use tracing::debug;

use crate::config::Config;
use crate::Result;

/// The operations a lookup needs from a directory server
pub trait Directory {
    /// Authenticate the session with a simple bind
    fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Search the immediate children of `base`, returning only `attrs`
    fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<SearchEntry>>;

    /// End the session
    fn unbind(&mut self) -> Result<()>;
}

/// A TLS session with an LDAP server
pub struct Conn {
    conn: LdapConn,
}

impl Conn {
    /// Connect to the configured server; the certificate is not verified
    pub fn connect(config: &Config) -> Result<Self> {
        let url = config.connect_url();
        debug!(%url, "connecting to directory");
        let settings = LdapConnSettings::new().set_no_tls_verify(true);
        let conn = LdapConn::with_settings(settings, &url)?;
        Ok(Conn { conn })
    }
}

impl Directory for Conn {
    fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.conn.simple_bind(dn, password)?.success()?;
        debug!(%dn, "bound to directory");
        Ok(())
    }

    fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<SearchEntry>> {
        let (results, _) = self.conn
            .search(base, Scope::OneLevel, filter, attrs.to_vec())?
            .success()?;
        let entries = results
            .into_iter()
            .map(SearchEntry::construct)
            .collect::<Vec<_>>();
        debug!(%base, %filter, count = entries.len(), "search complete");
        Ok(entries)
    }

    fn unbind(&mut self) -> Result<()> {
        self.conn.unbind()?;
        Ok(())
    }
}
