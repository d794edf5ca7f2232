use structopt::StructOpt;
use structopt::clap::ErrorKind;
use std::env;
use std::ffi::OsString;
use std::io::{stderr, stdout, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use ssh_ldap_publickey::*;

/// Print the SSH public key stored for an account in LDAP
#[derive(StructOpt)]
#[structopt(name = "ssh-ldap-publickey")]
struct Args {
    /// Print errors rather than failing silently
    #[structopt(long)]
    verbose: bool,
    /// LDAP client configuration file
    #[structopt(long, default_value = DEFAULT_CONFIG_PATH, parse(from_os_str))]
    config: PathBuf,
    /// Account name to look up
    user: String,
}

/// Options that may also be spelt with a single dash
const LONG_FLAGS: &[&str] = &["verbose", "config"];

/// Options whose value may be the following argument
const VALUE_FLAGS: &[&str] = &["config"];

fn main() {
    let args = match Args::from_iter_safe(normalize_args(env::args_os())) {
        Ok(args) => args,
        Err(error) if matches!(error.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed) => {
            error.exit()
        }
        Err(_) => usage(),
    };

    let user = args.user.trim();
    if user.is_empty() {
        usage();
    }

    tracing_subscriber::fmt()
        .with_writer(stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::OFF.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(error) = run(&args.config, user) {
        report(&error, args.verbose, &mut stderr());
        exit(1);
    }
}

fn run(config: &Path, user: &str) -> Result<()> {
    let config = Config::load(config)?;
    let summary = serde_json::to_string(&config)?;
    debug!(config = %summary, "loaded configuration");

    let mut conn = Conn::connect(&config)?;
    print_key(&mut conn, &config, user, &mut stdout().lock())
}

fn print_key<D: Directory>(directory: &mut D, config: &Config, user: &str, out: &mut impl Write) -> Result<()> {
    let key = lookup(directory, config, user)?;
    writeln!(out, "{}", key)?;
    Ok(())
}

/// Failures are only described when asked to be verbose
fn report(error: &Error, verbose: bool, out: &mut impl Write) {
    if verbose {
        let _ = writeln!(out, "{}", error);
    }
}

fn usage() -> ! {
    println!("Must provide user account name.");
    println!();
    println!("Usage: ssh-ldap-publickey [-verbose] [-config <file>] user");
    exit(1);
}

/// Rewrite `-verbose` style options into the `--verbose` form clap expects.
///
/// Option parsing stops at the first positional argument, so anything after
/// the account name is taken as another account name.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut args = args.into_iter();
    let mut normalized = args.next().into_iter().collect::<Vec<_>>();
    let mut expects_value = false;

    while let Some(arg) = args.next() {
        if expects_value {
            expects_value = false;
            normalized.push(arg);
            continue;
        }

        let option = arg
            .to_str()
            .filter(|text| text.len() > 1 && text.starts_with('-'))
            .map(|text| text.trim_start_matches('-').to_owned());
        let option = match option {
            Some(option) if option.is_empty() => {
                normalized.push(arg);
                break;
            }
            Some(option) => option,
            None => {
                normalized.push(OsString::from("--"));
                normalized.push(arg);
                break;
            }
        };

        let mut parts = option.splitn(2, '=');
        let name = parts.next().unwrap_or_default();
        if LONG_FLAGS.contains(&name) {
            expects_value = parts.next().is_none() && VALUE_FLAGS.contains(&name);
            normalized.push(OsString::from(format!("--{}", option)));
        } else {
            normalized.push(arg);
        }
    }

    normalized.extend(args);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::SearchEntry;
    use std::collections::HashMap;

    fn normalize(args: &[&str]) -> Vec<OsString> {
        normalize_args(args.iter().map(OsString::from))
    }

    fn parse(args: &[&str]) -> std::result::Result<Args, structopt::clap::Error> {
        Args::from_iter_safe(normalize(args))
    }

    #[test]
    fn single_dash_long_flags_are_doubled() {
        assert_eq!(
            normalize(&["prog", "-verbose", "-config=/tmp/ldap.conf", "alice"]),
            vec!["prog", "--verbose", "--config=/tmp/ldap.conf", "--", "alice"]
        );
        assert_eq!(
            normalize(&["prog", "-config", "/tmp/ldap.conf", "--verbose", "alice"]),
            vec!["prog", "--config", "/tmp/ldap.conf", "--verbose", "--", "alice"]
        );
    }

    #[test]
    fn options_end_at_the_account_name() {
        assert_eq!(
            normalize(&["prog", "alice", "-verbose"]),
            vec!["prog", "--", "alice", "-verbose"]
        );
        assert!(parse(&["prog", "alice", "-verbose"]).is_err());
        assert!(parse(&["prog", "alice", "--verbose"]).is_err());
    }

    #[test]
    fn other_arguments_are_untouched() {
        assert_eq!(normalize(&["prog", "-h"]), vec!["prog", "-h"]);
        assert_eq!(normalize(&["prog", "--", "-verbose"]), vec!["prog", "--", "-verbose"]);
    }

    #[test]
    fn short_flags_are_not_accepted() {
        assert!(parse(&["prog", "-v", "alice"]).is_err());
        assert!(parse(&["prog", "-c", "/tmp/ldap.conf", "alice"]).is_err());
    }

    #[test]
    fn one_account_is_required() {
        assert!(parse(&["prog"]).is_err());
        assert!(parse(&["prog", "alice", "bob"]).is_err());

        let args = parse(&["prog", "-verbose", "alice"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.user, "alice");
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));

        let args = parse(&["prog", "-config", "/tmp/ldap.conf", "bob"]).unwrap();
        assert!(!args.verbose);
        assert_eq!(args.config, PathBuf::from("/tmp/ldap.conf"));
    }

    struct StaticDirectory(Vec<SearchEntry>);

    impl Directory for StaticDirectory {
        fn bind(&mut self, _dn: &str, _password: &str) -> Result<()> {
            Ok(())
        }

        fn search(&mut self, _base: &str, _filter: &str, _attrs: &[&str]) -> Result<Vec<SearchEntry>> {
            Ok(std::mem::take(&mut self.0))
        }

        fn unbind(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn account(uid: &str, attrs: &[(&str, &str)]) -> SearchEntry {
        let mut values = HashMap::new();
        for (name, value) in attrs {
            values.insert(name.to_string(), vec![value.to_string()]);
        }
        SearchEntry {
            dn: format!("uid={},ou=People,dc=example,dc=com", uid),
            attrs: values,
            bin_attrs: HashMap::new(),
        }
    }

    /// Look `alice` up in a directory holding `entries`, then report any
    /// failure the way `main` does
    fn outcome(entries: Vec<SearchEntry>, verbose: bool) -> (bool, String, String) {
        let config = Config::parse(&b"uri ldaps://ldap.example.com\nbase dc=example,dc=com\n"[..]).unwrap();
        let mut directory = StaticDirectory(entries);
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = print_key(&mut directory, &config, "alice", &mut out);
        if let Err(error) = &result {
            report(error, verbose, &mut err);
        }
        (
            result.is_ok(),
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn key_is_printed_on_its_own_line() {
        let entries = vec![account("alice", &[("sshPublicKey", "ssh-ed25519 AAAA alice")])];
        assert_eq!(
            outcome(entries, true),
            (true, "ssh-ed25519 AAAA alice\n".to_owned(), String::new())
        );
    }

    #[test]
    fn no_match_is_reported_when_verbose() {
        assert_eq!(
            outcome(vec![], true),
            (false, String::new(), "No user accounts match search\n".to_owned())
        );
        assert_eq!(outcome(vec![], false), (false, String::new(), String::new()));
    }

    #[test]
    fn several_matches_are_reported_when_verbose() {
        let entries = || {
            vec![
                account("alice", &[("sshPublicKey", "ssh-ed25519 AAAA one")]),
                account("alice", &[("sshPublicKey", "ssh-ed25519 AAAA two")]),
            ]
        };
        assert_eq!(
            outcome(entries(), true),
            (false, String::new(), "Search returned more than one user account\n".to_owned())
        );
        assert_eq!(outcome(entries(), false), (false, String::new(), String::new()));
    }

    #[test]
    fn missing_key_is_reported_when_verbose() {
        let entries = || vec![account("alice", &[("cn", "Alice")])];
        assert_eq!(
            outcome(entries(), true),
            (false, String::new(), "SSH Public Key not found\n".to_owned())
        );
        assert_eq!(outcome(entries(), false), (false, String::new(), String::new()));
    }
}
