use ldap3::ldap_escape;

/// Build the filter matching an account by `uid`, optionally narrowed by an
/// extra clause such as `objectclass=posixAccount`
pub fn user_filter(account: &str, pam_filter: Option<&str>) -> String {
    let account = ldap_escape(account);
    match pam_filter.map(str::trim).filter(|clause| !clause.is_empty()) {
        Some(clause) if clause.starts_with('(') && clause.ends_with(')') => {
            format!("(&{}(uid={}))", clause, account)
        }
        Some(clause) => format!("(&({})(uid={}))", clause, account),
        None => format!("(uid={})", account),
    }
}
