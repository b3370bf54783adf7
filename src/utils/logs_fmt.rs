/// Shortens long hex identifiers (tx hashes, wallets, digests) for log lines.
pub fn abbrev(s: &str) -> String {
    if s.len() > 14 {
        format!("{}...{}", &s[..8], &s[s.len() - 4..])
    } else {
        s.to_string()
    }
}
