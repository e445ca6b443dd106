//! Regex-backed extraction of addresses and mailing-list ids from raw header
//! values. Every function is total: a value that does not match its pattern
//! comes back unchanged and a diagnostic is logged instead.

use regex::Regex;
use std::sync::OnceLock;

const ADDRESS_PATTERN: &str = r"(?:^|(?:^.+ < *)|^<)([[:alnum:]+_@.\-]+)(?:$|(?:>$))";
const MAILING_LIST_PATTERN: &str = r"^list ([[:alnum:]+_@.\-]+);.+";

static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();
static MAILING_LIST_RE: OnceLock<Regex> = OnceLock::new();

fn address_re() -> &'static Regex {
    ADDRESS_RE.get_or_init(|| Regex::new(ADDRESS_PATTERN).expect("address pattern is valid"))
}

fn mailing_list_re() -> &'static Regex {
    MAILING_LIST_RE
        .get_or_init(|| Regex::new(MAILING_LIST_PATTERN).expect("mailing-list pattern is valid"))
}

/// Extracts the bare address from a single mailbox such as
/// `"Jane Doe" <jane@EXAMPLE.com>` and lower-cases it.
pub fn extract_address(value: &str) -> String {
    let trimmed = value.trim();
    match address_re()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
    {
        Some(address) => address.as_str().to_lowercase(),
        None => {
            tracing::debug!(value, "cannot parse address; keeping raw value");
            value.to_owned()
        }
    }
}

/// Splits an address-list header on `,` and `;`, drops entries without an
/// `@` (group syntax, dangling display-name fragments) and normalizes the rest.
pub fn extract_addresses(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|entry| entry.contains('@'))
        .map(extract_address)
        .collect()
}

/// Pulls the list address out of a `Mailing-list: list <addr>; ...` header.
pub fn extract_mailing_list(value: &str) -> String {
    match mailing_list_re()
        .captures(value.trim())
        .and_then(|caps| caps.get(1))
    {
        Some(list) => list.as_str().to_lowercase(),
        None => {
            tracing::debug!(value, "cannot parse mailing list; keeping raw value");
            value.to_owned()
        }
    }
}
