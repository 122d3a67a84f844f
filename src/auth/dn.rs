//! Distinguished name parsing and role extraction
//!
//! Roles ride in the certificate subject's `OU` attribute as
//! `code:value[,value...]` groups separated by `;`. Group `0` holds role names:
//!
//! ```text
//! CN=writer-1, OU=0:pentester\,auditor;1:eu-west, O=ACME
//! ```

use std::collections::BTreeMap;

const ROLE_CODE: &str = "0";
const GROUP_SEPARATOR: char = ';';
const CODE_SEPARATOR: char = ':';
const VALUE_SEPARATOR: char = ',';

/// Split a DN into `(attribute, value)` pairs. Attribute names are
/// upper-cased; escapes (`\,`) and quoted values are honored.
pub fn parse_dn(dn: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut current = String::new();
    let mut chars = dn.chars();
    let mut quoted = false;

    let mut flush = |current: &mut String| {
        if let Some((key, value)) = current.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                attributes.push((key.to_ascii_uppercase(), value.trim().to_string()));
            }
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => quoted = !quoted,
            ',' | '+' if !quoted => flush(&mut current),
            _ => current.push(c),
        }
    }
    flush(&mut current);
    attributes
}

/// Every `code -> values` group found in the DN's OU attributes
pub fn ou_groups(dn: &str) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in parse_dn(dn) {
        if key != "OU" {
            continue;
        }
        for group in value.split(GROUP_SEPARATOR) {
            let Some((code, values)) = group.split_once(CODE_SEPARATOR) else {
                continue;
            };
            groups.entry(code.trim().to_string()).or_default().extend(
                values
                    .split(VALUE_SEPARATOR)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            );
        }
    }
    groups
}

/// Role names listed in the DN, in order of appearance
pub fn roles_from_dn(dn: &str) -> Vec<String> {
    ou_groups(dn).remove(ROLE_CODE).unwrap_or_default()
}
