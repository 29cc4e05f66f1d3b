//! Human-readable names for Walnut devices.
//!
//! By default a device is reported as `Walnut <short address>`. An alias
//! given on the command line replaces that name in the output.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// Address-to-name overrides.
pub type AliasMap = BTreeMap<MacAddress, String>;

/// A parsed alias mapping an address to a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use walnut_listener::alias::parse_alias;
///
/// let alias = parse_alias("AA:BB:CC:DD:EE:FF=Greenhouse").unwrap();
/// assert_eq!(alias.address.to_string(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(alias.name, "Greenhouse");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;
    let address = address.parse().map_err(|e| format!("{e}"))?;
    if name.trim().is_empty() {
        return Err("invalid alias: name is empty".to_string());
    }

    Ok(Alias {
        address,
        name: name.to_string(),
    })
}

/// Collect aliases into a lookup map. Later entries win.
pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.address, a.name.clone()))
        .collect()
}

/// The alias for `address`, or `default` when there is none.
pub fn resolve_name<'a>(address: &MacAddress, default: &'a str, aliases: &'a AliasMap) -> &'a str {
    aliases.get(address).map_or(default, String::as_str)
}
