//! Grouping endpoints by location label
//!
//! Provider labels follow `<location><n>线 | <tier>`, e.g. `香港03线 | B`.
//! The location prefix is the group key; labels without that shape fall into
//! a default group.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::endpoint::Labeled;
use crate::error::{Error, Result};

/// Group name for labels with no recognisable location.
pub const UNKNOWN_GROUP: &str = "UNKNOWN";

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*?)\d+线 \| [A-Z]").expect("location pattern is valid"));

/// Partition items by the location prefix of their label.
///
/// Items keep their input order within a group. Returns `EmptyInput` when
/// there is nothing to group.
pub fn group_by_location<T, I>(items: I, default: &str) -> Result<BTreeMap<String, Vec<T>>>
where
    T: Labeled,
    I: IntoIterator<Item = T>,
{
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    let mut any = false;

    for item in items {
        any = true;
        let key = match LOCATION.captures(item.label()) {
            Some(caps) => caps[1].to_string(),
            None => default.to_string(),
        };
        groups.entry(key).or_default().push(item);
    }

    if !any {
        return Err(Error::EmptyInput);
    }
    Ok(groups)
}
