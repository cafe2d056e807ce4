//! Conversion between bus headers and NATS header maps.

use async_nats::HeaderMap;
use fleet_messaging::envelope::Headers;

pub fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }

    map
}

/// Only the first value of repeated headers is kept.
pub fn from_header_map(map: Option<&HeaderMap>) -> Headers {
    map.map(|map| {
        map.iter()
            .filter_map(|(name, values)| {
                values
                    .first()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    })
    .unwrap_or_default()
}
