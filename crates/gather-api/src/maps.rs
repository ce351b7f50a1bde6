use reqwest::Url;

use gather_types::api::MapLink;
use gather_types::models::Location;

const EMBED_BASE: &str = "https://www.google.com/maps/embed/v1/place";
const SEARCH_BASE: &str = "https://www.google.com/maps/search/";

/// Map for a physical location. With an API key the client can embed an
/// interactive map; without one it gets a plain search link. Online events
/// have no map.
pub fn map_link(location: &Location, api_key: Option<&str>) -> Option<MapLink> {
    let Location::Address {
        address,
        location_name,
    } = location
    else {
        return None;
    };

    let query = match location_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("{}, {}", name, address),
        _ => address.clone(),
    };

    match api_key.filter(|k| !k.is_empty()) {
        Some(key) => Url::parse_with_params(EMBED_BASE, [("key", key), ("q", query.as_str())])
            .ok()
            .map(|url| MapLink::Embed { url: url.into() }),
        None => Url::parse_with_params(SEARCH_BASE, [("api", "1"), ("query", query.as_str())])
            .ok()
            .map(|url| MapLink::Static { url: url.into() }),
    }
}
