use serde::Deserialize;

use crate::config::ProducerConfig;

use super::ProducerError;

#[derive(Deserialize)]
struct IpLocation {
    loc: Option<String>,
}

/// Parses an ipinfo-style `"lat,lng"` string.
pub fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lng) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

pub async fn lookup(client: &reqwest::Client, url: &str) -> Result<(f64, f64), ProducerError> {
    let location: IpLocation = client
        .get(url)
        .header("User-Agent", concat!("crowdwatch/", env!("CARGO_PKG_VERSION")))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let loc = location
        .loc
        .ok_or_else(|| ProducerError::Geolocation("response has no 'loc' field".into()))?;

    parse_loc(&loc).ok_or_else(|| ProducerError::Geolocation(format!("invalid loc {loc:?}")))
}

/// Camera position, resolved once at startup. Pinned coordinates win over the
/// IP lookup, which only locates the network egress.
pub async fn resolve_location(
    client: &reqwest::Client,
    config: &ProducerConfig,
) -> Result<(f64, f64), ProducerError> {
    if let Some(location) = config.fixed_location() {
        tracing::info!(
            latitude = location.0,
            longitude = location.1,
            "using configured location"
        );
        return Ok(location);
    }

    let location = lookup(client, &config.geolocation_url).await?;
    tracing::info!(
        latitude = location.0,
        longitude = location.1,
        url = %config.geolocation_url,
        "resolved location from IP"
    );
    Ok(location)
}
