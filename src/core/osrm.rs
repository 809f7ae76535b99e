//! OSRM-compatible HTTP routing engine
//!
//! Talks to any server exposing the OSRM v5 `table` and `nearest` services
//! (osrm-routed, or butterfly-route's `/table/v1` endpoint):
//!
//! ```text
//! GET {base}/table/v1/{profile}/{lon,lat;...}?sources=0;1&destinations=2;3&annotations=duration
//! GET {base}/nearest/v1/{profile}/{lon},{lat}?number=1
//! ```
//!
//! Table requests are split by sources so that no request carries more than
//! `max_table_size` coordinates; the row blocks are concatenated in order.

use geo::Point;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::core::config::RoutingConfig;
use crate::core::error::{Error, Result};
use crate::core::routing::RoutingEngine;

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    waypoints: Vec<Waypoint>,
}

#[derive(Debug, Deserialize)]
struct Waypoint {
    distance: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for an OSRM-compatible routing server
#[derive(Debug, Clone)]
pub struct OsrmClient {
    client: Client,
    base_url: String,
    profile: String,
    max_table_size: usize,
}

impl OsrmClient {
    pub fn new(config: &RoutingConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(format!("butterfly-access/{}", env!("BUTTERFLY_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            profile: config.profile.clone(),
            max_table_size: config.max_table_size.max(2),
        })
    }

    /// Sources per table request for `destinations` candidates
    fn source_chunk(&self, destinations: usize) -> usize {
        self.max_table_size.saturating_sub(destinations).max(1)
    }

    async fn table(&self, sources: &[Point<f64>], destinations: &[Point<f64>]) -> Result<Vec<Vec<Option<f64>>>> {
        let url = self.table_url(sources, destinations);
        let response: TableResponse = self.get_json(&url).await?;
        if response.code != "Ok" {
            return Err(Error::RoutingEngine(describe(&response.code, response.message.as_deref())));
        }
        response
            .durations
            .ok_or_else(|| Error::DataIntegrity("Table response without durations".to_string()))
    }

    fn table_url(&self, sources: &[Point<f64>], destinations: &[Point<f64>]) -> String {
        let coordinates = encode_coordinates(sources.iter().chain(destinations));
        let source_idx = index_list(0..sources.len());
        let destination_idx = index_list(sources.len()..sources.len() + destinations.len());
        format!(
            "{}/table/v1/{}/{coordinates}?sources={source_idx}&destinations={destination_idx}&annotations=duration",
            self.base_url, self.profile
        )
    }

    fn nearest_url(&self, point: Point<f64>) -> String {
        format!(
            "{}/nearest/v1/{}/{},{}?number=1",
            self.base_url,
            self.profile,
            point.x(),
            point.y()
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => describe(&err.code, err.message.as_deref()),
                Err(_) => body.chars().take(200).collect(),
            };
            return Err(Error::RoutingEngine(format!("HTTP {status}: {detail}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::DataIntegrity(format!("Malformed routing response: {e}")))
    }
}

impl RoutingEngine for OsrmClient {
    async fn nearest_road(&self, point: Point<f64>) -> Result<f64> {
        let response: NearestResponse = self.get_json(&self.nearest_url(point)).await?;
        if response.code != "Ok" {
            return Err(Error::RoutingEngine(describe(&response.code, response.message.as_deref())));
        }
        response
            .waypoints
            .first()
            .map(|w| w.distance)
            .ok_or_else(|| Error::DataIntegrity("Nearest response without waypoints".to_string()))
    }

    async fn travel_time_matrix(
        &self,
        sources: &[Point<f64>],
        destinations: &[Point<f64>],
    ) -> Result<Vec<Vec<Option<f64>>>> {
        let chunk = self.source_chunk(destinations.len());
        if sources.len() <= chunk {
            return self.table(sources, destinations).await;
        }
        log::debug!(
            "Splitting {}x{} table into requests of {chunk} sources",
            sources.len(),
            destinations.len()
        );
        let mut rows = Vec::with_capacity(sources.len());
        for block in sources.chunks(chunk) {
            rows.extend(self.table(block, destinations).await?);
        }
        Ok(rows)
    }

    /// The server handles concurrent requests itself
    fn thread_safe(&self) -> bool {
        true
    }
}

fn describe(code: &str, message: Option<&str>) -> String {
    match message {
        Some(message) => format!("{code}: {message}"),
        None => code.to_string(),
    }
}

fn encode_coordinates<'a>(points: impl Iterator<Item = &'a Point<f64>>) -> String {
    points
        .map(|p| format!("{},{}", p.x(), p.y()))
        .collect::<Vec<_>>()
        .join(";")
}

fn index_list(range: std::ops::Range<usize>) -> String {
    range.map(|i| i.to_string()).collect::<Vec<_>>().join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> OsrmClient {
        OsrmClient::new(&RoutingConfig {
            base_url: base_url.to_string(),
            ..RoutingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_table_url_layout() {
        let osrm = client("http://localhost:5000/");
        let url = osrm.table_url(
            &[Point::new(4.35, 50.85), Point::new(4.4, 50.86)],
            &[Point::new(4.38, 50.855)],
        );
        assert_eq!(
            url,
            "http://localhost:5000/table/v1/driving/4.35,50.85;4.4,50.86;4.38,50.855?sources=0;1&destinations=2&annotations=duration"
        );
    }

    #[test]
    fn test_nearest_url_layout() {
        let osrm = client("http://osrm:5000");
        assert_eq!(
            osrm.nearest_url(Point::new(-38.1, -11.2)),
            "http://osrm:5000/nearest/v1/driving/-38.1,-11.2?number=1"
        );
    }

    #[test]
    fn test_source_chunk_leaves_room_for_destinations() {
        let osrm = OsrmClient::new(&RoutingConfig {
            max_table_size: 10,
            ..RoutingConfig::default()
        })
        .unwrap();
        assert_eq!(osrm.source_chunk(4), 6);
        assert_eq!(osrm.source_chunk(10), 1);
        assert_eq!(osrm.source_chunk(25), 1);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe("NoSegment", Some("Could not find a matching segment")),
            "NoSegment: Could not find a matching segment");
        assert_eq!(describe("InvalidQuery", None), "InvalidQuery");
    }
}
