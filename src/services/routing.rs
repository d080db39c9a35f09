//! Routing engine client supplying road-network travel times.
//!
//! The production backend is a Valhalla matrix endpoint; tests and offline
//! runs use a Haversine estimate instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Location;

/// Travel durations in whole seconds; `None` means the engine found no route.
pub type DurationMatrix = Vec<Vec<Option<i64>>>;

/// A road-network travel time oracle.
///
/// Implementations are queried at model-construction time only; the solver
/// itself never performs I/O.
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Travel duration in seconds from `from` to `to`, or `None` when the
    /// engine cannot connect the two points.
    async fn duration(&self, from: Location, to: Location) -> Result<Option<i64>>;

    /// The full pairwise duration matrix for `locations`.
    async fn matrix(&self, locations: &[Location]) -> Result<DurationMatrix>;

    /// Service name for logging.
    fn name(&self) -> &str;
}

/// Valhalla client configuration.
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of the Valhalla server (e.g. "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Valhalla routing client.
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    fn build_matrix_request(&self, locations: &[Location]) -> MatrixRequest {
        let locs: Vec<ValhallaLocation> = locations
            .iter()
            .map(|location| ValhallaLocation {
                lat: location.latitude(),
                lon: location.longitude(),
                // 500m snap radius; geocoded home addresses can sit well
                // away from the nearest routable road edge
                radius: Some(500),
            })
            .collect();

        MatrixRequest {
            sources: locs.clone(),
            targets: locs,
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
        }
    }
}

#[async_trait]
impl RoutingService for ValhallaClient {
    async fn duration(&self, from: Location, to: Location) -> Result<Option<i64>> {
        if from == to {
            return Ok(Some(0));
        }
        let matrix = self.matrix(&[from, to]).await?;
        Ok(matrix[0][1])
    }

    async fn matrix(&self, locations: &[Location]) -> Result<DurationMatrix> {
        let n = locations.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if n == 1 {
            return Ok(vec![vec![Some(0)]]);
        }

        let request = self.build_matrix_request(locations);
        let url = format!("{}/sources_to_targets", self.config.base_url);

        debug!("requesting travel-time matrix for {} locations", n);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("failed to reach the routing engine")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("routing engine returned error {}: {}", status, body);
        }

        let matrix_response: MatrixResponse = response
            .json()
            .await
            .context("failed to parse routing engine response")?;

        let mut durations = vec![vec![None; n]; n];
        for (i, row) in matrix_response.sources_to_targets.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                durations[i][j] = match cell.time {
                    Some(time) => Some(time.ceil() as i64),
                    None => {
                        warn!("no route between location {} and {}", i, j);
                        None
                    }
                };
            }
        }
        for (i, row) in durations.iter_mut().enumerate() {
            row[i] = Some(0);
        }

        Ok(durations)
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Valhalla API types

#[derive(Debug, Serialize)]
struct MatrixRequest {
    sources: Vec<ValhallaLocation>,
    targets: Vec<ValhallaLocation>,
    costing: String,
    units: String,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Time in seconds
    time: Option<f64>,
}

/// Great-circle distance in kilometres.
pub fn haversine_distance_km(from: Location, to: Location) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1 = from.latitude().to_radians();
    let lat2 = to.latitude().to_radians();
    let dlat = (to.latitude() - from.latitude()).to_radians();
    let dlng = (to.longitude() - from.longitude()).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Offline routing estimate: straight-line distance scaled by a road
/// coefficient at a fixed average speed.
pub struct HaversineRouting {
    road_coefficient: f64,
    average_speed_kmh: f64,
}

impl Default for HaversineRouting {
    fn default() -> Self {
        Self {
            road_coefficient: 1.3,
            average_speed_kmh: 40.0,
        }
    }
}

impl HaversineRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
        }
    }

    fn estimate(&self, from: Location, to: Location) -> i64 {
        if from == to {
            return 0;
        }
        let road_km = haversine_distance_km(from, to) * self.road_coefficient;
        (road_km / self.average_speed_kmh * 3600.0).ceil() as i64
    }
}

#[async_trait]
impl RoutingService for HaversineRouting {
    async fn duration(&self, from: Location, to: Location) -> Result<Option<i64>> {
        Ok(Some(self.estimate(from, to)))
    }

    async fn matrix(&self, locations: &[Location]) -> Result<DurationMatrix> {
        let n = locations.len();
        let mut durations = vec![vec![Some(0); n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    durations[i][j] = Some(self.estimate(locations[i], locations[j]));
                }
            }
        }
        Ok(durations)
    }

    fn name(&self) -> &str {
        "Haversine"
    }
}

/// Create a routing service, falling back to the Haversine estimate when no
/// engine URL is configured or the engine is unreachable.
pub async fn create_routing_service(engine_url: Option<String>) -> Box<dyn RoutingService> {
    use tracing::info;

    if let Some(url) = engine_url {
        match check_engine_health(&url).await {
            Ok(()) => {
                info!("routing engine available at {}", url);
                match ValhallaClient::new(ValhallaConfig::new(&url)) {
                    Ok(client) => return Box::new(client),
                    Err(error) => warn!("failed to build routing client: {}", error),
                }
            }
            Err(error) => {
                warn!(
                    "routing engine not available at {}: {}; using Haversine estimates",
                    url, error
                );
            }
        }
    } else {
        info!("no routing engine configured; using Haversine estimates");
    }
    Box::new(HaversineRouting::new())
}

async fn check_engine_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/status", base_url);
    let response = client.get(&url).send().await?;
    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("routing engine returned status {}", response.status())
    }
}
