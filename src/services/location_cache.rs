//! Deduplicated location set with a cached symmetric travel-time matrix.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::routing::RoutingService;
use crate::types::Location;

/// Sentinel marking a matrix cell that has not been computed yet.
const UNSET: i64 = -1;

/// Stand-in travel time when the routing engine cannot connect two points.
/// Large enough to dominate any objective, small enough to never overflow
/// when a handful of legs are summed.
pub const INFINITE_DISTANCE: i64 = i64::MAX / 4;

/// Distinct problem locations and the travel times between them, in whole
/// seconds. Cells are filled lazily from the routing engine or in bulk by
/// [`LocationCache::compute_all`]; the stored matrix is symmetric with a
/// zero diagonal.
#[derive(Clone)]
pub struct LocationCache {
    locations: Vec<Location>,
    index: HashMap<Location, usize>,
    matrix: Vec<Vec<i64>>,
}

impl LocationCache {
    pub fn new(locations: impl IntoIterator<Item = Location>) -> Self {
        let mut distinct = Vec::new();
        let mut index = HashMap::new();
        for location in locations {
            if !index.contains_key(&location) {
                index.insert(location, distinct.len());
                distinct.push(location);
            }
        }

        let n = distinct.len();
        let mut matrix = vec![vec![UNSET; n]; n];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 0;
        }

        Self {
            locations: distinct,
            index,
            matrix,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn index_of(&self, location: Location) -> Option<usize> {
        self.index.get(&location).copied()
    }

    /// The cached travel time between two known locations, if computed.
    pub fn cached(&self, from: Location, to: Location) -> Option<i64> {
        let i = self.index_of(from)?;
        let j = self.index_of(to)?;
        match self.matrix[i][j] {
            UNSET => None,
            value => Some(value),
        }
    }

    /// Travel time between two known locations after the matrix has been
    /// filled. Unset cells count as unreachable.
    pub fn distance(&self, from: Location, to: Location) -> i64 {
        match self.cached(from, to) {
            Some(value) => value,
            None => {
                warn!("travel time between {} and {} was never computed", from, to);
                INFINITE_DISTANCE
            }
        }
    }

    /// Fetch one travel time from the routing engine, store it symmetrically
    /// and return it. Unknown locations and routing failures yield the
    /// infinite-distance stand-in.
    pub async fn distance_or_fetch(
        &mut self,
        routing: &dyn RoutingService,
        from: Location,
        to: Location,
    ) -> i64 {
        if let Some(value) = self.cached(from, to) {
            return value;
        }
        let (Some(i), Some(j)) = (self.index_of(from), self.index_of(to)) else {
            warn!("location outside the cache: {} or {}", from, to);
            return INFINITE_DISTANCE;
        };

        let value = match routing.duration(from, to).await {
            Ok(Some(seconds)) => seconds,
            Ok(None) => {
                warn!("routing engine found no route between {} and {}", from, to);
                INFINITE_DISTANCE
            }
            Err(error) => {
                warn!("routing engine failure for {} to {}: {}", from, to, error);
                INFINITE_DISTANCE
            }
        };

        self.matrix[i][j] = value;
        self.matrix[j][i] = value;
        value
    }

    /// Fill every off-diagonal cell with one bulk matrix request. Returns
    /// the number of computed pairs. The upper triangle of the engine's
    /// answer is mirrored so the stored matrix is exactly symmetric.
    pub async fn compute_all(&mut self, routing: &dyn RoutingService) -> Result<usize> {
        let n = self.locations.len();
        if n < 2 {
            return Ok(0);
        }

        debug!(
            "computing travel times between {} locations via {}",
            n,
            routing.name()
        );
        let durations = routing.matrix(&self.locations).await?;

        let mut pairs = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let value = match durations[i][j] {
                    Some(seconds) => seconds,
                    None => {
                        warn!(
                            "routing engine found no route between {} and {}",
                            self.locations[i], self.locations[j]
                        );
                        INFINITE_DISTANCE
                    }
                };
                self.matrix[i][j] = value;
                self.matrix[j][i] = value;
                pairs += 1;
            }
        }
        Ok(pairs)
    }

    /// The `k` largest computed travel times, descending. Drives the default
    /// dropped-visit penalty.
    pub fn largest_distances(&self, k: usize) -> Vec<i64> {
        let mut values: Vec<i64> = Vec::new();
        let n = self.locations.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let value = self.matrix[i][j];
                if value != UNSET && value < INFINITE_DISTANCE {
                    values.push(value);
                }
            }
        }
        values.sort_unstable_by(|a, b| b.cmp(a));
        values.truncate(k);
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::routing::HaversineRouting;

    fn locations() -> Vec<Location> {
        vec![
            Location::from_degrees(53.3811, -1.4701),
            Location::from_degrees(53.4326, -1.3635),
            Location::from_degrees(53.3676, -1.4999),
        ]
    }

    #[test]
    fn test_deduplicates_locations() {
        let mut input = locations();
        input.push(input[0]);
        let cache = LocationCache::new(input);
        assert_eq!(cache.len(), 3);
        assert!(!cache.is_empty());
        assert!(LocationCache::new(Vec::new()).is_empty());
    }

    #[test]
    fn test_diagonal_is_zero_before_any_computation() {
        let cache = LocationCache::new(locations());
        for &location in cache.locations() {
            assert_eq!(cache.distance(location, location), 0);
        }
    }

    #[tokio::test]
    async fn test_compute_all_fills_symmetric_matrix() {
        let mut cache = LocationCache::new(locations());
        let routing = HaversineRouting::new();
        let pairs = cache.compute_all(&routing).await.unwrap();
        assert_eq!(pairs, 3);

        for &a in cache.locations() {
            for &b in cache.locations() {
                assert_eq!(cache.distance(a, b), cache.distance(b, a));
                if a == b {
                    assert_eq!(cache.distance(a, b), 0);
                } else {
                    assert!(cache.distance(a, b) > 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_lazy_fetch_stores_both_directions() {
        let mut cache = LocationCache::new(locations());
        let routing = HaversineRouting::new();
        let points = locations();

        assert!(cache.cached(points[0], points[1]).is_none());
        let value = cache.distance_or_fetch(&routing, points[0], points[1]).await;
        assert!(value > 0);
        assert_eq!(cache.cached(points[1], points[0]), Some(value));
    }

    #[tokio::test]
    async fn test_largest_distances_descending() {
        let mut cache = LocationCache::new(locations());
        cache.compute_all(&HaversineRouting::new()).await.unwrap();

        let top = cache.largest_distances(2);
        assert_eq!(top.len(), 2);
        assert!(top[0] >= top[1]);

        let all = cache.largest_distances(10);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_unknown_location_is_infinite() {
        let cache = LocationCache::new(locations());
        let stranger = Location::from_degrees(51.5, -0.1);
        assert_eq!(
            cache.distance(stranger, locations()[0]),
            INFINITE_DISTANCE
        );
    }
}
