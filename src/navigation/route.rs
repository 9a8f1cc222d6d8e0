use crate::geo::GeoPoint;
use serde::Serialize;
use tracing::*;

pub const DEFAULT_TWO_OPT_ITERATIONS: usize = 100;

/// Heuristic tour construction over geographic points.
///
/// The first point is the anchor and never moves.
#[derive(Debug, Clone)]
pub struct RouteOptimizer {
    max_iterations: usize,
}

impl Default for RouteOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_TWO_OPT_ITERATIONS)
    }
}

impl RouteOptimizer {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    /// Greedy tour: always visit the closest unvisited point next.
    ///
    /// Ties go to the point listed first.
    pub fn nearest_neighbor(&self, points: &[GeoPoint]) -> Vec<GeoPoint> {
        let Some((first, rest)) = points.split_first() else {
            return vec![];
        };
        let mut unvisited = rest.to_vec();
        let mut route = Vec::with_capacity(points.len());
        route.push(first.clone());

        while !unvisited.is_empty() {
            let current = &route[route.len() - 1];
            let nearest = unvisited
                .iter()
                .enumerate()
                .map(|(index, point)| (index, current.distance_to(point)))
                // min_by keeps the first of equal elements
                .min_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index)
                .unwrap_or(0);
            route.push(unvisited.remove(nearest));
        }
        route
    }

    /// First improvement 2-opt. Returns how many segment reversals it applied.
    pub fn two_opt(&self, route: &mut [GeoPoint]) -> usize {
        let len = route.len();
        if len <= 3 {
            return 0;
        }

        let mut swaps = 0;
        let mut iterations = 0;
        let mut improved = true;
        while improved && iterations < self.max_iterations {
            improved = false;
            iterations += 1;
            for i in 1..len - 2 {
                for j in i + 2..len {
                    let current = route[i - 1].distance_to(&route[i])
                        + route[j - 1].distance_to(&route[j]);
                    let swapped = route[i - 1].distance_to(&route[j - 1])
                        + route[i].distance_to(&route[j]);
                    if swapped < current {
                        route[i..j].reverse();
                        swaps += 1;
                        improved = true;
                    }
                }
            }
        }
        debug!("2-opt applied {} swaps in {} sweeps", swaps, iterations);
        swaps
    }
}

pub fn route_distance(route: &[GeoPoint]) -> f64 {
    route
        .windows(2)
        .map(|leg| leg[0].distance_to(&leg[1]))
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLeg {
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub distance_m: f64,
    pub bearing_deg: f64,
}

pub fn route_legs(route: &[GeoPoint]) -> Vec<RouteLeg> {
    route
        .windows(2)
        .map(|leg| RouteLeg {
            from: leg[0].clone(),
            to: leg[1].clone(),
            distance_m: leg[0].distance_to(&leg[1]),
            bearing_deg: leg[0].bearing_to(&leg[1]),
        })
        .collect()
}
