//! Nearest-insertion day assignment: pick the weekday that adds the least
//! marginal distance to recently-run routes.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use curbside_core::{distance_miles, Coordinates, Route};
use curbside_router::RouterClient;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Trailing window of route history to consider, in days.
    pub window_days: i64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { window_days: 7 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayProposal {
    pub day: Weekday,
    pub average_cost_miles: f64,
    /// Route that achieved the single cheapest insertion, for traceability.
    pub best_route_id: String,
    /// Routes found relative to one per day over the window, capped at 1.0.
    /// Advisory only.
    pub confidence: f64,
}

/// Cheapest cost of inserting `candidate` into a route, over every gap:
/// before the first stop, between each adjacent pair, after the last stop.
/// Stops without coordinates are excluded; a route with none yields `None`.
pub fn min_insertion_cost_miles(route: &Route, candidate: Coordinates) -> Option<f64> {
    let mut stops: Vec<_> = route.stops.iter().collect();
    stops.sort_by_key(|s| s.stop_number);
    let points: Vec<Coordinates> = stops.iter().filter_map(|s| s.coordinates()).collect();
    if points.is_empty() {
        return None;
    }

    let first = points[0];
    let last = points[points.len() - 1];
    let mut best = distance_miles(candidate, first).min(distance_miles(candidate, last));

    for pair in points.windows(2) {
        let detour = distance_miles(pair[0], candidate) + distance_miles(candidate, pair[1])
            - distance_miles(pair[0], pair[1]);
        if detour < best {
            best = detour;
        }
    }
    Some(best)
}

/// Propose the weekday whose routes absorb the candidate most cheaply.
/// Returns `None` when no qualifying route exists in the window; callers
/// fall back to another assignment strategy.
pub async fn propose_pickup_day(
    router: &dyn RouterClient,
    candidate: Coordinates,
    config: OptimizerConfig,
    today: NaiveDate,
) -> Result<Option<DayProposal>> {
    let mut by_day: HashMap<Weekday, Vec<f64>> = HashMap::new();
    let mut routes_found = 0usize;
    let mut best_single: Option<(f64, String)> = None;

    for offset in 1..=config.window_days {
        let date = today - Duration::days(offset);
        let routes = match router.get_routes(date).await {
            Ok(routes) => routes,
            Err(err) => {
                warn!(%date, error = %err, "skipping route day: router lookup failed");
                continue;
            }
        };
        for route in routes.iter().filter(|r| r.status.is_active()) {
            let Some(cost) = min_insertion_cost_miles(route, candidate) else {
                continue;
            };
            routes_found += 1;
            by_day.entry(route.date.weekday()).or_default().push(cost);
            if best_single
                .as_ref()
                .map(|(best, _)| cost < *best)
                .unwrap_or(true)
            {
                best_single = Some((cost, route.route_id.clone()));
            }
        }
    }

    let Some((_, best_route_id)) = best_single else {
        return Ok(None);
    };

    let Some((day, average_cost_miles)) = by_day
        .into_iter()
        .map(|(day, costs)| {
            let avg = costs.iter().sum::<f64>() / costs.len() as f64;
            (day, avg)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return Ok(None);
    };

    let confidence = (routes_found as f64 / config.window_days as f64).min(1.0);

    Ok(Some(DayProposal {
        day,
        average_cost_miles,
        best_route_id,
        confidence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeRouter;
    use curbside_core::{RouteStatus, RouteStop};

    fn stop(n: u32, lat: f64, lon: f64) -> RouteStop {
        RouteStop {
            stop_number: n,
            address: None,
            latitude: Some(lat),
            longitude: Some(lon),
        }
    }

    fn route(id: &str, date: NaiveDate, status: RouteStatus, stops: Vec<RouteStop>) -> Route {
        Route {
            route_id: id.to_string(),
            date,
            status,
            stops,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn single_stop_route_costs_the_direct_distance() {
        let r = route(
            "R-1",
            date(2026, 8, 27),
            RouteStatus::Completed,
            vec![stop(1, 30.30, -97.70)],
        );
        let candidate = Coordinates { lat: 30.20, lon: -97.70 };
        let cost = min_insertion_cost_miles(&r, candidate).unwrap();
        let direct = distance_miles(candidate, Coordinates { lat: 30.30, lon: -97.70 });
        assert!((cost - direct).abs() < 1e-9);
    }

    #[test]
    fn interior_insertion_never_beats_triangle_inequality() {
        let r = route(
            "R-1",
            date(2026, 8, 27),
            RouteStatus::Completed,
            vec![
                stop(1, 30.10, -97.70),
                stop(2, 30.20, -97.70),
                stop(3, 30.30, -97.70),
            ],
        );
        let candidate = Coordinates { lat: 30.15, lon: -97.69 };
        let cost = min_insertion_cost_miles(&r, candidate).unwrap();
        let to_first = distance_miles(candidate, Coordinates { lat: 30.10, lon: -97.70 });
        let to_last = distance_miles(candidate, Coordinates { lat: 30.30, lon: -97.70 });
        assert!(cost <= to_first);
        assert!(cost <= to_last);
        assert!(cost >= 0.0);
    }

    #[test]
    fn stops_are_ordered_by_sequence_number_before_costing() {
        // Same stops, shuffled sequence numbers: the gap structure must
        // follow stop_number, not vec order.
        let ordered = route(
            "R-1",
            date(2026, 8, 27),
            RouteStatus::Completed,
            vec![
                stop(1, 30.10, -97.70),
                stop(2, 30.20, -97.70),
                stop(3, 30.30, -97.70),
            ],
        );
        let shuffled = route(
            "R-2",
            date(2026, 8, 27),
            RouteStatus::Completed,
            vec![
                stop(3, 30.30, -97.70),
                stop(1, 30.10, -97.70),
                stop(2, 30.20, -97.70),
            ],
        );
        let candidate = Coordinates { lat: 30.25, lon: -97.71 };
        assert_eq!(
            min_insertion_cost_miles(&ordered, candidate),
            min_insertion_cost_miles(&shuffled, candidate)
        );
    }

    #[test]
    fn route_without_geocoded_stops_contributes_nothing() {
        let r = route(
            "R-1",
            date(2026, 8, 27),
            RouteStatus::Completed,
            vec![RouteStop {
                stop_number: 1,
                address: Some("12 Elm St".into()),
                latitude: None,
                longitude: None,
            }],
        );
        assert_eq!(min_insertion_cost_miles(&r, Coordinates { lat: 30.0, lon: -97.0 }), None);
    }

    #[tokio::test]
    async fn picks_the_weekday_with_the_lowest_average_cost() {
        let router = FakeRouter::new();
        // Thursday route passes right by the candidate; Friday route is far.
        router.add_route(route(
            "R-thu",
            date(2026, 8, 27),
            RouteStatus::Completed,
            vec![stop(1, 30.20, -97.70), stop(2, 30.21, -97.70)],
        ));
        router.add_route(route(
            "R-fri",
            date(2026, 8, 28),
            RouteStatus::Completed,
            vec![stop(1, 31.50, -96.50)],
        ));

        let proposal = propose_pickup_day(
            &router,
            Coordinates { lat: 30.205, lon: -97.701 },
            OptimizerConfig { window_days: 7 },
            date(2026, 9, 2),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(proposal.day, Weekday::Thu);
        assert_eq!(proposal.best_route_id, "R-thu");
        assert!((proposal.confidence - 2.0 / 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn draft_and_cancelled_routes_are_ignored() {
        let router = FakeRouter::new();
        router.add_route(route(
            "R-draft",
            date(2026, 8, 27),
            RouteStatus::Draft,
            vec![stop(1, 30.20, -97.70)],
        ));
        router.add_route(route(
            "R-cancelled",
            date(2026, 8, 28),
            RouteStatus::Cancelled,
            vec![stop(1, 30.20, -97.70)],
        ));

        let proposal = propose_pickup_day(
            &router,
            Coordinates { lat: 30.2, lon: -97.7 },
            OptimizerConfig::default(),
            date(2026, 9, 2),
        )
        .await
        .unwrap();
        assert!(proposal.is_none());
    }

    #[tokio::test]
    async fn empty_window_yields_none() {
        let router = FakeRouter::new();
        let proposal = propose_pickup_day(
            &router,
            Coordinates { lat: 30.2, lon: -97.7 },
            OptimizerConfig::default(),
            date(2026, 9, 2),
        )
        .await
        .unwrap();
        assert!(proposal.is_none());
    }
}
