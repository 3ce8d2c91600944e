use rand::Rng;

use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;
const AVERAGE_COURIER_SPEED_KMH: f64 = 25.0;
const HANDOVER_MINUTES: f64 = 5.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    // Rounding can push the term a hair above 1 for antipodal points.
    let central_angle = 2.0 * haversine.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Minutes a courier needs to cover `distance_km`, plus a fixed handover allowance.
pub fn estimate_travel_minutes(distance_km: f64) -> f64 {
    (distance_km.max(0.0) / AVERAGE_COURIER_SPEED_KMH) * 60.0 + HANDOVER_MINUTES
}

/// Shifts a point by up to `max_offset_m` metres on each axis.
///
/// Only used when location simulation is switched on in the config.
pub fn jitter<R: Rng + ?Sized>(point: &GeoPoint, max_offset_m: f64, rng: &mut R) -> GeoPoint {
    if max_offset_m <= 0.0 {
        return point.clone();
    }

    let max_km = max_offset_m / 1_000.0;
    let lat_offset = rng.gen_range(-max_km..=max_km) / KM_PER_DEGREE_LAT;
    let km_per_degree_lng = (KM_PER_DEGREE_LAT * point.lat.to_radians().cos()).max(1e-6);
    let lng_offset = rng.gen_range(-max_km..=max_km) / km_per_degree_lng;

    GeoPoint {
        lat: (point.lat + lat_offset).clamp(-90.0, 90.0),
        lng: point.lng + lng_offset,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{estimate_travel_minutes, haversine_km, jitter};
    use crate::models::courier::GeoPoint;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = point(53.5511, 9.9937);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = point(51.5074, -0.1278);
        let paris = point(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (point(40.7128, -74.0060), point(34.0522, -118.2437)),
            (point(-33.8688, 151.2093), point(35.6762, 139.6503)),
            (point(0.0, 179.9), point(0.0, -179.9)),
            (point(89.9, 0.0), point(-89.9, 180.0)),
        ];

        for (a, b) in pairs {
            let forward = haversine_km(&a, &b);
            let backward = haversine_km(&b, &a);
            assert!((forward - backward).abs() < 1e-9, "{forward} != {backward}");
            assert!(forward > 0.0);
        }
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let distance = haversine_km(&point(0.0, 0.0), &point(0.0, 180.0));
        assert!(distance.is_finite());
        assert!((distance - std::f64::consts::PI * 6_371.0).abs() < 1.0);
    }

    #[test]
    fn travel_estimate_includes_handover() {
        assert!((estimate_travel_minutes(0.0) - 5.0).abs() < 1e-9);
        assert!((estimate_travel_minutes(25.0) - 65.0).abs() < 1e-9);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        let origin = point(52.52, 13.405);

        for _ in 0..100 {
            let moved = jitter(&origin, 50.0, &mut rng);
            assert!(haversine_km(&origin, &moved) <= 0.075);
        }
    }

    #[test]
    fn zero_jitter_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let origin = point(52.52, 13.405);
        assert_eq!(jitter(&origin, 0.0, &mut rng), origin);
    }
}
