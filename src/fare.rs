//! Fare computation: great-circle distance between stations, distance-based
//! fare with floor/ceiling clamping, and card-class discounts.
//!
//! Pure and deterministic — the only failure mode is non-finite coordinates.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A station's geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Discount category attached to a metro card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardClass {
    Regular,
    Student,
    SeniorCitizen,
    Disabled,
}

impl CardClass {
    /// Fare multiplier applied after floor/ceiling clamping.
    pub fn discount(self) -> f64 {
        match self {
            CardClass::Regular => 1.0,
            CardClass::Student => 0.5,
            CardClass::SeniorCitizen => 0.5,
            CardClass::Disabled => 0.75,
        }
    }
}

/// Fare parameters. Loaded from config; the defaults mirror the published
/// fare table (base 10, 2 per km, ceiling 60).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FareSchedule {
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub max_fare: f64,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base_fare: 10.0,
            per_km_rate: 2.0,
            max_fare: 60.0,
        }
    }
}

/// Result of a fare computation.
#[derive(Debug, Clone, Serialize)]
pub struct FareQuote {
    pub fare: Decimal,
    pub distance_km: f64,
}

impl FareSchedule {
    /// Compute the fare for a trip between two points.
    ///
    /// `raw = base + distance × rate`, clamped to `[base, max]`, then the
    /// card-class discount is applied and the result rounded to the nearest
    /// whole currency unit. A same-station trip therefore costs the
    /// discounted base fare, never zero.
    pub fn quote(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        class: CardClass,
    ) -> Result<FareQuote, AppError> {
        if !origin.is_finite() || !destination.is_finite() {
            return Err(AppError::InvalidStationData);
        }

        let distance_km = haversine_km(origin, destination);
        let raw = self.base_fare + distance_km * self.per_km_rate;
        let clamped = raw.min(self.max_fare).max(self.base_fare);
        let discounted = clamped * class.discount();
        let fare = Decimal::from(discounted.round() as i64);

        Ok(FareQuote { fare, distance_km })
    }
}

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIYAPUR: GeoPoint = GeoPoint {
        latitude: 17.4967,
        longitude: 78.3875,
    };
    const AMEERPET: GeoPoint = GeoPoint {
        latitude: 17.4375,
        longitude: 78.4483,
    };

    #[test]
    fn test_haversine_known_pair() {
        let d = haversine_km(MIYAPUR, AMEERPET);
        assert!((d - 9.215).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_same_station_yields_base_fare() {
        let schedule = FareSchedule::default();
        let quote = schedule.quote(MIYAPUR, MIYAPUR, CardClass::Regular).unwrap();
        assert_eq!(quote.fare, Decimal::from(10));
        assert_eq!(quote.distance_km, 0.0);
    }

    #[test]
    fn test_same_station_discounted_never_zero() {
        let schedule = FareSchedule::default();
        let student = schedule.quote(MIYAPUR, MIYAPUR, CardClass::Student).unwrap();
        assert_eq!(student.fare, Decimal::from(5));
        let disabled = schedule
            .quote(MIYAPUR, MIYAPUR, CardClass::Disabled)
            .unwrap();
        assert_eq!(disabled.fare, Decimal::from(8)); // 7.5 rounds up
    }

    #[test]
    fn test_ceiling_clamp() {
        // Miyapur → L.B.Nagar is ~28.3 km; raw fare ~66.7 exceeds the ceiling.
        let lb_nagar = GeoPoint::new(17.3264, 78.5861);
        let schedule = FareSchedule::default();
        let quote = schedule.quote(MIYAPUR, lb_nagar, CardClass::Regular).unwrap();
        assert_eq!(quote.fare, Decimal::from(60));
    }

    #[test]
    fn test_discount_applies_after_clamp() {
        let lb_nagar = GeoPoint::new(17.3264, 78.5861);
        let schedule = FareSchedule::default();
        let quote = schedule.quote(MIYAPUR, lb_nagar, CardClass::Student).unwrap();
        assert_eq!(quote.fare, Decimal::from(30));
    }

    #[test]
    fn test_deterministic() {
        let schedule = FareSchedule::default();
        let a = schedule.quote(MIYAPUR, AMEERPET, CardClass::Regular).unwrap();
        let b = schedule.quote(MIYAPUR, AMEERPET, CardClass::Regular).unwrap();
        assert_eq!(a.fare, b.fare);
        assert_eq!(a.distance_km, b.distance_km);
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let schedule = FareSchedule::default();
        let bad = GeoPoint::new(f64::NAN, 78.0);
        let err = schedule.quote(bad, AMEERPET, CardClass::Regular).unwrap_err();
        assert_eq!(err.code(), "invalid_station_data");
    }
}
