//! Solar position (C7 step 2), computed purely from timestamp + fixed
//! geolocation — the NOAA solar position algorithm, the same closed-form
//! approximation used by general-purpose solar libraries for apparent
//! elevation and azimuth.

use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    /// sin(apparent elevation), already normalized to [-1, 1].
    pub elevation_sin: f64,
    pub azimuth_sin: f64,
    pub azimuth_cos: f64,
}

/// Computes apparent solar elevation/azimuth for `instant` at `(latitude,
/// longitude)` in degrees.
pub fn solar_position(instant: DateTime<Utc>, latitude: f64, longitude: f64) -> SolarPosition {
    let jd = julian_day(instant);
    let jc = (jd - 2_451_545.0) / 36525.0;

    let geom_mean_long_sun = (280.46646 + jc * (36000.76983 + jc * 0.0003032)).rem_euclid(360.0);
    let geom_mean_anom_sun = 357.52911 + jc * (35999.05029 - 0.0001537 * jc);
    let eccent_earth_orbit = 0.016708634 - jc * (0.000042037 + 0.0000001267 * jc);

    let mean_anom_rad = geom_mean_anom_sun.to_radians();
    let sun_eq_of_ctr = mean_anom_rad.sin() * (1.914602 - jc * (0.004817 + 0.000014 * jc))
        + (2.0 * mean_anom_rad).sin() * (0.019993 - 0.000101 * jc)
        + (3.0 * mean_anom_rad).sin() * 0.000289;

    let sun_true_long = geom_mean_long_sun + sun_eq_of_ctr;

    let sun_app_long =
        sun_true_long - 0.00569 - 0.00478 * (125.04 - 1934.136 * jc).to_radians().sin();

    let mean_obliq_ecliptic =
        23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.00059 - jc * 0.001813))) / 60.0) / 60.0;
    let obliq_corr = mean_obliq_ecliptic + 0.00256 * (125.04 - 1934.136 * jc).to_radians().cos();

    let sun_declin = (obliq_corr.to_radians().sin() * sun_app_long.to_radians().sin())
        .asin()
        .to_degrees();

    let var_y = (obliq_corr.to_radians() / 2.0).tan().powi(2);
    let eq_of_time_minutes = 4.0
        * (var_y * (2.0 * geom_mean_long_sun.to_radians()).sin()
            - 2.0 * eccent_earth_orbit * mean_anom_rad.sin()
            + 4.0 * eccent_earth_orbit * var_y * mean_anom_rad.sin()
                * (2.0 * geom_mean_long_sun.to_radians()).cos()
            - 0.5 * var_y * var_y * (4.0 * geom_mean_long_sun.to_radians()).sin()
            - 1.25 * eccent_earth_orbit * eccent_earth_orbit * (2.0 * mean_anom_rad).sin())
        .to_degrees();

    let time_utc_minutes = instant.hour() as f64 * 60.0
        + instant.minute() as f64
        + instant.second() as f64 / 60.0;
    let true_solar_time = (time_utc_minutes + eq_of_time_minutes + 4.0 * longitude).rem_euclid(1440.0);

    let hour_angle = if true_solar_time / 4.0 < 0.0 {
        true_solar_time / 4.0 + 180.0
    } else {
        true_solar_time / 4.0 - 180.0
    };

    let lat_rad = latitude.to_radians();
    let declin_rad = sun_declin.to_radians();
    let hour_angle_rad = hour_angle.to_radians();

    let zenith = (lat_rad.sin() * declin_rad.sin()
        + lat_rad.cos() * declin_rad.cos() * hour_angle_rad.cos())
    .clamp(-1.0, 1.0)
    .acos()
    .to_degrees();

    let elevation = 90.0 - zenith;

    let azimuth_denominator = lat_rad.cos() * zenith.to_radians().sin();
    let raw_azimuth = if azimuth_denominator.abs() < 1e-9 {
        0.0
    } else {
        ((lat_rad.sin() * zenith.to_radians().cos() - declin_rad.sin()) / azimuth_denominator)
            .clamp(-1.0, 1.0)
            .acos()
            .to_degrees()
    };

    let azimuth = if hour_angle > 0.0 {
        (raw_azimuth + 180.0).rem_euclid(360.0)
    } else {
        (540.0 - raw_azimuth).rem_euclid(360.0)
    };

    SolarPosition {
        elevation_sin: elevation.to_radians().sin(),
        azimuth_sin: azimuth.to_radians().sin(),
        azimuth_cos: azimuth.to_radians().cos(),
    }
}

fn julian_day(instant: DateTime<Utc>) -> f64 {
    let year = instant.year();
    let month = instant.month() as i32;
    let day = instant.day() as f64
        + (instant.hour() as f64 + instant.minute() as f64 / 60.0 + instant.second() as f64 / 3600.0)
            / 24.0;

    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = (y as f64 / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (y as f64 + 4716.0)).floor() + (30.6001 * (m as f64 + 1.0)).floor() + day + b
        - 1524.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn noon_elevation_exceeds_midnight_elevation() {
        let lat = 52.019364;
        let lon = -1.73893;
        let noon = Utc.with_ymd_and_hms(2025, 6, 21, 12, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2025, 6, 21, 0, 0, 0).unwrap();

        let noon_pos = solar_position(noon, lat, lon);
        let midnight_pos = solar_position(midnight, lat, lon);
        assert!(noon_pos.elevation_sin > midnight_pos.elevation_sin);
    }

    #[test]
    fn azimuth_components_stay_on_unit_circle() {
        let pos = solar_position(Utc.with_ymd_and_hms(2025, 3, 20, 9, 0, 0).unwrap(), 52.0, -1.7);
        let norm = pos.azimuth_sin.powi(2) + pos.azimuth_cos.powi(2);
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
