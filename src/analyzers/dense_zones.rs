use crate::analyzers::types::DenseZone;
use crate::model::{ProbePoint, ZoneId};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Default number of dense zones reported per day.
pub const DEFAULT_DENSE_ZONES: usize = 5;

/// The `n` zones with the most probe records on `date`, most sampled first.
/// Ties go to the lower zone id.
pub fn dense_zones(points: &[ProbePoint], date: NaiveDate, n: usize) -> Vec<DenseZone> {
    let mut counts: BTreeMap<ZoneId, usize> = BTreeMap::new();
    for point in points.iter().filter(|p| p.timestamp.date() == date) {
        *counts.entry(point.zone_id).or_insert(0) += 1;
    }

    let mut ranked: Vec<(ZoneId, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(n)
        .map(|(zone_id, count)| DenseZone { date, zone_id, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 9, 3).unwrap()
    }

    fn in_zone(zone_id: ZoneId) -> ProbePoint {
        ProbePoint {
            gid: None,
            x: 0.0,
            y: 0.0,
            direction: 0.0,
            velocity: 0.0,
            timestamp: date().and_hms_opt(12, 0, 0).unwrap(),
            status: 1,
            vehicle_id: 1,
            vehicle_class: "A".into(),
            zone_id,
            trip_id: None,
            link_id: 1,
            inserted_at: None,
        }
    }

    #[test]
    fn test_top_zones_by_count() {
        let points: Vec<ProbePoint> = [5, 5, 5, 2, 2, 9, 9, 1].into_iter().map(in_zone).collect();
        let top = dense_zones(&points, date(), 3);
        let got: Vec<(ZoneId, usize)> = top.iter().map(|z| (z.zone_id, z.count)).collect();
        assert_eq!(got, vec![(5, 3), (2, 2), (9, 2)]);
        assert!(top.iter().all(|z| z.date == date()));
    }

    #[test]
    fn test_other_days_ignored() {
        let mut other = in_zone(4);
        other.timestamp = NaiveDate::from_ymd_opt(2019, 9, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let top = dense_zones(&[other, in_zone(7)], date(), DEFAULT_DENSE_ZONES);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].zone_id, 7);
    }
}
