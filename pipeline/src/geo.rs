//! Location and season priors.
//!
//! [`GeoFuser`] queries the geo model with `[latitude, longitude, week]`
//! and publishes the answer as a new immutable [`GeoPrior`] snapshot. Readers
//! hold an `Arc` to whichever snapshot was current when they looked; a
//! refresh never changes a snapshot somebody already holds.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone};
use tokio::sync::watch;

use crate::model::{check_rows, GeoModel};
use crate::PipelineError;

const WEEK_MS: f64 = 7.0 * 24.0 * 3600.0 * 1000.0;

/// Week number the geo model is trained on.
///
/// Weeks are counted from Jan 1 of the timestamp's year moved by
/// `1 - weekday` days (Sunday = 0): the Monday opening the week that holds
/// Jan 1, or Jan 2 when Jan 1 is a Sunday. The elapsed time in weeks is
/// rounded half up and offset by one. Calendar fields are taken in the
/// timestamp's own time zone.
pub fn week_of_year<Tz: TimeZone>(at: &DateTime<Tz>) -> i32 {
    let local = at.naive_local();
    let Some(jan1) = local.date().with_ordinal(1) else {
        return 1;
    };
    let shift = 1 - jan1.weekday().num_days_from_sunday() as i64;
    let start = (jan1 + Duration::days(shift)).and_time(NaiveTime::MIN);
    let weeks = (local - start).num_milliseconds() as f64 / WEEK_MS;
    (weeks + 0.5).floor() as i32 + 1
}

/// One prior per class, in roster order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPrior {
    version: u64,
    scores: Arc<[f32]>,
}

impl GeoPrior {
    /// Version 0: every class weighted 1.0.
    pub fn uniform(num_classes: usize) -> Self {
        Self {
            version: 0,
            scores: vec![1.0; num_classes].into(),
        }
    }

    /// The next snapshot, carrying `scores`.
    pub fn replace(&self, scores: Vec<f32>) -> Self {
        Self {
            version: self.version + 1,
            scores: scores.into(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Result of a successful fuse.
#[derive(Debug, Clone)]
pub struct GeoUpdate {
    pub week: i32,
    pub prior: Arc<GeoPrior>,
}

/// Owns the current prior and the geo model that refreshes it.
pub struct GeoFuser {
    model: Option<Arc<dyn GeoModel>>,
    num_classes: usize,
    prior: watch::Sender<Arc<GeoPrior>>,
}

impl GeoFuser {
    /// Creates a fuser over `num_classes` classes.
    ///
    /// Without a model, or with one whose class count differs, the fuser is
    /// inert: priors stay at 1.0 and [`GeoFuser::fuse`] does nothing.
    pub fn new(model: Option<Arc<dyn GeoModel>>, num_classes: usize) -> Self {
        let model = model.filter(|m| {
            let ok = m.num_classes() == num_classes;
            if !ok {
                tracing::warn!(
                    expected = num_classes,
                    got = m.num_classes(),
                    "geo model class count does not match roster, priors disabled"
                );
            }
            ok
        });
        let (prior, _) = watch::channel(Arc::new(GeoPrior::uniform(num_classes)));
        Self {
            model,
            num_classes,
            prior,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.model.is_none()
    }

    /// Current snapshot.
    pub fn prior(&self) -> Arc<GeoPrior> {
        self.prior.borrow().clone()
    }

    /// Watches snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<GeoPrior>> {
        self.prior.subscribe()
    }

    /// Queries the model for `(latitude, longitude, at)` and publishes the
    /// result as the next snapshot. Returns `Ok(None)` when inert.
    ///
    /// A failed query leaves the current snapshot in place.
    pub fn fuse<Tz: TimeZone>(
        &self,
        latitude: f32,
        longitude: f32,
        at: &DateTime<Tz>,
    ) -> Result<Option<GeoUpdate>, PipelineError> {
        let Some(model) = &self.model else {
            return Ok(None);
        };
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(PipelineError::InvalidInput(format!(
                "coordinates must be finite, got ({latitude}, {longitude})"
            )));
        }

        let week = week_of_year(at);
        let mut rows = model.predict(&[[latitude, longitude, week as f32]])?;
        check_rows(&rows, 1, self.num_classes)?;
        let scores = rows.swap_remove(0);

        let mut published = None;
        self.prior.send_modify(|current| {
            let next = Arc::new(current.replace(scores));
            published = Some(next.clone());
            *current = next;
        });
        let prior = published.unwrap_or_else(|| self.prior());
        tracing::debug!(week, version = prior.version(), "geo prior refreshed");
        Ok(Some(GeoUpdate { week, prior }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{FixedOffset, Utc};

    struct LinearGeo {
        classes: usize,
    }

    impl GeoModel for LinearGeo {
        fn num_classes(&self) -> usize {
            self.classes
        }

        fn predict(&self, queries: &[[f32; 3]]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(queries
                .iter()
                .map(|[lat, lon, week]| {
                    (0..self.classes)
                        .map(|c| (lat + lon + week + c as f32) / 1000.0)
                        .collect()
                })
                .collect())
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn week_numbers() {
        // 2025-01-01 is a Wednesday: weeks start Monday 2024-12-30.
        assert_eq!(week_of_year(&utc("2025-01-01T00:00:00Z")), 1);
        assert_eq!(week_of_year(&utc("2025-03-15T12:00:00Z")), 12);
        // 2023-01-01 is a Sunday: weeks start Monday 2023-01-02.
        assert_eq!(week_of_year(&utc("2023-01-01T00:00:00Z")), 1);
        assert_eq!(week_of_year(&utc("2023-01-09T00:00:00Z")), 2);
        assert_eq!(week_of_year(&utc("2024-12-31T23:00:00Z")), 53);
    }

    #[test]
    fn week_uses_local_calendar() {
        let tz = FixedOffset::east_opt(10 * 3600).unwrap();
        // 2024-12-31T20:00Z is already Jan 1 in UTC+10.
        let at = utc("2024-12-31T20:00:00Z").with_timezone(&tz);
        assert_eq!(week_of_year(&at), 1);
    }

    #[test]
    fn inert_fuser_keeps_uniform_prior() {
        let fuser = GeoFuser::new(None, 4);
        assert!(fuser.is_inert());
        assert!(fuser.fuse(52.0, 13.0, &Utc::now()).unwrap().is_none());
        let prior = fuser.prior();
        assert_eq!(prior.version(), 0);
        assert_eq!(prior.scores(), &[1.0; 4]);
    }

    #[test]
    fn mismatched_model_makes_fuser_inert() {
        let fuser = GeoFuser::new(Some(Arc::new(LinearGeo { classes: 3 })), 4);
        assert!(fuser.is_inert());
    }

    #[test]
    fn fuse_publishes_new_snapshot() {
        let fuser = GeoFuser::new(Some(Arc::new(LinearGeo { classes: 3 })), 3);
        let mut rx = fuser.subscribe();
        let before = fuser.prior();

        let update = fuser.fuse(10.0, 20.0, &utc("2023-01-09T00:00:00Z")).unwrap().unwrap();
        assert_eq!(update.week, 2);
        assert_eq!(update.prior.version(), 1);
        assert_eq!(update.prior.scores(), &[0.032, 0.033, 0.034]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), update.prior);

        // Earlier snapshots are untouched.
        assert_eq!(before.version(), 0);
        assert_eq!(before.scores(), &[1.0; 3]);

        let again = fuser.fuse(0.0, 0.0, &utc("2023-01-09T00:00:00Z")).unwrap().unwrap();
        assert_eq!(again.prior.version(), 2);
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let fuser = GeoFuser::new(Some(Arc::new(LinearGeo { classes: 2 })), 2);
        assert!(matches!(
            fuser.fuse(f32::NAN, 0.0, &Utc::now()),
            Err(PipelineError::InvalidInput(_))
        ));
        assert_eq!(fuser.prior().version(), 0);
    }
}
