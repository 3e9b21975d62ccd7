//! Pointer and keyboard injection against the target UI.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::action::ScrollDirection;
use crate::error::ActuationError;

/// Input injection. Coordinates are absolute screen pixels.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn point_click(&self, x: i32, y: i32) -> Result<(), ActuationError>;

    async fn type_text(&self, text: &str) -> Result<(), ActuationError>;

    async fn scroll(&self, direction: ScrollDirection, magnitude: u32)
    -> Result<(), ActuationError>;

    /// Bring the target window to the front at its known position and size.
    async fn normalize_environment(&self) -> Result<(), ActuationError>;
}

/// Reports where the pointer currently is.
#[async_trait]
pub trait PointerProbe: Send + Sync {
    async fn pointer_position(&self) -> Result<(i32, i32), ActuationError>;
}

#[async_trait]
impl<T: Actuator + ?Sized> Actuator for Box<T> {
    async fn point_click(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        (**self).point_click(x, y).await
    }

    async fn type_text(&self, text: &str) -> Result<(), ActuationError> {
        (**self).type_text(text).await
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: u32,
    ) -> Result<(), ActuationError> {
        (**self).scroll(direction, magnitude).await
    }

    async fn normalize_environment(&self) -> Result<(), ActuationError> {
        (**self).normalize_environment().await
    }
}

/// Stops actuation as soon as someone else moves the pointer.
///
/// Before every click, type or scroll the current pointer position is compared
/// with the last position this wrapper observed. A jump larger than
/// `threshold_px` means a human has grabbed the mouse, and the action is
/// refused with [`ActuationError::SafetyInterlockTripped`].
#[derive(Debug)]
pub struct SafetyInterlock<A> {
    inner: A,
    threshold_px: u32,
    last: Mutex<Option<(i32, i32)>>,
}

impl<A: Actuator + PointerProbe> SafetyInterlock<A> {
    pub fn new(inner: A, threshold_px: u32) -> Self {
        Self {
            inner,
            threshold_px,
            last: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn last(&self) -> MutexGuard<'_, Option<(i32, i32)>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse to act when the pointer left the controlled position. A trip
    /// keeps the old position, so every later action is refused too.
    async fn check(&self) -> Result<(), ActuationError> {
        let current = self.inner.pointer_position().await?;
        let mut last = self.last();
        if let Some(previous) = *last {
            let moved_px = distance(previous, current);
            if moved_px > self.threshold_px {
                warn!(
                    moved_px,
                    threshold_px = self.threshold_px,
                    "pointer moved outside automation; stopping"
                );
                return Err(ActuationError::SafetyInterlockTripped { moved_px });
            }
        }
        *last = Some(current);
        Ok(())
    }

    async fn refresh(&self) -> Result<(), ActuationError> {
        let current = self.inner.pointer_position().await?;
        *self.last() = Some(current);
        debug!(x = current.0, y = current.1, "controlled pointer position");
        Ok(())
    }
}

#[async_trait]
impl<A: Actuator + PointerProbe> Actuator for SafetyInterlock<A> {
    async fn point_click(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        self.check().await?;
        self.inner.point_click(x, y).await?;
        self.refresh().await
    }

    async fn type_text(&self, text: &str) -> Result<(), ActuationError> {
        self.check().await?;
        self.inner.type_text(text).await
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: u32,
    ) -> Result<(), ActuationError> {
        self.check().await?;
        self.inner.scroll(direction, magnitude).await
    }

    async fn normalize_environment(&self) -> Result<(), ActuationError> {
        self.inner.normalize_environment().await
    }
}

/// Euclidean distance rounded to whole pixels.
fn distance(a: (i32, i32), b: (i32, i32)) -> u32 {
    let dx = f64::from(b.0) - f64::from(a.0);
    let dy = f64::from(b.1) - f64::from(a.1);
    dx.hypot(dy).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Actuation, RecordingActuator};

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(distance((0, 0), (30, 40)), 50);
        assert_eq!(distance((10, 10), (10, 10)), 0);
        assert_eq!(distance((0, 0), (-3, -4)), 5);
    }

    #[tokio::test]
    async fn first_action_only_records_position() {
        let robot = RecordingActuator::new();
        robot.set_pointer(400, 400);
        let guarded = SafetyInterlock::new(robot, 50);

        guarded.type_text("hi").await.expect("type");

        assert_eq!(
            guarded.inner().actions(),
            vec![Actuation::Type("hi".to_string())]
        );
    }

    #[tokio::test]
    async fn small_drift_is_tolerated() {
        let robot = RecordingActuator::new();
        let guarded = SafetyInterlock::new(robot, 50);

        guarded.point_click(100, 100).await.expect("click");
        guarded.inner().set_pointer(130, 140);
        guarded
            .scroll(ScrollDirection::Down, 500)
            .await
            .expect("scroll");

        assert_eq!(guarded.inner().actions().len(), 2);
    }

    #[tokio::test]
    async fn trips_when_pointer_jumps() {
        let robot = RecordingActuator::new();
        let guarded = SafetyInterlock::new(robot, 50);

        guarded.point_click(100, 100).await.expect("click");
        guarded.inner().set_pointer(100, 300);
        let err = guarded.point_click(200, 200).await.unwrap_err();

        assert!(matches!(
            err,
            ActuationError::SafetyInterlockTripped { moved_px: 200 }
        ));
        // The refused click never reached the desktop.
        assert_eq!(
            guarded.inner().actions(),
            vec![Actuation::Click { x: 100, y: 100 }]
        );
    }

    #[tokio::test]
    async fn stays_tripped_until_pointer_returns() {
        let robot = RecordingActuator::new();
        let guarded = SafetyInterlock::new(robot, 50);

        guarded.point_click(100, 100).await.expect("click");
        guarded.inner().set_pointer(400, 500);
        assert!(guarded.type_text("a").await.is_err());
        let err = guarded.type_text("b").await.unwrap_err();
        assert!(matches!(
            err,
            ActuationError::SafetyInterlockTripped { moved_px: 500 }
        ));

        guarded.inner().set_pointer(110, 100);
        guarded.type_text("c").await.expect("type after pointer returned");
        assert_eq!(
            guarded.inner().inputs(),
            vec![
                Actuation::Click { x: 100, y: 100 },
                Actuation::Type("c".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn normalize_is_not_guarded() {
        let robot = RecordingActuator::new();
        let guarded = SafetyInterlock::new(robot, 50);
        guarded.point_click(0, 0).await.expect("click");
        guarded.inner().set_pointer(900, 900);

        guarded.normalize_environment().await.expect("normalize");

        assert_eq!(
            guarded.inner().actions().last(),
            Some(&Actuation::Normalize)
        );
    }
}
