//! Delivery of collected and immediate changes.

use super::collector::FlushReport;
use crate::engine::EngineInner;
use crate::error::CallbackError;
use crate::subscriptions::{self, Subscription};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, error, trace};

/// Clears the engine's flushing flag on every exit path.
struct FlushGuard<'a> {
    engine: &'a EngineInner,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.engine.flushing.set(false);
    }
}

/// Deliver everything collected before this call.
pub(crate) fn flush(engine: &EngineInner) -> FlushReport {
    if engine.flushing.replace(true) {
        debug!("nested flush ignored; changes stay queued for the next one");
        return FlushReport::empty(engine.collector.borrow().generation());
    }
    let _guard = FlushGuard { engine };

    // Swap first: anything a callback mutates goes to the next generation.
    let (generation, bucket) = engine.collector.borrow_mut().take();
    let mut report = FlushReport::empty(generation);
    let mut reap = Vec::new();

    for change in bucket {
        let Some(sub) = change.deliverable() else {
            report.skipped += 1;
            continue;
        };
        let (Some(observer), Some(observed)) = (sub.observer.upgrade(), change.observed.upgrade())
        else {
            report.skipped += 1;
            reap.push(sub);
            continue;
        };

        trace!(subscription = %sub.id, generation = ?change.generation, "delivering");
        match run_callback(&sub, &*observer, &*observed, None) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                engine.report_error(err.clone());
                report.failed.push(err);
            }
        }
    }

    for sub in &reap {
        debug!(subscription = %sub.id, "reaping subscription with a dropped party");
        engine.registry.remove(sub.id);
        subscriptions::teardown(sub);
    }
    // Catches dead parties that no mutation reached this generation.
    report.reaped = reap.len() + engine.registry.reap();

    trace!(
        generation = ?report.generation,
        delivered = report.delivered,
        skipped = report.skipped,
        failed = report.failed.len(),
        reaped = report.reaped,
        "flush complete"
    );
    report
}

/// Run an immediate-mode callback from inside a setter.
pub(crate) fn deliver_immediate(
    engine: &EngineInner,
    sub: &Rc<Subscription>,
    previous: Option<&dyn Any>,
) {
    let (Some(observer), Some(observed)) = (sub.observer.upgrade(), sub.observed.upgrade()) else {
        return;
    };
    if let Err(err) = run_callback(sub, &*observer, &*observed, previous) {
        engine.report_error(err);
    }
}

/// Invoke one callback, converting a panic into a [`CallbackError`].
///
/// The type check runs outside the unwind boundary: a mismatch is an engine
/// bug and must not be swallowed like a callback failure.
fn run_callback(
    sub: &Subscription,
    observer: &dyn Any,
    observed: &dyn Any,
    previous: Option<&dyn Any>,
) -> Result<(), CallbackError> {
    if let Err(violation) = sub.callback.check(observer, observed) {
        panic!("{violation}");
    }

    catch_unwind(AssertUnwindSafe(|| {
        sub.callback.invoke(observer, observed, previous)
    }))
    .map_err(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        error!(
            subscription = %sub.id,
            path = %sub.path,
            message = %message,
            "observation callback panicked"
        );
        CallbackError::Panicked {
            subscription: sub.id,
            path: sub.path.to_string(),
            message,
        }
    })
}
