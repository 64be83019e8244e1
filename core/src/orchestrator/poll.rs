//! Poll strategy: wait, fetch the status, render, repeat until complete.

use super::backoff::backoff;
use super::{abort, status_bundle, Termination};
use crate::error::Result;
use crate::output::{DisplayHandle, DisplaySurface};
use crate::services::Registry;
use crate::types::Invocation;
use tokio_util::sync::CancellationToken;

/// Poll until the registry reports completion.
///
/// A failed fetch is retried at the next delay without resetting the
/// counter; `max_failures` consecutive failures end the run.
pub(crate) async fn drive(
    registry: &dyn Registry,
    invocation: &mut Invocation,
    surface: &dyn DisplaySurface,
    cancel: &CancellationToken,
    max_failures: u32,
) -> Result<Termination> {
    let mut display = DisplayHandle::new(invocation.id.as_str());
    let mut n: u32 = 1;
    let mut failures: u32 = 0;

    loop {
        let delay = backoff(n);
        n = n.saturating_add(1);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(abort(invocation, &mut display, surface)),
            _ = tokio::time::sleep(delay) => {}
        }

        // A status that is already here wins over a concurrent interrupt.
        let fetched = tokio::select! {
            biased;
            fetched = registry.get_status(&invocation.id) => fetched,
            _ = cancel.cancelled() => return Ok(abort(invocation, &mut display, surface)),
        };

        match fetched {
            Ok(snapshot) => {
                failures = 0;
                invocation.apply_snapshot(&snapshot);
                display.show(surface, status_bundle(&invocation.snapshot()));

                if invocation.status.is_complete() {
                    return Ok(Termination::Complete);
                }
                if cancel.is_cancelled() {
                    return Ok(abort(invocation, &mut display, surface));
                }
            }
            Err(e) if e.is_transient() && failures + 1 < max_failures => {
                failures += 1;
                tracing::warn!(
                    invocation = %invocation.id,
                    attempt = failures,
                    error = %e,
                    "status fetch failed, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}
