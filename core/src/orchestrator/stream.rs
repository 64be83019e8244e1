//! Stream strategy: render every pushed update until the closing one.

use super::{abort, status_bundle, Termination};
use crate::error::{KernelError, Result, Service};
use crate::output::{Classifier, DisplayHandle, DisplaySurface, RenderEvent};
use crate::services::StatusStream;
use crate::types::Invocation;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

pub(crate) async fn drive(
    mut updates: StatusStream,
    invocation: &mut Invocation,
    surface: &dyn DisplaySurface,
    cancel: &CancellationToken,
    classifier: &Classifier,
) -> Result<Termination> {
    let mut display = DisplayHandle::new(invocation.id.as_str());

    loop {
        // Updates already delivered are rendered before an interrupt is honored.
        let next = tokio::select! {
            biased;
            next = updates.next() => next,
            _ = cancel.cancelled() => return Ok(abort(invocation, &mut display, surface)),
        };

        let update = match next {
            Some(update) => update?,
            None => {
                return Err(KernelError::transport(
                    Service::Driver,
                    format!("updates for {} stopped before completion", invocation.id),
                ))
            }
        };

        invocation.apply_update(&update);
        display.show(surface, status_bundle(&invocation.snapshot()));

        if update.close {
            let output = invocation.output.as_deref().unwrap_or_default();
            if let Some(data) = classifier.classify(output).await {
                tracing::debug!(invocation = %invocation.id, "rendering output file");
                surface.emit(RenderEvent::Display {
                    data,
                    display_id: None,
                });
            }
            return Ok(Termination::Complete);
        }
    }
}
