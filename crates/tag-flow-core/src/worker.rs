use crate::events::HostEvent;
use crate::host::{BlobStore, NoteHost};
use crate::reconciler::TagFlow;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

/// Note events waiting out the debounce window, at most one per note, in
/// arrival order.
#[derive(Debug, Default)]
struct PendingEvents {
    events: Vec<(HostEvent, Instant)>,
}

impl PendingEvents {
    /// Queue `event`, merging it with any event already waiting for the same
    /// note. The merged event waits until `due`.
    fn push(&mut self, mut event: HostEvent, due: Instant) {
        if let Some(pos) = self.events.iter().position(|(e, _)| e.note() == event.note()) {
            let (earlier, _) = self.events.remove(pos);
            event = coalesce(earlier, event);
        }
        self.events.push((event, due));
    }

    fn next_due(&self) -> Option<Instant> {
        self.events.iter().map(|(_, due)| *due).min()
    }

    fn take_due(&mut self, now: Instant) -> Vec<HostEvent> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|(_, due)| *due <= now);
        self.events = waiting;
        due.into_iter().map(|(e, _)| e).collect()
    }

    fn take_all(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
            .into_iter()
            .map(|(e, _)| e)
            .collect()
    }
}

fn is_debounced(event: &HostEvent) -> bool {
    matches!(
        event,
        HostEvent::Created(_) | HostEvent::Modified(_) | HostEvent::Deleted(_)
    )
}

/// The single event equivalent to `earlier` followed by `later` for the
/// same note. A delete undone by a re-create is a modification, so the
/// note's lists survive.
fn coalesce(earlier: HostEvent, later: HostEvent) -> HostEvent {
    match (earlier, later) {
        (HostEvent::Deleted(_), HostEvent::Created(id) | HostEvent::Modified(id)) => {
            HostEvent::Modified(id)
        }
        (HostEvent::Created(_), HostEvent::Modified(id)) => HostEvent::Created(id),
        (_, later) => later,
    }
}

enum Step {
    Event(HostEvent),
    Due,
    Stop,
}

async fn dispatch<H: NoteHost + BlobStore>(flow: &mut TagFlow<H>, event: HostEvent) {
    tracing::debug!("Handling {:?}", event);
    if let Err(e) = flow.handle_event(event.clone()).await {
        tracing::error!("Failed to handle {:?}: {}", event, e);
    }
}

/// Drive `flow` from a queue of host events until the queue closes or
/// `shutdown` resolves.
///
/// Events are handled one at a time, so every mutation of the cache and
/// registry is serialized. Create, modify and delete events are debounced
/// per note by `debounce_millis`; renames first flush whatever is waiting.
/// A sweep tick is injected every `sweep_interval_secs`. Handler errors are
/// logged and the loop continues. Waiting events are handled before exit.
pub async fn run_worker<H, F>(flow: &mut TagFlow<H>, mut rx: mpsc::Receiver<HostEvent>, shutdown: F)
where
    H: NoteHost + BlobStore,
    F: Future<Output = ()>,
{
    let period = Duration::from_secs(flow.config().sweep_interval_secs.max(1));
    let debounce = Duration::from_millis(flow.config().debounce_millis);
    let mut sweep = interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = PendingEvents::default();
    tokio::pin!(shutdown);

    tracing::info!(
        "Tag flow worker started, sweeping every {:?}, debounce {:?}",
        period,
        debounce
    );
    loop {
        let next_due = pending.next_due();
        let step = tokio::select! {
            received = rx.recv() => match received {
                Some(event) => Step::Event(event),
                None => Step::Stop,
            },
            _ = sweep.tick() => Step::Event(HostEvent::SweepTick),
            _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => Step::Due,
            _ = &mut shutdown => {
                tracing::info!("Tag flow worker received shutdown");
                Step::Stop
            }
        };

        match step {
            Step::Event(event) if is_debounced(&event) && !debounce.is_zero() => {
                pending.push(event, Instant::now() + debounce);
            }
            Step::Event(event) => {
                if matches!(event, HostEvent::Renamed { .. } | HostEvent::FolderRenamed { .. }) {
                    for earlier in pending.take_all() {
                        dispatch(flow, earlier).await;
                    }
                }
                dispatch(flow, event).await;
            }
            Step::Due => {
                for event in pending.take_due(Instant::now()) {
                    dispatch(flow, event).await;
                }
            }
            Step::Stop => {
                for event in pending.take_all() {
                    dispatch(flow, event).await;
                }
                break;
            }
        }
    }
    tracing::info!("Tag flow worker stopped");
}
