use engage_core::{ActivityPayload, Properties};
#[cfg(debug_assertions)]
use tracing::warn;

/// Fold a batch into a single payload.
///
/// Ids come from the first payload. Events are concatenated in batch order.
/// Profile and group updates are unioned with later keys winning; payloads
/// without an update contribute nothing. An empty batch yields `None`.
pub fn merge(payloads: Vec<ActivityPayload>) -> Option<ActivityPayload> {
    let mut batch = payloads.into_iter();
    let mut merged = batch.next()?;

    let mut events = merged.events.take().unwrap_or_default();
    let mut profile = merged.profile_update.take();
    let mut group = merged.group_update.take();

    for next in batch {
        #[cfg(debug_assertions)]
        if next.account_id != merged.account_id || next.user_id != merged.user_id {
            warn!(
                first_user = %merged.user_id,
                other_user = %next.user_id,
                "merging payloads attributed to different identities"
            );
        }
        if let Some(more) = next.events {
            events.extend(more);
        }
        union_into(&mut profile, next.profile_update);
        union_into(&mut group, next.group_update);
    }

    merged.events = Some(events);
    merged.profile_update = profile;
    merged.group_update = group;
    Some(merged)
}

fn union_into(acc: &mut Option<Properties>, next: Option<Properties>) {
    if let Some(next) = next {
        acc.get_or_insert_with(Properties::new).extend(next);
    }
}
