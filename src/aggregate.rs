use crate::models::{floor_to_midnight, DailyEntry, LineItem, SubscriptionWindow};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Index of the resource-group segment in `/subscriptions/{id}/resourceGroups/{rg}/...`.
const RESOURCE_GROUP_SEGMENT: usize = 4;

/// Extracts the lowercase resource group from an instance identifier, or
/// `None` when the path is too short to carry one.
pub fn resource_group_of(instance_id: &str) -> Option<String> {
    instance_id
        .split('/')
        .nth(RESOURCE_GROUP_SEGMENT)
        .filter(|segment| !segment.is_empty())
        .map(str::to_lowercase)
}

/// Folds line-items into a window, summing pretax cost per
/// (resource group, day). Items outside `[start, end)` are dropped.
pub fn aggregate<I>(
    subscription_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    items: I,
) -> SubscriptionWindow
where
    I: IntoIterator<Item = LineItem>,
{
    let mut window = SubscriptionWindow::new(subscription_id, start, end);
    let mut skipped = 0usize;

    for item in items {
        let Some(rg) = resource_group_of(&item.instance_id) else {
            skipped += 1;
            continue;
        };

        let day = floor_to_midnight(item.usage_start);
        if !window.contains_day(day) {
            skipped += 1;
            continue;
        }

        let days = window.costs.entry(rg.clone()).or_default();
        days.entry(day)
            .and_modify(|entry| entry.amount += item.pretax_cost)
            .or_insert(DailyEntry {
                day,
                resource_group: rg,
                amount: item.pretax_cost,
            });
    }

    if skipped > 0 {
        debug!(
            subscription_id,
            skipped, "skipped line-items without a resource group or outside the window"
        );
    }

    window
}
