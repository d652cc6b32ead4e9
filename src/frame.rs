//! Frame construction over a window's day axis.
//!
//! Every frame carries a `time` column of UTC midnights covering
//! `[window.start, window.end)` and amount columns of the same length.
//! Days without a cost entry read as `0.0`.

use crate::models::{OutputMode, SubscriptionWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const FRAME_NAME: &str = "response";
pub const TIME_FIELD: &str = "time";
pub const TOTAL_FIELD: &str = "subscription";

/// Azure resource-group names never contain spaces.
const RESOURCE_GROUP_SUFFIX: &str = " (resource group)";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Float64(Vec<f64>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub values: FieldValues,
}

impl Field {
    pub fn as_times(&self) -> Option<&[DateTime<Utc>]> {
        match &self.values {
            FieldValues::Time(v) => Some(v),
            FieldValues::Float64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.values {
            FieldValues::Float64(v) => Some(v),
            FieldValues::Time(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Frame {
    fn new(fields: Vec<Field>) -> Self {
        Self {
            name: FRAME_NAME.to_string(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }
}

pub fn build_frame(window: &SubscriptionWindow, mode: OutputMode) -> Frame {
    match mode {
        OutputMode::Split => build_split_frame(window),
        OutputMode::Total => build_total_frame(window),
    }
}

/// Column name for a resource group. A group named like the time column is
/// suffixed so `time` stays unique.
fn resource_group_column(rg: &str) -> String {
    if rg == TIME_FIELD {
        format!("{rg}{RESOURCE_GROUP_SUFFIX}")
    } else {
        rg.to_string()
    }
}

/// One amount column per resource group (lexicographic), then `time`.
pub fn build_split_frame(window: &SubscriptionWindow) -> Frame {
    let days: Vec<DateTime<Utc>> = window.days().collect();

    let mut fields: Vec<Field> = window
        .resource_groups()
        .map(|rg| Field {
            name: resource_group_column(rg),
            values: FieldValues::Float64(
                days.iter()
                    .map(|day| window.amount(rg, *day).unwrap_or(0.0))
                    .collect(),
            ),
        })
        .collect();

    fields.push(Field {
        name: TIME_FIELD.to_string(),
        values: FieldValues::Time(days),
    });

    Frame::new(fields)
}

/// `time` and `subscription`, the latter summing every resource group per day.
pub fn build_total_frame(window: &SubscriptionWindow) -> Frame {
    let days: Vec<DateTime<Utc>> = window.days().collect();
    let totals = days.iter().map(|day| window.day_total(*day)).collect();

    Frame::new(vec![
        Field {
            name: TIME_FIELD.to_string(),
            values: FieldValues::Time(days),
        },
        Field {
            name: TOTAL_FIELD.to_string(),
            values: FieldValues::Float64(totals),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::models::LineItem;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn item(rg: &str, d: u32, cost: f64) -> LineItem {
        LineItem {
            subscription_guid: "guid".into(),
            instance_id: format!("/subscriptions/guid/resourceGroups/{rg}/providers/x/y"),
            usage_start: day(d),
            usage_end: day(d) + Duration::seconds(86_399),
            pretax_cost: cost,
        }
    }

    fn sample_window() -> SubscriptionWindow {
        aggregate(
            "sub",
            day(1),
            day(3),
            vec![item("a", 1, 2.0), item("b", 1, 3.0), item("a", 2, 4.0)],
        )
    }

    fn floats<'a>(frame: &'a Frame, name: &str) -> &'a [f64] {
        frame
            .field(name)
            .and_then(Field::as_f64)
            .unwrap_or_else(|| panic!("missing float field {name}"))
    }

    #[test]
    fn split_frame_fills_missing_days_with_zero() {
        let frame = build_split_frame(&sample_window());

        assert_eq!(frame.name, "response");
        assert_eq!(floats(&frame, "a"), &[2.0, 4.0]);
        assert_eq!(floats(&frame, "b"), &[3.0, 0.0]);
        let times = frame.field("time").and_then(Field::as_times).unwrap();
        assert_eq!(times, &[day(1), day(2)]);
        assert_eq!(frame.fields.last().map(|f| f.name.as_str()), Some("time"));
    }

    #[test]
    fn total_frame_sums_across_resource_groups() {
        let frame = build_total_frame(&sample_window());

        let names: Vec<_> = frame.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["time", "subscription"]);
        assert_eq!(floats(&frame, "subscription"), &[5.0, 4.0]);
    }

    #[test]
    fn total_matches_sum_of_split_columns() {
        let window = sample_window();
        let split = build_split_frame(&window);
        let total = build_total_frame(&window);
        let totals = floats(&total, "subscription");

        for (i, expected) in totals.iter().enumerate() {
            let summed: f64 = split
                .fields
                .iter()
                .filter_map(Field::as_f64)
                .map(|col| col[i])
                .sum();
            assert_eq!(summed, *expected);
        }
    }

    #[test]
    fn columns_share_length_and_step_by_one_day() {
        let window = aggregate("sub", day(1), day(8), vec![item("a", 5, 1.0)]);
        for frame in [build_split_frame(&window), build_total_frame(&window)] {
            let times = frame.field("time").and_then(Field::as_times).unwrap();
            assert_eq!(times.len(), 7);
            assert_eq!(times[0], day(1));
            assert!(*times.last().unwrap() < day(8));
            for pair in times.windows(2) {
                assert_eq!(pair[1] - pair[0], Duration::days(1));
            }
            for field in &frame.fields {
                assert_eq!(field.values.len(), times.len());
            }
        }
    }

    #[test]
    fn empty_window_yields_time_only_split_and_zero_totals() {
        let window = aggregate("sub", day(1), day(4), Vec::new());

        let split = build_split_frame(&window);
        assert_eq!(split.fields.len(), 1);
        assert_eq!(split.row_count(), 3);

        let total = build_total_frame(&window);
        assert_eq!(floats(&total, "subscription"), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn resource_group_named_time_keeps_time_column_unique() {
        let window = aggregate(
            "sub",
            day(1),
            day(3),
            vec![item("Time", 1, 1.5), item("web", 2, 2.0)],
        );
        let frame = build_split_frame(&window);

        let names: Vec<_> = frame.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["time (resource group)", "web", "time"]);
        assert_eq!(floats(&frame, "time (resource group)"), &[1.5, 0.0]);
        let times = frame.field("time").and_then(Field::as_times).unwrap();
        assert_eq!(times, &[day(1), day(2)]);
    }

    #[test]
    fn frame_serializes_typed_columns() {
        let frame = build_total_frame(&sample_window());
        let json = serde_json::to_value(&frame).expect("frame serializes");
        assert_eq!(json["name"], "response");
        assert_eq!(json["fields"][0]["name"], "time");
        assert_eq!(json["fields"][0]["type"], "time");
        assert_eq!(json["fields"][1]["type"], "float64");
        assert_eq!(json["fields"][1]["values"][0], 5.0);
    }
}
