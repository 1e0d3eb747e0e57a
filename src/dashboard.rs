use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Widget carrying the machine's overall status
pub const MACHINE_STATUS_WIDGET: &str = "CMMachineStatus";

pub const BREWING_MODE: &str = "BrewingMode";
pub const STANDBY_MODE: &str = "StandBy";

/// Status payload returned by `/things/{serial}/dashboard`, kept as received.
///
/// The cloud adds widgets and fields freely, so nothing is rejected up front;
/// accessors read what they understand and skip the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DashboardSnapshot(pub Value);

/// Borrowed view of one dashboard widget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Widget<'a> {
    pub code: &'a str,
    /// Widget-specific fields; their shape depends on `code`
    pub output: Option<&'a Value>,
}

impl DashboardSnapshot {
    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.0.get("serialNumber").and_then(Value::as_str)
    }

    /// Widgets that carry a `code`. A missing or non-array widget list yields none.
    pub fn widgets(&self) -> impl Iterator<Item = Widget<'_>> {
        self.0
            .get("widgets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|widget| {
                Some(Widget {
                    code: widget.get("code")?.as_str()?,
                    output: widget.get("output"),
                })
            })
    }

    pub fn power(&self) -> Option<bool> {
        extract_power_from_dashboard(self)
    }
}

impl From<Value> for DashboardSnapshot {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Map a dashboard to the machine's power state.
///
/// `Some(true)` when the status widget reports brewing mode, `Some(false)` for
/// standby, and `None` when the widget is missing or reports anything else.
pub fn extract_power_from_dashboard(snapshot: &DashboardSnapshot) -> Option<bool> {
    let widget = snapshot
        .widgets()
        .find(|widget| widget.code == MACHINE_STATUS_WIDGET)?;

    match widget.output?.get("mode").and_then(Value::as_str)? {
        BREWING_MODE => Some(true),
        STANDBY_MODE => Some(false),
        _ => None,
    }
}
