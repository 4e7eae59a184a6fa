pub mod contact;
pub mod metric_rule;
pub mod notify_log;
pub mod rule;
pub mod rule_contact;
pub mod rule_state;
pub mod rule_template;
pub mod target;
pub mod triggered_event;
