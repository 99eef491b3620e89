//! Node type identifiers shared by the cost table, the handler registry and
//! the scheduler's control-flow phases.

pub const LAUNCH_BROWSER: &str = "LAUNCH_BROWSER";
pub const NAVIGATE_URL: &str = "NAVIGATE_URL";
pub const PAGE_TO_HTML: &str = "PAGE_TO_HTML";
pub const EXTRACT_TEXT_FROM_ELEMENT: &str = "EXTRACT_TEXT_FROM_ELEMENT";
pub const FILL_INPUT: &str = "FILL_INPUT";
pub const CLICK_ELEMENT: &str = "CLICK_ELEMENT";
pub const WAIT_FOR_ELEMENT: &str = "WAIT_FOR_ELEMENT";
pub const SCROLL_TO_ELEMENT: &str = "SCROLL_TO_ELEMENT";
pub const DELIVER_VIA_WEBHOOK: &str = "DELIVER_VIA_WEBHOOK";
pub const EXTRACT_DATA_WITH_AI: &str = "EXTRACT_DATA_WITH_AI";
pub const READ_PROPERTY_FROM_JSON: &str = "READ_PROPERTY_FROM_JSON";
pub const ADD_PROPERTY_TO_JSON: &str = "ADD_PROPERTY_TO_JSON";
pub const CONDITION: &str = "CONDITION";
pub const FOREACH: &str = "FOREACH";
pub const FOREACH_JOIN: &str = "FOREACH_JOIN";
pub const WAIT_FOR_USER_INPUT: &str = "WAIT_FOR_USER_INPUT";
pub const MERGE: &str = "MERGE";
