use serde::Deserialize;
use serde_json::{json, Value};

/// The closed set of actions the model may request. Unknown names coming off
/// the wire do not parse and are rejected with a structured failure instead
/// of silently doing nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolName {
    CheckAvailability,
    CreateBooking,
    UpdateBooking,
    GetBookings,
    CancelBooking,
    CreateOrder,
    GetOrders,
    CancelOrder,
    CreateCustomer,
    UpdateCustomer,
    UpdateCustomerInsight,
}

impl ToolName {
    pub const ALL: [ToolName; 11] = [
        Self::CreateBooking,
        Self::CheckAvailability,
        Self::UpdateBooking,
        Self::GetBookings,
        Self::CancelBooking,
        Self::CreateOrder,
        Self::GetOrders,
        Self::CancelOrder,
        Self::UpdateCustomerInsight,
        Self::CreateCustomer,
        Self::UpdateCustomer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckAvailability => "check_availability",
            Self::CreateBooking => "create_booking",
            Self::UpdateBooking => "update_booking",
            Self::GetBookings => "get_bookings",
            Self::CancelBooking => "cancel_booking",
            Self::CreateOrder => "create_order",
            Self::GetOrders => "get_orders",
            Self::CancelOrder => "cancel_order",
            Self::CreateCustomer => "create_customer",
            Self::UpdateCustomer => "update_customer",
            Self::UpdateCustomerInsight => "update_customer_insight",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "check_availability" => Some(Self::CheckAvailability),
            "create_booking" => Some(Self::CreateBooking),
            "update_booking" => Some(Self::UpdateBooking),
            "get_bookings" => Some(Self::GetBookings),
            "cancel_booking" => Some(Self::CancelBooking),
            "create_order" => Some(Self::CreateOrder),
            "get_orders" => Some(Self::GetOrders),
            "cancel_order" => Some(Self::CancelOrder),
            "create_customer" => Some(Self::CreateCustomer),
            "update_customer" => Some(Self::UpdateCustomer),
            "update_customer_insight" => Some(Self::UpdateCustomerInsight),
            _ => None,
        }
    }

    fn declaration(&self) -> Value {
        let (description, parameters) = match self {
            Self::CheckAvailability => (
                "List open appointment times for a given date.",
                json!({
                    "type": "object",
                    "properties": {
                        "date": {"type": "string", "description": "Date in YYYY-MM-DD format"}
                    },
                    "required": ["date"]
                }),
            ),
            Self::CreateBooking => (
                "Book a service for a customer at a specific date and time.",
                json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "customer_name": {"type": "string"},
                        "customer_email": {"type": "string"},
                        "customer_phone": {"type": "string"},
                        "service_name": {"type": "string"},
                        "date": {"type": "string", "description": "Date in YYYY-MM-DD format"},
                        "time": {"type": "string", "description": "Time in HH:MM format"},
                        "addons": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["service_name", "date", "time"]
                }),
            ),
            Self::UpdateBooking => (
                "Change an existing booking's service, date, time, or add-ons.",
                json!({
                    "type": "object",
                    "properties": {
                        "booking_id": {"type": "string"},
                        "service_name": {"type": "string"},
                        "date": {"type": "string"},
                        "time": {"type": "string"},
                        "addons": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["booking_id"]
                }),
            ),
            Self::GetBookings => (
                "List the customer's bookings.",
                json!({
                    "type": "object",
                    "properties": {
                        "customer_name": {"type": "string"}
                    },
                    "required": []
                }),
            ),
            Self::CancelBooking => (
                "Cancel a booking and free its slot.",
                json!({
                    "type": "object",
                    "properties": {
                        "booking_id": {"type": "string"}
                    },
                    "required": ["booking_id"]
                }),
            ),
            Self::CreateOrder => (
                "Place an order for one or more products. All items must be in stock.",
                json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "customer_name": {"type": "string"},
                        "customer_email": {"type": "string"},
                        "customer_phone": {"type": "string"},
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "product_name": {"type": "string"},
                                    "variant_name": {"type": "string"},
                                    "quantity": {"type": "integer"}
                                },
                                "required": ["product_name", "quantity"]
                            }
                        }
                    },
                    "required": ["items"]
                }),
            ),
            Self::GetOrders => (
                "List the customer's orders.",
                json!({
                    "type": "object",
                    "properties": {
                        "customer_name": {"type": "string"}
                    },
                    "required": []
                }),
            ),
            Self::CancelOrder => (
                "Cancel an order and restore its stock.",
                json!({
                    "type": "object",
                    "properties": {
                        "order_id": {"type": "string"}
                    },
                    "required": ["order_id"]
                }),
            ),
            Self::CreateCustomer => (
                "Create a customer profile. Requires at least a name.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "phone": {"type": "string"},
                        "email": {"type": "string"}
                    },
                    "required": ["name"]
                }),
            ),
            Self::UpdateCustomer => (
                "Update the customer's contact details, creating the profile if none exists.",
                json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "name": {"type": "string"},
                        "phone": {"type": "string"},
                        "email": {"type": "string"}
                    },
                    "required": []
                }),
            ),
            Self::UpdateCustomerInsight => (
                "Overwrite the customer's private notes, tags, and lead score.",
                json!({
                    "type": "object",
                    "properties": {
                        "internal_notes": {"type": "string"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "lead_score": {"type": "integer", "minimum": 0, "maximum": 100}
                    },
                    "required": ["internal_notes", "tags", "lead_score"]
                }),
            ),
        };

        json!({
            "type": "function",
            "function": {
                "name": self.as_str(),
                "description": description,
                "parameters": parameters,
            }
        })
    }
}

/// The fixed function array advertised to the model service.
pub fn tool_declarations() -> Vec<Value> {
    ToolName::ALL.iter().map(ToolName::declaration).collect()
}

/// Parse raw tool-call arguments. Malformed JSON degrades to the default
/// (empty) argument set; the missing-field failure then flows back to the
/// model as a structured tool result.
pub fn parse_args<T: for<'de> Deserialize<'de> + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckAvailabilityArgs {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateBookingArgs {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub addons: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBookingArgs {
    #[serde(default)]
    pub booking_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub addons: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetBookingsArgs {
    #[serde(default)]
    pub customer_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingArgs {
    #[serde(default)]
    pub booking_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderArgs {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItemArgs>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderItemArgs {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetOrdersArgs {
    #[serde(default)]
    pub customer_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderArgs {
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCustomerArgs {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCustomerArgs {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCustomerInsightArgs {
    #[serde(default)]
    pub internal_notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub lead_score: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::{parse_args, tool_declarations, CreateBookingArgs, ToolName};

    #[test]
    fn every_declared_tool_round_trips_through_parse() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::parse("delete_database"), None);
    }

    #[test]
    fn declarations_cover_all_eleven_tools() {
        let declarations = tool_declarations();
        assert_eq!(declarations.len(), 11);
        assert!(declarations
            .iter()
            .all(|decl| decl["function"]["name"].as_str().is_some()));
    }

    #[test]
    fn malformed_arguments_degrade_to_defaults() {
        let args: CreateBookingArgs = parse_args("this is not json");
        assert!(args.service_name.is_none());
        assert!(args.addons.is_empty());

        let args: CreateBookingArgs =
            parse_args(r#"{"service_name":"Signature Fade","addons":["Beard Trim"]}"#);
        assert_eq!(args.service_name.as_deref(), Some("Signature Fade"));
        assert_eq!(args.addons, vec!["Beard Trim".to_string()]);
    }
}
