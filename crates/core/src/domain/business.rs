use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub business_type: Option<String>,
    /// Merchant-authored behavioral instructions injected into the system prompt.
    pub agent_instructions: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusinessPolicy {
    pub title: String,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

/// A bookable service with its optional add-ons attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub business_id: BusinessId,
    pub name: String,
    pub price: f64,
    pub duration_minutes: Option<i64>,
    pub addons: Vec<ServiceAddon>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceAddon {
    pub name: String,
    pub price: f64,
}

impl Service {
    /// Price an add-on selection against this service's catalog. Add-ons the
    /// catalog does not know contribute zero.
    pub fn addon_price(&self, addon_name: &str) -> f64 {
        self.addons
            .iter()
            .find(|addon| addon.name.eq_ignore_ascii_case(addon_name))
            .map(|addon| addon.price)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Business, BusinessId, Service, ServiceAddon, ServiceId};

    fn service_fixture() -> Service {
        Service {
            id: ServiceId("svc-cut".to_string()),
            business_id: BusinessId("biz-1".to_string()),
            name: "Haircut".to_string(),
            price: 60.0,
            duration_minutes: Some(45),
            addons: vec![
                ServiceAddon { name: "Beard Trim".to_string(), price: 15.0 },
                ServiceAddon { name: "Hot Towel".to_string(), price: 5.0 },
            ],
        }
    }

    #[test]
    fn addon_price_matches_case_insensitively() {
        let service = service_fixture();
        assert_eq!(service.addon_price("beard trim"), 15.0);
        assert_eq!(service.addon_price("HOT TOWEL"), 5.0);
    }

    #[test]
    fn unknown_addon_contributes_zero() {
        let service = service_fixture();
        assert_eq!(service.addon_price("Scalp Massage"), 0.0);
    }

    #[test]
    fn business_serializes_with_optional_fields() {
        let business = Business {
            id: BusinessId("biz-1".to_string()),
            name: "Fade Factory".to_string(),
            business_type: Some("barbershop".to_string()),
            agent_instructions: None,
        };
        let value = serde_json::to_value(&business).expect("serialize");
        assert_eq!(value["name"], "Fade Factory");
        assert!(value["agent_instructions"].is_null());
    }
}
