use serde::{Deserialize, Serialize};

/// Document types that are routed through approval flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessType {
    Quotation,
    Contract,
    Report,
    InspectionItem,
    ConsultationAssessment,
}

impl BusinessType {
    pub const ALL: [BusinessType; 5] = [
        Self::Quotation,
        Self::Contract,
        Self::Report,
        Self::InspectionItem,
        Self::ConsultationAssessment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quotation => "quotation",
            Self::Contract => "contract",
            Self::Report => "report",
            Self::InspectionItem => "inspection_item",
            Self::ConsultationAssessment => "consultation_assessment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "quotation" => Some(Self::Quotation),
            "contract" => Some(Self::Contract),
            "report" => Some(Self::Report),
            "inspection_item" => Some(Self::InspectionItem),
            "consultation_assessment" => Some(Self::ConsultationAssessment),
            _ => None,
        }
    }
}

impl std::fmt::Display for BusinessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the one document an approval instance is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessRef {
    pub business_type: BusinessType,
    pub business_id: String,
}

impl BusinessRef {
    pub fn new(business_type: BusinessType, business_id: impl Into<String>) -> Self {
        Self { business_type, business_id: business_id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::BusinessType;

    #[test]
    fn business_type_round_trips_from_storage_encoding() {
        for business_type in BusinessType::ALL {
            assert_eq!(BusinessType::parse(business_type.as_str()), Some(business_type));
        }
    }

    #[test]
    fn business_type_accepts_hyphenated_spelling() {
        assert_eq!(BusinessType::parse("inspection-item"), Some(BusinessType::InspectionItem));
        assert_eq!(BusinessType::parse(" Quotation "), Some(BusinessType::Quotation));
        assert_eq!(BusinessType::parse("invoice"), None);
    }
}
