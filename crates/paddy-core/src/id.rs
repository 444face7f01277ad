use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Handle returned when subscribing to state or event notifications.
    pub struct SubscriptionId;
}

/// Declares a string-backed content identifier.
///
/// Content ids stay strings (rather than interned integers) so that saves
/// remain keyed by name across content versions.
macro_rules! content_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

content_id! {
    /// Identifies a resource (rice, water, coins, ...).
    ResourceId
}

content_id! {
    /// Identifies a building type.
    BuildingId
}

content_id! {
    /// Identifies an upgrade.
    UpgradeId
}

content_id! {
    /// Identifies a multiplier stack.
    StackId
}

content_id! {
    /// Identifies a multiplier source within a stack.
    SourceId
}

content_id! {
    /// Identifies a curve preset.
    CurveId
}

content_id! {
    /// Identifies an era.
    EraId
}

/// Well-known stack ids the engine reads directly.
pub mod stacks {
    /// Global production multiplier applied to every output.
    pub const ALL_PRODUCTION: &str = "all_production";
    /// Multiplier applied to every building purchase cost.
    pub const BUILDING_COST: &str = "building_cost";
}
