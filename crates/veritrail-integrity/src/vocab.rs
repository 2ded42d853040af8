//! Closed compliance vocabularies.
//!
//! Each vocabulary is a fixed tagged set serialized in `snake_case`. Stored
//! values outside the set deserialize to `Unknown` instead of failing, so a
//! single unrecognised tag never makes an event unreadable; the corruption
//! scanner reports it instead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $tag:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// A stored value outside the vocabulary.
            #[serde(other)]
            Unknown,
        }

        impl $name {
            /// Every valid member, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Wire tag.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $tag, )+
                    Self::Unknown => "unknown",
                }
            }

            /// `false` only for [`Self::Unknown`].
            #[must_use]
            pub const fn is_valid(self) -> bool {
                !matches!(self, Self::Unknown)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = IntegrityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $tag => Ok(Self::$variant), )+
                    other => Err(IntegrityError::Validation(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

vocabulary! {
    /// Kind of principal that performed an action.
    ActorType {
        /// An end user.
        User => "user",
        /// A backend service acting on its own behalf.
        Service => "service",
        /// The platform itself (schedulers, migrations).
        System => "system",
        /// An operator with elevated rights.
        Administrator => "administrator",
    }
}

vocabulary! {
    /// Kind of resource an action was applied to.
    TargetType {
        /// A user or service account.
        Account => "account",
        /// A payment or refund.
        Payment => "payment",
        /// A bid or offer.
        Bid => "bid",
        /// An authentication session.
        Session => "session",
        /// A stored document.
        Document => "document",
        /// A configuration entry.
        Configuration => "configuration",
        /// An audit log itself.
        AuditLog => "audit_log",
    }
}

vocabulary! {
    /// Outcome of the audited action.
    EventResult {
        /// The action completed.
        Success => "success",
        /// The action was attempted and failed.
        Failure => "failure",
        /// The action was refused by policy.
        Denied => "denied",
        /// The action errored before completing.
        Error => "error",
    }
}

vocabulary! {
    /// Data classification of the affected resource.
    DataClass {
        /// Publicly available.
        Public => "public",
        /// Internal only.
        Internal => "internal",
        /// Confidential business data.
        Confidential => "confidential",
        /// Personal data.
        Personal => "personal",
        /// Special-category personal data.
        Sensitive => "sensitive",
        /// Financial records.
        Financial => "financial",
    }
}

vocabulary! {
    /// Lawful basis for processing personal data.
    LegalBasis {
        /// The subject consented.
        Consent => "consent",
        /// Needed to perform a contract.
        Contract => "contract",
        /// Required by law.
        LegalObligation => "legal_obligation",
        /// Protects someone's life.
        VitalInterests => "vital_interests",
        /// Task in the public interest.
        PublicTask => "public_task",
        /// Legitimate interests of the controller.
        LegitimateInterests => "legitimate_interests",
    }
}

impl Default for EventResult {
    fn default() -> Self {
        Self::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_tags() {
        for actor in ActorType::ALL {
            assert_eq!(actor.as_str().parse::<ActorType>().unwrap(), *actor);
        }
        for basis in LegalBasis::ALL {
            assert_eq!(basis.as_str().parse::<LegalBasis>().unwrap(), *basis);
        }
    }

    #[test]
    fn test_unrecognised_stored_value_becomes_unknown() {
        let parsed: TargetType = serde_json::from_str("\"spaceship\"").unwrap();
        assert_eq!(parsed, TargetType::Unknown);
        assert!(!parsed.is_valid());
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "robot".parse::<ActorType>().unwrap_err();
        assert!(err.to_string().contains("robot"));
        assert!("unknown".parse::<DataClass>().is_err());
    }

    #[test]
    fn test_snake_case_tags() {
        assert_eq!(
            serde_json::to_string(&LegalBasis::LegitimateInterests).unwrap(),
            "\"legitimate_interests\""
        );
        assert_eq!(TargetType::AuditLog.to_string(), "audit_log");
        assert!(EventResult::Success.is_valid());
        assert_eq!(EventResult::default(), EventResult::Unknown);
    }
}
