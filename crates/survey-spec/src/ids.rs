use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                raw.trim().parse().map(Self)
            }
        }
    };
}

entity_id!(
    /// Server-assigned participant identifier, unique per engine.
    ParticipantId
);
entity_id!(
    /// Identifier of a branch inside one participant's entity store.
    BranchId
);
entity_id!(
    /// Identifier of a page inside one participant's entity store.
    PageId
);
entity_id!(
    /// Identifier of a question; also the key under which its form value is submitted.
    QuestionId
);
entity_id!(
    /// Identifier of a choice; submitted as the raw value of single-choice questions.
    ChoiceId
);
entity_id!(
    /// Identifier of a validator.
    ValidatorId
);
