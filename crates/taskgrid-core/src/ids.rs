//! Opaque identifier newtypes for every entity in the data model (spec §3).
//!
//! Each wraps a `Uuid` rather than exposing one directly, so the entities
//! they index cannot be mixed up at the type level (a `NodeId` cannot be
//! passed where an `ExecutionId` is expected).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_newtype!(ProgramId, "`PID`: identifies a Program.");
id_newtype!(VersionId, "`VID`: identifies a Version of a Program.");
id_newtype!(WorkflowId, "`WID`: identifies a Workflow.");
id_newtype!(ExecutionId, "`EID`: identifies a program Execution.");
id_newtype!(NodeId, "`NID`: identifies a Node within a single Workflow.");
id_newtype!(InteractionId, "`IID`: identifies a UIInteraction.");
